//! Reading the first worksheet of an `.xlsx` workbook into a [`Table`].

use std::{
    collections::BTreeMap,
    io::{BufReader, Read, Seek},
};

use quick_xml::{events::Event, reader::Reader};
use tracing::debug;

use crate::table::{Cell, Table, TableError};

const WORKBOOK: &str = "xl/workbook.xml";
const WORKBOOK_RELS: &str = "xl/_rels/workbook.xml.rels";
const SHARED_STRINGS: &str = "xl/sharedStrings.xml";
const FIRST_SHEET: &str = "xl/worksheets/sheet1.xml";

/// Reads the first worksheet. Its first non-empty row holds the headers; blank headers become
/// `Unnamed: N` (0-based column). Numeric cells are numbers, everything else is text.
pub fn read_xlsx<R: Read + Seek>(reader: R) -> Result<Table, TableError> {
    let mut archive = zip::ZipArchive::new(reader)?;

    let strings = shared_strings(&mut archive)?;
    let sheet = first_sheet_path(&mut archive)?;
    debug!(sheet = %sheet, shared_strings = strings.len(), "reading xlsx worksheet");
    let mut rows = worksheet(&mut archive, &sheet, &strings)?;

    let width = rows
        .values()
        .flat_map(|cells| cells.keys().next_back())
        .map(|&column| column + 1)
        .max()
        .unwrap_or(0);
    let (Some(&first), Some(&last)) = (rows.keys().next(), rows.keys().next_back()) else {
        return Ok(Table::default());
    };

    let header = rows.remove(&first).unwrap_or_default();
    let columns = (0..width).map(|column| match header.get(&column) {
        Some(cell) if !cell.is_blank() => cell.to_string(),
        _ => format!("Unnamed: {column}"),
    });
    let mut table = Table::new(columns);

    // Blank rows between data rows are kept as empty rows.
    for index in first + 1..=last {
        let mut cells = rows.remove(&index).unwrap_or_default();
        table.push_row(
            (0..width)
                .map(|column| cells.remove(&column).unwrap_or(Cell::Empty))
                .collect(),
        )?;
    }
    Ok(table)
}

type Archive<R> = zip::ZipArchive<R>;

fn xml<R: Read>(part: R) -> Reader<BufReader<R>> {
    let mut reader = Reader::from_reader(BufReader::new(part));
    reader.trim_text(false);
    reader
}

fn shared_strings<R: Read + Seek>(archive: &mut Archive<R>) -> Result<Vec<String>, TableError> {
    let mut strings = Vec::new();
    let part = match archive.by_name(SHARED_STRINGS) {
        Ok(part) => part,
        // Workbooks without any text have no shared strings part.
        Err(zip::result::ZipError::FileNotFound) => return Ok(strings),
        Err(e) => return Err(e.into()),
    };

    let mut reader = xml(part);
    let mut buf = Vec::new();
    let mut current = String::new();
    let mut in_t = false;
    // Phonetic runs repeat the text in another script.
    let mut in_phonetic = false;
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => match e.name().as_ref() {
                b"si" => current.clear(),
                b"t" => in_t = true,
                b"rPh" => in_phonetic = true,
                _ => {}
            },
            Event::Empty(e) if e.name().as_ref() == b"si" => strings.push(String::new()),
            Event::End(e) => match e.name().as_ref() {
                b"si" => strings.push(std::mem::take(&mut current)),
                b"t" => in_t = false,
                b"rPh" => in_phonetic = false,
                _ => {}
            },
            Event::Text(e) if in_t && !in_phonetic => current.push_str(&e.unescape()?),
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

/// Path of the first `<sheet>` in the workbook, resolved through the workbook relationships.
fn first_sheet_path<R: Read + Seek>(archive: &mut Archive<R>) -> Result<String, TableError> {
    let mut buf = Vec::new();
    let mut id = None;
    {
        let part = archive
            .by_name(WORKBOOK)
            .map_err(|_| TableError::MissingPart(WORKBOOK.to_string()))?;
        let mut reader = xml(part);
        loop {
            match reader.read_event_into(&mut buf)? {
                Event::Empty(e) | Event::Start(e) if e.name().as_ref() == b"sheet" => {
                    id = attribute(&e, b"r:id")?;
                    break;
                }
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }
    }
    buf.clear();
    let Some(id) = id else {
        return Err(TableError::InvalidXlsx("the workbook has no sheets".to_string()));
    };

    let part = match archive.by_name(WORKBOOK_RELS) {
        Ok(part) => part,
        Err(_) => return Ok(FIRST_SHEET.to_string()),
    };
    let mut reader = xml(part);
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Empty(e) | Event::Start(e) if e.name().as_ref() == b"Relationship" => {
                let mut matches = false;
                let mut target = None;
                for attr in e.attributes().flatten() {
                    match attr.key.as_ref() {
                        b"Id" => matches = attr.unescape_value()?.as_ref() == id,
                        b"Target" => target = Some(attr.unescape_value()?.to_string()),
                        _ => {}
                    }
                }
                if let (true, Some(target)) = (matches, target) {
                    return Ok(match target.strip_prefix('/') {
                        Some(absolute) => absolute.to_string(),
                        None => format!("xl/{target}"),
                    });
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(FIRST_SHEET.to_string())
}

/// Row index → column index → cell, both 0-based, blank cells left out.
type Sheet = BTreeMap<u32, BTreeMap<u32, Cell>>;

fn worksheet<R: Read + Seek>(
    archive: &mut Archive<R>,
    path: &str,
    strings: &[String],
) -> Result<Sheet, TableError> {
    let part = archive
        .by_name(path)
        .map_err(|_| TableError::MissingPart(path.to_string()))?;

    let mut reader = xml(part);
    let mut buf = Vec::new();
    let mut sheet = Sheet::new();

    let mut row = 0;
    let mut column = 0;
    let mut kind: Option<String> = None;
    let mut value: Option<String> = None;
    let mut in_value = false;
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) if e.name().as_ref() == b"row" => {
                if let Some(r) = attribute(&e, b"r")?.and_then(|r| r.parse::<u32>().ok()) {
                    row = r.saturating_sub(1);
                }
                column = 0;
            }
            Event::End(e) if e.name().as_ref() == b"row" => row += 1,
            Event::Start(e) if e.name().as_ref() == b"c" => {
                if let Some((r, c)) = attribute(&e, b"r")?.as_deref().and_then(cell_reference) {
                    row = r;
                    column = c;
                }
                kind = attribute(&e, b"t")?;
                value = None;
            }
            Event::Empty(e) if e.name().as_ref() == b"c" => {
                if let Some((_, c)) = attribute(&e, b"r")?.as_deref().and_then(cell_reference) {
                    column = c;
                }
                column += 1;
            }
            Event::End(e) if e.name().as_ref() == b"c" => {
                let cell = convert(kind.as_deref(), value.take(), strings)?;
                if !cell.is_blank() {
                    sheet.entry(row).or_default().insert(column, cell);
                }
                column += 1;
            }
            Event::Start(e) if matches!(e.name().as_ref(), b"v" | b"t") => in_value = true,
            Event::End(e) if matches!(e.name().as_ref(), b"v" | b"t") => in_value = false,
            Event::Text(e) if in_value => {
                value.get_or_insert_with(String::new).push_str(&e.unescape()?);
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(sheet)
}

fn attribute(
    element: &quick_xml::events::BytesStart<'_>,
    name: &[u8],
) -> Result<Option<String>, TableError> {
    for attr in element.attributes().flatten() {
        if attr.key.as_ref() == name {
            return Ok(Some(attr.unescape_value()?.to_string()));
        }
    }
    Ok(None)
}

/// `B3` → `(2, 1)`.
fn cell_reference(reference: &str) -> Option<(u32, u32)> {
    let split = reference.find(|c: char| c.is_ascii_digit())?;
    let (letters, digits) = reference.split_at(split);
    if letters.is_empty() || !letters.bytes().all(|b| b.is_ascii_uppercase()) {
        return None;
    }
    let column = letters
        .bytes()
        .try_fold(0u32, |acc, b| acc.checked_mul(26)?.checked_add(u32::from(b - b'A') + 1))?;
    let row = digits.parse::<u32>().ok()?;
    Some((row.checked_sub(1)?, column - 1))
}

fn convert(
    kind: Option<&str>,
    value: Option<String>,
    strings: &[String],
) -> Result<Cell, TableError> {
    let Some(value) = value else {
        return Ok(Cell::Empty);
    };
    Ok(match kind {
        Some("s") => {
            let text = value
                .trim()
                .parse::<usize>()
                .ok()
                .and_then(|index| strings.get(index))
                .ok_or_else(|| {
                    TableError::InvalidXlsx(format!("bad shared string index `{value}`"))
                })?;
            Cell::Text(text.clone())
        }
        None | Some("n") => match Cell::detect(&value) {
            Cell::Number(n) => Cell::Number(n),
            _ => Cell::Text(value),
        },
        // Strings, inline strings, booleans and error values are all kept as text.
        Some(_) => Cell::Text(value),
    })
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Write};

    use rstest::rstest;

    use super::*;

    const CONTENT_TYPES: &str = r#"<?xml version="1.0"?><Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="xml" ContentType="application/xml"/></Types>"#;
    const WORKBOOK_XML: &str = r#"<?xml version="1.0"?><workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets><sheet name="Products" sheetId="1" r:id="rId3"/><sheet name="Other" sheetId="2" r:id="rId4"/></sheets></workbook>"#;
    const RELS_XML: &str = r#"<?xml version="1.0"?><Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId4" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet2.xml"/><Relationship Id="rId3" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/products.xml"/></Relationships>"#;
    const STRINGS_XML: &str = r#"<?xml version="1.0"?><sst xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><si><t>Title</t></si><si><t>Price</t></si><si><r><t>Desk </t></r><r><t>&amp; Chair</t></r></si><si><t>abc</t></si></sst>"#;
    const SHEET_XML: &str = r#"<?xml version="1.0"?><worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>
        <row r="1"><c r="A1" t="s"><v>0</v></c><c r="B1" t="s"><v>1</v></c></row>
        <row r="2"><c r="A2" t="inlineStr"><is><t>Lamp</t></is></c><c r="B2"><v>10</v></c><c r="D2"><v>1.5</v></c></row>
        <row r="3"><c r="A3" t="s"><v>2</v></c><c r="B3" t="s"><v>3</v></c></row>
        <row r="5"><c r="B5"><v>7</v></c></row>
    </sheetData></worksheet>"#;

    fn workbook(parts: &[(&str, &str)]) -> Vec<u8> {
        let mut buf = Vec::new();
        let mut zip = zip::ZipWriter::new(Cursor::new(&mut buf));
        let options = zip::write::SimpleFileOptions::default();
        for (name, content) in parts {
            zip.start_file(*name, options).unwrap();
            zip.write_all(content.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
        buf
    }

    #[test]
    fn it_reads_the_first_sheet() {
        let bytes = workbook(&[
            ("[Content_Types].xml", CONTENT_TYPES),
            (WORKBOOK, WORKBOOK_XML),
            (WORKBOOK_RELS, RELS_XML),
            (SHARED_STRINGS, STRINGS_XML),
            ("xl/worksheets/products.xml", SHEET_XML),
            ("xl/worksheets/sheet2.xml", "<worksheet/>"),
        ]);
        let table = read_xlsx(Cursor::new(bytes)).unwrap();

        assert_eq!(table.columns(), ["Title", "Price", "Unnamed: 2", "Unnamed: 3"]);
        assert_eq!(table.len(), 4);
        assert_eq!(
            table.column("Title").unwrap(),
            vec![
                &Cell::from("Lamp"),
                &Cell::from("Desk & Chair"),
                &Cell::Empty,
                &Cell::Empty
            ]
        );
        assert_eq!(
            table.column("Price").unwrap(),
            vec![
                &Cell::Number(10.0),
                &Cell::from("abc"),
                &Cell::Empty,
                &Cell::Number(7.0)
            ]
        );
        assert_eq!(table.rows().next().unwrap().get("Unnamed: 3"), Some(&Cell::Number(1.5)));
    }

    #[test]
    fn it_falls_back_to_the_default_sheet_path() {
        let sheet = r#"<worksheet><sheetData><row><c t="inlineStr"><is><t>n</t></is></c></row><row><c><v>3</v></c></row></sheetData></worksheet>"#;
        let bytes = workbook(&[(WORKBOOK, WORKBOOK_XML), (FIRST_SHEET, sheet)]);
        let table = read_xlsx(Cursor::new(bytes)).unwrap();
        assert_eq!(table.columns(), ["n"]);
        assert_eq!(table.column("n").unwrap(), vec![&Cell::Number(3.0)]);
    }

    #[test]
    fn it_rejects_broken_workbooks() {
        assert!(matches!(
            read_xlsx(Cursor::new(b"not a zip".to_vec())),
            Err(TableError::Zip(_))
        ));
        let bytes = workbook(&[(FIRST_SHEET, "<worksheet/>")]);
        assert!(matches!(
            read_xlsx(Cursor::new(bytes)),
            Err(TableError::MissingPart(_))
        ));
    }

    #[rstest]
    #[case("A1", Some((0, 0)))]
    #[case("B3", Some((2, 1)))]
    #[case("Z10", Some((9, 25)))]
    #[case("AA1", Some((0, 26)))]
    #[case("1A", None)]
    #[case("A0", None)]
    #[case("a1", None)]
    fn it_parses_cell_references(#[case] reference: &str, #[case] expected: Option<(u32, u32)>) {
        assert_eq!(cell_reference(reference), expected);
    }
}

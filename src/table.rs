//! In-memory tables and their CSV form.

use std::{
    fmt::{self, Display},
    fs::File,
    io::{BufReader, Read, Write},
    path::{Path, PathBuf},
};

use thiserror::Error;

use crate::{headers::HeaderMapping, xlsx};

/// Fields offered for a new blank source table.
pub const SOURCE_FIELDS: &[&str] = &[
    "Model",
    "SKU",
    "Price",
    "Weight (lbs)",
    "Voltage",
    "Power HP",
];

#[derive(Debug, Error)]
pub enum TableError {
    #[error("failed to open `{path}`")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error("not a readable xlsx archive")]
    Zip(#[from] zip::result::ZipError),

    #[error("malformed xlsx content")]
    Xml(#[from] quick_xml::Error),

    #[error("the xlsx archive has no `{0}`")]
    MissingPart(String),

    #[error("invalid xlsx: {0}")]
    InvalidXlsx(String),

    #[error("row {row} has {actual} cells but the table has {expected} columns")]
    RowWidth {
        row: usize,
        expected: usize,
        actual: usize,
    },

    #[error("column `{column}` would get {actual} cells for {expected} rows")]
    ColumnLength {
        column: String,
        expected: usize,
        actual: usize,
    },
}

/// One cell of a table.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Number(f64),
    Text(String),
    Empty,
}

impl Cell {
    /// Reads a raw field: blank is [`Cell::Empty`], a finite number is [`Cell::Number`],
    /// anything else is kept as text.
    pub fn detect(field: &str) -> Self {
        let trimmed = field.trim();
        if trimmed.is_empty() {
            return Cell::Empty;
        }
        match trimmed.parse::<f64>() {
            Ok(n) if n.is_finite() => Cell::Number(n),
            _ => Cell::Text(field.to_string()),
        }
    }

    /// The value a formula may bind for this cell. Only numbers are bindable.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Cell::Number(n) => Some(*n),
            Cell::Text(_) | Cell::Empty => None,
        }
    }

    /// Empty, or text made only of whitespace.
    pub fn is_blank(&self) -> bool {
        match self {
            Cell::Number(_) => false,
            Cell::Text(text) => text.trim().is_empty(),
            Cell::Empty => true,
        }
    }
}

impl Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Number(n) => write!(f, "{n}"),
            Cell::Text(text) => f.write_str(text),
            Cell::Empty => Ok(()),
        }
    }
}

impl From<f64> for Cell {
    fn from(n: f64) -> Self {
        Cell::Number(n)
    }
}

impl From<&str> for Cell {
    fn from(text: &str) -> Self {
        Cell::Text(text.to_string())
    }
}

/// Named columns over ordered rows. Every row has exactly one cell per column.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Cell>>,
}

/// A borrowed view of one row.
#[derive(Debug, Clone, Copy)]
pub struct Row<'a> {
    columns: &'a [String],
    cells: &'a [Cell],
}

impl<'a> Row<'a> {
    pub fn get(&self, column: &str) -> Option<&'a Cell> {
        self.columns
            .iter()
            .position(|name| name == column)
            .map(|index| &self.cells[index])
    }

    pub fn iter(self) -> impl Iterator<Item = (&'a str, &'a Cell)> + 'a {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.cells.iter())
    }
}

impl Table {
    pub fn new<S: Into<String>>(columns: impl IntoIterator<Item = S>) -> Self {
        Table {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    /// A table of `rows` rows with every cell empty, ready to be filled in.
    pub fn blank<S: Into<String>>(columns: impl IntoIterator<Item = S>, rows: usize) -> Self {
        let mut table = Table::new(columns);
        let width = table.columns.len();
        table.rows = vec![vec![Cell::Empty; width]; rows];
        table
    }

    pub fn push_row(&mut self, cells: Vec<Cell>) -> Result<(), TableError> {
        if cells.len() != self.columns.len() {
            return Err(TableError::RowWidth {
                row: self.rows.len() + 1,
                expected: self.columns.len(),
                actual: cells.len(),
            });
        }
        self.rows.push(cells);
        Ok(())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> impl Iterator<Item = Row<'_>> {
        self.rows.iter().map(|cells| Row {
            columns: &self.columns,
            cells,
        })
    }

    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|name| name == column)
    }

    pub fn column(&self, column: &str) -> Option<Vec<&Cell>> {
        let index = self.column_index(column)?;
        Some(self.rows.iter().map(|cells| &cells[index]).collect())
    }

    /// A copy of this table with `column` set to `cells`: replaced in place when it exists,
    /// appended as the last column otherwise.
    pub fn with_column(&self, column: &str, cells: Vec<Cell>) -> Result<Table, TableError> {
        if cells.len() != self.rows.len() {
            return Err(TableError::ColumnLength {
                column: column.to_string(),
                expected: self.rows.len(),
                actual: cells.len(),
            });
        }

        let mut table = self.clone();
        table.set_column(column, cells);
        Ok(table)
    }

    /// Callers guarantee one cell per row.
    pub(crate) fn set_column(&mut self, column: &str, cells: Vec<Cell>) {
        match self.column_index(column) {
            Some(index) => {
                for (row, cell) in self.rows.iter_mut().zip(cells) {
                    row[index] = cell;
                }
            }
            None => {
                self.columns.push(column.to_string());
                for (row, cell) in self.rows.iter_mut().zip(cells) {
                    row.push(cell);
                }
            }
        }
    }

    /// Reads `.xlsx` files as workbooks and anything else as CSV.
    pub fn read_path(path: impl AsRef<Path>) -> Result<Table, TableError> {
        let path = path.as_ref();
        let is_xlsx = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("xlsx"));
        if !is_xlsx {
            return Self::read_csv_path(path);
        }
        let file = File::open(path).map_err(|source| TableError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        xlsx::read_xlsx(BufReader::new(file))
    }

    pub fn read_csv_path(path: impl AsRef<Path>) -> Result<Table, TableError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| TableError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        Self::read_csv(file)
    }

    /// Reads CSV with a header row, detecting each cell's type independently.
    pub fn read_csv<R: Read>(reader: R) -> Result<Table, TableError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(reader);

        let mut table = Table::new(csv_reader.headers()?.iter());
        for record in csv_reader.records() {
            let record = record?;
            table.push_row(record.iter().map(Cell::detect).collect())?;
        }
        Ok(table)
    }

    /// Writes CSV with a header row. Mapped headers are renamed; unmapped ones keep their name.
    pub fn write_csv<W: Write>(
        &self,
        writer: W,
        rename: Option<&HeaderMapping>,
    ) -> Result<(), TableError> {
        let mut csv_writer = csv::Writer::from_writer(writer);

        csv_writer.write_record(self.columns.iter().map(|column| {
            rename
                .and_then(|mapping| mapping.get(column))
                .and_then(Option::as_deref)
                .unwrap_or(column.as_str())
        }))?;
        for row in &self.rows {
            csv_writer.write_record(row.iter().map(Cell::to_string))?;
        }
        csv_writer.flush().map_err(csv::Error::from)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("10", Cell::Number(10.0))]
    #[case(" 2.5 ", Cell::Number(2.5))]
    #[case("", Cell::Empty)]
    #[case("   ", Cell::Empty)]
    #[case("abc", Cell::Text("abc".to_string()))]
    #[case("NaN", Cell::Text("NaN".to_string()))]
    #[case("inf", Cell::Text("inf".to_string()))]
    fn it_detects_cell_types(#[case] field: &str, #[case] expected: Cell) {
        assert_eq!(Cell::detect(field), expected);
    }

    #[test]
    fn it_reads_csv() {
        let input = "Title,Price\nLamp,10\nDesk,abc\nChair,\n";
        let table = Table::read_csv(input.as_bytes()).unwrap();
        assert_eq!(table.columns(), ["Title", "Price"]);
        assert_eq!(table.len(), 3);
        assert_eq!(
            table.column("Price").unwrap(),
            vec![&Cell::Number(10.0), &Cell::from("abc"), &Cell::Empty]
        );
    }

    #[test]
    fn it_rejects_ragged_csv() {
        let input = "a,b\n1,2\n3\n";
        assert!(Table::read_csv(input.as_bytes()).is_err());
    }

    #[test]
    fn it_builds_blank_tables() {
        let table = Table::blank(SOURCE_FIELDS.iter().copied(), 3);
        assert_eq!(table.columns(), SOURCE_FIELDS);
        assert_eq!(table.len(), 3);
        assert!(table.rows().all(|row| row.iter().all(|(_, cell)| *cell == Cell::Empty)));

        let mut out = Vec::new();
        Table::blank(["SKU", "Price"], 2).write_csv(&mut out, None).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "SKU,Price\n,\n,\n");
    }

    #[test]
    fn it_reads_paths_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let csv = dir.path().join("items.csv");
        std::fs::write(&csv, "Price\n4\n").unwrap();
        assert_eq!(
            Table::read_path(&csv).unwrap().column("Price").unwrap(),
            vec![&Cell::Number(4.0)]
        );

        let fake = dir.path().join("items.XLSX");
        std::fs::write(&fake, "Price\n4\n").unwrap();
        assert!(matches!(Table::read_path(&fake), Err(TableError::Zip(_))));
    }

    #[test]
    fn with_column_appends_or_replaces() {
        let mut table = Table::new(["a", "b"]);
        table.push_row(vec![1.0.into(), "x".into()]).unwrap();
        table.push_row(vec![2.0.into(), "y".into()]).unwrap();

        let appended = table
            .with_column("c", vec![Cell::Number(3.0), Cell::Empty])
            .unwrap();
        assert_eq!(appended.columns(), ["a", "b", "c"]);
        assert_eq!(appended.rows().nth(1).unwrap().get("c"), Some(&Cell::Empty));

        let replaced = table
            .with_column("a", vec![Cell::Number(9.0), Cell::Number(8.0)])
            .unwrap();
        assert_eq!(replaced.columns(), ["a", "b"]);
        assert_eq!(
            replaced.column("a").unwrap(),
            vec![&Cell::Number(9.0), &Cell::Number(8.0)]
        );
        assert_eq!(replaced.column("b"), table.column("b"));

        assert!(table.with_column("d", vec![Cell::Empty]).is_err());
    }

    #[test]
    fn it_writes_csv_with_renamed_headers() {
        let mut table = Table::new(["name", "cost", "misc"]);
        table
            .push_row(vec!["Lamp".into(), 12.5.into(), Cell::Empty])
            .unwrap();

        let mapping: HeaderMapping = BTreeMap::from([
            ("name".to_string(), Some("Title".to_string())),
            ("misc".to_string(), None),
        ]);
        let mut out = Vec::new();
        table.write_csv(&mut out, Some(&mapping)).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "Title,cost,misc\nLamp,12.5,\n");
    }
}

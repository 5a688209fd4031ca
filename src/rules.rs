//! Presence checks for fields a Shopify import cannot do without.

use std::fmt::{self, Display};

use crate::{headers::HeaderMapping, table::Table};

pub const REQUIRED_FIELDS: &[&str] = &["Title", "Handle", "Variant Price"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingField {
    /// 1-based data row.
    pub row: usize,
    pub field: String,
    pub column: String,
}

impl Display for MissingField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Row {}: Missing value for required field '{}' (source column: '{}')",
            self.row, self.field, self.column
        )
    }
}

/// Every row/column pair where a column mapped to a required field is blank or absent.
pub fn check_required(table: &Table, mapping: &HeaderMapping) -> Vec<MissingField> {
    let required = mapping
        .iter()
        .filter_map(|(column, field)| {
            let field = field.as_deref()?;
            REQUIRED_FIELDS
                .contains(&field)
                .then_some((column.as_str(), field))
        })
        .collect::<Vec<_>>();

    table
        .rows()
        .enumerate()
        .flat_map(|(index, row)| {
            required.iter().filter_map(move |&(column, field)| {
                let present = row.get(column).is_some_and(|cell| !cell.is_blank());
                (!present).then(|| MissingField {
                    row: index + 1,
                    field: field.to_string(),
                    column: column.to_string(),
                })
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{headers::map_headers, table::Cell};

    #[test]
    fn it_reports_blank_required_cells() {
        let mut table = Table::new(["title", "Variant Price", "notes"]);
        table
            .push_row(vec!["Lamp".into(), Cell::Number(10.0), Cell::Empty])
            .unwrap();
        table
            .push_row(vec!["  ".into(), Cell::Empty, Cell::Empty])
            .unwrap();

        let mapping = map_headers(table.columns());
        let issues = check_required(&table, &mapping);
        assert_eq!(
            issues
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>(),
            vec![
                "Row 2: Missing value for required field 'Variant Price' (source column: 'Variant Price')",
                "Row 2: Missing value for required field 'Title' (source column: 'title')",
            ]
        );
    }

    #[test]
    fn mapped_columns_missing_from_the_table_count_as_blank() {
        let mut table = Table::new(["other"]);
        table.push_row(vec![Cell::Number(1.0)]).unwrap();
        let mapping = HeaderMapping::from([("Handle".to_string(), Some("Handle".to_string()))]);

        let issues = check_required(&table, &mapping);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].column, "Handle");
    }
}

use tracing::{debug, info, warn};

use crate::{
    error::{EvalError, FormulaResult},
    eval::{self, RowContext},
    parse::{Expr, Parser},
    table::{Cell, Table},
    whitelist::{self, Limits},
};

/// Formula text together with its parsed and validated tree.
///
/// Holding a `Formula` means the whitelist check has already passed; it is never repeated per
/// row. Build a new one when the text changes.
#[derive(Debug, Clone, PartialEq)]
pub struct Formula {
    text: String,
    expr: Expr,
}

/// The result of evaluating a formula on one row.
pub type RowOutcome = Result<f64, EvalError>;

/// A table with a formula column written, plus what happened on every row.
#[derive(Debug, Clone, PartialEq)]
pub struct Applied {
    pub table: Table,
    /// One entry per input row, in input order.
    pub outcomes: Vec<RowOutcome>,
}

impl Applied {
    /// `(1-based row, error)` for every row that evaluated to null.
    pub fn failures(&self) -> impl Iterator<Item = (usize, &EvalError)> {
        self.outcomes
            .iter()
            .enumerate()
            .filter_map(|(index, outcome)| outcome.as_ref().err().map(|e| (index + 1, e)))
    }

    pub fn failed(&self) -> usize {
        self.failures().count()
    }
}

impl Formula {
    pub fn new(text: impl Into<String>) -> FormulaResult<Self> {
        Self::with_limits(text, &Limits::default())
    }

    pub fn with_limits(text: impl Into<String>, limits: &Limits) -> FormulaResult<Self> {
        let text = text.into();
        let expr = Parser::new(&text, limits).parse()?;
        whitelist::validate(&expr, &text, limits)?;
        debug!(formula = %text, tree = %expr, "formula accepted");
        Ok(Formula { text, expr })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    pub fn evaluate(&self, context: &RowContext) -> RowOutcome {
        eval::evaluate(&self.expr, context)
    }

    /// Evaluates every row and returns a copy of `table` with `column` holding the results.
    /// Rows that fail get [`Cell::Empty`]; their reasons are kept in [`Applied::outcomes`].
    pub fn apply(&self, table: &Table, column: &str) -> Applied {
        let outcomes = table
            .rows()
            .map(|row| self.evaluate(&RowContext::from_row(row)))
            .collect::<Vec<_>>();

        for (index, outcome) in outcomes.iter().enumerate() {
            if let Err(e) = outcome {
                warn!(row = index + 1, column, formula = %self.text, error = %e, "row evaluated to null");
            }
        }

        let cells = outcomes
            .iter()
            .map(|outcome| match outcome {
                Ok(value) => Cell::Number(*value),
                Err(_) => Cell::Empty,
            })
            .collect::<Vec<_>>();

        let mut table = table.clone();
        table.set_column(column, cells);

        let applied = Applied { table, outcomes };
        info!(
            column,
            rows = applied.outcomes.len(),
            failed = applied.failed(),
            "formula applied"
        );
        applied
    }
}

/// Parses and validates formula text without evaluating it.
pub fn validate(text: &str) -> FormulaResult<Formula> {
    Formula::new(text)
}

/// Like [`validate`], with explicit complexity limits.
pub fn validate_with(text: &str, limits: &Limits) -> FormulaResult<Formula> {
    Formula::with_limits(text, limits)
}

/// Applies `text` to every row of `table`, writing the results to `column`.
///
/// A formula that fails to parse or validate is reported before any row is looked at and
/// `table` is not touched. Failures on individual rows only null out that row.
pub fn apply_to_column(table: &Table, column: &str, text: &str) -> FormulaResult<Applied> {
    let formula = validate(text)?;
    Ok(formula.apply(table, column))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FormulaError;

    fn prices(values: Vec<Cell>) -> Table {
        let mut table = Table::new(["Title", "Price"]);
        for (index, price) in values.into_iter().enumerate() {
            table
                .push_row(vec![Cell::Text(format!("item {index}")), price])
                .unwrap();
        }
        table
    }

    #[test]
    fn it_writes_a_new_column() {
        let table = prices(vec![10.0.into(), 20.0.into()]);
        let applied = apply_to_column(&table, "Price2", "ROUND(Price * 1.2, 2)").unwrap();

        assert_eq!(applied.outcomes, vec![Ok(12.0), Ok(24.0)]);
        assert_eq!(applied.table.columns(), ["Title", "Price", "Price2"]);
        assert_eq!(
            applied.table.column("Price2").unwrap(),
            vec![&Cell::Number(12.0), &Cell::Number(24.0)]
        );
        assert_eq!(applied.table.column("Price"), table.column("Price"));
    }

    #[test]
    fn it_isolates_row_failures() {
        let table = prices(vec![10.0.into(), "abc".into(), Cell::Empty, 4.0.into()]);
        let applied = apply_to_column(&table, "Double", "Price * 2").unwrap();

        assert_eq!(
            applied.outcomes,
            vec![
                Ok(20.0),
                Err(EvalError::UnknownVariable("Price".to_string())),
                Err(EvalError::UnknownVariable("Price".to_string())),
                Ok(8.0),
            ]
        );
        assert_eq!(
            applied.table.column("Double").unwrap(),
            vec![
                &Cell::Number(20.0),
                &Cell::Empty,
                &Cell::Empty,
                &Cell::Number(8.0)
            ]
        );
        assert_eq!(applied.failed(), 2);
        assert_eq!(
            applied.failures().map(|(row, _)| row).collect::<Vec<_>>(),
            vec![2, 3]
        );
    }

    #[test]
    fn it_replaces_an_existing_column_in_place() {
        let table = prices(vec![10.0.into(), 0.0.into()]);
        let applied = apply_to_column(&table, "Price", "100 / Price").unwrap();

        assert_eq!(applied.table.columns(), ["Title", "Price"]);
        assert_eq!(
            applied.outcomes,
            vec![Ok(10.0), Err(EvalError::DivisionByZero)]
        );
        assert_eq!(
            applied.table.column("Price").unwrap(),
            vec![&Cell::Number(10.0), &Cell::Empty]
        );
    }

    #[test]
    fn formula_errors_leave_the_table_alone() {
        let table = prices(vec![10.0.into()]);
        let before = table.clone();

        let err = apply_to_column(&table, "Out", "system(1)").unwrap_err();
        assert!(matches!(err, FormulaError::DisallowedFunction { ref name, .. } if name == "system"));
        let err = apply_to_column(&table, "Out", "Price > 1").unwrap_err();
        assert!(matches!(err, FormulaError::DisallowedConstruct { .. }));
        let err = apply_to_column(&table, "Out", "Price +").unwrap_err();
        assert!(matches!(err, FormulaError::Parse { .. }));

        assert_eq!(table, before);
    }

    #[test]
    fn empty_tables_produce_no_outcomes() {
        let table = prices(vec![]);
        let applied = apply_to_column(&table, "Out", "Price").unwrap();
        assert!(applied.outcomes.is_empty());
        assert_eq!(applied.table.columns(), ["Title", "Price", "Out"]);
    }

    #[test]
    fn formulas_can_be_reused() {
        let formula = validate("MAX(Price, 15)").unwrap();
        assert_eq!(formula.text(), "MAX(Price, 15)");

        let first = formula.apply(&prices(vec![10.0.into()]), "Out");
        let second = formula.apply(&prices(vec![20.0.into()]), "Out");
        assert_eq!(first.outcomes, vec![Ok(15.0)]);
        assert_eq!(second.outcomes, vec![Ok(20.0)]);
    }
}

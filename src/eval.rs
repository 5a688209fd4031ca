use std::collections::{HashMap, HashSet};

use crate::{
    error::EvalError,
    parse::{BinaryOp, Expr, UnaryOp},
    system,
    table::Row,
};

/// The variables visible to a formula while it evaluates one row.
///
/// Only numeric cells are bound. Text and empty cells are left out rather than coerced, so a
/// formula that reads them fails for that row with [`EvalError::UnknownVariable`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowContext {
    values: HashMap<String, f64>,
}

impl RowContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// When several columns share a name, the first one decides, as it does for [`Row::get`].
    pub fn from_row(row: Row<'_>) -> Self {
        let mut seen = HashSet::new();
        row.iter()
            .filter(|(name, _)| seen.insert(*name))
            .filter_map(|(name, cell)| cell.as_number().map(|n| (name, n)))
            .collect()
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }

    pub fn define(&mut self, name: impl Into<String>, value: f64) {
        self.values.insert(name.into(), value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, f64)> for RowContext {
    fn from_iter<I: IntoIterator<Item = (K, f64)>>(iter: I) -> Self {
        RowContext {
            values: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

/// Evaluates `expr` against one row, operands left to right, depth first.
///
/// Calls are resolved through the whitelist at dispatch time as well, so an unvalidated tree
/// still cannot reach anything outside it.
pub fn evaluate(expr: &Expr, context: &RowContext) -> Result<f64, EvalError> {
    match expr {
        Expr::Literal(value) => Ok(*value),
        Expr::Ident { name, .. } => context
            .get(name)
            .ok_or_else(|| EvalError::UnknownVariable(name.clone())),
        Expr::Unary { op, operand } => {
            let value = evaluate(operand, context)?;
            Ok(match op {
                UnaryOp::Neg => -value,
                UnaryOp::Plus => value,
            })
        }
        Expr::Binary { op, lhs, rhs } => {
            let lhs = evaluate(lhs, context)?;
            let rhs = evaluate(rhs, context)?;
            binary(*op, lhs, rhs)
        }
        Expr::Call { name, args, .. } => {
            let values = args
                .iter()
                .map(|arg| evaluate(arg, context))
                .collect::<Result<Vec<_>, _>>()?;
            let builtin = system::lookup(name)
                .ok_or_else(|| EvalError::arguments(name, "not a permitted function"))?;
            builtin(&values)
        }
    }
}

fn binary(op: BinaryOp, lhs: f64, rhs: f64) -> Result<f64, EvalError> {
    let value = match op {
        BinaryOp::Add => lhs + rhs,
        BinaryOp::Sub => lhs - rhs,
        BinaryOp::Mul => lhs * rhs,
        BinaryOp::Div => {
            if rhs == 0.0 {
                return Err(EvalError::DivisionByZero);
            }
            lhs / rhs
        }
        BinaryOp::Pow => {
            if lhs == 0.0 && rhs < 0.0 {
                return Err(EvalError::DivisionByZero);
            }
            lhs.powf(rhs)
        }
    };
    if value.is_finite() {
        Ok(value)
    } else {
        Err(EvalError::Overflow(op))
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::{
        parse::parse,
        table::{Cell, Table},
    };

    fn context() -> RowContext {
        [("Price", 10.0), ("Qty", 3.0), ("Zero", 0.0)]
            .into_iter()
            .collect()
    }

    fn eval(input: &str) -> Result<f64, EvalError> {
        evaluate(&parse(input).unwrap(), &context())
    }

    #[rstest]
    #[case("1 + 2 * 3", 7.0)]
    #[case("Price * Qty", 30.0)]
    #[case("(Price - 4) / Qty", 2.0)]
    #[case("2 ** 3 ** 2", 512.0)]
    #[case("-2 ** 2", -4.0)]
    #[case("2 ** -1", 0.5)]
    #[case("+Price", 10.0)]
    #[case("ROUND(Price * 1.2, 2)", 12.0)]
    #[case("ROUND(Price / Qty, 1)", 3.3)]
    #[case("MAX(Price, Qty, 12) - MIN(Qty, 1)", 11.0)]
    #[case("Zero * -1", 0.0)]
    fn it_evaluates(#[case] input: &str, #[case] expected: f64) {
        assert_eq!(eval(input).unwrap(), expected);
    }

    #[rstest]
    #[case("Missing + 1", EvalError::UnknownVariable("Missing".to_string()))]
    #[case("Price / 0", EvalError::DivisionByZero)]
    #[case("Price / Zero", EvalError::DivisionByZero)]
    #[case("Price / -0.0", EvalError::DivisionByZero)]
    #[case("Zero ** -1", EvalError::DivisionByZero)]
    #[case("10 ** 400", EvalError::Overflow(BinaryOp::Pow))]
    #[case("(-8) ** 0.5", EvalError::Overflow(BinaryOp::Pow))]
    #[case("1e308 * 10", EvalError::Overflow(BinaryOp::Mul))]
    #[case("ROUND()", EvalError::arguments("ROUND", "expected 1 or 2 arguments, got 0"))]
    #[case("MAX()", EvalError::arguments("MAX", "requires at least one argument"))]
    fn it_reports_row_errors(#[case] input: &str, #[case] expected: EvalError) {
        assert_eq!(eval(input).unwrap_err(), expected);
    }

    #[test]
    fn it_evaluates_left_operand_first() {
        // Both sides fail; the left failure is the one reported.
        assert_eq!(
            eval("A + B").unwrap_err(),
            EvalError::UnknownVariable("A".to_string())
        );
        assert_eq!(
            eval("MAX(1 / 0, Missing)").unwrap_err(),
            EvalError::DivisionByZero
        );
    }

    #[test]
    fn unvalidated_calls_cannot_escape_the_whitelist() {
        let err = eval("system(1)").unwrap_err();
        assert!(matches!(err, EvalError::InvalidArguments { function, .. } if function == "system"));
    }

    #[test]
    fn non_numeric_cells_are_not_bound() {
        let mut table = Table::new(["Price", "Title", "Notes"]);
        table
            .push_row(vec![Cell::Number(5.0), "Lamp".into(), Cell::Empty])
            .unwrap();
        let row = table.rows().next().unwrap();

        let context = RowContext::from_row(row);
        assert_eq!(context.len(), 1);
        assert_eq!(context.get("Price"), Some(5.0));
        assert_eq!(context.get("Title"), None);
        assert_eq!(context.get("Notes"), None);
    }

    #[test]
    fn the_first_of_duplicate_columns_is_bound() {
        let mut table = Table::new(["Price", "Price", "Cost", "Cost"]);
        table
            .push_row(vec![1.0.into(), 2.0.into(), "n/a".into(), 4.0.into()])
            .unwrap();
        let row = table.rows().next().unwrap();

        let context = RowContext::from_row(row);
        assert_eq!(context.get("Price"), Some(1.0));
        assert_eq!(context.get("Price"), row.get("Price").and_then(Cell::as_number));
        assert_eq!(context.get("Cost"), None);
    }
}

//! A sandboxed formula engine for table columns.
//!
//! Formulas are plain arithmetic over column names (`ROUND(Price * 1.2, 2)`). Text is parsed
//! into a closed expression tree, checked against a fixed function whitelist once, and then
//! evaluated row by row. A rejected formula never touches the table; a row that cannot be
//! evaluated gets a null cell and a recorded reason while the other rows carry on.

pub mod apply;
pub mod error;
pub mod eval;
pub mod headers;
pub mod lex;
pub mod parse;
pub mod rules;
pub mod system;
pub mod table;
pub mod template;
pub mod whitelist;
pub mod xlsx;

pub use apply::{Applied, Formula, RowOutcome, apply_to_column, validate, validate_with};
pub use error::{EvalError, FormulaError, FormulaResult};
pub use eval::RowContext;
pub use lex::Lexer;
pub use parse::{Expr, Parser};
pub use table::{Cell, Table};
pub use whitelist::Limits;

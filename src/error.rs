use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;

use crate::parse::BinaryOp;

pub type FormulaResult<T> = Result<T, FormulaError>;

/// Errors that reject a whole formula before any row is evaluated.
#[derive(Error, Debug, Diagnostic)]
pub enum FormulaError {
    #[error("{message}")]
    #[diagnostic(
        code(formula::parse),
        help("formulas use numbers, column names, `+ - * / **`, parentheses and ROUND/MAX/MIN")
    )]
    Parse {
        message: String,
        #[source_code]
        src: NamedSource<String>,
        #[label("here")]
        span: SourceSpan,
    },

    #[error("{construct} is not allowed in formulas")]
    #[diagnostic(
        code(formula::disallowed_construct),
        help("only numeric arithmetic over column names is supported")
    )]
    DisallowedConstruct {
        construct: &'static str,
        #[source_code]
        src: NamedSource<String>,
        #[label("not allowed")]
        span: SourceSpan,
    },

    #[error("function `{name}` is not allowed in formulas")]
    #[diagnostic(
        code(formula::disallowed_function),
        help("the only callable functions are ROUND, MAX and MIN")
    )]
    DisallowedFunction {
        name: String,
        #[source_code]
        src: NamedSource<String>,
        #[label("not a permitted function")]
        span: SourceSpan,
    },

    #[error("formula is too complex: {reason}")]
    #[diagnostic(code(formula::too_complex))]
    TooComplex { reason: String },
}

impl FormulaError {
    pub(crate) fn parse(whole: &str, span: impl Into<SourceSpan>, message: impl Into<String>) -> Self {
        FormulaError::Parse {
            message: message.into(),
            src: source(whole),
            span: span.into(),
        }
    }

    pub(crate) fn construct(
        whole: &str,
        span: impl Into<SourceSpan>,
        construct: &'static str,
    ) -> Self {
        FormulaError::DisallowedConstruct {
            construct,
            src: source(whole),
            span: span.into(),
        }
    }

    pub(crate) fn function(whole: &str, span: SourceSpan, name: &str) -> Self {
        FormulaError::DisallowedFunction {
            name: name.to_string(),
            src: source(whole),
            span,
        }
    }

    /// The byte span of the offending input, when there is one.
    pub fn span(&self) -> Option<SourceSpan> {
        match self {
            FormulaError::Parse { span, .. }
            | FormulaError::DisallowedConstruct { span, .. }
            | FormulaError::DisallowedFunction { span, .. } => Some(*span),
            FormulaError::TooComplex { .. } => None,
        }
    }
}

fn source(whole: &str) -> NamedSource<String> {
    NamedSource::new("formula", whole.to_string())
}

/// Errors confined to a single row; the row gets a null cell and processing continues.
#[derive(Error, Debug, Clone, PartialEq, Diagnostic)]
pub enum EvalError {
    #[error("unknown variable `{0}`")]
    #[diagnostic(
        code(formula::unknown_variable),
        help("only columns holding a number in this row can be referenced")
    )]
    UnknownVariable(String),

    #[error("division by zero")]
    #[diagnostic(code(formula::division_by_zero))]
    DivisionByZero,

    #[error("invalid arguments to {function}: {reason}")]
    #[diagnostic(code(formula::invalid_arguments))]
    InvalidArguments { function: String, reason: String },

    #[error("result of `{0}` is not a finite number")]
    #[diagnostic(code(formula::overflow))]
    Overflow(BinaryOp),
}

impl EvalError {
    pub(crate) fn arguments(function: &str, reason: impl Into<String>) -> Self {
        EvalError::InvalidArguments {
            function: function.to_string(),
            reason: reason.into(),
        }
    }
}

use tracing::debug;

use crate::{
    error::{FormulaError, FormulaResult},
    parse::Expr,
    system,
};

/// Bounds on how much work a single formula may describe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Maximum number of AST nodes.
    pub max_nodes: usize,
    /// Maximum nesting of sub-expressions, enforced while parsing.
    pub max_depth: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            max_nodes: 256,
            max_depth: 64,
        }
    }
}

/// Walks the whole tree and fails on the first call to a function outside the whitelist.
///
/// `whole` is the formula text the tree was parsed from; it is only used for diagnostics.
pub fn validate(expr: &Expr, whole: &str, limits: &Limits) -> FormulaResult<()> {
    let nodes = expr.node_count();
    if nodes > limits.max_nodes {
        return Err(FormulaError::TooComplex {
            reason: format!("{nodes} nodes, at most {} allowed", limits.max_nodes),
        });
    }
    check_calls(expr, whole)?;
    debug!(nodes, "formula passed validation");
    Ok(())
}

fn check_calls(expr: &Expr, whole: &str) -> FormulaResult<()> {
    match expr {
        Expr::Literal(_) | Expr::Ident { .. } => Ok(()),
        Expr::Binary { lhs, rhs, .. } => {
            check_calls(lhs, whole)?;
            check_calls(rhs, whole)
        }
        Expr::Unary { operand, .. } => check_calls(operand, whole),
        Expr::Call { name, span, args } => {
            if system::lookup(name).is_none() {
                return Err(FormulaError::function(whole, *span, name));
            }
            args.iter().try_for_each(|arg| check_calls(arg, whole))
        }
    }
}

use std::fmt::{self, Display};

use miette::SourceSpan;

use crate::{
    Lexer,
    error::{FormulaError, FormulaResult},
    lex::{Token, TokenKind},
    whitelist::Limits,
};

/// A parsed formula. The set of node kinds is closed: nothing outside numeric arithmetic and
/// named function calls can be represented.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(f64),
    Ident {
        name: String,
        span: SourceSpan,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Call {
        name: String,
        span: SourceSpan,
        args: Vec<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Plus,
}

impl Expr {
    /// Total number of nodes in the tree, this one included.
    pub fn node_count(&self) -> usize {
        1 + match self {
            Expr::Literal(_) | Expr::Ident { .. } => 0,
            Expr::Binary { lhs, rhs, .. } => lhs.node_count() + rhs.node_count(),
            Expr::Unary { operand, .. } => operand.node_count(),
            Expr::Call { args, .. } => args.iter().map(Expr::node_count).sum(),
        }
    }

    /// Names of every variable the formula reads, in first-use order.
    pub fn variables(&self) -> Vec<&str> {
        fn walk<'a>(expr: &'a Expr, out: &mut Vec<&'a str>) {
            match expr {
                Expr::Literal(_) => {}
                Expr::Ident { name, .. } => {
                    if !out.contains(&name.as_str()) {
                        out.push(name);
                    }
                }
                Expr::Binary { lhs, rhs, .. } => {
                    walk(lhs, out);
                    walk(rhs, out);
                }
                Expr::Unary { operand, .. } => walk(operand, out),
                Expr::Call { args, .. } => args.iter().for_each(|arg| walk(arg, out)),
            }
        }
        let mut out = Vec::new();
        walk(self, &mut out);
        out
    }
}

impl Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Pow => "**",
        })
    }
}

impl Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UnaryOp::Neg => "-",
            UnaryOp::Plus => "+",
        })
    }
}

/// Prefix form: `(* (+ a 1) 2)`, `(ROUND x 2)`.
impl Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(n) => write!(f, "{n}"),
            Expr::Ident { name, .. } => write!(f, "{name}"),
            Expr::Binary { op, lhs, rhs } => write!(f, "({op} {lhs} {rhs})"),
            Expr::Unary { op, operand } => write!(f, "({op} {operand})"),
            Expr::Call { name, args, .. } => {
                write!(f, "({name}")?;
                for arg in args {
                    write!(f, " {arg}")?;
                }
                write!(f, ")")
            }
        }
    }
}

pub struct Parser<'de> {
    whole: &'de str,
    lexer: Lexer<'de>,
    limits: Limits,
    depth: usize,
    nodes: usize,
}

impl<'de> Parser<'de> {
    pub fn new(whole: &'de str, limits: &Limits) -> Self {
        Parser {
            whole,
            lexer: Lexer::new(whole),
            limits: *limits,
            depth: 0,
            nodes: 0,
        }
    }

    /// Parses the whole input as one expression; anything left over is an error.
    pub fn parse(mut self) -> FormulaResult<Expr> {
        let expr = self.parse_within(0)?;
        match self.lexer.next() {
            None => Ok(expr),
            Some(Err(e)) => Err(e),
            Some(Ok(token)) => Err(self.unexpected(token, "expected an operator or end of formula")),
        }
    }

    fn parse_within(&mut self, min_bp: u8) -> FormulaResult<Expr> {
        self.depth += 1;
        if self.depth > self.limits.max_depth {
            return Err(FormulaError::TooComplex {
                reason: format!("nesting deeper than {} levels", self.limits.max_depth),
            });
        }
        let result = self.parse_nested(min_bp);
        self.depth -= 1;
        result
    }

    /// Counts one more node against the budget. Operator chains grow the tree without nesting
    /// the parser, so the budget is checked here rather than on the finished tree.
    fn node(&mut self) -> FormulaResult<()> {
        self.nodes += 1;
        if self.nodes > self.limits.max_nodes {
            return Err(FormulaError::TooComplex {
                reason: format!("more than {} nodes", self.limits.max_nodes),
            });
        }
        Ok(())
    }

    fn parse_nested(&mut self, min_bp: u8) -> FormulaResult<Expr> {
        let lhs = match self.lexer.next() {
            Some(Ok(token)) => token,
            None => return Err(self.lexer.eof("expected an expression")),
            Some(Err(e)) => return Err(e),
        };
        if matches!(
            lhs.kind,
            TokenKind::Number(_) | TokenKind::Ident | TokenKind::Minus | TokenKind::Plus
        ) {
            self.node()?;
        }

        let mut lhs = match lhs {
            Token {
                kind: TokenKind::Number(n),
                ..
            } => Expr::Literal(n),

            Token {
                kind: TokenKind::Ident,
                literal,
                ..
            } => {
                let span = SourceSpan::from(lhs.span());
                if matches!(
                    self.lexer.peek(),
                    Some(Ok(Token {
                        kind: TokenKind::LeftParen,
                        ..
                    }))
                ) {
                    self.lexer.next();
                    let args = self.parse_arguments()?;
                    Expr::Call {
                        name: literal.to_string(),
                        span,
                        args,
                    }
                } else {
                    Expr::Ident {
                        name: literal.to_string(),
                        span,
                    }
                }
            }

            Token {
                kind: TokenKind::LeftParen,
                ..
            } => {
                let inner = self.parse_within(0)?;
                self.lexer
                    .expect(TokenKind::RightParen, "expected `)` to close `(`")?;
                inner
            }

            Token {
                kind: TokenKind::Minus | TokenKind::Plus,
                ..
            } => {
                let op = match lhs.kind {
                    TokenKind::Minus => UnaryOp::Neg,
                    _ => UnaryOp::Plus,
                };
                let operand = self.parse_within(PREFIX_BP)?;
                Expr::Unary {
                    op,
                    operand: Box::new(operand),
                }
            }

            token => return Err(self.unexpected(token, "expected an expression")),
        };

        loop {
            let token = match self.lexer.peek() {
                None => break,
                Some(Ok(token)) => *token,
                Some(Err(_)) => {
                    return Err(self
                        .lexer
                        .next()
                        .and_then(Result::err)
                        .unwrap_or_else(|| self.lexer.eof("expected an operator")));
                }
            };

            if let Some(construct) = token.kind.disallowed() {
                return Err(FormulaError::construct(self.whole, token.span(), construct));
            }
            if token.kind == TokenKind::LeftParen {
                return Err(FormulaError::construct(
                    self.whole,
                    token.span(),
                    "calling something other than a function name",
                ));
            }

            let Some((op, l_bp, r_bp)) = infix_binding_power(token.kind) else {
                break;
            };
            if l_bp < min_bp {
                break;
            }
            self.lexer.next();
            self.node()?;

            let rhs = self.parse_within(r_bp)?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }

        Ok(lhs)
    }

    /// Arguments after the opening `(` of a call, up to and including the closing `)`.
    fn parse_arguments(&mut self) -> FormulaResult<Vec<Expr>> {
        let mut args = Vec::new();
        if matches!(
            self.lexer.peek(),
            Some(Ok(Token {
                kind: TokenKind::RightParen,
                ..
            }))
        ) {
            self.lexer.next();
            return Ok(args);
        }

        loop {
            args.push(self.parse_within(0)?);
            match self.lexer.next() {
                Some(Ok(Token {
                    kind: TokenKind::Comma,
                    ..
                })) => continue,
                Some(Ok(Token {
                    kind: TokenKind::RightParen,
                    ..
                })) => return Ok(args),
                Some(Ok(token)) => {
                    return Err(self.unexpected(token, "expected `,` or `)` in argument list"));
                }
                Some(Err(e)) => return Err(e),
                None => return Err(self.lexer.eof("expected `)` to close the argument list")),
            }
        }
    }

    fn unexpected(&self, token: Token<'_>, message: &str) -> FormulaError {
        match token.kind.disallowed() {
            Some(construct) => FormulaError::construct(self.whole, token.span(), construct),
            None => FormulaError::parse(
                self.whole,
                token.span(),
                format!("unexpected `{}`: {message}", token.literal),
            ),
        }
    }
}

const PREFIX_BP: u8 = 5;

/// `+ -` bind loosest, then `* /`, then prefix signs, then `**`, which is right-associative and
/// whose right operand may carry its own sign.
fn infix_binding_power(kind: TokenKind) -> Option<(BinaryOp, u8, u8)> {
    Some(match kind {
        TokenKind::Plus => (BinaryOp::Add, 1, 2),
        TokenKind::Minus => (BinaryOp::Sub, 1, 2),
        TokenKind::Star => (BinaryOp::Mul, 3, 4),
        TokenKind::Slash => (BinaryOp::Div, 3, 4),
        TokenKind::StarStar => (BinaryOp::Pow, 8, 7),
        _ => return None,
    })
}

/// Parses formula text with the default [`Limits`].
pub fn parse(text: &str) -> FormulaResult<Expr> {
    Parser::new(text, &Limits::default()).parse()
}

use std::fmt::Display;

use crate::error::{FormulaError, FormulaResult};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Token<'de> {
    pub kind: TokenKind,
    pub literal: &'de str,
    pub offset: usize,
}

impl Token<'_> {
    pub fn span(&self) -> std::ops::Range<usize> {
        self.offset..self.offset + self.literal.len()
    }
}

/// Every token the lexer can produce. Only a subset is valid formula syntax; the rest exist so
/// the parser can name what was attempted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TokenKind {
    LeftParen,
    RightParen,
    Comma,
    Minus,
    Plus,
    Star,
    StarStar,
    Slash,
    Ident,
    Number(f64),

    String,
    Dot,
    LeftBracket,
    RightBracket,
    LeftBrace,
    RightBrace,
    Semicolon,
    Colon,
    Percent,
    SlashSlash,
    Equal,
    EqualEqual,
    BangEqual,
    Bang,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,
    Ampersand,
    Pipe,
    Caret,
    Tilde,
    And,
    Or,
    Not,
    If,
    Else,
    Lambda,
}

impl TokenKind {
    /// The construct a token introduces when that construct is outside the formula language.
    pub fn disallowed(&self) -> Option<&'static str> {
        Some(match self {
            TokenKind::String => "a string literal",
            TokenKind::Dot => "attribute access",
            TokenKind::LeftBracket | TokenKind::RightBracket => "subscript access",
            TokenKind::LeftBrace | TokenKind::RightBrace => "a set or dict literal",
            TokenKind::Semicolon => "a statement separator",
            TokenKind::Colon => "a slice or annotation",
            TokenKind::Percent => "the modulo operator",
            TokenKind::SlashSlash => "floor division",
            TokenKind::Equal => "assignment",
            TokenKind::EqualEqual
            | TokenKind::BangEqual
            | TokenKind::Greater
            | TokenKind::GreaterEqual
            | TokenKind::Less
            | TokenKind::LessEqual => "a comparison operator",
            TokenKind::Bang | TokenKind::And | TokenKind::Or | TokenKind::Not => {
                "a boolean operator"
            }
            TokenKind::Ampersand | TokenKind::Pipe | TokenKind::Caret | TokenKind::Tilde => {
                "a bitwise operator"
            }
            TokenKind::If | TokenKind::Else => "a conditional expression",
            TokenKind::Lambda => "a lambda expression",
            _ => return None,
        })
    }
}

impl Display for Token<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let lit = self.literal;
        match self.kind {
            TokenKind::LeftParen => write!(f, "LEFT_PAREN {lit}"),
            TokenKind::RightParen => write!(f, "RIGHT_PAREN {lit}"),
            TokenKind::Comma => write!(f, "COMMA {lit}"),
            TokenKind::Minus => write!(f, "MINUS {lit}"),
            TokenKind::Plus => write!(f, "PLUS {lit}"),
            TokenKind::Star => write!(f, "STAR {lit}"),
            TokenKind::StarStar => write!(f, "STAR_STAR {lit}"),
            TokenKind::Slash => write!(f, "SLASH {lit}"),
            TokenKind::Ident => write!(f, "IDENTIFIER {lit}"),
            TokenKind::Number(n) => write!(f, "NUMBER {lit} {n}"),
            kind => match kind.disallowed() {
                Some(construct) => write!(f, "DISALLOWED {lit} ({construct})"),
                None => write!(f, "{kind:?} {lit}"),
            },
        }
    }
}

pub struct Lexer<'de> {
    whole: &'de str,
    rest: &'de str,
    pub byte: usize,
    peeked: Option<FormulaResult<Token<'de>>>,
}

impl<'de> Lexer<'de> {
    pub fn new(input: &'de str) -> Self {
        Lexer {
            whole: input,
            rest: input,
            byte: 0,
            peeked: None,
        }
    }

    pub fn expect(&mut self, expected: TokenKind, error: &str) -> FormulaResult<Token<'de>> {
        match self.next() {
            Some(Ok(token)) if token.kind == expected => Ok(token),
            Some(Ok(token)) => Err(match token.kind.disallowed() {
                Some(construct) => FormulaError::construct(self.whole, token.span(), construct),
                None => FormulaError::parse(self.whole, token.span(), error),
            }),
            Some(Err(e)) => Err(e),
            None => Err(self.eof(error)),
        }
    }

    pub fn eof(&self, message: &str) -> FormulaError {
        let end = self.whole.len();
        FormulaError::parse(
            self.whole,
            end.saturating_sub(1)..end,
            format!("unexpected end of formula: {message}"),
        )
    }

    pub fn peek(&mut self) -> Option<&FormulaResult<Token<'de>>> {
        if self.peeked.is_some() {
            return self.peeked.as_ref();
        }
        self.peeked = self.next();
        self.peeked.as_ref()
    }

    fn advance(&mut self, bytes: usize) {
        self.byte += bytes;
        self.rest = &self.rest[bytes..];
    }
}

impl<'de> Iterator for Lexer<'de> {
    type Item = FormulaResult<Token<'de>>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(peeked) = self.peeked.take() {
            return Some(peeked);
        }
        loop {
            let mut chars = self.rest.chars();
            let c = chars.next()?;
            let cur = self.rest;
            let offset = self.byte;
            let literal = &cur[..c.len_utf8()];
            self.advance(c.len_utf8());

            enum Start {
                String(char),
                Ident,
                Number,
                Doubled(char, TokenKind, TokenKind),
            }

            let process = |kind: TokenKind| {
                Some(Ok(Token {
                    kind,
                    literal,
                    offset,
                }))
            };

            let started = match c {
                '(' => return process(TokenKind::LeftParen),
                ')' => return process(TokenKind::RightParen),
                '[' => return process(TokenKind::LeftBracket),
                ']' => return process(TokenKind::RightBracket),
                '{' => return process(TokenKind::LeftBrace),
                '}' => return process(TokenKind::RightBrace),
                ',' => return process(TokenKind::Comma),
                '-' => return process(TokenKind::Minus),
                '+' => return process(TokenKind::Plus),
                ';' => return process(TokenKind::Semicolon),
                ':' => return process(TokenKind::Colon),
                '%' => return process(TokenKind::Percent),
                '&' => return process(TokenKind::Ampersand),
                '|' => return process(TokenKind::Pipe),
                '^' => return process(TokenKind::Caret),
                '~' => return process(TokenKind::Tilde),
                '.' if !self.rest.starts_with(|c: char| c.is_ascii_digit()) => {
                    return process(TokenKind::Dot);
                }
                '*' => Start::Doubled('*', TokenKind::StarStar, TokenKind::Star),
                '/' => Start::Doubled('/', TokenKind::SlashSlash, TokenKind::Slash),
                '!' => Start::Doubled('=', TokenKind::BangEqual, TokenKind::Bang),
                '=' => Start::Doubled('=', TokenKind::EqualEqual, TokenKind::Equal),
                '>' => Start::Doubled('=', TokenKind::GreaterEqual, TokenKind::Greater),
                '<' => Start::Doubled('=', TokenKind::LessEqual, TokenKind::Less),
                '"' | '\'' => Start::String(c),
                '0'..='9' | '.' => Start::Number,
                c if c == '_' || c.is_alphabetic() => Start::Ident,
                c if c.is_whitespace() => continue,
                c => {
                    return Some(Err(FormulaError::parse(
                        self.whole,
                        offset..self.byte,
                        format!("unexpected character '{c}'"),
                    )));
                }
            };

            match started {
                Start::String(quote) => {
                    let Some(end) = self.rest.find(quote) else {
                        return Some(Err(FormulaError::parse(
                            self.whole,
                            offset..self.whole.len(),
                            "unterminated string literal",
                        )));
                    };
                    self.advance(end + quote.len_utf8());
                    return Some(Ok(Token {
                        kind: TokenKind::String,
                        literal: &cur[..end + 2 * quote.len_utf8()],
                        offset,
                    }));
                }
                Start::Ident => {
                    let first_non_ident = cur
                        .find(|c: char| !(c == '_' || c.is_alphanumeric()))
                        .unwrap_or(cur.len());

                    let literal = &cur[..first_non_ident];
                    self.advance(literal.len() - c.len_utf8());

                    let kind = match literal {
                        "and" => TokenKind::And,
                        "or" => TokenKind::Or,
                        "not" => TokenKind::Not,
                        "if" => TokenKind::If,
                        "else" => TokenKind::Else,
                        "lambda" => TokenKind::Lambda,
                        _ => TokenKind::Ident,
                    };

                    return Some(Ok(Token {
                        kind,
                        literal,
                        offset,
                    }));
                }
                Start::Number => {
                    let len = number_len(cur);
                    let literal = &cur[..len];
                    self.advance(len - c.len_utf8());

                    // `12abc`, `1.2.3` and `1j` are one malformed literal, not two tokens.
                    if self
                        .rest
                        .starts_with(|c: char| c == '.' || c == '_' || c.is_alphanumeric())
                    {
                        let bad = cur
                            .find(|c: char| !(c == '.' || c == '_' || c.is_alphanumeric()))
                            .unwrap_or(cur.len());
                        return Some(Err(FormulaError::parse(
                            self.whole,
                            offset..offset + bad,
                            format!("malformed number `{}`", &cur[..bad]),
                        )));
                    }

                    let n: f64 = match literal.parse() {
                        Ok(n) => n,
                        Err(e) => {
                            return Some(Err(FormulaError::parse(
                                self.whole,
                                offset..self.byte,
                                format!("malformed number `{literal}`: {e}"),
                            )));
                        }
                    };
                    if !n.is_finite() {
                        return Some(Err(FormulaError::parse(
                            self.whole,
                            offset..self.byte,
                            format!("number `{literal}` is out of range"),
                        )));
                    }

                    return Some(Ok(Token {
                        kind: TokenKind::Number(n),
                        literal,
                        offset,
                    }));
                }
                Start::Doubled(second, yes, no) => {
                    if self.rest.starts_with(second) {
                        self.advance(second.len_utf8());
                        return Some(Ok(Token {
                            kind: yes,
                            literal: &cur[..c.len_utf8() + second.len_utf8()],
                            offset,
                        }));
                    }
                    return process(no);
                }
            }
        }
    }
}

/// Length of the numeric literal at the start of `s`: digits, an optional fraction and an
/// optional exponent. An `e` not followed by digits is left for the caller to reject.
fn number_len(s: &str) -> usize {
    let bytes = s.as_bytes();
    let digits = |from: usize| {
        bytes[from..]
            .iter()
            .take_while(|b| b.is_ascii_digit())
            .count()
    };

    let mut len = digits(0);
    if bytes.get(len) == Some(&b'.') {
        len += 1 + digits(len + 1);
    }
    if matches!(bytes.get(len), Some(b'e' | b'E')) {
        let mut exp = len + 1;
        if matches!(bytes.get(exp), Some(b'+' | b'-')) {
            exp += 1;
        }
        let exp_digits = digits(exp);
        if exp_digits > 0 {
            len = exp + exp_digits;
        }
    }
    len
}

//! Arithmetic expressions for parallelism bounds.
//!
//! A `max_parallel` setting may be a plain number or a small expression such
//! as `cpuCount / 2` or `(cpuCount - 1) * 2`. The grammar, lowest precedence
//! first:
//!
//! ```text
//! expression := term (('+' | '-') term)*
//! term       := factor (('*' | '/') factor)*
//! factor     := number | identifier | '(' expression ')'
//! ```
//!
//! Identifiers are looked up in a constant table when the expression is
//! evaluated, so `cpuCount` always reflects the machine the run executes on.
//! Every failure reports the 0-based character offset where parsing stopped
//! and renders the input with a `[HERE -->]` marker at that offset.

use crate::error::{Error, Result};

const MARKER: &str = "[HERE -->]";

/// Evaluate an expression to a number.
///
/// Purely numeric input (digits and at most one `.`) is returned unchanged
/// without going through the parser. There is no unary minus.
pub fn evaluate(input: &str) -> Result<f64> {
    if let Some(value) = plain_number(input) {
        return Ok(value);
    }

    let tokens = tokenize(input)?;
    let mut parser = Parser {
        input,
        tokens,
        pos: 0,
    };
    let value = parser.expression()?;
    if let Some(token) = parser.peek() {
        return Err(parser.error_at(token.offset, "Unexpected trailing input"));
    }
    Ok(value)
}

/// Resolve a named constant. Looked up on every evaluation.
pub fn constant(name: &str) -> Option<f64> {
    match name {
        "cpuCount" => Some(num_cpus::get() as f64),
        _ => None,
    }
}

/// Render `input` with the error marker inserted at a character offset.
pub fn render_at(input: &str, offset: usize) -> String {
    let head: String = input.chars().take(offset).collect();
    let tail: String = input.chars().skip(offset).collect();
    format!("{head}{MARKER}{tail}")
}

fn plain_number(input: &str) -> Option<f64> {
    let trimmed = input.trim();
    let mut seen_digit = false;
    let mut seen_dot = false;
    for c in trimmed.chars() {
        match c {
            '0'..='9' => seen_digit = true,
            '.' if !seen_dot => seen_dot = true,
            _ => return None,
        }
    }
    if !seen_digit {
        return None;
    }
    trimmed.parse().ok()
}

fn expression_error(input: &str, offset: usize, message: impl Into<String>) -> Error {
    Error::Expression {
        message: message.into(),
        offset,
        rendered: render_at(input, offset),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
}

#[derive(Debug, Clone, PartialEq)]
struct Spanned {
    token: Token,
    offset: usize,
}

fn tokenize(input: &str) -> Result<Vec<Spanned>> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let offset = i;
        let token = match c {
            c if c.is_whitespace() => {
                i += 1;
                continue;
            }
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' => Token::Star,
            '/' => Token::Slash,
            '(' => Token::LParen,
            ')' => Token::RParen,
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let value = text.parse::<f64>().map_err(|_| {
                    expression_error(input, start, format!("Invalid number '{text}'"))
                })?;
                tokens.push(Spanned {
                    token: Token::Number(value),
                    offset: start,
                });
                continue;
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Spanned {
                    token: Token::Ident(chars[start..i].iter().collect()),
                    offset: start,
                });
                continue;
            }
            other => {
                return Err(expression_error(
                    input,
                    offset,
                    format!("Unexpected character '{other}'"),
                ))
            }
        };
        tokens.push(Spanned { token, offset });
        i += 1;
    }

    Ok(tokens)
}

struct Parser<'a> {
    input: &'a str,
    tokens: Vec<Spanned>,
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Spanned> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Spanned> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn end_offset(&self) -> usize {
        self.input.chars().count()
    }

    fn error_at(&self, offset: usize, message: impl Into<String>) -> Error {
        expression_error(self.input, offset, message)
    }

    fn expression(&mut self) -> Result<f64> {
        let mut value = self.term()?;
        loop {
            match self.peek().map(|s| s.token.clone()) {
                Some(Token::Plus) => {
                    self.pos += 1;
                    value += self.term()?;
                }
                Some(Token::Minus) => {
                    self.pos += 1;
                    value -= self.term()?;
                }
                _ => return Ok(value),
            }
        }
    }

    fn term(&mut self) -> Result<f64> {
        let mut value = self.factor()?;
        loop {
            match self.peek().map(|s| s.token.clone()) {
                Some(Token::Star) => {
                    self.pos += 1;
                    value *= self.factor()?;
                }
                Some(Token::Slash) => {
                    self.pos += 1;
                    value /= self.factor()?;
                }
                _ => return Ok(value),
            }
        }
    }

    fn factor(&mut self) -> Result<f64> {
        let Some(Spanned { token, offset }) = self.next() else {
            return Err(self.error_at(self.end_offset(), "Unexpected end of input"));
        };

        match token {
            Token::Number(value) => Ok(value),
            Token::Ident(name) => constant(&name)
                .ok_or_else(|| self.error_at(offset, format!("Unknown identifier '{name}'"))),
            Token::LParen => {
                let value = self.expression()?;
                match self.next() {
                    Some(Spanned {
                        token: Token::RParen,
                        ..
                    }) => Ok(value),
                    Some(other) => Err(self.error_at(other.offset, "Expected ')'")),
                    None => Err(self.error_at(self.end_offset(), "Expected ')'")),
                }
            }
            _ => Err(self.error_at(offset, "Expected a number, identifier or '('")),
        }
    }
}

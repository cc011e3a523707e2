#![forbid(unsafe_code)]

//! Recursive-descent parser for the textual filter grammar.
//!
//! Grammar (ASCII, fully parenthesized, no precedence ambiguity):
//!
//! ```text
//! filter     = "(" body ")"
//! body       = "&" filter+ | "|" filter+ | "!" filter | leaf
//! leaf       = field op value
//! op         = "=" | ">=" | "<="
//! ```
//!
//! A leaf value of exactly `*` is a presence test; an `=` value containing
//! `*` elsewhere is a substring pattern. Syntax errors (unbalanced
//! parentheses, unknown operator tokens, trailing input) are reported as
//! [`ShoalError::InvalidQuery`] before any type-directed validation runs.

use crate::errors::{Result, ShoalError};
use crate::filter::ast::Filter;

/// Parses a filter expression, or fails with `InvalidQuery`.
pub fn parse(input: &str) -> Result<Filter> {
    let mut p = Parser { input, pos: 0 };
    let filter = p.filter().map_err(|reason| err(input, reason))?;
    if p.pos != p.input.len() {
        return Err(err(input, format!("trailing input at offset {}", p.pos)));
    }
    Ok(filter)
}

fn err(input: &str, reason: String) -> ShoalError {
    ShoalError::invalid_query(input, reason)
}

/// Byte-position cursor over the input. `pos` only ever stops on an ASCII
/// structural byte (`( ) & | ! = > <`) or at the end of input, so it is
/// always a valid `char` boundary for slicing.
struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

type ParseResult<T> = std::result::Result<T, String>;

impl Parser<'_> {
    fn peek(&self) -> Option<u8> {
        self.input.as_bytes().get(self.pos).copied()
    }

    fn expect(&mut self, byte: u8) -> ParseResult<()> {
        if self.peek() == Some(byte) {
            self.pos += 1;
            Ok(())
        } else {
            Err(format!(
                "expected '{}' at offset {}",
                byte as char, self.pos
            ))
        }
    }

    fn filter(&mut self) -> ParseResult<Filter> {
        self.expect(b'(')?;
        let node = match self.peek() {
            Some(b'&') => {
                self.pos += 1;
                Filter::And(self.children()?)
            }
            Some(b'|') => {
                self.pos += 1;
                Filter::Or(self.children()?)
            }
            Some(b'!') => {
                self.pos += 1;
                Filter::Not(Box::new(self.filter()?))
            }
            Some(_) => self.leaf()?,
            None => return Err("unbalanced parentheses".to_owned()),
        };
        self.expect(b')')
            .map_err(|_| "unbalanced parentheses".to_owned())?;
        Ok(node)
    }

    fn children(&mut self) -> ParseResult<Vec<Filter>> {
        let mut children = Vec::new();
        while self.peek() == Some(b'(') {
            children.push(self.filter()?);
        }
        if children.is_empty() {
            return Err(format!(
                "combinator requires at least one child at offset {}",
                self.pos
            ));
        }
        Ok(children)
    }

    fn leaf(&mut self) -> ParseResult<Filter> {
        let field = self.take_while(|b| !matches!(b, b'=' | b'>' | b'<' | b'(' | b')'));
        if field.is_empty() {
            return Err(format!("expected field name at offset {}", self.pos));
        }
        let op = match self.peek() {
            Some(b'=') => {
                self.pos += 1;
                Op::Eq
            }
            Some(b'>') => {
                self.pos += 1;
                self.expect(b'=').map_err(|_| unknown_op(&field, '>'))?;
                Op::Ge
            }
            Some(b'<') => {
                self.pos += 1;
                self.expect(b'=').map_err(|_| unknown_op(&field, '<'))?;
                Op::Le
            }
            _ => return Err(format!("expected operator after '{field}'")),
        };
        let value = self.take_while(|b| !matches!(b, b'(' | b')'));
        if value.is_empty() {
            return Err(format!("expected value after '{field}'"));
        }
        Ok(match op {
            Op::Eq if value == "*" => Filter::Presence { field },
            Op::Eq if value.contains('*') => Filter::Substring {
                field,
                pattern: value,
            },
            Op::Eq => Filter::Equality { field, value },
            Op::Ge => Filter::GreaterOrEqual { field, value },
            Op::Le => Filter::LessOrEqual { field, value },
        })
    }

    fn take_while(&mut self, keep: impl Fn(u8) -> bool) -> String {
        let start = self.pos;
        while self.peek().is_some_and(&keep) {
            self.pos += 1;
        }
        // `keep` never accepts the structural bytes, and UTF-8 continuation
        // bytes never equal them, so both ends land on char boundaries.
        self.input[start..self.pos].to_owned()
    }
}

enum Op {
    Eq,
    Ge,
    Le,
}

fn unknown_op(field: &str, seen: char) -> String {
    format!("unknown operator '{seen}' after '{field}' (supported: =, >=, <=)")
}

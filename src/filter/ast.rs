#![forbid(unsafe_code)]

//! Filter expression tree and typed literal values.
//!
//! A [`Filter`] is built by the parser from request text, validated once
//! against a bucket's index map during compilation, and discarded when the
//! owning request completes. It is never cached or shared across requests.

use rusqlite::types::Value as SqlValue;

use crate::catalog::IndexType;

/// One node of a parsed filter expression.
#[derive(Clone, Debug, PartialEq)]
pub enum Filter {
    /// `(field=value)` — exact match.
    Equality {
        /// Field the predicate applies to.
        field: String,
        /// Raw literal text; typed during compilation.
        value: String,
    },
    /// `(field=*)` — field has a value.
    Presence {
        /// Field the predicate applies to.
        field: String,
    },
    /// `(field>=value)` — ordered comparison, lower bound.
    GreaterOrEqual {
        /// Field the predicate applies to.
        field: String,
        /// Raw literal text; typed during compilation.
        value: String,
    },
    /// `(field<=value)` — ordered comparison, upper bound.
    LessOrEqual {
        /// Field the predicate applies to.
        field: String,
        /// Raw literal text; typed during compilation.
        value: String,
    },
    /// `(field=pat*tern)` — substring match; `*` marks wildcards.
    Substring {
        /// Field the predicate applies to.
        field: String,
        /// Pattern text containing at least one `*`.
        pattern: String,
    },
    /// `(&f1f2...)` — all children match.
    And(Vec<Filter>),
    /// `(|f1f2...)` — any child matches.
    Or(Vec<Filter>),
    /// `(!f)` — child does not match.
    Not(Box<Filter>),
}

/// Literal value typed by the field's declared index type, never inferred
/// from the literal's surface syntax alone.
#[derive(Clone, Debug, PartialEq)]
pub enum FilterValue {
    /// String literal.
    String(String),
    /// Finite numeric literal.
    Number(f64),
    /// Boolean literal.
    Boolean(bool),
}

impl FilterValue {
    /// Parses a raw literal according to the field's declared base type.
    /// Returns `None` when the text cannot be read as that type.
    pub fn parse(raw: &str, base_type: IndexType) -> Option<Self> {
        match base_type {
            IndexType::String => Some(FilterValue::String(raw.to_owned())),
            IndexType::Number => {
                let n = raw.parse::<f64>().ok().filter(|n| n.is_finite())?;
                Some(FilterValue::Number(n))
            }
            IndexType::Boolean => match raw {
                "true" => Some(FilterValue::Boolean(true)),
                "false" => Some(FilterValue::Boolean(false)),
                _ => None,
            },
        }
    }

    /// Converts into the bound-parameter representation. Booleans bind as
    /// integers to match both the scalar column affinity and the values
    /// `json_each` yields for JSON `true`/`false`.
    pub fn into_sql(self) -> SqlValue {
        match self {
            FilterValue::String(s) => SqlValue::Text(s),
            FilterValue::Number(n) => SqlValue::Real(n),
            FilterValue::Boolean(b) => SqlValue::Integer(b as i64),
        }
    }
}

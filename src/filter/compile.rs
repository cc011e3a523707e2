#![forbid(unsafe_code)]

//! Type-directed compilation of filter trees into SQL predicate fragments.
//!
//! Every leaf is validated against the bucket's index map before any SQL is
//! produced; compilation is all-or-nothing. Literal values are always
//! emitted as bound parameters. The only identifiers interpolated into
//! predicate text are the bucket table name and index field names, both of
//! which have already passed the strict identifier allow-list (the table
//! name at bucket creation, field names by membership in the index map).
//!
//! Array-typed fields are stored as canonical JSON text and compile against
//! "any element satisfies" semantics via correlated `json_each` subqueries:
//! `(id>=3)` on an array field matches objects whose array contains at
//! least one element >= 3. Substring matching is only defined for scalar
//! string columns; array columns are sequence-valued and cannot support
//! native substring indexing, so a substring leaf on any array field is an
//! error regardless of nesting.

use rusqlite::types::Value as SqlValue;

use crate::catalog::{Bucket, IndexSpec};
use crate::errors::{Result, ShoalError};
use crate::filter::ast::{Filter, FilterValue};
use crate::filter::parser;

/// A compiled predicate: a boolean SQL fragment plus its positional
/// parameters, owned by one request for its lifetime.
#[derive(Clone, Debug)]
pub struct CompiledFilter {
    /// Boolean expression fragment usable inside a `WHERE` clause.
    pub where_clause: String,
    /// Positional values to bind, in fragment order.
    pub params: Vec<SqlValue>,
}

/// Parses and compiles a filter expression against a bucket's index typing.
pub fn compile(bucket: &Bucket, filter_text: &str) -> Result<CompiledFilter> {
    let filter = parser::parse(filter_text)?;
    let mut compiler = Compiler {
        bucket,
        filter_text,
        table: bucket.table(),
        params: Vec::new(),
    };
    let where_clause = compiler.node(&filter)?;
    Ok(CompiledFilter {
        where_clause,
        params: compiler.params,
    })
}

struct Compiler<'a> {
    bucket: &'a Bucket,
    filter_text: &'a str,
    table: String,
    params: Vec<SqlValue>,
}

impl Compiler<'_> {
    fn node(&mut self, filter: &Filter) -> Result<String> {
        match filter {
            Filter::And(children) => self.combinator(children, " AND "),
            Filter::Or(children) => self.combinator(children, " OR "),
            Filter::Not(child) => Ok(format!("NOT ({})", self.node(child)?)),
            Filter::Presence { field } => self.presence(field),
            Filter::Equality { field, value } => self.comparison(field, "=", value),
            Filter::GreaterOrEqual { field, value } => self.ordered(field, ">=", value),
            Filter::LessOrEqual { field, value } => self.ordered(field, "<=", value),
            Filter::Substring { field, pattern } => self.substring(field, pattern),
        }
    }

    fn combinator(&mut self, children: &[Filter], joiner: &str) -> Result<String> {
        let fragments = children
            .iter()
            .map(|child| self.node(child))
            .collect::<Result<Vec<_>>>()?;
        Ok(format!("({})", fragments.join(joiner)))
    }

    fn spec(&self, field: &str) -> Result<IndexSpec> {
        self.bucket.index.get(field).copied().ok_or_else(|| {
            self.invalid(format!(
                "field '{field}' is not indexed in bucket '{}'",
                self.bucket.name
            ))
        })
    }

    fn presence(&mut self, field: &str) -> Result<String> {
        let spec = self.spec(field)?;
        let col = self.column(field);
        if spec.is_array {
            // An empty stored array has no element satisfying anything.
            Ok(format!("({col} IS NOT NULL AND json_array_length({col}) > 0)"))
        } else {
            Ok(format!("{col} IS NOT NULL"))
        }
    }

    fn comparison(&mut self, field: &str, op: &str, raw: &str) -> Result<String> {
        let spec = self.spec(field)?;
        let value = self.literal(field, raw, spec)?;
        self.params.push(value.into_sql());
        let col = self.column(field);
        if spec.is_array {
            Ok(format!(
                "EXISTS (SELECT 1 FROM json_each({col}) WHERE json_each.value {op} ?)"
            ))
        } else {
            Ok(format!("{col} {op} ?"))
        }
    }

    fn ordered(&mut self, field: &str, op: &str, raw: &str) -> Result<String> {
        let spec = self.spec(field)?;
        if !spec.base_type.is_ordered() {
            return Err(self.invalid(format!(
                "operator '{op}' is not defined for boolean field '{field}'"
            )));
        }
        self.comparison(field, op, raw)
    }

    fn substring(&mut self, field: &str, pattern: &str) -> Result<String> {
        let spec = self.spec(field)?;
        if spec.is_array {
            return Err(self.invalid(format!(
                "substring match is not supported on array-typed field '{field}'"
            )));
        }
        if spec.base_type != crate::catalog::IndexType::String {
            return Err(self.invalid(format!(
                "substring match requires a string field, and '{field}' is {}",
                spec.type_spelling()
            )));
        }
        self.params
            .push(SqlValue::Text(like_pattern(pattern)));
        Ok(format!("{} LIKE ? ESCAPE '\\'", self.column(field)))
    }

    fn literal(&self, field: &str, raw: &str, spec: IndexSpec) -> Result<FilterValue> {
        FilterValue::parse(raw, spec.base_type).ok_or_else(|| {
            self.invalid(format!(
                "value '{raw}' is not a valid {} literal for field '{field}'",
                spec.type_spelling()
            ))
        })
    }

    fn column(&self, field: &str) -> String {
        format!("{}.{field}", self.table)
    }

    fn invalid(&self, reason: String) -> ShoalError {
        ShoalError::invalid_query(self.filter_text, reason)
    }
}

/// Converts a `*`-wildcard pattern into a `LIKE` pattern, escaping the SQL
/// wildcard characters that appear literally in the input.
fn like_pattern(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    for c in pattern.chars() {
        match c {
            '*' => out.push('%'),
            '%' | '_' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            other => out.push(other),
        }
    }
    out
}

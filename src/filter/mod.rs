#![forbid(unsafe_code)]

//! Filter parsing and type-directed compilation to SQL predicates.
//!
//! Filters arrive as LDAP-style parenthesized prefix boolean expressions,
//! e.g. `(&(name=foo)(!(age>=21)))`. They are parsed into a [`Filter`] tree,
//! validated leaf by leaf against the bucket's index typing, and compiled
//! into a parameterized predicate fragment for use inside a `WHERE` clause.
//! Compilation is all-or-nothing: any invalid leaf fails the whole filter
//! before a single statement touches the database.

/// Abstract syntax tree for filter expressions.
pub mod ast;

/// Type-directed compiler from filter trees to SQL predicate fragments.
pub mod compile;

/// Recursive-descent parser for the textual filter grammar.
pub mod parser;

pub use ast::{Filter, FilterValue};
pub use compile::{compile, CompiledFilter};
pub use parser::parse;

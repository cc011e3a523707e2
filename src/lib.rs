//! Shoal: a typed, indexed JSON document store layered over SQLite.
//!
//! Objects live in named buckets. Each bucket declares per-field index types
//! (scalar or array; string, number, boolean); object fields named by the
//! index are projected into real columns, and client-supplied LDAP-style
//! filter expressions are compiled into parameterized SQL predicates that
//! respect that typing. Mutations and queries run as short transactional
//! pipelines on a single pooled connection.

#![warn(missing_docs)]

pub mod catalog;
pub mod db;
pub mod errors;
pub mod filter;
pub mod objects;
pub mod pipeline;
pub mod store;

pub use catalog::{Bucket, BucketConfig, IndexSpec, IndexType};
pub use errors::{ErrorPayload, Result, ShoalError};
pub use filter::{CompiledFilter, Filter};
pub use objects::{PutOptions, StoredObject, WriteResult};
pub use store::{Shoal, ShoalOptions};

/// Installs a `tracing` subscriber honoring `RUST_LOG`.
///
/// Intended for binaries and integration tests; later calls are no-ops.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

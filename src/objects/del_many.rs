#![forbid(unsafe_code)]

//! Bulk delete-by-filter.
//!
//! Runs the shared bucket-resolution/predicate-compilation prefix, then one
//! delete restricted to matching rows. The delete goes through a subquery
//! over the compiled predicate so the affected-row count is exact and the
//! statement stays semantically equivalent to a `SELECT`-then-`DELETE`
//! staging. Tombstones for every removed key are written by the same
//! transaction; nothing counts as deleted unless the transaction commits.

use std::sync::Arc;

use rusqlite::params_from_iter;
use rusqlite::types::Value as SqlValue;
use tracing::debug;

use crate::errors::Result;
use crate::objects::{common, now_secs};
use crate::pipeline::{OpOutput, RequestContext, Stage};

/// Drop stage: tombstone matching rows, then delete them.
pub fn drop_rows(ctx: &mut RequestContext<'_>) -> Result<()> {
    let bucket = Arc::clone(ctx.bucket.as_ref().expect("load_bucket stage ran"));
    let compiled = ctx.compiled().clone();
    let table = bucket.table();
    let predicate = &compiled.where_clause;

    // Matching keys cannot already have tombstones while live, but an upsert
    // keeps the newest dtime if that invariant is ever repaired from outside.
    let mut params: Vec<SqlValue> = vec![SqlValue::Integer(now_secs())];
    params.extend(compiled.params.iter().cloned());
    ctx.tx.execute(
        &format!(
            "INSERT INTO {} (_key, _dtime)
                SELECT _key, ?1 FROM {table} WHERE {predicate}
                ON CONFLICT(_key) DO UPDATE SET _dtime = excluded._dtime",
            bucket.tombstone_table()
        ),
        params_from_iter(params),
    )?;

    let removed = ctx.tx.execute(
        &format!(
            "DELETE FROM {table}
                WHERE _id IN (
                    SELECT _id FROM {table} WHERE {predicate}
                )"
        ),
        params_from_iter(compiled.params.iter().cloned()),
    )?;

    debug!(bucket = %bucket.name, count = removed, "delete-many done");
    ctx.output = OpOutput::Count(removed as u64);
    Ok(())
}

/// Stage list for `delete_many`; the prefix is shared by reference with
/// `find` (and reusable by future bulk operations).
pub static PIPELINE: &[&[Stage]] = &[
    common::LOAD_AND_COMPILE,
    &[Stage {
        name: "drop_rows",
        run: drop_rows,
    }],
];

#![forbid(unsafe_code)]

//! Filtered query returning matching objects in `_id` order.

use std::sync::Arc;

use rusqlite::params_from_iter;
use tracing::debug;

use crate::errors::Result;
use crate::objects::{common, object_from_row};
use crate::pipeline::{OpOutput, RequestContext, Stage};

/// Fetch stage: selects all rows matching the compiled predicate.
pub fn fetch_rows(ctx: &mut RequestContext<'_>) -> Result<()> {
    let bucket = Arc::clone(ctx.bucket.as_ref().expect("load_bucket stage ran"));
    let compiled = ctx.compiled();

    let mut stmt = ctx.tx.prepare(&format!(
        "SELECT _id, _key, _value, _etag, _mtime FROM {} WHERE {} ORDER BY _id",
        bucket.table(),
        compiled.where_clause
    ))?;
    let records = stmt
        .query_map(params_from_iter(compiled.params.iter().cloned()), |row| {
            object_from_row(&bucket.name, row)
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    debug!(bucket = %bucket.name, count = records.len(), "find done");
    ctx.output = OpOutput::Records(records);
    Ok(())
}

/// Stage list for `find_objects`; shares its prefix with `delete_many`.
pub static PIPELINE: &[&[Stage]] = &[
    common::LOAD_AND_COMPILE,
    &[Stage {
        name: "fetch_rows",
        run: fetch_rows,
    }],
];

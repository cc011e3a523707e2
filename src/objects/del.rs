#![forbid(unsafe_code)]

//! Single-object delete with tombstone creation.

use std::sync::Arc;

use rusqlite::params;
use tracing::debug;

use crate::errors::Result;
use crate::objects::get::missing_object;
use crate::objects::{common, now_secs};
use crate::pipeline::{OpInput, OpOutput, RequestContext, Stage};

/// Delete stage: removes the live row and records a tombstone in the same
/// transaction, transitioning `Live -> Tombstoned`. Deleting an absent key
/// reports the same live/never-existed/tombstoned distinction as a read.
pub fn drop_object(ctx: &mut RequestContext<'_>) -> Result<()> {
    let bucket = Arc::clone(ctx.bucket.as_ref().expect("load_bucket stage ran"));
    let OpInput::Key { key } = &ctx.input else {
        unreachable!("delete pipeline carries OpInput::Key");
    };

    let removed = ctx.tx.execute(
        &format!("DELETE FROM {} WHERE _key = ?1", bucket.table()),
        params![key],
    )?;
    if removed == 0 {
        return Err(missing_object(ctx, &bucket.name, key)?);
    }
    // The row just held the key, so no tombstone can exist for it; a plain
    // insert preserves the one-of-either invariant.
    ctx.tx.execute(
        &format!(
            "INSERT INTO {} (_key, _dtime) VALUES (?1, ?2)",
            bucket.tombstone_table()
        ),
        params![key, now_secs()],
    )?;
    debug!(bucket = %bucket.name, key = %key, "object deleted");
    ctx.output = OpOutput::None;
    Ok(())
}

/// Stage list for `delete_object`.
pub static PIPELINE: &[&[Stage]] = &[
    common::LOAD_ONLY,
    &[Stage {
        name: "drop_object",
        run: drop_object,
    }],
];

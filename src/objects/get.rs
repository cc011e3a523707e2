#![forbid(unsafe_code)]

//! Keyed read distinguishing live, never-existed, and tombstoned keys.

use std::sync::Arc;

use rusqlite::{params, OptionalExtension};

use crate::errors::{Result, ShoalError};
use crate::objects::{common, object_from_row};
use crate::pipeline::{OpInput, OpOutput, RequestContext, Stage};

/// Fetch stage: returns the live object, or reports why there is none.
///
/// A key with a tombstone yields `ResourceGone` carrying the deletion time;
/// a key with neither a row nor a tombstone yields `ObjectNotFound`. The
/// distinction is part of the read contract.
pub fn fetch_object(ctx: &mut RequestContext<'_>) -> Result<()> {
    let bucket = Arc::clone(ctx.bucket.as_ref().expect("load_bucket stage ran"));
    let OpInput::Key { key } = &ctx.input else {
        unreachable!("get pipeline carries OpInput::Key");
    };

    let row = ctx
        .tx
        .query_row(
            &format!(
                "SELECT _id, _key, _value, _etag, _mtime FROM {} WHERE _key = ?1",
                bucket.table()
            ),
            params![key],
            |row| object_from_row(&bucket.name, row),
        )
        .optional()?;
    if let Some(object) = row {
        ctx.output = OpOutput::Object(object);
        return Ok(());
    }
    Err(missing_object(ctx, &bucket.name, key)?)
}

/// Looks up the tombstone for a missing key and builds the matching error.
pub(crate) fn missing_object(
    ctx: &RequestContext<'_>,
    bucket: &str,
    key: &str,
) -> Result<ShoalError> {
    let dtime: Option<i64> = ctx
        .tx
        .query_row(
            &format!(
                "SELECT _dtime FROM obj_{bucket}_tombstone WHERE _key = ?1"
            ),
            params![key],
            |row| row.get(0),
        )
        .optional()?;
    Ok(match dtime {
        Some(dtime) => ShoalError::ResourceGone {
            bucket: bucket.to_owned(),
            key: key.to_owned(),
            dtime,
        },
        None => ShoalError::ObjectNotFound {
            bucket: bucket.to_owned(),
            key: key.to_owned(),
        },
    })
}

/// Stage list for `get_object`.
pub static PIPELINE: &[&[Stage]] = &[
    common::LOAD_ONLY,
    &[Stage {
        name: "fetch_object",
        run: fetch_object,
    }],
];

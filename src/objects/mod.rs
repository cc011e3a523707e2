#![forbid(unsafe_code)]

//! Object operations, expressed as pipeline stages.
//!
//! Each operation exports a `PIPELINE`: an immutable list of stage segments
//! run in order on one transaction. Filtered operations (`find`,
//! `delete_many`) reference the shared [`common::LOAD_AND_COMPILE`] prefix;
//! keyed operations reference [`common::LOAD_ONLY`]. Segments are shared by
//! reference, never copied per operation.

/// Shared stages: bucket resolution and predicate compilation.
pub mod common;

/// Single-object delete.
pub mod del;

/// Bulk delete-by-filter.
pub mod del_many;

/// Filtered query returning matching objects.
pub mod find;

/// Keyed read with live/absent/tombstoned distinction.
pub mod get;

/// Object write: projection, versioning, resurrection.
pub mod put;

use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

/// A stored object as returned to callers.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StoredObject {
    /// Owning bucket.
    pub bucket: String,
    /// Key, unique among live objects in the bucket.
    pub key: String,
    /// The JSON document (post write-time normalization).
    pub value: serde_json::Value,
    /// Monotonic internal row id.
    pub id: i64,
    /// Opaque version token, recomputed on every write.
    pub etag: String,
    /// Last-write time, unix milliseconds UTC.
    pub mtime: i64,
}

/// Receipt for a successful write.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct WriteResult {
    /// New etag of the object.
    pub etag: String,
    /// Write time, unix milliseconds UTC.
    pub mtime: i64,
}

/// Options for [`crate::Shoal::put_object`].
#[derive(Clone, Debug, Default)]
pub struct PutOptions {
    /// When set, the write only succeeds if the stored etag matches.
    pub expected_etag: Option<String>,
}

/// Current time in unix milliseconds.
pub(crate) fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Current time in unix seconds, used for tombstone `dtime`.
pub(crate) fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Computes an object's etag from its canonical value and write time.
pub(crate) fn etag_for(value_json: &str, mtime: i64) -> String {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(value_json.as_bytes());
    hasher.update(&mtime.to_le_bytes());
    format!("{:08x}", hasher.finalize())
}

/// Maps a result row (`_id, _key, _value, _etag, _mtime`) to a
/// [`StoredObject`].
pub(crate) fn object_from_row(
    bucket: &str,
    row: &rusqlite::Row<'_>,
) -> rusqlite::Result<StoredObject> {
    let value_json: String = row.get(2)?;
    let value = serde_json::from_str(&value_json).map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            Box::new(err),
        )
    })?;
    Ok(StoredObject {
        bucket: bucket.to_owned(),
        key: row.get(1)?,
        value,
        id: row.get(0)?,
        etag: row.get(3)?,
        mtime: row.get(4)?,
    })
}

#![forbid(unsafe_code)]

//! Object write: projection, versioning, tombstone resurrection.
//!
//! Projected columns are re-derived from the document on every write, never
//! edited independently. A scalar written under an array-typed index field
//! is normalized to a single-element array in the stored document, so
//! read-back always sees a sequence; an array written under a scalar-typed
//! field is rejected outright. The write clears any tombstone for the key
//! in the same transaction, transitioning `Tombstoned -> Live`.

use std::sync::Arc;

use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, OptionalExtension};
use tracing::debug;

use crate::catalog::{Bucket, IndexType};
use crate::errors::{Result, ShoalError};
use crate::objects::{common, etag_for, now_millis, WriteResult};
use crate::pipeline::{OpInput, OpOutput, RequestContext, Stage};

/// Etag value reported for a conditional write against an absent object.
const ABSENT_ETAG: &str = "null";

/// Write stage: project, version-check, upsert, clear tombstone.
pub fn write_object(ctx: &mut RequestContext<'_>) -> Result<()> {
    let bucket = Arc::clone(ctx.bucket.as_ref().expect("load_bucket stage ran"));
    let tx = ctx.tx;
    let OpInput::Write {
        key,
        value,
        expected_etag,
    } = &mut ctx.input
    else {
        unreachable!("put pipeline carries OpInput::Write");
    };

    let table = bucket.table();
    let existing: Option<String> = tx
        .query_row(
            &format!("SELECT _etag FROM {table} WHERE _key = ?1"),
            params![key.as_str()],
            |row| row.get(0),
        )
        .optional()?;
    if let Some(expected) = expected_etag {
        let actual = existing.as_deref().unwrap_or(ABSENT_ETAG);
        if expected.as_str() != actual {
            return Err(ShoalError::VersionConflict {
                bucket: bucket.name.clone(),
                key: key.clone(),
                expected: expected.clone(),
                actual: actual.to_owned(),
            });
        }
    }

    let projected = project(&bucket, key, value)?;
    let value_json = serde_json::to_string(value)
        .map_err(|err| invalid_value(&bucket, key, err.to_string()))?;
    let mtime = now_millis();
    let etag = etag_for(&value_json, mtime);

    let mut columns = vec![
        "_key".to_owned(),
        "_value".to_owned(),
        "_etag".to_owned(),
        "_mtime".to_owned(),
    ];
    let mut values: Vec<SqlValue> = vec![
        SqlValue::Text(key.clone()),
        SqlValue::Text(value_json),
        SqlValue::Text(etag.clone()),
        SqlValue::Integer(mtime),
    ];
    for (field, value) in projected {
        columns.push(field);
        values.push(value);
    }
    let placeholders = (1..=columns.len())
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ");
    let updates = columns
        .iter()
        .skip(1)
        .map(|c| format!("{c} = excluded.{c}"))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "INSERT INTO {table} ({}) VALUES ({placeholders})
            ON CONFLICT(_key) DO UPDATE SET {updates}",
        columns.join(", ")
    );
    tx.execute(&sql, params_from_iter(values))
        .map_err(|err| map_unique_violation(&bucket, err))?;

    tx.execute(
        &format!("DELETE FROM {} WHERE _key = ?1", bucket.tombstone_table()),
        params![key.as_str()],
    )?;

    debug!(bucket = %bucket.name, key = %key, etag = %etag, "object written");
    ctx.output = OpOutput::Written(WriteResult { etag, mtime });
    Ok(())
}

/// Stage list for `put_object`.
pub static PIPELINE: &[&[Stage]] = &[
    common::LOAD_ONLY,
    &[Stage {
        name: "write_object",
        run: write_object,
    }],
];

/// Derives projected column values from the document, normalizing scalars
/// under array-typed fields in place.
fn project(
    bucket: &Bucket,
    key: &str,
    value: &mut serde_json::Value,
) -> Result<Vec<(String, SqlValue)>> {
    let Some(map) = value.as_object_mut() else {
        return Err(invalid_value(
            bucket,
            key,
            "object value must be a JSON object".to_owned(),
        ));
    };
    let mut projected = Vec::with_capacity(bucket.index.len());
    for (field, spec) in &bucket.index {
        let column = match map.get_mut(field) {
            None | Some(serde_json::Value::Null) => SqlValue::Null,
            Some(field_value) if spec.is_array => {
                if element_matches(field_value, spec.base_type) {
                    // Scalar under an array-typed index: single-element
                    // sequence from here on.
                    let scalar = field_value.take();
                    *field_value = serde_json::Value::Array(vec![scalar]);
                }
                let serde_json::Value::Array(items) = &*field_value else {
                    return Err(invalid_value(
                        bucket,
                        key,
                        format!(
                            "value for field '{field}' is not a {}",
                            spec.type_spelling()
                        ),
                    ));
                };
                if let Some(bad) = items.iter().find(|v| !element_matches(v, spec.base_type)) {
                    return Err(invalid_value(
                        bucket,
                        key,
                        format!(
                            "element {bad} of field '{field}' does not fit {}",
                            spec.type_spelling()
                        ),
                    ));
                }
                let canonical = serde_json::to_string(field_value)
                    .map_err(|err| invalid_value(bucket, key, err.to_string()))?;
                SqlValue::Text(canonical)
            }
            Some(serde_json::Value::Array(_)) => {
                return Err(invalid_value(
                    bucket,
                    key,
                    format!("array value written to scalar-typed field '{field}'"),
                ));
            }
            Some(field_value) => scalar_column(field_value, spec.base_type).ok_or_else(|| {
                invalid_value(
                    bucket,
                    key,
                    format!(
                        "value for field '{field}' is not a {}",
                        spec.type_spelling()
                    ),
                )
            })?,
        };
        projected.push((field.clone(), column));
    }
    Ok(projected)
}

fn element_matches(value: &serde_json::Value, base_type: IndexType) -> bool {
    match base_type {
        IndexType::String => value.is_string(),
        IndexType::Number => value.is_number(),
        IndexType::Boolean => value.is_boolean(),
    }
}

fn scalar_column(value: &serde_json::Value, base_type: IndexType) -> Option<SqlValue> {
    match (base_type, value) {
        (IndexType::String, serde_json::Value::String(s)) => Some(SqlValue::Text(s.clone())),
        (IndexType::Number, serde_json::Value::Number(n)) => n.as_f64().map(SqlValue::Real),
        (IndexType::Boolean, serde_json::Value::Bool(b)) => Some(SqlValue::Integer(*b as i64)),
        _ => None,
    }
}

fn invalid_value(bucket: &Bucket, key: &str, reason: String) -> ShoalError {
    ShoalError::invalid_query(format!("{}:{key}", bucket.name), reason)
}

/// Maps a SQLite unique-constraint failure to the typed error, naming the
/// offending field.
///
/// Keys conflicts are absorbed by the upsert, so a unique violation here can
/// only come from one of the bucket's declared unique indexes; the field is
/// picked from that list by matching the failed column in the diagnostic,
/// not by parsing the message shape.
fn map_unique_violation(bucket: &Bucket, err: rusqlite::Error) -> ShoalError {
    if let rusqlite::Error::SqliteFailure(failure, msg) = &err {
        if failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE {
            let field = bucket
                .index
                .iter()
                .filter(|(_, spec)| spec.unique)
                .map(|(field, _)| field.as_str())
                .find(|field| {
                    msg.as_deref()
                        .is_some_and(|m| m.ends_with(&format!(".{field}")))
                })
                .unwrap_or("_key");
            return ShoalError::UniqueConstraintViolation {
                bucket: bucket.name.clone(),
                field: field.to_owned(),
            };
        }
    }
    ShoalError::Db(err)
}

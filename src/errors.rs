#![forbid(unsafe_code)]

//! Structured errors shared across the catalog, filter compiler, and object
//! pipelines.
//!
//! Every failure the core can produce is a [`ShoalError`] variant carrying
//! enough bucket/key/filter context to diagnose the cause without logs. The
//! RPC front end consumes errors through [`ErrorPayload`], which fixes the
//! wire shape (`httpStatus`, `errorCode`, `message`).
//!
//! Not-found and gone conditions use a stable URN message format so clients
//! can tell "never existed" from "deleted at time T":
//! `urn:shoal:<bucket>:<key> does not exist` vs.
//! `urn:shoal:<bucket>:<key> was deleted at <UTC ISO-8601>`.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::macros::format_description;
use time::OffsetDateTime;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ShoalError>;

/// URN scheme prefix embedded in resource-identifier messages.
pub const URN_SCHEME: &str = "urn:shoal";

/// Renders a unix-seconds timestamp as `YYYY-MM-DDTHH:MM:SSZ` (UTC).
///
/// Timestamps that fall outside the representable range render as the raw
/// integer; they can only arise from direct table corruption.
pub fn iso8601(unix_secs: i64) -> String {
    let format = format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]Z");
    OffsetDateTime::from_unix_timestamp(unix_secs)
        .ok()
        .and_then(|dt| dt.format(format).ok())
        .unwrap_or_else(|| unix_secs.to_string())
}

/// Errors produced by bucket resolution, filter compilation, and the object
/// pipelines.
#[derive(Debug, Error)]
pub enum ShoalError {
    /// Filter failed to parse, referenced an unknown field, used an operator
    /// incompatible with the field's index type, or a written value did not
    /// fit the declared index type.
    #[error("invalid query: {reason} (input '{filter}')")]
    InvalidQuery {
        /// Original filter text, or the `bucket:key` under write for
        /// projection failures.
        filter: String,
        /// Human-readable description of the offending leaf or token.
        reason: String,
    },
    /// Named bucket does not exist.
    #[error("{URN_SCHEME}:{bucket} does not exist")]
    BucketNotFound {
        /// Bucket name.
        bucket: String,
    },
    /// Bucket creation collided with an existing bucket.
    #[error("{URN_SCHEME}:{bucket} already exists")]
    BucketAlreadyExists {
        /// Bucket name.
        bucket: String,
    },
    /// Bucket index configuration was rejected.
    #[error("invalid bucket config: {reason}")]
    InvalidBucketConfig {
        /// What was wrong with the configuration.
        reason: String,
    },
    /// Key has never existed in the bucket.
    #[error("{URN_SCHEME}:{bucket}:{key} does not exist")]
    ObjectNotFound {
        /// Bucket name.
        bucket: String,
        /// Object key.
        key: String,
    },
    /// Key existed but was deleted; the tombstone records when.
    #[error("{URN_SCHEME}:{bucket}:{key} was deleted at {}", iso8601(*.dtime))]
    ResourceGone {
        /// Bucket name.
        bucket: String,
        /// Object key.
        key: String,
        /// Deletion time, unix seconds UTC.
        dtime: i64,
    },
    /// Conditional write supplied an etag that no longer matches.
    #[error("{URN_SCHEME}:{bucket}:{key} etag mismatch: expected {expected}, found {actual}")]
    VersionConflict {
        /// Bucket name.
        bucket: String,
        /// Object key.
        key: String,
        /// Etag the caller expected.
        expected: String,
        /// Etag currently stored.
        actual: String,
    },
    /// Write violated a unique index declared on the bucket.
    #[error("unique index violation on {bucket}.{field}")]
    UniqueConstraintViolation {
        /// Bucket name.
        bucket: String,
        /// Offending index field (or `_key`).
        field: String,
    },
    /// Opaque passthrough for backend errors (I/O, busy timeout, rollback).
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
}

impl ShoalError {
    /// Returns the machine-readable error code for the variant.
    pub fn code(&self) -> &'static str {
        match self {
            ShoalError::InvalidQuery { .. } => "InvalidQueryError",
            ShoalError::BucketNotFound { .. } => "BucketNotFoundError",
            ShoalError::BucketAlreadyExists { .. } => "BucketAlreadyExistsError",
            ShoalError::InvalidBucketConfig { .. } => "InvalidBucketConfigError",
            ShoalError::ObjectNotFound { .. } => "ObjectNotFoundError",
            ShoalError::ResourceGone { .. } => "ResourceGoneError",
            ShoalError::VersionConflict { .. } => "EtagConflictError",
            ShoalError::UniqueConstraintViolation { .. } => "UniqueAttributeError",
            ShoalError::Db(_) => "InternalError",
        }
    }

    /// Returns the HTTP status the front end should attach to the variant.
    pub fn http_status(&self) -> u16 {
        match self {
            ShoalError::InvalidQuery { .. } | ShoalError::InvalidBucketConfig { .. } => 400,
            ShoalError::BucketNotFound { .. } | ShoalError::ObjectNotFound { .. } => 404,
            ShoalError::BucketAlreadyExists { .. }
            | ShoalError::VersionConflict { .. }
            | ShoalError::UniqueConstraintViolation { .. } => 409,
            ShoalError::ResourceGone { .. } => 410,
            ShoalError::Db(_) => 500,
        }
    }

    /// Builds an [`ShoalError::InvalidQuery`] for a specific filter.
    pub fn invalid_query(filter: impl Into<String>, reason: impl Into<String>) -> Self {
        ShoalError::InvalidQuery {
            filter: filter.into(),
            reason: reason.into(),
        }
    }
}

/// Wire-shaped error consumed by the RPC front end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    /// HTTP status code.
    pub http_status: u16,
    /// Stable error code, e.g. `InvalidQueryError`.
    pub error_code: String,
    /// Human-readable message, URN-formatted for resource conditions.
    pub message: String,
}

impl From<&ShoalError> for ErrorPayload {
    fn from(err: &ShoalError) -> Self {
        ErrorPayload {
            http_status: err.http_status(),
            error_code: err.code().to_owned(),
            message: err.to_string(),
        }
    }
}

#![forbid(unsafe_code)]

//! Stages shared across object operations.

use std::sync::Arc;

use tracing::trace;

use crate::errors::{Result, ShoalError};
use crate::filter;
use crate::pipeline::{RequestContext, Stage};

/// Resolves the request's bucket name through the catalog.
pub fn load_bucket(ctx: &mut RequestContext<'_>) -> Result<()> {
    let bucket = ctx.catalog.resolve(ctx.tx, &ctx.bucket_name)?;
    trace!(bucket = %bucket.name, version = bucket.schema_version, "bucket resolved");
    ctx.bucket = Some(bucket);
    Ok(())
}

/// Compiles the request's filter text against the resolved schema.
pub fn compile_filter(ctx: &mut RequestContext<'_>) -> Result<()> {
    let text = ctx
        .filter_text
        .as_deref()
        .ok_or_else(|| ShoalError::invalid_query("", "operation requires a filter"))?;
    let bucket = Arc::clone(ctx.bucket.as_ref().expect("load_bucket stage ran"));
    let compiled = filter::compile(&bucket, text)?;
    trace!(filter = text, predicate = %compiled.where_clause, "filter compiled");
    ctx.compiled = Some(compiled);
    Ok(())
}

/// Bucket-resolution stage handle.
pub const LOAD_BUCKET: Stage = Stage {
    name: "load_bucket",
    run: load_bucket,
};

/// Predicate-compilation stage handle.
pub const COMPILE_FILTER: Stage = Stage {
    name: "compile_filter",
    run: compile_filter,
};

/// Shared prefix for keyed operations.
pub static LOAD_ONLY: &[Stage] = &[LOAD_BUCKET];

/// Shared prefix for filtered operations; spliced by reference into the
/// `find` and `delete_many` pipelines.
pub static LOAD_AND_COMPILE: &[Stage] = &[LOAD_BUCKET, COMPILE_FILTER];

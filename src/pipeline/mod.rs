#![forbid(unsafe_code)]

//! Transactional stage pipeline.
//!
//! Every object operation runs as an ordered list of stages over one shared
//! [`RequestContext`] on one transaction. Stages are plain functions
//! returning `Result`, so completion is delivered exactly once by
//! construction; the first failure aborts all remaining stages and becomes
//! the request's single reported outcome.
//!
//! The canonical stage sequence for an operation is a `&'static` slice of
//! [`Stage`] values; operations compose by referencing shared segments
//! (e.g. the bucket-resolution-and-predicate-compilation prefix) rather
//! than copying them, so shared prefixes cannot drift apart.
//!
//! Pipeline entry and exit emit a structured event through the [`Observer`]
//! side channel. Observation never affects control flow.

use std::sync::Arc;

use rusqlite::Transaction;
use tracing::{debug, trace};

use crate::catalog::{Bucket, BucketCatalog};
use crate::errors::{Result, ShoalError};
use crate::filter::CompiledFilter;
use crate::objects::{StoredObject, WriteResult};

/// One unit of work in a pipeline.
#[derive(Clone, Copy)]
pub struct Stage {
    /// Stage name, used in traces and observer events.
    pub name: &'static str,
    /// Stage body; receives the shared request context.
    pub run: StageFn,
}

/// Stage body signature.
pub type StageFn = fn(&mut RequestContext<'_>) -> Result<()>;

/// Operation-specific input carried into the pipeline.
#[derive(Clone, Debug)]
pub enum OpInput {
    /// No extra input (filtered operations).
    None,
    /// A single key (get, delete).
    Key {
        /// Object key.
        key: String,
    },
    /// A write (put).
    Write {
        /// Object key.
        key: String,
        /// JSON document to store.
        value: serde_json::Value,
        /// Expected etag for a conditional write.
        expected_etag: Option<String>,
    },
}

/// Accumulated result of the pipeline.
#[derive(Clone, Debug)]
pub enum OpOutput {
    /// Nothing produced yet (or the operation has no payload).
    None,
    /// Affected-row count (delete-many).
    Count(u64),
    /// A single object (get).
    Object(StoredObject),
    /// Matching objects in `_id` order (find).
    Records(Vec<StoredObject>),
    /// Write receipt (put).
    Written(WriteResult),
}

/// Shared mutable state threaded through one request's stages.
///
/// The transaction handle is part of the context value, never ambient
/// state, so concurrent requests cannot cross-contaminate transactions.
pub struct RequestContext<'a> {
    /// Operation name (`delmany`, `find`, ...).
    pub op: &'static str,
    /// Correlation id for instrumentation.
    pub req_id: u64,
    /// Catalog used by the bucket-resolution stage.
    pub catalog: &'a BucketCatalog,
    /// The request's transaction; stages execute strictly in order on it.
    pub tx: &'a Transaction<'a>,
    /// Bucket name from the request.
    pub bucket_name: String,
    /// Filter text from the request, when the operation takes one.
    pub filter_text: Option<String>,
    /// Resolved schema, populated by the `load_bucket` stage.
    pub bucket: Option<Arc<Bucket>>,
    /// Compiled predicate, populated by the `compile_filter` stage.
    pub compiled: Option<CompiledFilter>,
    /// Operation-specific input.
    pub input: OpInput,
    /// Accumulating result.
    pub output: OpOutput,
}

impl<'a> RequestContext<'a> {
    /// Builds a fresh context for one request.
    pub fn new(
        op: &'static str,
        catalog: &'a BucketCatalog,
        tx: &'a Transaction<'a>,
        bucket_name: impl Into<String>,
    ) -> Self {
        RequestContext {
            op,
            req_id: rand::random(),
            catalog,
            tx,
            bucket_name: bucket_name.into(),
            filter_text: None,
            bucket: None,
            compiled: None,
            input: OpInput::None,
            output: OpOutput::None,
        }
    }

    /// Resolved bucket. Only valid after the `load_bucket` stage; calling
    /// earlier is a stage-ordering bug.
    pub fn bucket(&self) -> &Bucket {
        self.bucket.as_deref().expect("load_bucket stage ran")
    }

    /// Compiled predicate. Only valid after the `compile_filter` stage.
    pub fn compiled(&self) -> &CompiledFilter {
        self.compiled.as_ref().expect("compile_filter stage ran")
    }
}

/// Outcome reported through the observer side channel.
#[derive(Debug)]
pub enum PipelineOutcome<'a> {
    /// Pipeline is about to run its first stage.
    Entered,
    /// All stages completed.
    Succeeded,
    /// A stage failed; no later stage ran.
    Failed(&'a ShoalError),
}

/// Narrow instrumentation side channel fired at pipeline boundaries.
///
/// Injected as a dependency; implementations must not assume they affect
/// control flow or are required for correctness.
pub trait Observer: Send + Sync {
    /// Records one pipeline boundary event.
    fn observe(&self, op: &'static str, req_id: u64, bucket: &str, outcome: &PipelineOutcome<'_>);
}

/// Default observer emitting `tracing` events.
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn observe(&self, op: &'static str, req_id: u64, bucket: &str, outcome: &PipelineOutcome<'_>) {
        match outcome {
            PipelineOutcome::Entered => debug!(op, req_id, bucket, "pipeline entered"),
            PipelineOutcome::Succeeded => debug!(op, req_id, bucket, "pipeline done"),
            PipelineOutcome::Failed(err) => {
                debug!(op, req_id, bucket, error = %err, code = err.code(), "pipeline failed");
            }
        }
    }
}

/// Runs stage segments strictly in order, short-circuiting on the first
/// failure. Segments are flattened; sharing a segment between operations
/// shares the stages by reference.
pub fn run(
    segments: &[&[Stage]],
    ctx: &mut RequestContext<'_>,
    observer: &dyn Observer,
) -> Result<()> {
    observer.observe(ctx.op, ctx.req_id, &ctx.bucket_name, &PipelineOutcome::Entered);
    for stage in segments.iter().flat_map(|segment| segment.iter()) {
        trace!(op = ctx.op, stage = stage.name, "stage entered");
        if let Err(err) = (stage.run)(ctx) {
            observer.observe(
                ctx.op,
                ctx.req_id,
                &ctx.bucket_name,
                &PipelineOutcome::Failed(&err),
            );
            return Err(err);
        }
    }
    observer.observe(
        ctx.op,
        ctx.req_id,
        &ctx.bucket_name,
        &PipelineOutcome::Succeeded,
    );
    Ok(())
}

#![forbid(unsafe_code)]

//! Public handle tying the pool, catalog, and pipelines together.
//!
//! Every operation checks out one connection, opens one transaction, runs
//! its stage pipeline, and commits on success or rolls back on the first
//! failure. Validation failures (bad filter, unknown field, bad config)
//! surface before any statement executes.

use std::path::Path;
use std::sync::Arc;

use tracing::instrument;

use crate::catalog::{Bucket, BucketCatalog, BucketConfig};
use crate::db::{ConnectionPool, PoolOptions};
use crate::errors::Result;
use crate::objects::{del, del_many, find, get, put, PutOptions, StoredObject, WriteResult};
use crate::pipeline::{self, Observer, OpInput, OpOutput, RequestContext, Stage, TracingObserver};

/// Store construction options.
#[derive(Clone, Debug, Default)]
pub struct ShoalOptions {
    /// Connection pool tuning.
    pub pool: PoolOptions,
}

/// A document store over one SQLite database.
///
/// Cheap to clone; clones share the pool, the catalog cache, and the
/// observer.
#[derive(Clone)]
pub struct Shoal {
    pool: ConnectionPool,
    catalog: Arc<BucketCatalog>,
    observer: Arc<dyn Observer>,
}

impl Shoal {
    /// Opens a store with default options and the tracing observer.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path, ShoalOptions::default(), Arc::new(TracingObserver))
    }

    /// Opens a store with explicit options and observer.
    pub fn open_with(
        path: impl AsRef<Path>,
        options: ShoalOptions,
        observer: Arc<dyn Observer>,
    ) -> Result<Self> {
        let pool = ConnectionPool::open(path, options.pool)?;
        let conn = pool.checkout()?;
        BucketCatalog::ensure_registry(&conn)?;
        drop(conn);
        Ok(Shoal {
            pool,
            catalog: Arc::new(BucketCatalog::new()),
            observer,
        })
    }

    // ---- bucket administration -------------------------------------------

    /// Creates a bucket from a client index configuration.
    #[instrument(skip(self, config))]
    pub fn create_bucket(&self, name: &str, config: &BucketConfig) -> Result<Bucket> {
        let mut conn = self.pool.checkout()?;
        let tx = conn.transaction()?;
        let bucket = self.catalog.create(&tx, name, config)?;
        tx.commit()?;
        self.catalog.invalidate(name);
        Ok(bucket)
    }

    /// Resolves a bucket's current schema.
    pub fn get_bucket(&self, name: &str) -> Result<Arc<Bucket>> {
        let conn = self.pool.checkout()?;
        self.catalog.resolve(&conn, name)
    }

    /// Replaces a bucket's index configuration, bumping its schema version.
    #[instrument(skip(self, config))]
    pub fn update_bucket(&self, name: &str, config: &BucketConfig) -> Result<Bucket> {
        let mut conn = self.pool.checkout()?;
        let tx = conn.transaction()?;
        let bucket = self.catalog.update(&tx, name, config)?;
        tx.commit()?;
        // The cache entry must outlive the transaction: a resolve racing an
        // in-transaction invalidation would re-cache the old schema and pin
        // it past the commit.
        self.catalog.invalidate(name);
        Ok(bucket)
    }

    /// Deletes a bucket and all of its objects and tombstones.
    #[instrument(skip(self))]
    pub fn delete_bucket(&self, name: &str) -> Result<()> {
        let mut conn = self.pool.checkout()?;
        let tx = conn.transaction()?;
        self.catalog.delete(&tx, name)?;
        tx.commit()?;
        self.catalog.invalidate(name);
        Ok(())
    }

    /// Lists bucket names.
    pub fn list_buckets(&self) -> Result<Vec<String>> {
        let conn = self.pool.checkout()?;
        self.catalog.list(&conn)
    }

    // ---- object operations -----------------------------------------------

    /// Writes an object, creating or replacing it.
    ///
    /// Recomputes projected columns and the etag; clears any tombstone for
    /// the key. With `expected_etag` set, fails with a version conflict
    /// (and without mutating) when the stored etag differs.
    pub fn put_object(
        &self,
        bucket: &str,
        key: &str,
        value: serde_json::Value,
        options: PutOptions,
    ) -> Result<WriteResult> {
        let input = OpInput::Write {
            key: key.to_owned(),
            value,
            expected_etag: options.expected_etag,
        };
        let output = self.run("putobject", bucket, None, input, put::PIPELINE)?;
        let OpOutput::Written(result) = output else {
            unreachable!("put pipeline yields OpOutput::Written");
        };
        Ok(result)
    }

    /// Reads an object by key.
    ///
    /// Distinguishes never-existed (`ObjectNotFound`) from deleted-at-T
    /// (`ResourceGone`).
    pub fn get_object(&self, bucket: &str, key: &str) -> Result<StoredObject> {
        let input = OpInput::Key { key: key.to_owned() };
        let output = self.run("getobject", bucket, None, input, get::PIPELINE)?;
        let OpOutput::Object(object) = output else {
            unreachable!("get pipeline yields OpOutput::Object");
        };
        Ok(object)
    }

    /// Deletes an object by key, recording a tombstone.
    pub fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        let input = OpInput::Key { key: key.to_owned() };
        self.run("delobject", bucket, None, input, del::PIPELINE)?;
        Ok(())
    }

    /// Deletes every object matching the filter; returns the row count.
    pub fn delete_many(&self, bucket: &str, filter: &str) -> Result<u64> {
        let output = self.run(
            "delmany",
            bucket,
            Some(filter.to_owned()),
            OpInput::None,
            del_many::PIPELINE,
        )?;
        let OpOutput::Count(count) = output else {
            unreachable!("delete-many pipeline yields OpOutput::Count");
        };
        Ok(count)
    }

    /// Returns objects matching the filter, in `_id` order.
    pub fn find_objects(&self, bucket: &str, filter: &str) -> Result<Vec<StoredObject>> {
        let output = self.run(
            "findobjects",
            bucket,
            Some(filter.to_owned()),
            OpInput::None,
            find::PIPELINE,
        )?;
        let OpOutput::Records(records) = output else {
            unreachable!("find pipeline yields OpOutput::Records");
        };
        Ok(records)
    }

    /// Runs one operation pipeline inside a fresh transaction.
    fn run(
        &self,
        op: &'static str,
        bucket: &str,
        filter_text: Option<String>,
        input: OpInput,
        segments: &[&[Stage]],
    ) -> Result<OpOutput> {
        let mut conn = self.pool.checkout()?;
        let tx = conn.transaction()?;
        let mut ctx = RequestContext::new(op, &self.catalog, &tx, bucket);
        ctx.filter_text = filter_text;
        ctx.input = input;
        match pipeline::run(segments, &mut ctx, self.observer.as_ref()) {
            Ok(()) => {
                let output = std::mem::replace(&mut ctx.output, OpOutput::None);
                drop(ctx);
                tx.commit()?;
                Ok(output)
            }
            Err(err) => {
                drop(ctx);
                // Rollback failures are subordinate to the stage error.
                let _ = tx.rollback();
                Err(err)
            }
        }
    }
}

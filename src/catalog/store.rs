#![forbid(unsafe_code)]

//! Bucket persistence and the read-mostly schema cache.
//!
//! Bucket configurations live in the `shoal_buckets` registry table; each
//! bucket additionally owns an object table and a tombstone table created at
//! bucket-creation time. Resolved schemas are cached behind a `RwLock` so
//! many in-flight requests can look them up concurrently. Schema mutations
//! here only touch the registry; the caller drops the cache entry via
//! [`BucketCatalog::invalidate`] once the mutation has committed, making the
//! new version visible to subsequently issued requests without a restart.
//! Invalidating before the commit would let a racing `resolve` re-cache the
//! still-committed old schema and pin it past the commit.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use crate::catalog::{Bucket, BucketConfig};
use crate::errors::{Result, ShoalError};

/// Registry table holding one row per bucket.
const REGISTRY_DDL: &str = "CREATE TABLE IF NOT EXISTS shoal_buckets (
    name TEXT PRIMARY KEY,
    index_json TEXT NOT NULL,
    schema_version INTEGER NOT NULL
)";

/// Resolves bucket names to schemas, caching resolved entries.
#[derive(Default)]
pub struct BucketCatalog {
    cache: RwLock<HashMap<String, Arc<Bucket>>>,
}

impl BucketCatalog {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the registry table if missing. Called once per database open.
    pub fn ensure_registry(conn: &Connection) -> Result<()> {
        conn.execute(REGISTRY_DDL, [])?;
        Ok(())
    }

    /// Resolves a bucket name to its schema, from cache when possible.
    pub fn resolve(&self, conn: &Connection, name: &str) -> Result<Arc<Bucket>> {
        if let Some(bucket) = self.cache.read().get(name) {
            return Ok(Arc::clone(bucket));
        }
        let bucket = Arc::new(self.load(conn, name)?);
        self.cache
            .write()
            .insert(name.to_owned(), Arc::clone(&bucket));
        Ok(bucket)
    }

    /// Creates a bucket: registry row, object table, tombstone table.
    pub fn create(&self, conn: &Connection, name: &str, config: &BucketConfig) -> Result<Bucket> {
        let bucket = Bucket::from_config(name, config, 1)?;
        let index_json = serde_json::to_string(config).map_err(invalid_config)?;
        let inserted = conn.execute(
            "INSERT INTO shoal_buckets (name, index_json, schema_version)
                VALUES (?1, ?2, ?3)
                ON CONFLICT(name) DO NOTHING",
            params![bucket.name, index_json, bucket.schema_version],
        )?;
        if inserted == 0 {
            return Err(ShoalError::BucketAlreadyExists {
                bucket: name.to_owned(),
            });
        }
        for stmt in bucket_ddl(&bucket) {
            conn.execute(&stmt, [])?;
        }
        debug!(bucket = %bucket.name, version = bucket.schema_version, "bucket created");
        Ok(bucket)
    }

    /// Replaces a bucket's index configuration, bumping `schema_version`.
    ///
    /// New index fields get columns and indexes added to the object table;
    /// columns for dropped fields are left in place and simply stop being
    /// queryable (the compiler validates fields against the new index map).
    /// The caller must [`invalidate`](Self::invalidate) the cache entry
    /// after the surrounding transaction commits.
    pub fn update(&self, conn: &Connection, name: &str, config: &BucketConfig) -> Result<Bucket> {
        let current = self.load(conn, name)?;
        let next = Bucket::from_config(name, config, current.schema_version + 1)?;
        let index_json = serde_json::to_string(config).map_err(invalid_config)?;
        conn.execute(
            "UPDATE shoal_buckets SET index_json = ?1, schema_version = ?2 WHERE name = ?3",
            params![index_json, next.schema_version, next.name],
        )?;
        let table = next.table();
        for (field, spec) in &next.index {
            if !current.index.contains_key(field) {
                conn.execute(
                    &format!(
                        "ALTER TABLE {table} ADD COLUMN {field} {}",
                        spec.column_type()
                    ),
                    [],
                )?;
            }
            // Index creation is idempotent; uniqueness changes on existing
            // fields take effect by replacing the index.
            if current.index.get(field) != Some(spec) {
                conn.execute(&format!("DROP INDEX IF EXISTS {table}_{field}_idx"), [])?;
            }
            conn.execute(&field_index_ddl(&table, field, spec.unique), [])?;
        }
        debug!(bucket = %next.name, version = next.schema_version, "bucket updated");
        Ok(next)
    }

    /// Deletes a bucket and both of its tables.
    pub fn delete(&self, conn: &Connection, name: &str) -> Result<()> {
        let bucket = self.load(conn, name)?;
        conn.execute(
            "DELETE FROM shoal_buckets WHERE name = ?1",
            params![bucket.name],
        )?;
        conn.execute(&format!("DROP TABLE IF EXISTS {}", bucket.table()), [])?;
        conn.execute(
            &format!("DROP TABLE IF EXISTS {}", bucket.tombstone_table()),
            [],
        )?;
        debug!(bucket = %bucket.name, "bucket deleted");
        Ok(())
    }

    /// Lists bucket names, sorted.
    pub fn list(&self, conn: &Connection) -> Result<Vec<String>> {
        let mut stmt = conn.prepare("SELECT name FROM shoal_buckets ORDER BY name")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(names)
    }

    /// Drops the cache entry for a bucket.
    pub fn invalidate(&self, name: &str) {
        self.cache.write().remove(name);
    }

    fn load(&self, conn: &Connection, name: &str) -> Result<Bucket> {
        let row = conn
            .query_row(
                "SELECT index_json, schema_version FROM shoal_buckets WHERE name = ?1",
                params![name],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, u32>(1)?,
                    ))
                },
            )
            .optional()?;
        let Some((index_json, schema_version)) = row else {
            return Err(ShoalError::BucketNotFound {
                bucket: name.to_owned(),
            });
        };
        let config: BucketConfig = serde_json::from_str(&index_json).map_err(invalid_config)?;
        Bucket::from_config(name, &config, schema_version)
    }
}

fn invalid_config(err: serde_json::Error) -> ShoalError {
    ShoalError::InvalidBucketConfig {
        reason: err.to_string(),
    }
}

fn field_index_ddl(table: &str, field: &str, unique: bool) -> String {
    let uniq = if unique { "UNIQUE " } else { "" };
    format!("CREATE {uniq}INDEX IF NOT EXISTS {table}_{field}_idx ON {table} ({field})")
}

fn bucket_ddl(bucket: &Bucket) -> Vec<String> {
    let table = bucket.table();
    let mut columns = vec![
        "_id INTEGER PRIMARY KEY AUTOINCREMENT".to_owned(),
        "_key TEXT NOT NULL UNIQUE".to_owned(),
        "_value TEXT NOT NULL".to_owned(),
        "_etag TEXT NOT NULL".to_owned(),
        "_mtime INTEGER NOT NULL".to_owned(),
    ];
    for (field, spec) in &bucket.index {
        columns.push(format!("{field} {}", spec.column_type()));
    }
    let mut ddl = vec![format!(
        "CREATE TABLE {table} (\n    {}\n)",
        columns.join(",\n    ")
    )];
    for (field, spec) in &bucket.index {
        ddl.push(field_index_ddl(&table, field, spec.unique));
    }
    ddl.push(format!(
        "CREATE TABLE {} (\n    _key TEXT PRIMARY KEY,\n    _dtime INTEGER NOT NULL\n)",
        bucket.tombstone_table()
    ));
    ddl
}

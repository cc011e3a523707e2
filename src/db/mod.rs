#![forbid(unsafe_code)]

//! Pooled SQLite connections.
//!
//! The pool plays the connection manager's role at its interface boundary:
//! it supplies a live transactional connection per request and takes it back
//! on every exit path, including error and timeout paths, via return-on-drop.
//! Each request owns its connection exclusively for the request's lifetime;
//! concurrent requests never share a transaction.

use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::Connection;
use tracing::trace;

use crate::errors::Result;

/// Pool construction options.
#[derive(Clone, Debug)]
pub struct PoolOptions {
    /// Upper bound on idle connections retained by the pool.
    pub max_idle: usize,
    /// Per-request statement timeout, applied as the connection's busy
    /// timeout. An expired statement fails, aborting the owning pipeline.
    pub busy_timeout: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            max_idle: 8,
            busy_timeout: Duration::from_secs(5),
        }
    }
}

struct PoolInner {
    path: PathBuf,
    options: PoolOptions,
    idle: Mutex<Vec<Connection>>,
}

/// Hands out exclusive per-request connections to one database file.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    /// Opens a pool against a database file, creating it if absent.
    pub fn open(path: impl AsRef<Path>, options: PoolOptions) -> Result<Self> {
        let pool = ConnectionPool {
            inner: Arc::new(PoolInner {
                path: path.as_ref().to_owned(),
                options,
                idle: Mutex::new(Vec::new()),
            }),
        };
        // Open one connection eagerly so pragma/DDL failures surface here
        // rather than on the first request.
        let conn = pool.connect()?;
        pool.put_back(conn);
        Ok(pool)
    }

    /// Checks out a connection for the lifetime of one request.
    pub fn checkout(&self) -> Result<PooledConnection> {
        let reused = self.inner.idle.lock().pop();
        let conn = match reused {
            Some(conn) => conn,
            None => self.connect()?,
        };
        trace!(path = %self.inner.path.display(), "connection checked out");
        Ok(PooledConnection {
            conn: Some(conn),
            pool: Arc::clone(&self.inner),
        })
    }

    fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.inner.path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(self.inner.options.busy_timeout)?;
        Ok(conn)
    }

    fn put_back(&self, conn: Connection) {
        let mut idle = self.inner.idle.lock();
        if idle.len() < self.inner.options.max_idle {
            idle.push(conn);
        }
    }
}

/// A checked-out connection; returns itself to the pool on drop.
pub struct PooledConnection {
    conn: Option<Connection>,
    pool: Arc<PoolInner>,
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn.as_ref().expect("connection present until drop")
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().expect("connection present until drop")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            let mut idle = self.pool.idle.lock();
            if idle.len() < self.pool.options.max_idle {
                idle.push(conn);
            }
            trace!("connection returned to pool");
        }
    }
}

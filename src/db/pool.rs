// src/db/pool.rs
// Async connection pool for the request path (MCP tool handlers).

use std::path::{Path, PathBuf};
use std::time::Duration;

use deadpool_sqlite::{Config, Pool, Runtime};
use rusqlite::Connection;
use tracing::warn;

use crate::db::register_vec_extension;
use crate::error::{LaminarkError, Result};

const MAX_BUSY_RETRIES: u32 = 5;
const RETRY_BASE_DELAY_MS: u64 = 20;

/// Where the pool's connections point.
#[derive(Debug, Clone)]
pub enum DbStorage {
    File(PathBuf),
    Memory,
}

/// A pool of async SQLite connections, each configured with the same
/// pragmas and vector-extension registration as [`crate::db::Database`].
#[derive(Clone)]
pub struct DatabasePool {
    pool: Pool,
    busy_timeout_ms: u64,
}

impl DatabasePool {
    pub fn open(storage: DbStorage, busy_timeout_ms: u64) -> Result<Self> {
        register_vec_extension();

        let mut config = match &storage {
            DbStorage::File(path) => Config::new(path),
            DbStorage::Memory => Config::new(":memory:"),
        };
        config.pool = Some(deadpool_sqlite::PoolConfig::new(8));

        let pool = config
            .create_pool(Runtime::Tokio1)
            .map_err(|e| LaminarkError::StorageUnavailable(e.to_string()))?;

        Ok(Self { pool, busy_timeout_ms })
    }

    /// Acquire a pooled connection and run `f` against it on the blocking
    /// thread pool, retrying with exponential backoff on `SQLITE_BUSY`.
    /// Pragmas are (re-)applied on every acquisition since deadpool-sqlite
    /// does not expose a per-connection post-create hook in the version
    /// used here — cheap relative to a round trip, and idempotent.
    pub async fn interact<F, T>(&self, f: F) -> Result<T>
    where
        F: Fn(&Connection) -> Result<T> + Send + Sync + 'static,
        T: Send + 'static,
    {
        let mut attempt = 0;
        loop {
            let conn = self
                .pool
                .get()
                .await
                .map_err(|e| LaminarkError::StorageUnavailable(e.to_string()))?;
            let f = &f;
            let busy_timeout_ms = self.busy_timeout_ms;
            let result = conn
                .interact(move |conn| {
                    crate::db::Database::apply_pragmas_with_timeout(conn, busy_timeout_ms)?;
                    f(conn)
                })
                .await
                .map_err(|e| LaminarkError::StorageUnavailable(e.to_string()))?;

            match result {
                Ok(value) => return Ok(value),
                Err(LaminarkError::Db(e)) if crate::error::is_busy(&e) && attempt < MAX_BUSY_RETRIES => {
                    attempt += 1;
                    let delay = RETRY_BASE_DELAY_MS * 2u64.pow(attempt);
                    warn!(attempt, delay_ms = delay, "database busy, retrying");
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Resolve the per-project database path beneath a root data directory.
pub fn project_db_path(root: &Path, project_hash: &str) -> PathBuf {
    root.join(format!("{project_hash}.db"))
}

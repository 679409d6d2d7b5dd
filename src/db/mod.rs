// src/db/mod.rs
// Storage layer: schema, migrations and per-entity repositories.
//
// Two connection shapes are used side by side, mirroring the split the
// teacher draws between its synchronous `Database` (migrations, the
// background worker) and its async `DatabasePool` (the request path):
// `Database` owns a single `rusqlite::Connection` behind a `Mutex` and is
// used where a single long-lived connection is natural; `DatabasePool`
// hands out pooled connections to async callers via `deadpool-sqlite`.

pub mod graph;
pub mod migration_helpers;
pub mod notifications;
pub mod observations;
pub mod pool;
pub mod schema;
pub mod sessions;
pub mod stashes;
pub mod topic_state;

#[cfg(test)]
pub mod test_support;

use std::path::Path;
use std::sync::{Arc, Mutex, Once};

use anyhow::Context;
use rusqlite::Connection;
use tracing::{info, warn};

use crate::error::Result;

static VEC_EXTENSION_INIT: Once = Once::new();

/// Register the `sqlite-vec` extension as an auto-extension so every
/// subsequently opened connection (pooled or direct) gains `vec0` support.
/// Safe to call repeatedly; the registration only happens once per process.
pub fn register_vec_extension() {
    VEC_EXTENSION_INIT.call_once(|| unsafe {
        let init_fn = sqlite_vec::sqlite3_vec_init as *const ();
        let rc = rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute::<
            *const (),
            unsafe extern "C" fn(),
        >(init_fn)));
        if rc != 0 {
            warn!(code = rc, "failed to register sqlite-vec auto-extension");
        } else {
            info!("sqlite-vec auto-extension registered");
        }
    });
}

/// A synchronous handle to a single SQLite connection, guarded by a mutex.
/// Used for schema migration at startup and by the background embedding
/// worker, both of which are naturally single-threaded with respect to the
/// database.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    has_vector_support: bool,
}

impl Database {
    /// Open (creating if absent) the database file at `path`, apply
    /// pragmas, run migrations, and report vector-search capability.
    pub fn open(path: &Path) -> Result<Self> {
        register_vec_extension();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating database directory {}", parent.display()))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("opening database at {}", path.display()))?;
        Self::apply_pragmas(&conn)?;
        schema::run_all(&conn).context("running schema migrations")?;

        #[cfg(unix)]
        Self::restrict_permissions(path)?;

        let has_vector_support = schema::has_vector_support(&conn);
        if !has_vector_support {
            warn!("vector search unavailable on this build; falling back to keyword-only search");
        }

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            has_vector_support,
        })
    }

    /// Open a private in-memory database — used by tests and by `open_ephemeral`.
    pub fn open_in_memory() -> Result<Self> {
        register_vec_extension();
        let conn = Connection::open_in_memory()?;
        Self::apply_pragmas(&conn)?;
        schema::run_all(&conn)?;
        let has_vector_support = schema::has_vector_support(&conn);
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            has_vector_support,
        })
    }

    pub(crate) fn apply_pragmas(conn: &Connection) -> Result<()> {
        Self::apply_pragmas_with_timeout(conn, 5_000)
    }

    /// Same as [`Self::apply_pragmas`] but with a caller-supplied busy
    /// timeout, so `busyTimeout` (config/env) actually reaches the engine
    /// instead of always falling back to the 5s default.
    pub(crate) fn apply_pragmas_with_timeout(conn: &Connection, busy_timeout_ms: u64) -> Result<()> {
        conn.execute_batch(&format!(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = {busy_timeout_ms};"
        ))?;
        Ok(())
    }

    #[cfg(unix)]
    fn restrict_permissions(path: &Path) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(path, perms)
            .with_context(|| format!("restricting permissions on {}", path.display()))?;
        Ok(())
    }

    pub fn has_vector_support(&self) -> bool {
        self.has_vector_support
    }

    /// Run a closure against the underlying connection, holding the lock
    /// for the duration. Callers should keep the closure short — this is a
    /// single shared connection.
    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn.lock().expect("database mutex poisoned");
        f(&conn)
    }

    /// Force the WAL back into the main database file. Called on graceful
    /// shutdown so a restart doesn't have to replay the journal.
    pub fn checkpoint(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_in_memory_runs_migrations() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT count(*) FROM schema_migrations",
                [],
                |row| row.get(0),
            )?;
            assert!(count >= 3);
            Ok(())
        })
        .unwrap();
    }
}

// src/db/schema/mod.rs
// Schema registry: an ordered sequence of migrations, each idempotent and
// applied in a single transaction. Versions are global and monotonic —
// once assigned, a version number is never reused even if the migration it
// named is later dropped.

mod graph;
mod memory;
mod session;
mod vectors;

pub use vectors::{has_vector_support, EMBEDDING_DIM};

use anyhow::Result;
use rusqlite::Connection;

use crate::db::migration_helpers::{migration_applied, record_migration};

/// Ensure the migration registry table itself exists.
fn ensure_registry(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY,
            name        TEXT NOT NULL,
            applied_at  TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        );",
    )?;
    Ok(())
}

type MigrationFn = fn(&Connection) -> Result<()>;

/// The ordered migration list. Append-only: new entries go at the end with
/// the next free version number.
fn migrations() -> Vec<(i64, &'static str, MigrationFn)> {
    vec![
        (1, "observations", memory::migrate as MigrationFn),
        (2, "sessions_and_stashes", session::migrate as MigrationFn),
        (3, "graph", graph::migrate as MigrationFn),
        (4, "vectors", vectors::migrate as MigrationFn),
    ]
}

/// Run every unapplied migration, in order, recording each as applied.
pub fn run_all(conn: &Connection) -> Result<()> {
    ensure_registry(conn)?;
    for (version, name, func) in migrations() {
        if migration_applied(conn, version) {
            continue;
        }
        func(conn)?;
        record_migration(conn, version, name)?;
    }
    Ok(())
}

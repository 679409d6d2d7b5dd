// src/db/schema/vectors.rs
// Vector search storage (sqlite-vec, capability-gated) and the topic-shift
// detector's persisted state.

use anyhow::Result;
use rusqlite::Connection;
use tracing::warn;

pub const EMBEDDING_DIM: usize = 768;

const TOPIC_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS threshold_history (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    project_hash  TEXT NOT NULL,
    session_id    TEXT NOT NULL,
    mean_distance REAL NOT NULL,
    variance      REAL NOT NULL,
    threshold     REAL NOT NULL,
    created_at    TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_threshold_history_project_session
    ON threshold_history (project_hash, session_id, id DESC);

CREATE TABLE IF NOT EXISTS shift_decisions (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    project_hash TEXT NOT NULL,
    session_id   TEXT NOT NULL,
    distance     REAL NOT NULL,
    threshold    REAL NOT NULL,
    shifted      INTEGER NOT NULL,
    confidence   REAL NOT NULL,
    created_at   TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_shift_decisions_session
    ON shift_decisions (project_hash, session_id, id DESC);
";

pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(TOPIC_SCHEMA)?;

    let sql = format!(
        "CREATE VIRTUAL TABLE IF NOT EXISTS vec_observations USING vec0(
            observation_id TEXT PRIMARY KEY,
            embedding FLOAT[{EMBEDDING_DIM}]
        );"
    );
    if let Err(e) = conn.execute_batch(&sql) {
        warn!(error = %e, "sqlite-vec virtual table unavailable, vector search disabled");
    }
    Ok(())
}

/// Whether the `vec_observations` virtual table is present and usable.
pub fn has_vector_support(conn: &Connection) -> bool {
    conn.query_row(
        "SELECT 1 FROM sqlite_master WHERE name = 'vec_observations'",
        [],
        |_| Ok(true),
    )
    .unwrap_or(false)
}

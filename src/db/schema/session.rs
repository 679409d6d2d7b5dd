// src/db/schema/session.rs
// Sessions and context stashes.

use anyhow::Result;
use rusqlite::Connection;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS sessions (
    id           TEXT PRIMARY KEY,
    project_hash TEXT NOT NULL,
    started_at   TEXT NOT NULL,
    ended_at     TEXT,
    summary      TEXT
);

CREATE INDEX IF NOT EXISTS idx_sessions_project_started
    ON sessions (project_hash, started_at DESC);

CREATE INDEX IF NOT EXISTS idx_sessions_active
    ON sessions (project_hash)
    WHERE ended_at IS NULL;

CREATE TABLE IF NOT EXISTS context_stashes (
    id                  TEXT PRIMARY KEY,
    project_hash        TEXT NOT NULL,
    session_id          TEXT NOT NULL,
    topic_label         TEXT,
    summary             TEXT NOT NULL,
    observation_ids      TEXT NOT NULL DEFAULT '[]',
    observation_snapshots TEXT NOT NULL DEFAULT '[]',
    status              TEXT NOT NULL DEFAULT 'stashed',
    created_at          TEXT NOT NULL,
    resumed_at          TEXT
);

CREATE INDEX IF NOT EXISTS idx_stashes_project_created
    ON context_stashes (project_hash, created_at DESC);
";

pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

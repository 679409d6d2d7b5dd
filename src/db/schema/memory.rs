// src/db/schema/memory.rs
// Observations: the atomic unit of stored memory, plus the FTS5 shadow
// index kept in sync via triggers.

use anyhow::Result;
use rusqlite::Connection;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS observations (
    id               TEXT PRIMARY KEY,
    project_hash     TEXT NOT NULL,
    session_id       TEXT,
    kind             TEXT NOT NULL DEFAULT 'finding',
    title            TEXT,
    content          TEXT NOT NULL,
    source           TEXT NOT NULL DEFAULT 'host',
    embedding        BLOB,
    embedding_model  TEXT,
    embedding_version TEXT,
    created_at       TEXT NOT NULL,
    updated_at       TEXT NOT NULL,
    deleted_at       TEXT
);

CREATE INDEX IF NOT EXISTS idx_observations_project_created
    ON observations (project_hash, created_at DESC, rowid DESC);

CREATE INDEX IF NOT EXISTS idx_observations_session
    ON observations (session_id);

CREATE INDEX IF NOT EXISTS idx_observations_pending_embedding
    ON observations (embedding_model)
    WHERE embedding_model IS NULL AND deleted_at IS NULL;

CREATE VIRTUAL TABLE IF NOT EXISTS observations_fts USING fts5(
    title,
    content,
    content = 'observations',
    content_rowid = 'rowid',
    tokenize = 'porter unicode61 remove_diacritics 1'
);

CREATE TRIGGER IF NOT EXISTS observations_fts_insert AFTER INSERT ON observations BEGIN
    INSERT INTO observations_fts(rowid, title, content)
    VALUES (new.rowid, new.title, new.content);
END;

CREATE TRIGGER IF NOT EXISTS observations_fts_delete AFTER DELETE ON observations BEGIN
    INSERT INTO observations_fts(observations_fts, rowid, title, content)
    VALUES ('delete', old.rowid, old.title, old.content);
END;

CREATE TRIGGER IF NOT EXISTS observations_fts_update AFTER UPDATE ON observations BEGIN
    INSERT INTO observations_fts(observations_fts, rowid, title, content)
    VALUES ('delete', old.rowid, old.title, old.content);
    INSERT INTO observations_fts(rowid, title, content)
    VALUES (new.rowid, new.title, new.content);
END;

CREATE TABLE IF NOT EXISTS notifications (
    id           TEXT PRIMARY KEY,
    project_hash TEXT NOT NULL,
    message      TEXT NOT NULL,
    created_at   TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_notifications_project
    ON notifications (project_hash, created_at ASC);
";

pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

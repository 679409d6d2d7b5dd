// src/db/sessions.rs
// Session repository.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::ids::new_id;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub project_hash: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub summary: Option<String>,
}

impl Session {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            project_hash: row.get("project_hash")?,
            started_at: row.get("started_at")?,
            ended_at: row.get("ended_at")?,
            summary: row.get("summary")?,
        })
    }
}

pub fn create(conn: &Connection, project_hash: &str) -> Result<Session> {
    let id = new_id();
    let now = Utc::now();
    conn.execute(
        "INSERT INTO sessions (id, project_hash, started_at) VALUES (?1, ?2, ?3)",
        params![id, project_hash, now],
    )?;
    Ok(Session {
        id,
        project_hash: project_hash.to_string(),
        started_at: now,
        ended_at: None,
        summary: None,
    })
}

/// Close a session, recording its compressed summary. Returns the updated
/// session, or `None` if `id` doesn't exist (§4.2: `end(id, summary?) →
/// Session | null`).
pub fn end(conn: &Connection, id: &str, summary: Option<&str>) -> Result<Option<Session>> {
    conn.execute(
        "UPDATE sessions SET ended_at = ?2, summary = ?3 WHERE id = ?1",
        params![id, Utc::now(), summary],
    )?;
    get_by_id(conn, id)
}

pub fn get_by_id(conn: &Connection, id: &str) -> Result<Option<Session>> {
    conn.query_row("SELECT * FROM sessions WHERE id = ?1", [id], Session::from_row)
        .optional()
        .map_err(Into::into)
}

/// The currently open session for a project, if any (there should be at
/// most one per project at a time, enforced at the application layer).
pub fn get_active(conn: &Connection, project_hash: &str) -> Result<Option<Session>> {
    conn.query_row(
        "SELECT * FROM sessions
         WHERE project_hash = ?1 AND ended_at IS NULL
         ORDER BY started_at DESC LIMIT 1",
        [project_hash],
        Session::from_row,
    )
    .optional()
    .map_err(Into::into)
}

pub fn get_latest(conn: &Connection, project_hash: &str) -> Result<Option<Session>> {
    conn.query_row(
        "SELECT * FROM sessions
         WHERE project_hash = ?1
         ORDER BY started_at DESC LIMIT 1",
        [project_hash],
        Session::from_row,
    )
    .optional()
    .map_err(Into::into)
}

// src/db/stashes.rs
// Context stash repository: snapshot-and-park a working set
// of observations under a topic label, to be resumed later.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::db::observations::Observation;
use crate::error::{LaminarkError, Result};
use crate::ids::new_id;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextStash {
    pub id: String,
    pub project_hash: String,
    pub session_id: String,
    pub topic_label: Option<String>,
    pub summary: String,
    pub observation_ids: Vec<String>,
    pub observation_snapshots: Vec<Observation>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub resumed_at: Option<DateTime<Utc>>,
}

impl ContextStash {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let ids_json: String = row.get("observation_ids")?;
        let snapshots_json: String = row.get("observation_snapshots")?;
        Ok(Self {
            id: row.get("id")?,
            project_hash: row.get("project_hash")?,
            session_id: row.get("session_id")?,
            topic_label: row.get("topic_label")?,
            summary: row.get("summary")?,
            observation_ids: serde_json::from_str(&ids_json).unwrap_or_default(),
            observation_snapshots: serde_json::from_str(&snapshots_json).unwrap_or_default(),
            status: row.get("status")?,
            created_at: row.get("created_at")?,
            resumed_at: row.get("resumed_at")?,
        })
    }
}

pub fn create_stash(
    conn: &Connection,
    project_hash: &str,
    session_id: &str,
    topic_label: Option<&str>,
    summary: &str,
    observations: &[Observation],
) -> Result<ContextStash> {
    let id = new_id();
    let now = Utc::now();
    let observation_ids: Vec<String> = observations.iter().map(|o| o.id.clone()).collect();
    let ids_json = serde_json::to_string(&observation_ids)?;
    let snapshots_json = serde_json::to_string(observations)?;
    conn.execute(
        "INSERT INTO context_stashes
            (id, project_hash, session_id, topic_label, summary,
             observation_ids, observation_snapshots, status, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'stashed', ?8)",
        params![
            id,
            project_hash,
            session_id,
            topic_label,
            summary,
            ids_json,
            snapshots_json,
            now,
        ],
    )?;
    Ok(ContextStash {
        id,
        project_hash: project_hash.to_string(),
        session_id: session_id.to_string(),
        topic_label: topic_label.map(str::to_string),
        summary: summary.to_string(),
        observation_ids,
        observation_snapshots: observations.to_vec(),
        status: "stashed".to_string(),
        created_at: now,
        resumed_at: None,
    })
}

pub fn list_stashes(
    conn: &Connection,
    project_hash: &str,
    session_id: Option<&str>,
    limit: Option<usize>,
) -> Result<Vec<ContextStash>> {
    let limit = limit.unwrap_or(usize::MAX) as i64;
    let rows = match session_id {
        Some(session_id) => {
            let mut stmt = conn.prepare(
                "SELECT * FROM context_stashes
                 WHERE project_hash = ?1 AND session_id = ?2
                 ORDER BY created_at DESC LIMIT ?3",
            )?;
            stmt.query_map(params![project_hash, session_id, limit], ContextStash::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?
        }
        None => {
            let mut stmt = conn.prepare(
                "SELECT * FROM context_stashes
                 WHERE project_hash = ?1
                 ORDER BY created_at DESC LIMIT ?2",
            )?;
            stmt.query_map(params![project_hash, limit], ContextStash::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?
        }
    };
    Ok(rows)
}

pub fn get_stash(conn: &Connection, id: &str) -> Result<Option<ContextStash>> {
    conn.query_row(
        "SELECT * FROM context_stashes WHERE id = ?1",
        [id],
        ContextStash::from_row,
    )
    .optional()
    .map_err(Into::into)
}

/// Mark a stash resumed. Fails with `NotFound` if it doesn't exist
/// (§4.2). Returns the updated stash.
pub fn resume_stash(conn: &Connection, id: &str) -> Result<ContextStash> {
    let updated = conn.execute(
        "UPDATE context_stashes SET status = 'resumed', resumed_at = ?2 WHERE id = ?1",
        params![id, Utc::now()],
    )?;
    if updated == 0 {
        return Err(LaminarkError::NotFound);
    }
    get_stash(conn, id)?.ok_or(LaminarkError::NotFound)
}

pub fn delete_stash(conn: &Connection, id: &str) -> Result<()> {
    let deleted = conn.execute("DELETE FROM context_stashes WHERE id = ?1", [id])?;
    if deleted == 0 {
        return Err(LaminarkError::NotFound);
    }
    Ok(())
}

pub fn get_recent_stashes(
    conn: &Connection,
    project_hash: &str,
    limit: usize,
) -> Result<Vec<ContextStash>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM context_stashes
         WHERE project_hash = ?1 AND status = 'stashed'
         ORDER BY created_at DESC LIMIT ?2",
    )?;
    let rows = stmt
        .query_map(params![project_hash, limit], ContextStash::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::memory_conn;

    #[test]
    fn create_list_and_resume() {
        let conn = memory_conn();
        let stash = create_stash(&conn, "proj-a", "sess-1", Some("auth refactor"), "summary", &[])
            .unwrap();
        let stashes = list_stashes(&conn, "proj-a", None, None).unwrap();
        assert_eq!(stashes.len(), 1);
        assert_eq!(stashes[0].status, "stashed");

        let resumed = resume_stash(&conn, &stash.id).unwrap();
        assert_eq!(resumed.status, "resumed");
        assert!(resumed.resumed_at.is_some());
    }

    #[test]
    fn list_stashes_filters_by_session_and_limit() {
        let conn = memory_conn();
        create_stash(&conn, "proj-a", "sess-1", None, "first", &[]).unwrap();
        create_stash(&conn, "proj-a", "sess-2", None, "second", &[]).unwrap();
        create_stash(&conn, "proj-a", "sess-1", None, "third", &[]).unwrap();

        let sess1_only = list_stashes(&conn, "proj-a", Some("sess-1"), None).unwrap();
        assert_eq!(sess1_only.len(), 2);
        assert!(sess1_only.iter().all(|s| s.session_id == "sess-1"));

        let limited = list_stashes(&conn, "proj-a", None, Some(1)).unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].summary, "third");
    }

    #[test]
    fn resume_missing_stash_returns_not_found() {
        let conn = memory_conn();
        let err = resume_stash(&conn, "missing-id").unwrap_err();
        assert!(matches!(err, LaminarkError::NotFound));
    }

    #[test]
    fn delete_missing_stash_returns_not_found() {
        let conn = memory_conn();
        let err = delete_stash(&conn, "missing-id").unwrap_err();
        assert!(matches!(err, LaminarkError::NotFound));
    }

    #[test]
    fn recent_stashes_excludes_resumed() {
        let conn = memory_conn();
        let stash = create_stash(&conn, "proj-a", "sess-1", None, "summary", &[]).unwrap();
        resume_stash(&conn, &stash.id).unwrap();
        let recent = get_recent_stashes(&conn, "proj-a", 10).unwrap();
        assert!(recent.is_empty());
    }
}

// src/db/topic_state.rs
// Persisted state for the adaptive topic-shift detector:
// rolling mean/variance samples and a log of each shift decision made.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use crate::error::Result;

#[derive(Debug, Clone, Serialize)]
pub struct ThresholdSample {
    pub mean_distance: f64,
    pub variance: f64,
    pub threshold: f64,
    pub created_at: DateTime<Utc>,
}

impl ThresholdSample {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            mean_distance: row.get("mean_distance")?,
            variance: row.get("variance")?,
            threshold: row.get("threshold")?,
            created_at: row.get("created_at")?,
        })
    }
}

pub fn record_sample(
    conn: &Connection,
    project_hash: &str,
    session_id: &str,
    mean_distance: f64,
    variance: f64,
    threshold: f64,
) -> Result<()> {
    conn.execute(
        "INSERT INTO threshold_history
            (project_hash, session_id, mean_distance, variance, threshold, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![project_hash, session_id, mean_distance, variance, threshold, Utc::now()],
    )?;
    Ok(())
}

/// The most recent samples for a project, newest first — used to seed the
/// EWMA state for a fresh session (cold-start).
pub fn recent_samples(
    conn: &Connection,
    project_hash: &str,
    limit: usize,
) -> Result<Vec<ThresholdSample>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM threshold_history WHERE project_hash = ?1 ORDER BY id DESC LIMIT ?2",
    )?;
    let rows = stmt
        .query_map(params![project_hash, limit], ThresholdSample::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// The most recent samples for one session, newest first — used by the
/// `topic_context` tool to report a specific session's detector state
/// rather than whatever session last wrote to the project.
pub fn session_samples(
    conn: &Connection,
    project_hash: &str,
    session_id: &str,
    limit: usize,
) -> Result<Vec<ThresholdSample>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM threshold_history
         WHERE project_hash = ?1 AND session_id = ?2
         ORDER BY id DESC LIMIT ?3",
    )?;
    let rows = stmt
        .query_map(params![project_hash, session_id, limit], ThresholdSample::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn record_decision(
    conn: &Connection,
    project_hash: &str,
    session_id: &str,
    distance: f64,
    threshold: f64,
    shifted: bool,
    confidence: f64,
) -> Result<()> {
    conn.execute(
        "INSERT INTO shift_decisions
            (project_hash, session_id, distance, threshold, shifted, confidence, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            project_hash,
            session_id,
            distance,
            threshold,
            shifted as i64,
            confidence,
            Utc::now(),
        ],
    )?;
    Ok(())
}

/// When the session's last *shifted* decision was recorded, if any — the
/// boundary a new stash's observation snapshot should start from. `None`
/// means stash back to session start.
pub fn last_shift_at(
    conn: &Connection,
    project_hash: &str,
    session_id: &str,
) -> Result<Option<DateTime<Utc>>> {
    conn.query_row(
        "SELECT created_at FROM shift_decisions
         WHERE project_hash = ?1 AND session_id = ?2 AND shifted = 1
         ORDER BY id DESC LIMIT 1",
        params![project_hash, session_id],
        |row| row.get(0),
    )
    .optional()
    .map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::memory_conn;

    #[test]
    fn samples_are_returned_newest_first() {
        let conn = memory_conn();
        record_sample(&conn, "proj-a", "sess-1", 0.2, 0.01, 0.3).unwrap();
        record_sample(&conn, "proj-a", "sess-1", 0.25, 0.02, 0.32).unwrap();
        let samples = recent_samples(&conn, "proj-a", 10).unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].mean_distance, 0.25);
    }

    #[test]
    fn session_samples_ignores_other_sessions_in_the_same_project() {
        let conn = memory_conn();
        record_sample(&conn, "proj-a", "sess-1", 0.2, 0.01, 0.3).unwrap();
        record_sample(&conn, "proj-a", "sess-2", 0.9, 0.05, 0.5).unwrap();
        let samples = session_samples(&conn, "proj-a", "sess-1", 10).unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].mean_distance, 0.2);
    }

    #[test]
    fn last_shift_at_ignores_non_shifted_decisions() {
        let conn = memory_conn();
        assert!(last_shift_at(&conn, "proj-a", "sess-1").unwrap().is_none());
        record_decision(&conn, "proj-a", "sess-1", 0.1, 0.3, false, 0.2).unwrap();
        assert!(last_shift_at(&conn, "proj-a", "sess-1").unwrap().is_none());
        record_decision(&conn, "proj-a", "sess-1", 0.9, 0.3, true, 0.8).unwrap();
        assert!(last_shift_at(&conn, "proj-a", "sess-1").unwrap().is_some());
    }
}

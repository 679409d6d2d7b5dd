// src/context/mod.rs
// Session-open digest and notification piggybacking.

use rusqlite::Connection;
use serde::Serialize;

use crate::db::observations::{self, Observation};
use crate::db::{notifications, sessions, stashes};
use crate::error::Result;

const RECENT_OBSERVATIONS_COUNT: usize = 5;

#[derive(Debug, Clone, Serialize)]
pub struct SessionDigest {
    pub session_id: String,
    pub previous_summary: Option<String>,
    pub recent_observations: Vec<Observation>,
    pub active_stash_count: usize,
}

/// Open (or resume) the project's session and assemble the digest shown
/// to the host at session start: budgeted to be cheap, since this runs on
/// every session open rather than on demand.
pub fn open_session(conn: &Connection, project_hash: &str) -> Result<SessionDigest> {
    let session = match sessions::get_active(conn, project_hash)? {
        Some(existing) => existing,
        None => sessions::create(conn, project_hash)?,
    };

    let previous_summary = sessions::get_latest(conn, project_hash)?
        .filter(|s| s.id != session.id)
        .and_then(|s| s.summary);

    let filter = observations::ListFilter {
        kinds: vec!["decision".to_string(), "change".to_string()],
        ..observations::ListFilter::default()
    };
    let recent_observations = observations::list_filtered(
        conn,
        &[project_hash.to_string()],
        &filter,
        RECENT_OBSERVATIONS_COUNT,
        0,
    )?;

    let active_stash_count = stashes::get_recent_stashes(conn, project_hash, usize::MAX)?.len();

    Ok(SessionDigest {
        session_id: session.id,
        previous_summary,
        recent_observations,
        active_stash_count,
    })
}

/// Render a digest as the plain text prepended to the host's session
/// prompt.
pub fn format_digest(digest: &SessionDigest) -> String {
    let mut out = String::new();
    if let Some(summary) = &digest.previous_summary {
        out.push_str("last session: ");
        out.push_str(summary);
        out.push('\n');
    }
    if !digest.recent_observations.is_empty() {
        out.push_str("recent:\n");
        for obs in &digest.recent_observations {
            let title = obs.title.as_deref().unwrap_or("(untitled)");
            out.push_str(&format!("- [{}] {} ({})\n", obs.kind, title, obs.id));
        }
    }
    out.push_str(&format!("active stashes: {}\n", digest.active_stash_count));
    out
}

/// Prepend any pending notifications to a tool response body, consuming
/// them in the process. Every retrieval-style tool handler routes its
/// output through this before returning to the host.
pub fn with_notifications(conn: &Connection, project_hash: &str, body: String) -> Result<String> {
    let pending = notifications::consume_pending(conn, project_hash)?;
    if pending.is_empty() {
        return Ok(body);
    }
    let mut out = String::new();
    for message in pending {
        out.push_str(&format!("[Laminark] {message}\n"));
    }
    out.push('\n');
    out.push_str(&body);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::memory_conn;

    #[test]
    fn opening_session_twice_reuses_the_active_one() {
        let conn = memory_conn();
        let first = open_session(&conn, "proj-a").unwrap();
        let second = open_session(&conn, "proj-a").unwrap();
        assert_eq!(first.session_id, second.session_id);
    }

    #[test]
    fn notifications_are_prepended_and_consumed_once() {
        let conn = memory_conn();
        notifications::add(&conn, "proj-a", "heads up").unwrap();
        let body = with_notifications(&conn, "proj-a", "result body".to_string()).unwrap();
        assert_eq!(body, "[Laminark] heads up\n\nresult body");
        let body_again = with_notifications(&conn, "proj-a", "result body".to_string()).unwrap();
        assert_eq!(body_again, "result body");
    }
}

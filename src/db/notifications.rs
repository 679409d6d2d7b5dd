// src/db/notifications.rs
// Notification piggybacking: short messages queued for a
// project and delivered — exactly once — on the next tool response.

use chrono::Utc;
use rusqlite::{params, Connection};

use crate::error::Result;
use crate::ids::new_id;

pub fn add(conn: &Connection, project_hash: &str, message: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO notifications (id, project_hash, message, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![new_id(), project_hash, message, Utc::now()],
    )?;
    Ok(())
}

/// Atomically fetch and delete every pending notification for a project,
/// oldest first. A notification is delivered at most once: a crash between
/// the delete and the caller using the result loses it rather than
/// redelivering a stale message.
pub fn consume_pending(conn: &Connection, project_hash: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT id, message FROM notifications WHERE project_hash = ?1 ORDER BY created_at ASC",
    )?;
    let rows: Vec<(String, String)> = stmt
        .query_map([project_hash], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    if rows.is_empty() {
        return Ok(Vec::new());
    }

    let placeholders = rows.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
    let sql = format!("DELETE FROM notifications WHERE id IN ({placeholders})");
    let ids: Vec<&str> = rows.iter().map(|(id, _)| id.as_str()).collect();
    let mut del_stmt = conn.prepare(&sql)?;
    let params: Vec<&dyn rusqlite::ToSql> = ids.iter().map(|i| i as &dyn rusqlite::ToSql).collect();
    del_stmt.execute(params.as_slice())?;

    Ok(rows.into_iter().map(|(_, msg)| msg).collect())
}

// src/db/observations.rs
// Observation repository: the atomic unit of stored memory.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::Result;
use crate::ids::new_id;

/// The observation taxonomy: every stored memory is one of these kinds.
/// `save_memory` validates caller-supplied kinds against this set and
/// defaults to `Finding` when the caller doesn't specify one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ObservationKind {
    Change,
    Reference,
    Finding,
    Decision,
    Verification,
}

impl Default for ObservationKind {
    fn default() -> Self {
        ObservationKind::Finding
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub id: String,
    pub project_hash: String,
    pub session_id: Option<String>,
    pub kind: String,
    pub title: Option<String>,
    pub content: String,
    pub source: String,
    #[serde(skip_serializing)]
    pub embedding: Option<Vec<u8>>,
    pub embedding_model: Option<String>,
    pub embedding_version: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Observation {
    pub(crate) fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            project_hash: row.get("project_hash")?,
            session_id: row.get("session_id")?,
            kind: row.get("kind")?,
            title: row.get("title")?,
            content: row.get("content")?,
            source: row.get("source")?,
            embedding: row.get("embedding")?,
            embedding_model: row.get("embedding_model")?,
            embedding_version: row.get("embedding_version")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            deleted_at: row.get("deleted_at")?,
        })
    }
}

/// Fields accepted when creating a new observation.
pub struct NewObservation {
    pub project_hash: String,
    pub session_id: Option<String>,
    pub kind: String,
    pub title: Option<String>,
    pub content: String,
    pub source: String,
}

/// Auto-generate a title from the first sentence, or the first 80
/// characters if no sentence boundary is found within that window
///.
pub fn derive_title(content: &str) -> Option<String> {
    const MAX_LEN: usize = 200;
    const FALLBACK_LEN: usize = 80;
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return None;
    }
    let sentence_end = trimmed.find(['.', '!', '?', '\n']);
    let candidate = match sentence_end {
        Some(idx) if idx > 0 => &trimmed[..idx],
        _ => {
            let cut = trimmed
                .char_indices()
                .nth(FALLBACK_LEN)
                .map(|(idx, _)| idx)
                .unwrap_or(trimmed.len());
            &trimmed[..cut]
        }
    };
    let mut title = candidate.trim().to_string();
    if title.chars().count() > MAX_LEN {
        title = title.chars().take(MAX_LEN).collect();
    }
    if title.is_empty() {
        None
    } else {
        Some(title)
    }
}

pub fn create(conn: &Connection, new: NewObservation) -> Result<Observation> {
    let id = new_id();
    let now = Utc::now();
    let title = new.title.or_else(|| derive_title(&new.content));
    conn.execute(
        "INSERT INTO observations
            (id, project_hash, session_id, kind, title, content, source, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
        params![
            id,
            new.project_hash,
            new.session_id,
            new.kind,
            title,
            new.content,
            new.source,
            now,
        ],
    )?;
    get_by_id(conn, &id)?.ok_or_else(|| crate::error::LaminarkError::Other(
        "observation vanished immediately after insert".to_string(),
    ))
}

pub fn get_by_id(conn: &Connection, id: &str) -> Result<Option<Observation>> {
    conn.query_row(
        "SELECT * FROM observations WHERE id = ?1 AND deleted_at IS NULL",
        [id],
        Observation::from_row,
    )
    .optional()
    .map_err(Into::into)
}

pub fn get_by_id_including_deleted(conn: &Connection, id: &str) -> Result<Option<Observation>> {
    conn.query_row(
        "SELECT * FROM observations WHERE id = ?1",
        [id],
        Observation::from_row,
    )
    .optional()
    .map_err(Into::into)
}

pub fn get_by_title(
    conn: &Connection,
    project_hash: &str,
    title: &str,
) -> Result<Option<Observation>> {
    conn.query_row(
        "SELECT * FROM observations
         WHERE project_hash = ?1 AND title = ?2 AND deleted_at IS NULL
         ORDER BY created_at DESC LIMIT 1",
        params![project_hash, title],
        Observation::from_row,
    )
    .optional()
    .map_err(Into::into)
}

/// Title lookup by substring, case-insensitive, most recent first — used
/// by `recall` when the host supplies `title` instead of a query.
pub fn search_by_title(
    conn: &Connection,
    project_hash: &str,
    pattern: &str,
    limit: usize,
) -> Result<Vec<Observation>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM observations
         WHERE project_hash = ?1 AND title LIKE ?2 COLLATE NOCASE AND deleted_at IS NULL
         ORDER BY created_at DESC, rowid DESC
         LIMIT ?3",
    )?;
    let rows = stmt
        .query_map(params![project_hash, format!("%{pattern}%"), limit], Observation::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn list(
    conn: &Connection,
    project_hashes: &[String],
    limit: usize,
    offset: usize,
) -> Result<Vec<Observation>> {
    list_impl(conn, project_hashes, limit, offset, false)
}

pub fn list_including_deleted(
    conn: &Connection,
    project_hashes: &[String],
    limit: usize,
    offset: usize,
) -> Result<Vec<Observation>> {
    list_impl(conn, project_hashes, limit, offset, true)
}

fn list_impl(
    conn: &Connection,
    project_hashes: &[String],
    limit: usize,
    offset: usize,
    include_deleted: bool,
) -> Result<Vec<Observation>> {
    list_filtered(
        conn,
        project_hashes,
        &ListFilter { include_deleted, ..ListFilter::default() },
        limit,
        offset,
    )
}

/// Optional filters for `list_filtered`, mirroring `list`'s options
/// (`sessionId`, `kinds`, `sources`, `createdAfter`, `createdBefore`),
/// beyond the always-applied project scope and soft-delete default.
#[derive(Debug, Default, Clone)]
pub struct ListFilter {
    pub session_id: Option<String>,
    pub kinds: Vec<String>,
    pub sources: Vec<String>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub include_deleted: bool,
}

pub fn list_filtered(
    conn: &Connection,
    project_hashes: &[String],
    filter: &ListFilter,
    limit: usize,
    offset: usize,
) -> Result<Vec<Observation>> {
    if project_hashes.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders = project_hashes.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
    let mut clauses = vec![format!("project_hash IN ({placeholders})")];
    if !filter.include_deleted {
        clauses.push("deleted_at IS NULL".to_string());
    }
    if filter.session_id.is_some() {
        clauses.push("session_id = ?".to_string());
    }
    if !filter.kinds.is_empty() {
        let kind_placeholders = filter.kinds.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
        clauses.push(format!("kind IN ({kind_placeholders})"));
    }
    if !filter.sources.is_empty() {
        let source_placeholders = filter.sources.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
        clauses.push(format!("source IN ({source_placeholders})"));
    }
    if filter.created_after.is_some() {
        clauses.push("created_at >= ?".to_string());
    }
    if filter.created_before.is_some() {
        clauses.push("created_at <= ?".to_string());
    }

    let sql = format!(
        "SELECT * FROM observations WHERE {}
         ORDER BY created_at DESC, rowid DESC
         LIMIT ? OFFSET ?",
        clauses.join(" AND ")
    );

    let mut stmt = conn.prepare(&sql)?;
    let mut param_values: Vec<&dyn rusqlite::ToSql> =
        project_hashes.iter().map(|p| p as &dyn rusqlite::ToSql).collect();
    if let Some(session_id) = &filter.session_id {
        param_values.push(session_id);
    }
    for kind in &filter.kinds {
        param_values.push(kind);
    }
    for source in &filter.sources {
        param_values.push(source);
    }
    if let Some(after) = &filter.created_after {
        param_values.push(after);
    }
    if let Some(before) = &filter.created_before {
        param_values.push(before);
    }
    param_values.push(&limit);
    param_values.push(&offset);

    let rows = stmt
        .query_map(param_values.as_slice(), Observation::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Observations with no embedding yet — the pipeline worker's work queue.
/// Ordered by `rowid ASC` (strict insertion order) rather than
/// `created_at`, which only has second-or-millisecond resolution and
/// could tie within a session's rapid-fire writes (§5: "processed ...
/// in creation order (strict FIFO by rowid)").
pub fn list_pending_embedding(conn: &Connection, batch_size: usize) -> Result<Vec<Observation>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM observations
         WHERE embedding_model IS NULL AND deleted_at IS NULL
         ORDER BY rowid ASC
         LIMIT ?1",
    )?;
    let rows = stmt
        .query_map([batch_size], Observation::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn set_embedding(
    conn: &Connection,
    id: &str,
    embedding: &[u8],
    model: &str,
    version: &str,
) -> Result<()> {
    conn.execute(
        "UPDATE observations
         SET embedding = ?2, embedding_model = ?3, embedding_version = ?4, updated_at = ?5
         WHERE id = ?1",
        params![id, embedding, model, version, Utc::now()],
    )?;
    mirror_embedding_into_vector_index(conn, id, Some(embedding));
    Ok(())
}

/// Mirror an embedding write into `vec_observations` when the vector
/// index is present (§3: "every embedding write is mirrored into it").
/// `embedding = None` removes the row instead (soft-delete/purge path).
/// Failures here (extension unavailable, dimension mismatch) are logged
/// and swallowed rather than failing the caller -- the `observations`
/// table's own `embedding` column stays the source of truth and
/// `search::vector`'s scan fallback keeps working without the mirror.
fn mirror_embedding_into_vector_index(conn: &Connection, id: &str, embedding: Option<&[u8]>) {
    if !crate::db::schema::has_vector_support(conn) {
        return;
    }
    let result = match embedding {
        Some(blob) => conn.execute(
            "INSERT OR REPLACE INTO vec_observations(observation_id, embedding) VALUES (?1, ?2)",
            params![id, blob],
        ),
        None => conn.execute("DELETE FROM vec_observations WHERE observation_id = ?1", params![id]),
    };
    if let Err(e) = result {
        tracing::warn!(observation_id = %id, error = %e, "failed to mirror embedding into vector index");
    }
}

/// Metadata-only update. Observation `content` is immutable once created
/// (§3 lifecycle) -- this path touches only `title`, never `content`, so
/// it never needs to invalidate an existing embedding.
pub fn update_metadata(conn: &Connection, id: &str, title: Option<&str>) -> Result<()> {
    conn.execute(
        "UPDATE observations SET title = ?2, updated_at = ?3 WHERE id = ?1 AND deleted_at IS NULL",
        params![id, title, Utc::now()],
    )?;
    Ok(())
}

/// Soft-delete an observation (§3: excluded from search/listing/graph
/// surface until restored). Returns whether a row was actually affected
/// (§4.2: `softDelete(id) → bool`).
pub fn soft_delete(conn: &Connection, id: &str) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE observations SET deleted_at = ?2 WHERE id = ?1 AND deleted_at IS NULL",
        params![id, Utc::now()],
    )?;
    if changed > 0 {
        mirror_embedding_into_vector_index(conn, id, None);
    }
    Ok(changed > 0)
}

/// Restore a soft-deleted observation, returning whether a row was
/// actually affected (§4.2: `restore(id) → bool`). Re-mirrors the
/// observation's embedding, if any, into the vector index -- soft-delete
/// removed it there, and the round-trip law (§8) requires the restored
/// observation to be indistinguishable from its pre-delete state.
pub fn restore(conn: &Connection, id: &str) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE observations SET deleted_at = NULL WHERE id = ?1",
        [id],
    )?;
    if changed > 0 {
        let embedding: Option<Vec<u8>> = conn
            .query_row("SELECT embedding FROM observations WHERE id = ?1", [id], |row| row.get(0))
            .optional()?
            .flatten();
        if let Some(blob) = embedding {
            mirror_embedding_into_vector_index(conn, id, Some(&blob));
        }
    }
    Ok(changed > 0)
}

pub fn count(conn: &Connection, project_hashes: &[String]) -> Result<i64> {
    if project_hashes.is_empty() {
        return Ok(0);
    }
    let placeholders = project_hashes
        .iter()
        .map(|_| "?")
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "SELECT count(*) FROM observations WHERE project_hash IN ({placeholders}) AND deleted_at IS NULL"
    );
    let mut stmt = conn.prepare(&sql)?;
    let param_values: Vec<&dyn rusqlite::ToSql> =
        project_hashes.iter().map(|p| p as &dyn rusqlite::ToSql).collect();
    let count = stmt.query_row(param_values.as_slice(), |row| row.get(0))?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::memory_conn;

    fn sample(project_hash: &str) -> NewObservation {
        NewObservation {
            project_hash: project_hash.to_string(),
            session_id: None,
            kind: "note".to_string(),
            title: Some("hello".to_string()),
            content: "the quick brown fox".to_string(),
            source: "host".to_string(),
        }
    }

    #[test]
    fn create_and_fetch_roundtrip() {
        let conn = memory_conn();
        let obs = create(&conn, sample("proj-a")).unwrap();
        let fetched = get_by_id(&conn, &obs.id).unwrap().unwrap();
        assert_eq!(fetched.content, "the quick brown fox");
        assert!(fetched.embedding_model.is_none());
    }

    #[test]
    fn soft_delete_hides_from_get_by_id_but_not_including_deleted() {
        let conn = memory_conn();
        let obs = create(&conn, sample("proj-a")).unwrap();
        soft_delete(&conn, &obs.id).unwrap();
        assert!(get_by_id(&conn, &obs.id).unwrap().is_none());
        assert!(get_by_id_including_deleted(&conn, &obs.id).unwrap().is_some());
    }

    #[test]
    fn list_respects_project_scope_and_ordering() {
        let conn = memory_conn();
        create(&conn, sample("proj-a")).unwrap();
        create(&conn, sample("proj-b")).unwrap();
        let results = list(&conn, &["proj-a".to_string()], 10, 0).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].project_hash, "proj-a");
    }

    #[test]
    fn derive_title_prefers_first_sentence() {
        let title = derive_title("Fixed the race condition. More detail follows here.").unwrap();
        assert_eq!(title, "Fixed the race condition");
    }

    #[test]
    fn derive_title_falls_back_to_eighty_chars() {
        let long = "a".repeat(200);
        let title = derive_title(&long).unwrap();
        assert_eq!(title.chars().count(), 80);
    }

    #[test]
    fn create_without_title_derives_one() {
        let conn = memory_conn();
        let mut new = sample("proj-a");
        new.title = None;
        new.content = "Discovered a bug. Root cause was a stale cache.".to_string();
        let obs = create(&conn, new).unwrap();
        assert_eq!(obs.title.as_deref(), Some("Discovered a bug"));
    }

    #[test]
    fn search_by_title_matches_substring_case_insensitively() {
        let conn = memory_conn();
        create(&conn, sample("proj-a")).unwrap();
        let hits = search_by_title(&conn, "proj-a", "HELLO", 10).unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn list_filtered_narrows_by_session_and_kind() {
        let conn = memory_conn();
        let mut a = sample("proj-a");
        a.session_id = Some("sess-1".to_string());
        a.kind = "decision".to_string();
        create(&conn, a).unwrap();
        let mut b = sample("proj-a");
        b.session_id = Some("sess-2".to_string());
        b.kind = "change".to_string();
        create(&conn, b).unwrap();

        let filter = ListFilter {
            session_id: Some("sess-1".to_string()),
            ..ListFilter::default()
        };
        let hits = list_filtered(&conn, &["proj-a".to_string()], &filter, 10, 0).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].kind, "decision");

        let filter = ListFilter {
            kinds: vec!["change".to_string()],
            ..ListFilter::default()
        };
        let hits = list_filtered(&conn, &["proj-a".to_string()], &filter, 10, 0).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].kind, "change");
    }

    #[test]
    fn update_metadata_changes_title_but_not_content_or_embedding() {
        let conn = memory_conn();
        let obs = create(&conn, sample("proj-a")).unwrap();
        set_embedding(&conn, &obs.id, &[1, 2, 3], "local-v1", "1").unwrap();
        update_metadata(&conn, &obs.id, Some("new title")).unwrap();
        let fetched = get_by_id(&conn, &obs.id).unwrap().unwrap();
        assert_eq!(fetched.title.as_deref(), Some("new title"));
        assert_eq!(fetched.content, "the quick brown fox");
        assert_eq!(fetched.embedding_model.as_deref(), Some("local-v1"));
    }
}

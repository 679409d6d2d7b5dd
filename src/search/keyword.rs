// src/search/keyword.rs
// FTS5/BM25 keyword search over observations.

use rusqlite::{params, Connection};

use crate::db::observations::Observation;
use crate::error::Result;
use crate::search::SearchHit;

/// Rank observations in scope by BM25 relevance to `query`, attaching a
/// `snippet()`-generated excerpt. Results are ordered best-first; `rank`
/// fields in the returned hits are 0-based.
pub fn search(
    conn: &Connection,
    project_hashes: &[String],
    query: &str,
    limit: usize,
) -> Result<Vec<SearchHit>> {
    if project_hashes.is_empty() || query.trim().is_empty() {
        return Ok(Vec::new());
    }
    let placeholders = project_hashes.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
    let sql = format!(
        "SELECT o.*, snippet(observations_fts, 1, '[', ']', '...', 12) AS snip,
                bm25(observations_fts) AS rank
         FROM observations_fts
         JOIN observations o ON o.rowid = observations_fts.rowid
         WHERE observations_fts MATCH ?1
           AND o.project_hash IN ({placeholders})
           AND o.deleted_at IS NULL
         ORDER BY rank ASC
         LIMIT ?{next}",
        next = project_hashes.len() + 2,
    );

    let mut stmt = conn.prepare(&sql)?;
    let mut param_values: Vec<&dyn rusqlite::ToSql> = vec![&query];
    for p in project_hashes {
        param_values.push(p);
    }
    param_values.push(&limit);

    let rows = stmt.query_map(param_values.as_slice(), |row| {
        let observation = Observation::from_row(row)?;
        let snippet: String = row.get("snip")?;
        Ok((observation, snippet))
    })?;

    let mut hits = Vec::new();
    for (idx, row) in rows.enumerate() {
        let (observation, snippet) = row?;
        hits.push(SearchHit {
            observation,
            keyword_rank: Some(idx),
            vector_rank: None,
            score: 1.0 / (idx as f64 + 1.0),
            snippet: Some(snippet),
        });
    }
    Ok(hits)
}

/// Escape an arbitrary user query for safe use as an FTS5 MATCH argument —
/// quote each token so punctuation in content (paths, operators) can't be
/// interpreted as FTS5 query syntax.
pub fn sanitize_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|tok| format!("\"{}\"", tok.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::observations::{create, NewObservation};
    use crate::db::test_support::memory_conn;

    #[test]
    fn finds_matching_content_within_project_scope() {
        let conn = memory_conn();
        create(
            &conn,
            NewObservation {
                project_hash: "proj-a".to_string(),
                session_id: None,
                kind: "note".to_string(),
                title: None,
                content: "refactored the authentication middleware".to_string(),
                source: "host".to_string(),
            },
        )
        .unwrap();
        create(
            &conn,
            NewObservation {
                project_hash: "proj-b".to_string(),
                session_id: None,
                kind: "note".to_string(),
                title: None,
                content: "authentication middleware rewritten here too".to_string(),
                source: "host".to_string(),
            },
        )
        .unwrap();

        let hits = search(&conn, &["proj-a".to_string()], &sanitize_query("authentication"), 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].observation.project_hash, "proj-a");
    }

    #[test]
    fn sanitize_quotes_each_token() {
        assert_eq!(sanitize_query("foo bar"), "\"foo\" \"bar\"");
    }
}

// src/search/vector.rs
// Cosine-similarity vector search, backed by sqlite-vec where available
// and falling back to an in-process scan otherwise.

use rusqlite::Connection;

use crate::db::observations::Observation;
use crate::embeddings::decode;
use crate::error::Result;
use crate::search::SearchHit;
use crate::topic::cosine_distance;

/// Rank observations in scope by embedding similarity to `query_embedding`.
/// When the `vec_observations` virtual table is present, delegates the
/// nearest-neighbor scan to sqlite-vec; otherwise scores every candidate
/// observation's own embedding in Rust. Both paths return the same shape.
pub fn search(
    conn: &Connection,
    project_hashes: &[String],
    query_embedding: &[f32],
    limit: usize,
    has_vector_support: bool,
) -> Result<Vec<SearchHit>> {
    if has_vector_support {
        search_via_sqlite_vec(conn, project_hashes, query_embedding, limit)
    } else {
        search_via_scan(conn, project_hashes, query_embedding, limit)
    }
}

fn search_via_sqlite_vec(
    conn: &Connection,
    project_hashes: &[String],
    query_embedding: &[f32],
    limit: usize,
) -> Result<Vec<SearchHit>> {
    let query_blob = crate::embeddings::encode(query_embedding);
    let mut stmt = conn.prepare(
        "SELECT o.*, distance FROM (
            SELECT observation_id, distance FROM vec_observations
            WHERE embedding MATCH ?1 AND k = ?2
         ) AS nn
         JOIN observations o ON o.id = nn.observation_id
         WHERE o.deleted_at IS NULL
         ORDER BY distance ASC",
    )?;
    let candidate_k = (limit * 4).max(limit).min(512);
    let rows = stmt.query_map(
        rusqlite::params![query_blob, candidate_k as i64],
        |row| {
            let observation = Observation::from_row(row)?;
            let distance: f64 = row.get("distance")?;
            Ok((observation, distance))
        },
    )?;

    let mut hits = Vec::new();
    let mut rank = 0usize;
    for row in rows {
        let (observation, distance) = row?;
        if !project_hashes.iter().any(|p| p == &observation.project_hash) {
            continue;
        }
        hits.push(SearchHit {
            observation,
            keyword_rank: None,
            vector_rank: Some(rank),
            score: 1.0 - distance,
            snippet: None,
        });
        rank += 1;
        if hits.len() >= limit {
            break;
        }
    }
    Ok(hits)
}

fn search_via_scan(
    conn: &Connection,
    project_hashes: &[String],
    query_embedding: &[f32],
    limit: usize,
) -> Result<Vec<SearchHit>> {
    if project_hashes.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders = project_hashes.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
    let sql = format!(
        "SELECT * FROM observations
         WHERE project_hash IN ({placeholders}) AND deleted_at IS NULL AND embedding IS NOT NULL"
    );
    let mut stmt = conn.prepare(&sql)?;
    let param_values: Vec<&dyn rusqlite::ToSql> =
        project_hashes.iter().map(|p| p as &dyn rusqlite::ToSql).collect();
    let observations = stmt
        .query_map(param_values.as_slice(), Observation::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut scored: Vec<(Observation, f64)> = observations
        .into_iter()
        .filter_map(|obs| {
            let embedding = decode(obs.embedding.as_deref()?);
            let distance = cosine_distance(query_embedding, &embedding);
            Some((obs, distance))
        })
        .collect();
    scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(limit);

    Ok(scored
        .into_iter()
        .enumerate()
        .map(|(rank, (observation, distance))| SearchHit {
            observation,
            keyword_rank: None,
            vector_rank: Some(rank),
            score: 1.0 - distance,
            snippet: None,
        })
        .collect())
}

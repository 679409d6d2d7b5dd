// src/search/hybrid.rs
// Reciprocal Rank Fusion of keyword and vector result lists.

use std::collections::HashMap;

use crate::search::SearchHit;

const RRF_K: f64 = 60.0;

/// Fuse two ranked lists by Reciprocal Rank Fusion: score = Σ 1/(k+rank),
/// summing contributions for observations present in both lists. Input
/// lists need not be disjoint or of equal length.
pub fn fuse(keyword_hits: Vec<SearchHit>, vector_hits: Vec<SearchHit>, limit: usize) -> Vec<SearchHit> {
    let mut by_id: HashMap<String, SearchHit> = HashMap::new();

    for hit in keyword_hits {
        let score = rrf_contribution(hit.keyword_rank);
        by_id
            .entry(hit.observation.id.clone())
            .and_modify(|existing| {
                existing.score += score;
                existing.keyword_rank = hit.keyword_rank;
                existing.snippet = hit.snippet.clone();
            })
            .or_insert_with(|| SearchHit { score, ..hit });
    }

    for hit in vector_hits {
        let score = rrf_contribution(hit.vector_rank);
        by_id
            .entry(hit.observation.id.clone())
            .and_modify(|existing| {
                existing.score += score;
                existing.vector_rank = hit.vector_rank;
            })
            .or_insert_with(|| SearchHit { score, ..hit });
    }

    let mut fused: Vec<SearchHit> = by_id.into_values().collect();
    fused.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    fused.truncate(limit);
    fused
}

fn rrf_contribution(rank: Option<usize>) -> f64 {
    match rank {
        Some(r) => 1.0 / (RRF_K + r as f64 + 1.0),
        None => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::observations::Observation;
    use chrono::Utc;

    fn obs(id: &str) -> Observation {
        Observation {
            id: id.to_string(),
            project_hash: "proj-a".to_string(),
            session_id: None,
            kind: "note".to_string(),
            title: None,
            content: "content".to_string(),
            source: "host".to_string(),
            embedding: None,
            embedding_model: None,
            embedding_version: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted_at: None,
        }
    }

    fn hit(id: &str, keyword_rank: Option<usize>, vector_rank: Option<usize>) -> SearchHit {
        SearchHit {
            observation: obs(id),
            keyword_rank,
            vector_rank,
            score: 0.0,
            snippet: None,
        }
    }

    #[test]
    fn item_in_both_lists_outranks_single_list_item() {
        let keyword = vec![hit("a", Some(0), None), hit("b", Some(1), None)];
        let vector = vec![hit("a", None, Some(0)), hit("c", None, Some(1))];
        let fused = fuse(keyword, vector, 10);
        assert_eq!(fused[0].observation.id, "a");
    }

    #[test]
    fn respects_limit() {
        let keyword = vec![hit("a", Some(0), None), hit("b", Some(1), None), hit("c", Some(2), None)];
        let fused = fuse(keyword, Vec::new(), 2);
        assert_eq!(fused.len(), 2);
    }
}

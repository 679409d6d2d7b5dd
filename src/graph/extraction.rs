// src/graph/extraction.rs
// Host-callable entity/relationship extraction contracts and materialization of their output into the stored graph.

use async_trait::async_trait;
use rusqlite::Connection;
use serde_json::json;
use tracing::warn;

use crate::db::graph::{edge_types_between, flag_staleness, upsert_edge, upsert_node, EntityType, RelationshipType};
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct ExtractedEntity {
    pub name: String,
    pub entity_type: EntityType,
    pub confidence: f64,
}

#[derive(Debug, Clone)]
pub struct ExtractedRelationship {
    pub source_name: String,
    pub source_type: EntityType,
    pub target_name: String,
    pub target_type: EntityType,
    pub relationship_type: RelationshipType,
    pub confidence: f64,
}

/// Pulls candidate entities out of an observation's content. Laminark
/// ships no local NLP stack of its own — this is delegated to whatever
/// model the host already has on hand.
#[async_trait]
pub trait EntityExtractor: Send + Sync {
    async fn extract(&self, content: &str) -> Result<Vec<ExtractedEntity>>;
}

#[async_trait]
pub trait RelationshipInferrer: Send + Sync {
    async fn infer(
        &self,
        content: &str,
        entities: &[ExtractedEntity],
    ) -> Result<Vec<ExtractedRelationship>>;
}

/// No-op default: every project works without a configured extractor, just
/// without a populated graph. `query_graph`/`graph_stats` degrade to empty
/// results rather than erroring.
pub struct NullExtractor;

#[async_trait]
impl EntityExtractor for NullExtractor {
    async fn extract(&self, _content: &str) -> Result<Vec<ExtractedEntity>> {
        Ok(Vec::new())
    }
}

#[async_trait]
impl RelationshipInferrer for NullExtractor {
    async fn infer(
        &self,
        _content: &str,
        _entities: &[ExtractedEntity],
    ) -> Result<Vec<ExtractedRelationship>> {
        Ok(Vec::new())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct MaterializeSummary {
    pub nodes_touched: usize,
    pub edges_created: usize,
    pub edges_dropped: usize,
    pub entries_rejected: usize,
}

/// Validate and write extracted entities/relationships for one observation.
/// Invalid confidence values are dropped rather than clamped — a caller
/// producing out-of-range confidence signals a bug worth surfacing in
/// logs, not silently normalizing.
pub fn materialize(
    conn: &Connection,
    project_hash: &str,
    observation_id: &str,
    entities: &[ExtractedEntity],
    relationships: &[ExtractedRelationship],
) -> Result<MaterializeSummary> {
    let mut summary = MaterializeSummary::default();

    for entity in entities {
        if !(0.0..=1.0).contains(&entity.confidence) {
            warn!(name = %entity.name, confidence = entity.confidence, "rejecting entity with invalid confidence");
            summary.entries_rejected += 1;
            continue;
        }
        upsert_node(
            conn,
            project_hash,
            &entity.entity_type.to_string(),
            &entity.name,
            json!({ "confidence": entity.confidence }),
            Some(observation_id),
        )?;
        summary.nodes_touched += 1;
    }

    for rel in relationships {
        if !(0.0..=1.0).contains(&rel.confidence) {
            warn!(source = %rel.source_name, target = %rel.target_name, "rejecting relationship with invalid confidence");
            summary.entries_rejected += 1;
            continue;
        }
        let source = upsert_node(
            conn,
            project_hash,
            &rel.source_type.to_string(),
            &rel.source_name,
            json!({}),
            Some(observation_id),
        )?;
        let target = upsert_node(
            conn,
            project_hash,
            &rel.target_type.to_string(),
            &rel.target_name,
            json!({}),
            Some(observation_id),
        )?;
        let new_type = rel.relationship_type.to_string();
        let prior_types = edge_types_between(conn, &source.id, &target.id)?;
        let contradicts = prior_types.iter().any(|t| t != &new_type);

        let edge = upsert_edge(
            conn,
            project_hash,
            &source.id,
            &target.id,
            &new_type,
            rel.confidence,
        )?;
        match edge {
            Some(edge) => {
                summary.edges_created += 1;
                if contradicts {
                    let reason = format!(
                        "edge type '{new_type}' on ({}, {}) contradicts existing type(s) {:?}",
                        rel.source_name, rel.target_name, prior_types
                    );
                    flag_staleness(conn, project_hash, &edge.id, &reason)?;
                }
            }
            None => summary.edges_dropped += 1,
        }
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::memory_conn;

    #[test]
    fn invalid_confidence_is_rejected_not_clamped() {
        let conn = memory_conn();
        let entities = vec![ExtractedEntity {
            name: "thing".to_string(),
            entity_type: EntityType::File,
            confidence: 1.5,
        }];
        let summary = materialize(&conn, "proj-a", "obs-1", &entities, &[]).unwrap();
        assert_eq!(summary.entries_rejected, 1);
        assert_eq!(summary.nodes_touched, 0);
    }

    #[test]
    fn valid_relationship_creates_both_nodes_and_an_edge() {
        let conn = memory_conn();
        let relationships = vec![ExtractedRelationship {
            source_name: "auth.rs".to_string(),
            source_type: EntityType::File,
            target_name: "login bug".to_string(),
            target_type: EntityType::Problem,
            relationship_type: RelationshipType::SolvedBy,
            confidence: 0.9,
        }];
        let summary = materialize(&conn, "proj-a", "obs-1", &[], &relationships).unwrap();
        assert_eq!(summary.edges_created, 1);
    }

    #[test]
    fn contradicting_relationship_type_raises_a_staleness_flag() {
        let conn = memory_conn();
        let rel = |relationship_type: RelationshipType| ExtractedRelationship {
            source_name: "auth.rs".to_string(),
            source_type: EntityType::File,
            target_name: "login bug".to_string(),
            target_type: EntityType::Problem,
            relationship_type,
            confidence: 0.9,
        };
        materialize(&conn, "proj-a", "obs-1", &[], &[rel(RelationshipType::CausedBy)]).unwrap();
        materialize(&conn, "proj-a", "obs-2", &[], &[rel(RelationshipType::SolvedBy)]).unwrap();

        let open: i64 = conn
            .query_row(
                "SELECT count(*) FROM staleness_flags WHERE project_hash = 'proj-a' AND resolved_at IS NULL",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(open, 1);
    }
}

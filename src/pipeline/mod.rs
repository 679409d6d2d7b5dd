// src/pipeline/mod.rs
// Background processing worker: observations are
// written synchronously on the request path with no embedding; this
// worker polls for that pending queue and, off the request path, computes
// embeddings, runs topic-shift detection, and materializes graph
// extraction. A resolved Open Question: a channel of work items was
// considered, but producer and worker share one process here, so the
// pending queue is simply `observations` rows with `embedding_model IS
// NULL` — polled rather than pushed (see DESIGN.md).

use std::sync::Arc;
use std::time::Duration;

use rusqlite::OptionalExtension;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::file::TopicDetectionConfig;
use crate::db::observations::{self, ListFilter, Observation};
use crate::db::{stashes, topic_state, Database};
use crate::embeddings::{encode, EmbeddingStrategy};
use crate::error::Result;
use crate::graph::extraction::{materialize, EntityExtractor, RelationshipInferrer};
use crate::llm::StashSummarizer;
use crate::topic::Detector;

const BATCH_SIZE: usize = 16;

pub struct PipelineWorker {
    db: Database,
    embedding: Arc<dyn EmbeddingStrategy>,
    entity_extractor: Arc<dyn EntityExtractor>,
    relationship_inferrer: Arc<dyn RelationshipInferrer>,
    summarizer: Arc<dyn StashSummarizer>,
    topic_config: TopicDetectionConfig,
    poll_interval: Duration,
}

impl PipelineWorker {
    pub fn new(
        db: Database,
        embedding: Arc<dyn EmbeddingStrategy>,
        entity_extractor: Arc<dyn EntityExtractor>,
        relationship_inferrer: Arc<dyn RelationshipInferrer>,
        summarizer: Arc<dyn StashSummarizer>,
        topic_config: TopicDetectionConfig,
        poll_interval: Duration,
    ) -> Self {
        Self {
            db,
            embedding,
            entity_extractor,
            relationship_inferrer,
            summarizer,
            topic_config,
            poll_interval,
        }
    }

    /// Run until `shutdown` reports `true`. Drains whatever is in flight
    /// before returning rather than aborting mid-batch.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("pipeline worker started");
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }

            if let Err(e) = self.process_batch().await {
                warn!(error = %e, "pipeline batch failed");
            }
        }
        info!("pipeline worker draining remaining batch before shutdown");
        let _ = self.process_batch().await;
        info!("pipeline worker stopped");
    }

    async fn process_batch(&self) -> Result<()> {
        let pending = self.db.with_conn(|conn| observations::list_pending_embedding(conn, BATCH_SIZE))?;
        if pending.is_empty() {
            return Ok(());
        }
        debug!(count = pending.len(), "processing pending observations");
        for obs in pending {
            if let Err(e) = self.process_one(&obs).await {
                warn!(observation_id = %obs.id, error = %e, "failed to process observation");
            }
        }
        Ok(())
    }

    async fn process_one(&self, obs: &Observation) -> Result<()> {
        let embedding = match self.embedding.embed(&obs.content).await {
            Ok(embedding) => embedding,
            Err(e) if e.is_degradable() => {
                debug!(observation_id = %obs.id, "embedding unavailable, leaving pending");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let model = self.embedding.model_name().to_string();
        let blob = encode(&embedding);
        let version = crate::embeddings::EMBEDDING_VERSION.to_string();
        self.db.with_conn(|conn| {
            observations::set_embedding(conn, &obs.id, &blob, &model, &version)
        })?;

        if let Some(session_id) = &obs.session_id {
            if let Err(e) = self.run_topic_detection(&obs.project_hash, session_id, obs, &embedding).await {
                warn!(observation_id = %obs.id, error = %e, "topic detection failed");
            }
        }

        if let Err(e) = self.run_graph_extraction(obs).await {
            warn!(observation_id = %obs.id, error = %e, "graph extraction failed");
        }

        Ok(())
    }

    async fn run_topic_detection(
        &self,
        project_hash: &str,
        session_id: &str,
        obs: &Observation,
        embedding: &[f32],
    ) -> Result<()> {
        let boundary = self.db.with_conn(|conn| {
            let previous = previous_embedded_in_session(conn, session_id, &obs.id)?;
            let Some(previous_embedding) = previous else {
                return Ok(None);
            };
            let seed = seed_from_history(&topic_state::recent_samples(conn, project_hash, 10)?);

            let mut detector = Detector::new(&self.topic_config, seed);
            let distance = crate::topic::cosine_distance(embedding, &previous_embedding);
            let Some(decision) = detector.observe(distance) else {
                return Ok(None);
            };

            // Read the prior shift boundary before recording this decision,
            // so the stash snapshot (below) spans back to the last shift
            // rather than including it.
            let since = topic_state::last_shift_at(conn, project_hash, session_id)?;

            topic_state::record_sample(
                conn,
                project_hash,
                session_id,
                detector.state().mean,
                detector.state().variance,
                decision.threshold,
            )?;
            topic_state::record_decision(
                conn,
                project_hash,
                session_id,
                decision.distance,
                decision.threshold,
                decision.shifted,
                decision.confidence,
            )?;
            if !decision.shifted {
                return Ok(None);
            }
            Ok(Some(since))
        })?;

        let Some(since) = boundary else {
            return Ok(());
        };
        self.stash_topic_thread(project_hash, session_id, since).await
    }

    /// Snapshot the session's thread back to the last shift boundary (or
    /// session start) into a `ContextStash`, label/summarize it, and
    /// notify the host.
    async fn stash_topic_thread(
        &self,
        project_hash: &str,
        session_id: &str,
        since: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<()> {
        let thread = self.db.with_conn({
            let project_hash = project_hash.to_string();
            let session_id = session_id.to_string();
            move |conn| {
                let filter = ListFilter {
                    session_id: Some(session_id.clone()),
                    created_after: since,
                    ..ListFilter::default()
                };
                let mut obs = observations::list_filtered(conn, &[project_hash], &filter, usize::MAX, 0)?;
                obs.reverse();
                Ok(obs)
            }
        })?;
        if thread.is_empty() {
            return Ok(());
        }

        let (topic_label, summary) = self.summarizer.summarize(&thread).await?;

        self.db.with_conn({
            let project_hash = project_hash.to_string();
            let session_id = session_id.to_string();
            let topic_label = topic_label.clone();
            move |conn| {
                stashes::create_stash(conn, &project_hash, &session_id, Some(&topic_label), &summary, &thread)?;
                crate::db::notifications::add(
                    conn,
                    &project_hash,
                    &format!("Stashed '{topic_label}'. Use /resume to return."),
                )?;
                Ok(())
            }
        })
    }

    async fn run_graph_extraction(&self, obs: &Observation) -> Result<()> {
        let entities = self.entity_extractor.extract(&obs.content).await?;
        if entities.is_empty() {
            return Ok(());
        }
        let relationships = self.relationship_inferrer.infer(&obs.content, &entities).await?;
        self.db.with_conn(|conn| {
            materialize(conn, &obs.project_hash, &obs.id, &entities, &relationships)?;
            Ok(())
        })?;
        Ok(())
    }
}

/// Cold-start seed for a fresh session's `EwmaState`: the average of the
/// project's last 10 persisted threshold samples, or `None` if it has none
/// yet (the detector then falls back to the configured `tau0`).
fn seed_from_history(samples: &[topic_state::ThresholdSample]) -> Option<(f64, f64)> {
    if samples.is_empty() {
        return None;
    }
    let n = samples.len() as f64;
    let mean = samples.iter().map(|s| s.mean_distance).sum::<f64>() / n;
    let variance = samples.iter().map(|s| s.variance).sum::<f64>() / n;
    Some((mean, variance))
}

fn previous_embedded_in_session(
    conn: &rusqlite::Connection,
    session_id: &str,
    exclude_id: &str,
) -> Result<Option<Vec<f32>>> {
    let blob: Option<Vec<u8>> = conn
        .query_row(
            "SELECT embedding FROM observations
             WHERE session_id = ?1 AND id != ?2 AND embedding IS NOT NULL AND deleted_at IS NULL
             ORDER BY created_at DESC, rowid DESC LIMIT 1",
            rusqlite::params![session_id, exclude_id],
            |row| row.get(0),
        )
        .optional()?
        .flatten();
    Ok(blob.map(|b| crate::embeddings::decode(&b)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::observations::NewObservation;
    use crate::db::test_support::memory_conn;
    use crate::embeddings::encode as enc;

    #[test]
    fn previous_embedded_in_session_finds_most_recent() {
        let conn = memory_conn();
        let first = observations::create(
            &conn,
            NewObservation {
                project_hash: "proj-a".to_string(),
                session_id: Some("sess-1".to_string()),
                kind: "note".to_string(),
                title: None,
                content: "first".to_string(),
                source: "host".to_string(),
            },
        )
        .unwrap();
        observations::set_embedding(&conn, &first.id, &enc(&[1.0, 0.0]), "m", "1").unwrap();

        let second = observations::create(
            &conn,
            NewObservation {
                project_hash: "proj-a".to_string(),
                session_id: Some("sess-1".to_string()),
                kind: "note".to_string(),
                title: None,
                content: "second".to_string(),
                source: "host".to_string(),
            },
        )
        .unwrap();

        let found = previous_embedded_in_session(&conn, "sess-1", &second.id).unwrap();
        assert_eq!(found, Some(vec![1.0, 0.0]));
    }

    struct StubEmbedding;

    #[async_trait::async_trait]
    impl EmbeddingStrategy for StubEmbedding {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            if text.starts_with("first") {
                Ok(vec![1.0, 0.0])
            } else {
                Ok(vec![0.0, 1.0])
            }
        }

        fn model_name(&self) -> &str {
            "stub"
        }
    }

    fn worker(db: Database) -> PipelineWorker {
        PipelineWorker::new(
            db,
            Arc::new(StubEmbedding),
            Arc::new(crate::graph::extraction::NullExtractor),
            Arc::new(crate::graph::extraction::NullExtractor),
            Arc::new(crate::llm::NullSummarizer),
            TopicDetectionConfig::default(),
            Duration::from_secs(60),
        )
    }

    #[tokio::test]
    async fn an_orthogonal_jump_parks_a_stash_and_notifies() {
        let db = Database::open_in_memory().unwrap();
        let w = worker(db.clone());

        let first = db
            .with_conn(|conn| {
                observations::create(
                    conn,
                    NewObservation {
                        project_hash: "proj-a".to_string(),
                        session_id: Some("sess-1".to_string()),
                        kind: "note".to_string(),
                        title: Some("first topic".to_string()),
                        content: "first note about auth".to_string(),
                        source: "host".to_string(),
                    },
                )
            })
            .unwrap();
        w.process_one(&first).await.unwrap();

        let second = db
            .with_conn(|conn| {
                observations::create(
                    conn,
                    NewObservation {
                        project_hash: "proj-a".to_string(),
                        session_id: Some("sess-1".to_string()),
                        kind: "note".to_string(),
                        title: Some("second topic".to_string()),
                        content: "switching to billing entirely".to_string(),
                        source: "host".to_string(),
                    },
                )
            })
            .unwrap();
        w.process_one(&second).await.unwrap();

        let parked = db
            .with_conn(|conn| stashes::list_stashes(conn, "proj-a", None, None))
            .unwrap();
        assert_eq!(parked.len(), 1);
        assert_eq!(parked[0].topic_label.as_deref(), Some("first topic"));
        assert_eq!(parked[0].observation_ids, vec![first.id.clone(), second.id.clone()]);

        let notifications = db
            .with_conn(|conn| crate::db::notifications::consume_pending(conn, "proj-a"))
            .unwrap();
        assert!(notifications.iter().any(|n| n.contains("Stashed") && n.contains("/resume")));
    }
}

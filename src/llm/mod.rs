// src/llm/mod.rs
// Host-callable summarization contract used when parking a context stash.
// A thin async contract the host satisfies, with a no-op default so the
// capability degrades rather than blocks.

use async_trait::async_trait;

use crate::db::observations::Observation;
use crate::error::Result;

/// `(topic_label, summary)` produced for a just-parked stash.
pub type StashLabel = (String, String);

#[async_trait]
pub trait StashSummarizer: Send + Sync {
    async fn summarize(&self, observations: &[Observation]) -> Result<StashLabel>;
}

/// Falls back to a mechanical label/summary (first observation's title or
/// kind, plus a count) when no host summarizer is configured — stashing
/// still works, just without prose.
pub struct NullSummarizer;

#[async_trait]
impl StashSummarizer for NullSummarizer {
    async fn summarize(&self, observations: &[Observation]) -> Result<StashLabel> {
        let label = observations
            .first()
            .and_then(|o| o.title.clone())
            .unwrap_or_else(|| "untitled topic".to_string());
        let summary = format!("{} observations stashed under \"{label}\"", observations.len());
        Ok((label, summary))
    }
}

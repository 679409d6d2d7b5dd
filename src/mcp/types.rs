// src/mcp/types.rs
// Request payloads for the MCP tool surface.

use schemars::JsonSchema;
use serde::Deserialize;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SaveMemoryRequest {
    pub project_hash: String,
    pub content: String,
    pub title: Option<String>,
    pub kind: Option<String>,
    pub session_id: Option<String>,
    pub source: Option<String>,
    /// Pre-computed embedding, supplied when the host delegates embedding
    /// generation instead of letting Laminark compute one locally.
    pub embedding: Option<Vec<f32>>,
    pub embedding_model: Option<String>,
}

/// `recall`: search by `query`, or look a specific memory up
/// directly by `id` / `title` / `ids`; `action` switches between viewing,
/// soft-deleting, and restoring whatever was resolved.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct RecallRequest {
    pub project_hash: String,
    pub query: Option<String>,
    pub id: Option<String>,
    pub title: Option<String>,
    pub ids: Option<Vec<String>>,
    /// `view` (default), `purge` (soft-delete whatever is resolved), or
    /// `restore` (undo a prior soft-delete).
    pub action: Option<String>,
    pub detail_level: Option<String>,
    pub limit: Option<usize>,
    pub token_budget: Option<usize>,
    /// When true, `view` also considers soft-deleted observations.
    pub include_purged: Option<bool>,
}

/// `topic_context`: a progressive-disclosure listing of
/// recent, unresumed context stashes.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct TopicContextRequest {
    pub project_hash: String,
    pub query: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct QueryGraphRequest {
    pub project_hash: String,
    pub query: String,
    pub entity_type: Option<String>,
    pub depth: Option<u32>,
    pub direction: Option<String>,
    pub relationship_types: Option<Vec<String>>,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ProjectScopedRequest {
    pub project_hash: String,
}

/// `ingest_knowledge`: walk a directory of markdown files
/// and create one reference observation per top-level section.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct IngestKnowledgeRequest {
    pub project_hash: String,
    /// Directory to scan; defaults to the current working directory.
    pub directory: Option<String>,
}

/// `hygiene`: `mode` selects dry-run-vs-purge, `tier` selects
/// which scored findings are in scope.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct HygieneRequest {
    pub project_hash: String,
    /// `simulate` (default, read-only) or `purge` (soft-deletes findings).
    pub mode: Option<String>,
    /// `high` (default), `medium` (medium and up), or `all`.
    pub tier: Option<String>,
    pub session_id: Option<String>,
    pub limit: Option<usize>,
}

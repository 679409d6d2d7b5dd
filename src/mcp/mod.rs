// src/mcp/mod.rs
// The MCP tool surface: eight tools exposed to the host over
// stdio, using the `#[tool_router]`/`#[tool]` macro pattern.

mod types;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rmcp::handler::server::{router::tool::ToolRouter, tool::ToolCallContext, wrapper::Parameters};
use rmcp::model::{
    CallToolRequestParam, CallToolResult, Content, ListToolsResult, PaginatedRequestParam,
    ServerCapabilities, ServerInfo,
};
use rmcp::service::{RequestContext, RoleServer};
use rmcp::{tool, tool_router, ErrorData as McpError, ServerHandler};

use crate::config::file::LaminarkConfig;
use crate::context;
use crate::db::pool::DatabasePool;
use crate::db::{graph as graph_db, observations, Database};
use crate::embeddings::EmbeddingStrategy;
use crate::graph::extraction::{EntityExtractor, RelationshipInferrer};
use crate::llm::StashSummarizer;
use crate::search::{format::format_results, hybrid::fuse, keyword, vector, DetailLevel};
use crate::status::StatusCache;

pub use types::*;

/// Shared server state, cheap to clone (everything inside is an `Arc`).
#[derive(Clone)]
pub struct AppState {
    pub pool: DatabasePool,
    pub db: Database,
    pub config: Arc<LaminarkConfig>,
    pub embedding: Arc<dyn EmbeddingStrategy>,
    pub entity_extractor: Arc<dyn EntityExtractor>,
    pub relationship_inferrer: Arc<dyn RelationshipInferrer>,
    pub summarizer: Arc<dyn StashSummarizer>,
    pub status: Arc<StatusCache>,
    /// Flipped once on graceful shutdown; new tool calls reject rather
    /// than racing the worker drain and WAL checkpoint.
    pub shutting_down: Arc<AtomicBool>,
}

#[derive(Clone)]
pub struct LaminarkServer {
    state: AppState,
    tool_router: ToolRouter<Self>,
}

fn internal_error(message: impl std::fmt::Display) -> McpError {
    McpError::internal_error(message.to_string(), None)
}

fn text_result(body: String) -> Result<CallToolResult, McpError> {
    Ok(CallToolResult::success(vec![Content::text(body)]))
}

#[tool_router]
impl LaminarkServer {
    pub fn new(state: AppState) -> Self {
        Self {
            state,
            tool_router: Self::tool_router(),
        }
    }

    /// Exposes the shared database handle for callers outside the MCP tool
    /// surface -- currently only the session-open CLI path, which runs
    /// before the host's first tool call.
    pub fn db(&self) -> Database {
        self.state.db.clone()
    }

    /// Reject subsequent tool calls with `ShuttingDown` instead of racing
    /// the worker drain and WAL checkpoint during graceful shutdown.
    pub fn begin_shutdown(&self) {
        self.state.shutting_down.store(true, Ordering::Release);
    }

    #[tool(description = "Save a new memory observation for later recall.")]
    pub async fn save_memory(
        &self,
        Parameters(req): Parameters<SaveMemoryRequest>,
    ) -> Result<CallToolResult, McpError> {
        if req.content.chars().count() > 10_000 {
            return text_result("rejected: content exceeds the 10,000 character limit".to_string());
        }

        let kind = match &req.kind {
            Some(raw) => match raw.parse::<observations::ObservationKind>() {
                Ok(kind) => kind,
                Err(_) => {
                    return text_result(format!(
                        "rejected: invalid kind \"{raw}\" (expected one of: change, reference, finding, decision, verification)"
                    ));
                }
            },
            None => observations::ObservationKind::default(),
        };

        let state = self.state.clone();
        let hygiene_config = self.state.config.hygiene.clone();
        let project_hash = req.project_hash.clone();
        let content = req.content.clone();
        let rejection = self
            .state
            .pool
            .interact(move |conn| crate::graph::hygiene::admission_check(conn, &project_hash, &content, &hygiene_config))
            .await
            .map_err(internal_error)?;
        if let Some(reason) = rejection {
            return text_result(format!("rejected: {reason}"));
        }

        let observation = self
            .state
            .pool
            .interact(move |conn| {
                observations::create(
                    conn,
                    observations::NewObservation {
                        project_hash: req.project_hash.clone(),
                        session_id: req.session_id.clone(),
                        kind: kind.to_string(),
                        title: req.title.clone(),
                        content: req.content.clone(),
                        source: req.source.clone().unwrap_or_else(|| "host".to_string()),
                    },
                )
            })
            .await
            .map_err(internal_error)?;

        if let (Some(embedding), Some(model)) = (&req.embedding, &req.embedding_model) {
            let id = observation.id.clone();
            let blob = crate::embeddings::encode(embedding);
            let model = model.clone();
            self.state
                .pool
                .interact(move |conn| {
                    observations::set_embedding(conn, &id, &blob, &model, crate::embeddings::EMBEDDING_VERSION)
                })
                .await
                .map_err(internal_error)?;
        }

        state.status.mark_dirty();
        text_result(observation.id)
    }

    #[tool(description = "Search, view, soft-delete, or restore memory observations.")]
    pub async fn recall(
        &self,
        Parameters(req): Parameters<RecallRequest>,
    ) -> Result<CallToolResult, McpError> {
        let action = req.action.as_deref().unwrap_or("view");
        let include_purged = req.include_purged.unwrap_or(false) || action == "restore";
        let project_hashes = self.state.config.cross_access_for(&req.project_hash);
        let limit = req.limit.unwrap_or(20);

        // Direct lookups (id / ids / title) bypass search entirely.
        let direct_hits: Option<Vec<observations::Observation>> =
            if let Some(id) = &req.id {
                let id = id.clone();
                Some(
                    self.state
                        .pool
                        .interact(move |conn| {
                            if include_purged {
                                observations::get_by_id_including_deleted(conn, &id)
                            } else {
                                observations::get_by_id(conn, &id)
                            }
                        })
                        .await
                        .map_err(internal_error)?
                        .into_iter()
                        .collect(),
                )
            } else if let Some(ids) = &req.ids {
                let ids = ids.clone();
                Some(
                    self.state
                        .pool
                        .interact(move |conn| {
                            ids.iter()
                                .filter_map(|id| {
                                    if include_purged {
                                        observations::get_by_id_including_deleted(conn, id).transpose()
                                    } else {
                                        observations::get_by_id(conn, id).transpose()
                                    }
                                })
                                .collect::<crate::error::Result<Vec<_>>>()
                        })
                        .await
                        .map_err(internal_error)?,
                )
            } else if let Some(title) = &req.title {
                let title = title.clone();
                let project_hash = req.project_hash.clone();
                Some(
                    self.state
                        .pool
                        .interact(move |conn| observations::search_by_title(conn, &project_hash, &title, limit))
                        .await
                        .map_err(internal_error)?,
                )
            } else {
                None
            };

        let observations_for_action = if let Some(hits) = &direct_hits {
            // restrict to the caller's scope even for direct id lookups
            hits.iter()
                .filter(|o| project_hashes.contains(&o.project_hash))
                .cloned()
                .collect::<Vec<_>>()
        } else {
            Vec::new()
        };

        if action == "purge" || action == "restore" {
            let ids: Vec<String> = if !observations_for_action.is_empty() {
                observations_for_action.iter().map(|o| o.id.clone()).collect()
            } else {
                Vec::new()
            };
            if ids.is_empty() {
                return text_result("no matching observation to act on".to_string());
            }
            let is_purge = action == "purge";
            let count = self
                .state
                .pool
                .interact(move |conn| {
                    let mut affected = 0usize;
                    for id in &ids {
                        let changed = if is_purge {
                            observations::soft_delete(conn, id)?
                        } else {
                            observations::restore(conn, id)?
                        };
                        if changed {
                            affected += 1;
                        }
                    }
                    Ok::<_, crate::error::LaminarkError>(affected)
                })
                .await
                .map_err(internal_error)?;
            self.state.status.mark_dirty();
            let verb = if action == "purge" { "purged" } else { "restored" };
            return text_result(format!("{verb} {count} observation(s)"));
        }

        // `view`: either the direct hits, or a hybrid search over `query`.
        let level = DetailLevel::parse(req.detail_level.as_deref().unwrap_or("compact"));
        // Single-id lookups get the larger full-view budget by default —
        // a lookup by id is a request to read one thing in full, not to
        // browse a ranked list.
        let default_budget = if req.id.is_some() {
            self.state.config.full_view_token_budget
        } else {
            self.state.config.token_budget
        };
        let budget = req.token_budget.unwrap_or(default_budget);

        let fused = if let Some(hits) = direct_hits {
            hits.into_iter()
                .filter(|o| project_hashes.contains(&o.project_hash))
                .map(|observation| crate::search::SearchHit {
                    observation,
                    keyword_rank: None,
                    vector_rank: None,
                    score: 1.0,
                    snippet: None,
                })
                .collect::<Vec<_>>()
        } else {
            let query = req.query.clone().unwrap_or_default();
            let sanitized = keyword::sanitize_query(&query);
            let has_vector_support = self.state.db.has_vector_support();
            let query_embedding = self.state.embedding.embed(&query).await.ok();

            let hashes_for_keyword = project_hashes.clone();
            let keyword_hits = self
                .state
                .pool
                .interact(move |conn| keyword::search(conn, &hashes_for_keyword, &sanitized, limit))
                .await
                .map_err(internal_error)?;

            let vector_hits = if let Some(embedding) = query_embedding {
                let hashes_for_vector = project_hashes.clone();
                self.state
                    .pool
                    .interact(move |conn| {
                        vector::search(conn, &hashes_for_vector, &embedding, limit, has_vector_support)
                    })
                    .await
                    .map_err(internal_error)?
            } else {
                Vec::new()
            };

            fuse(keyword_hits, vector_hits, limit)
        };

        let formatted = format_results(&fused, level, budget);

        let root_hash = req.project_hash.clone();
        let body = self
            .state
            .pool
            .interact(move |conn| context::with_notifications(conn, &root_hash, formatted.text.clone()))
            .await
            .map_err(internal_error)?;

        text_result(body)
    }

    #[tool(description = "List recent, unresumed context stashes — progressive-disclosure topic history.")]
    pub async fn topic_context(
        &self,
        Parameters(req): Parameters<TopicContextRequest>,
    ) -> Result<CallToolResult, McpError> {
        let project_hash = req.project_hash.clone();
        let limit = req.limit.unwrap_or(10);
        let query = req.query.clone();
        let stashes = self
            .state
            .pool
            .interact(move |conn| crate::db::stashes::get_recent_stashes(conn, &project_hash, limit))
            .await
            .map_err(internal_error)?;

        let filtered: Vec<_> = match &query {
            Some(q) if !q.trim().is_empty() => {
                let needle = q.to_lowercase();
                stashes
                    .into_iter()
                    .filter(|s| {
                        s.summary.to_lowercase().contains(&needle)
                            || s.topic_label.as_deref().unwrap_or("").to_lowercase().contains(&needle)
                    })
                    .collect()
            }
            _ => stashes,
        };

        let body = if filtered.is_empty() {
            "no unresumed context stashes".to_string()
        } else {
            filtered
                .iter()
                .map(|s| {
                    format!(
                        "- [{}] {} — {} ({} observations, {})",
                        s.id,
                        s.topic_label.as_deref().unwrap_or("(untitled)"),
                        s.summary,
                        s.observation_ids.len(),
                        s.created_at.format("%Y-%m-%d %H:%M"),
                    )
                })
                .collect::<Vec<_>>()
                .join("\n")
        };

        let root_hash = req.project_hash.clone();
        let body = self
            .state
            .pool
            .interact(move |conn| context::with_notifications(conn, &root_hash, body))
            .await
            .map_err(internal_error)?;
        text_result(body)
    }

    #[tool(description = "Query the knowledge graph by entity name, returning matching roots, their traversal, and linked observation excerpts.")]
    pub async fn query_graph(
        &self,
        Parameters(req): Parameters<QueryGraphRequest>,
    ) -> Result<CallToolResult, McpError> {
        let project_hash = req.project_hash.clone();
        let query = req.query.clone();
        let entity_type = req.entity_type.clone();
        let depth = req.depth.unwrap_or(2).min(4);
        let direction = match req.direction.as_deref() {
            Some("in") => graph_db::Direction::In,
            Some("both") => graph_db::Direction::Both,
            _ => graph_db::Direction::Out,
        };
        let relationship_types = req.relationship_types.clone();
        let limit = req.limit.unwrap_or(20).min(50);

        let results = self
            .state
            .pool
            .interact(move |conn| {
                let roots = graph_db::find_roots(conn, &project_hash, &query, entity_type.as_deref(), limit)?;
                let mut out = Vec::new();
                for root in roots {
                    let hits =
                        graph_db::traverse(conn, &root.id, depth, relationship_types.as_deref(), direction)?;
                    let mut excerpts = Vec::new();
                    for observation_id in root.observation_ids.iter().take(3) {
                        if let Some(obs) = observations::get_by_id(conn, observation_id)? {
                            excerpts.push(obs);
                        }
                    }
                    out.push((root, hits, excerpts));
                }
                Ok::<_, crate::error::LaminarkError>(out)
            })
            .await
            .map_err(internal_error)?;

        let body = if results.is_empty() {
            format!("no graph entity found matching \"{}\"", req.query)
        } else {
            let mut out = String::new();
            for (root, hits, excerpts) in results {
                out.push_str(&format!("root: {} ({})\n", root.name, root.node_type));
                for hit in hits {
                    out.push_str(&format!(
                        "  hop {}: {} ({}) via confidence {:.2}\n",
                        hit.hop, hit.node.name, hit.node.node_type, hit.via_confidence
                    ));
                }
                for obs in excerpts {
                    let title = obs.title.as_deref().unwrap_or("(untitled)");
                    out.push_str(&format!("  observation: [{}] {}\n", obs.id, title));
                }
                out.push('\n');
            }
            out
        };

        let root_hash = req.project_hash.clone();
        let body = self
            .state
            .pool
            .interact(move |conn| context::with_notifications(conn, &root_hash, body))
            .await
            .map_err(internal_error)?;
        text_result(body)
    }

    #[tool(description = "Report aggregate statistics about the project's knowledge graph.")]
    pub async fn graph_stats(
        &self,
        Parameters(req): Parameters<ProjectScopedRequest>,
    ) -> Result<CallToolResult, McpError> {
        let project_hash = req.project_hash.clone();
        let stats = self
            .state
            .pool
            .interact(move |conn| graph_db::graph_stats(conn, &project_hash))
            .await
            .map_err(internal_error)?;
        let body = serde_json::to_string_pretty(&stats).map_err(internal_error)?;

        let root_hash = req.project_hash.clone();
        let body = self
            .state
            .pool
            .interact(move |conn| context::with_notifications(conn, &root_hash, body))
            .await
            .map_err(internal_error)?;
        text_result(body)
    }

    #[tool(description = "Report server status: uptime, memory counts, and graph health.")]
    pub async fn status(
        &self,
        Parameters(req): Parameters<ProjectScopedRequest>,
    ) -> Result<CallToolResult, McpError> {
        let body = self.state.status.render(&req.project_hash).await.map_err(internal_error)?;
        let root_hash = req.project_hash.clone();
        let body = self
            .state
            .pool
            .interact(move |conn| context::with_notifications(conn, &root_hash, body))
            .await
            .map_err(internal_error)?;
        text_result(body)
    }

    #[tool(description = "Parse markdown files under a directory into reference observations, one per section.")]
    pub async fn ingest_knowledge(
        &self,
        Parameters(req): Parameters<IngestKnowledgeRequest>,
    ) -> Result<CallToolResult, McpError> {
        let directory = req
            .directory
            .clone()
            .map(std::path::PathBuf::from)
            .unwrap_or_else(|| std::path::PathBuf::from("."));
        if !directory.is_dir() {
            return text_result(format!("not a directory: {}", directory.display()));
        }

        let project_hash = req.project_hash.clone();
        let hygiene_config = self.state.config.hygiene.clone();
        let summary = self
            .state
            .pool
            .interact(move |conn| {
                crate::ingest::ingest_directory(&directory, |_path, section| {
                    let rejection = crate::graph::hygiene::admission_check(
                        conn,
                        &project_hash,
                        &section.body,
                        &hygiene_config,
                    )?;
                    if rejection.is_some() {
                        return Ok(false);
                    }
                    observations::create(
                        conn,
                        observations::NewObservation {
                            project_hash: project_hash.clone(),
                            session_id: None,
                            kind: "reference".to_string(),
                            title: Some(section.title.clone()),
                            content: section.body.clone(),
                            source: "ingest_knowledge".to_string(),
                        },
                    )?;
                    Ok(true)
                })
            })
            .await
            .map_err(internal_error)?;

        self.state.status.mark_dirty();
        text_result(format!(
            "files_scanned: {}\nsections_found: {}\nobservations_created: {}",
            summary.files_scanned, summary.sections_found, summary.observations_created
        ))
    }

    #[tool(description = "Score stored observations for hygiene issues and optionally purge high-tier findings.")]
    pub async fn hygiene(
        &self,
        Parameters(req): Parameters<HygieneRequest>,
    ) -> Result<CallToolResult, McpError> {
        let project_hash = req.project_hash.clone();
        let dry_run = req.mode.as_deref().unwrap_or("simulate") != "purge";
        let tier = crate::graph::hygiene::TierSelection::parse(req.tier.as_deref().unwrap_or("high"));
        let session_id = req.session_id.clone();
        let limit = req.limit.unwrap_or(50);
        let hygiene_config = self.state.config.hygiene.clone();

        let result = self
            .state
            .pool
            .interact(move |conn| {
                crate::graph::hygiene::purge(
                    conn,
                    &project_hash,
                    session_id.as_deref(),
                    &hygiene_config,
                    tier,
                    limit,
                    dry_run,
                )
            })
            .await
            .map_err(internal_error)?;

        if !dry_run {
            self.state.status.mark_dirty();
        }
        let body = serde_json::to_string_pretty(&result).map_err(internal_error)?;
        text_result(body)
    }
}

impl ServerHandler for LaminarkServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: Default::default(),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: rmcp::model::Implementation {
                name: "laminark".into(),
                title: Some("Laminark - persistent memory for coding assistants".into()),
                version: env!("CARGO_PKG_VERSION").into(),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Laminark stores and retrieves persistent project memory across coding sessions.".into(),
            ),
        }
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListToolsResult, McpError>> + Send + '_ {
        std::future::ready(Ok(ListToolsResult {
            tools: self.tool_router.list_all(),
            next_cursor: None,
            meta: None,
        }))
    }

    #[allow(clippy::manual_async_fn)]
    fn call_tool(
        &self,
        request: CallToolRequestParam,
        context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<CallToolResult, McpError>> + Send + '_ {
        async move {
            if self.state.shutting_down.load(Ordering::Acquire) {
                return Err(internal_error(crate::error::LaminarkError::ShuttingDown));
            }
            let ctx = ToolCallContext::new(self, request, context);
            self.tool_router.call(ctx).await
        }
    }
}

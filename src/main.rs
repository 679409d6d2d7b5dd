// src/main.rs
// Laminark - local-first persistent memory for coding assistants

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rmcp::handler::server::wrapper::Parameters;
use tokio::sync::watch;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use laminark::config::{EnvConfig, LaminarkConfig};
use laminark::db::pool::{DatabasePool, DbStorage};
use laminark::db::Database;
use laminark::embeddings::{build_strategy, EmbeddingStrategy};
use laminark::graph::extraction::NullExtractor;
use laminark::llm::NullSummarizer;
use laminark::mcp::{
    AppState, HygieneRequest, IngestKnowledgeRequest, LaminarkServer, ProjectScopedRequest,
    QueryGraphRequest, RecallRequest, SaveMemoryRequest, TopicContextRequest,
};
use laminark::pipeline::PipelineWorker;
use laminark::status::StatusCache;

#[derive(Parser)]
#[command(name = "laminark", version, about = "Local-first persistent memory for coding assistants")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the MCP server over stdio (the default when no subcommand is given).
    Serve,
    /// Invoke a single MCP tool directly and print its result, without a host.
    Tool {
        /// Tool name, e.g. "recall" or "save_memory".
        name: String,
        /// Tool arguments as a JSON object.
        args: String,
    },
    /// Print the session-open digest. Meant to be wired into the host's
    /// session-start hook, not exposed as an MCP tool.
    SessionOpen {
        /// Project identity hash.
        project_hash: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env from ~/.laminark/.env only (never from CWD -- a malicious
    // repo could otherwise override embedding endpoint credentials).
    if let Some(home) = dirs::home_dir() {
        if let Err(e) = dotenvy::from_path(home.join(".laminark/.env")) {
            tracing::debug!("no global .env file loaded: {e}");
        }
    }

    let cli = Cli::parse();

    // Quiet by default: stdout is reserved for MCP JSON-RPC framing.
    let log_level = match cli.command {
        None | Some(Commands::Serve) | Some(Commands::Tool { .. }) | Some(Commands::SessionOpen { .. }) => {
            Level::WARN
        }
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    match cli.command {
        None | Some(Commands::Serve) => run_mcp_server().await,
        Some(Commands::Tool { name, args }) => run_tool(name, args).await,
        Some(Commands::SessionOpen { project_hash }) => run_session_open(project_hash).await,
    }
}

async fn build_server() -> Result<(LaminarkServer, watch::Sender<bool>)> {
    let file_config = LaminarkConfig::load();
    let env_config = EnvConfig::from_env();

    let db_path = env_config
        .db_path
        .or_else(|| file_config.db_path.clone())
        .unwrap_or_else(default_db_path);
    let busy_timeout_ms = env_config.busy_timeout_ms.unwrap_or(file_config.busy_timeout_ms);

    let db = Database::open(&db_path).with_context(|| format!("opening database at {}", db_path.display()))?;
    let pool = DatabasePool::open(DbStorage::File(db_path), busy_timeout_ms)?;

    let local_endpoint =
        std::env::var("LAMINARK_EMBEDDING_ENDPOINT").unwrap_or_else(|_| "http://localhost:11434/api/embeddings".to_string());
    let embedding: Arc<dyn EmbeddingStrategy> =
        Arc::from(build_strategy(file_config.embedding_strategy, &local_endpoint));

    let entity_extractor = Arc::new(NullExtractor);
    let relationship_inferrer = Arc::new(NullExtractor);
    let summarizer = Arc::new(NullSummarizer);
    let status = Arc::new(StatusCache::new(db.clone()));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = PipelineWorker::new(
        db.clone(),
        embedding.clone(),
        entity_extractor.clone(),
        relationship_inferrer.clone(),
        summarizer.clone(),
        file_config.topic_detection.clone(),
        std::time::Duration::from_secs(2),
    );
    tokio::spawn(async move { worker.run(shutdown_rx).await });

    let state = AppState {
        pool,
        db,
        config: Arc::new(file_config),
        embedding,
        entity_extractor,
        relationship_inferrer,
        summarizer,
        status,
        shutting_down: Arc::new(std::sync::atomic::AtomicBool::new(false)),
    };

    Ok((LaminarkServer::new(state), shutdown_tx))
}

fn default_db_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".laminark")
        .join("laminark.db")
}

async fn run_mcp_server() -> Result<()> {
    let (server, shutdown_tx) = build_server().await?;
    info!("laminark MCP server starting");
    let db = server.db();

    let shutdown_handle = server.clone();
    let transport = rmcp::transport::io::stdio();
    let service = rmcp::serve_server(server, transport).await?;
    service.waiting().await?;

    // Graceful shutdown (host closed the transport): reject any call that
    // raced the transport close, drain the pipeline worker, then
    // checkpoint so its last write lands in the WAL that gets folded back
    // into the main file.
    shutdown_handle.begin_shutdown();
    let _ = shutdown_tx.send(true);
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    if let Err(e) = db.checkpoint() {
        tracing::warn!(error = %e, "WAL checkpoint on shutdown failed");
    }
    Ok(())
}

/// Assemble and print the session-open digest, within a
/// 2-second budget -- if the database is still busy past that, degrade to
/// an empty digest rather than block the host's session start.
async fn run_session_open(project_hash: String) -> Result<()> {
    let (server, shutdown_tx) = build_server().await?;
    let db = server.db();

    let digest = tokio::time::timeout(
        std::time::Duration::from_secs(2),
        tokio::task::spawn_blocking(move || db.with_conn(|conn| laminark::context::open_session(conn, &project_hash))),
    )
    .await;

    let _ = shutdown_tx.send(true);

    match digest {
        Ok(Ok(Ok(digest))) => println!("{}", laminark::context::format_digest(&digest)),
        Ok(Ok(Err(e))) => anyhow::bail!("session open failed: {e}"),
        Ok(Err(e)) => anyhow::bail!("session open task panicked: {e}"),
        Err(_) => println!("(session digest unavailable: exceeded 2s budget)"),
    }
    Ok(())
}

/// Invoke a tool directly, bypassing the MCP transport -- useful for
/// scripting and for host hooks that just need one call's result.
async fn run_tool(name: String, args: String) -> Result<()> {
    let (server, shutdown_tx) = build_server().await?;

    let result = match name.as_str() {
        "save_memory" => {
            let req: SaveMemoryRequest = serde_json::from_str(&args)?;
            server.save_memory(Parameters(req)).await
        }
        "recall" => {
            let req: RecallRequest = serde_json::from_str(&args)?;
            server.recall(Parameters(req)).await
        }
        "topic_context" => {
            let req: TopicContextRequest = serde_json::from_str(&args)?;
            server.topic_context(Parameters(req)).await
        }
        "query_graph" => {
            let req: QueryGraphRequest = serde_json::from_str(&args)?;
            server.query_graph(Parameters(req)).await
        }
        "graph_stats" => {
            let req: ProjectScopedRequest = serde_json::from_str(&args)?;
            server.graph_stats(Parameters(req)).await
        }
        "status" => {
            let req: ProjectScopedRequest = serde_json::from_str(&args)?;
            server.status(Parameters(req)).await
        }
        "ingest_knowledge" => {
            let req: IngestKnowledgeRequest = serde_json::from_str(&args)?;
            server.ingest_knowledge(Parameters(req)).await
        }
        "hygiene" => {
            let req: HygieneRequest = serde_json::from_str(&args)?;
            server.hygiene(Parameters(req)).await
        }
        other => anyhow::bail!("unknown tool: {other}"),
    };

    let _ = shutdown_tx.send(true);

    match result {
        Ok(call_result) => {
            for content in &call_result.content {
                if let Some(text) = content.as_text() {
                    println!("{}", text.text);
                }
            }
            Ok(())
        }
        Err(e) => anyhow::bail!("tool call failed: {e}"),
    }
}

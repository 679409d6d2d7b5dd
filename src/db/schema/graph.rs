// src/db/schema/graph.rs
// Knowledge graph nodes and edges, plus staleness flags
// raised by hygiene scoring (§4.8).

use anyhow::Result;
use rusqlite::Connection;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS graph_nodes (
    id               TEXT PRIMARY KEY,
    project_hash     TEXT NOT NULL,
    node_type        TEXT NOT NULL,
    name             TEXT NOT NULL,
    metadata         TEXT NOT NULL DEFAULT '{}',
    observation_ids  TEXT NOT NULL DEFAULT '[]',
    created_at       TEXT NOT NULL,
    updated_at       TEXT NOT NULL,
    UNIQUE (project_hash, node_type, name)
);

CREATE INDEX IF NOT EXISTS idx_graph_nodes_project_name
    ON graph_nodes (project_hash, name COLLATE NOCASE);

CREATE TABLE IF NOT EXISTS graph_edges (
    id           TEXT PRIMARY KEY,
    project_hash TEXT NOT NULL,
    source_id    TEXT NOT NULL REFERENCES graph_nodes(id),
    target_id    TEXT NOT NULL REFERENCES graph_nodes(id),
    edge_type    TEXT NOT NULL,
    confidence   REAL NOT NULL DEFAULT 1.0,
    created_at   TEXT NOT NULL,
    updated_at   TEXT NOT NULL,
    UNIQUE (source_id, target_id, edge_type)
);

CREATE INDEX IF NOT EXISTS idx_graph_edges_source
    ON graph_edges (source_id);

CREATE INDEX IF NOT EXISTS idx_graph_edges_target
    ON graph_edges (target_id);

CREATE TABLE IF NOT EXISTS staleness_flags (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    project_hash TEXT NOT NULL,
    edge_id      TEXT NOT NULL,
    reason       TEXT NOT NULL,
    created_at   TEXT NOT NULL,
    resolved_at  TEXT
);

CREATE INDEX IF NOT EXISTS idx_staleness_open
    ON staleness_flags (project_hash)
    WHERE resolved_at IS NULL;
";

pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

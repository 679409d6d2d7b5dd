// src/db/graph.rs
// Knowledge graph repository: typed nodes and edges, degree
// cap enforcement, traversal and aggregate stats.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use strum::{Display, EnumString};
use tracing::warn;

use crate::error::Result;
use crate::ids::new_id;

/// Maximum number of edges (in + out) a single node may accumulate before
/// new edges are rejected rather than silently growing a hub without bound.
pub const DEGREE_CAP: i64 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Project,
    File,
    Decision,
    Problem,
    Solution,
    Reference,
    Tool,
    Person,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RelationshipType {
    Modifies,
    InformedBy,
    VerifiedBy,
    CausedBy,
    SolvedBy,
    References,
    PrecededBy,
    RelatedTo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Out,
    In,
    Both,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub project_hash: String,
    pub node_type: String,
    pub name: String,
    pub metadata: Json,
    pub observation_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GraphNode {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let metadata_json: String = row.get("metadata")?;
        let obs_json: String = row.get("observation_ids")?;
        Ok(Self {
            id: row.get("id")?,
            project_hash: row.get("project_hash")?,
            node_type: row.get("node_type")?,
            name: row.get("name")?,
            metadata: serde_json::from_str(&metadata_json).unwrap_or(Json::Null),
            observation_ids: serde_json::from_str(&obs_json).unwrap_or_default(),
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEdge {
    pub id: String,
    pub project_hash: String,
    pub source_id: String,
    pub target_id: String,
    pub edge_type: String,
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GraphEdge {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            project_hash: row.get("project_hash")?,
            source_id: row.get("source_id")?,
            target_id: row.get("target_id")?,
            edge_type: row.get("edge_type")?,
            confidence: row.get("confidence")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

pub fn get_node(conn: &Connection, id: &str) -> Result<Option<GraphNode>> {
    conn.query_row("SELECT * FROM graph_nodes WHERE id = ?1", [id], GraphNode::from_row)
        .optional()
        .map_err(Into::into)
}

pub fn get_node_by_name_and_type(
    conn: &Connection,
    project_hash: &str,
    node_type: &str,
    name: &str,
) -> Result<Option<GraphNode>> {
    conn.query_row(
        "SELECT * FROM graph_nodes WHERE project_hash = ?1 AND node_type = ?2 AND name = ?3",
        params![project_hash, node_type, name],
        GraphNode::from_row,
    )
    .optional()
    .map_err(Into::into)
}

/// Insert a node, or merge into an existing one with the same
/// `(project_hash, node_type, name)`. Cross-session entity merging has no
/// disambiguation step (see DESIGN.md), so exact-name match is treated as
/// the same real-world entity.
pub fn upsert_node(
    conn: &Connection,
    project_hash: &str,
    node_type: &str,
    name: &str,
    metadata: Json,
    observation_id: Option<&str>,
) -> Result<GraphNode> {
    if let Some(existing) = get_node_by_name_and_type(conn, project_hash, node_type, name)? {
        let mut obs_ids = existing.observation_ids.clone();
        if let Some(oid) = observation_id {
            if !obs_ids.iter().any(|o| o == oid) {
                obs_ids.push(oid.to_string());
            }
        }
        let mut merged_metadata = existing.metadata.clone();
        if let (Json::Object(existing_map), Json::Object(new_map)) =
            (&mut merged_metadata, &metadata)
        {
            for (k, v) in new_map {
                existing_map.insert(k.clone(), v.clone());
            }
        } else if !metadata.is_null() {
            merged_metadata = metadata;
        }
        let now = Utc::now();
        conn.execute(
            "UPDATE graph_nodes SET metadata = ?2, observation_ids = ?3, updated_at = ?4 WHERE id = ?1",
            params![
                existing.id,
                serde_json::to_string(&merged_metadata)?,
                serde_json::to_string(&obs_ids)?,
                now,
            ],
        )?;
        return get_node(conn, &existing.id)?.ok_or(crate::error::LaminarkError::NotFound);
    }

    let id = new_id();
    let now = Utc::now();
    let obs_ids: Vec<String> = observation_id.into_iter().map(str::to_string).collect();
    conn.execute(
        "INSERT INTO graph_nodes
            (id, project_hash, node_type, name, metadata, observation_ids, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
        params![
            id,
            project_hash,
            node_type,
            name,
            serde_json::to_string(&metadata)?,
            serde_json::to_string(&obs_ids)?,
            now,
        ],
    )?;
    get_node(conn, &id)?.ok_or(crate::error::LaminarkError::NotFound)
}

pub fn degree(conn: &Connection, node_id: &str) -> Result<i64> {
    conn.query_row(
        "SELECT count(*) FROM graph_edges WHERE source_id = ?1 OR target_id = ?1",
        [node_id],
        |row| row.get(0),
    )
    .map_err(Into::into)
}

fn get_edge(
    conn: &Connection,
    source_id: &str,
    target_id: &str,
    edge_type: &str,
) -> Result<Option<GraphEdge>> {
    conn.query_row(
        "SELECT * FROM graph_edges WHERE source_id = ?1 AND target_id = ?2 AND edge_type = ?3",
        params![source_id, target_id, edge_type],
        GraphEdge::from_row,
    )
    .optional()
    .map_err(Into::into)
}

/// Insert or strengthen an edge. Returns `Ok(None)` — not an error — when
/// either endpoint is already at the degree cap and this would be a new
/// edge: the extraction pipeline logs and moves on rather than failing the
/// whole observation over one saturated hub node.
pub fn upsert_edge(
    conn: &Connection,
    project_hash: &str,
    source_id: &str,
    target_id: &str,
    edge_type: &str,
    confidence: f64,
) -> Result<Option<GraphEdge>> {
    if let Some(existing) = get_edge(conn, source_id, target_id, edge_type)? {
        let strengthened = confidence.max(existing.confidence);
        conn.execute(
            "UPDATE graph_edges SET confidence = ?2, updated_at = ?3 WHERE id = ?1",
            params![existing.id, strengthened, Utc::now()],
        )?;
        return Ok(get_edge(conn, source_id, target_id, edge_type)?);
    }

    if degree(conn, source_id)? >= DEGREE_CAP || degree(conn, target_id)? >= DEGREE_CAP {
        warn!(source_id, target_id, edge_type, "degree cap reached, dropping edge");
        return Ok(None);
    }

    let id = new_id();
    let now = Utc::now();
    conn.execute(
        "INSERT INTO graph_edges
            (id, project_hash, source_id, target_id, edge_type, confidence, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
        params![id, project_hash, source_id, target_id, edge_type, confidence, now],
    )?;
    Ok(get_edge(conn, source_id, target_id, edge_type)?)
}

/// All edge types currently recorded between this exact ordered pair,
/// regardless of type -- used to detect when a freshly-extracted
/// relationship contradicts one already on file for the same two nodes.
pub fn edge_types_between(conn: &Connection, source_id: &str, target_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT edge_type FROM graph_edges WHERE source_id = ?1 AND target_id = ?2",
    )?;
    let types = stmt
        .query_map(params![source_id, target_id], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(types)
}

/// Record an unresolved staleness flag (§4.6): a newer observation's
/// extraction produced a relationship type that contradicts one already
/// stored for the same node pair. Resolution is a user action, never
/// automatic.
pub fn flag_staleness(conn: &Connection, project_hash: &str, edge_id: &str, reason: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO staleness_flags (project_hash, edge_id, reason, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![project_hash, edge_id, reason, Utc::now()],
    )?;
    Ok(())
}

/// Drop the given observation id from every node's back-reference list in
/// a project, then delete any node left with no back-references and no
/// edges at all -- a dead orphan with nothing left pointing to it. Used
/// by hygiene purge (§4.6) after soft-deleting the observations
/// themselves, so the graph doesn't accumulate nodes for memories that no
/// longer exist.
pub fn prune_dead_orphans(conn: &Connection, project_hash: &str, purged_observation_ids: &[String]) -> Result<usize> {
    if purged_observation_ids.is_empty() {
        return Ok(0);
    }

    let mut stmt = conn.prepare("SELECT * FROM graph_nodes WHERE project_hash = ?1")?;
    let nodes: Vec<GraphNode> = stmt
        .query_map([project_hash], GraphNode::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut pruned = 0;
    for node in nodes {
        let remaining: Vec<String> = node
            .observation_ids
            .iter()
            .filter(|id| !purged_observation_ids.iter().any(|p| p == *id))
            .cloned()
            .collect();
        if remaining.len() != node.observation_ids.len() {
            conn.execute(
                "UPDATE graph_nodes SET observation_ids = ?2, updated_at = ?3 WHERE id = ?1",
                params![node.id, serde_json::to_string(&remaining)?, Utc::now()],
            )?;
        }
        if remaining.is_empty() && degree(conn, &node.id)? == 0 {
            conn.execute("DELETE FROM graph_nodes WHERE id = ?1", [&node.id])?;
            pruned += 1;
        }
    }
    Ok(pruned)
}

pub fn get_edges_for_node(
    conn: &Connection,
    node_id: &str,
    edge_types: Option<&[String]>,
    direction: Direction,
) -> Result<Vec<GraphEdge>> {
    let direction_clause = match direction {
        Direction::Out => "source_id = ?1",
        Direction::In => "target_id = ?1",
        Direction::Both => "(source_id = ?1 OR target_id = ?1)",
    };
    let sql = format!("SELECT * FROM graph_edges WHERE {direction_clause}");
    let mut stmt = conn.prepare(&sql)?;
    let edges: Vec<GraphEdge> = stmt
        .query_map([node_id], GraphEdge::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(match edge_types {
        Some(types) => edges
            .into_iter()
            .filter(|e| types.iter().any(|t| t == &e.edge_type))
            .collect(),
        None => edges,
    })
}

/// Root-finding for `query_graph`: an exact name match
/// first — scoped to `entity_type` when given, else across all types and
/// truncated to the first hit — falling back to a case-insensitive
/// substring search over up to `limit` roots.
pub fn find_roots(
    conn: &Connection,
    project_hash: &str,
    name: &str,
    entity_type: Option<&str>,
    limit: usize,
) -> Result<Vec<GraphNode>> {
    let exact: Vec<GraphNode> = match entity_type {
        Some(node_type) => {
            let mut stmt = conn.prepare(
                "SELECT * FROM graph_nodes WHERE project_hash = ?1 AND node_type = ?2 AND name = ?3",
            )?;
            stmt.query_map(params![project_hash, node_type, name], GraphNode::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?
        }
        None => {
            let mut stmt = conn.prepare(
                "SELECT * FROM graph_nodes WHERE project_hash = ?1 AND name = ?2",
            )?;
            stmt.query_map(params![project_hash, name], GraphNode::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?
        }
    };
    if !exact.is_empty() {
        // Across all types, an exact match returns only the first hit
        //; per-type, every exact match is already unique.
        return Ok(if entity_type.is_none() { vec![exact.into_iter().next().unwrap()] } else { exact });
    }

    let pattern = format!("%{name}%");
    let fuzzy: Vec<GraphNode> = match entity_type {
        Some(node_type) => {
            let mut stmt = conn.prepare(
                "SELECT * FROM graph_nodes
                 WHERE project_hash = ?1 AND node_type = ?2 AND name LIKE ?3 COLLATE NOCASE
                 ORDER BY name ASC LIMIT ?4",
            )?;
            stmt.query_map(params![project_hash, node_type, pattern, limit as i64], GraphNode::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?
        }
        None => {
            let mut stmt = conn.prepare(
                "SELECT * FROM graph_nodes
                 WHERE project_hash = ?1 AND name LIKE ?2 COLLATE NOCASE
                 ORDER BY name ASC LIMIT ?3",
            )?;
            stmt.query_map(params![project_hash, pattern, limit as i64], GraphNode::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?
        }
    };
    Ok(fuzzy)
}

#[derive(Debug, Clone, Serialize)]
pub struct TraversalHit {
    pub node: GraphNode,
    pub hop: u32,
    pub via_confidence: f64,
}

/// Breadth-first traversal from `root_id` up to `max_depth` hops,
/// optionally filtered by edge type and direction. Ordering is
/// deterministic: hop ascending, then confidence descending, then name
/// ascending, so repeated queries over unchanged data return identical
/// results.
pub fn traverse(
    conn: &Connection,
    root_id: &str,
    max_depth: u32,
    edge_types: Option<&[String]>,
    direction: Direction,
) -> Result<Vec<TraversalHit>> {
    use std::collections::VecDeque;

    let mut visited = std::collections::HashSet::new();
    visited.insert(root_id.to_string());
    let mut queue = VecDeque::new();
    queue.push_back((root_id.to_string(), 0u32));
    let mut hits = Vec::new();

    while let Some((current_id, hop)) = queue.pop_front() {
        if hop >= max_depth {
            continue;
        }
        let edges = get_edges_for_node(conn, &current_id, edge_types, direction)?;
        let mut neighbors: Vec<(String, f64)> = Vec::new();
        for edge in &edges {
            let neighbor_id = if edge.source_id == current_id {
                &edge.target_id
            } else {
                &edge.source_id
            };
            if visited.contains(neighbor_id) {
                continue;
            }
            neighbors.push((neighbor_id.clone(), edge.confidence));
        }

        let mut resolved: Vec<(GraphNode, f64)> = Vec::new();
        for (neighbor_id, confidence) in neighbors {
            if let Some(node) = get_node(conn, &neighbor_id)? {
                resolved.push((node, confidence));
            }
        }
        resolved.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.name.cmp(&b.0.name))
        });

        for (node, confidence) in resolved {
            visited.insert(node.id.clone());
            queue.push_back((node.id.clone(), hop + 1));
            hits.push(TraversalHit {
                node,
                hop: hop + 1,
                via_confidence: confidence,
            });
        }
    }

    hits.sort_by(|a, b| {
        a.hop
            .cmp(&b.hop)
            .then_with(|| b.via_confidence.partial_cmp(&a.via_confidence).unwrap_or(std::cmp::Ordering::Equal))
            .then_with(|| a.node.name.cmp(&b.node.name))
    });
    Ok(hits)
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphStats {
    pub total_nodes: i64,
    pub total_edges: i64,
    pub nodes_by_type: HashMap<String, i64>,
    pub avg_degree: f64,
    pub hotspots: Vec<(String, String, i64)>,
    pub duplicate_candidates: Vec<(String, String)>,
    pub open_staleness_flags: i64,
}

pub fn graph_stats(conn: &Connection, project_hash: &str) -> Result<GraphStats> {
    let total_nodes: i64 = conn.query_row(
        "SELECT count(*) FROM graph_nodes WHERE project_hash = ?1",
        [project_hash],
        |row| row.get(0),
    )?;
    let total_edges: i64 = conn.query_row(
        "SELECT count(*) FROM graph_edges WHERE project_hash = ?1",
        [project_hash],
        |row| row.get(0),
    )?;

    let mut nodes_by_type = HashMap::new();
    {
        let mut stmt = conn.prepare(
            "SELECT node_type, count(*) FROM graph_nodes WHERE project_hash = ?1 GROUP BY node_type",
        )?;
        let rows = stmt.query_map([project_hash], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (node_type, count) = row?;
            nodes_by_type.insert(node_type, count);
        }
    }

    let avg_degree = if total_nodes > 0 {
        (2 * total_edges) as f64 / total_nodes as f64
    } else {
        0.0
    };

    let hotspot_threshold = (DEGREE_CAP as f64 * 0.8) as i64;
    let mut hotspots = Vec::new();
    {
        let mut stmt = conn.prepare(
            "SELECT id, name FROM graph_nodes WHERE project_hash = ?1",
        )?;
        let rows: Vec<(String, String)> = stmt
            .query_map([project_hash], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        for (id, name) in rows {
            let d = degree(conn, &id)?;
            if d >= hotspot_threshold {
                hotspots.push((id, name, d));
            }
        }
    }
    hotspots.sort_by(|a, b| b.2.cmp(&a.2));

    let mut duplicate_candidates = Vec::new();
    {
        let mut stmt = conn.prepare(
            "SELECT a.name, b.name FROM graph_nodes a
             JOIN graph_nodes b ON a.project_hash = b.project_hash
                AND lower(a.name) = lower(b.name) AND a.id < b.id
             WHERE a.project_hash = ?1",
        )?;
        let rows = stmt.query_map([project_hash], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        for row in rows {
            duplicate_candidates.push(row?);
        }
    }

    let open_staleness_flags: i64 = conn.query_row(
        "SELECT count(*) FROM staleness_flags WHERE project_hash = ?1 AND resolved_at IS NULL",
        [project_hash],
        |row| row.get(0),
    )?;

    Ok(GraphStats {
        total_nodes,
        total_edges,
        nodes_by_type,
        avg_degree,
        hotspots,
        duplicate_candidates,
        open_staleness_flags,
    })
}

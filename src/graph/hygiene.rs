// src/graph/hygiene.rs
// Memory hygiene scoring: flag low-value stored
// observations for review, tiered by a weighted signal score. Dry-run by
// default — purging is a separate, explicit call.

use chrono::{Duration, Utc};
use rusqlite::Connection;
use serde::Serialize;

use crate::config::file::HygieneConfig;
use crate::db::observations::{self, ListFilter, Observation};
use crate::error::Result;

/// Staleness window: an observation untouched this long contributes its
/// `stale` weight. Chosen as a reasonable default and recorded as a
/// resolved Open Question.
const STALE_AFTER_DAYS: i64 = 90;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HygieneTier {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Serialize)]
pub struct HygieneFinding {
    pub observation_id: String,
    pub score: f64,
    pub tier: HygieneTier,
    pub signals: Vec<&'static str>,
}

/// How many of the most recent observations in the project to compare a
/// new one against for content-overlap rejection. Bounded so admission
/// stays O(1)-ish relative to project size rather than scanning the
/// whole table on every `save_memory` call.
const ADMISSION_OVERLAP_WINDOW: usize = 200;

/// Reject a new observation outright if its content is near-identical to
/// something already stored, or if it carries too little signal to be
/// worth a row. Returns the rejection reason, or `None` to admit.
pub fn admission_check(
    conn: &Connection,
    project_hash: &str,
    content: &str,
    config: &HygieneConfig,
) -> Result<Option<String>> {
    let trimmed = content.trim();
    if trimmed.chars().count() < config.short_content_threshold {
        return Ok(Some(format!(
            "content is below the relevance floor ({} chars, minimum {})",
            trimmed.chars().count(),
            config.short_content_threshold
        )));
    }

    let candidate_words = word_set(trimmed);
    if candidate_words.is_empty() {
        return Ok(Some("content has no indexable words".to_string()));
    }

    let recent = observations::list(conn, &[project_hash.to_string()], ADMISSION_OVERLAP_WINDOW, 0)?;
    for existing in &recent {
        let overlap = jaccard(&candidate_words, &word_set(&existing.content));
        if overlap >= config.duplicate_overlap_threshold {
            return Ok(Some(format!(
                "duplicate of existing observation {} ({:.0}% content overlap)",
                existing.id,
                overlap * 100.0
            )));
        }
    }

    Ok(None)
}

fn word_set(text: &str) -> std::collections::HashSet<String> {
    text.split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .filter(|w| !w.is_empty())
        .collect()
}

fn jaccard(a: &std::collections::HashSet<String>, b: &std::collections::HashSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

fn is_orphaned(conn: &Connection, observation_id: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT count(*) FROM graph_nodes WHERE observation_ids LIKE ?1",
        [format!("%{observation_id}%")],
        |row| row.get(0),
    )?;
    Ok(count == 0)
}

fn is_island(conn: &Connection, observation_id: &str) -> Result<bool> {
    let node_ids: Vec<String> = {
        let mut stmt = conn.prepare(
            "SELECT id FROM graph_nodes WHERE observation_ids LIKE ?1",
        )?;
        stmt.query_map([format!("%{observation_id}%")], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?
    };
    if node_ids.is_empty() {
        return Ok(false);
    }
    for node_id in &node_ids {
        if crate::db::graph::degree(conn, node_id)? > 0 {
            return Ok(false);
        }
    }
    Ok(true)
}

fn score_one(
    conn: &Connection,
    obs: &Observation,
    config: &HygieneConfig,
) -> Result<(f64, Vec<&'static str>)> {
    let mut score = 0.0;
    let mut signals = Vec::new();
    let w = &config.signal_weights;

    if is_orphaned(conn, &obs.id)? {
        score += w.orphaned;
        signals.push("orphaned");
    }
    if is_island(conn, &obs.id)? {
        score += w.island;
        signals.push("island");
    }
    if obs.kind == "noise" {
        score += w.noise_classified;
        signals.push("noise_classified");
    }
    if obs.content.chars().count() < config.short_content_threshold {
        score += w.short_content;
        signals.push("short_content");
    }
    if obs.source != "host" {
        score += w.auto_captured;
        signals.push("auto_captured");
    }
    if Utc::now() - obs.updated_at > Duration::days(STALE_AFTER_DAYS) {
        score += w.stale;
        signals.push("stale");
    }

    Ok((score.min(1.0), signals))
}

fn tier_for(score: f64, config: &HygieneConfig) -> HygieneTier {
    if score >= config.high_tier_threshold {
        HygieneTier::High
    } else if score >= config.medium_tier_threshold {
        HygieneTier::Medium
    } else {
        HygieneTier::Low
    }
}

/// Score every non-deleted observation in a project (optionally narrowed
/// to one session), returning findings sorted by score descending. This
/// is read-only — nothing is purged.
pub fn hygiene_report(
    conn: &Connection,
    project_hash: &str,
    session_id: Option<&str>,
    config: &HygieneConfig,
) -> Result<Vec<HygieneFinding>> {
    let filter = ListFilter {
        session_id: session_id.map(str::to_string),
        ..ListFilter::default()
    };
    let observations = observations::list_filtered(conn, &[project_hash.to_string()], &filter, usize::MAX, 0)?;
    let mut findings = Vec::with_capacity(observations.len());
    for obs in &observations {
        let (score, signals) = score_one(conn, obs, config)?;
        if score <= 0.0 {
            continue;
        }
        findings.push(HygieneFinding {
            observation_id: obs.id.clone(),
            score,
            tier: tier_for(score, config),
            signals,
        });
    }
    findings.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    Ok(findings)
}

#[derive(Debug, Clone, Serialize)]
pub struct PurgeResult {
    pub candidates: usize,
    pub deleted: usize,
    pub orphan_nodes_removed: usize,
    pub dry_run: bool,
    pub findings: Vec<HygieneFinding>,
}

/// Which tiers the `hygiene` tool's `tier` parameter selects for purge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierSelection {
    High,
    MediumAndUp,
    All,
}

impl TierSelection {
    pub fn parse(s: &str) -> Self {
        match s {
            "medium" => TierSelection::MediumAndUp,
            "all" => TierSelection::All,
            _ => TierSelection::High,
        }
    }

    fn matches(self, tier: HygieneTier) -> bool {
        match self {
            TierSelection::High => tier == HygieneTier::High,
            TierSelection::MediumAndUp => matches!(tier, HygieneTier::High | HygieneTier::Medium),
            TierSelection::All => true,
        }
    }
}

/// Score and, unless `dry_run`, soft-delete every finding at or above the
/// requested tier. `dry_run` is the default at every call
/// site but the explicit purge invocation.
pub fn purge(
    conn: &Connection,
    project_hash: &str,
    session_id: Option<&str>,
    config: &HygieneConfig,
    tier: TierSelection,
    limit: usize,
    dry_run: bool,
) -> Result<PurgeResult> {
    let report = hygiene_report(conn, project_hash, session_id, config)?;
    let selected: Vec<HygieneFinding> = report
        .into_iter()
        .filter(|f| tier.matches(f.tier))
        .take(limit.max(1))
        .collect();
    let candidates = selected.len();

    let mut deleted = 0;
    let mut orphan_nodes_removed = 0;
    if !dry_run {
        let mut purged_ids = Vec::with_capacity(selected.len());
        for finding in &selected {
            if observations::soft_delete(conn, &finding.observation_id)? {
                purged_ids.push(finding.observation_id.clone());
                deleted += 1;
            }
        }
        orphan_nodes_removed = crate::db::graph::prune_dead_orphans(conn, project_hash, &purged_ids)?;
    }

    Ok(PurgeResult {
        candidates,
        deleted,
        orphan_nodes_removed,
        dry_run,
        findings: selected,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::observations::{create, NewObservation};
    use crate::db::test_support::memory_conn;

    fn short_noisy_observation(conn: &Connection, project_hash: &str) -> Observation {
        create(
            conn,
            NewObservation {
                project_hash: project_hash.to_string(),
                session_id: None,
                kind: "noise".to_string(),
                title: None,
                content: "ok".to_string(),
                source: "auto".to_string(),
            },
        )
        .unwrap()
    }

    #[test]
    fn admission_rejects_below_relevance_floor() {
        let conn = memory_conn();
        let reason = admission_check(&conn, "proj-a", "ok", &HygieneConfig::default())
            .unwrap()
            .unwrap();
        assert!(reason.contains("relevance floor"));
    }

    #[test]
    fn admission_rejects_near_duplicate_content() {
        let conn = memory_conn();
        create(
            &conn,
            NewObservation {
                project_hash: "proj-a".to_string(),
                session_id: None,
                kind: "note".to_string(),
                title: None,
                content: "the authentication middleware now rejects expired tokens cleanly".to_string(),
                source: "host".to_string(),
            },
        )
        .unwrap();
        let reason = admission_check(
            &conn,
            "proj-a",
            "the authentication middleware now rejects expired tokens cleanly!",
            &HygieneConfig::default(),
        )
        .unwrap();
        assert!(reason.is_some());
    }

    #[test]
    fn admission_admits_novel_content() {
        let conn = memory_conn();
        let reason = admission_check(
            &conn,
            "proj-a",
            "switched the retry backoff from linear to exponential with jitter",
            &HygieneConfig::default(),
        )
        .unwrap();
        assert!(reason.is_none());
    }

    #[test]
    fn flags_short_noisy_auto_captured_orphan() {
        let conn = memory_conn();
        let obs = short_noisy_observation(&conn, "proj-a");
        let report = hygiene_report(&conn, "proj-a", None, &HygieneConfig::default()).unwrap();
        assert_eq!(report.len(), 1);
        assert_eq!(report[0].observation_id, obs.id);
        assert!(report[0].signals.contains(&"orphaned"));
        assert!(report[0].signals.contains(&"noise_classified"));
        assert!(report[0].signals.contains(&"short_content"));
        assert!(report[0].signals.contains(&"auto_captured"));
    }

    #[test]
    fn dry_run_purge_does_not_delete() {
        let conn = memory_conn();
        short_noisy_observation(&conn, "proj-a");
        let result = purge(&conn, "proj-a", None, &HygieneConfig::default(), TierSelection::High, 100, true).unwrap();
        assert_eq!(result.deleted, 0);
        assert!(result.candidates >= 1);
        let report = hygiene_report(&conn, "proj-a", None, &HygieneConfig::default()).unwrap();
        assert!(!report.is_empty());
    }

    #[test]
    fn non_dry_run_purge_soft_deletes_high_tier() {
        let conn = memory_conn();
        short_noisy_observation(&conn, "proj-a");
        let result = purge(&conn, "proj-a", None, &HygieneConfig::default(), TierSelection::High, 100, false).unwrap();
        assert_eq!(result.deleted, result.candidates);
        let remaining = observations::list(&conn, &["proj-a".to_string()], 10, 0).unwrap();
        assert!(remaining.is_empty());
    }

    #[test]
    fn purge_removes_dead_orphan_graph_nodes() {
        let conn = memory_conn();
        let obs = short_noisy_observation(&conn, "proj-a");
        crate::db::graph::upsert_node(
            &conn,
            "proj-a",
            "reference",
            "lonely-note",
            serde_json::Value::Null,
            Some(&obs.id),
        )
        .unwrap();

        let result = purge(&conn, "proj-a", None, &HygieneConfig::default(), TierSelection::MediumAndUp, 100, false).unwrap();
        assert_eq!(result.orphan_nodes_removed, 1);
        let node = crate::db::graph::get_node_by_name_and_type(&conn, "proj-a", "reference", "lonely-note").unwrap();
        assert!(node.is_none());
    }
}

// src/status/mod.rs
// Status dashboard: a cached markdown summary per project,
// invalidated on write rather than on a fixed TTL — writes are infrequent
// enough, and status checks frequent enough, that TTL expiry alone would
// either serve stale data or recompute needlessly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use moka::future::Cache;

use crate::db::{graph, observations, sessions, Database};
use crate::error::Result;

pub struct StatusCache {
    cache: Cache<String, String>,
    dirty: Arc<AtomicBool>,
    started_at: Instant,
    db: Database,
}

impl StatusCache {
    pub fn new(db: Database) -> Self {
        Self {
            cache: Cache::new(256),
            dirty: Arc::new(AtomicBool::new(true)),
            started_at: Instant::now(),
            db,
        }
    }

    /// Invalidate the cached status for every project. Called after any
    /// write that would change what `status` reports (new observation,
    /// session transition, graph materialization).
    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Relaxed);
    }

    pub async fn render(&self, project_hash: &str) -> Result<String> {
        if !self.dirty.load(Ordering::Relaxed) {
            if let Some(cached) = self.cache.get(project_hash).await {
                return Ok(patch_uptime(&cached, self.uptime_secs()));
            }
        }

        let rendered = self.render_fresh(project_hash)?;
        self.cache.insert(project_hash.to_string(), rendered.clone()).await;
        self.dirty.store(false, Ordering::Relaxed);
        Ok(patch_uptime(&rendered, self.uptime_secs()))
    }

    fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    fn render_fresh(&self, project_hash: &str) -> Result<String> {
        let project_hash = project_hash.to_string();
        self.db.with_conn(|conn| {
            let observation_count = observations::count(conn, &[project_hash.clone()])?;
            let active_session = sessions::get_active(conn, &project_hash)?;
            let stats = graph::graph_stats(conn, &project_hash)?;

            Ok(format!(
                "# Laminark status\n\n\
                 uptime: {{UPTIME}}\n\
                 observations: {observation_count}\n\
                 active session: {}\n\
                 graph nodes: {} ({} types)\n\
                 graph edges: {}\n\
                 avg degree: {:.2}\n\
                 hotspots: {}\n\
                 open staleness flags: {}\n",
                active_session.map(|s| s.id).unwrap_or_else(|| "none".to_string()),
                stats.total_nodes,
                stats.nodes_by_type.len(),
                stats.total_edges,
                stats.avg_degree,
                stats.hotspots.len(),
                stats.open_staleness_flags,
            ))
        })
    }
}

fn patch_uptime(rendered: &str, uptime_secs: u64) -> String {
    rendered.replace("{UPTIME}", &format!("{uptime_secs}s"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    #[tokio::test]
    async fn render_includes_observation_count() {
        let db = Database::open_in_memory().unwrap();
        let status = StatusCache::new(db);
        let rendered = status.render("proj-a").await.unwrap();
        assert!(rendered.contains("observations: 0"));
        assert!(rendered.contains("active session: none"));
    }

    #[tokio::test]
    async fn dirty_flag_forces_recompute() {
        let db = Database::open_in_memory().unwrap();
        let status = StatusCache::new(db.clone());
        status.render("proj-a").await.unwrap();

        db.with_conn(|conn| crate::db::sessions::create(conn, "proj-a").map(|_| ())).unwrap();
        status.mark_dirty();

        let rendered = status.render("proj-a").await.unwrap();
        assert!(rendered.contains("active session:"));
        assert!(!rendered.contains("active session: none"));
    }
}

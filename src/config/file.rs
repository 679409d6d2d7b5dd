// src/config/file.rs
// File-based configuration from ~/.laminark/config.toml

use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{debug, warn};

/// Top-level configuration, loaded once at startup and shared via `Arc`.
#[derive(Debug, Deserialize, Clone)]
pub struct LaminarkConfig {
    /// Path to the SQLite store. Defaults to `~/.laminark/<project_hash>.db`
    /// resolution is host-driven; this is the override.
    #[serde(default)]
    pub db_path: Option<PathBuf>,

    #[serde(default = "LaminarkConfig::default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    #[serde(default)]
    pub embedding_strategy: EmbeddingStrategyKind,

    #[serde(default)]
    pub topic_detection: TopicDetectionConfig,

    #[serde(default)]
    pub hygiene: HygieneConfig,

    #[serde(default = "LaminarkConfig::default_token_budget")]
    pub token_budget: usize,

    #[serde(default = "LaminarkConfig::default_full_view_budget")]
    pub full_view_token_budget: usize,

    /// Per-project cross-access permission set: project_hash -> readable project hashes.
    #[serde(default)]
    pub cross_access: HashMap<String, Vec<String>>,
}

impl Default for LaminarkConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            busy_timeout_ms: Self::default_busy_timeout_ms(),
            embedding_strategy: EmbeddingStrategyKind::default(),
            topic_detection: TopicDetectionConfig::default(),
            hygiene: HygieneConfig::default(),
            token_budget: Self::default_token_budget(),
            full_view_token_budget: Self::default_full_view_budget(),
            cross_access: HashMap::new(),
        }
    }
}

impl LaminarkConfig {
    fn default_busy_timeout_ms() -> u64 {
        5_000
    }
    fn default_token_budget() -> usize {
        2_000
    }
    fn default_full_view_budget() -> usize {
        4_000
    }

    /// Load config from `~/.laminark/config.toml`, falling back to defaults
    /// (with a warning) on any read or parse failure.
    pub fn load() -> Self {
        let path = Self::config_path();
        match std::fs::read_to_string(&path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => {
                    debug!(path = %path.display(), "Loaded config from file");
                    config
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to parse config file");
                    Self::default()
                }
            },
            Err(_) => {
                debug!(path = %path.display(), "Config file not found, using defaults");
                Self::default()
            }
        }
    }

    pub fn config_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| {
                warn!("HOME not set — using current directory for Laminark config");
                PathBuf::from(".")
            })
            .join(".laminark")
            .join("config.toml")
    }

    /// Resolve the set of project hashes the given project may read,
    /// including itself.
    pub fn cross_access_for(&self, project_hash: &str) -> Vec<String> {
        let mut set = vec![project_hash.to_string()];
        if let Some(extra) = self.cross_access.get(project_hash) {
            set.extend(extra.iter().cloned());
        }
        set
    }
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingStrategyKind {
    #[default]
    Local,
    HostDelegated,
    Hybrid,
}

/// Sensitivity presets for the adaptive topic-shift threshold.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Sensitivity {
    Sensitive,
    #[default]
    Balanced,
    Relaxed,
}

impl Sensitivity {
    /// The `k` multiplier applied to the standard deviation term.
    pub fn k(self) -> f64 {
        match self {
            Sensitivity::Sensitive => 1.0,
            Sensitivity::Balanced => 1.5,
            Sensitivity::Relaxed => 2.5,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct TopicDetectionConfig {
    #[serde(default = "TopicDetectionConfig::default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub sensitivity: Sensitivity,
    /// Explicit override of the `k` multiplier; takes precedence over `sensitivity`.
    pub multiplier: Option<f64>,
    /// Manual override of the adaptive threshold; preempts all adaptation.
    pub manual_threshold: Option<f64>,
    #[serde(default = "TopicDetectionConfig::default_alpha")]
    pub ewma_alpha: f64,
    #[serde(default = "TopicDetectionConfig::default_tau_min")]
    pub tau_min: f64,
    #[serde(default = "TopicDetectionConfig::default_tau_max")]
    pub tau_max: f64,
    #[serde(default = "TopicDetectionConfig::default_tau0")]
    pub tau0: f64,
}

impl Default for TopicDetectionConfig {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
            sensitivity: Sensitivity::default(),
            multiplier: None,
            manual_threshold: None,
            ewma_alpha: Self::default_alpha(),
            tau_min: Self::default_tau_min(),
            tau_max: Self::default_tau_max(),
            tau0: Self::default_tau0(),
        }
    }
}

impl TopicDetectionConfig {
    fn default_enabled() -> bool {
        true
    }
    fn default_alpha() -> f64 {
        0.3
    }
    fn default_tau_min() -> f64 {
        0.15
    }
    fn default_tau_max() -> f64 {
        0.6
    }
    fn default_tau0() -> f64 {
        0.3
    }

    pub fn k(&self) -> f64 {
        self.multiplier.unwrap_or_else(|| self.sensitivity.k())
    }
}

/// Hygiene (C9) scoring configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct HygieneConfig {
    #[serde(default = "HygieneConfig::default_short_content_threshold")]
    pub short_content_threshold: usize,
    #[serde(default = "HygieneConfig::default_high_tier")]
    pub high_tier_threshold: f64,
    #[serde(default = "HygieneConfig::default_medium_tier")]
    pub medium_tier_threshold: f64,
    /// Jaccard word-overlap ratio above which an incoming observation is
    /// rejected at intake as a duplicate of an existing one (C9 admission).
    #[serde(default = "HygieneConfig::default_duplicate_overlap_threshold")]
    pub duplicate_overlap_threshold: f64,
    #[serde(default)]
    pub signal_weights: HygieneWeights,
}

impl Default for HygieneConfig {
    fn default() -> Self {
        Self {
            short_content_threshold: Self::default_short_content_threshold(),
            high_tier_threshold: Self::default_high_tier(),
            medium_tier_threshold: Self::default_medium_tier(),
            duplicate_overlap_threshold: Self::default_duplicate_overlap_threshold(),
            signal_weights: HygieneWeights::default(),
        }
    }
}

impl HygieneConfig {
    fn default_short_content_threshold() -> usize {
        40
    }
    fn default_high_tier() -> f64 {
        0.70
    }
    fn default_medium_tier() -> f64 {
        0.50
    }
    fn default_duplicate_overlap_threshold() -> f64 {
        0.85
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
pub struct HygieneWeights {
    #[serde(default = "HygieneWeights::default_orphaned")]
    pub orphaned: f64,
    #[serde(default = "HygieneWeights::default_island")]
    pub island: f64,
    #[serde(default = "HygieneWeights::default_noise_classified")]
    pub noise_classified: f64,
    #[serde(default = "HygieneWeights::default_short_content")]
    pub short_content: f64,
    #[serde(default = "HygieneWeights::default_auto_captured")]
    pub auto_captured: f64,
    #[serde(default = "HygieneWeights::default_stale")]
    pub stale: f64,
}

impl Default for HygieneWeights {
    fn default() -> Self {
        Self {
            orphaned: Self::default_orphaned(),
            island: Self::default_island(),
            noise_classified: Self::default_noise_classified(),
            short_content: Self::default_short_content(),
            auto_captured: Self::default_auto_captured(),
            stale: Self::default_stale(),
        }
    }
}

impl HygieneWeights {
    fn default_orphaned() -> f64 {
        0.25
    }
    fn default_island() -> f64 {
        0.15
    }
    fn default_noise_classified() -> f64 {
        0.20
    }
    fn default_short_content() -> f64 {
        0.15
    }
    fn default_auto_captured() -> f64 {
        0.10
    }
    fn default_stale() -> f64 {
        0.15
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sensitivity_presets_scale_k_with_relaxation() {
        assert_eq!(Sensitivity::Sensitive.k(), 1.0);
        assert_eq!(Sensitivity::Balanced.k(), 1.5);
        assert_eq!(Sensitivity::Relaxed.k(), 2.5);
    }

    #[test]
    fn cross_access_always_includes_self() {
        let cfg = LaminarkConfig::default();
        let set = cfg.cross_access_for("proj-a");
        assert_eq!(set, vec!["proj-a".to_string()]);
    }

    #[test]
    fn cross_access_includes_granted_projects() {
        let mut cfg = LaminarkConfig::default();
        cfg.cross_access
            .insert("proj-a".to_string(), vec!["proj-b".to_string()]);
        let set = cfg.cross_access_for("proj-a");
        assert!(set.contains(&"proj-a".to_string()));
        assert!(set.contains(&"proj-b".to_string()));
    }
}

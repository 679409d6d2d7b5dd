// src/config/env.rs
// Environment-variable configuration overrides

use std::path::PathBuf;

/// Environment-derived overrides, read once at startup and merged over the
/// file-based config. Kept separate from `LaminarkConfig` the way the
/// teacher splits `config/env.rs` from `config/file.rs` — env vars are for
/// host-level overrides (CI, containers), file config for persistent
/// per-machine preference.
#[derive(Debug, Clone, Default)]
pub struct EnvConfig {
    pub db_path: Option<PathBuf>,
    pub log_level: Option<String>,
    pub busy_timeout_ms: Option<u64>,
}

impl EnvConfig {
    pub fn from_env() -> Self {
        Self {
            db_path: std::env::var("LAMINARK_DB_PATH").ok().map(PathBuf::from),
            log_level: std::env::var("LAMINARK_LOG_LEVEL").ok(),
            busy_timeout_ms: parse_u64_env("LAMINARK_BUSY_TIMEOUT_MS"),
        }
    }
}

fn parse_u64_env(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

/// Parse a boolean environment variable ("1"/"true"/"yes" => true).
pub fn parse_bool_env(key: &str) -> Option<bool> {
    std::env::var(key).ok().map(|v| {
        let v = v.to_lowercase();
        v == "1" || v == "true" || v == "yes"
    })
}

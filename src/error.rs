// src/error.rs
// Standardized error types for Laminark

use thiserror::Error;

/// Main error type for the Laminark library.
#[derive(Error, Debug)]
pub enum LaminarkError {
    #[error("not found")]
    NotFound,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("database busy")]
    Busy,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("degree exceeded")]
    DegreeExceeded,

    #[error("capability unavailable: {0}")]
    Unavailable(String),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("shutting down")]
    ShuttingDown,

    #[error("embedding error: {0}")]
    Embedding(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("unknown error: {0}")]
    Other(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Convenience alias for `Result` using `LaminarkError`.
pub type Result<T> = std::result::Result<T, LaminarkError>;

impl LaminarkError {
    /// Convert to a user-facing string for the MCP tool boundary — no
    /// internal detail or stack surface.
    pub fn to_user_string(&self) -> String {
        match self {
            LaminarkError::Db(_) | LaminarkError::Io(_) | LaminarkError::Anyhow(_) => {
                "internal storage error".to_string()
            }
            other => other.to_string(),
        }
    }

    /// True for capability-degradation errors that should never surface as
    /// tool failures — the caller should silently fall back instead.
    pub fn is_degradable(&self) -> bool {
        matches!(self, LaminarkError::Unavailable(_))
    }
}

impl From<String> for LaminarkError {
    fn from(s: String) -> Self {
        LaminarkError::Other(s)
    }
}

impl From<LaminarkError> for String {
    fn from(err: LaminarkError) -> Self {
        err.to_string()
    }
}

/// Check whether a rusqlite error represents contention (busy/locked),
/// distinct from a genuine constraint or corruption failure.
pub fn is_busy(err: &rusqlite::Error) -> bool {
    use rusqlite::ffi;
    matches!(
        err,
        rusqlite::Error::SqliteFailure(
            ffi::Error {
                code: ffi::ErrorCode::DatabaseBusy | ffi::ErrorCode::DatabaseLocked,
                ..
            },
            _,
        )
    )
}

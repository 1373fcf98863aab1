//! Error types for Panelist.

use std::time::Duration;
use thiserror::Error;

/// Library-level error type for Panelist operations.
#[derive(Error, Debug)]
pub enum PanelistError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Feed error: {0}")]
    Feed(String),

    #[error("Resolve failed: {0}")]
    Resolve(String),

    #[error("Grouping error: {0}")]
    Grouping(String),

    #[error("Generation failed: {0}")]
    Generation(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Blob storage error: {0}")]
    Blob(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Translation failed: {0}")]
    Translation(String),

    #[error("Schedule error: {0}")]
    Schedule(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),
}

impl PanelistError {
    /// Whether this error is a provider rate limit that should be retried transparently.
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, PanelistError::RateLimited { .. })
    }

    /// Delay requested by the provider, if one was parsed from the error.
    pub fn retry_delay(&self) -> Option<Duration> {
        match self {
            PanelistError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Whether this error may be fixed by re-prompting the model with the error text.
    pub fn is_recoverable_parse(&self) -> bool {
        matches!(self, PanelistError::Parse(_))
    }
}

/// Result type alias for Panelist operations.
pub type Result<T> = std::result::Result<T, PanelistError>;

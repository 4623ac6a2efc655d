//! Error types for the ingestion core

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("HTTP request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON decoding failed: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Field is named `provider`, not `source`, so thiserror does not
    // treat it as an error cause.
    #[error("Quota exhausted for {provider}: {reason}")]
    QuotaExhausted { provider: String, reason: String },

    #[error("Circuit breaker open for source: {0}")]
    CircuitOpen(String),

    #[error("Quota admission timed out")]
    AdmissionTimeout,

    #[error("API error: {code} - {message}")]
    Api { code: String, message: String },

    #[error("All eligible sources exhausted or failing")]
    AllSourcesExhausted,

    #[error("Source not configured: {0}")]
    SourceNotConfigured(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl IngestError {
    /// True for failures the caller may retry after a reset or timeout.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            IngestError::QuotaExhausted { .. }
                | IngestError::CircuitOpen(_)
                | IngestError::AdmissionTimeout
                | IngestError::Network(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;

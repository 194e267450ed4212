//! Custom error types for pubmed-rag

use std::time::Duration;
use thiserror::Error;

/// Main error type for pubmed-rag operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Vector index error: {0}")]
    VectorIndex(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Generation failed: {0}")]
    Generation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error(
        "Batch is misaligned: {ids} ids, {vectors} vectors and {payloads} payloads must have equal length"
    )]
    Alignment {
        ids: usize,
        vectors: usize,
        payloads: usize,
    },

    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: String,
        timeout: Duration,
    },

    #[error("Ingestion already running for collection '{0}' (use --force to clear a stale run)")]
    IngestionInProgress(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn timeout(operation: impl Into<String>, timeout: Duration) -> Self {
        Error::Timeout {
            operation: operation.into(),
            timeout,
        }
    }

    /// True for the failure kinds a caller may reasonably retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Timeout { .. } | Error::Http(_))
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Other(err.to_string())
    }
}

/// Result type alias for pubmed-rag
pub type Result<T> = std::result::Result<T, Error>;

/// Convert qdrant errors
impl From<qdrant_client::QdrantError> for Error {
    fn from(err: qdrant_client::QdrantError) -> Self {
        Error::VectorIndex(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alignment_message_names_all_lengths() {
        let err = Error::Alignment {
            ids: 3,
            vectors: 3,
            payloads: 2,
        };
        let msg = err.to_string();
        assert!(msg.contains("3 ids"));
        assert!(msg.contains("2 payloads"));
    }

    #[test]
    fn test_transient_errors() {
        assert!(Error::timeout("search", Duration::from_secs(1)).is_transient());
        assert!(!Error::Generation("empty".to_string()).is_transient());
        assert!(!Error::NotFound("ids".to_string()).is_transient());
    }
}

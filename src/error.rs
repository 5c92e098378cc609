use thiserror::Error;

use crate::gateways::{EmbeddingError, GenerationError, SettlementError};
use crate::index::IndexError;

/// Main error type for the Tollgate pipeline
#[derive(Error, Debug)]
pub enum TollgateError {
    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration validation errors
    #[error("Configuration validation failed: {errors:?}")]
    ConfigValidation { errors: Vec<ValidationError> },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: std::path::PathBuf },

    /// Question rejected before a job was created
    #[error("Invalid question: {0}")]
    InvalidQuestion(String),

    /// Settlement terms arrived with a deadline that already passed
    #[error("Payment deadline {pay_by} is already in the past")]
    DeadlineInPast { pay_by: chrono::DateTime<chrono::Utc> },

    /// Job lookup failed
    #[error("Job not found: {id}")]
    JobNotFound { id: uuid::Uuid },

    /// Settlement service errors surfaced during job creation
    #[error("Settlement error: {0}")]
    Settlement(#[from] SettlementError),

    /// Retrieval index errors
    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    /// Embedding gateway errors
    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    /// Answer generator errors
    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),

    /// IO errors
    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    /// TOML deserialization errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),

    /// Generic errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Configuration validation error
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// Path to the configuration key that failed validation
    pub path: String,
    /// Error message describing the validation failure
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result type for Tollgate operations
pub type Result<T> = std::result::Result<T, TollgateError>;

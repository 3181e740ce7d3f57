//! Error types for analysis engines.

use thiserror::Error;

use docenrich_model::ModelError;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDeserialize(#[from] toml::de::Error),

    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("annotation model error: {0}")]
    Model(#[from] ModelError),

    #[error("invalid resource specifier: {0}")]
    InvalidSpecifier(String),

    #[error("engine initialization failed: {0}")]
    Initialization(String),

    #[error("processing failed: {0}")]
    Process(String),
}

//! Error types for the bundle crate.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BundleError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDeserialize(#[from] toml::de::Error),

    #[error("missing required entry: {0}")]
    MissingEntry(String),

    #[error("manifest validation error: {0}")]
    ManifestInvalid(String),

    #[error("invalid component id: {0:?}")]
    InvalidComponentId(String),

    #[error("bundle entry escapes the install directory: {0}")]
    UnsafeEntryPath(String),

    #[error("component not installed: {0}")]
    NotInstalled(String),

    #[error("timed out after {waited_ms}ms waiting for install lock {}", path.display())]
    LockTimeout { path: PathBuf, waited_ms: u128 },
}

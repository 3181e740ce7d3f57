//! Error types for the annotation model.

use thiserror::Error;

/// Result type for model operations.
pub type Result<T> = std::result::Result<T, ModelError>;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("unknown type: {0}")]
    UnknownType(String),

    #[error("type '{type_name}' declares no feature '{feature}'")]
    UnknownFeature { type_name: String, feature: String },

    #[error("type declared twice: {0}")]
    DuplicateType(String),

    #[error("feature '{feature}' declared twice on type '{type_name}'")]
    DuplicateFeature { type_name: String, feature: String },

    #[error("type '{type_name}' has unresolvable supertype '{supertype}'")]
    UnresolvedSupertype { type_name: String, supertype: String },

    #[error("invalid feature range: {0}")]
    InvalidRange(String),

    #[error("value for '{feature}' does not fit range '{range}'")]
    RangeMismatch { feature: String, range: String },

    #[error("dangling feature structure handle: {0}")]
    DanglingHandle(usize),

    #[error("type '{0}' is not an annotation type")]
    NotAnAnnotation(String),

    #[error("span {begin}..{end} is not valid in a text of {len} bytes")]
    InvalidSpan { begin: i64, end: i64, len: usize },

    #[error("feature '{feature}' has no value")]
    MissingValue { feature: String },
}

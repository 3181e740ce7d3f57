//! Annotation model for docenrich.
//!
//! Defines the data an analysis engine hands back after processing a unit of
//! text:
//! - [`TypeSystem`]: named annotation types, their supertypes and declared features
//! - [`FeatureRange`]: the value-kind of a feature (primitive, array, reference)
//! - [`AnnotationGraph`]: an arena of feature structures over one document text,
//!   with an ordered annotation index
//!
//! The converter reads this model; engines write it. Neither side needs to know
//! how the other is implemented.

mod error;
mod graph;
mod type_system;

pub use error::{ModelError, Result};
pub use graph::{AnnotationGraph, FeatureStructure, FeatureValue, FsId};
pub use type_system::{
    FeatureDecl, FeatureRange, PrimitiveKind, TypeDecl, TypeSystem, TypeSystemBuilder,
};

/// Root of every type hierarchy.
pub const TOP_TYPE: &str = "uima.cas.TOP";
/// Subject of analysis: the document text an annotation points into.
pub const SOFA_TYPE: &str = "uima.cas.Sofa";
/// Base type of everything that spans text.
pub const ANNOTATION_TYPE: &str = "uima.tcas.Annotation";
/// Marker type whose covered text is projected for reference features.
pub const SENTENCE_TYPE: &str = "uima.tt.SentenceAnnotation";
/// Marker type whose covered text is projected for reference features.
pub const PARAGRAPH_TYPE: &str = "uima.tt.ParagraphAnnotation";
/// Marker type whose key feature is projected for reference features.
pub const LEMMA_TYPE: &str = "uima.tt.Lemma";

pub const SOFA_FEATURE: &str = "sofa";
pub const BEGIN_FEATURE: &str = "begin";
pub const END_FEATURE: &str = "end";
pub const LEMMA_KEY_FEATURE: &str = "key";
pub const SOFA_STRING_FEATURE: &str = "sofaString";

/// Separates a type name from a feature name in a fully-qualified feature name.
pub const FEATURE_SEPARATOR: char = ':';

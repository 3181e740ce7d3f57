//! Analysis engines for docenrich.
//!
//! - [`AnalysisEngine`] / [`EngineFactory`]: the contract the converter runs against
//! - [`AnnotationGraphAdapter`]: text in, typed annotations out, never fails
//! - [`RuleEngine`]: a regex and dictionary annotator loaded from a TOML
//!   resource specifier shipped inside a component bundle

mod adapter;
mod engine;
mod error;
mod rules;

pub use adapter::{AnnotationGraphAdapter, DOCUMENT_LANGUAGE, Extraction};
pub use engine::{AnalysisEngine, DEFAULT_INITIAL_HEAP_SIZE, EngineFactory, TuningParameters};
pub use error::{EngineError, Result};
pub use rules::{
    EngineDescriptor, EngineSection, FeatureSpec, RuleEngine, RuleEngineFactory, RuleSpec,
    TypeSpec,
};

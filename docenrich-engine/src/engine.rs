//! The analysis-engine contract.

use std::path::Path;
use std::sync::Arc;

use docenrich_model::{AnnotationGraph, TypeSystem};

use crate::Result;

/// Working-memory budget handed to the runtime, in bytes.
pub const DEFAULT_INITIAL_HEAP_SIZE: usize = 1_000_000;

/// Performance tuning settings passed at engine construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TuningParameters {
    /// Initial working-memory budget for each processing context, in bytes.
    pub initial_heap_size: usize,
}

impl Default for TuningParameters {
    fn default() -> Self {
        Self {
            initial_heap_size: DEFAULT_INITIAL_HEAP_SIZE,
        }
    }
}

/// A ready-to-run analysis engine.
///
/// The converter treats implementations as black boxes: it asks for a fresh
/// graph, puts text in, calls [`process`](Self::process), and reads typed
/// annotations back out.
pub trait AnalysisEngine: Send {
    /// The types this engine can produce.
    fn type_system(&self) -> Arc<TypeSystem>;

    /// A fresh, empty processing context.
    fn new_graph(&self) -> Result<AnnotationGraph>;

    /// Analyses the graph's document text, adding annotations to it.
    fn process(&self, graph: &mut AnnotationGraph) -> Result<()>;
}

/// Builds engines from an installed component's resource specifier.
pub trait EngineFactory {
    fn create_engine(
        &self,
        resource_specifier: &Path,
        tuning: &TuningParameters,
    ) -> Result<Box<dyn AnalysisEngine>>;
}

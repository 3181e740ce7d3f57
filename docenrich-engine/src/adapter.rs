//! Runs text through one engine and pulls out annotations of a requested type.
//!
//! Nothing here fails: empty text, processing errors and unknown type names
//! all degrade to an empty result with a log line.

use std::sync::Arc;

use docenrich_model::{AnnotationGraph, FsId, TypeSystem};
use tracing::{error, info, warn};

use crate::engine::AnalysisEngine;

/// Language tag set on every processing context.
pub const DOCUMENT_LANGUAGE: &str = "en";

/// Annotations of one type together with the graph they live in.
#[derive(Debug)]
pub struct Extraction {
    pub graph: AnnotationGraph,
    pub annotations: Vec<FsId>,
}

/// Wraps a single engine instance.
pub struct AnnotationGraphAdapter {
    engine: Box<dyn AnalysisEngine>,
}

impl AnnotationGraphAdapter {
    pub fn new(engine: Box<dyn AnalysisEngine>) -> Self {
        Self { engine }
    }

    pub fn type_system(&self) -> Arc<TypeSystem> {
        self.engine.type_system()
    }

    /// Processes `text` in a fresh context. `None` when the text is empty or
    /// the engine fails.
    pub fn analyze(&self, text: &str) -> Option<AnnotationGraph> {
        if text.is_empty() {
            info!("No document text to analyse");
            return None;
        }
        let mut graph = match self.engine.new_graph() {
            Ok(graph) => graph,
            Err(e) => {
                error!(error = %e, "Failed to create processing context");
                return None;
            }
        };
        graph.set_document_text(text);
        graph.set_document_language(DOCUMENT_LANGUAGE);
        if let Err(e) = self.engine.process(&mut graph) {
            error!(error = %e, "Analysis engine processing error");
            return None;
        }
        Some(graph)
    }

    /// Indexed annotations whose type is exactly `type_name`, in document order.
    pub fn select(graph: &AnnotationGraph, type_name: &str) -> Vec<FsId> {
        if !graph.type_system().contains(type_name) {
            warn!(type_name = %type_name, "Type not found in type system");
            return Vec::new();
        }
        graph.annotations_of_type(type_name)
    }

    /// [`analyze`](Self::analyze) followed by [`select`](Self::select).
    pub fn extract(&self, text: &str, type_name: &str) -> Extraction {
        match self.analyze(text) {
            Some(graph) => {
                let annotations = Self::select(&graph, type_name);
                Extraction { graph, annotations }
            }
            None => Extraction {
                graph: AnnotationGraph::new(self.type_system()),
                annotations: Vec::new(),
            },
        }
    }
}

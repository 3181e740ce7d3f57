//! Document enrichment.
//!
//! For each logical document: filter its contents down to the text to
//! analyse, run the engine once, then for each content spec append one
//! projected `content` element per matching annotation.

use tracing::{debug, info};

use docenrich_engine::AnnotationGraphAdapter;

use crate::document::{Element, XmlDocument, filter};
use crate::error::DocumentError;
use crate::options::ContentSpec;
use crate::projector::FeatureProjector;

pub struct DocumentEnricher {
    adapter: AnnotationGraphAdapter,
    projector: FeatureProjector,
    specs: Vec<ContentSpec>,
    content_list: Vec<String>,
    exclude_by_default: bool,
}

impl DocumentEnricher {
    pub fn new(
        adapter: AnnotationGraphAdapter,
        projector: FeatureProjector,
        specs: Vec<ContentSpec>,
    ) -> Self {
        Self {
            adapter,
            projector,
            specs,
            content_list: Vec::new(),
            exclude_by_default: false,
        }
    }

    pub fn with_filter(mut self, content_list: Vec<String>, exclude_by_default: bool) -> Self {
        self.content_list = content_list;
        self.exclude_by_default = exclude_by_default;
        self
    }

    pub fn specs(&self) -> &[ContentSpec] {
        &self.specs
    }

    /// Parses `input`, enriches every logical document and serialises the result.
    pub fn enrich(&self, input: &[u8]) -> Result<Vec<u8>, DocumentError> {
        let mut xml = XmlDocument::parse(input)?;
        let mut appended = 0;
        for document in xml.documents_mut() {
            appended += self.enrich_document(document);
        }
        debug!(appended, "Enrichment complete");
        xml.assemble()
    }

    /// Enriches one logical document in place, returning how many content
    /// elements were appended.
    pub fn enrich_document(&self, document: &mut Element) -> usize {
        if self.specs.is_empty() {
            return 0;
        }
        let text = filter(document, &self.content_list, self.exclude_by_default);
        if text.is_empty() {
            info!("Filtered document is empty; skipping");
            return 0;
        }
        let Some(graph) = self.adapter.analyze(&text) else {
            return 0;
        };

        let mut appended = 0;
        for spec in &self.specs {
            for fs in AnnotationGraphAdapter::select(&graph, &spec.type_name) {
                let content = match &spec.feature_name {
                    None => self.projector.project_all(&graph, fs, &spec.content_name),
                    Some(feature) => {
                        self.projector
                            .project_one(&graph, fs, &spec.content_name, feature)
                    }
                };
                document.append(content.into());
                appended += 1;
                info!(
                    type_name = %spec.type_name,
                    content_name = %spec.content_name,
                    "Creating content element from annotation"
                );
            }
        }
        appended
    }
}

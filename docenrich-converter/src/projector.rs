//! Feature projection.
//!
//! Flattens an annotation's feature graph into string attributes and a text
//! body. Primitive features project their string value, arrays project the
//! covered text of their first element when it is an annotation, and
//! references are resolved through a table of nested-type strategies.

use std::collections::HashMap;

use tracing::{debug, warn};

use docenrich_model::{
    AnnotationGraph, BEGIN_FEATURE, END_FEATURE, FeatureDecl, FeatureRange, FeatureValue, FsId,
    LEMMA_KEY_FEATURE, LEMMA_TYPE, ModelError, PARAGRAPH_TYPE, SENTENCE_TYPE, SOFA_FEATURE,
};

pub const RULE_ID_FEATURE: &str = "ruleId";
pub const COVERED_TEXT_ATTRIBUTE: &str = "coveredtext";

/// Never projected as attributes.
pub const HOUSEKEEPING_FEATURES: [&str; 2] = [RULE_ID_FEATURE, SOFA_FEATURE];

/// One content element to append to a document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectedContent {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub body: Option<String>,
}

impl ProjectedContent {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Sets an attribute, replacing an earlier value for the same key.
    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.attributes.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.attributes.push((key, value)),
        }
    }
}

/// How a referenced feature structure of a given type becomes a string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NestedStrategy {
    /// The covered text of the nested annotation.
    CoveredText,
    /// The string value of the named feature of the nested structure.
    StringFeature(String),
}

#[derive(Debug, Clone)]
pub struct FeatureProjector {
    include_offsets: bool,
    nested: HashMap<String, NestedStrategy>,
}

impl FeatureProjector {
    /// A projector with the sentence, paragraph and lemma strategies.
    pub fn new(include_offsets: bool) -> Self {
        Self {
            include_offsets,
            nested: HashMap::new(),
        }
        .with_nested_strategy(SENTENCE_TYPE, NestedStrategy::CoveredText)
        .with_nested_strategy(PARAGRAPH_TYPE, NestedStrategy::CoveredText)
        .with_nested_strategy(
            LEMMA_TYPE,
            NestedStrategy::StringFeature(LEMMA_KEY_FEATURE.to_string()),
        )
    }

    pub fn with_nested_strategy(
        mut self,
        type_name: impl Into<String>,
        strategy: NestedStrategy,
    ) -> Self {
        self.nested.insert(type_name.into(), strategy);
        self
    }

    pub fn include_offsets(&self) -> bool {
        self.include_offsets
    }

    /// Projects every declared feature of `fs` except housekeeping ones.
    /// `begin`/`end` are included only with offsets enabled. The body is the
    /// annotation's covered text.
    pub fn project_all(
        &self,
        graph: &AnnotationGraph,
        fs: FsId,
        content_name: &str,
    ) -> ProjectedContent {
        let mut content = ProjectedContent::new(content_name);
        let decl = match graph.type_of(fs) {
            Ok(decl) => decl,
            Err(e) => {
                debug!(error = %e, "Cannot project feature structure");
                return content;
            }
        };

        for feature in decl.features() {
            if HOUSEKEEPING_FEATURES.contains(&feature.name.as_str()) {
                continue;
            }
            if feature.range.is_primitive() && is_offset(&feature.name) && !self.include_offsets {
                continue;
            }
            if let Some(value) = self.resolve_logged(graph, fs, feature) {
                content.set_attribute(&feature.name, value.unwrap_or_default());
            }
        }
        content.body = self.covered_text(graph, fs);
        content
    }

    /// Projects a single feature into the body, with the covered text as
    /// the `coveredtext` attribute and `begin`/`end` when offsets are enabled.
    pub fn project_one(
        &self,
        graph: &AnnotationGraph,
        fs: FsId,
        content_name: &str,
        feature_name: &str,
    ) -> ProjectedContent {
        let mut content = ProjectedContent::new(content_name);
        let decl = match graph.type_of(fs) {
            Ok(decl) => decl,
            Err(e) => {
                debug!(error = %e, "Cannot project feature structure");
                return content;
            }
        };

        match decl.feature(feature_name) {
            Some(feature) => content.body = self.resolve_logged(graph, fs, feature).flatten(),
            None => warn!(
                type_name = %decl.name(),
                feature = %feature_name,
                "Failed to find feature for extract"
            ),
        }
        content.set_attribute(
            COVERED_TEXT_ATTRIBUTE,
            self.covered_text(graph, fs).unwrap_or_default(),
        );

        if self.include_offsets {
            for offset in [BEGIN_FEATURE, END_FEATURE] {
                let value = decl
                    .feature(offset)
                    .and_then(|feature| self.resolve_logged(graph, fs, feature).flatten());
                if let Some(value) = value {
                    content.set_attribute(offset, value);
                }
            }
        }
        content
    }

    fn covered_text(&self, graph: &AnnotationGraph, fs: FsId) -> Option<String> {
        graph
            .covered_text(fs)
            .inspect_err(|e| debug!(error = %e, "Failed to get covered text"))
            .ok()
            .map(str::to_string)
    }

    /// `None` when resolution failed, `Some(None)` when it produced no value.
    fn resolve_logged(
        &self,
        graph: &AnnotationGraph,
        fs: FsId,
        feature: &FeatureDecl,
    ) -> Option<Option<String>> {
        match self.resolve(graph, fs, feature) {
            Ok(value) => Some(value),
            Err(e) => {
                debug!(feature = %feature.name, error = %e, "Failed to get feature value");
                None
            }
        }
    }

    fn resolve(
        &self,
        graph: &AnnotationGraph,
        fs: FsId,
        feature: &FeatureDecl,
    ) -> Result<Option<String>, ModelError> {
        let value = graph.value(fs, &feature.name)?;
        let missing = || ModelError::MissingValue {
            feature: feature.name.clone(),
        };
        match &feature.range {
            FeatureRange::Primitive(_) => Ok(value.and_then(FeatureValue::primitive_string)),
            FeatureRange::ArrayOf(_) => {
                let Some(FeatureValue::Array(items)) = value else {
                    return Err(missing());
                };
                let Some(element) = *items.first().ok_or_else(missing)? else {
                    return Ok(None);
                };
                if !graph.type_of(element)?.is_annotation() {
                    return Ok(None);
                }
                Ok(Some(graph.covered_text(element)?.to_string()))
            }
            FeatureRange::Reference(_) => {
                let Some(FeatureValue::Ref(nested)) = value else {
                    return Err(missing());
                };
                self.resolve_nested(graph, *nested)
            }
        }
    }

    fn resolve_nested(
        &self,
        graph: &AnnotationGraph,
        nested: FsId,
    ) -> Result<Option<String>, ModelError> {
        let type_name = graph.get(nested)?.type_name();
        match self.nested.get(type_name) {
            Some(NestedStrategy::CoveredText) => Ok(Some(graph.covered_text(nested)?.to_string())),
            Some(NestedStrategy::StringFeature(key)) => {
                if !graph.type_of(nested)?.has_feature(key) {
                    return Ok(None);
                }
                Ok(graph
                    .value(nested, key)?
                    .and_then(FeatureValue::primitive_string))
            }
            None => Ok(None),
        }
    }
}

fn is_offset(feature: &str) -> bool {
    feature == BEGIN_FEATURE || feature == END_FEATURE
}

#[cfg(test)]
mod tests {
    use super::*;
    use docenrich_model::{ANNOTATION_TYPE, TypeSystem};
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use std::sync::Arc;

    const PERSON: &str = "org.example.PersonType";
    const TEXT: &str = "Hello Alice. Bob is here.";

    fn type_system() -> Arc<TypeSystem> {
        Arc::new(
            TypeSystem::builder()
                .add_type(
                    PERSON,
                    ANNOTATION_TYPE,
                    vec![
                        FeatureDecl::string(RULE_ID_FEATURE),
                        FeatureDecl::string("confidence"),
                        FeatureDecl::integer("mentions"),
                        FeatureDecl::reference("sentence", SENTENCE_TYPE),
                        FeatureDecl::reference("lemma", LEMMA_TYPE),
                        FeatureDecl::reference("other", ANNOTATION_TYPE),
                        FeatureDecl::array_of("sentences", SENTENCE_TYPE),
                    ],
                )
                .build()
                .unwrap(),
        )
    }

    /// "Alice" with every feature populated.
    fn alice() -> (AnnotationGraph, FsId) {
        let mut graph = AnnotationGraph::new(type_system());
        graph.set_document_text(TEXT);
        let sentence = graph.create_annotation(SENTENCE_TYPE, 0, 12).unwrap();
        let lemma = graph.create(LEMMA_TYPE).unwrap();
        graph
            .set_value(lemma, LEMMA_KEY_FEATURE, FeatureValue::String("alice".into()))
            .unwrap();
        let other = graph.create_annotation(ANNOTATION_TYPE, 13, 16).unwrap();

        let fs = graph.create_annotation(PERSON, 6, 11).unwrap();
        graph
            .set_value(fs, RULE_ID_FEATURE, FeatureValue::String("r1".into()))
            .unwrap();
        graph
            .set_value(fs, "confidence", FeatureValue::String("0.9".into()))
            .unwrap();
        graph.set_value(fs, "mentions", FeatureValue::Integer(2)).unwrap();
        graph.set_value(fs, "sentence", FeatureValue::Ref(sentence)).unwrap();
        graph.set_value(fs, "lemma", FeatureValue::Ref(lemma)).unwrap();
        graph.set_value(fs, "other", FeatureValue::Ref(other)).unwrap();
        graph
            .set_value(fs, "sentences", FeatureValue::Array(vec![Some(sentence), None]))
            .unwrap();
        graph.add_to_index(fs).unwrap();
        (graph, fs)
    }

    fn attrs(content: &ProjectedContent) -> Vec<(&str, &str)> {
        content
            .attributes
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect()
    }

    #[test]
    fn project_all_without_offsets() {
        let (graph, fs) = alice();
        let content = FeatureProjector::new(false).project_all(&graph, fs, "Person");
        assert_eq!(content.name, "Person");
        assert_eq!(content.body.as_deref(), Some("Alice"));
        assert_eq!(
            attrs(&content),
            vec![
                ("confidence", "0.9"),
                ("mentions", "2"),
                ("sentence", "Hello Alice."),
                ("lemma", "alice"),
                ("other", ""),
                ("sentences", "Hello Alice."),
            ]
        );
    }

    #[test]
    fn project_all_with_offsets() {
        let (graph, fs) = alice();
        let content = FeatureProjector::new(true).project_all(&graph, fs, "Person");
        assert_eq!(content.attribute(BEGIN_FEATURE), Some("6"));
        assert_eq!(content.attribute(END_FEATURE), Some("11"));
        assert_eq!(content.attribute(SOFA_FEATURE), None);
        assert_eq!(content.attribute(RULE_ID_FEATURE), None);
    }

    #[test]
    fn null_values_degrade_per_feature() {
        let mut graph = AnnotationGraph::new(type_system());
        graph.set_document_text(TEXT);
        let fs = graph.create_annotation(PERSON, 0, 5).unwrap();
        let content = FeatureProjector::new(false).project_all(&graph, fs, "Person");
        // Null primitives project as empty; null references and arrays are
        // resolution failures and are omitted.
        assert_eq!(attrs(&content), vec![("confidence", ""), ("mentions", "")]);
        assert_eq!(content.body.as_deref(), Some("Hello"));
    }

    #[test]
    fn null_first_array_element_is_empty() {
        let (mut graph, fs) = alice();
        graph
            .set_value(fs, "sentences", FeatureValue::Array(vec![None]))
            .unwrap();
        let projector = FeatureProjector::new(false);
        let content = projector.project_all(&graph, fs, "Person");
        assert_eq!(content.attribute("sentences"), Some(""));

        graph.set_value(fs, "sentences", FeatureValue::Array(vec![])).unwrap();
        let content = projector.project_all(&graph, fs, "Person");
        assert_eq!(content.attribute("sentences"), None);
    }

    #[test]
    fn project_one_feature() {
        let (graph, fs) = alice();
        let content = FeatureProjector::new(false).project_one(&graph, fs, "Person", "confidence");
        assert_eq!(content.body.as_deref(), Some("0.9"));
        assert_eq!(attrs(&content), vec![(COVERED_TEXT_ATTRIBUTE, "Alice")]);

        let content = FeatureProjector::new(false).project_one(&graph, fs, "Person", "lemma");
        assert_eq!(content.body.as_deref(), Some("alice"));

        let content = FeatureProjector::new(false).project_one(&graph, fs, "Person", "other");
        assert_eq!(content.body, None);
    }

    #[test]
    fn project_one_with_offsets_and_unknown_feature() {
        let (graph, fs) = alice();
        let content = FeatureProjector::new(true).project_one(&graph, fs, "Person", "nope");
        assert_eq!(content.body, None);
        assert_eq!(
            attrs(&content),
            vec![
                (COVERED_TEXT_ATTRIBUTE, "Alice"),
                (BEGIN_FEATURE, "6"),
                (END_FEATURE, "11"),
            ]
        );
    }

    #[test]
    fn custom_nested_strategy() {
        let (graph, fs) = alice();
        let projector = FeatureProjector::new(false)
            .with_nested_strategy(ANNOTATION_TYPE, NestedStrategy::CoveredText);
        let content = projector.project_one(&graph, fs, "Person", "other");
        assert_eq!(content.body.as_deref(), Some("Bob"));
    }

    #[test]
    fn set_attribute_replaces() {
        let mut content = ProjectedContent::new("Person");
        content.set_attribute("a", "1");
        content.set_attribute("a", "2");
        assert_eq!(content.attributes, vec![("a".to_string(), "2".to_string())]);
    }

    fn arb_graph() -> impl Strategy<Value = (AnnotationGraph, FsId)> {
        (
            prop::collection::vec(("[a-z]{1,8}", "[a-zA-Z0-9 ]{0,12}"), 0..6),
            any::<bool>(),
            0usize..20,
            0usize..20,
        )
            .prop_map(|(extra, with_rule_id, a, b)| {
                let mut features = vec![FeatureDecl::string("confidence")];
                if with_rule_id {
                    features.push(FeatureDecl::string(RULE_ID_FEATURE));
                }
                let mut names = Vec::new();
                for (name, _) in &extra {
                    let name = format!("x{name}");
                    if !names.contains(&name) {
                        features.push(FeatureDecl::string(name.clone()));
                        names.push(name);
                    }
                }
                let ts = TypeSystem::builder()
                    .add_type(PERSON, ANNOTATION_TYPE, features)
                    .build()
                    .unwrap();
                let mut graph = AnnotationGraph::new(Arc::new(ts));
                graph.set_document_text("abcdefghijklmnopqrstuvwxyz");
                let fs = graph.create_annotation(PERSON, a.min(b), a.max(b)).unwrap();
                if with_rule_id {
                    graph
                        .set_value(fs, RULE_ID_FEATURE, FeatureValue::String("r".into()))
                        .unwrap();
                }
                for (name, (_, value)) in names.iter().zip(&extra) {
                    graph
                        .set_value(fs, name, FeatureValue::String(value.clone()))
                        .unwrap();
                }
                (graph, fs)
            })
    }

    proptest! {
        #[test]
        fn housekeeping_features_never_projected(
            (graph, fs) in arb_graph(),
            offsets in any::<bool>(),
        ) {
            let content = FeatureProjector::new(offsets).project_all(&graph, fs, "Person");
            for key in HOUSEKEEPING_FEATURES {
                prop_assert!(content.attribute(key).is_none());
            }
        }

        #[test]
        fn offsets_appear_iff_enabled(
            (graph, fs) in arb_graph(),
            offsets in any::<bool>(),
            feature in prop::sample::select(vec!["confidence", "begin", "nope"]),
        ) {
            let projector = FeatureProjector::new(offsets);
            let all = projector.project_all(&graph, fs, "Person");
            let one = projector.project_one(&graph, fs, "Person", feature);
            for key in [BEGIN_FEATURE, END_FEATURE] {
                prop_assert_eq!(all.attribute(key).is_some(), offsets);
                prop_assert_eq!(one.attribute(key).is_some(), offsets);
            }
        }
    }
}

//! Rule-based engine runtime.
//!
//! The resource specifier is a TOML file:
//!
//! ```toml
//! [engine]
//! name = "people"
//!
//! [[types]]
//! name = "org.example.PersonType"
//! supertype = "uima.tcas.Annotation"          # default
//! features = [
//!   { name = "confidence", range = "string" },
//!   { name = "sentence", range = "uima.tt.SentenceAnnotation" },
//! ]
//!
//! [[rules]]
//! type = "uima.tt.SentenceAnnotation"
//! pattern = "[^.!?]+[.!?]?"
//!
//! [[rules]]
//! type = "org.example.PersonType"
//! dictionary = "../resources/names.txt"      # or `pattern = "..."`
//! features = { confidence = "0.9", sentence = "@covering:uima.tt.SentenceAnnotation" }
//! ```
//!
//! Feature values are a literal, `$N` (capture group N), `@covering:<Type>`
//! (the smallest annotation of that type enclosing the match; arrays get it as
//! their single element) or `@lemma:<literal or $N>` (a new lemma structure).

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use regex::{Captures, Regex, RegexBuilder};
use serde::Deserialize;
use tracing::{debug, info};

use docenrich_model::{
    AnnotationGraph, FeatureDecl, FeatureRange, FeatureStructure, FeatureValue, FsId,
    PrimitiveKind, TypeSystem, ANNOTATION_TYPE, BEGIN_FEATURE, END_FEATURE, LEMMA_KEY_FEATURE,
    LEMMA_TYPE, SOFA_FEATURE,
};

use crate::engine::{AnalysisEngine, EngineFactory, TuningParameters};
use crate::{EngineError, Result};

const COVERING_PREFIX: &str = "@covering:";
const LEMMA_PREFIX: &str = "@lemma:";

/// Raw TOML structure of a rule engine resource specifier.
#[derive(Debug, Deserialize)]
pub struct EngineDescriptor {
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub types: Vec<TypeSpec>,
    #[serde(default)]
    pub rules: Vec<RuleSpec>,
}

#[derive(Debug, Default, Deserialize)]
pub struct EngineSection {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct TypeSpec {
    pub name: String,
    #[serde(default = "default_supertype")]
    pub supertype: String,
    #[serde(default)]
    pub features: Vec<FeatureSpec>,
}

fn default_supertype() -> String {
    ANNOTATION_TYPE.to_string()
}

#[derive(Debug, Deserialize)]
pub struct FeatureSpec {
    pub name: String,
    pub range: String,
}

#[derive(Debug, Deserialize)]
pub struct RuleSpec {
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub pattern: Option<String>,
    /// Word list, one entry per line, relative to the specifier's directory.
    #[serde(default)]
    pub dictionary: Option<String>,
    #[serde(default)]
    pub case_insensitive: bool,
    /// Capture group whose span becomes the annotation (0 = whole match).
    #[serde(default)]
    pub span_group: usize,
    #[serde(default)]
    pub features: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
enum ValueSource {
    Literal(String),
    Capture(usize),
}

impl ValueSource {
    fn parse(raw: &str) -> Self {
        match raw.strip_prefix('$').map(str::parse::<usize>) {
            Some(Ok(group)) => Self::Capture(group),
            _ => Self::Literal(raw.to_string()),
        }
    }

    fn resolve(&self, caps: &Captures<'_>) -> Option<String> {
        match self {
            Self::Literal(s) => Some(s.clone()),
            Self::Capture(group) => caps.get(*group).map(|m| m.as_str().to_string()),
        }
    }

    fn max_group(&self) -> usize {
        match self {
            Self::Literal(_) => 0,
            Self::Capture(group) => *group,
        }
    }
}

#[derive(Debug, Clone)]
enum FeatureSource {
    Scalar(ValueSource, PrimitiveKind),
    Lemma(ValueSource),
    Covering { type_name: String, as_array: bool },
}

#[derive(Debug)]
struct CompiledRule {
    type_name: String,
    regex: Regex,
    span_group: usize,
    features: Vec<(String, FeatureSource)>,
}

fn scalar(kind: PrimitiveKind, raw: &str) -> Option<FeatureValue> {
    match kind {
        PrimitiveKind::String => Some(FeatureValue::String(raw.to_string())),
        PrimitiveKind::Integer => raw.trim().parse().ok().map(FeatureValue::Integer),
        PrimitiveKind::Float => raw.trim().parse().ok().map(FeatureValue::Float),
        PrimitiveKind::Boolean => raw.trim().parse().ok().map(FeatureValue::Boolean),
    }
}

fn dictionary_pattern(path: &Path) -> Result<String> {
    let contents = fs::read_to_string(path)?;
    let mut words: Vec<&str> = contents
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .collect();
    if words.is_empty() {
        return Err(EngineError::InvalidSpecifier(format!(
            "dictionary {} has no entries",
            path.display()
        )));
    }
    // Longest entries first so alternation prefers the longer match.
    words.sort_by(|a, b| b.len().cmp(&a.len()).then(a.cmp(b)));
    words.dedup();
    let alternation: Vec<String> = words.iter().map(|w| regex::escape(w)).collect();
    Ok(format!(r"\b(?:{})\b", alternation.join("|")))
}

fn compile_feature(
    ts: &TypeSystem,
    rule_type: &str,
    decl: &FeatureDecl,
    raw: &str,
    captures: usize,
) -> Result<FeatureSource> {
    let invalid = |why: &str| {
        EngineError::InvalidSpecifier(format!(
            "rule for '{rule_type}', feature '{}' = {raw:?}: {why}",
            decl.name
        ))
    };
    let source = match &decl.range {
        FeatureRange::Primitive(kind) => {
            if raw.starts_with('@') {
                return Err(invalid("scalar features take a literal or $N"));
            }
            let value = ValueSource::parse(raw);
            if let ValueSource::Literal(lit) = &value {
                if scalar(*kind, lit).is_none() {
                    return Err(invalid("literal does not fit the feature range"));
                }
            }
            FeatureSource::Scalar(value, *kind)
        }
        FeatureRange::Reference(target) => {
            if let Some(key) = raw.strip_prefix(LEMMA_PREFIX) {
                if !ts.is_subtype(LEMMA_TYPE, target) {
                    return Err(invalid("feature range cannot hold a lemma"));
                }
                FeatureSource::Lemma(ValueSource::parse(key))
            } else if let Some(covering) = raw.strip_prefix(COVERING_PREFIX) {
                if !ts.is_subtype(covering, target) {
                    return Err(invalid("covering type does not fit the feature range"));
                }
                FeatureSource::Covering {
                    type_name: covering.to_string(),
                    as_array: false,
                }
            } else {
                return Err(invalid("reference features take @covering: or @lemma:"));
            }
        }
        FeatureRange::ArrayOf(inner) => {
            let Some(covering) = raw.strip_prefix(COVERING_PREFIX) else {
                return Err(invalid("array features take @covering:"));
            };
            let fits = inner
                .target_type()
                .is_some_and(|target| ts.is_subtype(covering, target));
            if !fits {
                return Err(invalid("covering type does not fit the array element range"));
            }
            FeatureSource::Covering {
                type_name: covering.to_string(),
                as_array: true,
            }
        }
    };
    let group = match &source {
        FeatureSource::Scalar(v, _) | FeatureSource::Lemma(v) => v.max_group(),
        FeatureSource::Covering { type_name, .. } => {
            if !ts.get(type_name).is_some_and(|t| t.is_annotation()) {
                return Err(invalid("covering type is not an annotation type"));
            }
            0
        }
    };
    if group >= captures {
        return Err(invalid("capture group out of range"));
    }
    Ok(source)
}

fn compile_rule(ts: &TypeSystem, spec: &RuleSpec, base_dir: &Path) -> Result<CompiledRule> {
    let decl = ts.get(&spec.type_name).ok_or_else(|| {
        EngineError::InvalidSpecifier(format!("rule targets unknown type '{}'", spec.type_name))
    })?;
    if !decl.is_annotation() {
        return Err(EngineError::InvalidSpecifier(format!(
            "rule targets non-annotation type '{}'",
            spec.type_name
        )));
    }
    let pattern = match (&spec.pattern, &spec.dictionary) {
        (Some(p), None) => p.clone(),
        (None, Some(d)) => dictionary_pattern(&base_dir.join(d))?,
        _ => {
            return Err(EngineError::InvalidSpecifier(format!(
                "rule for '{}' needs exactly one of `pattern` or `dictionary`",
                spec.type_name
            )));
        }
    };
    let regex = RegexBuilder::new(&pattern)
        .case_insensitive(spec.case_insensitive)
        .build()?;
    let captures = regex.captures_len();
    if spec.span_group >= captures {
        return Err(EngineError::InvalidSpecifier(format!(
            "rule for '{}' uses span group {} but the pattern has {} groups",
            spec.type_name,
            spec.span_group,
            captures - 1
        )));
    }

    let mut features = Vec::with_capacity(spec.features.len());
    for (name, raw) in &spec.features {
        if [SOFA_FEATURE, BEGIN_FEATURE, END_FEATURE].contains(&name.as_str()) {
            return Err(EngineError::InvalidSpecifier(format!(
                "rule for '{}' cannot assign '{name}'",
                spec.type_name
            )));
        }
        let feature = decl.feature(name).ok_or_else(|| {
            EngineError::InvalidSpecifier(format!(
                "type '{}' declares no feature '{name}'",
                spec.type_name
            ))
        })?;
        features.push((
            name.clone(),
            compile_feature(ts, &spec.type_name, feature, raw, captures)?,
        ));
    }

    Ok(CompiledRule {
        type_name: spec.type_name.clone(),
        regex,
        span_group: spec.span_group,
        features,
    })
}

/// Regex and dictionary driven annotator.
#[derive(Debug)]
pub struct RuleEngine {
    name: String,
    type_system: Arc<TypeSystem>,
    rules: Vec<CompiledRule>,
    arena_capacity: usize,
}

impl RuleEngine {
    /// Builds an engine; `base_dir` resolves dictionary paths.
    pub fn from_descriptor(
        descriptor: EngineDescriptor,
        base_dir: &Path,
        tuning: &TuningParameters,
    ) -> Result<Self> {
        let mut builder = TypeSystem::builder();
        for t in descriptor.types {
            let mut features = Vec::with_capacity(t.features.len());
            for f in t.features {
                features.push(FeatureDecl::new(f.name, f.range.parse()?));
            }
            builder = builder.add_type(t.name, t.supertype, features);
        }
        let type_system = Arc::new(builder.build()?);

        let rules = descriptor
            .rules
            .iter()
            .map(|spec| compile_rule(&type_system, spec, base_dir))
            .collect::<Result<Vec<_>>>()?;

        let arena_capacity = tuning.initial_heap_size / std::mem::size_of::<FeatureStructure>();
        info!(
            engine = %descriptor.engine.name,
            types = type_system.len(),
            rules = rules.len(),
            arena_capacity,
            "Rule engine ready"
        );
        Ok(Self {
            name: descriptor.engine.name,
            type_system,
            rules,
            arena_capacity,
        })
    }

    pub fn from_toml_str(
        specifier: &str,
        base_dir: &Path,
        tuning: &TuningParameters,
    ) -> Result<Self> {
        Self::from_descriptor(toml::from_str(specifier)?, base_dir, tuning)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn resolve_covering(
        &self,
        graph: &mut AnnotationGraph,
        created: &[(FsId, usize, usize)],
        pending: Vec<(FsId, String, String, bool)>,
    ) -> Result<()> {
        for (fs, feature, covering_type, as_array) in pending {
            let (begin, end) = graph.span(fs)?;
            let best = created
                .iter()
                .filter(|(id, b, e)| *id != fs && *b <= begin && end <= *e)
                .filter(|(id, _, _)| {
                    graph
                        .get(*id)
                        .is_ok_and(|s| self.type_system.is_subtype(s.type_name(), &covering_type))
                })
                .min_by_key(|(_, b, e)| e - b)
                .map(|(id, _, _)| *id);
            match best {
                Some(id) if as_array => {
                    graph.set_value(fs, &feature, FeatureValue::Array(vec![Some(id)]))?
                }
                Some(id) => graph.set_value(fs, &feature, FeatureValue::Ref(id))?,
                None => debug!(
                    feature = %feature,
                    covering_type = %covering_type,
                    "No covering annotation; feature left null"
                ),
            }
        }
        Ok(())
    }
}

impl AnalysisEngine for RuleEngine {
    fn type_system(&self) -> Arc<TypeSystem> {
        Arc::clone(&self.type_system)
    }

    fn new_graph(&self) -> Result<AnnotationGraph> {
        Ok(AnnotationGraph::with_capacity(
            Arc::clone(&self.type_system),
            self.arena_capacity,
        ))
    }

    fn process(&self, graph: &mut AnnotationGraph) -> Result<()> {
        let text = graph.document_text().to_string();
        let mut created = Vec::new();
        let mut pending = Vec::new();

        for rule in &self.rules {
            for caps in rule.regex.captures_iter(&text) {
                let Some(span) = caps.get(rule.span_group) else {
                    continue;
                };
                if span.is_empty() {
                    continue;
                }
                let fs = graph.create_annotation(&rule.type_name, span.start(), span.end())?;
                for (feature, source) in &rule.features {
                    match source {
                        FeatureSource::Scalar(value, kind) => {
                            let Some(raw) = value.resolve(&caps) else {
                                continue;
                            };
                            match scalar(*kind, &raw) {
                                Some(v) => graph.set_value(fs, feature, v)?,
                                None => debug!(
                                    feature = %feature,
                                    value = %raw,
                                    "Captured value does not fit range; feature left null"
                                ),
                            }
                        }
                        FeatureSource::Lemma(key) => {
                            let Some(key) = key.resolve(&caps) else {
                                continue;
                            };
                            let lemma = graph.create(LEMMA_TYPE)?;
                            graph.set_value(lemma, LEMMA_KEY_FEATURE, FeatureValue::String(key))?;
                            graph.set_value(fs, feature, FeatureValue::Ref(lemma))?;
                        }
                        FeatureSource::Covering {
                            type_name,
                            as_array,
                        } => pending.push((fs, feature.clone(), type_name.clone(), *as_array)),
                    }
                }
                graph.add_to_index(fs)?;
                created.push((fs, span.start(), span.end()));
            }
        }

        self.resolve_covering(graph, &created, pending)?;
        debug!(
            engine = %self.name,
            annotations = created.len(),
            "Document processed"
        );
        Ok(())
    }
}

/// Creates [`RuleEngine`]s from resource specifier files.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleEngineFactory;

impl EngineFactory for RuleEngineFactory {
    fn create_engine(
        &self,
        resource_specifier: &Path,
        tuning: &TuningParameters,
    ) -> Result<Box<dyn AnalysisEngine>> {
        let contents = fs::read_to_string(resource_specifier)?;
        let base_dir = resource_specifier.parent().unwrap_or_else(|| Path::new("."));
        let engine = RuleEngine::from_toml_str(&contents, base_dir, tuning)?;
        Ok(Box::new(engine))
    }
}

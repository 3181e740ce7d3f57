//! Annotation graph: an arena of typed feature structures over one document.
//!
//! Feature structures are addressed by [`FsId`] handles. Only annotations that
//! were explicitly added to the index are visible through
//! [`AnnotationGraph::annotations`]; nested structures (lemmas, sofas, array
//! elements) may live in the arena without being indexed.

use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::type_system::{FeatureRange, PrimitiveKind, TypeDecl, TypeSystem};
use crate::{
    ModelError, Result, BEGIN_FEATURE, END_FEATURE, SOFA_FEATURE, SOFA_STRING_FEATURE, SOFA_TYPE,
};

/// Handle to a feature structure inside one [`AnnotationGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FsId(usize);

impl FsId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// A feature value. Absent values are null.
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureValue {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Ref(FsId),
    /// Elements may be null.
    Array(Vec<Option<FsId>>),
}

impl FeatureValue {
    /// String form of a scalar value; `None` for references and arrays.
    pub fn primitive_string(&self) -> Option<String> {
        match self {
            Self::String(s) => Some(s.clone()),
            Self::Integer(i) => Some(i.to_string()),
            Self::Float(f) => Some(f.to_string()),
            Self::Boolean(b) => Some(b.to_string()),
            Self::Ref(_) | Self::Array(_) => None,
        }
    }

    fn fits(&self, range: &FeatureRange) -> bool {
        match (self, range) {
            (Self::String(_), FeatureRange::Primitive(PrimitiveKind::String))
            | (Self::Integer(_), FeatureRange::Primitive(PrimitiveKind::Integer))
            | (Self::Float(_), FeatureRange::Primitive(PrimitiveKind::Float))
            | (Self::Boolean(_), FeatureRange::Primitive(PrimitiveKind::Boolean))
            | (Self::Ref(_), FeatureRange::Reference(_))
            | (Self::Array(_), FeatureRange::ArrayOf(_)) => true,
            _ => false,
        }
    }
}

/// One typed node of the graph.
#[derive(Debug, Clone)]
pub struct FeatureStructure {
    type_name: String,
    values: HashMap<String, FeatureValue>,
}

impl FeatureStructure {
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// `None` when the feature is null.
    pub fn value(&self, feature: &str) -> Option<&FeatureValue> {
        self.values.get(feature)
    }
}

/// The result of processing one document: text, typed structures, and an
/// annotation index in document order.
#[derive(Debug, Clone)]
pub struct AnnotationGraph {
    type_system: Arc<TypeSystem>,
    text: String,
    language: Option<String>,
    sofa: Option<FsId>,
    structures: Vec<FeatureStructure>,
    index: Vec<FsId>,
    indexed: HashSet<FsId>,
}

impl AnnotationGraph {
    pub fn new(type_system: Arc<TypeSystem>) -> Self {
        Self::with_capacity(type_system, 0)
    }

    /// Pre-sizes the arena for `capacity` feature structures.
    pub fn with_capacity(type_system: Arc<TypeSystem>, capacity: usize) -> Self {
        Self {
            type_system,
            text: String::new(),
            language: None,
            sofa: None,
            structures: Vec::with_capacity(capacity),
            index: Vec::new(),
            indexed: HashSet::new(),
        }
    }

    pub fn type_system(&self) -> &TypeSystem {
        &self.type_system
    }

    pub fn shared_type_system(&self) -> Arc<TypeSystem> {
        Arc::clone(&self.type_system)
    }

    /// Sets the subject of analysis. Annotations created afterwards point at it.
    pub fn set_document_text(&mut self, text: impl Into<String>) {
        self.text = text.into();
        let sofa_text = FeatureValue::String(self.text.clone());
        match self.sofa {
            Some(sofa) => {
                self.structures[sofa.0]
                    .values
                    .insert(SOFA_STRING_FEATURE.to_string(), sofa_text);
            }
            None => {
                let mut values = HashMap::new();
                values.insert(SOFA_STRING_FEATURE.to_string(), sofa_text);
                self.sofa = Some(self.push(SOFA_TYPE, values));
            }
        }
    }

    pub fn document_text(&self) -> &str {
        &self.text
    }

    pub fn set_document_language(&mut self, language: impl Into<String>) {
        self.language = Some(language.into());
    }

    pub fn document_language(&self) -> Option<&str> {
        self.language.as_deref()
    }

    pub fn len(&self) -> usize {
        self.structures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.structures.is_empty()
    }

    fn push(&mut self, type_name: &str, values: HashMap<String, FeatureValue>) -> FsId {
        let id = FsId(self.structures.len());
        self.structures.push(FeatureStructure {
            type_name: type_name.to_string(),
            values,
        });
        id
    }

    /// Creates a feature structure with every feature null.
    pub fn create(&mut self, type_name: &str) -> Result<FsId> {
        if !self.type_system.contains(type_name) {
            return Err(ModelError::UnknownType(type_name.to_string()));
        }
        Ok(self.push(type_name, HashMap::new()))
    }

    /// Creates an annotation over `begin..end` (byte offsets). It is not
    /// indexed until [`add_to_index`](Self::add_to_index) is called.
    pub fn create_annotation(&mut self, type_name: &str, begin: usize, end: usize) -> Result<FsId> {
        let decl = self
            .type_system
            .get(type_name)
            .ok_or_else(|| ModelError::UnknownType(type_name.to_string()))?;
        if !decl.is_annotation() {
            return Err(ModelError::NotAnAnnotation(type_name.to_string()));
        }
        if begin > end {
            return Err(ModelError::InvalidSpan {
                begin: begin as i64,
                end: end as i64,
                len: self.text.len(),
            });
        }
        let mut values = HashMap::new();
        values.insert(BEGIN_FEATURE.to_string(), FeatureValue::Integer(begin as i64));
        values.insert(END_FEATURE.to_string(), FeatureValue::Integer(end as i64));
        if let Some(sofa) = self.sofa {
            values.insert(SOFA_FEATURE.to_string(), FeatureValue::Ref(sofa));
        }
        Ok(self.push(type_name, values))
    }

    /// Sets a declared feature, checking the value against the feature's range.
    pub fn set_value(&mut self, fs: FsId, feature: &str, value: FeatureValue) -> Result<()> {
        let decl = self.type_of(fs)?;
        let range = &decl
            .feature(feature)
            .ok_or_else(|| ModelError::UnknownFeature {
                type_name: decl.name().to_string(),
                feature: feature.to_string(),
            })?
            .range;
        if !value.fits(range) || !self.targets_fit(&value, range)? {
            return Err(ModelError::RangeMismatch {
                feature: feature.to_string(),
                range: range.to_string(),
            });
        }
        self.structures[fs.0]
            .values
            .insert(feature.to_string(), value);
        Ok(())
    }

    fn targets_fit(&self, value: &FeatureValue, range: &FeatureRange) -> Result<bool> {
        let Some(target) = range.target_type() else {
            return Ok(true);
        };
        let ids: Vec<FsId> = match value {
            FeatureValue::Ref(id) => vec![*id],
            FeatureValue::Array(items) => items.iter().flatten().copied().collect(),
            _ => Vec::new(),
        };
        for id in ids {
            let actual = self.get(id)?.type_name();
            if !self.type_system.is_subtype(actual, target) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Clears a feature back to null.
    pub fn clear_value(&mut self, fs: FsId, feature: &str) -> Result<()> {
        self.get(fs)?;
        self.structures[fs.0].values.remove(feature);
        Ok(())
    }

    pub fn get(&self, fs: FsId) -> Result<&FeatureStructure> {
        self.structures
            .get(fs.0)
            .ok_or(ModelError::DanglingHandle(fs.0))
    }

    pub fn type_of(&self, fs: FsId) -> Result<&TypeDecl> {
        let type_name = self.get(fs)?.type_name();
        self.type_system
            .get(type_name)
            .ok_or_else(|| ModelError::UnknownType(type_name.to_string()))
    }

    /// Value of `feature` on `fs`; `Ok(None)` when declared but null.
    pub fn value(&self, fs: FsId, feature: &str) -> Result<Option<&FeatureValue>> {
        let decl = self.type_of(fs)?;
        if !decl.has_feature(feature) {
            return Err(ModelError::UnknownFeature {
                type_name: decl.name().to_string(),
                feature: feature.to_string(),
            });
        }
        Ok(self.structures[fs.0].value(feature))
    }

    /// Makes an annotation visible through the index.
    pub fn add_to_index(&mut self, fs: FsId) -> Result<()> {
        let decl = self.type_of(fs)?;
        if !decl.is_annotation() {
            return Err(ModelError::NotAnAnnotation(decl.name().to_string()));
        }
        if self.indexed.insert(fs) {
            self.index.push(fs);
        }
        Ok(())
    }

    /// Indexed annotations ordered by begin ascending, end descending, then
    /// insertion order.
    pub fn annotations(&self) -> Vec<FsId> {
        let mut ordered = self.index.clone();
        ordered.sort_by_key(|id| {
            let (begin, end) = self.raw_span(*id).unwrap_or((i64::MAX, i64::MAX));
            (begin, Reverse(end))
        });
        ordered
    }

    /// Indexed annotations whose type is exactly `type_name` (subtypes excluded).
    pub fn annotations_of_type(&self, type_name: &str) -> Vec<FsId> {
        self.annotations()
            .into_iter()
            .filter(|id| {
                self.structures
                    .get(id.0)
                    .is_some_and(|fs| fs.type_name == type_name)
            })
            .collect()
    }

    fn raw_span(&self, fs: FsId) -> Result<(i64, i64)> {
        let int = |feature: &str| -> Result<i64> {
            match self.value(fs, feature)? {
                Some(FeatureValue::Integer(v)) => Ok(*v),
                _ => Err(ModelError::MissingValue {
                    feature: feature.to_string(),
                }),
            }
        };
        Ok((int(BEGIN_FEATURE)?, int(END_FEATURE)?))
    }

    /// Byte span of an annotation, validated against the document text.
    pub fn span(&self, fs: FsId) -> Result<(usize, usize)> {
        let (begin, end) = self.raw_span(fs)?;
        let invalid = || ModelError::InvalidSpan {
            begin,
            end,
            len: self.text.len(),
        };
        let b = usize::try_from(begin).map_err(|_| invalid())?;
        let e = usize::try_from(end).map_err(|_| invalid())?;
        if b > e || e > self.text.len() {
            return Err(invalid());
        }
        Ok((b, e))
    }

    /// The substring of the document text spanned by an annotation.
    pub fn covered_text(&self, fs: FsId) -> Result<&str> {
        let (begin, end) = self.span(fs)?;
        self.text.get(begin..end).ok_or(ModelError::InvalidSpan {
            begin: begin as i64,
            end: end as i64,
            len: self.text.len(),
        })
    }
}

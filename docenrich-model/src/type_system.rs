//! Type system: annotation types, supertypes and declared features.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::{
    ModelError, Result, ANNOTATION_TYPE, BEGIN_FEATURE, END_FEATURE, LEMMA_KEY_FEATURE,
    LEMMA_TYPE, PARAGRAPH_TYPE, SENTENCE_TYPE, SOFA_FEATURE, SOFA_STRING_FEATURE, SOFA_TYPE,
    TOP_TYPE,
};

/// Scalar value kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimitiveKind {
    String,
    Integer,
    Float,
    Boolean,
}

impl PrimitiveKind {
    fn keyword(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Boolean => "boolean",
        }
    }
}

/// The declared value-kind of a feature.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FeatureRange {
    /// A scalar: string, number or boolean.
    Primitive(PrimitiveKind),
    /// An ordered sequence of feature structures of the element range.
    ArrayOf(Box<FeatureRange>),
    /// A single nested feature structure of the named type.
    Reference(String),
}

impl FeatureRange {
    pub fn is_primitive(&self) -> bool {
        matches!(self, Self::Primitive(_))
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Self::ArrayOf(_))
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, Self::Reference(_))
    }

    /// The type name this range points at, looking through arrays.
    pub fn target_type(&self) -> Option<&str> {
        match self {
            Self::Primitive(_) => None,
            Self::ArrayOf(inner) => inner.target_type(),
            Self::Reference(name) => Some(name),
        }
    }
}

impl fmt::Display for FeatureRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primitive(kind) => f.write_str(kind.keyword()),
            Self::ArrayOf(inner) => write!(f, "array:{inner}"),
            Self::Reference(name) => f.write_str(name),
        }
    }
}

/// Parses `string`, `integer`, `float`, `boolean`, `array:<range>` or a type name.
impl FromStr for FeatureRange {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Some(inner) = s.strip_prefix("array:") {
            // Arrays hold feature structures, never scalars or other arrays.
            return match inner.parse()? {
                reference @ Self::Reference(_) => Ok(Self::ArrayOf(Box::new(reference))),
                _ => Err(ModelError::InvalidRange(s.to_string())),
            };
        }
        match s {
            "" => Err(ModelError::InvalidRange(s.to_string())),
            "string" => Ok(Self::Primitive(PrimitiveKind::String)),
            "integer" => Ok(Self::Primitive(PrimitiveKind::Integer)),
            "float" => Ok(Self::Primitive(PrimitiveKind::Float)),
            "boolean" => Ok(Self::Primitive(PrimitiveKind::Boolean)),
            name if name.chars().any(char::is_whitespace) => {
                Err(ModelError::InvalidRange(name.to_string()))
            }
            name => Ok(Self::Reference(name.to_string())),
        }
    }
}

/// A feature declared on a type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureDecl {
    /// Short (base) name, unique within the declaring type.
    pub name: String,
    pub range: FeatureRange,
}

impl FeatureDecl {
    pub fn new(name: impl Into<String>, range: FeatureRange) -> Self {
        Self {
            name: name.into(),
            range,
        }
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, FeatureRange::Primitive(PrimitiveKind::String))
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, FeatureRange::Primitive(PrimitiveKind::Integer))
    }

    pub fn float(name: impl Into<String>) -> Self {
        Self::new(name, FeatureRange::Primitive(PrimitiveKind::Float))
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, FeatureRange::Primitive(PrimitiveKind::Boolean))
    }

    pub fn reference(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self::new(name, FeatureRange::Reference(type_name.into()))
    }

    pub fn array_of(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self::new(
            name,
            FeatureRange::ArrayOf(Box::new(FeatureRange::Reference(type_name.into()))),
        )
    }
}

/// A resolved type: its own features plus everything inherited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDecl {
    name: String,
    supertype: Option<String>,
    /// Declaration order, inherited features first.
    features: Vec<FeatureDecl>,
}

impl TypeDecl {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Last dot-separated segment of the type name.
    pub fn short_name(&self) -> &str {
        self.name.rsplit('.').next().unwrap_or(&self.name)
    }

    pub fn supertype(&self) -> Option<&str> {
        self.supertype.as_deref()
    }

    pub fn features(&self) -> &[FeatureDecl] {
        &self.features
    }

    pub fn feature(&self, name: &str) -> Option<&FeatureDecl> {
        self.features.iter().find(|f| f.name == name)
    }

    pub fn has_feature(&self, name: &str) -> bool {
        self.feature(name).is_some()
    }

    /// Types that span text carry `begin` and `end`.
    pub fn is_annotation(&self) -> bool {
        self.has_feature(BEGIN_FEATURE) && self.has_feature(END_FEATURE)
    }
}

/// The set of types an engine knows about.
#[derive(Debug, Clone)]
pub struct TypeSystem {
    types: BTreeMap<String, TypeDecl>,
}

impl TypeSystem {
    /// Starts a builder pre-populated with the built-in types.
    pub fn builder() -> TypeSystemBuilder {
        TypeSystemBuilder::new()
    }

    /// A type system holding only the built-in types.
    pub fn builtin() -> Result<Self> {
        TypeSystemBuilder::new().build()
    }

    pub fn get(&self, name: &str) -> Option<&TypeDecl> {
        self.types.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Whether `sub` is `sup` or inherits from it.
    pub fn is_subtype(&self, sub: &str, sup: &str) -> bool {
        let mut current = Some(sub);
        while let Some(name) = current {
            if name == sup {
                return true;
            }
            current = self.types.get(name).and_then(TypeDecl::supertype);
        }
        false
    }
}

struct PendingType {
    name: String,
    supertype: String,
    features: Vec<FeatureDecl>,
}

/// Collects type declarations and resolves inheritance.
pub struct TypeSystemBuilder {
    pending: Vec<PendingType>,
}

impl TypeSystemBuilder {
    pub fn new() -> Self {
        let builder = Self {
            pending: Vec::new(),
        };
        builder
            .add_type(SOFA_TYPE, TOP_TYPE, vec![FeatureDecl::string(SOFA_STRING_FEATURE)])
            .add_type(
                ANNOTATION_TYPE,
                TOP_TYPE,
                vec![
                    FeatureDecl::reference(SOFA_FEATURE, SOFA_TYPE),
                    FeatureDecl::integer(BEGIN_FEATURE),
                    FeatureDecl::integer(END_FEATURE),
                ],
            )
            .add_type(SENTENCE_TYPE, ANNOTATION_TYPE, vec![])
            .add_type(PARAGRAPH_TYPE, ANNOTATION_TYPE, vec![])
            .add_type(LEMMA_TYPE, TOP_TYPE, vec![FeatureDecl::string(LEMMA_KEY_FEATURE)])
    }

    /// Declares a type. `features` are the type's own features; inherited ones
    /// are prepended during [`build`](Self::build).
    pub fn add_type(
        mut self,
        name: impl Into<String>,
        supertype: impl Into<String>,
        features: Vec<FeatureDecl>,
    ) -> Self {
        self.pending.push(PendingType {
            name: name.into(),
            supertype: supertype.into(),
            features,
        });
        self
    }

    pub fn build(self) -> Result<TypeSystem> {
        let mut types: BTreeMap<String, TypeDecl> = BTreeMap::new();
        types.insert(
            TOP_TYPE.to_string(),
            TypeDecl {
                name: TOP_TYPE.to_string(),
                supertype: None,
                features: Vec::new(),
            },
        );

        {
            let mut seen = std::collections::HashSet::new();
            for p in &self.pending {
                if p.name == TOP_TYPE || !seen.insert(p.name.as_str()) {
                    return Err(ModelError::DuplicateType(p.name.clone()));
                }
            }
        }

        let mut remaining = self.pending;
        while !remaining.is_empty() {
            let before = remaining.len();
            let mut deferred = Vec::new();
            for p in remaining {
                let Some(parent) = types.get(&p.supertype) else {
                    deferred.push(p);
                    continue;
                };
                let mut features = parent.features.clone();
                for f in p.features {
                    if features.iter().any(|existing| existing.name == f.name) {
                        return Err(ModelError::DuplicateFeature {
                            type_name: p.name,
                            feature: f.name,
                        });
                    }
                    features.push(f);
                }
                types.insert(
                    p.name.clone(),
                    TypeDecl {
                        name: p.name,
                        supertype: Some(p.supertype),
                        features,
                    },
                );
            }
            if deferred.len() == before {
                let p = &deferred[0];
                return Err(ModelError::UnresolvedSupertype {
                    type_name: p.name.clone(),
                    supertype: p.supertype.clone(),
                });
            }
            remaining = deferred;
        }

        for decl in types.values() {
            for f in &decl.features {
                if let Some(target) = f.range.target_type() {
                    if !types.contains_key(target) {
                        return Err(ModelError::UnknownType(target.to_string()));
                    }
                }
            }
        }

        Ok(TypeSystem { types })
    }
}

impl Default for TypeSystemBuilder {
    fn default() -> Self {
        Self::new()
    }
}

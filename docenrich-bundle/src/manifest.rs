//! Bundle manifest (manifest.toml) and component identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};

use crate::BundleError;

/// Descriptor path used when a manifest does not name one.
pub const DEFAULT_DESCRIPTOR: &str = "desc/engine.toml";

/// Stable name of one installed bundle's main component. Doubles as the
/// install directory name, so it must be a single path segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ComponentId(String);

impl ComponentId {
    pub fn new(id: impl Into<String>) -> Result<Self, BundleError> {
        let id = id.into();
        let bad = id.is_empty()
            || id == "."
            || id == ".."
            || id.contains(['/', '\\'])
            || id.chars().any(char::is_control);
        if bad {
            return Err(BundleError::InvalidComponentId(id));
        }
        Ok(Self(id))
    }

    /// Derives an id from a bundle file name by stripping the trailing
    /// extension (`people.pear` → `people`).
    pub fn from_file_name(path: &Path) -> Result<Self, BundleError> {
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default();
        Self::new(stem)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ComponentId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ComponentId {
    type Error = BundleError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ComponentId> for String {
    fn from(id: ComponentId) -> Self {
        id.0
    }
}

/// Top-level manifest embedded in every bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleManifest {
    /// Main component identifier. Optional: installers fall back to the
    /// bundle file name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component_id: Option<ComponentId>,
    /// Human-readable name.
    pub name: String,
    /// Version string.
    pub version: String,
    #[serde(default)]
    pub description: String,
    /// Path of the engine resource specifier inside the bundle.
    #[serde(default = "default_descriptor")]
    pub descriptor: String,
}

fn default_descriptor() -> String {
    DEFAULT_DESCRIPTOR.to_string()
}

impl BundleManifest {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            component_id: None,
            name: name.into(),
            version: version.into(),
            description: String::new(),
            descriptor: default_descriptor(),
        }
    }

    pub fn with_component_id(mut self, id: ComponentId) -> Self {
        self.component_id = Some(id);
        self
    }

    pub fn with_descriptor(mut self, path: impl Into<String>) -> Self {
        self.descriptor = path.into();
        self
    }

    /// Validates the manifest for required fields and constraints.
    pub fn validate(&self) -> Result<(), BundleError> {
        if self.name.is_empty() {
            return Err(BundleError::ManifestInvalid("name is required".into()));
        }
        if self.version.is_empty() {
            return Err(BundleError::ManifestInvalid("version is required".into()));
        }
        if relative_entry_path(&self.descriptor).is_err() {
            return Err(BundleError::ManifestInvalid(format!(
                "descriptor must be a relative path inside the bundle: {}",
                self.descriptor
            )));
        }
        Ok(())
    }
}

/// Turns a zip entry name into a relative path that cannot leave its root.
pub(crate) fn relative_entry_path(name: &str) -> Result<PathBuf, BundleError> {
    let path = Path::new(name);
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(BundleError::UnsafeEntryPath(name.to_string()));
            }
        }
    }
    if out.as_os_str().is_empty() {
        return Err(BundleError::UnsafeEntryPath(name.to_string()));
    }
    Ok(out)
}

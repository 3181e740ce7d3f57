//! Converter options.
//!
//! Options arrive as a flat, possibly multi-valued key/value source. The
//! converter only needs two lookups, so the host framework is abstracted as
//! [`OptionSource`]; [`FlatOptions`] is the in-memory implementation.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;

use docenrich_engine::{DEFAULT_INITIAL_HEAP_SIZE, TuningParameters};
use docenrich_model::{FEATURE_SEPARATOR, TypeSystem};

use crate::error::OptionsError;

pub const OPTION_PEAR_REPO_PATH: &str = "pear-repo-path";
pub const OPTION_PEAR_FILENAME: &str = "pear-filename";
pub const OPTION_EXCLUDE_BY_DEFAULT: &str = "exclude-by-default";
pub const OPTION_CONTENT_LIST: &str = "content-list";
pub const OPTION_ANNOTATION_OFFSETS: &str = "enable-annotation-offsets";
pub const OPTION_CONTENT_TYPES: &str = "type";
pub const OPTION_SUPPORT_ROOT: &str = "support-root";
pub const OPTION_INITIAL_HEAP_SIZE: &str = "initial-heap-size";
pub const OPTION_INSTALL_LOCK_TIMEOUT_MS: &str = "install-lock-timeout-ms";

pub const REPO_DIR_NAME: &str = "repo";
pub const INSTALL_DIR_NAME: &str = "run";

const DEFAULT_INSTALL_LOCK_TIMEOUT_MS: u64 = 30_000;

/// Read access to a flat key/value configuration.
pub trait OptionSource {
    /// The last value given for `key`.
    fn last_option_value(&self, key: &str) -> Option<&str>;

    /// Every value given for `key`, in order.
    fn option_values(&self, key: &str) -> Vec<&str>;
}

/// Ordered `(key, value)` pairs. Repeating a key adds another value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlatOptions {
    pairs: Vec<(String, String)>,
}

impl FlatOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.pairs.push((key.into(), value.into()));
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.push(key, value);
        self
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for FlatOptions {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            pairs: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl OptionSource for FlatOptions {
    fn last_option_value(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn option_values(&self, key: &str) -> Vec<&str> {
        self.pairs
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .collect()
    }
}

/// A flag is set when its value repeats the key name, or is `true`.
fn flag<S: OptionSource + ?Sized>(source: &S, key: &str) -> bool {
    source
        .last_option_value(key)
        .is_some_and(|v| v == key || v.eq_ignore_ascii_case("true"))
}

fn number<S: OptionSource + ?Sized>(
    source: &S,
    key: &'static str,
    default: u64,
) -> Result<u64, OptionsError> {
    match source.last_option_value(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: std::num::ParseIntError| {
            OptionsError::Invalid {
                key,
                value: raw.to_string(),
                reason: e.to_string(),
            }
        }),
    }
}

/// Validated converter settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConverterOptions {
    /// Informational; used as the support root when none is given.
    pub pear_repo_path: Option<PathBuf>,
    pub pear_filename: String,
    /// Holds `repo/` (bundle files) and `run/` (installed components).
    pub support_root: PathBuf,
    pub exclude_by_default: bool,
    pub content_list: Vec<String>,
    pub annotation_offsets: bool,
    /// Raw `type` values; resolved into [`ContentSpec`]s once the engine's
    /// type system is known.
    pub content_types: Vec<String>,
    pub initial_heap_size: usize,
    pub install_lock_timeout: Duration,
}

impl ConverterOptions {
    pub fn from_source<S: OptionSource + ?Sized>(source: &S) -> Result<Self, OptionsError> {
        let pear_repo_path = source.last_option_value(OPTION_PEAR_REPO_PATH).map(PathBuf::from);
        let pear_filename = source
            .last_option_value(OPTION_PEAR_FILENAME)
            .filter(|v| !v.trim().is_empty())
            .ok_or(OptionsError::Missing(OPTION_PEAR_FILENAME))?
            .to_string();
        let support_root = source
            .last_option_value(OPTION_SUPPORT_ROOT)
            .map(PathBuf::from)
            .or_else(|| pear_repo_path.clone())
            .ok_or(OptionsError::Missing(OPTION_SUPPORT_ROOT))?;

        let mut content_list: Vec<String> = Vec::new();
        for value in source.option_values(OPTION_CONTENT_LIST) {
            if !content_list.iter().any(|c| c == value) {
                content_list.push(value.to_string());
            }
        }

        let heap = number(source, OPTION_INITIAL_HEAP_SIZE, DEFAULT_INITIAL_HEAP_SIZE as u64)?;
        let initial_heap_size = usize::try_from(heap).map_err(|e| OptionsError::Invalid {
            key: OPTION_INITIAL_HEAP_SIZE,
            value: heap.to_string(),
            reason: e.to_string(),
        })?;
        let lock_ms = number(
            source,
            OPTION_INSTALL_LOCK_TIMEOUT_MS,
            DEFAULT_INSTALL_LOCK_TIMEOUT_MS,
        )?;

        let options = Self {
            pear_repo_path,
            pear_filename,
            support_root,
            exclude_by_default: flag(source, OPTION_EXCLUDE_BY_DEFAULT),
            content_list,
            annotation_offsets: flag(source, OPTION_ANNOTATION_OFFSETS),
            content_types: source
                .option_values(OPTION_CONTENT_TYPES)
                .into_iter()
                .map(str::to_string)
                .collect(),
            initial_heap_size,
            install_lock_timeout: Duration::from_millis(lock_ms),
        };
        debug!(
            support_root = %options.support_root.display(),
            pear_filename = %options.pear_filename,
            content_types = options.content_types.len(),
            exclude_by_default = options.exclude_by_default,
            annotation_offsets = options.annotation_offsets,
            "Converter options parsed"
        );
        Ok(options)
    }

    pub fn repo_dir(&self) -> PathBuf {
        self.support_root.join(REPO_DIR_NAME)
    }

    pub fn install_dir(&self) -> PathBuf {
        self.support_root.join(INSTALL_DIR_NAME)
    }

    pub fn bundle_path(&self) -> PathBuf {
        self.repo_dir().join(Path::new(&self.pear_filename))
    }

    pub fn tuning(&self) -> TuningParameters {
        TuningParameters {
            initial_heap_size: self.initial_heap_size,
        }
    }
}

/// Which annotation type (and optionally which feature) to project into
/// which named content element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentSpec {
    pub content_name: String,
    pub type_name: String,
    pub feature_name: Option<String>,
}

impl ContentSpec {
    pub fn new(
        content_name: impl Into<String>,
        type_name: impl Into<String>,
        feature_name: Option<String>,
    ) -> Self {
        Self {
            content_name: content_name.into(),
            type_name: type_name.into(),
            feature_name,
        }
    }

    /// Parses a `type` option value.
    ///
    /// `content:type[:feature]` is split on the feature separator. The dotted
    /// form `content.type[.feature]` is resolved against `type_system`: the
    /// remainder is a type if the type system knows it, otherwise the last
    /// segment is a feature when the prefix is a known type. Names the type
    /// system does not know are kept as given.
    pub fn parse(raw: &str, type_system: &TypeSystem) -> Result<Self, OptionsError> {
        let invalid = |reason: &str| OptionsError::Invalid {
            key: OPTION_CONTENT_TYPES,
            value: raw.to_string(),
            reason: reason.to_string(),
        };

        if raw.contains(FEATURE_SEPARATOR) {
            let parts: Vec<&str> = raw.split(FEATURE_SEPARATOR).collect();
            if !(2..=3).contains(&parts.len()) || parts.iter().any(|p| p.trim().is_empty()) {
                return Err(invalid("expected content:type[:feature]"));
            }
            return Ok(Self::new(
                parts[0].trim(),
                parts[1].trim(),
                parts.get(2).map(|f| f.trim().to_string()),
            ));
        }

        let (content_name, qualified) = raw
            .split_once('.')
            .filter(|(c, q)| !c.trim().is_empty() && !q.trim().is_empty())
            .ok_or_else(|| invalid("expected content.type[.feature]"))?;
        let (content_name, qualified) = (content_name.trim(), qualified.trim());

        if type_system.contains(qualified) {
            return Ok(Self::new(content_name, qualified, None));
        }
        if let Some((type_name, feature)) = qualified.rsplit_once('.') {
            if type_system.contains(type_name) && !feature.is_empty() {
                return Ok(Self::new(content_name, type_name, Some(feature.to_string())));
            }
        }
        debug!(value = %raw, "Type name not in type system; keeping as given");
        Ok(Self::new(content_name, qualified, None))
    }
}

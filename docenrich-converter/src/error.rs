//! Error types for the converter.

use std::path::PathBuf;

use thiserror::Error;

use docenrich_bundle::{BundleError, ComponentId};
use docenrich_engine::EngineError;

#[derive(Debug, Error)]
pub enum OptionsError {
    #[error("required option missing: {0}")]
    Missing(&'static str),

    #[error("option '{key}' has invalid value {value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("{what} does not exist: {}", path.display())]
    MissingDirectory { what: &'static str, path: PathBuf },

    #[error("install directory is not writable: {}", .0.display())]
    NotWritable(PathBuf),

    #[error("bundle file not found: {}", .0.display())]
    MissingBundle(PathBuf),

    #[error("installed component '{installed}' does not match bundle component '{expected}'")]
    ComponentMismatch {
        expected: ComponentId,
        installed: ComponentId,
    },

    #[error("package error: {0}")]
    Bundle(#[from] BundleError),

    #[error("engine construction failed: {0}")]
    Engine(#[from] EngineError),
}

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("XML attribute error: {0}")]
    Attribute(#[from] quick_xml::events::attributes::AttrError),

    #[error("input is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed document: {0}")]
    Malformed(String),
}

/// Construction-time failures. A converter that hit one never becomes usable.
#[derive(Debug, Error)]
pub enum FatalError {
    #[error(transparent)]
    Options(#[from] OptionsError),

    #[error(transparent)]
    Provision(#[from] ProvisionError),
}

#[derive(Debug, Error)]
pub enum ConverterError {
    #[error("fatal converter error: {0}")]
    Fatal(#[from] FatalError),

    /// One call failed; the converter stays usable.
    #[error("{message}")]
    Conversion {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("the converter has already been terminated")]
    Terminated,
}

impl ConverterError {
    pub fn conversion(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Conversion {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}

impl From<OptionsError> for ConverterError {
    fn from(e: OptionsError) -> Self {
        Self::Fatal(e.into())
    }
}

impl From<ProvisionError> for ConverterError {
    fn from(e: ProvisionError) -> Self {
        Self::Fatal(e.into())
    }
}

//! docenrich converter.
//!
//! Runs each logical document of a VXML payload through an analysis engine
//! and splices what the engine found back into the document as new `content`
//! elements.
//!
//! - [`EngineProvisioner`]: installs, updates or reuses the engine bundle
//! - [`FeatureProjector`]: flattens one annotation into attributes and a body
//! - [`DocumentEnricher`]: filter, analyse, project, append
//! - [`EnrichingConverter`]: the [`Converter`] lifecycle around all of it

mod converter;
mod document;
mod enricher;
mod error;
mod options;
mod projector;
mod provisioner;

pub use converter::{Converter, EnrichingConverter};
pub use document::{
    CONTENT_ELEMENT, DOCUMENT_ELEMENT, Element, NAME_ATTRIBUTE, Node, XmlDocument, filter,
};
pub use enricher::DocumentEnricher;
pub use error::{ConverterError, DocumentError, FatalError, OptionsError, ProvisionError};
pub use options::{
    ContentSpec, ConverterOptions, FlatOptions, INSTALL_DIR_NAME, OPTION_ANNOTATION_OFFSETS,
    OPTION_CONTENT_LIST, OPTION_CONTENT_TYPES, OPTION_EXCLUDE_BY_DEFAULT,
    OPTION_INITIAL_HEAP_SIZE, OPTION_INSTALL_LOCK_TIMEOUT_MS, OPTION_PEAR_FILENAME,
    OPTION_PEAR_REPO_PATH, OPTION_SUPPORT_ROOT, OptionSource, REPO_DIR_NAME,
};
pub use projector::{
    COVERED_TEXT_ATTRIBUTE, FeatureProjector, HOUSEKEEPING_FEATURES, NestedStrategy,
    ProjectedContent, RULE_ID_FEATURE,
};
pub use provisioner::{EngineProvisioner, InstallOutcome, Provisioned, SupportLayout};

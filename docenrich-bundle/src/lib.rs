//! Analysis-engine bundles.
//!
//! A bundle is a zip archive containing:
//! - `manifest.toml`: component id (optional), name, version, descriptor path
//! - the engine resource specifier at the manifest's `descriptor` path
//!   (default `desc/engine.toml`)
//! - any other files the engine needs (dictionaries, models)
//!
//! Installing a bundle extracts it into `<install_dir>/<componentId>/` and
//! writes an `install.toml` receipt carrying the bundle's content hash.

mod error;
mod lock;
mod manifest;
mod package;
mod store;

pub use error::BundleError;
pub use lock::{InstallLock, STALE_LOCK_AGE};
pub use manifest::{BundleManifest, ComponentId, DEFAULT_DESCRIPTOR};
pub use package::{Bundle, BundleBuilder, BundleEntry, MANIFEST_ENTRY};
pub use store::{BundleInfo, DirPackageStore, InstalledComponent, PackageStore, RECEIPT_FILE};

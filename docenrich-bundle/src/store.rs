//! Installed-component store.
//!
//! [`PackageStore`] is the seam between the provisioning algorithm (which
//! decides *whether* to install) and the filesystem work of installing.
//! [`DirPackageStore`] is the real implementation over an install directory.

use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::lock::InstallLock;
use crate::manifest::{relative_entry_path, BundleManifest, ComponentId};
use crate::package::{Bundle, MANIFEST_ENTRY};
use crate::BundleError;

/// Receipt written next to an installed component.
pub const RECEIPT_FILE: &str = "install.toml";

const STAGING_SUFFIX: &str = ".staging";

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

/// What an installer learns from a bundle file without installing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleInfo {
    /// Component id declared in the manifest, if any.
    pub declared_id: Option<ComponentId>,
    /// Modification time of the bundle file.
    pub modified: SystemTime,
}

/// A component materialised in the install directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledComponent {
    pub component_id: ComponentId,
    /// Install root of the component.
    pub root: PathBuf,
    /// Absolute path of the engine resource specifier.
    pub resource_specifier: PathBuf,
    /// Content hash recorded at install time, when a receipt exists.
    pub content_hash: Option<String>,
}

/// Install, inspect and remove components.
pub trait PackageStore {
    /// Held across the install/update decision for one component.
    type Guard;

    /// Reads a bundle's manifest and file timestamp.
    fn inspect(&self, bundle: &Path) -> Result<BundleInfo, BundleError>;

    /// The installed descriptor for `id`, or `None` when nothing is installed.
    fn describe(&self, id: &ComponentId) -> Result<Option<InstalledComponent>, BundleError>;

    /// When the installed copy of `id` was last written.
    fn installed_at(&self, id: &ComponentId) -> Result<SystemTime, BundleError>;

    /// Installs `bundle` under `id`.
    fn install(&self, bundle: &Path, id: &ComponentId) -> Result<InstalledComponent, BundleError>;

    /// Deletes the installed copy of `id`.
    fn remove(&self, id: &ComponentId) -> Result<(), BundleError>;

    /// Serialises install work on `id`.
    fn lock(&self, id: &ComponentId) -> Result<Self::Guard, BundleError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct InstallReceipt {
    component_id: ComponentId,
    content_hash: String,
    bundle_file: String,
    installed_at: String,
}

/// [`PackageStore`] over `<install_dir>/<componentId>/` directories.
#[derive(Debug, Clone)]
pub struct DirPackageStore {
    install_dir: PathBuf,
    lock_timeout: Duration,
}

impl DirPackageStore {
    pub fn new(install_dir: impl Into<PathBuf>) -> Self {
        Self {
            install_dir: install_dir.into(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn install_dir(&self) -> &Path {
        &self.install_dir
    }

    pub fn component_dir(&self, id: &ComponentId) -> PathBuf {
        self.install_dir.join(id.as_str())
    }

    /// Where an install is extracted before it is moved into place.
    pub fn staging_dir(&self, id: &ComponentId) -> PathBuf {
        self.install_dir.join(format!(".{id}{STAGING_SUFFIX}"))
    }

    fn open_bundle(bundle: &Path) -> Result<Bundle, BundleError> {
        let file = File::open(bundle)?;
        Bundle::open(BufReader::new(file))
    }
}

/// Writes every entry, the installed manifest and the receipt under `root`.
/// Returns the bundle's content hash.
fn extract(
    opened: &Bundle,
    bundle: &Path,
    id: &ComponentId,
    root: &Path,
) -> Result<String, BundleError> {
    fs::create_dir_all(root)?;
    for entry in opened.entries() {
        if entry.name == MANIFEST_ENTRY {
            continue;
        }
        let target = root.join(relative_entry_path(&entry.name)?);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&target, &entry.data)?;
        debug!(path = %target.display(), size_bytes = entry.data.len(), "Extracted bundle entry");
    }

    // The installed manifest always names the id it was installed under.
    let mut manifest = opened.manifest.clone();
    manifest.component_id = Some(id.clone());
    fs::write(root.join(MANIFEST_ENTRY), toml::to_string_pretty(&manifest)?)?;

    let receipt = InstallReceipt {
        component_id: id.clone(),
        content_hash: opened.content_hash(),
        bundle_file: bundle.display().to_string(),
        installed_at: chrono::Utc::now().to_rfc3339(),
    };
    fs::write(root.join(RECEIPT_FILE), toml::to_string_pretty(&receipt)?)?;
    Ok(receipt.content_hash)
}

impl PackageStore for DirPackageStore {
    type Guard = InstallLock;

    fn inspect(&self, bundle: &Path) -> Result<BundleInfo, BundleError> {
        let modified = fs::metadata(bundle)?.modified()?;
        let opened = Self::open_bundle(bundle)?;
        Ok(BundleInfo {
            declared_id: opened.manifest.component_id,
            modified,
        })
    }

    fn describe(&self, id: &ComponentId) -> Result<Option<InstalledComponent>, BundleError> {
        let root = self.component_dir(id);
        if !root.is_dir() {
            return Ok(None);
        }
        let manifest_path = root.join(MANIFEST_ENTRY);
        if !manifest_path.is_file() {
            return Err(BundleError::MissingEntry(manifest_path.display().to_string()));
        }
        let manifest: BundleManifest = toml::from_str(&fs::read_to_string(&manifest_path)?)?;
        manifest.validate()?;

        let receipt_path = root.join(RECEIPT_FILE);
        let receipt: Option<InstallReceipt> = if receipt_path.is_file() {
            Some(toml::from_str(&fs::read_to_string(&receipt_path)?)?)
        } else {
            None
        };

        let component_id = match (manifest.component_id, &receipt) {
            (Some(id), _) => id,
            (None, Some(r)) => r.component_id.clone(),
            (None, None) => {
                return Err(BundleError::ManifestInvalid(format!(
                    "installed manifest {} names no component id",
                    manifest_path.display()
                )));
            }
        };
        let resource_specifier = root.join(relative_entry_path(&manifest.descriptor)?);

        Ok(Some(InstalledComponent {
            component_id,
            root,
            resource_specifier,
            content_hash: receipt.map(|r| r.content_hash),
        }))
    }

    fn installed_at(&self, id: &ComponentId) -> Result<SystemTime, BundleError> {
        let root = self.component_dir(id);
        if !root.is_dir() {
            return Err(BundleError::NotInstalled(id.to_string()));
        }
        Ok(fs::metadata(root)?.modified()?)
    }

    fn install(&self, bundle: &Path, id: &ComponentId) -> Result<InstalledComponent, BundleError> {
        let opened = Self::open_bundle(bundle)?;
        let staging = self.staging_dir(id);
        if staging.exists() {
            fs::remove_dir_all(&staging)?;
        }

        let content_hash = match extract(&opened, bundle, id, &staging) {
            Ok(hash) => hash,
            Err(e) => {
                if let Err(cleanup) = fs::remove_dir_all(&staging) {
                    warn!(
                        path = %staging.display(),
                        error = %cleanup,
                        "Failed to clean up staging directory"
                    );
                }
                return Err(e);
            }
        };

        // The component directory only ever holds a complete install.
        let root = self.component_dir(id);
        if root.exists() {
            fs::remove_dir_all(&root)?;
        }
        fs::rename(&staging, &root)?;

        info!(
            component_id = %id,
            path = %root.display(),
            content_hash = %content_hash,
            "Component installed"
        );
        self.describe(id)?
            .ok_or_else(|| BundleError::NotInstalled(id.to_string()))
    }

    fn remove(&self, id: &ComponentId) -> Result<(), BundleError> {
        let root = self.component_dir(id);
        fs::remove_dir_all(&root)?;
        info!(component_id = %id, path = %root.display(), "Component removed");
        Ok(())
    }

    fn lock(&self, id: &ComponentId) -> Result<InstallLock, BundleError> {
        let path = self.install_dir.join(format!("{id}.lock"));
        InstallLock::acquire(path, self.lock_timeout)
    }
}

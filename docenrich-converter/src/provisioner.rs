//! Engine provisioning.
//!
//! Turns a bundle file in the repo directory into a running engine: install
//! on first use, reinstall when the bundle file is newer than the installed
//! copy, reuse otherwise. All filesystem work goes through a
//! [`PackageStore`], and the install decision runs under the store's lock.

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use tracing::{debug, error, info, warn};

use docenrich_bundle::{BundleError, ComponentId, InstalledComponent, PackageStore};
use docenrich_engine::{AnalysisEngine, EngineFactory, TuningParameters};

use crate::error::ProvisionError;
use crate::options::{ConverterOptions, INSTALL_DIR_NAME, REPO_DIR_NAME};

const WRITE_CHECK_FILE: &str = ".docenrich-write-check";

/// The directories a converter provisions from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupportLayout {
    pub root: PathBuf,
    pub repo_dir: PathBuf,
    pub install_dir: PathBuf,
}

impl SupportLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            repo_dir: root.join(REPO_DIR_NAME),
            install_dir: root.join(INSTALL_DIR_NAME),
            root,
        }
    }

    pub fn from_options(options: &ConverterOptions) -> Self {
        Self::new(&options.support_root)
    }

    /// Checks the layout and returns the path of `bundle_file` in the repo.
    pub fn validate(&self, bundle_file: &str) -> Result<PathBuf, ProvisionError> {
        for (what, dir) in [
            ("support root", &self.root),
            ("repo directory", &self.repo_dir),
            ("install directory", &self.install_dir),
        ] {
            if !dir.is_dir() {
                return Err(ProvisionError::MissingDirectory {
                    what,
                    path: dir.clone(),
                });
            }
        }
        ensure_writable(&self.install_dir)?;

        let bundle = self.repo_dir.join(bundle_file);
        if !bundle.is_file() {
            return Err(ProvisionError::MissingBundle(bundle));
        }
        Ok(bundle)
    }
}

/// Both a read-only directory and a failed create count as not writable. The
/// check file is removed again, so a reuse leaves `dir`'s contents as it found
/// them.
fn ensure_writable(dir: &Path) -> Result<(), ProvisionError> {
    let readonly = fs::metadata(dir)
        .map(|metadata| metadata.permissions().readonly())
        .unwrap_or(true);
    if readonly {
        return Err(ProvisionError::NotWritable(dir.to_path_buf()));
    }
    let check = dir.join(WRITE_CHECK_FILE);
    match OpenOptions::new().write(true).create(true).truncate(true).open(&check) {
        Ok(file) => {
            drop(file);
            if let Err(e) = fs::remove_file(&check) {
                warn!(path = %check.display(), error = %e, "Failed to remove write check file");
            }
            Ok(())
        }
        Err(e) => {
            debug!(path = %check.display(), error = %e, "Write check failed");
            Err(ProvisionError::NotWritable(dir.to_path_buf()))
        }
    }
}

/// What provisioning did to the install directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    Installed,
    Updated,
    Reused,
}

/// A provisioned engine and the component it was built from.
pub struct Provisioned {
    pub component: InstalledComponent,
    pub outcome: InstallOutcome,
    pub engine: Box<dyn AnalysisEngine>,
}

pub struct EngineProvisioner<S> {
    store: S,
}

impl<S: PackageStore> EngineProvisioner<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Validates `layout`, installs or updates `bundle_file` as needed and
    /// builds one engine from the installed resource specifier.
    pub fn provision(
        &self,
        layout: &SupportLayout,
        bundle_file: &str,
        factory: &dyn EngineFactory,
        tuning: &TuningParameters,
    ) -> Result<Provisioned, ProvisionError> {
        let bundle = layout.validate(bundle_file).inspect_err(|e| {
            error!(error = %e, "Provisioning preconditions not met");
        })?;
        let (component, outcome) = self.ensure_installed(&bundle)?;

        let engine = factory
            .create_engine(&component.resource_specifier, tuning)
            .inspect_err(|e| {
                error!(
                    component_id = %component.component_id,
                    specifier = %component.resource_specifier.display(),
                    error = %e,
                    "Failed to create analysis engine"
                );
            })?;
        info!(
            component_id = %component.component_id,
            initial_heap_size = tuning.initial_heap_size,
            "Analysis engine created"
        );
        Ok(Provisioned {
            component,
            outcome,
            engine,
        })
    }

    /// Installs `bundle` unless an up-to-date copy is already installed.
    pub fn ensure_installed(
        &self,
        bundle: &Path,
    ) -> Result<(InstalledComponent, InstallOutcome), ProvisionError> {
        let info = self.store.inspect(bundle).inspect_err(|e| {
            error!(bundle = %bundle.display(), error = %e, "Failed to read bundle");
        })?;
        let id = match info.declared_id {
            Some(id) => id,
            None => {
                let id = ComponentId::from_file_name(bundle)?;
                warn!(
                    bundle = %bundle.display(),
                    component_id = %id,
                    "Bundle declares no component id; using file name"
                );
                id
            }
        };

        let _guard = self.store.lock(&id)?;
        let described = match self.store.describe(&id) {
            Ok(described) => described,
            Err(BundleError::MissingEntry(entry)) => {
                warn!(
                    component_id = %id,
                    missing = %entry,
                    "Installed copy is incomplete; reinstalling"
                );
                self.store.remove(&id)?;
                let component = self.install(bundle, &id)?;
                return Ok((component, InstallOutcome::Updated));
            }
            Err(e) => return Err(e.into()),
        };
        let Some(installed) = described else {
            info!(component_id = %id, bundle = %bundle.display(), "Installing component");
            let component = self.install(bundle, &id)?;
            return Ok((component, InstallOutcome::Installed));
        };

        if installed.component_id != id {
            error!(
                expected = %id,
                installed = %installed.component_id,
                "Installed component id does not match bundle"
            );
            return Err(ProvisionError::ComponentMismatch {
                expected: id,
                installed: installed.component_id,
            });
        }

        let installed_at = self.store.installed_at(&id)?;
        if info.modified > installed_at {
            info!(
                component_id = %id,
                bundle = %bundle.display(),
                "Bundle is newer than installed copy; reinstalling"
            );
            self.store.remove(&id)?;
            let component = self.install(bundle, &id)?;
            return Ok((component, InstallOutcome::Updated));
        }

        info!(
            component_id = %id,
            content_hash = installed.content_hash.as_deref().unwrap_or("-"),
            "Reusing installed component"
        );
        Ok((installed, InstallOutcome::Reused))
    }

    fn install(&self, bundle: &Path, id: &ComponentId) -> Result<InstalledComponent, ProvisionError> {
        let component = self.store.install(bundle, id)?;
        if &component.component_id != id {
            return Err(ProvisionError::ComponentMismatch {
                expected: id.clone(),
                installed: component.component_id,
            });
        }
        Ok(component)
    }
}

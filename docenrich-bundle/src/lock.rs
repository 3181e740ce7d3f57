//! Install-directory locking.
//!
//! Installing or updating a component deletes and recreates a directory tree.
//! Two converters provisioning the same component from the same install
//! directory serialise on a `<componentId>.lock` file created with
//! create-new semantics.
//!
//! The file records the holder's pid. A waiter reclaims the lock when that
//! process is gone, or when the file is older than [`STALE_LOCK_AGE`], so a
//! crashed provisioner cannot wedge later ones.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::BundleError;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A lock file older than this is treated as abandoned whatever pid it records.
pub const STALE_LOCK_AGE: Duration = Duration::from_secs(10 * 60);

/// Held while a component is being inspected, installed or replaced.
/// Dropping the guard releases the lock.
#[derive(Debug)]
pub struct InstallLock {
    path: PathBuf,
}

impl InstallLock {
    /// Creates the lock file, polling until `timeout` if someone else holds it.
    pub fn acquire(path: impl Into<PathBuf>, timeout: Duration) -> Result<Self, BundleError> {
        let path = path.into();
        let started = Instant::now();
        loop {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    if let Err(e) = writeln!(file, "{}", std::process::id()) {
                        warn!(path = %path.display(), error = %e, "Failed to record lock holder");
                    }
                    debug!(path = %path.display(), "Install lock acquired");
                    return Ok(Self { path });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if is_stale(&path) {
                        reclaim(&path)?;
                        continue;
                    }
                    if started.elapsed() >= timeout {
                        return Err(BundleError::LockTimeout {
                            path,
                            waited_ms: started.elapsed().as_millis(),
                        });
                    }
                    thread::sleep(POLL_INTERVAL);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Whether the lock at `path` was left behind by a holder that no longer runs.
fn is_stale(path: &Path) -> bool {
    let Ok(metadata) = fs::metadata(path) else {
        return false;
    };
    let age = metadata
        .modified()
        .ok()
        .and_then(|modified| modified.elapsed().ok())
        .unwrap_or_default();
    if age >= STALE_LOCK_AGE {
        return true;
    }
    // An empty file means the holder has not written its pid yet.
    fs::read_to_string(path)
        .ok()
        .and_then(|contents| contents.trim().parse::<u32>().ok())
        .is_some_and(process_is_gone)
}

#[cfg(target_os = "linux")]
fn process_is_gone(pid: u32) -> bool {
    Path::new("/proc/self").exists() && !Path::new("/proc").join(pid.to_string()).exists()
}

#[cfg(not(target_os = "linux"))]
fn process_is_gone(_pid: u32) -> bool {
    false
}

fn reclaim(path: &Path) -> Result<(), BundleError> {
    warn!(path = %path.display(), "Reclaiming abandoned install lock");
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

impl Drop for InstallLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "Failed to release install lock");
        } else {
            debug!(path = %self.path.display(), "Install lock released");
        }
    }
}

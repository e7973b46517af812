//! Mount point ownership.
//!
//! [`MountSet`] owns every mount it creates and releases them in reverse
//! order. Release is idempotent and also runs on drop, so a failed or
//! cancelled run never leaves the device mounted.

use crate::partition::Filesystem;
use crate::util::process::ToolFailure;
use bootstick_shared::errors::{BootstickError, BootstickResult};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

const UNMOUNT_ATTEMPTS: u32 = 3;
const UNMOUNT_RETRY_DELAY: Duration = Duration::from_millis(250);

/// Mount/unmount collaborator.
pub trait MountTool: Send + Sync {
    fn mount(&self, source: &Path, target: &Path, filesystem: Filesystem) -> Result<(), ToolFailure>;

    fn unmount(&self, target: &Path) -> Result<(), ToolFailure>;

    /// Flush dirty pages before unmounting removable media.
    fn sync(&self) {}
}

/// [`MountTool`] using mount(2) through `nix`.
#[derive(Default)]
pub struct NixMountTool;

#[cfg(target_os = "linux")]
impl MountTool for NixMountTool {
    fn mount(&self, source: &Path, target: &Path, filesystem: Filesystem) -> Result<(), ToolFailure> {
        use nix::mount::{MsFlags, mount};
        mount(
            Some(source),
            target,
            Some(filesystem.fstype()),
            MsFlags::MS_NOATIME,
            None::<&str>,
        )
        .map_err(|e| ToolFailure::new("mount", Some(e as i32), format!("{} on {}: {}", source.display(), target.display(), e)))
    }

    fn unmount(&self, target: &Path) -> Result<(), ToolFailure> {
        use nix::mount::{MntFlags, umount2};
        umount2(target, MntFlags::empty())
            .map_err(|e| ToolFailure::new("umount", Some(e as i32), format!("{}: {}", target.display(), e)))
    }

    fn sync(&self) {
        nix::unistd::sync();
    }
}

#[cfg(not(target_os = "linux"))]
impl MountTool for NixMountTool {
    fn mount(&self, _source: &Path, _target: &Path, _filesystem: Filesystem) -> Result<(), ToolFailure> {
        Err(ToolFailure::new("mount", None, "mounting is only supported on Linux"))
    }

    fn unmount(&self, _target: &Path) -> Result<(), ToolFailure> {
        Err(ToolFailure::new("umount", None, "mounting is only supported on Linux"))
    }
}

/// Mounts owned by one provisioning run.
pub struct MountSet {
    tool: Arc<dyn MountTool>,
    base: PathBuf,
    /// Mount points in mount order; released in reverse
    mounted: Vec<PathBuf>,
    /// Directories this set created and must remove
    created_dirs: Vec<PathBuf>,
}

impl MountSet {
    /// Mount points will be created below `base`.
    pub fn new(tool: Arc<dyn MountTool>, base: impl Into<PathBuf>) -> Self {
        Self {
            tool,
            base: base.into(),
            mounted: Vec::new(),
            created_dirs: Vec::new(),
        }
    }

    /// Default base: `<tmp>/bootstick-<pid>`.
    pub fn default_base() -> PathBuf {
        std::env::temp_dir().join(format!("bootstick-{}", std::process::id()))
    }

    /// Mount `source` at `<base>/<name>` and return the mount point.
    pub fn mount(&mut self, source: &Path, name: &str, filesystem: Filesystem) -> BootstickResult<PathBuf> {
        let target = self.base.join(name);
        let base = self.base.clone();
        self.ensure_dir(&base)?;
        self.ensure_dir(&target)?;

        self.tool.mount(source, &target, filesystem).map_err(|e| {
            BootstickError::Storage(format!("mounting {} at {}: {}", source.display(), target.display(), e))
        })?;
        tracing::debug!(source = %source.display(), target = %target.display(), "Mounted");
        self.mounted.push(target.clone());
        Ok(target)
    }

    fn ensure_dir(&mut self, dir: &Path) -> BootstickResult<()> {
        if dir.exists() {
            return Ok(());
        }
        std::fs::create_dir_all(dir)
            .map_err(|e| BootstickError::Storage(format!("creating mount point {}: {}", dir.display(), e)))?;
        self.created_dirs.push(dir.to_path_buf());
        Ok(())
    }

    pub fn mount_points(&self) -> &[PathBuf] {
        &self.mounted
    }

    pub fn is_empty(&self) -> bool {
        self.mounted.is_empty()
    }

    /// Unmount everything, newest first. Safe to call repeatedly.
    ///
    /// Every mount point is attempted even if an earlier one fails; the first
    /// failure is returned.
    pub fn release(&mut self) -> BootstickResult<()> {
        if self.mounted.is_empty() && self.created_dirs.is_empty() {
            return Ok(());
        }
        self.tool.sync();

        let mut first_error = None;
        while let Some(target) = self.mounted.pop() {
            if let Err(e) = self.unmount_with_retry(&target) {
                tracing::warn!(target = %target.display(), error = %e, "Failed to unmount");
                first_error.get_or_insert(BootstickError::Storage(format!(
                    "unmounting {}: {}",
                    target.display(),
                    e
                )));
                // Keep the directory: it is still a live mount point.
                self.created_dirs.retain(|d| d != &target);
            }
        }

        // Only empty directories are removed; never recurse into a mount point.
        while let Some(dir) = self.created_dirs.pop() {
            if let Err(e) = std::fs::remove_dir(&dir) {
                tracing::debug!(dir = %dir.display(), error = %e, "Mount point directory left in place");
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn unmount_with_retry(&self, target: &Path) -> Result<(), ToolFailure> {
        let mut attempt = 1;
        loop {
            match self.tool.unmount(target) {
                Ok(()) => {
                    tracing::debug!(target = %target.display(), "Unmounted");
                    return Ok(());
                }
                Err(e) if attempt < UNMOUNT_ATTEMPTS => {
                    tracing::debug!(target = %target.display(), attempt, error = %e, "Unmount failed, retrying");
                    std::thread::sleep(UNMOUNT_RETRY_DELAY);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Drop for MountSet {
    fn drop(&mut self) {
        if self.mounted.is_empty() {
            return;
        }
        tracing::warn!(count = self.mounted.len(), "Mount set dropped while mounted, releasing");
        if let Err(e) = self.release() {
            tracing::warn!("Failed to release mounts during drop: {}", e);
        }
    }
}

//! Target device description and safety validation.
//!
//! Device discovery is a front-end concern; this module only describes a
//! chosen device and refuses devices that must never be written to.

mod probe;

pub use probe::{probe, probe_with_roots};

use bootstick_shared::errors::{BootstickError, BootstickResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Mount points that identify the running system's own disk.
const SYSTEM_MOUNTPOINTS: &[&str] = &["/", "/boot", "/boot/efi", "/efi", "/usr", "/home"];

/// Logical sector sizes the layout is aligned for.
const SUPPORTED_SECTOR_SIZES: &[u32] = &[512, 4096];

/// A partition currently present on the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExistingPartition {
    pub path: PathBuf,
    #[serde(default)]
    pub mountpoint: Option<PathBuf>,
}

/// The device to provision. Read-only input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetDevice {
    /// Block device node, e.g. `/dev/sdb`
    pub path: PathBuf,
    pub size_bytes: u64,
    #[serde(default = "default_sector_size")]
    pub logical_sector_size: u32,
    #[serde(default)]
    pub partitions: Vec<ExistingPartition>,
    #[serde(default)]
    pub removable: bool,
    #[serde(default)]
    pub model: Option<String>,
}

fn default_sector_size() -> u32 {
    512
}

impl TargetDevice {
    pub fn new(path: impl Into<PathBuf>, size_bytes: u64) -> Self {
        Self {
            path: path.into(),
            size_bytes,
            logical_sector_size: default_sector_size(),
            partitions: Vec::new(),
            removable: true,
            model: None,
        }
    }

    /// Refuse the system boot device and geometries the layout cannot align.
    pub fn validate(&self) -> BootstickResult<()> {
        if self.path.as_os_str().is_empty() {
            return Err(BootstickError::Validation("device path is empty".into()));
        }

        for part in &self.partitions {
            if let Some(mountpoint) = &part.mountpoint
                && SYSTEM_MOUNTPOINTS.iter().any(|m| Path::new(m) == mountpoint)
            {
                return Err(BootstickError::Validation(format!(
                    "{} holds the running system ({} is mounted at {})",
                    self.path.display(),
                    part.path.display(),
                    mountpoint.display()
                )));
            }
        }

        if !SUPPORTED_SECTOR_SIZES.contains(&self.logical_sector_size) {
            return Err(BootstickError::Validation(format!(
                "{} has unsupported logical sector size {}",
                self.path.display(),
                self.logical_sector_size
            )));
        }

        if self.size_bytes == 0 {
            return Err(BootstickError::Validation(format!(
                "{} reports zero size (no medium?)",
                self.path.display()
            )));
        }

        if !self.removable {
            tracing::warn!(
                device = %self.path.display(),
                "Target is not flagged removable by the kernel"
            );
        }

        Ok(())
    }

    /// Device node of the 1-based partition `index`.
    ///
    /// Devices whose name ends in a digit (`nvme0n1`, `mmcblk0`, `loop0`)
    /// use a `p` separator.
    pub fn partition_path(&self, index: u32) -> PathBuf {
        let base = self.path.to_string_lossy();
        let needs_separator = base.chars().last().is_some_and(|c| c.is_ascii_digit());
        if needs_separator {
            PathBuf::from(format!("{}p{}", base, index))
        } else {
            PathBuf::from(format!("{}{}", base, index))
        }
    }

    /// Existing partitions that are currently mounted.
    pub fn mounted_partitions(&self) -> impl Iterator<Item = (&Path, &Path)> {
        self.partitions
            .iter()
            .filter_map(|p| p.mountpoint.as_deref().map(|m| (p.path.as_path(), m)))
    }
}

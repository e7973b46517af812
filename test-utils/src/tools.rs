//! Recording fakes for the external tools.

use bootstick::bootloader::{BootTarget, BootloaderTool};
use bootstick::mount::MountTool;
use bootstick::partition::{Filesystem, FormatTool, PartitionLayout, PartitionTable, PartitionTool, TableEntry};
use bootstick::util::process::ToolFailure;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// In-memory partition table.
pub struct FakePartitionTool {
    sector_size: u32,
    entries: Mutex<Vec<TableEntry>>,
    applied: Mutex<Vec<PartitionLayout>>,
    fail_apply: Mutex<Option<String>>,
    /// Shift applied to the read-back start of the data partition.
    skew: Mutex<u64>,
}

impl FakePartitionTool {
    pub fn new(sector_size: u32) -> Self {
        Self {
            sector_size,
            entries: Mutex::new(Vec::new()),
            applied: Mutex::new(Vec::new()),
            fail_apply: Mutex::new(None),
            skew: Mutex::new(0),
        }
    }

    /// Make the next `apply_layout` fail with `diagnostic`.
    pub fn fail_apply(&self, diagnostic: impl Into<String>) {
        *self.fail_apply.lock() = Some(diagnostic.into());
    }

    /// Report a table that differs from what was written.
    pub fn skew_readback(&self, bytes: u64) {
        *self.skew.lock() = bytes;
    }

    pub fn applied(&self) -> Vec<PartitionLayout> {
        self.applied.lock().clone()
    }
}

impl PartitionTool for FakePartitionTool {
    fn query_layout(&self, _device: &Path) -> Result<PartitionTable, ToolFailure> {
        let skew = *self.skew.lock();
        let mut entries = self.entries.lock().clone();
        if let Some(last) = entries.last_mut() {
            last.start_bytes += skew;
        }
        Ok(PartitionTable {
            sector_size: self.sector_size,
            entries,
        })
    }

    fn apply_layout(&self, _device: &Path, layout: &PartitionLayout) -> Result<(), ToolFailure> {
        if let Some(diagnostic) = self.fail_apply.lock().take() {
            return Err(ToolFailure::new("sfdisk", Some(1), diagnostic));
        }
        *self.entries.lock() = layout
            .regions
            .iter()
            .map(|r| TableEntry {
                index: r.index,
                start_bytes: r.start_bytes,
                size_bytes: r.size_bytes,
                type_guid: r.type_guid().to_string(),
            })
            .collect();
        self.applied.lock().push(layout.clone());
        Ok(())
    }
}

/// Records every format call.
#[derive(Default)]
pub struct FakeFormatTool {
    calls: Mutex<Vec<(PathBuf, Filesystem, String)>>,
}

impl FakeFormatTool {
    pub fn calls(&self) -> Vec<(PathBuf, Filesystem, String)> {
        self.calls.lock().clone()
    }
}

impl FormatTool for FakeFormatTool {
    fn format(&self, partition: &Path, filesystem: Filesystem, label: &str) -> Result<(), ToolFailure> {
        self.calls
            .lock()
            .push((partition.to_path_buf(), filesystem, label.to_string()));
        Ok(())
    }
}

/// Mount operations against plain directories. Nothing is mounted; files
/// written below the mount point stay in the scratch directory.
#[derive(Default)]
pub struct FakeMountTool {
    calls: Mutex<Vec<String>>,
}

impl FakeMountTool {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn mounted(&self) -> usize {
        let calls = self.calls.lock();
        let mounts = calls.iter().filter(|c| c.starts_with("mount ")).count();
        let unmounts = calls.iter().filter(|c| c.starts_with("umount ")).count();
        mounts.saturating_sub(unmounts)
    }
}

impl MountTool for FakeMountTool {
    fn mount(&self, source: &Path, target: &Path, filesystem: Filesystem) -> Result<(), ToolFailure> {
        self.calls.lock().push(format!(
            "mount {} {} {}",
            source.display(),
            target.display(),
            filesystem.fstype()
        ));
        Ok(())
    }

    fn unmount(&self, target: &Path) -> Result<(), ToolFailure> {
        self.calls.lock().push(format!("umount {}", target.display()));
        Ok(())
    }
}

/// Records installed targets. Writes the removable EFI loader the way
/// grub-install does so the shim step has something to rename.
#[derive(Default)]
pub struct FakeBootloaderTool {
    installed: Mutex<Vec<BootTarget>>,
    failing: Mutex<HashSet<BootTarget>>,
}

impl FakeBootloaderTool {
    pub fn fail_target(&self, target: BootTarget) {
        self.failing.lock().insert(target);
    }

    pub fn installed(&self) -> Vec<BootTarget> {
        self.installed.lock().clone()
    }
}

impl BootloaderTool for FakeBootloaderTool {
    fn install(&self, target: BootTarget, _device: &Path, efi_dir: &Path, _boot_dir: &Path) -> Result<(), ToolFailure> {
        if self.failing.lock().contains(&target) {
            return Err(ToolFailure::new("grub-install", Some(1), format!("{}: platform files missing", target)));
        }
        if target == BootTarget::Efi64 {
            let loader_dir = efi_dir.join("EFI").join("BOOT");
            std::fs::create_dir_all(&loader_dir)
                .and_then(|_| std::fs::write(loader_dir.join("BOOTX64.EFI"), b"grub"))
                .map_err(|e| ToolFailure::new("grub-install", Some(1), e.to_string()))?;
        }
        self.installed.lock().push(target);
        Ok(())
    }
}

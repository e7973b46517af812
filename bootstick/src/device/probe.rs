//! Describe a block device from sysfs and the mount table.

use super::{ExistingPartition, TargetDevice};
use bootstick_shared::errors::{BootstickError, BootstickResult};
use std::path::{Path, PathBuf};

/// sysfs reports sizes in 512-byte units regardless of the logical sector size.
const SYSFS_SECTOR: u64 = 512;

/// Probe `device` on the running system.
pub fn probe(device: &Path) -> BootstickResult<TargetDevice> {
    let mounts = std::fs::read_to_string("/proc/self/mounts")
        .map_err(|e| BootstickError::Storage(format!("Failed to read mount table: {}", e)))?;
    probe_with_roots(device, Path::new("/sys/class/block"), &mounts)
}

/// Probe `device` against an explicit sysfs block directory and mount table.
pub fn probe_with_roots(device: &Path, sys_block: &Path, mounts: &str) -> BootstickResult<TargetDevice> {
    let name = device
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| BootstickError::Validation(format!("Invalid device path {}", device.display())))?;
    let sys_dir = sys_block.join(&name);
    if !sys_dir.exists() {
        return Err(BootstickError::Validation(format!(
            "{} is not a block device (no {})",
            device.display(),
            sys_dir.display()
        )));
    }
    if sys_dir.join("partition").exists() {
        return Err(BootstickError::Validation(format!(
            "{} is a partition, select the whole device",
            device.display()
        )));
    }

    let sectors: u64 = read_number(&sys_dir.join("size"))?;
    let logical_sector_size: u32 = read_number(&sys_dir.join("queue/logical_block_size")).unwrap_or(512);
    let removable = read_number::<u8>(&sys_dir.join("removable")).unwrap_or(0) == 1;
    let model = std::fs::read_to_string(sys_dir.join("device/model"))
        .ok()
        .map(|m| m.trim().to_string())
        .filter(|m| !m.is_empty());

    let device_dir = device.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("/dev"));
    let mut partitions = Vec::new();
    let entries = std::fs::read_dir(&sys_dir)
        .map_err(|e| BootstickError::Storage(format!("Failed to read {}: {}", sys_dir.display(), e)))?;
    for entry in entries.flatten() {
        let child = entry.file_name().to_string_lossy().into_owned();
        if child.starts_with(&name) && entry.path().join("partition").exists() {
            let path = device_dir.join(&child);
            let mountpoint = mountpoint_of(&path, mounts);
            partitions.push(ExistingPartition { path, mountpoint });
        }
    }
    partitions.sort_by(|a, b| a.path.cmp(&b.path));

    let target = TargetDevice {
        path: device.to_path_buf(),
        size_bytes: sectors * SYSFS_SECTOR,
        logical_sector_size,
        partitions,
        removable,
        model,
    };
    tracing::debug!(
        device = %target.path.display(),
        size_bytes = target.size_bytes,
        sector_size = target.logical_sector_size,
        partitions = target.partitions.len(),
        "Probed device"
    );
    Ok(target)
}

fn read_number<T: std::str::FromStr>(path: &Path) -> BootstickResult<T> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| BootstickError::Storage(format!("Failed to read {}: {}", path.display(), e)))?;
    raw.trim()
        .parse()
        .map_err(|_| BootstickError::Storage(format!("Unexpected content in {}: {:?}", path.display(), raw.trim())))
}

/// First mount point of `source` in a `/proc/self/mounts` style table.
fn mountpoint_of(source: &Path, mounts: &str) -> Option<PathBuf> {
    mounts.lines().find_map(|line| {
        let mut fields = line.split_whitespace();
        let dev = fields.next()?;
        let target = fields.next()?;
        (Path::new(dev) == source).then(|| PathBuf::from(unescape_mount_field(target)))
    })
}

/// The kernel escapes spaces and tabs in mount paths as octal.
fn unescape_mount_field(field: &str) -> String {
    field
        .replace("\\040", " ")
        .replace("\\011", "\t")
        .replace("\\134", "\\")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fake_sysfs(root: &Path) {
        let sdb = root.join("sdb");
        std::fs::create_dir_all(sdb.join("queue")).unwrap();
        std::fs::create_dir_all(sdb.join("sdb1")).unwrap();
        std::fs::create_dir_all(sdb.join("device")).unwrap();
        std::fs::write(sdb.join("size"), "31250000\n").unwrap();
        std::fs::write(sdb.join("queue/logical_block_size"), "512\n").unwrap();
        std::fs::write(sdb.join("removable"), "1\n").unwrap();
        std::fs::write(sdb.join("device/model"), "Cruzer Blade    \n").unwrap();
        std::fs::write(sdb.join("sdb1/partition"), "1\n").unwrap();
    }

    #[test]
    fn test_probe_reads_geometry_and_mounts() {
        let temp_dir = TempDir::new().unwrap();
        fake_sysfs(temp_dir.path());
        let mounts = "/dev/sda2 / ext4 rw 0 0\n/dev/sdb1 /media/user/MY\\040STICK vfat rw 0 0\n";

        let device = probe_with_roots(Path::new("/dev/sdb"), temp_dir.path(), mounts).unwrap();

        assert_eq!(device.size_bytes, 31_250_000 * 512);
        assert_eq!(device.logical_sector_size, 512);
        assert!(device.removable);
        assert_eq!(device.model.as_deref(), Some("Cruzer Blade"));
        assert_eq!(device.partitions.len(), 1);
        assert_eq!(
            device.partitions[0].mountpoint,
            Some(PathBuf::from("/media/user/MY STICK"))
        );
        assert!(device.validate().is_ok());
    }

    #[test]
    fn test_probe_rejects_missing_device() {
        let temp_dir = TempDir::new().unwrap();
        let err = probe_with_roots(Path::new("/dev/sdz"), temp_dir.path(), "").unwrap_err();
        assert!(matches!(err, BootstickError::Validation(_)));
    }

    #[test]
    fn test_probe_rejects_partition_node() {
        let temp_dir = TempDir::new().unwrap();
        let part = temp_dir.path().join("sdc1");
        std::fs::create_dir_all(&part).unwrap();
        std::fs::write(part.join("partition"), "1\n").unwrap();

        let err = probe_with_roots(Path::new("/dev/sdc1"), temp_dir.path(), "").unwrap_err();
        assert!(err.to_string().contains("whole device"));
    }
}

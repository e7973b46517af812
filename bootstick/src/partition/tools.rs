//! Partition table and file system tools.
//!
//! The planner talks to these through traits so tests can substitute
//! scripted fakes. Production implementations shell out to util-linux and
//! the mkfs family.

use super::layout::{Filesystem, PartitionLayout};
use crate::util::{self, process::ToolFailure};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Partition table as read back from a device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionTable {
    pub sector_size: u32,
    pub entries: Vec<TableEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableEntry {
    /// 1-based index
    pub index: u32,
    pub start_bytes: u64,
    pub size_bytes: u64,
    pub type_guid: String,
}

/// Partition table mutation tool.
pub trait PartitionTool: Send + Sync {
    /// Read the current table. A device without a table yields an empty one.
    fn query_layout(&self, device: &Path) -> Result<PartitionTable, ToolFailure>;

    /// Replace the device's table with `layout` in a single write.
    fn apply_layout(&self, device: &Path, layout: &PartitionLayout) -> Result<(), ToolFailure>;
}

/// File system creation tool.
pub trait FormatTool: Send + Sync {
    fn format(&self, partition: &Path, filesystem: Filesystem, label: &str) -> Result<(), ToolFailure>;
}

// ============================================================================
// sfdisk
// ============================================================================

/// [`PartitionTool`] backed by `sfdisk`.
///
/// The whole table is submitted as one script, so a rejected script leaves
/// the existing table untouched.
pub struct SfdiskTool {
    sfdisk: PathBuf,
}

impl SfdiskTool {
    pub fn new() -> bootstick_shared::BootstickResult<Self> {
        Ok(Self {
            sfdisk: util::find_binary(&["sfdisk"])?,
        })
    }

    /// sfdisk input script for `layout`.
    pub fn script(layout: &PartitionLayout) -> String {
        let mut script = String::from("label: gpt\n");
        script.push_str(&format!("sector-size: {}\n\n", layout.sector_size));
        for region in &layout.regions {
            script.push_str(&format!(
                "start={}, size={}, type={}, name=\"{}\"\n",
                region.start_sector(layout.sector_size),
                region.size_sectors(layout.sector_size),
                region.type_guid(),
                region.name()
            ));
        }
        script
    }
}

#[derive(Deserialize)]
struct SfdiskDump {
    partitiontable: SfdiskTable,
}

#[derive(Deserialize)]
struct SfdiskTable {
    #[serde(default)]
    sectorsize: Option<u32>,
    #[serde(default)]
    partitions: Vec<SfdiskPartition>,
}

#[derive(Deserialize)]
struct SfdiskPartition {
    node: String,
    start: u64,
    size: u64,
    #[serde(rename = "type")]
    type_guid: String,
}

/// Parse `sfdisk --json` output.
pub(crate) fn parse_sfdisk_json(json: &str, fallback_sector_size: u32) -> Result<PartitionTable, String> {
    let dump: SfdiskDump = serde_json::from_str(json).map_err(|e| format!("unparsable sfdisk output: {}", e))?;
    let sector_size = dump.partitiontable.sectorsize.unwrap_or(fallback_sector_size);
    let unit = u64::from(sector_size);

    let mut entries = Vec::with_capacity(dump.partitiontable.partitions.len());
    for part in dump.partitiontable.partitions {
        let digits: String = part
            .node
            .chars()
            .rev()
            .take_while(|c| c.is_ascii_digit())
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        let index = digits
            .parse()
            .map_err(|_| format!("cannot derive partition index from {}", part.node))?;
        entries.push(TableEntry {
            index,
            start_bytes: part.start * unit,
            size_bytes: part.size * unit,
            type_guid: part.type_guid,
        });
    }
    entries.sort_by_key(|e| e.index);
    Ok(PartitionTable { sector_size, entries })
}

impl PartitionTool for SfdiskTool {
    fn query_layout(&self, device: &Path) -> Result<PartitionTable, ToolFailure> {
        let device_str = device.to_string_lossy();
        let fallback_sector_size = util::find_binary(&["blockdev"])
            .ok()
            .and_then(|b| util::process::run_tool(&b, &["--getss", &device_str], None).ok())
            .and_then(|out| out.trim().parse().ok())
            .unwrap_or(512);

        match util::process::run_tool(&self.sfdisk, &["--json", &device_str], None) {
            Ok(json) => parse_sfdisk_json(&json, fallback_sector_size)
                .map_err(|msg| ToolFailure::new("sfdisk", Some(0), msg)),
            Err(failure) if failure.diagnostic.contains("does not contain a recognized partition table") => {
                Ok(PartitionTable {
                    sector_size: fallback_sector_size,
                    entries: Vec::new(),
                })
            }
            Err(failure) => Err(failure),
        }
    }

    fn apply_layout(&self, device: &Path, layout: &PartitionLayout) -> Result<(), ToolFailure> {
        let script = Self::script(layout);
        let device_str = device.to_string_lossy();
        tracing::debug!(device = %device.display(), script = %script, "Writing partition table");
        util::process::run_tool(
            &self.sfdisk,
            &["--wipe", "always", "--wipe-partitions", "always", "--no-reread", &device_str],
            Some(&script),
        )?;

        // Kernel table reload; sfdisk above skipped it to keep the write atomic.
        if let Ok(partx) = util::find_binary(&["partx"]) {
            let _ = util::process::run_tool(&partx, &["-u", &device_str], None);
        }
        if let Ok(udevadm) = util::find_binary(&["udevadm"]) {
            let _ = util::process::run_tool(&udevadm, &["settle"], None);
        }
        Ok(())
    }
}

// ============================================================================
// mkfs
// ============================================================================

/// [`FormatTool`] backed by `mkfs.vfat` and `mkfs.ext4`.
#[derive(Default)]
pub struct MkfsTool;

impl MkfsTool {
    fn command(filesystem: Filesystem, partition: &str, label: &str) -> (&'static [&'static str], Vec<String>) {
        match filesystem {
            Filesystem::Fat32 => (
                &["mkfs.vfat", "mkfs.fat"],
                vec!["-F".into(), "32".into(), "-n".into(), label.into(), partition.into()],
            ),
            // -m 0: no reserved blocks, the data partition is not a root fs
            Filesystem::Ext4 => (
                &["mkfs.ext4"],
                vec!["-F".into(), "-m".into(), "0".into(), "-L".into(), label.into(), partition.into()],
            ),
        }
    }
}

impl FormatTool for MkfsTool {
    fn format(&self, partition: &Path, filesystem: Filesystem, label: &str) -> Result<(), ToolFailure> {
        let partition_str = partition.to_string_lossy();
        let (names, args) = Self::command(filesystem, &partition_str, label);
        let binary = util::find_binary(names).map_err(|e| ToolFailure::new(names[0], None, e.to_string()))?;
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        util::process::run_tool(&binary, &args, None)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::PartitionOptions;

    #[test]
    fn test_sfdisk_script() {
        let layout = PartitionLayout::compute(8 << 30, 512, 0, &PartitionOptions::default()).unwrap();
        let script = SfdiskTool::script(&layout);
        let lines: Vec<&str> = script.lines().collect();

        assert_eq!(lines[0], "label: gpt");
        assert_eq!(lines[1], "sector-size: 512");
        assert_eq!(
            lines[3],
            "start=2048, size=2048, type=21686148-6449-6E6F-744E-656564454649, name=\"BIOS\""
        );
        assert!(lines[4].starts_with("start=4096, size=2093056, type=C12A7328"));
        assert!(lines[5].starts_with("start=2097152, "));
    }

    #[test]
    fn test_parse_sfdisk_json() {
        let json = r#"{
            "partitiontable": {
                "label": "gpt",
                "device": "/dev/nvme0n1",
                "unit": "sectors",
                "sectorsize": 4096,
                "partitions": [
                    {"node": "/dev/nvme0n1p2", "start": 512, "size": 261632, "type": "C12A7328-F81F-11D2-BA4B-00A0C93EC93B"},
                    {"node": "/dev/nvme0n1p1", "start": 256, "size": 256, "type": "21686148-6449-6E6F-744E-656564454649"}
                ]
            }
        }"#;
        let table = parse_sfdisk_json(json, 512).unwrap();
        assert_eq!(table.sector_size, 4096);
        assert_eq!(table.entries[0].index, 1);
        assert_eq!(table.entries[0].start_bytes, 1 << 20);
        assert_eq!(table.entries[1].size_bytes, 261_632 * 4096);
    }

    #[test]
    fn test_parse_sfdisk_json_rejects_garbage() {
        assert!(parse_sfdisk_json("not json", 512).is_err());
    }

    #[test]
    fn test_mkfs_arguments() {
        let (names, args) = MkfsTool::command(Filesystem::Fat32, "/dev/sdb2", "BSEFI");
        assert_eq!(names[0], "mkfs.vfat");
        assert_eq!(args, vec!["-F", "32", "-n", "BSEFI", "/dev/sdb2"]);

        let (names, args) = MkfsTool::command(Filesystem::Ext4, "/dev/sdb3", "BOOTSTICK");
        assert_eq!(names.to_vec(), vec!["mkfs.ext4"]);
        assert_eq!(args.last().map(String::as_str), Some("/dev/sdb3"));
    }
}

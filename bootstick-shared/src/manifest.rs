//! Manifest record: what is installed on a provisioned device.
//!
//! Written by the provisioning core at the end of every successful run and
//! read back by append runs and front ends. The record is passed by value
//! between runs; there is no process-wide copy.

use crate::constants::manifest::FORMAT_VERSION;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Distribution lineage of an installer image, used to pick boot paths.
///
/// Unknown tags deserialize to [`Family::Generic`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Family {
    Debian,
    Redhat,
    Arch,
    Suse,
    Generic,
}

impl Family {
    /// Resolve a free-form family or distribution tag.
    pub fn from_tag(tag: &str) -> Self {
        match tag.trim().to_ascii_lowercase().as_str() {
            "debian" | "ubuntu" | "mint" | "linuxmint" | "pop" | "popos" | "kali" | "elementary"
            | "zorin" => Family::Debian,
            "redhat" | "rhel" | "fedora" | "centos" | "rocky" | "alma" | "almalinux" => {
                Family::Redhat
            }
            "arch" | "archlinux" | "manjaro" | "endeavouros" | "cachyos" => Family::Arch,
            "suse" | "opensuse" | "sles" | "tumbleweed" => Family::Suse,
            _ => Family::Generic,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Family::Debian => "debian",
            Family::Redhat => "redhat",
            Family::Arch => "arch",
            Family::Suse => "suse",
            Family::Generic => "generic",
        }
    }
}

impl From<String> for Family {
    fn from(tag: String) -> Self {
        Family::from_tag(&tag)
    }
}

impl From<Family> for String {
    fn from(family: Family) -> Self {
        family.as_str().to_string()
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an entry's image came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum EntryOrigin {
    Catalog {
        id: String,
        version: String,
        source_url: String,
        sha256: String,
    },
    Custom {
        source_path: String,
    },
}

/// A resolved boot menu entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootEntry {
    /// Display name shown in the boot menu
    pub name: String,

    /// Menu accelerator key
    #[serde(default)]
    pub hotkey: Option<char>,

    /// Absolute path on the data partition, e.g. `/isos/ubuntu/ubuntu.iso`
    pub image_path: String,

    pub family: Family,

    pub size_bytes: u64,

    /// Offer a RAM-resident boot variant
    #[serde(default)]
    pub ram_boot: bool,

    /// Persistence overlay file on the data partition, when the entry
    /// boots with persistent storage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistence: Option<String>,

    pub origin: EntryOrigin,
}

/// Partition layout facts the boot script and append runs depend on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutRecord {
    pub data_label: String,
    pub system_boot_label: String,
    /// 1-based GPT index of the data partition
    pub data_partition_index: u32,
    pub system_boot_size_bytes: u64,
    pub data_start_bytes: u64,
    pub data_size_bytes: u64,
    pub sector_size: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub format_version: u32,
    pub tool_version: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub layout: LayoutRecord,
    /// Device was provisioned with a signed restricted-boot chain
    #[serde(default)]
    pub restricted_boot: bool,
    #[serde(default)]
    pub entries: Vec<BootEntry>,
}

impl Manifest {
    pub fn new(layout: LayoutRecord, restricted_boot: bool, tool_version: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            format_version: FORMAT_VERSION,
            tool_version: tool_version.into(),
            created_at: now,
            updated_at: now,
            layout,
            restricted_boot,
            entries: Vec::new(),
        }
    }

    pub fn contains_path(&self, image_path: &str) -> bool {
        self.entries.iter().any(|e| e.image_path == image_path)
    }

    /// Accelerators already claimed by existing entries.
    pub fn used_hotkeys(&self) -> Vec<char> {
        self.entries.iter().filter_map(|e| e.hotkey).collect()
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

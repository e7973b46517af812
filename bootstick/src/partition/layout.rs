use super::{BIOS_BOOT_INDEX, DATA_INDEX, SYSTEM_BOOT_INDEX, gpt_types};
use crate::options::PartitionOptions;
use bootstick_shared::constants::units::{GIB, MIB};
use bootstick_shared::errors::{BootstickError, BootstickResult};
use bootstick_shared::manifest::LayoutRecord;
use serde::{Deserialize, Serialize};

use super::tools::PartitionTable;

/// BIOS boot region start and size.
const BIOS_BOOT_START: u64 = MIB;
const BIOS_BOOT_SIZE: u64 = MIB;

/// Data never starts before this offset.
const DATA_MIN_START: u64 = GIB;

/// Room left at the end of the device for the backup GPT.
const GPT_BACKUP_RESERVE: u64 = MIB;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegionKind {
    BiosBoot,
    SystemBoot,
    Data,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Filesystem {
    Fat32,
    Ext4,
}

impl Filesystem {
    /// Kernel file system type name
    pub fn fstype(&self) -> &'static str {
        match self {
            Filesystem::Fat32 => "vfat",
            Filesystem::Ext4 => "ext4",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub kind: RegionKind,
    /// 1-based GPT index
    pub index: u32,
    pub start_bytes: u64,
    pub size_bytes: u64,
}

impl Region {
    pub fn end_bytes(&self) -> u64 {
        self.start_bytes + self.size_bytes
    }

    pub fn start_sector(&self, sector_size: u32) -> u64 {
        self.start_bytes / u64::from(sector_size)
    }

    pub fn size_sectors(&self, sector_size: u32) -> u64 {
        self.size_bytes / u64::from(sector_size)
    }

    pub fn type_guid(&self) -> &'static str {
        match self.kind {
            RegionKind::BiosBoot => gpt_types::BIOS_BOOT,
            RegionKind::SystemBoot => gpt_types::EFI_SYSTEM,
            RegionKind::Data => gpt_types::LINUX_FS,
        }
    }

    pub fn filesystem(&self) -> Option<Filesystem> {
        match self.kind {
            RegionKind::BiosBoot => None,
            RegionKind::SystemBoot => Some(Filesystem::Fat32),
            RegionKind::Data => Some(Filesystem::Ext4),
        }
    }

    /// GPT partition name
    pub fn name(&self) -> &'static str {
        match self.kind {
            RegionKind::BiosBoot => "BIOS",
            RegionKind::SystemBoot => "EFI",
            RegionKind::Data => "DATA",
        }
    }
}

/// Ordered BiosBoot, SystemBoot, Data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionLayout {
    pub sector_size: u32,
    pub regions: [Region; 3],
    pub system_boot_label: String,
    pub data_label: String,
}

impl PartitionLayout {
    /// Compute the layout for a device of `device_size` bytes that must hold
    /// `required_image_bytes` of images.
    pub fn compute(
        device_size: u64,
        sector_size: u32,
        required_image_bytes: u64,
        options: &PartitionOptions,
    ) -> BootstickResult<Self> {
        let system_boot_start = BIOS_BOOT_START + BIOS_BOOT_SIZE;
        let min_system_boot_end = system_boot_start + options.system_boot_mib * MIB;
        let data_start = align_up(min_system_boot_end.max(DATA_MIN_START), MIB);

        let usable_end = align_down(device_size.saturating_sub(GPT_BACKUP_RESERVE), MIB);
        let required_data = required_image_bytes + options.overhead_margin_mib * MIB;

        if usable_end <= data_start || usable_end - data_start < required_data {
            let needed = data_start + align_up(required_data, MIB) + GPT_BACKUP_RESERVE;
            return Err(BootstickError::Validation(format!(
                "device too small: {} MiB available, {} MiB needed for the selected images",
                device_size / MIB,
                needed.div_ceil(MIB)
            )));
        }

        let layout = Self {
            sector_size,
            regions: [
                Region {
                    kind: RegionKind::BiosBoot,
                    index: BIOS_BOOT_INDEX,
                    start_bytes: BIOS_BOOT_START,
                    size_bytes: BIOS_BOOT_SIZE,
                },
                Region {
                    kind: RegionKind::SystemBoot,
                    index: SYSTEM_BOOT_INDEX,
                    start_bytes: system_boot_start,
                    size_bytes: data_start - system_boot_start,
                },
                Region {
                    kind: RegionKind::Data,
                    index: DATA_INDEX,
                    start_bytes: data_start,
                    size_bytes: usable_end - data_start,
                },
            ],
            system_boot_label: options.system_boot_label.clone(),
            data_label: options.data_label.clone(),
        };
        layout.check_invariants().map_err(BootstickError::Internal)?;
        Ok(layout)
    }

    pub fn region(&self, kind: RegionKind) -> &Region {
        match kind {
            RegionKind::BiosBoot => &self.regions[0],
            RegionKind::SystemBoot => &self.regions[1],
            RegionKind::Data => &self.regions[2],
        }
    }

    pub fn system_boot(&self) -> &Region {
        self.region(RegionKind::SystemBoot)
    }

    pub fn data(&self) -> &Region {
        self.region(RegionKind::Data)
    }

    /// Alignment, ordering and contiguity.
    pub fn check_invariants(&self) -> Result<(), String> {
        let kinds = [RegionKind::BiosBoot, RegionKind::SystemBoot, RegionKind::Data];
        for (i, (region, kind)) in self.regions.iter().zip(kinds).enumerate() {
            if region.kind != kind || region.index != i as u32 + 1 {
                return Err(format!("region {} is {:?}, expected {:?}", i + 1, region.kind, kind));
            }
            if region.start_bytes % MIB != 0 || region.size_bytes % MIB != 0 {
                return Err(format!("{:?} is not aligned to 1 MiB", region.kind));
            }
            if region.size_bytes % u64::from(self.sector_size) != 0 {
                return Err(format!("{:?} is not a whole number of sectors", region.kind));
            }
        }
        for pair in self.regions.windows(2) {
            if pair[0].end_bytes() != pair[1].start_bytes {
                return Err(format!(
                    "{:?} ends at {} but {:?} starts at {}",
                    pair[0].kind,
                    pair[0].end_bytes(),
                    pair[1].kind,
                    pair[1].start_bytes
                ));
            }
        }
        if self.regions[0].size_bytes < MIB {
            return Err("BIOS boot region is smaller than 1 MiB".into());
        }
        if self.data().start_bytes < DATA_MIN_START {
            return Err("data region starts before 1 GiB".into());
        }
        Ok(())
    }

    /// Compare a table read back from the device with this layout.
    pub fn matches(&self, table: &PartitionTable) -> Result<(), String> {
        if table.entries.len() != self.regions.len() {
            return Err(format!(
                "expected {} partitions, found {}",
                self.regions.len(),
                table.entries.len()
            ));
        }
        for region in &self.regions {
            let entry = table
                .entries
                .iter()
                .find(|e| e.index == region.index)
                .ok_or_else(|| format!("partition {} missing", region.index))?;
            if entry.start_bytes != region.start_bytes || entry.size_bytes != region.size_bytes {
                return Err(format!(
                    "partition {} is at {}+{}, expected {}+{}",
                    region.index,
                    entry.start_bytes,
                    entry.size_bytes,
                    region.start_bytes,
                    region.size_bytes
                ));
            }
            if !entry.type_guid.eq_ignore_ascii_case(region.type_guid()) {
                return Err(format!(
                    "partition {} has type {}, expected {}",
                    region.index,
                    entry.type_guid,
                    region.type_guid()
                ));
            }
        }
        Ok(())
    }

    pub fn record(&self) -> LayoutRecord {
        LayoutRecord {
            data_label: self.data_label.clone(),
            system_boot_label: self.system_boot_label.clone(),
            data_partition_index: self.data().index,
            system_boot_size_bytes: self.system_boot().size_bytes,
            data_start_bytes: self.data().start_bytes,
            data_size_bytes: self.data().size_bytes,
            sector_size: self.sector_size,
        }
    }
}

fn align_up(value: u64, align: u64) -> u64 {
    value.div_ceil(align) * align
}

fn align_down(value: u64, align: u64) -> u64 {
    value / align * align
}

//! Partition planning and application.
//!
//! ```text
//!  0      1MiB   2MiB                      >= 1GiB                 end-1MiB
//!  |  GPT  | BIOS |       SystemBoot        |          Data          | GPT |
//!  |       | boot |  FAT32, EFI binaries    |  ext4, images, grub.cfg| bak |
//! ```
//!
//! Every boundary is a whole MiB, which is a multiple of both 512 and 4096
//! byte sectors. The data partition never starts before 1 GiB; SystemBoot
//! grows to fill the gap so the three regions stay contiguous.

mod layout;
mod planner;
mod tools;

pub use layout::{Filesystem, PartitionLayout, Region, RegionKind};
pub use planner::PartitionPlanner;
pub use tools::{FormatTool, MkfsTool, PartitionTable, PartitionTool, SfdiskTool, TableEntry};

/// 1-based GPT indices of the three regions.
pub const BIOS_BOOT_INDEX: u32 = 1;
pub const SYSTEM_BOOT_INDEX: u32 = 2;
pub const DATA_INDEX: u32 = 3;

/// Smallest SystemBoot partition accepted (FAT32 needs ~33 MiB).
pub const MIN_SYSTEM_BOOT_MIB: u64 = 64;

/// GPT partition type GUIDs
pub mod gpt_types {
    pub const BIOS_BOOT: &str = "21686148-6449-6E6F-744E-656564454649";
    pub const EFI_SYSTEM: &str = "C12A7328-F81F-11D2-BA4B-00A0C93EC93B";
    pub const LINUX_FS: &str = "0FC63DAF-8483-4772-8E47-3D69D8477DE4";
}

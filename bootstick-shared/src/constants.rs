//! Shared constants
//!
//! On-device names must stay stable across releases: append runs and the
//! generated boot script both rely on them.

/// Size units
pub mod units {
    pub const KIB: u64 = 1024;
    pub const MIB: u64 = 1024 * KIB;
    pub const GIB: u64 = 1024 * MIB;
}

/// File system labels
pub mod labels {
    /// Data partition label, searched for by the boot script
    pub const DATA: &str = "BOOTSTICK";

    /// FAT32 system boot partition label (11 chars max)
    pub const SYSTEM_BOOT: &str = "BSEFI";
}

/// Paths relative to the data partition root
pub mod data_paths {
    /// Directory holding the manifest
    pub const STATE_DIR: &str = ".bootstick";

    pub const MANIFEST_FILE: &str = "manifest.json";

    /// Installer images live under `/isos/<id>/`
    pub const IMAGES_DIR: &str = "isos";

    /// Subdirectory of [`IMAGES_DIR`] for user-supplied images
    pub const CUSTOM_DIR: &str = "custom";

    /// Bootloader boot directory (`--boot-directory`)
    pub const BOOT_DIR: &str = "boot";

    pub const GRUB_DIR: &str = "boot/grub";

    pub const GRUB_CONFIG: &str = "boot/grub/grub.cfg";

    pub const FONT: &str = "boot/grub/fonts/unicode.pf2";

    /// RAM-boot helper loaded by `linux16`
    pub const MEMDISK: &str = "boot/memdisk";

    /// Persistence overlay files live under `/persistence/<image>/`
    pub const PERSISTENCE_DIR: &str = "persistence";

    /// Menu theme, loaded when present
    pub const THEME_DIR: &str = "boot/grub/themes/bootstick";

    pub const THEME_FILE: &str = "boot/grub/themes/bootstick/theme.txt";
}

/// Download bookkeeping
pub mod download {
    /// Appended to the destination file name for the in-flight partial file
    pub const PARTIAL_SUFFIX: &str = ".part";

    /// Appended to the destination file name for the resume sidecar
    pub const RESUME_SUFFIX: &str = ".resume";
}

/// Manifest record
pub mod manifest {
    pub const FORMAT_VERSION: u32 = 1;
}

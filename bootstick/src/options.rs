//! Configuration for provisioning runs.
//!
//! Every field has a serde default so partial config files work; the
//! `Default` impls agree with the serde defaults.

use bootstick_shared::constants::{labels, units::MIB};
use bootstick_shared::errors::{BootstickError, BootstickResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

// ============================================================================
// Top-Level Options
// ============================================================================

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ProvisionOptions {
    #[serde(default)]
    pub partition: PartitionOptions,

    #[serde(default)]
    pub download: DownloadOptions,

    #[serde(default)]
    pub mirrors: MirrorOptions,

    #[serde(default)]
    pub boot_menu: BootMenuOptions,

    #[serde(default)]
    pub bootloader: BootloaderOptions,
}

impl ProvisionOptions {
    /// Reject values that cannot produce a working device.
    pub fn validate(&self) -> BootstickResult<()> {
        if self.partition.system_boot_mib < crate::partition::MIN_SYSTEM_BOOT_MIB {
            return Err(BootstickError::Config(format!(
                "system_boot_mib must be at least {} (got {})",
                crate::partition::MIN_SYSTEM_BOOT_MIB,
                self.partition.system_boot_mib
            )));
        }
        if self.partition.data_label.is_empty()
            || !self
                .partition
                .data_label
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(BootstickError::Config(format!(
                "data_label must be non-empty [A-Za-z0-9_-] (got {:?})",
                self.partition.data_label
            )));
        }
        if self.partition.system_boot_label.is_empty() || self.partition.system_boot_label.len() > 11 {
            return Err(BootstickError::Config(
                "system_boot_label must be 1 to 11 characters (FAT limit)".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.mirrors.min_success_rate) {
            return Err(BootstickError::Config(format!(
                "min_success_rate must be within 0.0..=1.0 (got {})",
                self.mirrors.min_success_rate
            )));
        }
        if self.download.checkpoint_interval_bytes == 0 {
            return Err(BootstickError::Config(
                "checkpoint_interval_bytes must be positive".into(),
            ));
        }
        if self.download.attempts_per_mirror == 0 {
            return Err(BootstickError::Config(
                "attempts_per_mirror must be at least 1".into(),
            ));
        }
        if let Some(dir) = &self.bootloader.theme_dir
            && !dir.join("theme.txt").is_file()
        {
            return Err(BootstickError::Config(format!(
                "theme_dir {} has no theme.txt",
                dir.display()
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Partition Options
// ============================================================================

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PartitionOptions {
    /// FAT32 system boot partition size in MiB.
    ///
    /// Default: 512
    #[serde(default = "default_system_boot_mib")]
    pub system_boot_mib: u64,

    /// Data partition label, searched for by the boot script.
    #[serde(default = "default_data_label")]
    pub data_label: String,

    #[serde(default = "default_system_boot_label")]
    pub system_boot_label: String,

    /// Space reserved on the data partition beyond the image sizes
    /// (file system metadata, journal, boot files).
    ///
    /// Default: 256
    #[serde(default = "default_overhead_margin_mib")]
    pub overhead_margin_mib: u64,
}

fn default_system_boot_mib() -> u64 {
    512
}

fn default_data_label() -> String {
    labels::DATA.to_string()
}

fn default_system_boot_label() -> String {
    labels::SYSTEM_BOOT.to_string()
}

fn default_overhead_margin_mib() -> u64 {
    256
}

impl Default for PartitionOptions {
    fn default() -> Self {
        Self {
            system_boot_mib: default_system_boot_mib(),
            data_label: default_data_label(),
            system_boot_label: default_system_boot_label(),
            overhead_margin_mib: default_overhead_margin_mib(),
        }
    }
}

// ============================================================================
// Download Options
// ============================================================================

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadOptions {
    /// Bytes written between resume sidecar checkpoints.
    ///
    /// Default: 8 MiB
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval_bytes: u64,

    /// Abort a transfer that delivers no data for this long.
    #[serde(default = "default_stall_timeout_secs")]
    pub stall_timeout_secs: u64,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Attempts per source before failing over to the next mirror.
    ///
    /// Default: 2
    #[serde(default = "default_attempts_per_mirror")]
    pub attempts_per_mirror: u32,

    /// Minimum interval between progress reports.
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,

    /// Remove the partial file on cancellation instead of keeping it
    /// resumable.
    ///
    /// Default: false
    #[serde(default)]
    pub discard_partial_on_cancel: bool,
}

fn default_checkpoint_interval() -> u64 {
    8 * MIB
}

fn default_stall_timeout_secs() -> u64 {
    30
}

fn default_connect_timeout_secs() -> u64 {
    15
}

fn default_attempts_per_mirror() -> u32 {
    2
}

fn default_progress_interval_ms() -> u64 {
    500
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            checkpoint_interval_bytes: default_checkpoint_interval(),
            stall_timeout_secs: default_stall_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            attempts_per_mirror: default_attempts_per_mirror(),
            progress_interval_ms: default_progress_interval_ms(),
            discard_partial_on_cancel: false,
        }
    }
}

impl DownloadOptions {
    pub fn stall_timeout(&self) -> Duration {
        Duration::from_secs(self.stall_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }
}

// ============================================================================
// Mirror Options
// ============================================================================

/// Mirror ranking knobs. These are tuning parameters, not contracts.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MirrorOptions {
    /// Probe and rank mirrors before downloading.
    ///
    /// When false, sources are tried in the order given.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Hard timeout per mirror probe.
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,

    /// Mirrors whose recorded success rate is below this are tried last.
    ///
    /// Default: 0.5
    #[serde(default = "default_min_success_rate")]
    pub min_success_rate: f64,

    /// Where mirror statistics persist. `None` uses
    /// `<cache_dir>/bootstick/mirror_stats.json`.
    #[serde(default)]
    pub stats_path: Option<PathBuf>,

    /// Statistics not updated for this many days are dropped.
    #[serde(default = "default_stats_max_age_days")]
    pub stats_max_age_days: i64,
}

fn default_true() -> bool {
    true
}

fn default_probe_timeout_secs() -> u64 {
    10
}

fn default_min_success_rate() -> f64 {
    0.5
}

fn default_stats_max_age_days() -> i64 {
    30
}

impl Default for MirrorOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            probe_timeout_secs: default_probe_timeout_secs(),
            min_success_rate: default_min_success_rate(),
            stats_path: None,
            stats_max_age_days: default_stats_max_age_days(),
        }
    }
}

impl MirrorOptions {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn resolved_stats_path(&self) -> Option<PathBuf> {
        self.stats_path.clone().or_else(|| {
            dirs::cache_dir().map(|dir| dir.join("bootstick").join("mirror_stats.json"))
        })
    }
}

// ============================================================================
// Boot Menu Options
// ============================================================================

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BootMenuOptions {
    /// Seconds before the default entry boots.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u32,

    /// Images at or below this size also get a RAM-boot entry.
    ///
    /// Default: 128
    #[serde(default = "default_ram_boot_threshold_mib")]
    pub ram_boot_threshold_mib: u64,

    /// Emit a safe-graphics (nomodeset) variant for every entry.
    #[serde(default)]
    pub safe_graphics_variants: bool,

    /// Load the menu theme when the device carries one.
    #[serde(default = "default_theme")]
    pub theme: bool,
}

fn default_timeout_secs() -> u32 {
    10
}

fn default_ram_boot_threshold_mib() -> u64 {
    128
}

fn default_theme() -> bool {
    true
}

impl Default for BootMenuOptions {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            ram_boot_threshold_mib: default_ram_boot_threshold_mib(),
            safe_graphics_variants: false,
            theme: default_theme(),
        }
    }
}

impl BootMenuOptions {
    pub fn ram_boot_threshold_bytes(&self) -> u64 {
        self.ram_boot_threshold_mib * MIB
    }
}

// ============================================================================
// Bootloader Options
// ============================================================================

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BootloaderOptions {
    /// Install a signed shim chain for restricted-boot firmware.
    #[serde(default)]
    pub restricted_boot: bool,

    /// Also install the 32-bit UEFI target.
    #[serde(default)]
    pub install_efi32: bool,

    /// Custom menu theme directory, must contain `theme.txt`. The built-in
    /// theme is installed when unset.
    #[serde(default)]
    pub theme_dir: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_serde_defaults() {
        let parsed: ProvisionOptions = serde_json::from_str("{}").unwrap();
        let defaults = ProvisionOptions::default();

        assert_eq!(parsed.partition.system_boot_mib, defaults.partition.system_boot_mib);
        assert_eq!(parsed.partition.data_label, "BOOTSTICK");
        assert_eq!(parsed.download.checkpoint_interval_bytes, 8 * MIB);
        assert_eq!(parsed.download.attempts_per_mirror, 2);
        assert!(parsed.mirrors.enabled);
        assert_eq!(parsed.mirrors.min_success_rate, 0.5);
        assert_eq!(parsed.boot_menu.timeout_secs, 10);
        assert_eq!(parsed.boot_menu.ram_boot_threshold_mib, 128);
        assert!(!parsed.bootloader.restricted_boot);
        assert!(parsed.boot_menu.theme);
        assert!(parsed.bootloader.theme_dir.is_none());
        assert!(defaults.validate().is_ok());
    }

    #[test]
    fn test_partial_override() {
        let parsed: ProvisionOptions =
            serde_json::from_str(r#"{"mirrors": {"probe_timeout_secs": 3}}"#).unwrap();
        assert_eq!(parsed.mirrors.probe_timeout(), Duration::from_secs(3));
        assert_eq!(parsed.mirrors.min_success_rate, 0.5);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut options = ProvisionOptions::default();
        options.partition.system_boot_mib = 8;
        assert!(options.validate().is_err());

        let mut options = ProvisionOptions::default();
        options.partition.data_label = "has space".into();
        assert!(options.validate().is_err());

        let mut options = ProvisionOptions::default();
        options.mirrors.min_success_rate = 1.5;
        assert!(options.validate().is_err());

        let mut options = ProvisionOptions::default();
        options.download.attempts_per_mirror = 0;
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_theme_dir_needs_theme_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut options = ProvisionOptions::default();
        options.bootloader.theme_dir = Some(dir.path().to_path_buf());
        assert!(matches!(options.validate(), Err(BootstickError::Config(_))));

        std::fs::write(dir.path().join("theme.txt"), "desktop-color: \"black\"\n").unwrap();
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_stats_path_defaults_under_cache_dir() {
        let options = MirrorOptions::default();
        if let Some(cache) = dirs::cache_dir() {
            assert_eq!(
                options.resolved_stats_path(),
                Some(cache.join("bootstick").join("mirror_stats.json"))
            );
        }
        let pinned = MirrorOptions {
            stats_path: Some(PathBuf::from("/tmp/stats.json")),
            ..Default::default()
        };
        assert_eq!(pinned.resolved_stats_path(), Some(PathBuf::from("/tmp/stats.json")));
    }
}

//! Firmware bootloader installation.
//!
//! ```text
//!   x86_64-efi ──► SystemBoot/EFI/BOOT/BOOTX64.EFI     fatal on failure
//!   i386-efi   ──► SystemBoot/EFI/BOOT/BOOTIA32.EFI    optional, warning
//!   i386-pc    ──► BiosBoot region + Data/boot/grub   warning
//!                         │
//!                         └── all read Data/boot/grub/grub.cfg
//! ```
//!
//! After the images are installed the boot directory is completed with the
//! menu font, the menu theme and the memdisk helper, and optionally a shim
//! chain for restricted boot. Missing host assets degrade features, they
//! never fail the install.

mod grub;
mod theme;

pub use grub::GrubInstallTool;

use crate::options::BootloaderOptions;
use crate::util::{self, process::ToolFailure};
use bootstick_shared::constants::data_paths;
use bootstick_shared::errors::{BootstickError, BootstickResult};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Firmware target of one bootloader installation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BootTarget {
    /// Legacy BIOS, embedded in the BIOS boot partition.
    BiosPc,
    Efi64,
    Efi32,
}

impl BootTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            BootTarget::BiosPc => "i386-pc",
            BootTarget::Efi64 => "x86_64-efi",
            BootTarget::Efi32 => "i386-efi",
        }
    }

    pub fn is_efi(&self) -> bool {
        !matches!(self, BootTarget::BiosPc)
    }
}

impl std::fmt::Display for BootTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bootloader installation collaborator, one call per firmware target.
pub trait BootloaderTool: Send + Sync {
    fn install(&self, target: BootTarget, device: &Path, efi_dir: &Path, boot_dir: &Path) -> Result<(), ToolFailure>;
}

/// Host files copied onto the device, searched in order.
#[derive(Debug, Clone)]
pub struct HostAssets {
    pub fonts: Vec<PathBuf>,
    pub memdisk: Vec<PathBuf>,
    pub shim: Vec<PathBuf>,
}

impl Default for HostAssets {
    fn default() -> Self {
        Self {
            fonts: vec![
                "/usr/share/grub/unicode.pf2".into(),
                "/usr/share/grub2/unicode.pf2".into(),
                "/boot/grub/fonts/unicode.pf2".into(),
                "/boot/grub2/fonts/unicode.pf2".into(),
            ],
            memdisk: vec![
                "/usr/lib/syslinux/memdisk".into(),
                "/usr/lib/syslinux/bios/memdisk".into(),
                "/usr/share/syslinux/memdisk".into(),
            ],
            shim: vec![
                "/usr/lib/shim/shimx64.efi.signed".into(),
                "/usr/share/shim-signed/shimx64.efi".into(),
                "/boot/efi/EFI/fedora/shimx64.efi".into(),
                "/usr/lib/shim/shimx64.efi".into(),
            ],
        }
    }
}

/// Outcome of a successful installation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootloaderReport {
    pub installed: Vec<BootTarget>,
    /// Non-fatal problems, already logged.
    pub warnings: Vec<String>,
    /// A shim chain is in place for restricted boot.
    pub restricted_boot: bool,
    /// memdisk is present for RAM boot entries.
    pub ram_boot_available: bool,
    pub theme_installed: bool,
}

impl BootloaderReport {
    fn warn(&mut self, message: String) {
        tracing::warn!("{}", message);
        self.warnings.push(message);
    }
}

pub struct BootloaderInstaller {
    tool: Arc<dyn BootloaderTool>,
    options: BootloaderOptions,
    assets: HostAssets,
}

impl BootloaderInstaller {
    pub fn new(tool: Arc<dyn BootloaderTool>, options: BootloaderOptions) -> Self {
        Self {
            tool,
            options,
            assets: HostAssets::default(),
        }
    }

    pub fn with_assets(mut self, assets: HostAssets) -> Self {
        self.assets = assets;
        self
    }

    /// Install bootloaders for every firmware target. Only the 64-bit EFI
    /// installation is mandatory.
    pub fn install(&self, device: &Path, system_boot_mount: &Path, data_mount: &Path) -> BootstickResult<BootloaderReport> {
        let boot_dir = data_mount.join(data_paths::BOOT_DIR);
        std::fs::create_dir_all(&boot_dir)
            .map_err(|e| BootstickError::Storage(format!("creating {}: {}", boot_dir.display(), e)))?;

        let mut report = BootloaderReport::default();

        tracing::info!(device = %device.display(), target = %BootTarget::Efi64, "Installing bootloader");
        self.tool
            .install(BootTarget::Efi64, device, system_boot_mount, &boot_dir)
            .map_err(|e| BootstickError::Bootloader(format!("{} installation failed: {}", BootTarget::Efi64, e)))?;
        report.installed.push(BootTarget::Efi64);

        let mut optional = vec![BootTarget::BiosPc];
        if self.options.install_efi32 {
            optional.push(BootTarget::Efi32);
        }
        for target in optional {
            tracing::info!(device = %device.display(), target = %target, "Installing bootloader");
            match self.tool.install(target, device, system_boot_mount, &boot_dir) {
                Ok(()) => report.installed.push(target),
                Err(e) => report.warn(format!(
                    "{} installation failed, the device will not boot on that firmware: {}",
                    target, e
                )),
            }
        }

        self.install_font(data_mount, &mut report)?;
        match theme::install(data_mount, self.options.theme_dir.as_deref()) {
            Ok(()) => report.theme_installed = true,
            Err(reason) => report.warn(format!("menu theme not installed, using plain menu: {}", reason)),
        }
        self.install_memdisk(data_mount, &mut report)?;
        if self.options.restricted_boot {
            self.install_shim(system_boot_mount, &mut report);
        }

        tracing::info!(
            installed = ?report.installed,
            warnings = report.warnings.len(),
            restricted_boot = report.restricted_boot,
            "Bootloader installation finished"
        );
        Ok(report)
    }

    fn install_font(&self, data_mount: &Path, report: &mut BootloaderReport) -> BootstickResult<()> {
        let target = data_mount.join(data_paths::FONT);
        if target.exists() {
            return Ok(());
        }
        match util::first_existing(&self.assets.fonts) {
            Some(source) => copy_asset(&source, &target),
            None => {
                report.warn("unicode.pf2 not found on host, boot menu will use the text console".into());
                Ok(())
            }
        }
    }

    fn install_memdisk(&self, data_mount: &Path, report: &mut BootloaderReport) -> BootstickResult<()> {
        let target = data_mount.join(data_paths::MEMDISK);
        if !target.exists() {
            match util::first_existing(&self.assets.memdisk) {
                Some(source) => copy_asset(&source, &target)?,
                None => {
                    report.warn("memdisk not found on host, RAM boot entries will report it missing".into());
                    return Ok(());
                }
            }
        }
        report.ram_boot_available = true;
        Ok(())
    }

    /// Put shim in front of the removable-path loader: shim becomes
    /// `BOOTX64.EFI` and chainloads the installed loader as `grubx64.efi`.
    fn install_shim(&self, system_boot_mount: &Path, report: &mut BootloaderReport) {
        let Some(shim) = util::first_existing(&self.assets.shim) else {
            report.warn("restricted boot requested but no signed shim found on host".into());
            return;
        };
        let efi_boot = system_boot_mount.join("EFI").join("BOOT");
        let loader = efi_boot.join("BOOTX64.EFI");
        let chained = efi_boot.join("grubx64.efi");

        let result = std::fs::rename(&loader, &chained).and_then(|_| std::fs::copy(&shim, &loader).map(|_| ()));
        match result {
            Ok(()) => {
                tracing::info!(shim = %shim.display(), "Installed shim for restricted boot");
                report.restricted_boot = true;
            }
            Err(e) => report.warn(format!("failed to install shim from {}: {}", shim.display(), e)),
        }
    }
}

fn copy_asset(source: &Path, target: &Path) -> BootstickResult<()> {
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| BootstickError::Storage(format!("creating {}: {}", parent.display(), e)))?;
    }
    std::fs::copy(source, target).map_err(|e| {
        BootstickError::Storage(format!("copying {} to {}: {}", source.display(), target.display(), e))
    })?;
    tracing::debug!(source = %source.display(), target = %target.display(), "Copied boot asset");
    Ok(())
}

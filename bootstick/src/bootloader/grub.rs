//! `grub-install` backed bootloader tool.

use super::{BootTarget, BootloaderTool};
use crate::util::{self, process::ToolFailure};
use bootstick_shared::BootstickResult;
use std::path::{Path, PathBuf};

/// Runs `grub-install` (or `grub2-install` on Red Hat style hosts) once per
/// firmware target. All targets share one boot directory on the data
/// partition, so every firmware reads the same `grub.cfg`.
pub struct GrubInstallTool {
    binary: PathBuf,
}

impl GrubInstallTool {
    pub fn new() -> BootstickResult<Self> {
        Ok(Self {
            binary: util::find_binary(&["grub-install", "grub2-install"])?,
        })
    }

    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self { binary: binary.into() }
    }

    pub(crate) fn arguments(target: BootTarget, device: &Path, efi_dir: &Path, boot_dir: &Path) -> Vec<String> {
        let mut args = vec![
            format!("--target={}", target.as_str()),
            format!("--boot-directory={}", boot_dir.display()),
        ];
        if target.is_efi() {
            args.push(format!("--efi-directory={}", efi_dir.display()));
            args.push("--removable".into());
            args.push("--no-nvram".into());
        } else {
            args.push("--recheck".into());
            args.push(device.display().to_string());
        }
        args
    }
}

impl BootloaderTool for GrubInstallTool {
    fn install(&self, target: BootTarget, device: &Path, efi_dir: &Path, boot_dir: &Path) -> Result<(), ToolFailure> {
        let args = Self::arguments(target, device, efi_dir, boot_dir);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        util::process::run_tool(&self.binary, &args, None).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_efi_arguments() {
        let args = GrubInstallTool::arguments(
            BootTarget::Efi64,
            Path::new("/dev/sdb"),
            Path::new("/mnt/efi"),
            Path::new("/mnt/data/boot"),
        );
        assert_eq!(
            args,
            vec![
                "--target=x86_64-efi",
                "--boot-directory=/mnt/data/boot",
                "--efi-directory=/mnt/efi",
                "--removable",
                "--no-nvram",
            ]
        );
    }

    #[test]
    fn test_legacy_arguments_target_whole_device() {
        let args = GrubInstallTool::arguments(
            BootTarget::BiosPc,
            Path::new("/dev/sdb"),
            Path::new("/mnt/efi"),
            Path::new("/mnt/data/boot"),
        );
        assert_eq!(args.first().map(String::as_str), Some("--target=i386-pc"));
        assert_eq!(args.last().map(String::as_str), Some("/dev/sdb"));
        assert!(!args.iter().any(|a| a.starts_with("--efi-directory")));
    }

    #[test]
    fn test_failure_carries_diagnostic() {
        let tool = GrubInstallTool::with_binary("/bin/false");
        let err = tool
            .install(
                BootTarget::Efi64,
                Path::new("/dev/null"),
                Path::new("/nonexistent"),
                Path::new("/nonexistent"),
            )
            .unwrap_err();
        assert_eq!(err.tool, "false");
        assert_eq!(err.status, Some(1));
    }
}

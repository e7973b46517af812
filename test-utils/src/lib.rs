//! Shared fixtures for bootstick integration tests.
//!
//! Fakes for the external tools the workflow drives, a local HTTP server
//! that can misbehave on demand, and helpers for building test images.

pub mod http;
pub mod tools;

pub use http::{FixtureServer, ServerBehavior};
pub use tools::{FakeBootloaderTool, FakeFormatTool, FakeMountTool, FakePartitionTool};

use bootstick::{BootstickResult, HostAssets, ProvisioningWorkflow, SystemTools, TargetDevice};
use bootstick::options::ProvisionOptions;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Hex SHA-256 of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Deterministic pseudo-random payload of `len` bytes.
pub fn payload(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u32).wrapping_mul(2_654_435_761).rotate_left(u32::from(seed) % 32) as u8)
        .collect()
}

/// A sparse `.iso` file of `size` bytes carrying the ISO 9660 signature.
pub fn write_iso(path: &Path, size: u64) {
    use std::io::{Seek, SeekFrom, Write};
    let mut file = std::fs::File::create(path).expect("create iso");
    file.set_len(size).expect("size iso");
    file.seek(SeekFrom::Start(0x8001)).expect("seek iso");
    file.write_all(b"CD001").expect("write iso signature");
}

/// Everything a workflow test needs: a scratch directory, recording fakes
/// and a removable device description.
pub struct TestRig {
    pub dir: TempDir,
    pub partition: Arc<FakePartitionTool>,
    pub format: Arc<FakeFormatTool>,
    pub mount: Arc<FakeMountTool>,
    pub bootloader: Arc<FakeBootloaderTool>,
    pub device: TargetDevice,
    pub options: ProvisionOptions,
}

impl TestRig {
    pub fn new(device_size: u64) -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let mut options = ProvisionOptions::default();
        options.mirrors.stats_path = Some(dir.path().join("mirror_stats.json"));
        options.download.progress_interval_ms = 0;
        Self {
            dir,
            partition: Arc::new(FakePartitionTool::new(512)),
            format: Arc::new(FakeFormatTool::default()),
            mount: Arc::new(FakeMountTool::default()),
            bootloader: Arc::new(FakeBootloaderTool::default()),
            device: TargetDevice::new("/dev/sdz", device_size),
            options,
        }
    }

    pub fn tools(&self) -> SystemTools {
        SystemTools {
            partition: self.partition.clone(),
            format: self.format.clone(),
            mount: self.mount.clone(),
            bootloader: self.bootloader.clone(),
        }
    }

    /// Host assets that exist inside the scratch directory.
    pub fn host_assets(&self) -> HostAssets {
        let assets = self.dir.path().join("host");
        std::fs::create_dir_all(&assets).expect("create host assets");
        let font = assets.join("unicode.pf2");
        let memdisk = assets.join("memdisk");
        std::fs::write(&font, b"PFF2").expect("write font");
        std::fs::write(&memdisk, b"memdisk").expect("write memdisk");
        HostAssets {
            fonts: vec![font],
            memdisk: vec![memdisk],
            shim: Vec::new(),
        }
    }

    pub fn mount_base(&self) -> PathBuf {
        self.dir.path().join("mnt")
    }

    /// Where the fake mount tool leaves the data partition's files.
    pub fn data_mount(&self) -> PathBuf {
        self.mount_base().join("data")
    }

    pub fn workflow(&self) -> ProvisioningWorkflow {
        ProvisioningWorkflow::new(self.tools(), self.options.clone())
            .with_mount_base(self.mount_base())
            .with_host_assets(self.host_assets())
    }

    /// Create a custom image file inside the scratch directory.
    pub fn iso(&self, name: &str, size: u64) -> PathBuf {
        let path = self.dir.path().join(name);
        write_iso(&path, size);
        path
    }
}

/// Run `provision` with the rig's workflow.
pub async fn provision(rig: &TestRig, selections: &[bootstick::ImageSelection]) -> BootstickResult<bootstick::ProvisionReport> {
    rig.workflow().provision(&rig.device, selections).await
}

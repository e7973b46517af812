//! Provisioning orchestration.
//!
//! ```text
//! fresh:   Partition ─► Mount ─► InstallBootloader ─► Download(i)… ─► GenerateConfig ─► PersistManifest ─┐
//! append:              Mount ─► (load + prune manifest) ─► Download(i)… ─► GenerateConfig ─► PersistManifest ─┤
//!                                                                                                          ▼
//!                                                                                       Unmount (always runs)
//! ```
//!
//! Every selection is validated before the first destructive call. The
//! first failing stage stops the run; its error is wrapped with the stage
//! name. Cancellation is checked between stages and, inside downloads,
//! between chunks. Teardown runs on every exit path.

mod progress;

pub use progress::ProgressCallback;

use crate::bootcfg::{BootConfigGenerator, HotkeyAllocator};
use crate::bootloader::{BootloaderInstaller, BootloaderReport, BootloaderTool, GrubInstallTool, HostAssets};
use crate::device::TargetDevice;
use crate::download::{DownloadProgress, MirrorStatsStore, MirroredDownloader, TransferControl};
use crate::images::{self, ImageSelection, ImageSource, PreparedImage, custom};
use crate::manifest::ManifestStore;
use crate::mount::{MountSet, MountTool, NixMountTool};
use crate::options::ProvisionOptions;
use crate::partition::{
    DATA_INDEX, Filesystem, FormatTool, MkfsTool, PartitionPlanner, PartitionTool, SYSTEM_BOOT_INDEX, SfdiskTool,
};
use crate::util;
use bootstick_shared::errors::{BootstickError, BootstickResult, DownloadError};
use bootstick_shared::manifest::{BootEntry, LayoutRecord, Manifest};
use bootstick_shared::progress::Stage;
use progress::ProgressReporter;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const TOOL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// External collaborators the workflow drives.
#[derive(Clone)]
pub struct SystemTools {
    pub partition: Arc<dyn PartitionTool>,
    pub format: Arc<dyn FormatTool>,
    pub mount: Arc<dyn MountTool>,
    pub bootloader: Arc<dyn BootloaderTool>,
}

impl SystemTools {
    /// Production tools found on this host.
    pub fn host() -> BootstickResult<Self> {
        Ok(Self {
            partition: Arc::new(SfdiskTool::new()?),
            format: Arc::new(MkfsTool::default()),
            mount: Arc::new(NixMountTool),
            bootloader: Arc::new(GrubInstallTool::new()?),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowMode {
    /// Repartition the device and install everything from scratch.
    Fresh,
    /// Add images to an already provisioned device.
    Append,
}

/// Summary of a successful run.
#[derive(Debug, Clone)]
pub struct ProvisionReport {
    pub mode: WorkflowMode,
    pub layout: LayoutRecord,
    /// Entries created by this run.
    pub added: Vec<BootEntry>,
    /// Selections already present on the device (append only).
    pub skipped: Vec<String>,
    /// Manifest entries dropped because their image was gone (append only).
    pub pruned: Vec<BootEntry>,
    pub bootloader: Option<BootloaderReport>,
    pub manifest: Manifest,
    /// The boot script written to the device.
    pub config: String,
}

impl ProvisionReport {
    pub fn warnings(&self) -> &[String] {
        self.bootloader.as_ref().map(|b| b.warnings.as_slice()).unwrap_or_default()
    }
}

pub struct ProvisioningWorkflow {
    tools: SystemTools,
    options: ProvisionOptions,
    control: TransferControl,
    stats: Arc<MirrorStatsStore>,
    progress: Option<ProgressCallback>,
    mount_base: PathBuf,
    host_assets: HostAssets,
}

impl ProvisioningWorkflow {
    pub fn new(tools: SystemTools, options: ProvisionOptions) -> Self {
        let stats = match options.mirrors.resolved_stats_path() {
            Some(path) => MirrorStatsStore::open(path),
            None => MirrorStatsStore::in_memory(),
        };
        Self {
            tools,
            options,
            control: TransferControl::new(),
            stats: Arc::new(stats),
            progress: None,
            mount_base: MountSet::default_base(),
            host_assets: HostAssets::default(),
        }
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    pub fn with_mount_base(mut self, base: impl Into<PathBuf>) -> Self {
        self.mount_base = base.into();
        self
    }

    pub fn with_host_assets(mut self, assets: HostAssets) -> Self {
        self.host_assets = assets;
        self
    }

    pub fn with_stats(mut self, stats: Arc<MirrorStatsStore>) -> Self {
        self.stats = stats;
        self
    }

    /// Handle for pausing or cancelling the run from another task.
    pub fn control(&self) -> TransferControl {
        self.control.clone()
    }

    /// Repartition `device` and install `selections`.
    pub async fn provision(&self, device: &TargetDevice, selections: &[ImageSelection]) -> BootstickResult<ProvisionReport> {
        self.run(WorkflowMode::Fresh, device, selections).await
    }

    /// Add `selections` to a device provisioned earlier.
    pub async fn append(&self, device: &TargetDevice, selections: &[ImageSelection]) -> BootstickResult<ProvisionReport> {
        self.run(WorkflowMode::Append, device, selections).await
    }

    async fn run(
        &self,
        mode: WorkflowMode,
        device: &TargetDevice,
        selections: &[ImageSelection],
    ) -> BootstickResult<ProvisionReport> {
        self.options.validate()?;
        device.validate()?;
        let prepared = selections
            .iter()
            .map(ImageSelection::prepare)
            .collect::<BootstickResult<Vec<_>>>()?;
        images::ensure_distinct(&prepared)?;

        tracing::info!(
            device = %device.path.display(),
            mode = ?mode,
            selections = prepared.len(),
            "Starting provisioning run"
        );

        let reporter = ProgressReporter::new(self.progress.clone(), prepared.len());
        let mut mounts = MountSet::new(self.tools.mount.clone(), &self.mount_base);

        let result = match mode {
            WorkflowMode::Fresh => self.run_fresh(device, &prepared, &mut mounts, &reporter).await,
            WorkflowMode::Append => self.run_append(device, &prepared, &mut mounts, &reporter).await,
        };

        reporter.enter(Stage::Unmount, "Releasing device");
        let teardown = mounts.release();
        match (result, teardown) {
            (Ok(report), Ok(())) => {
                reporter.finish();
                tracing::info!(
                    device = %device.path.display(),
                    entries = report.manifest.entries.len(),
                    added = report.added.len(),
                    "Provisioning finished"
                );
                Ok(report)
            }
            (Ok(_), Err(e)) => Err(e.in_stage(Stage::Unmount)),
            (Err(e), teardown) => {
                if let Err(t) = teardown {
                    tracing::error!(error = %t, "Teardown failed after an earlier error");
                }
                tracing::error!(error = %e, kind = %e.kind(), "Provisioning failed");
                Err(e)
            }
        }
    }

    async fn run_fresh(
        &self,
        device: &TargetDevice,
        prepared: &[PreparedImage],
        mounts: &mut MountSet,
        reporter: &ProgressReporter,
    ) -> BootstickResult<ProvisionReport> {
        // Partition
        self.checkpoint(Stage::Partition)?;
        reporter.enter(Stage::Partition, format!("Partitioning {}", device.path.display()));
        let layout = self
            .partition(device, prepared, reporter)
            .map_err(|e| e.in_stage(Stage::Partition))?;

        // Mount
        self.checkpoint(Stage::Mount)?;
        reporter.enter(Stage::Mount, "Mounting partitions");
        let efi_mount = mounts
            .mount(&device.partition_path(SYSTEM_BOOT_INDEX), "efi", Filesystem::Fat32)
            .map_err(|e| e.in_stage(Stage::Mount))?;
        let data_mount = mounts
            .mount(&device.partition_path(DATA_INDEX), "data", Filesystem::Ext4)
            .map_err(|e| e.in_stage(Stage::Mount))?;

        // InstallBootloader
        self.checkpoint(Stage::InstallBootloader)?;
        reporter.enter(Stage::InstallBootloader, "Installing bootloaders");
        let bootloader = BootloaderInstaller::new(self.tools.bootloader.clone(), self.options.bootloader.clone())
            .with_assets(self.host_assets.clone())
            .install(&device.path, &efi_mount, &data_mount)
            .map_err(|e| e.in_stage(Stage::InstallBootloader))?;

        let mut manifest = Manifest::new(layout.record(), bootloader.restricted_boot, TOOL_VERSION);
        let mut hotkeys = HotkeyAllocator::new(Vec::new());
        let added = self
            .install_images(prepared, &data_mount, &mut manifest, &mut hotkeys, reporter)
            .await?;

        let config = self.finalize(&data_mount, &mut manifest, reporter)?;
        Ok(ProvisionReport {
            mode: WorkflowMode::Fresh,
            layout: manifest.layout.clone(),
            added,
            skipped: Vec::new(),
            pruned: Vec::new(),
            bootloader: Some(bootloader),
            manifest,
            config,
        })
    }

    async fn run_append(
        &self,
        device: &TargetDevice,
        prepared: &[PreparedImage],
        mounts: &mut MountSet,
        reporter: &ProgressReporter,
    ) -> BootstickResult<ProvisionReport> {
        self.checkpoint(Stage::Mount)?;
        reporter.enter(Stage::Mount, "Mounting data partition");
        let data_mount = mounts
            .mount(&device.partition_path(DATA_INDEX), "data", Filesystem::Ext4)
            .map_err(|e| e.in_stage(Stage::Mount))?;

        let store = ManifestStore::new(&data_mount);
        let mut manifest = store
            .load()
            .and_then(|m| {
                m.ok_or_else(|| {
                    BootstickError::Validation(format!(
                        "{} has no manifest, provision it before appending",
                        device.path.display()
                    ))
                })
            })
            .map_err(|e| e.in_stage(Stage::Mount))?;
        let pruned = store.prune_missing(&mut manifest);

        let (pending, skipped): (Vec<PreparedImage>, Vec<PreparedImage>) =
            prepared.iter().cloned().partition(|p| !manifest.contains_path(&p.image_path));
        for image in &skipped {
            tracing::info!(image = %image.image_path, "Already on device, skipping");
        }
        self.ensure_space(&data_mount, &pending)
            .map_err(|e| e.in_stage(Stage::Mount))?;

        let mut hotkeys = HotkeyAllocator::new(manifest.used_hotkeys());
        let added = self
            .install_images(&pending, &data_mount, &mut manifest, &mut hotkeys, reporter)
            .await?;

        let config = self.finalize(&data_mount, &mut manifest, reporter)?;
        Ok(ProvisionReport {
            mode: WorkflowMode::Append,
            layout: manifest.layout.clone(),
            added,
            skipped: skipped.into_iter().map(|p| p.image_path).collect(),
            pruned,
            bootloader: None,
            manifest,
            config,
        })
    }

    /// Cancellation point between stages.
    fn checkpoint(&self, stage: Stage) -> BootstickResult<()> {
        if self.control.is_cancelled() {
            tracing::info!(stage = %stage, "Cancellation observed");
            return Err(BootstickError::Cancelled { stage });
        }
        Ok(())
    }

    fn partition(
        &self,
        device: &TargetDevice,
        prepared: &[PreparedImage],
        reporter: &ProgressReporter,
    ) -> BootstickResult<crate::partition::PartitionLayout> {
        let planner = PartitionPlanner::new(
            self.tools.partition.clone(),
            self.tools.format.clone(),
            self.options.partition.clone(),
        );
        let required: u64 = prepared.iter().map(PreparedImage::required_bytes).sum();
        let layout = planner.plan(device, required)?;
        reporter.within(Stage::Partition, 0.1, "Layout planned");

        let device = self.release_automounts(device)?;
        planner.apply(&device, &layout)?;
        reporter.within(Stage::Partition, 0.5, "Partition table written");

        planner.format(&device, &layout)?;
        reporter.within(Stage::Partition, 1.0, "File systems created");
        Ok(layout)
    }

    /// Unmount partitions a desktop automounter left on the target. The
    /// returned description no longer lists them as mounted.
    fn release_automounts(&self, device: &TargetDevice) -> BootstickResult<TargetDevice> {
        let mut device = device.clone();
        for part in &mut device.partitions {
            let Some(mountpoint) = part.mountpoint.take() else {
                continue;
            };
            tracing::info!(
                partition = %part.path.display(),
                mountpoint = %mountpoint.display(),
                "Unmounting existing partition on target"
            );
            self.tools.mount.unmount(&mountpoint).map_err(|e| {
                BootstickError::Validation(format!("{} is in use: {}", part.path.display(), e))
            })?;
        }
        Ok(device)
    }

    fn ensure_space(&self, data_mount: &Path, pending: &[PreparedImage]) -> BootstickResult<()> {
        let needed: u64 = pending.iter().map(PreparedImage::required_bytes).sum();
        if needed == 0 {
            return Ok(());
        }
        let available = util::available_space(data_mount)
            .map_err(|e| BootstickError::Storage(format!("checking free space on {}: {}", data_mount.display(), e)))?;
        if needed > available {
            return Err(BootstickError::Validation(format!(
                "selected images need {} MiB but the data partition has {} MiB free",
                needed.div_ceil(1 << 20),
                available >> 20
            )));
        }
        Ok(())
    }

    /// Download or copy every image, one after another.
    async fn install_images(
        &self,
        images: &[PreparedImage],
        data_mount: &Path,
        manifest: &mut Manifest,
        hotkeys: &mut HotkeyAllocator,
        reporter: &ProgressReporter,
    ) -> BootstickResult<Vec<BootEntry>> {
        let downloader = MirroredDownloader::new(
            self.options.download.clone(),
            self.options.mirrors.clone(),
            self.stats.clone(),
            self.control.clone(),
        )?;
        self.stats
            .prune(chrono::Duration::days(self.options.mirrors.stats_max_age_days));

        let ram_threshold = self.options.boot_menu.ram_boot_threshold_bytes();
        let total = images.len();
        let mut added = Vec::with_capacity(total);
        for (index, image) in images.iter().enumerate() {
            self.checkpoint(Stage::Download)?;
            let label = format!("{} ({}/{})", image.name, index + 1, total);
            reporter.download(index, 0.0, label.clone());

            self.install_image(&downloader, image, data_mount, index, &label, reporter)
                .await
                .map_err(|e| e.in_stage(Stage::Download))?;
            self.create_persistence(image, data_mount)
                .map_err(|e| e.in_stage(Stage::Download))?;

            let entry = image.to_entry(hotkeys, ram_threshold);
            manifest.entries.push(entry.clone());
            added.push(entry);
            reporter.download(index, 1.0, label);
        }
        Ok(added)
    }

    async fn install_image(
        &self,
        downloader: &MirroredDownloader,
        image: &PreparedImage,
        data_mount: &Path,
        index: usize,
        label: &str,
        reporter: &ProgressReporter,
    ) -> BootstickResult<()> {
        let declared = image.size_bytes.max(1);
        match &image.source {
            ImageSource::Download { .. } => {
                let Some(request) = image.fetch_request(data_mount) else {
                    return Err(BootstickError::Internal("download source without request".into()));
                };
                let on_progress = |p: &DownloadProgress| {
                    let fraction = p.fraction().unwrap_or(p.bytes_done as f64 / declared as f64);
                    let detail = if p.paused {
                        format!("{} paused", label)
                    } else {
                        label.to_string()
                    };
                    reporter.download(index, fraction, detail);
                };
                match downloader.fetch(&request, &on_progress).await {
                    Ok(outcome) => {
                        tracing::debug!(image = %image.image_path, outcome = ?outcome, "Image in place");
                        Ok(())
                    }
                    Err(DownloadError::Cancelled) => Err(BootstickError::Cancelled { stage: Stage::Download }),
                    Err(e) => Err(e.into()),
                }
            }
            ImageSource::Copy { path, .. } => {
                let on_progress = |done: u64, total: u64| {
                    reporter.download(index, done as f64 / total.max(1) as f64, label.to_string());
                };
                custom::copy_image(path, &image.destination(data_mount), &self.control, &on_progress)
                    .await
                    .map(|_| ())
            }
        }
    }

    /// Create the image's persistence overlay. An overlay already on the
    /// device is kept with its contents.
    fn create_persistence(&self, image: &PreparedImage, data_mount: &Path) -> BootstickResult<()> {
        let Some(overlay) = &image.persistence else {
            return Ok(());
        };
        let path = overlay.destination(data_mount);
        if path.exists() {
            tracing::info!(path = %path.display(), "Keeping existing persistence file");
            return Ok(());
        }

        let storage = |e: std::io::Error| BootstickError::Storage(format!("creating {}: {}", path.display(), e));
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(storage)?;
        }
        std::fs::File::create(&path)
            .and_then(|file| file.set_len(overlay.size_bytes))
            .map_err(storage)?;

        if let Err(e) = self.tools.format.format(&path, Filesystem::Ext4, overlay.label) {
            if let Err(rm) = std::fs::remove_file(&path) {
                tracing::warn!(path = %path.display(), error = %rm, "Failed to remove unformatted persistence file");
            }
            return Err(BootstickError::Storage(format!(
                "formatting persistence file {}: {}",
                path.display(),
                e
            )));
        }
        tracing::info!(
            path = %path.display(),
            size_mib = overlay.size_bytes >> 20,
            label = overlay.label,
            "Created persistence file"
        );
        Ok(())
    }

    /// Regenerate the boot script from the manifest and persist both.
    fn finalize(&self, data_mount: &Path, manifest: &mut Manifest, reporter: &ProgressReporter) -> BootstickResult<String> {
        self.checkpoint(Stage::GenerateConfig)?;
        reporter.enter(Stage::GenerateConfig, "Writing boot menu");
        let generator = BootConfigGenerator::new(self.options.boot_menu.clone());
        let config = generator
            .generate_from_manifest(manifest)
            .and_then(|text| generator.write(data_mount, &text).map(|_| text))
            .map_err(|e| e.in_stage(Stage::GenerateConfig))?;

        self.checkpoint(Stage::PersistManifest)?;
        reporter.enter(Stage::PersistManifest, "Saving manifest");
        ManifestStore::new(data_mount)
            .save(manifest)
            .map_err(|e| e.in_stage(Stage::PersistManifest))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::images::CustomImage;
    use crate::images::custom::tests::sparse_image;
    use crate::partition::{PartitionLayout, PartitionTable, TableEntry};
    use crate::util::process::ToolFailure;
    use bootstick_shared::constants::units::{GIB, MIB};
    use bootstick_shared::errors::ErrorKind;
    use bootstick_shared::manifest::Family;
    use bootstick_shared::progress::ProgressEvent;
    use parking_lot::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct MemoryTable {
        table: Mutex<Vec<TableEntry>>,
    }

    impl PartitionTool for MemoryTable {
        fn query_layout(&self, _device: &Path) -> Result<PartitionTable, ToolFailure> {
            Ok(PartitionTable {
                sector_size: 512,
                entries: self.table.lock().clone(),
            })
        }

        fn apply_layout(&self, _device: &Path, layout: &PartitionLayout) -> Result<(), ToolFailure> {
            *self.table.lock() = layout
                .regions
                .iter()
                .map(|r| TableEntry {
                    index: r.index,
                    start_bytes: r.start_bytes,
                    size_bytes: r.size_bytes,
                    type_guid: r.type_guid().to_string(),
                })
                .collect();
            Ok(())
        }
    }

    struct NoFormat;

    impl FormatTool for NoFormat {
        fn format(&self, _partition: &Path, _filesystem: Filesystem, _label: &str) -> Result<(), ToolFailure> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct LoggedMounts {
        calls: Mutex<Vec<String>>,
    }

    impl MountTool for LoggedMounts {
        fn mount(&self, source: &Path, _target: &Path, _filesystem: Filesystem) -> Result<(), ToolFailure> {
            self.calls.lock().push(format!("mount {}", source.display()));
            Ok(())
        }

        fn unmount(&self, target: &Path) -> Result<(), ToolFailure> {
            self.calls.lock().push(format!("umount {}", target.display()));
            Ok(())
        }
    }

    struct Grub {
        fail: bool,
    }

    impl BootloaderTool for Grub {
        fn install(
            &self,
            target: crate::bootloader::BootTarget,
            _device: &Path,
            _efi_dir: &Path,
            _boot_dir: &Path,
        ) -> Result<(), ToolFailure> {
            if self.fail {
                return Err(ToolFailure::new("grub-install", Some(1), format!("{} unsupported", target)));
            }
            Ok(())
        }
    }

    struct Harness {
        dir: TempDir,
        mounts: Arc<LoggedMounts>,
        events: Arc<Mutex<Vec<ProgressEvent>>>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                dir: TempDir::new().unwrap(),
                mounts: Arc::new(LoggedMounts::default()),
                events: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn workflow(&self, grub_fails: bool) -> ProvisioningWorkflow {
            let tools = SystemTools {
                partition: Arc::new(MemoryTable::default()),
                format: Arc::new(NoFormat),
                mount: self.mounts.clone(),
                bootloader: Arc::new(Grub { fail: grub_fails }),
            };
            let mut options = ProvisionOptions::default();
            options.mirrors.stats_path = Some(self.dir.path().join("stats.json"));
            let events = self.events.clone();
            ProvisioningWorkflow::new(tools, options)
                .with_mount_base(self.dir.path().join("mnt"))
                .with_host_assets(HostAssets {
                    fonts: Vec::new(),
                    memdisk: Vec::new(),
                    shim: Vec::new(),
                })
                .with_progress(Arc::new(move |e: &ProgressEvent| events.lock().push(e.clone())))
        }

        fn custom(&self, file: &str, size: u64) -> ImageSelection {
            let path = self.dir.path().join(file);
            sparse_image(&path, size, 0x8001, b"CD001");
            ImageSelection::Custom(CustomImage {
                path,
                name: None,
                family: Family::Generic,
                persistence_mib: None,
            })
        }

        fn data_mount(&self) -> PathBuf {
            self.dir.path().join("mnt").join("data")
        }
    }

    fn device() -> TargetDevice {
        TargetDevice::new("/dev/sdz", 16 * GIB)
    }

    #[tokio::test]
    async fn test_fresh_provision_writes_config_and_manifest() {
        let h = Harness::new();
        let selections = vec![h.custom("rescue.iso", 12 * MIB), h.custom("tools.iso", 11 * MIB)];

        let report = h.workflow(false).provision(&device(), &selections).await.unwrap();

        assert_eq!(report.mode, WorkflowMode::Fresh);
        assert_eq!(report.added.len(), 2);
        assert_eq!(report.manifest.entries.len(), 2);
        assert_eq!(report.added[0].hotkey, Some('a'));
        assert_eq!(report.added[1].hotkey, Some('b'));
        assert!(h.data_mount().join("isos/custom/rescue.iso").is_file());

        let written = std::fs::read_to_string(h.data_mount().join("boot/grub/grub.cfg")).unwrap();
        assert_eq!(written, report.config);
        let stored = ManifestStore::new(h.data_mount()).load().unwrap().unwrap();
        assert_eq!(stored.entries, report.manifest.entries);

        let calls = h.mounts.calls.lock().clone();
        assert_eq!(calls.iter().filter(|c| c.starts_with("mount")).count(), 2);
        assert_eq!(calls.iter().filter(|c| c.starts_with("umount")).count(), 2);
    }

    #[tokio::test]
    async fn test_progress_is_monotonic_and_completes() {
        let h = Harness::new();
        let selections = vec![h.custom("rescue.iso", 12 * MIB)];
        h.workflow(false).provision(&device(), &selections).await.unwrap();

        let events = h.events.lock();
        assert!(events.windows(2).all(|w| w[0].percent <= w[1].percent));
        assert_eq!(events.last().map(|e| e.percent), Some(100.0));
        assert!(events.iter().any(|e| e.stage == Stage::Download));
    }

    #[tokio::test]
    async fn test_cancel_before_start_touches_nothing() {
        let h = Harness::new();
        let workflow = h.workflow(false);
        workflow.control().cancel();

        let err = workflow
            .provision(&device(), &[h.custom("rescue.iso", 12 * MIB)])
            .await
            .unwrap_err();
        assert!(matches!(err, BootstickError::Cancelled { stage: Stage::Partition }));
        assert!(h.mounts.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_selection_rejected_before_partitioning() {
        let h = Harness::new();
        let missing = ImageSelection::Custom(CustomImage {
            path: h.dir.path().join("absent.iso"),
            name: None,
            family: Family::Generic,
            persistence_mib: None,
        });
        let err = h.workflow(false).provision(&device(), &[missing]).await.unwrap_err();
        assert!(matches!(err, BootstickError::Validation(_)));
        assert_eq!(err.kind(), ErrorKind::Device);
        assert!(h.mounts.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_bootloader_failure_still_unmounts() {
        let h = Harness::new();
        let err = h
            .workflow(true)
            .provision(&device(), &[h.custom("rescue.iso", 12 * MIB)])
            .await
            .unwrap_err();

        assert_eq!(err.stage(), Some(Stage::InstallBootloader));
        let calls = h.mounts.calls.lock().clone();
        assert_eq!(calls.iter().filter(|c| c.starts_with("umount")).count(), 2);
    }

    #[tokio::test]
    async fn test_append_requires_manifest() {
        let h = Harness::new();
        let err = h
            .workflow(false)
            .append(&device(), &[h.custom("rescue.iso", 12 * MIB)])
            .await
            .unwrap_err();

        assert_eq!(err.stage(), Some(Stage::Mount));
        assert!(matches!(err.root(), BootstickError::Validation(_)));
        assert_eq!(h.mounts.calls.lock().last().map(|c| c.starts_with("umount")), Some(true));
    }

    #[tokio::test]
    async fn test_append_skips_present_and_continues_hotkeys() {
        let h = Harness::new();
        let first = h.custom("rescue.iso", 12 * MIB);
        let fresh = h.workflow(false).provision(&device(), &[first.clone()]).await.unwrap();

        let report = h
            .workflow(false)
            .append(&device(), &[first, h.custom("tools.iso", 11 * MIB)])
            .await
            .unwrap();

        assert_eq!(report.mode, WorkflowMode::Append);
        assert_eq!(report.skipped, vec!["/isos/custom/rescue.iso".to_string()]);
        assert_eq!(report.added.len(), 1);
        assert_eq!(report.added[0].hotkey, Some('b'));
        assert_eq!(report.manifest.entries[0], fresh.manifest.entries[0]);
        assert_eq!(report.manifest.entries.len(), 2);
        assert!(report.bootloader.is_none());
    }

    #[tokio::test]
    async fn test_persistence_file_created_and_booted() {
        let h = Harness::new();
        let ImageSelection::Custom(mut live) = h.custom("live.iso", 12 * MIB) else {
            unreachable!()
        };
        live.family = Family::Debian;
        live.persistence_mib = Some(64);

        let report = h
            .workflow(false)
            .provision(&device(), &[ImageSelection::Custom(live)])
            .await
            .unwrap();

        let overlay = h.data_mount().join("persistence/live/casper-rw");
        assert_eq!(std::fs::metadata(&overlay).unwrap().len(), 64 * MIB);
        assert_eq!(
            report.added[0].persistence.as_deref(),
            Some("/persistence/live/casper-rw")
        );
        assert!(report.config.contains("persistent persistent-path=/persistence/live"));
    }
}

//! bootstick turns a removable drive into a boot device carrying several
//! installer and rescue images behind one GRUB menu.
//!
//! [`ProvisioningWorkflow`] drives the whole run. The pieces it composes are
//! usable on their own: [`PartitionPlanner`] lays out the device,
//! [`BootloaderInstaller`] places GRUB for every firmware target,
//! [`MirroredDownloader`] fetches images with resume and mirror failover, and
//! [`BootConfigGenerator`] renders the boot menu from the manifest kept on
//! the device.

pub mod bootcfg;
pub mod bootloader;
pub mod device;
pub mod download;
pub mod images;
pub mod manifest;
pub mod mount;
pub mod options;
pub mod partition;
pub mod util;
pub mod workflow;

pub use bootcfg::{BootConfigGenerator, HotkeyAllocator};
pub use bootloader::{BootTarget, BootloaderInstaller, BootloaderReport, BootloaderTool, GrubInstallTool, HostAssets};
pub use device::TargetDevice;
pub use download::{
    DownloadProgress, FetchOutcome, FetchRequest, MirrorStatsStore, MirroredDownloader, TransferControl,
};
pub use images::{CatalogImage, CustomImage, ImageSelection, PersistenceFile, PreparedImage};
pub use manifest::ManifestStore;
pub use mount::{MountSet, MountTool, NixMountTool};
pub use options::ProvisionOptions;
pub use partition::{FormatTool, PartitionLayout, PartitionPlanner, PartitionTool};
pub use workflow::{ProgressCallback, ProvisionReport, ProvisioningWorkflow, SystemTools, WorkflowMode};

pub use bootstick_shared::{
    BootEntry, BootstickError, BootstickResult, DownloadError, EntryOrigin, ErrorKind, Family, LayoutRecord,
    Manifest, ProgressEvent, Stage,
};

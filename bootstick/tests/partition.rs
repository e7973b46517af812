//! Integration tests for partition planning against a fake table.

use bootstick::options::PartitionOptions;
use bootstick::partition::{DATA_INDEX, Filesystem, PartitionPlanner, RegionKind};
use bootstick::{BootstickError, ErrorKind, TargetDevice};
use bootstick::device::ExistingPartition;
use bootstick_test_utils::{FakeFormatTool, FakePartitionTool};
use std::path::PathBuf;
use std::sync::Arc;

const MIB: u64 = 1024 * 1024;
const GIB: u64 = 1024 * MIB;

fn planner() -> (PartitionPlanner, Arc<FakePartitionTool>, Arc<FakeFormatTool>) {
    let table = Arc::new(FakePartitionTool::new(512));
    let format = Arc::new(FakeFormatTool::default());
    (
        PartitionPlanner::new(table.clone(), format.clone(), PartitionOptions::default()),
        table,
        format,
    )
}

#[test]
fn test_apply_then_read_back_matches_plan() {
    let (planner, table, format) = planner();
    let device = TargetDevice::new("/dev/sdz", 16 * GIB);

    let layout = planner.plan(&device, 5 * GIB).unwrap();
    planner.apply(&device, &layout).unwrap();
    planner.verify(&device, &layout).unwrap();
    planner.format(&device, &layout).unwrap();

    assert_eq!(table.applied(), vec![layout.clone()]);
    assert_eq!(layout.data().start_bytes, GIB);
    assert_eq!(layout.data().index, DATA_INDEX);
    assert_eq!(layout.data().start_bytes % MIB, 0);
    assert!(layout.data().size_bytes >= 5 * GIB);

    let calls = format.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0], (PathBuf::from("/dev/sdz2"), Filesystem::Fat32, "BSEFI".to_string()));
    assert_eq!(calls[1], (PathBuf::from("/dev/sdz3"), Filesystem::Ext4, "BOOTSTICK".to_string()));
}

#[test]
fn test_regions_are_ordered_and_disjoint() {
    let (planner, _, _) = planner();
    let layout = planner.plan(&TargetDevice::new("/dev/sdz", 8 * GIB), 0).unwrap();

    let bios = layout.region(RegionKind::BiosBoot);
    let efi = layout.region(RegionKind::SystemBoot);
    let data = layout.region(RegionKind::Data);
    assert!(bios.end_bytes() <= efi.start_bytes);
    assert!(efi.end_bytes() <= data.start_bytes);
    assert!(data.end_bytes() <= 8 * GIB);
}

#[test]
fn test_too_small_device_is_rejected_before_writing() {
    let (planner, table, _) = planner();
    let device = TargetDevice::new("/dev/sdz", 4 * GIB);

    let err = planner.plan(&device, 6 * GIB).unwrap_err();
    assert!(matches!(err, BootstickError::Validation(_)));
    assert!(err.to_string().contains("device too small"));
    assert!(table.applied().is_empty());
}

#[test]
fn test_system_disk_is_refused() {
    let (planner, table, _) = planner();
    let mut device = TargetDevice::new("/dev/sda", 256 * GIB);
    device.partitions.push(ExistingPartition {
        path: "/dev/sda2".into(),
        mountpoint: Some("/".into()),
    });

    assert!(matches!(planner.plan(&device, GIB).unwrap_err(), BootstickError::Validation(_)));
    assert!(table.applied().is_empty());
}

#[test]
fn test_mounted_partition_blocks_apply() {
    let (planner, table, _) = planner();
    let mut device = TargetDevice::new("/dev/sdz", 16 * GIB);
    let layout = planner.plan(&device, GIB).unwrap();
    device.partitions.push(ExistingPartition {
        path: "/dev/sdz1".into(),
        mountpoint: Some("/media/user/STICK".into()),
    });

    assert!(planner.apply(&device, &layout).is_err());
    assert!(table.applied().is_empty());
}

#[test]
fn test_failed_write_skips_formatting() {
    let (planner, table, format) = planner();
    let device = TargetDevice::new("/dev/sdz", 16 * GIB);
    let layout = planner.plan(&device, GIB).unwrap();
    table.fail_apply("Device or resource busy");

    let err = planner.apply(&device, &layout).unwrap_err();
    assert!(matches!(err, BootstickError::Partition(_)));
    assert_eq!(err.kind(), ErrorKind::Device);
    assert!(err.to_string().contains("resource busy"));
    assert!(format.calls().is_empty());
}

#[test]
fn test_readback_mismatch_is_reported() {
    let (planner, table, _) = planner();
    let device = TargetDevice::new("/dev/sdz", 16 * GIB);
    let layout = planner.plan(&device, GIB).unwrap();
    table.skew_readback(MIB);

    let err = planner.apply(&device, &layout).unwrap_err();
    assert!(err.to_string().contains("read-back mismatch"));
}

#[test]
fn test_nvme_partition_names() {
    let device = TargetDevice::new("/dev/nvme0n1", 32 * GIB);
    assert_eq!(device.partition_path(DATA_INDEX), PathBuf::from("/dev/nvme0n1p3"));
}

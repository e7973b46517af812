use super::layout::{PartitionLayout, RegionKind};
use super::tools::{FormatTool, PartitionTool};
use crate::device::TargetDevice;
use crate::options::PartitionOptions;
use bootstick_shared::errors::{BootstickError, BootstickResult};
use std::sync::Arc;

/// Computes and applies the three-region layout.
pub struct PartitionPlanner {
    table: Arc<dyn PartitionTool>,
    formatter: Arc<dyn FormatTool>,
    options: PartitionOptions,
}

impl PartitionPlanner {
    pub fn new(table: Arc<dyn PartitionTool>, formatter: Arc<dyn FormatTool>, options: PartitionOptions) -> Self {
        Self {
            table,
            formatter,
            options,
        }
    }

    /// Layout for `device` with room for `required_image_bytes` of images.
    pub fn plan(&self, device: &TargetDevice, required_image_bytes: u64) -> BootstickResult<PartitionLayout> {
        device.validate()?;
        let layout = PartitionLayout::compute(
            device.size_bytes,
            device.logical_sector_size,
            required_image_bytes,
            &self.options,
        )?;
        tracing::info!(
            device = %device.path.display(),
            system_boot_mib = layout.system_boot().size_bytes >> 20,
            data_start_mib = layout.data().start_bytes >> 20,
            data_mib = layout.data().size_bytes >> 20,
            "Planned partition layout"
        );
        Ok(layout)
    }

    /// Write `layout` to `device` and verify it by reading it back.
    ///
    /// The device is revalidated first. Any failure returns before
    /// [`format`](Self::format) could run.
    pub fn apply(&self, device: &TargetDevice, layout: &PartitionLayout) -> BootstickResult<()> {
        device.validate()?;
        if device.mounted_partitions().next().is_some() {
            return Err(BootstickError::Validation(format!(
                "{} still has mounted partitions",
                device.path.display()
            )));
        }

        let current = self.table.query_layout(&device.path).map_err(|e| {
            BootstickError::Validation(format!("{} cannot be queried: {}", device.path.display(), e))
        })?;
        if current.sector_size != layout.sector_size {
            return Err(BootstickError::Validation(format!(
                "{} reports {} byte sectors, layout was planned for {}",
                device.path.display(),
                current.sector_size,
                layout.sector_size
            )));
        }
        tracing::debug!(
            device = %device.path.display(),
            existing_partitions = current.entries.len(),
            "Replacing partition table"
        );

        self.table
            .apply_layout(&device.path, layout)
            .map_err(|e| BootstickError::Partition(format!("writing table to {}: {}", device.path.display(), e)))?;

        self.verify(device, layout)?;
        tracing::info!(device = %device.path.display(), "Partition table written and verified");
        Ok(())
    }

    /// Read the table back and compare it with `layout`.
    pub fn verify(&self, device: &TargetDevice, layout: &PartitionLayout) -> BootstickResult<()> {
        let readback = self
            .table
            .query_layout(&device.path)
            .map_err(|e| BootstickError::Partition(format!("reading table back: {}", e)))?;
        layout
            .matches(&readback)
            .map_err(|e| BootstickError::Partition(format!("read-back mismatch on {}: {}", device.path.display(), e)))
    }

    /// Create the SystemBoot and Data file systems.
    pub fn format(&self, device: &TargetDevice, layout: &PartitionLayout) -> BootstickResult<()> {
        for kind in [RegionKind::SystemBoot, RegionKind::Data] {
            let region = layout.region(kind);
            let Some(filesystem) = region.filesystem() else {
                continue;
            };
            let label = match kind {
                RegionKind::Data => &layout.data_label,
                _ => &layout.system_boot_label,
            };
            let partition = device.partition_path(region.index);
            tracing::debug!(
                partition = %partition.display(),
                fstype = filesystem.fstype(),
                label = %label,
                "Formatting partition"
            );
            self.formatter
                .format(&partition, filesystem, label)
                .map_err(|e| BootstickError::Partition(format!("formatting {}: {}", partition.display(), e)))?;
        }
        Ok(())
    }
}

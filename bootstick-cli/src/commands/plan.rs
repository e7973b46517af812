use super::{human_size, read_selections};
use bootstick::partition::{PartitionLayout, RegionKind};
use bootstick::TargetDevice;
use clap::Args;
use comfy_table::{Table, presets::UTF8_FULL_CONDENSED};
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Block device to plan for
    pub device: PathBuf,

    /// Size the layout must leave for these images
    #[arg(short, long)]
    pub selection: Option<PathBuf>,

    /// Plan for a device of this many MiB instead of probing it
    #[arg(long)]
    pub size_mib: Option<u64>,
}

pub fn execute(args: PlanArgs, global: &crate::cli::GlobalFlags) -> anyhow::Result<()> {
    let options = global.load_options()?;
    let device = match args.size_mib {
        Some(mib) => TargetDevice::new(&args.device, mib * 1024 * 1024),
        None => bootstick::device::probe(&args.device)?,
    };
    let required = match &args.selection {
        Some(path) => read_selections(path)?
            .iter()
            .map(|s| s.prepare().map(|p| p.size_bytes))
            .sum::<Result<u64, _>>()?,
        None => 0,
    };

    device.validate()?;
    let layout = PartitionLayout::compute(device.size_bytes, device.logical_sector_size, required, &options.partition)?;

    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_header(vec!["#", "NODE", "ROLE", "START", "SIZE", "FS"]);
    for region in &layout.regions {
        let role = match region.kind {
            RegionKind::BiosBoot => "BIOS boot",
            RegionKind::SystemBoot => "EFI system",
            RegionKind::Data => "data",
        };
        table.add_row(vec![
            region.index.to_string(),
            device.partition_path(region.index).display().to_string(),
            role.to_string(),
            format!("{} MiB", region.start_bytes >> 20),
            human_size(region.size_bytes),
            region.filesystem().map(|f| f.fstype().to_string()).unwrap_or_default(),
        ]);
    }
    println!("{table}");
    println!("images need {}", human_size(required));
    Ok(())
}

use super::{cancel_on_interrupt, print_report, progress_printer, read_selections};
use bootstick::{ProvisioningWorkflow, SystemTools};
use clap::Args;
use std::io::{BufRead, Write};
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct ProvisionArgs {
    /// Whole block device to erase, e.g. /dev/sdb
    pub device: PathBuf,

    /// YAML file listing the images to install
    #[arg(short, long)]
    pub selection: PathBuf,

    /// Do not ask before erasing the device
    #[arg(short, long)]
    pub yes: bool,
}

pub async fn execute(args: ProvisionArgs, global: &crate::cli::GlobalFlags) -> anyhow::Result<()> {
    let options = global.load_options()?;
    let selections = read_selections(&args.selection)?;
    let device = bootstick::device::probe(&args.device)?;
    device.validate()?;

    if !args.yes && !confirm_erase(&device)? {
        anyhow::bail!("Aborted, {} left untouched", device.path.display());
    }

    let workflow = ProvisioningWorkflow::new(SystemTools::host()?, options).with_progress(progress_printer());
    cancel_on_interrupt(workflow.control());

    let report = workflow.provision(&device, &selections).await?;
    print_report(&report);
    Ok(())
}

fn confirm_erase(device: &bootstick::TargetDevice) -> anyhow::Result<bool> {
    let model = device.model.as_deref().unwrap_or("unknown model");
    eprint!(
        "All data on {} ({}, {}) will be erased. Continue? [y/N] ",
        device.path.display(),
        model,
        super::human_size(device.size_bytes)
    );
    std::io::stderr().flush()?;
    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}

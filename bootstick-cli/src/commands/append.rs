use super::{cancel_on_interrupt, print_report, progress_printer, read_selections};
use bootstick::{ProvisioningWorkflow, SystemTools};
use clap::Args;
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct AppendArgs {
    /// Device provisioned earlier by bootstick
    pub device: PathBuf,

    /// YAML file listing the images to add
    #[arg(short, long)]
    pub selection: PathBuf,
}

pub async fn execute(args: AppendArgs, global: &crate::cli::GlobalFlags) -> anyhow::Result<()> {
    let options = global.load_options()?;
    let selections = read_selections(&args.selection)?;
    let device = bootstick::device::probe(&args.device)?;

    let workflow = ProvisioningWorkflow::new(SystemTools::host()?, options).with_progress(progress_printer());
    cancel_on_interrupt(workflow.control());

    let report = workflow.append(&device, &selections).await?;
    print_report(&report);
    Ok(())
}

pub mod append;
pub mod check;
pub mod manifest;
pub mod plan;
pub mod provision;
pub mod render;

use bootstick::{ImageSelection, ProgressCallback, ProgressEvent, ProvisionReport, TransferControl};
use parking_lot::Mutex;
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;

/// Images to install, as written in a selection file.
#[derive(Debug, Deserialize)]
pub struct SelectionFile {
    pub images: Vec<ImageSelection>,
}

pub fn read_selections(path: &Path) -> anyhow::Result<Vec<ImageSelection>> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read selection file {}: {}", path.display(), e))?;
    let file: SelectionFile = serde_yaml::from_str(&text)
        .map_err(|e| anyhow::anyhow!("Invalid selection file {}: {}", path.display(), e))?;
    Ok(file.images)
}

/// Prints a line whenever overall progress moves by a whole percent or the
/// detail changes.
pub fn progress_printer() -> ProgressCallback {
    let last = Mutex::new((-1i64, String::new()));
    Arc::new(move |event: &ProgressEvent| {
        let percent = event.percent.floor() as i64;
        let mut last = last.lock();
        if percent == last.0 && event.detail == last.1 {
            return;
        }
        *last = (percent, event.detail.clone());
        eprintln!("[{:>3}%] {:<18} {}", percent, event.stage, event.detail);
    })
}

/// Cancel `control` on the first Ctrl-C. The run then stops at its next
/// cancellation point.
pub fn cancel_on_interrupt(control: TransferControl) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Interrupted, stopping after the current step...");
            control.cancel();
        }
    });
}

pub fn print_report(report: &ProvisionReport) {
    for warning in report.warnings() {
        eprintln!("Warning: {}", warning);
    }
    for path in &report.skipped {
        println!("skipped {} (already on device)", path);
    }
    for entry in &report.pruned {
        println!("removed {} (image missing)", entry.name);
    }
    for entry in &report.added {
        println!("added   {}", entry.name);
    }
    println!(
        "{} boot entries on device, data partition label {}",
        report.manifest.entries.len(),
        report.layout.data_label
    );
}

pub fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

use super::human_size;
use bootstick::manifest::ManifestStore;
use clap::Args;
use comfy_table::{Table, presets::UTF8_FULL_CONDENSED};
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct ManifestArgs {
    /// Mount point of the device's data partition
    pub data_mount: PathBuf,

    /// Print the raw manifest as JSON
    #[arg(long)]
    pub json: bool,
}

pub fn execute(args: ManifestArgs, _global: &crate::cli::GlobalFlags) -> anyhow::Result<()> {
    let store = ManifestStore::new(&args.data_mount);
    let Some(manifest) = store.load()? else {
        anyhow::bail!("No manifest at {}", store.path().display());
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&manifest)?);
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_header(vec!["KEY", "NAME", "FAMILY", "SIZE", "RAM", "PATH"]);
    for entry in &manifest.entries {
        table.add_row(vec![
            entry.hotkey.map(|k| k.to_string()).unwrap_or_default(),
            entry.name.clone(),
            entry.family.to_string(),
            human_size(entry.size_bytes),
            if entry.ram_boot { "yes".into() } else { String::new() },
            entry.image_path.clone(),
        ]);
    }
    println!("{table}");
    println!(
        "label {}, written by bootstick {}, updated {}",
        manifest.layout.data_label,
        manifest.tool_version,
        manifest.updated_at.format("%Y-%m-%d %H:%M")
    );

    let freshness = store.freshness(&manifest);
    for path in &freshness.missing {
        eprintln!("Warning: {} is listed but missing", path);
    }
    for path in &freshness.orphaned {
        eprintln!("Warning: {} is on the device but not listed", path);
    }
    Ok(())
}

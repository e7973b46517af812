use bootstick::BootConfigGenerator;
use bootstick::manifest::ManifestStore;
use clap::Args;
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct RenderArgs {
    /// Mount point of the device's data partition
    pub data_mount: PathBuf,

    /// Also replace the boot script on the device
    #[arg(long)]
    pub write: bool,
}

pub fn execute(args: RenderArgs, global: &crate::cli::GlobalFlags) -> anyhow::Result<()> {
    let options = global.load_options()?;
    let store = ManifestStore::new(&args.data_mount);
    let Some(manifest) = store.load()? else {
        anyhow::bail!("No manifest at {}", store.path().display());
    };

    let generator = BootConfigGenerator::new(options.boot_menu);
    let text = generator.generate_from_manifest(&manifest)?;
    if args.write {
        let path = generator.write(&args.data_mount, &text)?;
        eprintln!("Wrote {}", path.display());
    } else {
        print!("{}", text);
    }
    Ok(())
}

use clap::Args;
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Boot script to check
    pub script: PathBuf,
}

pub fn execute(args: CheckArgs) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(&args.script)
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", args.script.display(), e))?;
    let violations = bootstick::bootcfg::check(&text);
    if violations.is_empty() {
        println!("{}: ok", args.script.display());
        return Ok(());
    }
    for violation in &violations {
        println!("{}: {}", args.script.display(), violation);
    }
    anyhow::bail!("{} problem(s) found", violations.len());
}

use crate::commands;
use bootstick::options::ProvisionOptions;
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

const CONFIG_FILE: &str = "config.yaml";
const LOG_FILE: &str = "bootstick.log";

#[derive(Parser, Debug)]
#[command(author, version, about = "Build multi-distribution boot sticks")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalFlags,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Repartition a device and install the selected images
    Provision(commands::provision::ProvisionArgs),
    /// Add images to a device provisioned earlier
    Append(commands::append::AppendArgs),
    /// Show the manifest stored on a mounted data partition
    Manifest(commands::manifest::ManifestArgs),
    /// Regenerate the boot menu from a stored manifest
    Render(commands::render::RenderArgs),
    /// Check a boot script for constructs GRUB rejects
    Check(commands::check::CheckArgs),
    /// Print the partition layout for a device without writing it
    Plan(commands::plan::PlanArgs),
}

#[derive(Args, Debug)]
pub struct GlobalFlags {
    /// Options file (YAML)
    #[arg(long, global = true, env = "BOOTSTICK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory for the rolling log file
    #[arg(long, global = true, env = "BOOTSTICK_LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    /// Log debug output to the terminal
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

impl GlobalFlags {
    /// Options from `--config`, `BOOTSTICK_CONFIG` or the user config
    /// directory, in that order. Defaults when none exists.
    pub fn load_options(&self) -> anyhow::Result<ProvisionOptions> {
        let path = match &self.config {
            Some(path) => Some(path.clone()),
            None => dirs::config_dir()
                .map(|dir| dir.join("bootstick").join(CONFIG_FILE))
                .filter(|path| path.is_file()),
        };
        let Some(path) = path else {
            tracing::debug!("No options file, using defaults");
            return Ok(ProvisionOptions::default());
        };

        let options = load_options_file(&path)?;
        options.validate()?;
        tracing::debug!(path = %path.display(), "Loaded options");
        Ok(options)
    }

    /// Terminal output on stderr plus a daily log file. The returned guard
    /// flushes the file writer on drop.
    pub fn init_logging(&self) -> Option<tracing_appender::non_blocking::WorkerGuard> {
        let default_level = if self.verbose { "debug" } else { "warn" };
        let terminal_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
        let terminal = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_filter(terminal_filter);

        let log_dir = self
            .log_dir
            .clone()
            .or_else(|| dirs::data_local_dir().map(|dir| dir.join("bootstick").join("logs")));
        let file = log_dir.and_then(|dir| match std::fs::create_dir_all(&dir) {
            Ok(()) => Some(tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, LOG_FILE))),
            Err(e) => {
                eprintln!("Warning: log file disabled: {}", e);
                None
            }
        });

        match file {
            Some((writer, guard)) => {
                let file_layer = fmt::layer()
                    .with_writer(writer)
                    .with_target(true)
                    .with_ansi(false)
                    .with_filter(EnvFilter::new("info"));
                let _ = tracing_subscriber::registry().with(terminal).with(file_layer).try_init();
                Some(guard)
            }
            None => {
                let _ = tracing_subscriber::registry().with(terminal).try_init();
                None
            }
        }
    }
}

pub fn load_options_file(path: &Path) -> anyhow::Result<ProvisionOptions> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?;
    serde_yaml::from_str(&text).map_err(|e| anyhow::anyhow!("Invalid options in {}: {}", path.display(), e))
}

//! bootstick command-line front end.

mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Command};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let _log_guard = cli.global.init_logging();

    let result = match cli.command {
        Command::Provision(args) => commands::provision::execute(args, &cli.global).await,
        Command::Append(args) => commands::append::execute(args, &cli.global).await,
        Command::Manifest(args) => commands::manifest::execute(args, &cli.global),
        Command::Render(args) => commands::render::execute(args, &cli.global),
        Command::Check(args) => commands::check::execute(args),
        Command::Plan(args) => commands::plan::execute(args, &cli.global),
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

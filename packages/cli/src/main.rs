mod commands;

use clap::{Parser, Subcommand};
use colored::Colorize;
use commands::{init, simulate, InitArgs, SimulateArgs};
use tracing_subscriber::EnvFilter;

/// Collab CLI - run and exercise the document sync engine
#[derive(Parser, Debug)]
#[command(name = "collab")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log sync traffic (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write a default collab.config.json
    Init(InitArgs),

    /// Run a manager and several editing clients in-process
    Simulate(SimulateArgs),
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    // A subscriber may already be installed when embedded
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = std::env::current_dir()
        .map_err(anyhow::Error::from)
        .and_then(|cwd| match cli.command {
            Command::Init(args) => init(args, &cwd),
            Command::Simulate(args) => simulate(args, &cwd),
        });

    if let Err(err) = result {
        eprintln!();
        eprintln!("{} {}", "Error:".red().bold(), err);
        eprintln!();
        std::process::exit(1);
    }
}

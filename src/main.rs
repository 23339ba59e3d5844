//! partkv - unified CLI entrypoint.
//!
//! Usage:
//!   partkv start --config config/partkv.toml
//!   partkv config validate --config config/partkv.toml
//!   partkv inspect wal <segment-or-directory>...

use anyhow::Result;
use clap::Parser;
use partkv::cli::commands::{run_config, run_inspect, run_start};
use partkv::cli::{Cli, Commands};
use std::path::PathBuf;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Determine config path - use global --config or default
    let config_path = cli
        .config
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config/partkv.toml"));

    match cli.command {
        Commands::Start(args) => run_start(args, &config_path, cli.log_level),
        Commands::Config(args) => run_config(args),
        Commands::Inspect(args) => run_inspect(args),
    }
}

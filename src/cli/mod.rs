//! Command-line interface.
//!
//! Unified CLI for partkv operations.

pub mod commands;

use clap::{Parser, Subcommand};

/// partkv - partitioned, replicated key-value store node.
#[derive(Parser, Debug)]
#[command(name = "partkv")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path.
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start a store node.
    Start(commands::StartArgs),
    /// Configuration operations.
    Config(commands::ConfigArgs),
    /// Inspect partition logs.
    Inspect(commands::InspectArgs),
}

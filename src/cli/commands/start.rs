//! Start command implementation.

use crate::core::config::{Config, ConfigOverrides};
use crate::core::runtime::Runtime;
use anyhow::{Context, Result};
use clap::Args;
use std::path::Path;

/// Start a store node.
#[derive(Args, Debug, Default)]
pub struct StartArgs {
    /// Override the service address.
    #[arg(long)]
    pub local_addr: Option<String>,

    /// Override the engine root.
    #[arg(long)]
    pub data_path: Option<String>,

    /// Override the partition log root.
    #[arg(long)]
    pub wal_path: Option<String>,
}

/// Initialize tracing subscriber if the telemetry feature is enabled.
#[cfg(feature = "telemetry")]
fn init_tracing(level: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .init();
}

#[cfg(not(feature = "telemetry"))]
fn init_tracing(_level: &str) {}

/// Load the config, then run a node on a runtime sized by `[runtime]` until
/// shutdown.
pub fn run_start(args: StartArgs, config_path: &Path, log_level: Option<String>) -> Result<()> {
    let mut config = Config::from_file(config_path)
        .with_context(|| format!("failed to load config from {:?}", config_path))?;
    config.apply_overrides(&ConfigOverrides {
        log_level,
        local_addr: args.local_addr,
        data_path: args.data_path,
        wal_path: args.wal_path,
    });
    config.validate().context("invalid configuration after overrides")?;

    init_tracing(&config.telemetry.log_level);

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if config.runtime.worker_threads > 0 {
        builder.worker_threads(config.runtime.worker_threads);
    }
    let tokio_runtime = builder.build().context("failed to build tokio runtime")?;

    tokio_runtime.block_on(async move {
        let mut runtime = Runtime::new(config)?;
        runtime.run().await
    })
}

//! cfgstored: configuration store daemon.
//!
//! # Architecture Overview
//!
//! ```text
//!                 ┌──────────────────────────────────────────────┐
//!                 │                  cfgstored                   │
//!   cfgctl ──────▶│  admin (axum) ──▶ rpc::RpcDriver             │
//!                 │                      │ ChangeContext         │
//!                 │                      ▼                       │
//!                 │                 store::ConfigStore           │
//!                 │          (global Block + callback log)       │
//!                 │                      │                       │
//!                 │        ┌─────────────┼─────────────┐         │
//!                 │        ▼             ▼             ▼         │
//!                 │    worker 0      worker 1  ...  worker n     │
//!                 │  (ProcessHandle::update on every tick)       │
//!                 └──────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use cfgstore::config::{load_config, DaemonConfig};
use cfgstore::lifecycle;
use cfgstore::observability::logging::init_logging;

#[derive(Parser)]
#[command(name = "cfgstored")]
#[command(about = "Shared configuration store daemon", long_about = None)]
struct Args {
    /// Path to the TOML configuration file; defaults are used without one.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => DaemonConfig::default(),
    };
    init_logging(&config.observability);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = ?args.config,
        workers = config.store.workers,
        shm_capacity = config.store.shm_capacity,
        "cfgstored starting"
    );

    lifecycle::run(config).await?;
    Ok(())
}

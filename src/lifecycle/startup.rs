//! Startup orchestration.
//!
//! # Responsibilities
//! - Declare the built-in `core` group and the configured script variables
//! - Finalize the store (first Block)
//! - Start the worker pool and the admin API
//! - Wait for a shutdown signal and tear down in reverse order
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - The admin API starts last (operators only reach a live store)

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpListener;

use crate::admin::{setup_admin_router, AdminState};
use crate::config::{ConfigError, DaemonConfig, DeclareKind};
use crate::lifecycle::signals::wait_for_shutdown_signal;
use crate::lifecycle::Shutdown;
use crate::observability::metrics::init_metrics;
use crate::rpc::RpcDriver;
use crate::store::{CfgError, ConfigStore, GroupId, ShmPool, VarDef, VarFlags};
use crate::workers::WorkerPool;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] CfgError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid address: {0}")]
    Address(#[from] std::net::AddrParseError),

    #[error("metrics exporter: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),
}

/// Declare the daemon's own variables.
pub fn declare_core(store: &ConfigStore, config: &DaemonConfig) -> Result<GroupId, CfgError> {
    let workers = i32::try_from(config.store.workers).unwrap_or(i32::MAX);
    store.declare_group(
        "core",
        vec![
            VarDef::int("debug", 0)
                .range(0, 9)
                .flags(VarFlags::ATOMIC)
                .descr("Debug level"),
            VarDef::str("server_name", "cfgstored")
                .descr("Name reported by every worker")
                .on_set_child(|group, var| {
                    tracing::info!(group, var, "Worker picked up new server name");
                }),
            VarDef::int("workers", workers)
                .flags(VarFlags::READONLY)
                .descr("Number of worker processes"),
        ],
        None,
    )
}

/// Build a live store from the daemon configuration.
pub fn build_store(config: &DaemonConfig) -> Result<ConfigStore, CfgError> {
    let store = ConfigStore::new(ShmPool::new(config.store.shm_capacity));
    declare_core(&store, config)?;
    for decl in &config.declare {
        match &decl.kind {
            DeclareKind::Int { default, min, max } => {
                store.declare_single_int(&decl.group, &decl.name, *default, *min, *max, &decl.descr)?
            }
            DeclareKind::Str { default } => {
                store.declare_single_str(&decl.group, &decl.name, default, &decl.descr)?
            }
        };
    }
    store.finalize()?;
    let status = store.status();
    tracing::info!(
        groups = status.groups,
        shm_used = status.shm_used,
        shm_capacity = status.shm_capacity,
        "Configuration store is live"
    );
    Ok(store)
}

/// Run the daemon until SIGINT/SIGTERM.
pub async fn run(config: DaemonConfig) -> Result<(), StartupError> {
    if config.observability.metrics_enabled {
        let addr: SocketAddr = config.observability.metrics_address.parse()?;
        init_metrics(addr)?;
    }

    let store = build_store(&config)?;
    let shutdown = Shutdown::new();
    let interval = Duration::from_millis(config.store.update_interval_ms);
    let workers = WorkerPool::spawn(&store, config.store.workers, interval, &shutdown)?;

    let admin = if config.admin.enabled {
        let listener = TcpListener::bind(&config.admin.bind_address).await?;
        tracing::info!(address = %listener.local_addr()?, "Admin API listening");
        let state = AdminState::new(
            store.clone(),
            Arc::new(RpcDriver::new(&store)),
            &config.admin.api_key,
        );
        let router = setup_admin_router(state);
        let mut stop = shutdown.subscribe();
        Some(tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    let _ = stop.recv().await;
                })
                .await
        }))
    } else {
        None
    };

    wait_for_shutdown_signal().await;
    shutdown.trigger();

    if let Some(task) = admin {
        match task.await {
            Ok(Err(e)) => tracing::error!(error = %e, "Admin API failed"),
            Err(e) => tracing::error!(error = %e, "Admin API task failed"),
            Ok(Ok(())) => {}
        }
    }
    let reports = workers.join().await;
    let callbacks: u64 = reports.iter().map(|r| r.callbacks).sum();
    store.destroy_contexts();

    tracing::info!(
        workers = reports.len(),
        callbacks,
        version = store.block_version(),
        pending_callbacks = store.pending_callbacks(),
        "Shutdown complete"
    );
    Ok(())
}

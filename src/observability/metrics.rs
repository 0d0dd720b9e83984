//! Metrics collection and exposition.
//!
//! # Metrics
//! - `cfg_installs_total` (counter): Blocks installed, by `kind`
//!   (set, commit, delete, add_instance, del_instance, atomic)
//! - `cfg_rejected_total` (counter): refused operations, by `reason`
//! - `cfg_callbacks_total` (counter): per-child callbacks run
//! - `cfg_block_version` (gauge): version of the global Block
//! - `cfg_shm_used_bytes` (gauge): bytes charged to the pool
//!
//! # Design Decisions
//! - The store records through the `metrics` facade; without an installed
//!   recorder every update is a no-op

use std::net::SocketAddr;

use metrics::{describe_counter, describe_gauge, Unit};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Attach descriptions to the store's metrics.
pub fn describe_metrics() {
    describe_counter!("cfg_installs_total", "Configuration Blocks installed");
    describe_counter!("cfg_rejected_total", "Configuration operations refused");
    describe_counter!("cfg_callbacks_total", "Per-child callbacks run by workers");
    describe_gauge!("cfg_block_version", "Version of the global configuration Block");
    describe_gauge!(
        "cfg_shm_used_bytes",
        Unit::Bytes,
        "Bytes charged to the shared-memory pool"
    );
}

/// Start the Prometheus exporter on `addr`. Must run inside a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    describe_metrics();
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

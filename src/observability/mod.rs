//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! store, rpc, workers, admin produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges)
//!
//! Consumers:
//!     → stdout (pretty or JSON lines)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - The library only emits through the `tracing` and `metrics` facades;
//!   the daemon decides where they go
//! - Metrics are cheap (atomic increments)

pub mod logging;
pub mod metrics;

//! Worker processes.
//!
//! # Data Flow
//! ```text
//! lifecycle::startup
//!     → ConfigStore::register_children(n)
//!     → WorkerPool::spawn (one Tokio task per worker)
//!         → ProcessHandle::child_init
//!         → every tick: update() (adopt Block, run per-child callbacks)
//!     → shutdown signal → child_destroy
//! ```
//!
//! Workers stand in for the SIP worker processes: they only read
//! configuration and never write it.

pub mod worker;

pub use worker::{Worker, WorkerReport};

use std::time::Duration;

use tokio::task::JoinHandle;

use crate::lifecycle::Shutdown;
use crate::store::{ConfigStore, Result};

/// A set of running workers.
pub struct WorkerPool {
    tasks: Vec<JoinHandle<WorkerReport>>,
}

impl WorkerPool {
    /// Register `count` children and start them.
    pub fn spawn(
        store: &ConfigStore,
        count: usize,
        interval: Duration,
        shutdown: &Shutdown,
    ) -> Result<Self> {
        store.register_children(count);
        let mut tasks = Vec::with_capacity(count);
        for id in 0..count {
            let worker = Worker::new(id, store, interval)?;
            tasks.push(tokio::spawn(worker.run(shutdown.subscribe())));
        }
        tracing::info!(workers = count, interval_ms = interval.as_millis() as u64, "Worker pool started");
        Ok(Self { tasks })
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Wait for every worker to exit.
    pub async fn join(self) -> Vec<WorkerReport> {
        let mut reports = Vec::with_capacity(self.tasks.len());
        for task in self.tasks {
            match task.await {
                Ok(report) => reports.push(report),
                Err(e) => tracing::error!(error = %e, "Worker task failed"),
            }
        }
        reports
    }
}

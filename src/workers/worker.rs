//! A single worker loop.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast;
use tokio::time;

use crate::store::{ConfigStore, GroupId, ProcessHandle, Result};

/// What a worker did before it exited.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkerReport {
    pub id: usize,
    pub adoptions: u64,
    pub callbacks: u64,
    pub last_version: u64,
}

pub struct Worker {
    id: usize,
    handle: ProcessHandle,
    interval: Duration,
    debug: Option<(GroupId, usize)>,
}

impl Worker {
    /// Join the configuration as a registered child.
    pub fn new(id: usize, store: &ConfigStore, interval: Duration) -> Result<Self> {
        let handle = ProcessHandle::child_init(store)?;
        let debug = store
            .registry()
            .lookup_var("core", "debug")
            .ok()
            .map(|(group, mapping)| (group.id, mapping.index));
        Ok(Self {
            id,
            handle,
            interval,
            debug,
        })
    }

    pub fn handle(&self) -> &ProcessHandle {
        &self.handle
    }

    /// `core.debug` as this worker currently sees it.
    pub fn debug_level(&self) -> i32 {
        self.debug
            .and_then(|(group, index)| self.handle.get_int(group, index))
            .unwrap_or(0)
    }

    /// One safe point: adopt the latest Block if it moved.
    pub fn tick(&mut self, report: &mut WorkerReport) {
        let before = self.handle.version();
        let ran = self.handle.update();
        let after = self.handle.version();
        if after != before {
            report.adoptions += 1;
            tracing::debug!(
                worker = self.id,
                from = before,
                to = after,
                callbacks = ran,
                debug = self.debug_level(),
                "Worker adopted configuration"
            );
        }
        report.callbacks += ran as u64;
        report.last_version = after;
    }

    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> WorkerReport {
        let mut report = WorkerReport {
            id: self.id,
            last_version: self.handle.version(),
            ..Default::default()
        };
        tracing::debug!(worker = self.id, version = report.last_version, "Worker starting");

        let mut ticker = time::interval(self.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick(&mut report),
                _ = shutdown.recv() => {
                    tracing::debug!(worker = self.id, "Worker received shutdown signal");
                    break;
                }
            }
        }

        self.handle.child_destroy();
        report
    }
}

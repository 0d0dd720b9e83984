//! Shutdown coordination for the daemon.
//!
//! Workers and the admin server each hold a receiver; `run` triggers the
//! signal once SIGINT or SIGTERM arrives and then joins them.

use tokio::sync::broadcast;

/// Fan-out stop signal for every long-running task of the daemon.
pub struct Shutdown {
    /// One-slot channel; a single send wakes every subscriber.
    tx: broadcast::Sender<()>,
}

impl Shutdown {
    /// Create a coordinator with no subscribers yet.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    /// Receiver for one task. Subscribe before the task is spawned, a
    /// receiver created after `trigger` never sees the signal.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Signal every subscriber. A no-op when nothing is listening.
    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }

    /// Tasks still listening; drops to zero once every worker has left.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

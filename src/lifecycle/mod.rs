//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → Declare groups → Finalize store → Spawn workers → Serve admin
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop admin API → Workers leave (child_destroy) → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: declarations first, then the first Block, then workers
//! - The admin API starts last, once the store is live

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use startup::{build_store, run, StartupError};

//! Shared configuration store for a multi-process SIP server.

pub mod admin;
pub mod config;
pub mod lifecycle;
pub mod observability;
pub mod rpc;
pub mod store;
pub mod workers;

pub use config::DaemonConfig;
pub use lifecycle::Shutdown;
pub use rpc::{Command, Reply, RpcDriver};
pub use store::{ChangeContext, ConfigStore, ProcessHandle, ShmPool};

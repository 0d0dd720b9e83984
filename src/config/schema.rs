//! Configuration schema definitions.

use serde::{Deserialize, Serialize};

/// Root configuration for the store daemon.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub admin: AdminConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Script variables declared at startup.
    #[serde(default)]
    pub declare: Vec<DeclareConfig>,
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Serve the admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}

/// Shared store and worker pool.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Shared-memory pool capacity in bytes.
    pub shm_capacity: usize,

    /// Number of worker processes.
    pub workers: usize,

    /// How often a worker adopts the latest configuration.
    pub update_interval_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            shm_capacity: 32 * 1024 * 1024,
            workers: 4,
            update_interval_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` wins if set.
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable the Prometheus exporter.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

/// One script variable, e.g.
///
/// ```toml
/// [[declare]]
/// group = "pool"
/// name = "weight"
/// type = "int"
/// default = 1
/// min = 0
/// max = 100
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeclareConfig {
    pub group: String,
    pub name: String,

    #[serde(default)]
    pub descr: String,

    #[serde(flatten)]
    pub kind: DeclareKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DeclareKind {
    Int {
        #[serde(default)]
        default: i32,
        #[serde(default)]
        min: i32,
        #[serde(default)]
        max: i32,
    },
    Str {
        #[serde(default)]
        default: String,
    },
}

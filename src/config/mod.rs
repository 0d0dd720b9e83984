//! Daemon configuration.
//!
//! # Data Flow
//! ```text
//! cfgstore.toml
//!     → loader.rs (read & deserialize)
//!     → validation.rs (semantic checks)
//!     → DaemonConfig (validated, immutable)
//!     → lifecycle::startup (pool, declarations, workers, admin)
//! ```
//!
//! # Design Decisions
//! - Daemon settings are read once at startup; store variables change at
//!   runtime through change contexts, not through this file
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{DaemonConfig, DeclareConfig, DeclareKind, LogFormat};
pub use validation::{validate_config, ValidationError};

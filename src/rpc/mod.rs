//! Operator command surface.
//!
//! # Data Flow
//! ```text
//! FIFO line / JSON body / cfgctl
//!     → command.rs (Command, parse_line)
//!     → dispatch.rs (RpcDriver::execute on its ChangeContext)
//!     → Reply (serialized back to the caller)
//! ```
//!
//! Transports only marshal; every rule about what may change lives in the
//! store.

pub mod command;
pub mod dispatch;

pub use command::{parse_line, Command, ParseError, WireValue};
pub use dispatch::{NamedValue, Reply, RpcDriver, RpcError};

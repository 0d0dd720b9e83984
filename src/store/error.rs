//! Error taxonomy of the configuration store.
//!
//! Schema errors surface once at startup. Everything else is returned to the
//! caller of a runtime operation and leaves the installed Block untouched.

use thiserror::Error;

pub use crate::store::codec::ConversionError;
pub use crate::store::shm::AllocError;
use crate::store::value::VarType;

/// Declaration failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("group '{0}' is already declared")]
    DuplicateGroup(String),

    #[error("variable '{group}.{var}' is declared twice")]
    DuplicateVariable { group: String, var: String },

    #[error("group '{group}' is {computed} bytes, caller expects {expected}")]
    LayoutMismatch {
        group: String,
        expected: usize,
        computed: usize,
    },

    #[error("{group}.{var}: {reason}")]
    UnsupportedType {
        group: String,
        var: String,
        reason: &'static str,
    },

    #[error("{group}.{var}: {reason}")]
    InvalidCallbackCombination {
        group: String,
        var: String,
        reason: &'static str,
    },

    #[error("group '{0}' declares no variables")]
    EmptyGroup(String),

    #[error("the configuration is already finalized, cannot declare '{0}'")]
    TooLate(String),
}

/// Runtime operation failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CfgError {
    #[error("change context is undefined")]
    ContextUndefined,

    #[error("group not found: {0}")]
    GroupNotFound(String),

    #[error("variable not found: {group}.{var}")]
    VariableNotFound { group: String, var: String },

    #[error("variable is read-only: {group}.{var}")]
    ReadOnlyVariable { group: String, var: String },

    #[error("variable does not support multiple values: {group}.{var}")]
    UnsupportedMultiValue { group: String, var: String },

    #[error("{group}.{var}: value {value} is out of range [{min}, {max}]")]
    OutOfRange {
        group: String,
        var: String,
        value: i32,
        min: i32,
        max: i32,
    },

    #[error("{group}.{var}: expected a {expected} value, got {got}")]
    TypeMismatch {
        group: String,
        var: String,
        expected: VarType,
        got: VarType,
    },

    #[error("{group}.{var}: fixup rejected the value: {reason}")]
    FixupRejected {
        group: String,
        var: String,
        reason: String,
    },

    #[error("{group}.{var} has an on-change handler and cannot be read directly")]
    NotDirectlyReadable { group: String, var: String },

    #[error("group instance not found: {group}[{id}]")]
    InstanceNotFound { group: String, id: u32 },

    #[error("the configuration is not finalized yet")]
    NotLive,

    #[error(transparent)]
    Conversion(#[from] ConversionError),

    #[error(transparent)]
    Allocation(#[from] AllocError),

    #[error(transparent)]
    Schema(#[from] SchemaError),
}

impl CfgError {
    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            CfgError::ContextUndefined => "context_undefined",
            CfgError::GroupNotFound(_) => "group_not_found",
            CfgError::VariableNotFound { .. } => "variable_not_found",
            CfgError::ReadOnlyVariable { .. } => "read_only",
            CfgError::UnsupportedMultiValue { .. } => "unsupported_multi_value",
            CfgError::OutOfRange { .. } => "out_of_range",
            CfgError::TypeMismatch { .. } => "type_mismatch",
            CfgError::FixupRejected { .. } => "fixup_rejected",
            CfgError::NotDirectlyReadable { .. } => "not_directly_readable",
            CfgError::InstanceNotFound { .. } => "instance_not_found",
            CfgError::NotLive => "not_live",
            CfgError::Conversion(_) => "conversion",
            CfgError::Allocation(_) => "allocation",
            CfgError::Schema(_) => "schema",
        }
    }
}

pub type Result<T, E = CfgError> = std::result::Result<T, E>;

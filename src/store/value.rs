//! Typed configuration values.
//!
//! # Responsibilities
//! - Name the storage types a variable can have and the input types the set
//!   API accepts
//! - Represent caller-side values (`Value`) and in-store values
//!   (`SharedValue`, strings cloned into the shared pool)
//!
//! # Design Decisions
//! - Storage type and input type are two separate enums; a variable declares
//!   both and the schema checks the combination once at declaration time
//! - Opaque pointers are `Arc<dyn Any>`; equality is identity

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::store::shm::{AllocError, ShmPool, ShmStr};

/// Opaque value produced by an on-change handler for pointer variables.
pub type Opaque = Arc<dyn Any + Send + Sync>;

/// How a variable is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VarType {
    /// 32-bit signed integer.
    Int,
    /// Zero-terminated string, may be NULL.
    String,
    /// Length-prefixed string.
    Str,
    /// Opaque pointer, only settable through an on-change handler.
    Pointer,
}

/// What the set API accepts for a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputType {
    Int,
    String,
    Str,
}

impl InputType {
    /// The storage type with the same representation.
    pub fn var_type(self) -> VarType {
        match self {
            InputType::Int => VarType::Int,
            InputType::String => VarType::String,
            InputType::Str => VarType::Str,
        }
    }
}

impl fmt::Display for VarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            VarType::Int => "int",
            VarType::String => "string",
            VarType::Str => "str",
            VarType::Pointer => "pointer",
        })
    }
}

impl fmt::Display for InputType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.var_type(), f)
    }
}

/// A value as supplied by, or returned to, a caller.
#[derive(Clone)]
pub enum Value {
    Int(i32),
    String(Option<String>),
    Str(String),
    Pointer(Option<Opaque>),
}

impl Value {
    pub fn string(s: impl Into<String>) -> Self {
        Value::String(Some(s.into()))
    }

    pub fn str(s: impl Into<String>) -> Self {
        Value::Str(s.into())
    }

    pub fn var_type(&self) -> VarType {
        match self {
            Value::Int(_) => VarType::Int,
            Value::String(_) => VarType::String,
            Value::Str(_) => VarType::Str,
            Value::Pointer(_) => VarType::Pointer,
        }
    }

    /// The input type this value can be submitted as, if any.
    pub fn input_type(&self) -> Option<InputType> {
        match self {
            Value::Int(_) => Some(InputType::Int),
            Value::String(_) => Some(InputType::String),
            Value::Str(_) => Some(InputType::Str),
            Value::Pointer(_) => None,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => s.as_deref(),
            Value::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Pointer(a), Value::Pointer(b)) => opaque_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => f.debug_tuple("Int").field(v).finish(),
            Value::String(s) => f.debug_tuple("String").field(s).finish(),
            Value::Str(s) => f.debug_tuple("Str").field(s).finish(),
            Value::Pointer(p) => f.debug_tuple("Pointer").field(&p.as_ref().map(Arc::as_ptr)).finish(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::String(Some(s)) | Value::Str(s) => write!(f, "\"{}\"", s),
            Value::String(None) => f.write_str("NULL"),
            Value::Pointer(Some(p)) => write!(f, "{:p}", Arc::as_ptr(p)),
            Value::Pointer(None) => f.write_str("NULL"),
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(Some(s.to_string()))
    }
}

/// A value stored inside a Block or an instance array.
#[derive(Clone)]
pub enum SharedValue {
    Int(i32),
    String(Option<ShmStr>),
    Str(ShmStr),
    Pointer(Option<Opaque>),
}

impl SharedValue {
    /// Clone a caller value into the shared pool.
    pub fn from_value(value: &Value, pool: &ShmPool) -> Result<Self, AllocError> {
        Ok(match value {
            Value::Int(v) => SharedValue::Int(*v),
            Value::String(None) => SharedValue::String(None),
            Value::String(Some(s)) => SharedValue::String(Some(pool.alloc_str(s)?)),
            Value::Str(s) => SharedValue::Str(pool.alloc_str(s)?),
            Value::Pointer(p) => SharedValue::Pointer(p.clone()),
        })
    }

    /// Copy the value out of the pool.
    pub fn to_value(&self) -> Value {
        match self {
            SharedValue::Int(v) => Value::Int(*v),
            SharedValue::String(s) => Value::String(s.as_ref().map(|s| s.to_string())),
            SharedValue::Str(s) => Value::Str(s.to_string()),
            SharedValue::Pointer(p) => Value::Pointer(p.clone()),
        }
    }

    pub fn var_type(&self) -> VarType {
        match self {
            SharedValue::Int(_) => VarType::Int,
            SharedValue::String(_) => VarType::String,
            SharedValue::Str(_) => VarType::Str,
            SharedValue::Pointer(_) => VarType::Pointer,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            SharedValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// String content; `None` for NULL strings and non-string values.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            SharedValue::String(s) => s.as_deref(),
            SharedValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_pointer(&self) -> Option<&Opaque> {
        match self {
            SharedValue::Pointer(p) => p.as_ref(),
            _ => None,
        }
    }
}

impl PartialEq for SharedValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (SharedValue::Int(a), SharedValue::Int(b)) => a == b,
            (SharedValue::String(a), SharedValue::String(b)) => a == b,
            (SharedValue::Str(a), SharedValue::Str(b)) => a == b,
            (SharedValue::Pointer(a), SharedValue::Pointer(b)) => opaque_eq(a, b),
            _ => false,
        }
    }
}

impl PartialEq<Value> for SharedValue {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (SharedValue::Int(a), Value::Int(b)) => a == b,
            (SharedValue::String(a), Value::String(b)) => a.as_deref() == b.as_deref(),
            (SharedValue::Str(a), Value::Str(b)) => a.as_str() == b,
            (SharedValue::Pointer(a), Value::Pointer(b)) => opaque_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for SharedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.to_value(), f)
    }
}

impl fmt::Display for SharedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.to_value(), f)
    }
}

fn opaque_eq(a: &Option<Opaque>, b: &Option<Opaque>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_roundtrip_releases_pool() {
        let pool = ShmPool::unbounded();
        let v = Value::str("east");
        let shared = SharedValue::from_value(&v, &pool).unwrap();
        assert!(pool.used() > 0);
        assert_eq!(shared, v);
        assert_eq!(shared.to_value(), v);
        drop(shared);
        assert_eq!(pool.used(), 0);
    }

    #[test]
    fn test_null_string_is_distinct_from_empty() {
        let pool = ShmPool::unbounded();
        let null = SharedValue::from_value(&Value::String(None), &pool).unwrap();
        let empty = SharedValue::from_value(&Value::string(""), &pool).unwrap();
        assert_ne!(null, empty);
        assert_eq!(null.as_str(), None);
        assert_eq!(empty.as_str(), Some(""));
    }

    #[test]
    fn test_pointer_equality_is_identity() {
        let a: Opaque = Arc::new(5u32);
        let b: Opaque = Arc::new(5u32);
        assert_eq!(Value::Pointer(Some(a.clone())), Value::Pointer(Some(a)));
        assert_ne!(Value::Pointer(Some(b)), Value::Pointer(None));
    }
}

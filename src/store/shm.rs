//! Shared-memory pool accounting.
//!
//! # Responsibilities
//! - Stand in for the shared-memory allocator: a fixed byte budget shared by
//!   every process that touches the store
//! - Hand out RAII charges that give their bytes back when dropped
//! - Provide immutable shared strings that carry their own charge
//!
//! # Design Decisions
//! - Reservation is a CAS loop on a single counter, no lock
//! - Memory is reclaimed by reference counting: a string or array is released
//!   when the last Block referencing it is dropped

use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use thiserror::Error;

/// Shared-memory exhaustion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("shared memory exhausted: requested {requested} bytes, {available} available")]
pub struct AllocError {
    pub requested: usize,
    pub available: usize,
}

#[derive(Debug)]
struct PoolInner {
    capacity: usize,
    used: AtomicUsize,
}

/// Fixed-capacity pool every shared allocation is charged against.
#[derive(Debug, Clone)]
pub struct ShmPool {
    inner: Arc<PoolInner>,
}

impl ShmPool {
    /// Create a pool with the given capacity in bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                capacity,
                used: AtomicUsize::new(0),
            }),
        }
    }

    /// A pool that never runs out.
    pub fn unbounded() -> Self {
        Self::new(usize::MAX)
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Bytes currently charged.
    pub fn used(&self) -> usize {
        self.inner.used.load(Ordering::Acquire)
    }

    pub fn available(&self) -> usize {
        self.inner.capacity.saturating_sub(self.used())
    }

    /// Reserve `bytes` from the pool.
    pub fn charge(&self, bytes: usize) -> Result<ShmCharge, AllocError> {
        let mut prev = self.inner.used.load(Ordering::Relaxed);
        loop {
            let available = self.inner.capacity.saturating_sub(prev);
            if bytes > available {
                return Err(AllocError {
                    requested: bytes,
                    available,
                });
            }
            match self.inner.used.compare_exchange_weak(
                prev,
                prev + bytes,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(x) => prev = x,
            }
        }
        Ok(ShmCharge {
            pool: self.inner.clone(),
            bytes,
        })
    }

    /// Clone a string into the pool (length plus terminating zero).
    pub fn alloc_str(&self, text: &str) -> Result<ShmStr, AllocError> {
        let charge = self.charge(text.len() + 1)?;
        Ok(ShmStr(Arc::new(ShmStrInner {
            text: text.into(),
            _charge: charge,
        })))
    }
}

/// A reservation in the pool, released on drop.
#[derive(Debug)]
pub struct ShmCharge {
    pool: Arc<PoolInner>,
    bytes: usize,
}

impl ShmCharge {
    pub fn bytes(&self) -> usize {
        self.bytes
    }
}

impl Drop for ShmCharge {
    fn drop(&mut self) {
        self.pool.used.fetch_sub(self.bytes, Ordering::AcqRel);
    }
}

#[derive(Debug)]
struct ShmStrInner {
    text: Box<str>,
    _charge: ShmCharge,
}

/// Immutable string living in the shared pool.
///
/// Cloning only bumps a reference count, so reading a string value out of a
/// Block never allocates.
#[derive(Clone)]
pub struct ShmStr(Arc<ShmStrInner>);

impl ShmStr {
    pub fn as_str(&self) -> &str {
        &self.0.text
    }

    /// True if both handles share the same allocation.
    pub fn ptr_eq(&self, other: &ShmStr) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Deref for ShmStr {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0.text
    }
}

impl PartialEq for ShmStr {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Eq for ShmStr {}

impl fmt::Debug for ShmStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), f)
    }
}

impl fmt::Display for ShmStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_charge_released_on_drop() {
        let pool = ShmPool::new(100);
        let charge = pool.charge(60).unwrap();
        assert_eq!(pool.used(), 60);
        assert_eq!(charge.bytes(), 60);

        let err = pool.charge(50).unwrap_err();
        assert_eq!(err.requested, 50);
        assert_eq!(err.available, 40);

        drop(charge);
        assert_eq!(pool.used(), 0);
        assert!(pool.charge(100).is_ok());
    }

    #[test]
    fn test_shared_string_lifetime() {
        let pool = ShmPool::new(64);
        let s = pool.alloc_str("east").unwrap();
        assert_eq!(pool.used(), 5);

        let copy = s.clone();
        assert!(copy.ptr_eq(&s));
        drop(s);
        assert_eq!(pool.used(), 5); // still referenced
        assert_eq!(&*copy, "east");
        drop(copy);
        assert_eq!(pool.used(), 0);
    }
}

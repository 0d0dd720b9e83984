//! Per-child callback log.
//!
//! Every install that changes a variable with a per-child handler appends one
//! node per variable to a singly linked, append-only list. Each process keeps
//! an `Arc` to the last node it has run; the store keeps an anchor at the
//! oldest node still needed. A node is freed when nothing references it any
//! more, which happens once every cursor has moved past it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use crate::store::schema::OnSetChild;

/// How many times a callback runs across all processes.
#[derive(Debug)]
pub enum Delivery {
    /// Once in every process that adopts the change.
    EveryProcess,
    /// Once in total; the flag records whether it already ran.
    Once(AtomicBool),
}

/// A queued "variable changed" notification.
pub struct ChildCallback {
    group: Arc<str>,
    var: Arc<str>,
    handler: OnSetChild,
    delivery: Delivery,
}

impl ChildCallback {
    pub fn new(group: Arc<str>, var: Arc<str>, handler: OnSetChild, once: bool) -> Self {
        let delivery = if once {
            Delivery::Once(AtomicBool::new(false))
        } else {
            Delivery::EveryProcess
        };
        Self {
            group,
            var,
            handler,
            delivery,
        }
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn var(&self) -> &str {
        &self.var
    }

    /// Run the handler unless a once-only callback already ran elsewhere.
    pub fn fire(&self) -> bool {
        if let Delivery::Once(done) = &self.delivery {
            if done.swap(true, Ordering::AcqRel) {
                return false;
            }
        }
        (self.handler)(&self.group, &self.var);
        true
    }
}

impl std::fmt::Debug for ChildCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChildCallback")
            .field("group", &self.group)
            .field("var", &self.var)
            .field("delivery", &self.delivery)
            .finish()
    }
}

/// One link of the callback list. The head is a sentinel without callback.
#[derive(Debug, Default)]
pub struct CbNode {
    next: OnceLock<Arc<CbNode>>,
    cb: Option<ChildCallback>,
}

impl CbNode {
    pub fn sentinel() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn next(&self) -> Option<&Arc<CbNode>> {
        self.next.get()
    }

    pub fn callback(&self) -> Option<&ChildCallback> {
        self.cb.as_ref()
    }
}

impl Drop for CbNode {
    // Unlink iteratively so a long chain does not recurse.
    fn drop(&mut self) {
        let mut next = self.next.take();
        while let Some(node) = next {
            match Arc::try_unwrap(node) {
                Ok(mut node) => next = node.next.take(),
                Err(_) => break,
            }
        }
    }
}

/// Head and tail of the published list. Guarded by the store's global lock.
#[derive(Debug)]
pub struct CallbackLog {
    first: Arc<CbNode>,
    last: Arc<CbNode>,
}

impl Default for CallbackLog {
    fn default() -> Self {
        let sentinel = CbNode::sentinel();
        Self {
            first: sentinel.clone(),
            last: sentinel,
        }
    }
}

impl CallbackLog {
    pub fn last(&self) -> &Arc<CbNode> {
        &self.last
    }

    /// Append callbacks after the current tail.
    pub fn append(&mut self, callbacks: Vec<ChildCallback>) {
        for cb in callbacks {
            let node = Arc::new(CbNode {
                next: OnceLock::new(),
                cb: Some(cb),
            });
            if self.last.next.set(node.clone()).is_err() {
                unreachable!("callback list tail already has a successor");
            }
            self.last = node;
        }
    }

    /// Advance the anchor past every node no cursor holds any more.
    /// Returns the number of nodes released.
    pub fn collect(&mut self) -> usize {
        let mut released = 0;
        while !Arc::ptr_eq(&self.first, &self.last) && Arc::strong_count(&self.first) == 1 {
            let Some(next) = self.first.next().cloned() else {
                break;
            };
            self.first = next;
            released += 1;
        }
        released
    }

    /// Nodes still retained behind the tail.
    pub fn retained(&self) -> usize {
        let mut count = 0;
        let mut node = &self.first;
        while let Some(next) = node.next() {
            count += 1;
            node = next;
        }
        count
    }
}

//! Shared configuration store.
//!
//! # Data Flow
//! ```text
//! module / script declarations
//!     → schema.rs (groups, variables, validation)
//!     → finalize() (fixup, first Block, queued instances)
//!     → global Block (ArcSwap) + callback log
//!
//! writer (ChangeContext::set_now / commit)
//!     → writer lock → clone Block → edit → install under global lock
//!
//! worker (ProcessHandle::update)
//!     → global lock: read Block + callback tail
//!     → adopt Block, run per-child callbacks up to the tail
//! ```
//!
//! # Design Decisions
//! - One `ConfigStore` value owns all shared state; clones share it
//! - Two locks: the writer lock serializes clone-modify-install, the global
//!   lock publishes the Block pointer and the callback tail together. The
//!   writer lock is never taken while holding the global lock
//! - Blocks, instance arrays and callback nodes are reference counted; the
//!   last holder frees them

pub mod block;
pub mod callbacks;
pub mod codec;
pub mod context;
pub mod error;
pub mod instance;
pub mod layout;
pub mod process;
pub mod schema;
pub mod shm;
pub mod value;
pub mod writer;

use std::fmt;
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use serde::Serialize;
use uuid::Uuid;

use crate::store::block::{Block, GroupData, Slot};
use crate::store::callbacks::{CallbackLog, CbNode};
use crate::store::schema::Registry;
use crate::store::writer::BlockEdit;

pub use block::Block as ConfigBlock;
pub use context::{ChangeContext, DiffRecord, GroupInfo, HelpInfo, OnDeclare};
pub use error::{CfgError, Result, SchemaError};
pub use process::ProcessHandle;
pub use schema::{GroupId, GroupView, VarDef, VarFlags};
pub use shm::ShmPool;
pub use value::{InputType, SharedValue, Value, VarType};

/// Lifecycle stage of the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Declarations allowed, no Block yet.
    Collecting,
    /// A Block is installed; changes go through clone-modify-install.
    Live,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Collecting => "collecting",
            Stage::Live => "live",
        })
    }
}

/// Instance requests made before the store is live.
#[derive(Debug)]
enum QueuedOp {
    Add { group: GroupId, id: u32 },
    Set { group: GroupId, id: u32, index: usize, value: Value },
    Reset { group: GroupId, id: u32, index: usize },
}

/// State guarded by the global lock.
#[derive(Debug, Default)]
struct Published {
    log: CallbackLog,
    /// Cursors reserved for children registered before they start.
    child_slots: Vec<Arc<CbNode>>,
}

struct ContextEntry {
    valid: Arc<std::sync::atomic::AtomicBool>,
    on_declare: Option<OnDeclare>,
}

struct StoreInner {
    pool: ShmPool,
    registry: RwLock<Registry>,
    global: ArcSwapOption<Block>,
    version: AtomicU64,
    writer: Mutex<()>,
    published: Mutex<Published>,
    queued: Mutex<Vec<QueuedOp>>,
    contexts: DashMap<Uuid, ContextEntry>,
}

/// Snapshot of store state for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStatus {
    pub stage: Stage,
    pub block_version: u64,
    pub groups: usize,
    pub contexts: usize,
    pub pending_callbacks: usize,
    pub shm_used: usize,
    pub shm_capacity: usize,
}

/// Handle to the shared configuration store.
#[derive(Clone)]
pub struct ConfigStore {
    inner: Arc<StoreInner>,
}

impl fmt::Debug for ConfigStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigStore")
            .field("stage", &self.stage())
            .field("version", &self.block_version())
            .finish()
    }
}

impl ConfigStore {
    pub fn new(pool: ShmPool) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                pool,
                registry: RwLock::new(Registry::new()),
                global: ArcSwapOption::empty(),
                version: AtomicU64::new(0),
                writer: Mutex::new(()),
                published: Mutex::new(Published::default()),
                queued: Mutex::new(Vec::new()),
                contexts: DashMap::new(),
            }),
        }
    }

    pub fn pool(&self) -> &ShmPool {
        &self.inner.pool
    }

    pub fn stage(&self) -> Stage {
        if self.inner.global.load().is_some() {
            Stage::Live
        } else {
            Stage::Collecting
        }
    }

    /// The installed Block, if the store is live.
    pub fn current(&self) -> Option<Arc<Block>> {
        self.inner.global.load_full()
    }

    /// Version of the installed Block; 0 before finalize.
    pub fn block_version(&self) -> u64 {
        self.inner.version.load(Ordering::Acquire)
    }

    pub fn registry(&self) -> RwLockReadGuard<'_, Registry> {
        self.inner.registry.read()
    }

    pub fn group_id(&self, name: &str) -> Result<GroupId> {
        Ok(self.registry().lookup_group(name)?.id)
    }

    fn announce(&self, group: &str) {
        for entry in self.inner.contexts.iter() {
            if let Some(hook) = &entry.on_declare {
                hook(group);
            }
        }
    }

    /// Declare a static group.
    pub fn declare_group(
        &self,
        name: &str,
        defs: Vec<VarDef>,
        expected_size: Option<usize>,
    ) -> Result<GroupId> {
        let id = self.inner.registry.write().declare_group(name, defs, expected_size)?;
        self.announce(name);
        Ok(id)
    }

    /// Declare one script integer variable.
    pub fn declare_single_int(
        &self,
        group: &str,
        name: &str,
        default: i32,
        min: i32,
        max: i32,
        descr: &str,
    ) -> Result<GroupId> {
        Ok(self
            .inner
            .registry
            .write()
            .declare_single_int(group, name, default, min, max, descr)?)
    }

    /// Declare one script string variable.
    pub fn declare_single_str(&self, group: &str, name: &str, default: &str, descr: &str) -> Result<GroupId> {
        Ok(self
            .inner
            .registry
            .write()
            .declare_single_str(group, name, default, descr)?)
    }

    /// Fix up script groups, build the first Block, apply queued instance
    /// requests and install it. Declarations fail with `TooLate` afterwards.
    pub fn finalize(&self) -> Result<()> {
        let writer = self.lock_writer();
        let fixed = {
            let mut registry = self.inner.registry.write();
            if registry.is_fixed() {
                return Err(SchemaError::TooLate("finalize".into()).into());
            }
            registry.fixup()
        };

        let registry = self.inner.registry.read();
        let pool = &self.inner.pool;
        let mut groups = Vec::with_capacity(registry.len());
        for group in registry.groups() {
            let mut slots = Vec::with_capacity(group.vars.len());
            for (mapping, value) in group.vars.iter().zip(&group.initial) {
                slots.push(match value {
                    Value::Int(v) if mapping.def.is_atomic() => Slot::Atomic(AtomicI32::new(*v)),
                    other => Slot::Plain(SharedValue::from_value(other, pool)?),
                });
            }
            groups.push(GroupData {
                slots,
                instances: None,
            });
        }

        let mut edit = BlockEdit::new(&registry, pool, groups);
        let mut queued = self.inner.queued.lock();
        for op in queued.iter() {
            match *op {
                QueuedOp::Add { group, id } => {
                    edit.add_instance(group, id);
                }
                QueuedOp::Set {
                    group,
                    id,
                    index,
                    ref value,
                } => {
                    edit.add_instance(group, id);
                    let value = SharedValue::from_value(value, pool)?;
                    edit.set_instance(group, id, index, value)?;
                }
                QueuedOp::Reset { group, id, index } => {
                    edit.reset_instance_value(group, id, index)?;
                }
            }
        }
        let (groups, _) = edit.finish()?;
        let block = Block::new(1, groups, &registry, pool)?;
        self.install(&writer, Arc::new(block), Vec::new());
        queued.clear();
        drop(queued);

        let group_count = registry.len();
        let announced: Vec<Arc<str>> = fixed.iter().map(|&id| registry.group(id).name.clone()).collect();
        drop(registry);
        drop(writer);

        for name in &announced {
            self.announce(name);
        }
        tracing::info!(
            groups = group_count,
            shm_used = pool.used(),
            "Configuration finalized"
        );
        Ok(())
    }

    pub(crate) fn queue_instance_add(&self, group: GroupId, id: u32) {
        self.inner.queued.lock().push(QueuedOp::Add { group, id });
    }

    pub(crate) fn queue_instance_set(&self, group: GroupId, id: u32, index: usize, value: Value) {
        self.inner.queued.lock().push(QueuedOp::Set {
            group,
            id,
            index,
            value,
        });
    }

    /// Whether a queued add or assignment creates instance `id` at finalize.
    pub(crate) fn instance_queued(&self, group: GroupId, id: u32) -> bool {
        self.inner.queued.lock().iter().any(|op| match *op {
            QueuedOp::Add { group: g, id: i } | QueuedOp::Set { group: g, id: i, .. } => g == group && i == id,
            QueuedOp::Reset { .. } => false,
        })
    }

    pub(crate) fn queue_instance_reset(&self, group: GroupId, id: u32, index: usize) {
        self.inner.queued.lock().push(QueuedOp::Reset { group, id, index });
    }

    /// Write a collecting-stage value. Fails once the registry is fixed.
    pub(crate) fn set_initial(&self, group: GroupId, index: usize, value: Value) -> Result<()> {
        let mut registry = self.inner.registry.write();
        if registry.is_fixed() {
            return Err(CfgError::NotLive);
        }
        registry.group_mut(group).initial[index] = value;
        Ok(())
    }

    /// Obtain a change context. `on_declare` is called with the name of every
    /// group declared so far and of every group declared later.
    pub fn register_context(&self, on_declare: Option<OnDeclare>) -> ChangeContext {
        let valid = Arc::new(std::sync::atomic::AtomicBool::new(true));
        let ctx = ChangeContext::new(self.clone(), valid.clone());
        if let Some(hook) = &on_declare {
            let registry = self.registry();
            for group in registry.groups().filter(|g| g.is_ready()) {
                hook(&group.name);
            }
        }
        self.inner
            .contexts
            .insert(ctx.id(), ContextEntry { valid, on_declare });
        tracing::debug!(context = %ctx.id(), "Change context registered");
        ctx
    }

    /// Invalidate every context; later use fails with `ContextUndefined`.
    pub fn destroy_contexts(&self) {
        for entry in self.inner.contexts.iter() {
            entry.valid.store(false, Ordering::Release);
        }
        let count = self.inner.contexts.len();
        self.inner.contexts.clear();
        tracing::debug!(count, "Change contexts destroyed");
    }

    pub(crate) fn forget_context(&self, id: &Uuid) {
        self.inner.contexts.remove(id);
    }

    /// Reserve callback cursors for `n` children that will call
    /// `ProcessHandle::child_init`.
    pub fn register_children(&self, n: usize) {
        let mut published = self.inner.published.lock();
        let tail = published.log.last().clone();
        published.child_slots.extend((0..n).map(|_| tail.clone()));
        tracing::debug!(children = n, "Child processes registered");
    }

    /// Hand out a reserved cursor with the current Block. The flag is true
    /// when callbacks were installed since the reservation.
    pub(crate) fn take_child_slot(&self) -> Option<(Arc<Block>, Arc<CbNode>, bool)> {
        let mut published = self.inner.published.lock();
        let block = self.inner.global.load_full()?;
        let slot = published.child_slots.pop()?;
        let behind = !Arc::ptr_eq(&slot, published.log.last());
        Some((block, slot, behind))
    }

    /// Read the global Block and the callback tail together.
    pub(crate) fn snapshot(&self) -> Option<(Arc<Block>, Arc<CbNode>)> {
        let published = self.inner.published.lock();
        let block = self.inner.global.load_full()?;
        Some((block, published.log.last().clone()))
    }

    /// Release callback nodes every process has passed.
    pub(crate) fn collect_callbacks(&self) -> usize {
        let released = self.inner.published.lock().log.collect();
        if released > 0 {
            tracing::trace!(released, "Callback nodes released");
        }
        released
    }

    /// Callback nodes still retained for a lagging process.
    pub fn pending_callbacks(&self) -> usize {
        self.inner.published.lock().log.retained()
    }

    pub fn status(&self) -> StoreStatus {
        StoreStatus {
            stage: self.stage(),
            block_version: self.block_version(),
            groups: self.registry().len(),
            contexts: self.inner.contexts.len(),
            pending_callbacks: self.pending_callbacks(),
            shm_used: self.inner.pool.used(),
            shm_capacity: self.inner.pool.capacity(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finalize_builds_first_block() {
        let store = ConfigStore::new(ShmPool::unbounded());
        let g = store
            .declare_group("core", vec![VarDef::int("debug", 1).range(0, 9)], None)
            .unwrap();
        store.declare_single_int("app", "limit", 10, 0, 100, "").unwrap();
        assert_eq!(store.stage(), Stage::Collecting);
        assert!(store.current().is_none());

        store.finalize().unwrap();
        assert_eq!(store.stage(), Stage::Live);
        assert_eq!(store.block_version(), 1);
        let block = store.current().unwrap();
        assert_eq!(block.value(g, 0), Value::Int(1));
        let app = store.group_id("app").unwrap();
        assert_eq!(block.value(app, 0), Value::Int(10));

        assert!(matches!(
            store.declare_group("late", vec![VarDef::int("x", 0)], None),
            Err(CfgError::Schema(SchemaError::TooLate(_)))
        ));
        assert!(store.finalize().is_err());
    }

    #[test]
    fn test_queued_instances_applied() {
        let store = ConfigStore::new(ShmPool::unbounded());
        let g = store
            .declare_group("pool", vec![VarDef::str("name", "")], None)
            .unwrap();
        store.queue_instance_add(g, 4);
        store.queue_instance_set(g, 2, 0, Value::str("west"));
        store.finalize().unwrap();

        let block = store.current().unwrap();
        let group = block.group(g);
        let ids: Vec<u32> = group.instances().unwrap().iter().map(|i| i.id()).collect();
        assert_eq!(ids, vec![2, 4]);
        assert_eq!(group.instance(2).unwrap().value(0), &Value::str("west"));
    }

    #[test]
    fn test_finalize_fails_on_exhausted_pool() {
        let store = ConfigStore::new(ShmPool::new(4));
        store
            .declare_group("core", vec![VarDef::str("name", "a long default")], None)
            .unwrap();
        assert!(matches!(store.finalize(), Err(CfgError::Allocation(_))));
        assert_eq!(store.stage(), Stage::Collecting);
        assert_eq!(store.pool().used(), 0);
    }

    #[test]
    fn test_register_context_replays_groups() {
        let store = ConfigStore::new(ShmPool::unbounded());
        store.declare_group("a", vec![VarDef::int("x", 0)], None).unwrap();
        store.declare_single_int("script", "y", 0, 0, 0, "").unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _ctx = store.register_context(Some(Arc::new(move |g: &str| {
            sink.lock().push(g.to_string())
        })));
        assert_eq!(*seen.lock(), vec!["a".to_string()]);

        store.declare_group("b", vec![VarDef::int("x", 0)], None).unwrap();
        store.finalize().unwrap();
        assert_eq!(
            *seen.lock(),
            vec!["a".to_string(), "b".to_string(), "script".to_string()]
        );
    }
}

//! Per-process view of the store.
//!
//! Every worker owns one `ProcessHandle`. It holds the Block the worker is
//! currently reading, its cursor into the callback log, and which group
//! instance each group is switched to. `update()` is called at a safe point
//! between messages and is the only place the worker's view moves.

use std::sync::Arc;

use crate::store::block::Block;
use crate::store::callbacks::CbNode;
use crate::store::error::{CfgError, Result};
use crate::store::schema::GroupId;
use crate::store::shm::ShmStr;
use crate::store::value::SharedValue;
use crate::store::ConfigStore;

/// Position in the callback log.
#[derive(Debug)]
enum Cursor {
    /// Last node this process has run.
    Active(Arc<CbNode>),
    /// The process never runs callbacks and holds nothing back.
    NoCallbacks,
}

/// A process's local configuration handle.
#[derive(Debug)]
pub struct ProcessHandle {
    store: ConfigStore,
    local: Arc<Block>,
    cursor: Cursor,
    /// The cursor trails the published tail although the Block is current.
    behind: bool,
    selected: Vec<Option<u32>>,
}

impl ProcessHandle {
    fn with(store: ConfigStore, local: Arc<Block>, cursor: Cursor) -> Self {
        let groups = local.groups().len();
        tracing::debug!(
            version = local.version(),
            callbacks = matches!(cursor, Cursor::Active(_)),
            "Process joined configuration"
        );
        Self {
            store,
            local,
            cursor,
            behind: false,
            selected: vec![None; groups],
        }
    }

    /// Initialise a child registered with `ConfigStore::register_children`.
    /// Falls back to `late_child_init` if no registration is left.
    pub fn child_init(store: &ConfigStore) -> Result<Self> {
        match store.take_child_slot() {
            Some((block, slot, behind)) => {
                let mut handle = Self::with(store.clone(), block, Cursor::Active(slot));
                handle.behind = behind;
                Ok(handle)
            }
            None => {
                tracing::warn!("No registered child slot left, joining late");
                Self::late_child_init(store)
            }
        }
    }

    /// Join without a prior registration; runs callbacks installed from now on.
    pub fn late_child_init(store: &ConfigStore) -> Result<Self> {
        let (block, tail) = store.snapshot().ok_or(CfgError::NotLive)?;
        Ok(Self::with(store.clone(), block, Cursor::Active(tail)))
    }

    /// Join as a process that never runs per-child callbacks.
    pub fn child_no_cb_init(store: &ConfigStore) -> Result<Self> {
        let block = store.current().ok_or(CfgError::NotLive)?;
        Ok(Self::with(store.clone(), block, Cursor::NoCallbacks))
    }

    /// The main process: reads configuration, never runs callbacks.
    pub fn main(store: &ConfigStore) -> Result<Self> {
        Self::child_no_cb_init(store)
    }

    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    pub fn block(&self) -> &Arc<Block> {
        &self.local
    }

    pub fn version(&self) -> u64 {
        self.local.version()
    }

    pub fn runs_callbacks(&self) -> bool {
        matches!(self.cursor, Cursor::Active(_))
    }

    fn is_current(&self) -> bool {
        self.local.version() == self.store.block_version()
    }

    /// Adopt the latest Block and run every callback installed since the
    /// last update. Returns the number of callbacks run.
    pub fn update(&mut self) -> usize {
        if self.is_current() && !self.behind {
            return 0;
        }
        self.behind = false;
        let Some((block, tail)) = self.store.snapshot() else {
            return 0;
        };
        self.adopt(block);

        let Cursor::Active(cursor) = &mut self.cursor else {
            return 0;
        };
        let mut node = cursor.clone();
        let mut ran = 0;
        while !Arc::ptr_eq(&node, &tail) {
            let Some(next) = node.next().cloned() else {
                unreachable!("callback cursor is not behind the published tail");
            };
            node = next;
            if let Some(cb) = node.callback() {
                if cb.fire() {
                    ran += 1;
                    tracing::debug!(group = cb.group(), var = cb.var(), "Per-child callback run");
                }
            }
        }
        *cursor = node;
        drop(tail);

        if ran > 0 {
            metrics::counter!("cfg_callbacks_total").increment(ran as u64);
        }
        self.store.collect_callbacks();
        ran
    }

    /// Adopt the latest Block without running callbacks.
    pub fn update_no_cbs(&mut self) {
        if self.is_current() {
            return;
        }
        if let Some(block) = self.store.current() {
            self.adopt(block);
        }
    }

    fn adopt(&mut self, block: Arc<Block>) {
        let old = std::mem::replace(&mut self.local, block);
        self.selected.iter_mut().for_each(|s| *s = None);
        tracing::trace!(from = old.version(), to = self.local.version(), "Block adopted");
        drop(old);
    }

    /// Read the selected instance of `group` instead of its defaults.
    pub fn select(&mut self, group: GroupId, id: u32) -> Result<()> {
        if self.local.group(group).instance(id).is_none() {
            return Err(CfgError::InstanceNotFound {
                group: self.store.registry().group(group).name.to_string(),
                id,
            });
        }
        self.selected[group.index()] = Some(id);
        Ok(())
    }

    /// Back to the default values of `group`.
    pub fn reset(&mut self, group: GroupId) {
        self.selected[group.index()] = None;
    }

    pub fn reset_all(&mut self) {
        self.selected.iter_mut().for_each(|s| *s = None);
    }

    pub fn selected(&self, group: GroupId) -> Option<u32> {
        self.selected[group.index()]
    }

    /// Select the instance with the smallest id.
    pub fn select_first(&mut self, group: GroupId) -> Option<u32> {
        let first = self.local.group(group).instances().and_then(|a| a.next_id(None));
        self.selected[group.index()] = first;
        first
    }

    /// Select the next instance by id. Resets to the defaults and returns
    /// `None` once the instances are exhausted.
    pub fn select_next(&mut self, group: GroupId) -> Option<u32> {
        let current = self.selected[group.index()];
        let next = current.and_then(|id| {
            self.local
                .group(group)
                .instances()
                .and_then(|a| a.next_id(Some(id)))
        });
        self.selected[group.index()] = next;
        next
    }

    /// Hot-path read of one variable, honouring the group's selection.
    pub fn get(&self, group: GroupId, index: usize) -> SharedValue {
        let data = self.local.group(group);
        match self.selected[group.index()].and_then(|id| data.instance(id)) {
            Some(instance) => instance.value(index).clone(),
            None => data.value(index),
        }
    }

    pub fn get_int(&self, group: GroupId, index: usize) -> Option<i32> {
        self.get(group, index).as_int()
    }

    pub fn get_str(&self, group: GroupId, index: usize) -> Option<ShmStr> {
        match self.get(group, index) {
            SharedValue::String(s) => s,
            SharedValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Name-based read; slower than `get`.
    pub fn get_by_name(&self, group: &str, var: &str) -> Result<SharedValue> {
        let registry = self.store.registry();
        let (g, mapping) = registry.lookup_var(group, var)?;
        Ok(self.get(g.id, mapping.index))
    }

    /// Leave the configuration. Releases the local Block and the callback
    /// cursor so the log can be collected past this process.
    pub fn child_destroy(self) {
        let store = self.store.clone();
        let version = self.local.version();
        drop(self);
        store.collect_callbacks();
        tracing::debug!(version, "Process left configuration");
    }
}

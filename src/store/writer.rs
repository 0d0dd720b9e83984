//! Clone-modify-install.
//!
//! # Responsibilities
//! - Serialize writers behind the writer lock (`WriterGuard`)
//! - Give writers a private copy of the live Block to edit (`BlockEdit`)
//! - Publish the result: swap the global Block and append per-child callbacks
//!   under the global lock, in one step
//!
//! # Design Decisions
//! - `install` takes the writer guard by reference so it cannot be called
//!   without holding the writer lock
//! - Instance arrays are copied lazily, only for groups an edit touches
//! - An edit that changes nothing installs nothing

use std::collections::HashSet;
use std::sync::atomic::AtomicI32;
use std::sync::Arc;

use parking_lot::MutexGuard;

use crate::store::block::{Block, GroupData, Slot};
use crate::store::callbacks::ChildCallback;
use crate::store::error::{CfgError, Result};
use crate::store::instance::{self, ArrayDraft, GroupInstance};
use crate::store::schema::{GroupId, Registry};
use crate::store::shm::{AllocError, ShmPool};
use crate::store::value::SharedValue;
use crate::store::ConfigStore;

/// Proof of holding the writer lock.
pub struct WriterGuard<'a> {
    _guard: MutexGuard<'a, ()>,
}

impl<'a> WriterGuard<'a> {
    pub(crate) fn new(guard: MutexGuard<'a, ()>) -> Self {
        Self { _guard: guard }
    }
}

/// Private copy of the live Block under edit.
pub struct BlockEdit<'a> {
    registry: &'a Registry,
    pool: &'a ShmPool,
    groups: Vec<GroupData>,
    drafts: Vec<Option<ArrayDraft>>,
    callbacks: Vec<ChildCallback>,
    notified: HashSet<(GroupId, usize)>,
    dirty: bool,
}

impl<'a> BlockEdit<'a> {
    pub(crate) fn new(registry: &'a Registry, pool: &'a ShmPool, groups: Vec<GroupData>) -> Self {
        let drafts = groups.iter().map(|_| None).collect();
        Self {
            registry,
            pool,
            groups,
            drafts,
            callbacks: Vec::new(),
            notified: HashSet::new(),
            dirty: false,
        }
    }

    pub fn registry(&self) -> &Registry {
        self.registry
    }

    pub fn pool(&self) -> &ShmPool {
        self.pool
    }

    /// Current default value area of a group, edits included.
    pub fn default_values(&self, group: GroupId) -> Vec<SharedValue> {
        self.groups[group.index()].values()
    }

    fn instance(&self, group: GroupId, id: u32) -> Option<&GroupInstance> {
        match &self.drafts[group.index()] {
            Some(draft) => draft.find(id),
            None => self.groups[group.index()].instance(id),
        }
    }

    pub fn has_instance(&self, group: GroupId, id: u32) -> bool {
        self.instance(group, id).is_some()
    }

    /// Current value area of one instance, edits included.
    pub fn instance_values(&self, group: GroupId, id: u32) -> Result<Vec<SharedValue>> {
        self.instance(group, id)
            .map(|inst| inst.values().to_vec())
            .ok_or_else(|| self.not_found(group, id))
    }

    fn not_found(&self, group: GroupId, id: u32) -> CfgError {
        CfgError::InstanceNotFound {
            group: self.registry.group(group).name.to_string(),
            id,
        }
    }

    fn draft_mut(&mut self, group: GroupId) -> &mut ArrayDraft {
        let base = &self.groups[group.index()];
        self.drafts[group.index()].get_or_insert_with(|| {
            base.instances()
                .map(|a| a.draft())
                .unwrap_or_default()
        })
    }

    fn has_instances(&self, group: GroupId) -> bool {
        match &self.drafts[group.index()] {
            Some(draft) => !draft.is_empty(),
            None => self.groups[group.index()].instances().is_some(),
        }
    }

    /// Replace a default value and carry it into every instance that does not
    /// override it.
    pub fn set_default(&mut self, group: GroupId, index: usize, value: SharedValue) {
        let slot = &mut self.groups[group.index()].slots[index];
        *slot = match (&*slot, &value) {
            (Slot::Atomic(_), SharedValue::Int(v)) => Slot::Atomic(AtomicI32::new(*v)),
            _ => Slot::Plain(value.clone()),
        };
        if self.has_instances(group) {
            self.draft_mut(group).update_defaults(index, &value);
        }
        self.dirty = true;
    }

    pub fn set_instance(&mut self, group: GroupId, id: u32, index: usize, value: SharedValue) -> Result<()> {
        if !self.has_instance(group, id) {
            return Err(self.not_found(group, id));
        }
        if let Some(inst) = self.draft_mut(group).find_mut(id) {
            inst.set_value(index, value);
        }
        self.dirty = true;
        Ok(())
    }

    /// Revert an instance variable to the group default.
    pub fn reset_instance_value(&mut self, group: GroupId, id: u32, index: usize) -> Result<()> {
        if !self.has_instance(group, id) {
            return Err(self.not_found(group, id));
        }
        let default = self.groups[group.index()].value(index);
        if let Some(inst) = self.draft_mut(group).find_mut(id) {
            inst.reset_value(index, default);
        }
        self.dirty = true;
        Ok(())
    }

    /// Returns false if the instance already exists.
    pub fn add_instance(&mut self, group: GroupId, id: u32) -> bool {
        if self.has_instance(group, id) {
            return false;
        }
        let defaults = self.default_values(group);
        self.draft_mut(group).extend(id, &defaults);
        self.dirty = true;
        true
    }

    pub fn remove_instance(&mut self, group: GroupId, id: u32) -> Result<()> {
        if !self.draft_mut(group).collapse(id) {
            return Err(self.not_found(group, id));
        }
        self.dirty = true;
        Ok(())
    }

    /// Queue the per-child callback of a changed default value, once per
    /// variable and edit.
    pub fn notify(&mut self, group: GroupId, index: usize) {
        let def = self.registry.group(group);
        let mapping = &def.vars[index];
        let Some(handler) = mapping.def.on_set_child.clone() else {
            return;
        };
        if self.notified.insert((group, index)) {
            self.callbacks.push(ChildCallback::new(
                def.name.clone(),
                mapping.def.name.clone(),
                handler,
                mapping.def.is_cb_once(),
            ));
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Freeze the edited instance arrays.
    pub(crate) fn finish(self) -> std::result::Result<(Vec<GroupData>, Vec<ChildCallback>), AllocError> {
        let mut groups = self.groups;
        for (index, draft) in self.drafts.into_iter().enumerate() {
            if let Some(draft) = draft {
                let def = self.registry.group(GroupId(index));
                let slot = instance::slot_bytes(def.vars.len(), def.size);
                groups[index].instances = draft.freeze(self.pool, slot)?;
            }
        }
        Ok((groups, self.callbacks))
    }
}

impl ConfigStore {
    pub(crate) fn lock_writer(&self) -> WriterGuard<'_> {
        WriterGuard::new(self.inner.writer.lock())
    }

    /// Publish `block` as the global Block together with its callbacks.
    pub(crate) fn install(&self, _writer: &WriterGuard<'_>, block: Arc<Block>, callbacks: Vec<ChildCallback>) {
        let version = block.version();
        let queued = callbacks.len();
        {
            let mut published = self.inner.published.lock();
            self.inner.global.store(Some(block));
            self.inner.version.store(version, std::sync::atomic::Ordering::Release);
            published.log.append(callbacks);
            published.log.collect();
        }
        metrics::gauge!("cfg_block_version").set(version as f64);
        metrics::gauge!("cfg_shm_used_bytes").set(self.inner.pool.used() as f64);
        tracing::debug!(version, callbacks = queued, "Block installed");
    }

    /// Clone the live Block, apply `edit` and install the result.
    ///
    /// Nothing is installed if `edit` fails or leaves the copy unchanged; the
    /// previous Block stays global and fully valid.
    pub(crate) fn modify<T>(
        &self,
        kind: &'static str,
        edit: impl FnOnce(&mut BlockEdit<'_>) -> Result<T>,
    ) -> Result<T> {
        let writer = self.lock_writer();
        let registry = self.inner.registry.read();
        let current = self.current().ok_or(CfgError::NotLive)?;

        let mut draft = BlockEdit::new(&registry, &self.inner.pool, current.duplicate_groups());
        let out = edit(&mut draft)?;
        if !draft.is_dirty() {
            return Ok(out);
        }
        let (groups, callbacks) = draft.finish()?;
        let block = Block::new(current.version() + 1, groups, &registry, &self.inner.pool)?;
        self.install(&writer, Arc::new(block), callbacks);
        drop(registry);
        drop(writer);

        metrics::counter!("cfg_installs_total", "kind" => kind).increment(1);
        // the old Block goes away here unless a process still holds it
        drop(current);
        Ok(out)
    }
}

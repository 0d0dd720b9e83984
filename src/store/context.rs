//! Change contexts: the writer-side API of the store.
//!
//! # Responsibilities
//! - Validate, convert and range-check submitted values
//! - Run on-change fixups against the value area they target
//! - Apply changes immediately (`set_now`) or stage them for one atomic
//!   commit (`set_delayed` + `commit` / `rollback`)
//! - Read, preview and describe variables for operator tooling
//!
//! # Design Decisions
//! - Pending records stay sorted by group, then instance (defaults first),
//!   then insertion order
//! - A staged value is cloned into the pool when it is staged; dropping the
//!   record releases it, which is all a rollback has to do
//! - Per-child callbacks are queued for changed default values only

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use uuid::Uuid;

use crate::store::codec;
use crate::store::error::{CfgError, Result};
use crate::store::schema::{GroupId, GroupKind, GroupView, Mapping, Registry, VarDef, VarFlags};
use crate::store::shm::ShmCharge;
use crate::store::value::{InputType, SharedValue, Value, VarType};
use crate::store::{ConfigStore, Stage};

/// Hook told about every declared group.
pub type OnDeclare = Arc<dyn Fn(&str) + Send + Sync>;

/// What a pending record does to its variable.
#[derive(Debug, Clone)]
pub enum Change {
    Set(SharedValue),
    /// Revert an instance variable to the group default.
    Delete,
}

/// One staged change.
#[derive(Debug)]
pub struct ChangedVar {
    group: GroupId,
    instance: Option<u32>,
    index: usize,
    change: Change,
    _charge: ShmCharge,
}

impl ChangedVar {
    fn key(&self) -> (GroupId, Option<u32>) {
        (self.group, self.instance)
    }
}

/// A pending change as shown by `diff`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiffRecord {
    pub group: String,
    pub instance: Option<u32>,
    pub var: String,
    #[serde(serialize_with = "display")]
    pub old: Value,
    #[serde(serialize_with = "display")]
    pub new: Value,
}

fn display<S: serde::Serializer>(value: &Value, s: S) -> std::result::Result<S::Ok, S::Error> {
    match value {
        Value::Int(v) => s.serialize_i32(*v),
        Value::String(None) => s.serialize_none(),
        Value::String(Some(v)) | Value::Str(v) => s.serialize_str(v),
        Value::Pointer(_) => s.collect_str(value),
    }
}

/// Description of one variable.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HelpInfo {
    pub group: String,
    pub var: String,
    pub descr: String,
    pub input_type: InputType,
    pub var_type: VarType,
    pub min: i32,
    pub max: i32,
    pub offset: usize,
    pub flags: Vec<&'static str>,
}

/// A group and its variables.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupInfo {
    pub name: String,
    pub dynamic: bool,
    pub size: usize,
    pub vars: Vec<String>,
}

/// Read access to pending changes. Holds the context lock until dropped.
pub struct DiffGuard<'a> {
    ctx: &'a ChangeContext,
    pending: MutexGuard<'a, Vec<ChangedVar>>,
}

impl DiffGuard<'_> {
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Pending changes with the value each would replace.
    pub fn records(&self) -> Vec<DiffRecord> {
        let registry = self.ctx.store.registry();
        let block = self.ctx.store.current();
        self.pending
            .iter()
            .map(|rec| {
                let group = registry.group(rec.group);
                let default = block.as_ref().map(|b| b.value(rec.group, rec.index));
                let old = block
                    .as_ref()
                    .and_then(|b| match rec.instance {
                        None => Some(b.value(rec.group, rec.index)),
                        Some(id) => b.group(rec.group).instance(id).map(|i| i.value(rec.index).clone()),
                    })
                    .map(|v| v.to_value())
                    .unwrap_or_else(|| group.vars[rec.index].def.default.clone());
                let new = match &rec.change {
                    Change::Set(v) => v.to_value(),
                    Change::Delete => default.map(|v| v.to_value()).unwrap_or_else(|| old.clone()),
                };
                DiffRecord {
                    group: group.name.to_string(),
                    instance: rec.instance,
                    var: group.vars[rec.index].def.name.to_string(),
                    old,
                    new,
                }
            })
            .collect()
    }

    /// Give the context lock back.
    pub fn release(self) {}
}

/// A writer's handle on the store.
pub struct ChangeContext {
    id: Uuid,
    store: ConfigStore,
    valid: Arc<AtomicBool>,
    pending: Mutex<Vec<ChangedVar>>,
}

impl fmt::Debug for ChangeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeContext")
            .field("id", &self.id)
            .field("valid", &self.valid.load(Ordering::Relaxed))
            .field("pending", &self.pending.lock().len())
            .finish()
    }
}

/// A validated write, before its fixup ran.
struct Target {
    group: GroupId,
    group_name: Arc<str>,
    index: usize,
    def: VarDef,
}

impl Target {
    fn var(&self) -> &str {
        &self.def.name
    }

    /// Run the on-change fixup against `area` and check the result type.
    fn fixup(&self, mappings: &[Mapping], area: &[SharedValue], value: &mut Value) -> Result<()> {
        if let Some(handler) = &self.def.on_change {
            let view = GroupView::new(mappings, area);
            handler(&view, &self.group_name, self.var(), value).map_err(|reason| {
                CfgError::FixupRejected {
                    group: self.group_name.to_string(),
                    var: self.var().to_string(),
                    reason,
                }
            })?;
        }
        if value.var_type() != self.def.var_type {
            return Err(CfgError::TypeMismatch {
                group: self.group_name.to_string(),
                var: self.var().to_string(),
                expected: self.def.var_type,
                got: value.var_type(),
            });
        }
        Ok(())
    }
}

impl ChangeContext {
    pub(crate) fn new(store: ConfigStore, valid: Arc<AtomicBool>) -> Self {
        Self {
            id: Uuid::new_v4(),
            store,
            valid,
            pending: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    fn check(&self) -> Result<()> {
        if self.valid.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(CfgError::ContextUndefined)
        }
    }

    fn rejected(&self, err: CfgError) -> CfgError {
        metrics::counter!("cfg_rejected_total", "reason" => err.kind()).increment(1);
        tracing::warn!(context = %self.id, error = %err, "Configuration change rejected");
        err
    }

    /// Look up, check writability, convert and range-check a value.
    fn prepare(
        &self,
        registry: &Registry,
        group: &str,
        instance: Option<u32>,
        var: &str,
        value: Value,
    ) -> Result<(Target, Value)> {
        let (g, mapping) = registry.lookup_var(group, var)?;
        let def = &mapping.def;
        if def.is_readonly() {
            return Err(CfgError::ReadOnlyVariable {
                group: group.to_string(),
                var: var.to_string(),
            });
        }
        if instance.is_some() && def.is_cb_once() {
            return Err(CfgError::UnsupportedMultiValue {
                group: group.to_string(),
                var: var.to_string(),
            });
        }
        let value = codec::convert(value, def.input_type)?;
        if let (Value::Int(v), true) = (&value, def.has_range()) {
            if *v < def.min || *v > def.max {
                return Err(CfgError::OutOfRange {
                    group: group.to_string(),
                    var: var.to_string(),
                    value: *v,
                    min: def.min,
                    max: def.max,
                });
            }
        }
        Ok((
            Target {
                group: g.id,
                group_name: g.name.clone(),
                index: mapping.index,
                def: def.clone(),
            },
            value,
        ))
    }

    /// Change a variable immediately, in the default area or in `instance`.
    pub fn set_now(&self, group: &str, instance: Option<u32>, var: &str, value: Value) -> Result<()> {
        self.check()?;
        self.try_set_now(group, instance, var, value)
            .map_err(|e| self.rejected(e))
    }

    fn try_set_now(&self, group: &str, instance: Option<u32>, var: &str, value: Value) -> Result<()> {
        let shown = value.to_string();
        if self.store.stage() == Stage::Collecting {
            return self.set_initial(group, instance, var, value);
        }

        let (target, value) = {
            let registry = self.store.registry();
            self.prepare(&registry, group, instance, var, value)?
        };

        if let (true, None, Value::Int(v)) = (target.def.is_atomic(), instance, &value) {
            let writer = self.store.lock_writer();
            let block = self.store.current().ok_or(CfgError::NotLive)?;
            if block.group(target.group).instances().is_none()
                && block.store_atomic(target.group, target.index, *v)
            {
                drop(writer);
                metrics::counter!("cfg_installs_total", "kind" => "atomic").increment(1);
                tracing::info!(context = %self.id, group, var, value = *v, "Variable changed in place");
                return Ok(());
            }
        }

        self.store.modify("set", |edit| {
            let area = match instance {
                None => edit.default_values(target.group),
                Some(id) => edit.instance_values(target.group, id)?,
            };
            let mut value = value;
            target.fixup(&edit.registry().group(target.group).vars, &area, &mut value)?;
            let shared = SharedValue::from_value(&value, edit.pool())?;
            match instance {
                None => {
                    edit.set_default(target.group, target.index, shared);
                    edit.notify(target.group, target.index);
                    Ok(())
                }
                Some(id) => edit.set_instance(target.group, id, target.index, shared),
            }
        })?;

        tracing::info!(context = %self.id, group, ?instance, var, value = %shown, "Variable changed");
        Ok(())
    }

    /// Collecting stage: defaults are written straight into the registry,
    /// instance values are queued for finalize.
    fn set_initial(&self, group: &str, instance: Option<u32>, var: &str, value: Value) -> Result<()> {
        let (target, mut value) = {
            let registry = self.store.registry();
            self.prepare(&registry, group, instance, var, value)?
        };
        let (mappings, area) = {
            let registry = self.store.registry();
            let g = registry.group(target.group);
            let area = g
                .initial
                .iter()
                .map(|v| SharedValue::from_value(v, self.store.pool()))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            (g.vars.clone(), area)
        };
        target.fixup(&mappings, &area, &mut value)?;
        drop(area);

        match instance {
            None => self.store.set_initial(target.group, target.index, value)?,
            Some(id) => self
                .store
                .queue_instance_set(target.group, id, target.index, value),
        }
        tracing::debug!(context = %self.id, group, ?instance, var, "Initial value set");
        Ok(())
    }

    pub fn set_now_int(&self, group: &str, instance: Option<u32>, var: &str, value: i32) -> Result<()> {
        self.set_now(group, instance, var, Value::Int(value))
    }

    pub fn set_now_string(&self, group: &str, instance: Option<u32>, var: &str, value: Option<&str>) -> Result<()> {
        self.set_now(group, instance, var, Value::String(value.map(str::to_string)))
    }

    pub fn set_now_str(&self, group: &str, instance: Option<u32>, var: &str, value: &str) -> Result<()> {
        self.set_now(group, instance, var, Value::str(value))
    }

    /// Stage a change for the next `commit`. Before finalize this is the same
    /// as `set_now`.
    pub fn set_delayed(&self, group: &str, instance: Option<u32>, var: &str, value: Value) -> Result<()> {
        self.check()?;
        if self.store.stage() == Stage::Collecting {
            return self.set_now(group, instance, var, value);
        }
        self.try_set_delayed(group, instance, var, value)
            .map_err(|e| self.rejected(e))
    }

    fn try_set_delayed(&self, group: &str, instance: Option<u32>, var: &str, value: Value) -> Result<()> {
        let (target, mut value, mappings) = {
            let registry = self.store.registry();
            let (target, value) = self.prepare(&registry, group, instance, var, value)?;
            let mappings = match target.def.on_change {
                Some(_) => registry.group(target.group).vars.clone(),
                None => Vec::new(),
            };
            (target, value, mappings)
        };
        let block = self.store.current().ok_or(CfgError::NotLive)?;
        let data = block.group(target.group);
        let base = match instance {
            None => data.values(),
            Some(id) => data
                .instance(id)
                .map(|i| i.values().to_vec())
                .ok_or_else(|| CfgError::InstanceNotFound {
                    group: group.to_string(),
                    id,
                })?,
        };

        let mut pending = self.pending.lock();
        if target.def.on_change.is_some() {
            // the fixup sees this transaction's earlier edits of the same area
            let mut area = base;
            for rec in pending.iter().filter(|r| r.key() == (target.group, instance)) {
                area[rec.index] = match &rec.change {
                    Change::Set(v) => v.clone(),
                    Change::Delete => data.value(rec.index),
                };
            }
            target.fixup(&mappings, &area, &mut value)?;
        } else {
            target.fixup(&[], &[], &mut value)?;
        }

        let shown = value.to_string();
        let pool = self.store.pool();
        let record = ChangedVar {
            group: target.group,
            instance,
            index: target.index,
            change: Change::Set(SharedValue::from_value(&value, pool)?),
            _charge: pool.charge(std::mem::size_of::<ChangedVar>())?,
        };
        insert_sorted(&mut pending, record);
        drop(pending);

        tracing::info!(
            context = %self.id,
            group,
            ?instance,
            var,
            value = %shown,
            "Variable is going to be changed"
        );
        Ok(())
    }

    pub fn set_delayed_int(&self, group: &str, instance: Option<u32>, var: &str, value: i32) -> Result<()> {
        self.set_delayed(group, instance, var, Value::Int(value))
    }

    pub fn set_delayed_string(
        &self,
        group: &str,
        instance: Option<u32>,
        var: &str,
        value: Option<&str>,
    ) -> Result<()> {
        self.set_delayed(group, instance, var, Value::String(value.map(str::to_string)))
    }

    pub fn set_delayed_str(&self, group: &str, instance: Option<u32>, var: &str, value: &str) -> Result<()> {
        self.set_delayed(group, instance, var, Value::str(value))
    }

    fn delete_target(&self, registry: &Registry, group: &str, var: &str) -> Result<(GroupId, usize)> {
        let (g, mapping) = registry.lookup_var(group, var)?;
        if mapping.def.is_readonly() {
            return Err(CfgError::ReadOnlyVariable {
                group: group.to_string(),
                var: var.to_string(),
            });
        }
        Ok((g.id, mapping.index))
    }

    /// Revert an instance variable to the group default immediately.
    pub fn del_now(&self, group: &str, instance: u32, var: &str) -> Result<()> {
        self.check()?;
        self.try_del_now(group, instance, var)
            .map_err(|e| self.rejected(e))
    }

    fn try_del_now(&self, group: &str, instance: u32, var: &str) -> Result<()> {
        let (g, index) = self.delete_target(&self.store.registry(), group, var)?;
        if self.store.stage() == Stage::Collecting {
            // only an instance already added or assigned can be reverted
            if !self.store.instance_queued(g, instance) {
                return Err(CfgError::InstanceNotFound {
                    group: group.to_string(),
                    id: instance,
                });
            }
            self.store.queue_instance_reset(g, instance, index);
            return Ok(());
        }
        self.store
            .modify("delete", |edit| edit.reset_instance_value(g, instance, index))?;
        tracing::info!(context = %self.id, group, instance, var, "Instance value deleted");
        Ok(())
    }

    /// Stage reverting an instance variable to the group default.
    pub fn del_delayed(&self, group: &str, instance: u32, var: &str) -> Result<()> {
        self.check()?;
        if self.store.stage() == Stage::Collecting {
            return self.del_now(group, instance, var);
        }
        self.try_del_delayed(group, instance, var)
            .map_err(|e| self.rejected(e))
    }

    fn try_del_delayed(&self, group: &str, instance: u32, var: &str) -> Result<()> {
        let (g, index) = self.delete_target(&self.store.registry(), group, var)?;
        let block = self.store.current().ok_or(CfgError::NotLive)?;
        if block.group(g).instance(instance).is_none() {
            return Err(CfgError::InstanceNotFound {
                group: group.to_string(),
                id: instance,
            });
        }
        let record = ChangedVar {
            group: g,
            instance: Some(instance),
            index,
            change: Change::Delete,
            _charge: self.store.pool().charge(std::mem::size_of::<ChangedVar>())?,
        };
        insert_sorted(&mut self.pending.lock(), record);
        tracing::info!(context = %self.id, group, instance, var, "Instance value is going to be deleted");
        Ok(())
    }

    /// Apply every pending change in one new Block. On failure nothing is
    /// installed and the pending list is kept for a retry.
    pub fn commit(&self) -> Result<()> {
        self.check()?;
        if self.store.stage() == Stage::Collecting {
            return Ok(());
        }
        let mut pending = self.pending.lock();
        if pending.is_empty() {
            return Ok(());
        }
        self.store
            .modify("commit", |edit| {
                for rec in pending.iter() {
                    match (rec.instance, &rec.change) {
                        (None, Change::Set(v)) => {
                            edit.set_default(rec.group, rec.index, v.clone());
                            edit.notify(rec.group, rec.index);
                        }
                        (Some(id), Change::Set(v)) => edit.set_instance(rec.group, id, rec.index, v.clone())?,
                        (Some(id), Change::Delete) => edit.reset_instance_value(rec.group, id, rec.index)?,
                        (None, Change::Delete) => unreachable!("delete staged for a default value"),
                    }
                }
                Ok(())
            })
            .map_err(|e| self.rejected(e))?;
        let applied = pending.len();
        pending.clear();
        tracing::info!(context = %self.id, changes = applied, "Configuration changes committed");
        Ok(())
    }

    /// Drop every pending change.
    pub fn rollback(&self) -> Result<()> {
        self.check()?;
        let mut pending = self.pending.lock();
        let dropped = pending.len();
        pending.clear();
        tracing::info!(context = %self.id, changes = dropped, "Configuration changes rolled back");
        Ok(())
    }

    /// Preview pending changes; the context stays locked while the guard
    /// lives.
    pub fn diff(&self) -> Result<DiffGuard<'_>> {
        self.check()?;
        Ok(DiffGuard {
            ctx: self,
            pending: self.pending.lock(),
        })
    }

    /// Read a variable from the latest Block, or the value it will start
    /// with before finalize.
    pub fn get(&self, group: &str, instance: Option<u32>, var: &str) -> Result<Value> {
        self.check()?;
        let registry = self.store.registry();
        let (g, mapping) = registry.lookup_var(group, var)?;
        if mapping.def.on_change.is_some() {
            return Err(CfgError::NotDirectlyReadable {
                group: group.to_string(),
                var: var.to_string(),
            });
        }
        read(&self.store, g.id, group, instance, mapping.index, || {
            g.initial[mapping.index].clone()
        })
    }

    /// Every directly readable variable of a group.
    pub fn get_group(&self, group: &str, instance: Option<u32>) -> Result<Vec<(String, Value)>> {
        self.check()?;
        let registry = self.store.registry();
        let g = registry.lookup_group(group)?;
        g.vars
            .iter()
            .filter(|m| m.def.on_change.is_none())
            .map(|m| -> Result<(String, Value)> {
                let value = read(&self.store, g.id, group, instance, m.index, || g.initial[m.index].clone())?;
                Ok((m.def.name.to_string(), value))
            })
            .collect()
    }

    pub fn help(&self, group: &str, var: &str) -> Result<HelpInfo> {
        self.check()?;
        let registry = self.store.registry();
        let (g, mapping) = registry.lookup_var(group, var)?;
        let def = &mapping.def;
        let flags = [
            (VarFlags::ATOMIC, "atomic"),
            (VarFlags::READONLY, "readonly"),
            (VarFlags::CB_ONCE, "cb_once"),
        ]
        .into_iter()
        .filter(|(f, _)| def.flags.contains(*f))
        .map(|(_, name)| name)
        .collect();
        Ok(HelpInfo {
            group: g.name.to_string(),
            var: def.name.to_string(),
            descr: def.descr.clone(),
            input_type: def.input_type,
            var_type: def.var_type,
            min: def.min,
            max: def.max,
            offset: mapping.offset,
            flags,
        })
    }

    /// Declared groups with their variables.
    pub fn groups(&self) -> Result<Vec<GroupInfo>> {
        self.check()?;
        let registry = self.store.registry();
        Ok(registry
            .groups()
            .map(|g| GroupInfo {
                name: g.name.to_string(),
                dynamic: g.kind == GroupKind::Dynamic,
                size: g.size,
                vars: g.vars.iter().map(|m| m.def.name.to_string()).collect(),
            })
            .collect())
    }

    /// Add an instance to a group. Adding an existing id is a no-op.
    pub fn add_group_instance(&self, group: &str, id: u32) -> Result<()> {
        self.check()?;
        let g = self.store.group_id(group)?;
        if self.store.stage() == Stage::Collecting {
            self.store.queue_instance_add(g, id);
            return Ok(());
        }
        let added = self
            .store
            .modify("add_instance", |edit| Ok(edit.add_instance(g, id)))
            .map_err(|e| self.rejected(e))?;
        if added {
            tracing::info!(context = %self.id, group, id, "Group instance added");
        }
        Ok(())
    }

    /// Remove an instance from a group.
    pub fn del_group_instance(&self, group: &str, id: u32) -> Result<()> {
        self.check()?;
        let g = self.store.group_id(group)?;
        self.store
            .modify("del_instance", |edit| edit.remove_instance(g, id))
            .map_err(|e| self.rejected(e))?;
        tracing::info!(context = %self.id, group, id, "Group instance deleted");
        Ok(())
    }
}

impl Drop for ChangeContext {
    fn drop(&mut self) {
        self.store.forget_context(&self.id);
    }
}

fn insert_sorted(pending: &mut Vec<ChangedVar>, record: ChangedVar) {
    let key = record.key();
    let pos = pending.partition_point(|r| r.key() <= key);
    pending.insert(pos, record);
}

fn read(
    store: &ConfigStore,
    group: GroupId,
    name: &str,
    instance: Option<u32>,
    index: usize,
    initial: impl FnOnce() -> Value,
) -> Result<Value> {
    match (store.current(), instance) {
        (Some(block), None) => Ok(block.value(group, index).to_value()),
        (Some(block), Some(id)) => block
            .group(group)
            .instance(id)
            .map(|i| i.value(index).to_value())
            .ok_or_else(|| CfgError::InstanceNotFound {
                group: name.to_string(),
                id,
            }),
        (None, None) => Ok(initial()),
        (None, Some(_)) => Err(CfgError::NotLive),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::shm::ShmPool;

    fn store() -> ConfigStore {
        let store = ConfigStore::new(ShmPool::unbounded());
        store
            .declare_group(
                "core",
                vec![
                    VarDef::int("debug", 1).range(0, 9),
                    VarDef::str("name", "srv").flags(VarFlags::READONLY),
                    VarDef::int("port", 5060).on_change(|view, _, _, v| {
                        if view.get_int("debug") == Some(0) && v.as_int() == Some(0) {
                            return Err("port 0 needs debug".into());
                        }
                        Ok(())
                    }),
                ],
                None,
            )
            .unwrap();
        store
            .declare_group("pool", vec![VarDef::string("name", Some(""))], None)
            .unwrap();
        store
    }

    #[test]
    fn test_set_before_finalize_becomes_initial() {
        let store = store();
        let ctx = store.register_context(None);
        ctx.set_now_int("core", None, "debug", 4).unwrap();
        assert_eq!(ctx.get("core", None, "debug").unwrap(), Value::Int(4));
        store.finalize().unwrap();
        assert_eq!(ctx.get("core", None, "debug").unwrap(), Value::Int(4));
        assert_eq!(store.block_version(), 1);
    }

    #[test]
    fn test_validation_errors() {
        let store = store();
        store.finalize().unwrap();
        let ctx = store.register_context(None);

        assert!(matches!(
            ctx.set_now_str("core", None, "name", "x"),
            Err(CfgError::ReadOnlyVariable { .. })
        ));
        assert!(matches!(
            ctx.set_now_int("core", None, "missing", 1),
            Err(CfgError::VariableNotFound { .. })
        ));
        assert!(matches!(
            ctx.set_now_string("core", None, "debug", Some("abc")),
            Err(CfgError::Conversion(_))
        ));
        assert!(matches!(
            ctx.set_delayed_int("core", None, "debug", -1),
            Err(CfgError::OutOfRange { .. })
        ));
        assert_eq!(store.block_version(), 1);
    }

    #[test]
    fn test_fixup_sees_pending_changes() {
        let store = store();
        store.finalize().unwrap();
        let ctx = store.register_context(None);

        ctx.set_delayed_int("core", None, "debug", 0).unwrap();
        assert!(matches!(
            ctx.set_delayed_int("core", None, "port", 0),
            Err(CfgError::FixupRejected { .. })
        ));
        // the live Block still has debug = 1
        ctx.set_now_int("core", None, "port", 0).unwrap();
        assert!(matches!(
            ctx.get("core", None, "port"),
            Err(CfgError::NotDirectlyReadable { .. })
        ));
    }

    #[test]
    fn test_pending_order() {
        let store = store();
        store.finalize().unwrap();
        let ctx = store.register_context(None);
        ctx.add_group_instance("pool", 5).unwrap();

        ctx.set_delayed_string("pool", Some(5), "name", Some("b")).unwrap();
        ctx.set_delayed_string("pool", None, "name", Some("a")).unwrap();
        ctx.set_delayed_int("core", None, "debug", 2).unwrap();

        let diff = ctx.diff().unwrap();
        let records = diff.records();
        let order: Vec<(&str, Option<u32>)> =
            records.iter().map(|r| (r.group.as_str(), r.instance)).collect();
        assert_eq!(order, vec![("core", None), ("pool", None), ("pool", Some(5))]);
        diff.release();
    }

    #[test]
    fn test_delete_instance_value() {
        let store = store();
        store.finalize().unwrap();
        let ctx = store.register_context(None);
        ctx.add_group_instance("pool", 1).unwrap();
        ctx.set_now_string("pool", Some(1), "name", Some("east")).unwrap();
        ctx.set_now_string("pool", None, "name", Some("any")).unwrap();
        assert_eq!(ctx.get("pool", Some(1), "name").unwrap(), Value::string("east"));

        ctx.del_delayed("pool", 1, "name").unwrap();
        let records = ctx.diff().unwrap().records();
        assert_eq!(records[0].old, Value::string("east"));
        assert_eq!(records[0].new, Value::string("any"));
        ctx.commit().unwrap();
        assert_eq!(ctx.get("pool", Some(1), "name").unwrap(), Value::string("any"));

        assert!(matches!(
            ctx.del_now("pool", 9, "name"),
            Err(CfgError::InstanceNotFound { .. })
        ));
    }

    #[test]
    fn test_delete_before_finalize_needs_instance() {
        let store = store();
        let ctx = store.register_context(None);
        assert!(matches!(
            ctx.del_now("pool", 9, "name"),
            Err(CfgError::InstanceNotFound { .. })
        ));
        assert!(matches!(
            ctx.del_delayed("pool", 9, "name"),
            Err(CfgError::InstanceNotFound { .. })
        ));
        ctx.set_now_string("pool", Some(3), "name", Some("east")).unwrap();
        ctx.set_now_string("pool", None, "name", Some("any")).unwrap();
        ctx.del_now("pool", 3, "name").unwrap();
        store.finalize().unwrap();

        assert!(matches!(
            ctx.get("pool", Some(9), "name"),
            Err(CfgError::InstanceNotFound { .. })
        ));
        assert_eq!(ctx.get("pool", Some(3), "name").unwrap(), Value::string("any"));
    }

    #[test]
    fn test_destroyed_context_is_undefined() {
        let store = store();
        store.finalize().unwrap();
        let ctx = store.register_context(None);
        store.destroy_contexts();
        assert_eq!(ctx.get("core", None, "debug"), Err(CfgError::ContextUndefined));
        assert_eq!(ctx.commit(), Err(CfgError::ContextUndefined));
    }

    #[test]
    fn test_help_and_groups() {
        let store = store();
        store.declare_single_int("app", "limit", 3, 0, 10, "max things").unwrap();
        store.finalize().unwrap();
        let ctx = store.register_context(None);

        let help = ctx.help("core", "name").unwrap();
        assert_eq!(help.var_type, VarType::Str);
        assert_eq!(help.flags, vec!["readonly"]);
        assert_eq!(ctx.help("app", "limit").unwrap().descr, "max things");

        let groups = ctx.groups().unwrap();
        let names: Vec<&str> = groups.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["core", "pool", "app"]);
        assert!(groups[2].dynamic);
    }
}

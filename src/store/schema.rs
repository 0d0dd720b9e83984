//! Group and variable schema registry.
//!
//! # Responsibilities
//! - Declare static groups (complete variable list, expected size)
//! - Accumulate script-declared single variables into dynamic groups and fix
//!   them up when the store is finalized
//! - Validate type and flag combinations once, at declaration time
//! - Resolve group and variable names for every other component
//!
//! # Design Decisions
//! - A group's values are addressed by variable index; the C-like byte offset
//!   is kept only for layout checks and introspection
//! - Handlers are closures stored next to the variable definition
//! - Groups are never removed or replaced once declared

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bitflags::bitflags;

use crate::store::error::{CfgError, SchemaError};
use crate::store::layout;
use crate::store::value::{InputType, SharedValue, Value, VarType};

bitflags! {
    /// Per-variable behaviour flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct VarFlags: u8 {
        /// Written in place in the live Block, without cloning it.
        const ATOMIC = 1;
        /// Cannot be changed at runtime.
        const READONLY = 1 << 1;
        /// The per-child callback runs once in total, not once per process.
        const CB_ONCE = 1 << 2;
    }
}

/// Fixup handler run before a new value is accepted. It sees the target value
/// area and may rewrite the value; an `Err` rejects the change.
pub type OnChange =
    Arc<dyn Fn(&GroupView<'_>, &str, &str, &mut Value) -> Result<(), String> + Send + Sync>;

/// Per-process handler run by `update()` after a change has been adopted.
pub type OnSetChild = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Index of a declared group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupId(pub(crate) usize);

impl GroupId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Definition of one configuration variable.
#[derive(Clone)]
pub struct VarDef {
    pub name: Arc<str>,
    pub var_type: VarType,
    pub input_type: InputType,
    pub flags: VarFlags,
    pub min: i32,
    pub max: i32,
    pub descr: String,
    pub default: Value,
    pub on_change: Option<OnChange>,
    pub on_set_child: Option<OnSetChild>,
}

impl VarDef {
    fn new(name: &str, var_type: VarType, input_type: InputType, default: Value) -> Self {
        Self {
            name: name.into(),
            var_type,
            input_type,
            flags: VarFlags::empty(),
            min: 0,
            max: 0,
            descr: String::new(),
            default,
            on_change: None,
            on_set_child: None,
        }
    }

    pub fn int(name: &str, default: i32) -> Self {
        Self::new(name, VarType::Int, InputType::Int, Value::Int(default))
    }

    /// Zero-terminated string; `None` is a NULL default.
    pub fn string(name: &str, default: Option<&str>) -> Self {
        Self::new(
            name,
            VarType::String,
            InputType::String,
            Value::String(default.map(str::to_string)),
        )
    }

    /// Length-prefixed string.
    pub fn str(name: &str, default: &str) -> Self {
        Self::new(name, VarType::Str, InputType::Str, Value::Str(default.to_string()))
    }

    /// Opaque pointer fed through an on-change handler from `input`.
    pub fn pointer(name: &str, input: InputType) -> Self {
        Self::new(name, VarType::Pointer, input, Value::Pointer(None))
    }

    /// Accept a different input type; requires an on-change handler.
    pub fn input(mut self, input: InputType) -> Self {
        self.input_type = input;
        self
    }

    pub fn range(mut self, min: i32, max: i32) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    pub fn descr(mut self, descr: impl Into<String>) -> Self {
        self.descr = descr.into();
        self
    }

    pub fn flags(mut self, flags: VarFlags) -> Self {
        self.flags |= flags;
        self
    }

    pub fn on_change<F>(mut self, f: F) -> Self
    where
        F: Fn(&GroupView<'_>, &str, &str, &mut Value) -> Result<(), String> + Send + Sync + 'static,
    {
        self.on_change = Some(Arc::new(f));
        self
    }

    pub fn on_set_child<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, &str) + Send + Sync + 'static,
    {
        self.on_set_child = Some(Arc::new(f));
        self
    }

    /// A zero range means "unbounded".
    pub fn has_range(&self) -> bool {
        self.min != 0 || self.max != 0
    }

    pub fn is_atomic(&self) -> bool {
        self.flags.contains(VarFlags::ATOMIC)
    }

    pub fn is_readonly(&self) -> bool {
        self.flags.contains(VarFlags::READONLY)
    }

    pub fn is_cb_once(&self) -> bool {
        self.flags.contains(VarFlags::CB_ONCE)
    }
}

impl fmt::Debug for VarDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VarDef")
            .field("name", &self.name)
            .field("var_type", &self.var_type)
            .field("input_type", &self.input_type)
            .field("flags", &self.flags)
            .field("min", &self.min)
            .field("max", &self.max)
            .field("default", &self.default)
            .field("on_change", &self.on_change.is_some())
            .field("on_set_child", &self.on_set_child.is_some())
            .finish()
    }
}

/// A variable as placed inside its group.
#[derive(Debug, Clone)]
pub struct Mapping {
    pub def: VarDef,
    pub index: usize,
    pub offset: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupKind {
    /// Declared by a module with a fixed layout.
    Static,
    /// Built from script declarations; laid out at fixup.
    Dynamic,
}

/// Schema of one configuration group.
#[derive(Debug, Clone)]
pub struct GroupDef {
    pub id: GroupId,
    pub name: Arc<str>,
    pub kind: GroupKind,
    pub vars: Vec<Mapping>,
    /// Size of the C-like value area.
    pub size: usize,
    /// Values the group holds before the store is finalized.
    pub(crate) initial: Vec<Value>,
    /// False for dynamic groups until fixup.
    pub(crate) ready: bool,
    by_name: HashMap<Arc<str>, usize>,
}

impl GroupDef {
    pub fn var(&self, name: &str) -> Option<&Mapping> {
        self.by_name.get(name).map(|&i| &self.vars[i])
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    fn push_var(&mut self, def: VarDef) -> Result<(), SchemaError> {
        if self.by_name.contains_key(&def.name) {
            return Err(SchemaError::DuplicateVariable {
                group: self.name.to_string(),
                var: def.name.to_string(),
            });
        }
        validate_var(&self.name, &def)?;
        let index = self.vars.len();
        self.by_name.insert(def.name.clone(), index);
        self.initial.push(def.default.clone());
        self.vars.push(Mapping {
            def,
            index,
            offset: 0,
        });
        Ok(())
    }

    fn apply_layout(&mut self) {
        let layout = layout::compute(self.vars.iter().map(|m| m.def.var_type));
        for (mapping, offset) in self.vars.iter_mut().zip(layout.offsets) {
            mapping.offset = offset;
        }
        self.size = layout.size;
    }
}

/// Read-only view of a group's value area handed to on-change handlers.
pub struct GroupView<'a> {
    vars: &'a [Mapping],
    values: &'a [SharedValue],
}

impl<'a> GroupView<'a> {
    pub(crate) fn new(vars: &'a [Mapping], values: &'a [SharedValue]) -> Self {
        Self { vars, values }
    }

    pub fn get(&self, name: &str) -> Option<&SharedValue> {
        self.vars
            .iter()
            .find(|m| &*m.def.name == name)
            .and_then(|m| self.values.get(m.index))
    }

    pub fn get_int(&self, name: &str) -> Option<i32> {
        self.get(name).and_then(SharedValue::as_int)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(SharedValue::as_str)
    }
}

fn validate_var(group: &str, def: &VarDef) -> Result<(), SchemaError> {
    let combination = |reason| SchemaError::InvalidCallbackCombination {
        group: group.to_string(),
        var: def.name.to_string(),
        reason,
    };
    let unsupported = |reason| SchemaError::UnsupportedType {
        group: group.to_string(),
        var: def.name.to_string(),
        reason,
    };

    if def.is_atomic() {
        if def.var_type != VarType::Int {
            return Err(combination("atomic change is allowed only for integers"));
        }
        if def.on_change.is_some() || def.on_set_child.is_some() {
            return Err(combination("atomic variables cannot have handlers"));
        }
        if def.is_readonly() {
            return Err(combination("a read-only variable cannot be atomic"));
        }
    }
    if def.is_cb_once() && def.on_set_child.is_none() {
        return Err(combination("callback-once requires a per-child handler"));
    }

    if def.var_type == VarType::Pointer && def.on_change.is_none() {
        return Err(unsupported("pointer variables need an on-change handler"));
    }
    if def.var_type != VarType::Pointer
        && def.input_type.var_type() != def.var_type
        && def.on_change.is_none()
    {
        return Err(unsupported("input type differs from the variable type without a fixup"));
    }
    if def.default.var_type() != def.var_type {
        return Err(unsupported("default value does not match the variable type"));
    }
    Ok(())
}

/// All declared groups.
#[derive(Debug, Default)]
pub struct Registry {
    groups: Vec<GroupDef>,
    by_name: HashMap<Arc<str>, GroupId>,
    fixed: bool,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a static group. `expected_size` is the size the caller's own
    /// struct has; `None` skips the check.
    pub fn declare_group(
        &mut self,
        name: &str,
        defs: Vec<VarDef>,
        expected_size: Option<usize>,
    ) -> Result<GroupId, SchemaError> {
        if self.fixed {
            return Err(SchemaError::TooLate(name.to_string()));
        }
        if self.by_name.contains_key(name) {
            return Err(SchemaError::DuplicateGroup(name.to_string()));
        }
        if defs.is_empty() {
            return Err(SchemaError::EmptyGroup(name.to_string()));
        }

        let id = GroupId(self.groups.len());
        let mut group = GroupDef {
            id,
            name: name.into(),
            kind: GroupKind::Static,
            vars: Vec::with_capacity(defs.len()),
            size: 0,
            initial: Vec::with_capacity(defs.len()),
            ready: true,
            by_name: HashMap::new(),
        };
        for def in defs {
            group.push_var(def)?;
        }
        group.apply_layout();

        if let Some(expected) = expected_size {
            if expected != group.size {
                return Err(SchemaError::LayoutMismatch {
                    group: name.to_string(),
                    expected,
                    computed: group.size,
                });
            }
        }

        tracing::debug!(group = %name, vars = group.vars.len(), size = group.size, "Group declared");
        self.by_name.insert(group.name.clone(), id);
        self.groups.push(group);
        Ok(id)
    }

    /// Declare one script variable, creating its dynamic group on first use.
    pub fn declare_single(&mut self, group: &str, def: VarDef) -> Result<GroupId, SchemaError> {
        if self.fixed {
            return Err(SchemaError::TooLate(format!("{}.{}", group, def.name)));
        }
        let id = match self.by_name.get(group) {
            Some(&id) => {
                if self.groups[id.0].kind == GroupKind::Static {
                    return Err(SchemaError::DuplicateGroup(group.to_string()));
                }
                id
            }
            None => {
                let id = GroupId(self.groups.len());
                self.groups.push(GroupDef {
                    id,
                    name: group.into(),
                    kind: GroupKind::Dynamic,
                    vars: Vec::new(),
                    size: 0,
                    initial: Vec::new(),
                    ready: false,
                    by_name: HashMap::new(),
                });
                self.by_name.insert(group.into(), id);
                id
            }
        };
        self.groups[id.0].push_var(def)?;
        Ok(id)
    }

    pub fn declare_single_int(
        &mut self,
        group: &str,
        name: &str,
        default: i32,
        min: i32,
        max: i32,
        descr: &str,
    ) -> Result<GroupId, SchemaError> {
        self.declare_single(group, VarDef::int(name, default).range(min, max).descr(descr))
    }

    pub fn declare_single_str(
        &mut self,
        group: &str,
        name: &str,
        default: &str,
        descr: &str,
    ) -> Result<GroupId, SchemaError> {
        self.declare_single(group, VarDef::str(name, default).descr(descr))
    }

    /// Lay out the dynamic groups and close the registry for declarations.
    /// Returns the groups that became ready.
    pub fn fixup(&mut self) -> Vec<GroupId> {
        let mut fixed = Vec::new();
        for group in self.groups.iter_mut().filter(|g| !g.ready) {
            group.apply_layout();
            group.ready = true;
            tracing::debug!(group = %group.name, vars = group.vars.len(), "Script group fixed up");
            fixed.push(group.id);
        }
        self.fixed = true;
        fixed
    }

    pub fn is_fixed(&self) -> bool {
        self.fixed
    }

    pub fn group(&self, id: GroupId) -> &GroupDef {
        &self.groups[id.0]
    }

    pub(crate) fn group_mut(&mut self, id: GroupId) -> &mut GroupDef {
        &mut self.groups[id.0]
    }

    pub fn groups(&self) -> impl Iterator<Item = &GroupDef> {
        self.groups.iter()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn lookup_group(&self, name: &str) -> Result<&GroupDef, CfgError> {
        self.by_name
            .get(name)
            .map(|&id| &self.groups[id.0])
            .ok_or_else(|| CfgError::GroupNotFound(name.to_string()))
    }

    pub fn lookup_var(&self, group: &str, var: &str) -> Result<(&GroupDef, &Mapping), CfgError> {
        let g = self.lookup_group(group)?;
        let m = g.var(var).ok_or_else(|| CfgError::VariableNotFound {
            group: group.to_string(),
            var: var.to_string(),
        })?;
        Ok((g, m))
    }
}

//! Group instance arrays.
//!
//! An instance overrides a subset of a group's variables for one numeric id.
//! Variables not explicitly set hold a copy of the group default, kept in step
//! by `update_defaults` whenever the default changes.
//!
//! Arrays are immutable once frozen. Edits go through an `ArrayDraft` that is
//! frozen into a new array and installed with the rest of the Block.

use std::sync::Arc;

use crate::store::shm::{AllocError, ShmCharge, ShmPool};
use crate::store::value::SharedValue;

/// Bitmap of explicitly set variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarSet(Vec<u64>);

impl VarSet {
    pub fn new(vars: usize) -> Self {
        Self(vec![0; vars.div_ceil(64)])
    }

    pub fn insert(&mut self, index: usize) {
        self.0[index / 64] |= 1 << (index % 64);
    }

    pub fn remove(&mut self, index: usize) {
        self.0[index / 64] &= !(1 << (index % 64));
    }

    pub fn contains(&self, index: usize) -> bool {
        self.0
            .get(index / 64)
            .is_some_and(|word| word & (1 << (index % 64)) != 0)
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|&word| word == 0)
    }

    /// Bytes the bitmap takes in the shared area.
    pub fn byte_len(vars: usize) -> usize {
        vars.div_ceil(8)
    }
}

/// One per-id override record.
#[derive(Debug, Clone)]
pub struct GroupInstance {
    id: u32,
    set: VarSet,
    values: Vec<SharedValue>,
}

impl GroupInstance {
    fn new(id: u32, defaults: &[SharedValue]) -> Self {
        Self {
            id,
            set: VarSet::new(defaults.len()),
            values: defaults.to_vec(),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn is_set(&self, index: usize) -> bool {
        self.set.contains(index)
    }

    pub fn set_vars(&self) -> &VarSet {
        &self.set
    }

    pub fn value(&self, index: usize) -> &SharedValue {
        &self.values[index]
    }

    pub fn values(&self) -> &[SharedValue] {
        &self.values
    }

    pub(crate) fn set_value(&mut self, index: usize, value: SharedValue) {
        self.values[index] = value;
        self.set.insert(index);
    }

    /// Drop the override and fall back to `default`.
    pub(crate) fn reset_value(&mut self, index: usize, default: SharedValue) {
        self.values[index] = default;
        self.set.remove(index);
    }
}

#[derive(Debug)]
struct ArrayInner {
    items: Vec<GroupInstance>,
    _charge: ShmCharge,
}

/// Frozen, sorted instance array shared between Blocks.
#[derive(Debug, Clone)]
pub struct InstanceArray(Arc<ArrayInner>);

impl InstanceArray {
    /// Linear scan in ascending id order.
    pub fn find(&self, id: u32) -> Option<&GroupInstance> {
        find_in(&self.0.items, id).map(|i| &self.0.items[i])
    }

    pub fn len(&self) -> usize {
        self.0.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &GroupInstance> {
        self.0.items.iter()
    }

    /// First id strictly greater than `after`, or the smallest id when
    /// `after` is `None`.
    pub fn next_id(&self, after: Option<u32>) -> Option<u32> {
        self.0
            .items
            .iter()
            .map(GroupInstance::id)
            .find(|&id| after.map_or(true, |a| id > a))
    }

    /// Copy the array for editing.
    pub fn draft(&self) -> ArrayDraft {
        ArrayDraft {
            items: self.0.items.clone(),
        }
    }

    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }
}

/// Bytes one instance takes: id, set bitmap, value area.
pub fn slot_bytes(vars: usize, group_size: usize) -> usize {
    std::mem::size_of::<u32>() + VarSet::byte_len(vars) + group_size
}

fn find_in(items: &[GroupInstance], id: u32) -> Option<usize> {
    // TODO: items are sorted, switch to a binary search once groups carry
    // more than a few dozen instances
    for (i, item) in items.iter().enumerate() {
        if item.id == id {
            return Some(i);
        }
        if item.id > id {
            break;
        }
    }
    None
}

/// Mutable copy of an instance array.
#[derive(Debug, Clone, Default)]
pub struct ArrayDraft {
    items: Vec<GroupInstance>,
}

impl ArrayDraft {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find(&self, id: u32) -> Option<&GroupInstance> {
        find_in(&self.items, id).map(|i| &self.items[i])
    }

    pub fn find_mut(&mut self, id: u32) -> Option<&mut GroupInstance> {
        find_in(&self.items, id).map(move |i| &mut self.items[i])
    }

    /// Insert `id` at its sorted position with the group defaults.
    /// Returns false if the id is already present.
    pub fn extend(&mut self, id: u32, defaults: &[SharedValue]) -> bool {
        match self.items.binary_search_by_key(&id, GroupInstance::id) {
            Ok(_) => false,
            Err(pos) => {
                self.items.insert(pos, GroupInstance::new(id, defaults));
                true
            }
        }
    }

    /// Remove `id`. Returns false if it was not present.
    pub fn collapse(&mut self, id: u32) -> bool {
        match find_in(&self.items, id) {
            Some(i) => {
                self.items.remove(i);
                true
            }
            None => false,
        }
    }

    /// Propagate a new group default to every instance that does not
    /// override the variable.
    pub fn update_defaults(&mut self, index: usize, value: &SharedValue) {
        for item in self.items.iter_mut().filter(|i| !i.is_set(index)) {
            item.values[index] = value.clone();
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Charge the pool and freeze. An empty draft freezes to `None`.
    pub fn freeze(self, pool: &ShmPool, slot_bytes: usize) -> Result<Option<InstanceArray>, AllocError> {
        if self.items.is_empty() {
            return Ok(None);
        }
        let charge = pool.charge(self.items.len() * slot_bytes)?;
        Ok(Some(InstanceArray(Arc::new(ArrayInner {
            items: self.items,
            _charge: charge,
        }))))
    }
}

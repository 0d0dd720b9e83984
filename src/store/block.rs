//! The configuration Block: one immutable snapshot of every group's values.
//!
//! # Design Decisions
//! - A Block is shared as `Arc<Block>`; the last holder frees it together with
//!   every string and instance array only it referenced
//! - Variables flagged atomic live in an `AtomicI32` slot and may be written in
//!   place in the installed Block; everything else is fixed at install
//! - The Block's own charge covers the group headers and default value areas;
//!   strings and instance arrays carry their own charges

use std::sync::atomic::{AtomicI32, Ordering};

use crate::store::instance::{GroupInstance, InstanceArray};
use crate::store::schema::{GroupId, Registry};
use crate::store::shm::{AllocError, ShmCharge, ShmPool};
use crate::store::value::SharedValue;

/// Header each group carries in the Block: variable count and array pointer.
const GROUP_HEADER: usize = std::mem::size_of::<u32>() + std::mem::size_of::<usize>();

/// Storage of one default value.
#[derive(Debug)]
pub enum Slot {
    Atomic(AtomicI32),
    Plain(SharedValue),
}

impl Slot {
    pub fn load(&self) -> SharedValue {
        match self {
            Slot::Atomic(v) => SharedValue::Int(v.load(Ordering::Acquire)),
            Slot::Plain(v) => v.clone(),
        }
    }

    fn duplicate(&self) -> Self {
        match self {
            Slot::Atomic(v) => Slot::Atomic(AtomicI32::new(v.load(Ordering::Acquire))),
            Slot::Plain(v) => Slot::Plain(v.clone()),
        }
    }
}

/// Values and instances of one group inside a Block.
#[derive(Debug)]
pub struct GroupData {
    pub(crate) slots: Vec<Slot>,
    pub(crate) instances: Option<InstanceArray>,
}

impl GroupData {
    pub fn value(&self, index: usize) -> SharedValue {
        self.slots[index].load()
    }

    /// Snapshot of the default value area.
    pub fn values(&self) -> Vec<SharedValue> {
        self.slots.iter().map(Slot::load).collect()
    }

    pub fn instances(&self) -> Option<&InstanceArray> {
        self.instances.as_ref()
    }

    pub fn instance(&self, id: u32) -> Option<&GroupInstance> {
        self.instances.as_ref().and_then(|a| a.find(id))
    }

    pub(crate) fn duplicate(&self) -> Self {
        Self {
            slots: self.slots.iter().map(Slot::duplicate).collect(),
            instances: self.instances.clone(),
        }
    }
}

/// A complete configuration snapshot.
#[derive(Debug)]
pub struct Block {
    version: u64,
    groups: Vec<GroupData>,
    _charge: ShmCharge,
}

impl Block {
    /// Bytes charged for the Block itself.
    pub fn area_bytes(registry: &Registry) -> usize {
        registry.groups().map(|g| GROUP_HEADER + g.size).sum()
    }

    pub(crate) fn new(
        version: u64,
        groups: Vec<GroupData>,
        registry: &Registry,
        pool: &ShmPool,
    ) -> Result<Self, AllocError> {
        let charge = pool.charge(Self::area_bytes(registry))?;
        Ok(Self {
            version,
            groups,
            _charge: charge,
        })
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn group(&self, id: GroupId) -> &GroupData {
        &self.groups[id.index()]
    }

    pub fn groups(&self) -> &[GroupData] {
        &self.groups
    }

    pub fn value(&self, id: GroupId, index: usize) -> SharedValue {
        self.groups[id.index()].value(index)
    }

    /// Write an atomic slot in place. Returns false if the slot is not atomic.
    pub(crate) fn store_atomic(&self, id: GroupId, index: usize, value: i32) -> bool {
        match &self.groups[id.index()].slots[index] {
            Slot::Atomic(slot) => {
                slot.store(value, Ordering::Release);
                true
            }
            Slot::Plain(_) => false,
        }
    }

    pub(crate) fn duplicate_groups(&self) -> Vec<GroupData> {
        self.groups.iter().map(GroupData::duplicate).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::schema::{VarDef, VarFlags};

    fn registry() -> Registry {
        let mut reg = Registry::new();
        reg.declare_group(
            "core",
            vec![
                VarDef::int("debug", 1).flags(VarFlags::ATOMIC),
                VarDef::string("name", Some("srv")),
            ],
            None,
        )
        .unwrap();
        reg
    }

    fn group(pool: &ShmPool) -> GroupData {
        GroupData {
            slots: vec![
                Slot::Atomic(AtomicI32::new(1)),
                Slot::Plain(SharedValue::String(Some(pool.alloc_str("srv").unwrap()))),
            ],
            instances: None,
        }
    }

    #[test]
    fn test_atomic_store_in_place() {
        let pool = ShmPool::unbounded();
        let reg = registry();
        let block = Block::new(1, vec![group(&pool)], &reg, &pool).unwrap();
        let id = reg.lookup_group("core").unwrap().id;

        assert!(block.store_atomic(id, 0, 4));
        assert_eq!(block.value(id, 0), SharedValue::Int(4));
        assert!(!block.store_atomic(id, 1, 4));
    }

    #[test]
    fn test_duplicate_is_independent() {
        let pool = ShmPool::unbounded();
        let reg = registry();
        let block = Block::new(1, vec![group(&pool)], &reg, &pool).unwrap();
        let id = reg.lookup_group("core").unwrap().id;

        let copy = Block::new(2, block.duplicate_groups(), &reg, &pool).unwrap();
        block.store_atomic(id, 0, 9);
        assert_eq!(copy.value(id, 0), SharedValue::Int(1));
        assert_eq!(copy.value(id, 1).as_str(), Some("srv"));
    }

    #[test]
    fn test_block_charge_released() {
        let pool = ShmPool::unbounded();
        let reg = registry();
        let block = Block::new(1, vec![group(&pool)], &reg, &pool).unwrap();
        assert!(pool.used() >= Block::area_bytes(&reg));
        drop(block);
        assert_eq!(pool.used(), 0);
    }
}

//! Entity references and fixed-range pool allocation.
//!
//! Entities are stable slot indices. Each pool owns a contiguous range of
//! slots and recycles freed slots lowest-index first, so a scene reload
//! hands out the same indices in the same order.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fmt;
use std::ops::Range;

/// Raw slot index into the store.
pub type EntityIndex = u32;

/// A reference to an entity slot in the store.
///
/// The index is stable for as long as the entity stays active and is
/// recycled after deactivation.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Entity(EntityIndex);

impl Entity {
    /// Create an entity reference from a raw index.
    #[must_use]
    pub const fn from_index(index: EntityIndex) -> Self {
        Self(index)
    }

    /// Get the entity's slot index.
    #[must_use]
    pub const fn index(self) -> EntityIndex {
        self.0
    }

    /// Slot index as `usize`, for indexing columns.
    #[must_use]
    pub const fn slot(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Entity({})", self.0)
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The two entity pools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pool {
    /// Survives scene transitions.
    Global,
    /// Cleared on every scene transition.
    Scene,
}

impl fmt::Display for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => f.write_str("global"),
            Self::Scene => f.write_str("scene"),
        }
    }
}

/// Allocator for one pool's slot range.
///
/// Never grows: the free heap is filled once at construction and slots only
/// move between it and the active state.
pub struct PoolAllocator {
    /// Slots owned by this pool.
    range: Range<EntityIndex>,
    /// Free slots, smallest first.
    free: BinaryHeap<Reverse<EntityIndex>>,
    /// Number of currently active slots.
    active_count: u32,
}

impl PoolAllocator {
    /// Create an allocator owning `range`.
    #[must_use]
    pub fn new(range: Range<EntityIndex>) -> Self {
        let free = range.clone().map(Reverse).collect();
        Self {
            range,
            free,
            active_count: 0,
        }
    }

    /// Take the lowest free slot, or `None` when the pool is exhausted.
    pub fn allocate(&mut self) -> Option<Entity> {
        let Reverse(index) = self.free.pop()?;
        self.active_count += 1;
        Some(Entity(index))
    }

    /// Return a slot to the pool.
    ///
    /// The caller tracks activity; this only checks range ownership.
    /// Returns `true` if the slot belongs to this pool.
    pub fn deallocate(&mut self, entity: Entity) -> bool {
        if !self.owns(entity) {
            return false;
        }
        self.free.push(Reverse(entity.index()));
        self.active_count -= 1;
        true
    }

    /// Whether `entity` falls inside this pool's range.
    #[must_use]
    pub fn owns(&self, entity: Entity) -> bool {
        self.range.contains(&entity.index())
    }

    /// The slot range owned by this pool.
    #[must_use]
    pub fn range(&self) -> Range<EntityIndex> {
        self.range.clone()
    }

    /// Number of currently active slots.
    #[must_use]
    pub const fn active_count(&self) -> u32 {
        self.active_count
    }

    /// Total number of slots.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.range.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_allocation() {
        let mut pool = PoolAllocator::new(4..8);

        let e1 = pool.allocate().unwrap();
        let e2 = pool.allocate().unwrap();

        assert_eq!(e1.index(), 4);
        assert_eq!(e2.index(), 5);
        assert_eq!(pool.active_count(), 2);
    }

    #[test]
    fn test_lowest_slot_reused_first() {
        let mut pool = PoolAllocator::new(0..4);
        let entities: Vec<Entity> = (0..4).map(|_| pool.allocate().unwrap()).collect();

        assert!(pool.deallocate(entities[2]));
        assert!(pool.deallocate(entities[0]));

        assert_eq!(pool.allocate().unwrap().index(), 0);
        assert_eq!(pool.allocate().unwrap().index(), 2);
    }

    #[test]
    fn test_pool_exhaustion() {
        let mut pool = PoolAllocator::new(0..2);
        assert!(pool.allocate().is_some());
        assert!(pool.allocate().is_some());
        assert!(pool.allocate().is_none());
    }

    #[test]
    fn test_foreign_slot_rejected() {
        let mut pool = PoolAllocator::new(0..2);
        assert!(!pool.deallocate(Entity::from_index(7)));
    }
}

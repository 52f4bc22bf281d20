//! EntityStore - the container for every entity and component.
//!
//! The store is sized once: a global pool, a scene pool, and one column
//! per component type covering both. Activation and deactivation only move
//! slots between free and active; nothing allocates afterwards.

use tracing::{debug, trace};

use crate::{
    Column, Component, ComputedLayout, FlexStyle, Name, Parent, Properties, StoreError,
    StoreResult, Tags, Transform,
    entity::{Entity, EntityIndex, Pool, PoolAllocator},
};

/// One column per built-in component.
pub(crate) struct Columns {
    pub(crate) names: Column<Name>,
    pub(crate) tags: Column<Tags>,
    pub(crate) transforms: Column<Transform>,
    pub(crate) properties: Column<Properties>,
    pub(crate) parents: Column<Parent>,
    pub(crate) flex: Column<FlexStyle>,
    pub(crate) layouts: Column<ComputedLayout>,
}

impl Columns {
    fn with_len(len: usize) -> Self {
        Self {
            names: Column::with_len(len),
            tags: Column::with_len(len),
            transforms: Column::with_len(len),
            properties: Column::with_len(len),
            parents: Column::with_len(len),
            flex: Column::with_len(len),
            layouts: Column::with_len(len),
        }
    }

    fn clear(&mut self, entity: Entity) {
        self.names.remove(entity);
        self.tags.remove(entity);
        self.transforms.remove(entity);
        self.properties.remove(entity);
        self.parents.remove(entity);
        self.flex.remove(entity);
        self.layouts.remove(entity);
    }
}

/// Fixed-capacity entity and component storage.
pub struct EntityStore {
    global: PoolAllocator,
    scene: PoolAllocator,
    /// Activity flag per slot.
    active: Vec<bool>,
    /// Bumped whenever selector membership may have changed.
    revision: u64,
    pub(crate) columns: Columns,
}

impl EntityStore {
    /// Create a store with `global` global slots followed by `scene` scene slots.
    #[must_use]
    pub fn new(global: u32, scene: u32) -> Self {
        let total = global + scene;
        Self {
            global: PoolAllocator::new(0..global),
            scene: PoolAllocator::new(global..total),
            active: vec![false; total as usize],
            revision: 0,
            columns: Columns::with_len(total as usize),
        }
    }

    /// Total number of slots across both pools.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.active.len()
    }

    /// Number of slots in one pool.
    #[must_use]
    pub fn pool_capacity(&self, pool: Pool) -> usize {
        self.allocator(pool).capacity()
    }

    // ==================== Entity Operations ====================

    /// Activate a fresh entity from `pool`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::PoolExhausted`] when every slot is in use.
    pub fn activate(&mut self, pool: Pool) -> StoreResult<Entity> {
        let entity = self
            .allocator_mut(pool)
            .allocate()
            .ok_or(StoreError::PoolExhausted(pool))?;

        self.active[entity.slot()] = true;
        self.revision += 1;
        trace!(%entity, %pool, "entity activated");
        Ok(entity)
    }

    /// Deactivate an entity, dropping all of its components.
    ///
    /// Returns `true` if the entity was active.
    pub fn deactivate(&mut self, entity: Entity) -> bool {
        if !self.is_active(entity) {
            return false;
        }

        self.columns.clear(entity);
        self.active[entity.slot()] = false;

        let pool = if self.global.owns(entity) {
            Pool::Global
        } else {
            Pool::Scene
        };
        self.allocator_mut(pool).deallocate(entity);
        self.revision += 1;
        trace!(%entity, "entity deactivated");
        true
    }

    /// Deactivate every scene entity. Returns how many were active.
    pub fn reset_scene(&mut self) -> usize {
        let mut count = 0;
        for index in self.scene.range() {
            if self.deactivate(Entity::from_index(index)) {
                count += 1;
            }
        }
        debug!(count, "scene entities reset");
        count
    }

    /// Check if an entity is active.
    #[must_use]
    pub fn is_active(&self, entity: Entity) -> bool {
        self.active.get(entity.slot()).copied().unwrap_or(false)
    }

    /// Resolve a raw index to an active entity.
    ///
    /// # Errors
    ///
    /// [`StoreError::OutOfRange`] for an index outside both pools,
    /// [`StoreError::Inactive`] for a free slot.
    pub fn entity(&self, index: EntityIndex) -> StoreResult<Entity> {
        if index as usize >= self.capacity() {
            return Err(StoreError::OutOfRange(index));
        }
        let entity = Entity::from_index(index);
        if self.is_active(entity) {
            Ok(entity)
        } else {
            Err(StoreError::Inactive(entity))
        }
    }

    /// The pool an active entity was drawn from.
    #[must_use]
    pub fn pool_of(&self, entity: Entity) -> Option<Pool> {
        if !self.is_active(entity) {
            return None;
        }
        if self.global.owns(entity) {
            Some(Pool::Global)
        } else {
            Some(Pool::Scene)
        }
    }

    /// Iterate over active entities in index order.
    pub fn active(&self) -> impl Iterator<Item = Entity> + '_ {
        self.active
            .iter()
            .enumerate()
            .filter(|&(_, &active)| active)
            .map(|(index, _)| Entity::from_index(index as EntityIndex))
    }

    /// Number of active entities.
    #[must_use]
    pub fn active_count(&self) -> u32 {
        self.global.active_count() + self.scene.active_count()
    }

    /// Monotonic counter bumped on activation, deactivation and any write
    /// to a component that selectors read.
    #[must_use]
    pub const fn revision(&self) -> u64 {
        self.revision
    }

    /// Find the lowest-index active entity named `name`.
    #[must_use]
    pub fn find_by_name(&self, name: &str) -> Option<Entity> {
        self.active()
            .find(|&e| self.get::<Name>(e).is_some_and(|n| n.0 == name))
    }

    // ==================== Component Operations ====================

    /// Get a reference to an entity's component.
    #[must_use]
    pub fn get<T: Component>(&self, entity: Entity) -> Option<&T> {
        if !self.is_active(entity) {
            return None;
        }
        T::column(self).get(entity)
    }

    /// Get a mutable reference to an entity's component.
    pub fn get_mut<T: Component>(&mut self, entity: Entity) -> Option<&mut T> {
        if !self.is_active(entity) {
            return None;
        }
        if T::AFFECTS_SELECTION {
            self.revision += 1;
        }
        T::column_mut(self).get_mut(entity)
    }

    /// Add or replace a component, returning the previous value.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Inactive`] if the entity is not active.
    pub fn insert<T: Component>(&mut self, entity: Entity, component: T) -> StoreResult<Option<T>> {
        if !self.is_active(entity) {
            return Err(StoreError::Inactive(entity));
        }
        if T::AFFECTS_SELECTION {
            self.revision += 1;
        }
        Ok(T::column_mut(self).insert(entity, component))
    }

    /// Remove a component, returning it if it existed.
    pub fn remove<T: Component>(&mut self, entity: Entity) -> Option<T> {
        if !self.is_active(entity) {
            return None;
        }
        let removed = T::column_mut(self).remove(entity);
        if removed.is_some() && T::AFFECTS_SELECTION {
            self.revision += 1;
        }
        removed
    }

    /// Check if an entity has a component.
    #[must_use]
    pub fn has<T: Component>(&self, entity: Entity) -> bool {
        self.get::<T>(entity).is_some()
    }

    /// Get or insert the default value of a component.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Inactive`] if the entity is not active.
    pub fn get_or_default<T: Component + Default>(&mut self, entity: Entity) -> StoreResult<&mut T> {
        if !self.has::<T>(entity) {
            self.insert(entity, T::default())?;
        }
        self.get_mut::<T>(entity).ok_or(StoreError::Inactive(entity))
    }

    fn allocator(&self, pool: Pool) -> &PoolAllocator {
        match pool {
            Pool::Global => &self.global,
            Pool::Scene => &self.scene,
        }
    }

    fn allocator_mut(&mut self, pool: Pool) -> &mut PoolAllocator {
        match pool {
            Pool::Global => &mut self.global,
            Pool::Scene => &mut self.scene,
        }
    }
}

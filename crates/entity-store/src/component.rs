//! Component columns and typed access.
//!
//! Every component type lives in one fixed-length column indexed by entity
//! slot. Columns are allocated once, at store construction.

use crate::{Entity, EntityStore};

/// A type that can be stored on entities.
///
/// Implemented for the store's built-in components through
/// `impl_component!`; the implementation selects the column that holds
/// the type.
pub trait Component: Sized + 'static {
    /// Whether writing this component can change selector membership
    /// (bumps the store revision).
    const AFFECTS_SELECTION: bool = false;

    /// The column holding this component type.
    fn column(store: &EntityStore) -> &Column<Self>;

    /// Mutable access to the column holding this component type.
    fn column_mut(store: &mut EntityStore) -> &mut Column<Self>;
}

/// Fixed-length storage for one component type.
pub struct Column<T> {
    slots: Vec<Option<T>>,
}

impl<T> Column<T> {
    /// Create a column with one empty slot per entity.
    #[must_use]
    pub fn with_len(len: usize) -> Self {
        let mut slots = Vec::with_capacity(len);
        slots.resize_with(len, || None);
        Self { slots }
    }

    #[must_use]
    pub fn get(&self, entity: Entity) -> Option<&T> {
        self.slots.get(entity.slot())?.as_ref()
    }

    pub fn get_mut(&mut self, entity: Entity) -> Option<&mut T> {
        self.slots.get_mut(entity.slot())?.as_mut()
    }

    /// Store `value`, returning the previous value.
    pub fn insert(&mut self, entity: Entity, value: T) -> Option<T> {
        self.slots.get_mut(entity.slot())?.replace(value)
    }

    pub fn remove(&mut self, entity: Entity) -> Option<T> {
        self.slots.get_mut(entity.slot())?.take()
    }

    #[must_use]
    pub fn has(&self, entity: Entity) -> bool {
        self.get(entity).is_some()
    }

    /// Number of slots (equals the store capacity).
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Wire a component type to its column field on [`EntityStore`].
macro_rules! impl_component {
    ($ty:ty, $field:ident) => {
        impl_component!($ty, $field, false);
    };
    ($ty:ty, $field:ident, $affects:expr) => {
        impl $crate::Component for $ty {
            const AFFECTS_SELECTION: bool = $affects;

            fn column(store: &$crate::EntityStore) -> &$crate::Column<Self> {
                &store.columns.$field
            }

            fn column_mut(store: &mut $crate::EntityStore) -> &mut $crate::Column<Self> {
                &mut store.columns.$field
            }
        }
    };
}

pub(crate) use impl_component;

//! Entity Store - fixed-capacity component storage for rule-driven scenes
//!
//! # Key Concepts
//!
//! - **Entity**: a stable slot index, drawn from the global or scene pool
//! - **Pool**: a fixed slot range; global slots survive scene transitions
//! - **Component**: typed data in a per-type column (`Name`, `Tags`, ...)
//! - **Revision**: a counter bumped whenever selector membership may change
//!
//! # Example
//!
//! ```
//! use entity_store::{EntityStore, Name, Pool, Tags};
//!
//! let mut store = EntityStore::new(16, 64);
//! let player = store.activate(Pool::Global).unwrap();
//! store.insert(player, Name("player".into())).unwrap();
//! store.insert(player, Tags::from_iter(["hero"])).unwrap();
//!
//! assert_eq!(store.find_by_name("player"), Some(player));
//! ```

mod component;
mod components;
mod entity;
mod error;
mod store;

pub use component::{Column, Component};
pub use components::{
    Align, ComputedLayout, Edges, FlexDirection, FlexStyle, FlexWrap, JustifyContent, Name,
    Parent, PositionType, Properties, PropertyValue, Quat, Symbol, Tags, Transform, Vec3,
};
pub use entity::{Entity, EntityIndex, Pool, PoolAllocator};
pub use error::{StoreError, StoreResult};
pub use store::EntityStore;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{Component, Entity, EntityStore, Name, Pool, Properties, Tags, Transform};
}

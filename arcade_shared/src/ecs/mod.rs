//! Entity-component-system core.
//!
//! - [`Entity`]: generational handle.
//! - [`SparseSet`]: per-type component store with O(1) insert/remove/lookup.
//! - [`Registry`]: owner of entities, stores and singleton resources.
//! - [`View`]: lazy join over several stores.
//! - [`SystemManager`]: ordered per-tick update list.

mod entity;
mod registry;
mod sparse;
mod system;
mod view;

pub use entity::Entity;
pub use registry::Registry;
pub use sparse::{Component, SparseSet};
pub use system::{System, SystemManager};
pub use view::{Query, View};

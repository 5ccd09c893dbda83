//! Sparse-set component storage.
//!
//! Layout:
//! - `dense`: packed component values, no gaps.
//! - `entities`: the owning entity of each dense slot (reverse lookup).
//! - `sparse`: entity index -> dense slot, or `ABSENT`.
//!
//! Removal swaps the last dense slot into the hole, so it is O(1) and does
//! not preserve order.

use std::any::Any;

use super::entity::Entity;

const ABSENT: u32 = u32::MAX;

/// Marker for types that can be stored as components.
pub trait Component: 'static + Send + Sync {}

impl<T: 'static + Send + Sync> Component for T {}

/// Typed sparse set.
#[derive(Debug, Clone)]
pub struct SparseSet<T> {
    sparse: Vec<u32>,
    dense: Vec<T>,
    entities: Vec<Entity>,
}

impl<T> Default for SparseSet<T> {
    fn default() -> Self {
        Self {
            sparse: Vec::new(),
            dense: Vec::new(),
            entities: Vec::new(),
        }
    }
}

impl<T> SparseSet<T> {
    fn slot_of(&self, entity: Entity) -> Option<usize> {
        let slot = *self.sparse.get(entity.index() as usize)?;
        if slot == ABSENT {
            return None;
        }
        let slot = slot as usize;
        (self.entities[slot] == entity).then_some(slot)
    }

    /// Inserts or replaces the value for `entity`.
    pub fn insert(&mut self, entity: Entity, value: T) -> &mut T {
        let index = entity.index() as usize;
        if index >= self.sparse.len() {
            self.sparse.resize(index + 1, ABSENT);
        }
        let slot = self.sparse[index];
        if slot != ABSENT {
            let slot = slot as usize;
            self.entities[slot] = entity;
            self.dense[slot] = value;
            return &mut self.dense[slot];
        }
        self.sparse[index] = self.dense.len() as u32;
        self.entities.push(entity);
        self.dense.push(value);
        let last = self.dense.len() - 1;
        &mut self.dense[last]
    }

    /// Removes the value for `entity`, if any.
    pub fn remove(&mut self, entity: Entity) -> Option<T> {
        let slot = self.slot_of(entity)?;
        let last = self.dense.len() - 1;
        self.dense.swap(slot, last);
        self.entities.swap(slot, last);
        if slot != last {
            let moved = self.entities[slot];
            self.sparse[moved.index() as usize] = slot as u32;
        }
        self.sparse[entity.index() as usize] = ABSENT;
        self.entities.pop();
        self.dense.pop()
    }

    pub fn get(&self, entity: Entity) -> Option<&T> {
        self.slot_of(entity).map(|slot| &self.dense[slot])
    }

    pub fn get_mut(&mut self, entity: Entity) -> Option<&mut T> {
        let slot = self.slot_of(entity)?;
        Some(&mut self.dense[slot])
    }

    pub fn contains(&self, entity: Entity) -> bool {
        self.slot_of(entity).is_some()
    }

    /// Owning entities in dense order.
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    /// Component values in dense order.
    pub fn values(&self) -> &[T] {
        &self.dense
    }

    pub fn iter(&self) -> impl Iterator<Item = (Entity, &T)> {
        self.entities.iter().copied().zip(self.dense.iter())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Entity, &mut T)> {
        self.entities.iter().copied().zip(self.dense.iter_mut())
    }

    pub fn len(&self) -> usize {
        self.dense.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dense.is_empty()
    }

    pub fn clear(&mut self) {
        self.sparse.clear();
        self.dense.clear();
        self.entities.clear();
    }

    /// Checks the dense/sparse cross references. Used by the registry's
    /// invariant audit.
    pub(crate) fn is_consistent(&self) -> bool {
        self.dense.len() == self.entities.len()
            && self
                .entities
                .iter()
                .enumerate()
                .all(|(slot, e)| self.sparse.get(e.index() as usize) == Some(&(slot as u32)))
    }
}

/// Type-erased view of a store, so the registry can purge an entity from
/// every store without knowing the component types.
pub(crate) trait ErasedStore: Send + Sync {
    fn purge(&mut self, entity: Entity);
    fn holds(&self, entity: Entity) -> bool;
    fn holders(&self) -> &[Entity];
    fn consistent(&self) -> bool;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Component> ErasedStore for SparseSet<T> {
    fn purge(&mut self, entity: Entity) {
        self.remove(entity);
    }

    fn holds(&self, entity: Entity) -> bool {
        self.contains(entity)
    }

    fn holders(&self) -> &[Entity] {
        self.entities()
    }

    fn consistent(&self) -> bool {
        self.is_consistent()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

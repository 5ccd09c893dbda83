//! Entity registry.
//!
//! Owns the live entity set, one sparse store per component type, and a small
//! set of typed singleton resources (outboxes, clocks) that systems share.
//! There is one registry per simulation instance and nothing outside the
//! owning thread touches it.

use std::{
    any::{Any, TypeId},
    collections::HashMap,
};

use crate::error::EcsError;

use super::{
    entity::{Entity, EntityAllocator},
    sparse::{Component, ErasedStore, SparseSet},
    view::{Query, View},
};

#[derive(Default)]
pub struct Registry {
    entities: EntityAllocator,
    stores: HashMap<TypeId, Box<dyn ErasedStore>>,
    resources: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl Registry {
    /// Allocates a fresh entity with no components.
    pub fn create(&mut self) -> Entity {
        self.entities.allocate()
    }

    /// Destroys an entity and purges it from every store.
    ///
    /// Returns `false` (and does nothing) when the handle is already invalid.
    pub fn destroy(&mut self, entity: Entity) -> bool {
        if !self.entities.is_alive(entity) {
            return false;
        }
        for store in self.stores.values_mut() {
            store.purge(entity);
        }
        self.entities.deallocate(entity)
    }

    pub fn is_alive(&self, entity: Entity) -> bool {
        self.entities.is_alive(entity)
    }

    /// Number of live entities.
    pub fn len(&self) -> usize {
        self.entities.live()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.live() == 0
    }

    /// Live entities in slot order.
    pub fn entities(&self) -> impl Iterator<Item = Entity> + '_ {
        self.entities.iter()
    }

    fn check(&self, entity: Entity) -> Result<(), EcsError> {
        if self.entities.is_alive(entity) {
            Ok(())
        } else {
            Err(EcsError::EntityInvalid(entity))
        }
    }

    /// Attaches or replaces component `T` on `entity`.
    pub fn emplace<T: Component>(&mut self, entity: Entity, value: T) -> Result<&mut T, EcsError> {
        self.check(entity)?;
        Ok(self.store_mut_or_insert::<T>().insert(entity, value))
    }

    /// Detaches `T` from `entity`, returning it if it was present.
    pub fn remove<T: Component>(&mut self, entity: Entity) -> Option<T> {
        self.store_mut::<T>()?.remove(entity)
    }

    /// Looks up `T` on `entity`. A missing component is `Ok(None)`; only a
    /// stale handle is an error.
    pub fn get<T: Component>(&self, entity: Entity) -> Result<Option<&T>, EcsError> {
        self.check(entity)?;
        Ok(self.store::<T>().and_then(|s| s.get(entity)))
    }

    pub fn get_mut<T: Component>(&mut self, entity: Entity) -> Result<Option<&mut T>, EcsError> {
        self.check(entity)?;
        Ok(self.store_mut::<T>().and_then(|s| s.get_mut(entity)))
    }

    pub fn has<T: Component>(&self, entity: Entity) -> bool {
        self.store::<T>().is_some_and(|s| s.contains(entity))
    }

    /// Whether `entity` holds any component at all.
    pub fn has_any(&self, entity: Entity) -> bool {
        self.stores.values().any(|s| s.holds(entity))
    }

    pub fn store<T: Component>(&self) -> Option<&SparseSet<T>> {
        self.stores
            .get(&TypeId::of::<T>())
            .and_then(|s| s.as_any().downcast_ref::<SparseSet<T>>())
    }

    pub fn store_mut<T: Component>(&mut self) -> Option<&mut SparseSet<T>> {
        self.stores
            .get_mut(&TypeId::of::<T>())
            .and_then(|s| s.as_any_mut().downcast_mut::<SparseSet<T>>())
    }

    fn store_mut_or_insert<T: Component>(&mut self) -> &mut SparseSet<T> {
        let boxed = self
            .stores
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(SparseSet::<T>::default()));
        match boxed.as_any_mut().downcast_mut::<SparseSet<T>>() {
            Some(store) => store,
            None => unreachable!("store keyed by TypeId::of::<T>() holds SparseSet<T>"),
        }
    }

    /// Number of entities holding `T`.
    pub fn count<T: Component>(&self) -> usize {
        self.store::<T>().map_or(0, SparseSet::len)
    }

    /// Lazy join over the stores in `Q`, yielding `(Entity, (&A, &B, ..))`.
    pub fn view<Q: Query>(&self) -> View<'_, Q> {
        View::new(self)
    }

    /// Mutable join: `f` gets `&mut A` plus shared borrows of the components
    /// in `Q` for every entity holding all of them.
    ///
    /// The `A` store is detached for the duration of the call, so `Q` must not
    /// name `A` again (such a query simply matches nothing).
    pub fn view_mut<A, Q, F>(&mut self, mut f: F)
    where
        A: Component,
        Q: Query,
        F: for<'a, 'b> FnMut(Entity, &'a mut A, Q::Item<'b>),
    {
        let key = TypeId::of::<A>();
        let Some(mut detached) = self.stores.remove(&key) else {
            return;
        };
        if let Some(primary) = detached.as_any_mut().downcast_mut::<SparseSet<A>>() {
            if let Some(others) = Q::fetch(self) {
                match Q::driver(others) {
                    Some(driver) if driver.len() < primary.len() => {
                        for &entity in driver {
                            if let (Some(a), Some(rest)) =
                                (primary.get_mut(entity), Q::get(others, entity))
                            {
                                f(entity, a, rest);
                            }
                        }
                    }
                    _ => {
                        for (entity, a) in primary.iter_mut() {
                            if let Some(rest) = Q::get(others, entity) {
                                f(entity, a, rest);
                            }
                        }
                    }
                }
            }
        }
        self.stores.insert(key, detached);
    }

    /// Inserts or replaces a singleton resource.
    pub fn insert_resource<R: Component>(&mut self, resource: R) {
        self.resources.insert(TypeId::of::<R>(), Box::new(resource));
    }

    pub fn resource<R: Component>(&self) -> Option<&R> {
        self.resources
            .get(&TypeId::of::<R>())
            .and_then(|r| r.downcast_ref::<R>())
    }

    pub fn resource_mut<R: Component>(&mut self) -> Option<&mut R> {
        self.resources
            .get_mut(&TypeId::of::<R>())
            .and_then(|r| r.downcast_mut::<R>())
    }

    /// Returns the resource, creating it with `Default` first if needed.
    pub fn resource_or_default<R: Component + Default>(&mut self) -> &mut R {
        let boxed = self
            .resources
            .entry(TypeId::of::<R>())
            .or_insert_with(|| Box::new(R::default()));
        match boxed.downcast_mut::<R>() {
            Some(r) => r,
            None => unreachable!("resource keyed by TypeId::of::<R>() holds R"),
        }
    }

    pub fn take_resource<R: Component>(&mut self) -> Option<R> {
        self.resources
            .remove(&TypeId::of::<R>())
            .and_then(|r| r.downcast::<R>().ok())
            .map(|r| *r)
    }

    /// Verifies store bookkeeping and that no store references a dead entity.
    pub fn audit(&self) -> Result<(), EcsError> {
        for store in self.stores.values() {
            if !store.consistent() {
                return Err(EcsError::Corrupted("dense/sparse mismatch"));
            }
            if !store.holders().iter().all(|e| self.entities.is_alive(*e)) {
                return Err(EcsError::Corrupted("store references a dead entity"));
            }
        }
        Ok(())
    }

    /// Drops every entity, component and resource.
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Pos(f32, f32);
    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Vel(f32, f32);
    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Hp(i32);

    #[test]
    fn emplace_and_get() -> anyhow::Result<()> {
        let mut reg = Registry::default();
        let e = reg.create();
        reg.emplace(e, Pos(1.0, 2.0))?;
        assert_eq!(reg.get::<Pos>(e)?, Some(&Pos(1.0, 2.0)));
        assert_eq!(reg.get::<Vel>(e)?, None);
        Ok(())
    }

    #[test]
    fn emplace_replaces() -> anyhow::Result<()> {
        let mut reg = Registry::default();
        let e = reg.create();
        reg.emplace(e, Hp(10))?;
        reg.emplace(e, Hp(3))?;
        assert_eq!(reg.get::<Hp>(e)?, Some(&Hp(3)));
        assert_eq!(reg.count::<Hp>(), 1);
        Ok(())
    }

    #[test]
    fn destroy_purges_every_store() -> anyhow::Result<()> {
        let mut reg = Registry::default();
        let e = reg.create();
        reg.emplace(e, Pos(0.0, 0.0))?;
        reg.emplace(e, Vel(1.0, 1.0))?;
        assert!(reg.destroy(e));
        assert_eq!(reg.count::<Pos>(), 0);
        assert_eq!(reg.count::<Vel>(), 0);
        assert!(!reg.has_any(e));
        Ok(())
    }

    #[test]
    fn destroy_twice_is_noop() {
        let mut reg = Registry::default();
        let e = reg.create();
        assert!(reg.destroy(e));
        assert!(!reg.destroy(e));
        assert!(reg.is_empty());
    }

    #[test]
    fn stale_handle_is_rejected_after_slot_reuse() -> anyhow::Result<()> {
        let mut reg = Registry::default();
        let old = reg.create();
        reg.emplace(old, Hp(1))?;
        reg.destroy(old);

        let new = reg.create();
        assert_eq!(old.index(), new.index());
        reg.emplace(new, Hp(99))?;

        assert_eq!(reg.get::<Hp>(old), Err(EcsError::EntityInvalid(old)));
        assert!(reg.emplace(old, Hp(5)).is_err());
        assert_eq!(reg.get::<Hp>(new)?, Some(&Hp(99)));
        Ok(())
    }

    #[test]
    fn remove_missing_is_noop() -> anyhow::Result<()> {
        let mut reg = Registry::default();
        let e = reg.create();
        assert_eq!(reg.remove::<Hp>(e), None);
        reg.emplace(e, Hp(2))?;
        assert_eq!(reg.remove::<Hp>(e), Some(Hp(2)));
        assert_eq!(reg.remove::<Hp>(e), None);
        Ok(())
    }

    #[test]
    fn view_mut_updates_in_place() -> anyhow::Result<()> {
        let mut reg = Registry::default();
        let moving = reg.create();
        let still = reg.create();
        reg.emplace(moving, Pos(0.0, 0.0))?;
        reg.emplace(moving, Vel(2.0, -1.0))?;
        reg.emplace(still, Pos(5.0, 5.0))?;

        reg.view_mut::<Pos, (Vel,), _>(|_, pos, (vel,)| {
            pos.0 += vel.0;
            pos.1 += vel.1;
        });

        assert_eq!(reg.get::<Pos>(moving)?, Some(&Pos(2.0, -1.0)));
        assert_eq!(reg.get::<Pos>(still)?, Some(&Pos(5.0, 5.0)));
        assert!(reg.store::<Pos>().is_some());
        Ok(())
    }

    #[test]
    fn view_mut_with_empty_query_visits_all() -> anyhow::Result<()> {
        let mut reg = Registry::default();
        for i in 0..3 {
            let e = reg.create();
            reg.emplace(e, Hp(i))?;
        }
        reg.view_mut::<Hp, (), _>(|_, hp, ()| hp.0 += 10);
        let mut values: Vec<_> = reg.view::<(Hp,)>().map(|(_, (hp,))| hp.0).collect();
        values.sort();
        assert_eq!(values, vec![10, 11, 12]);
        Ok(())
    }

    #[test]
    fn resources_roundtrip() {
        let mut reg = Registry::default();
        reg.resource_or_default::<Vec<u32>>().push(4);
        assert_eq!(reg.resource::<Vec<u32>>(), Some(&vec![4]));
        assert_eq!(reg.take_resource::<Vec<u32>>(), Some(vec![4]));
        assert!(reg.resource::<Vec<u32>>().is_none());
    }

    #[test]
    fn audit_passes_after_churn() -> anyhow::Result<()> {
        let mut reg = Registry::default();
        let mut alive = Vec::new();
        for i in 0..50 {
            let e = reg.create();
            reg.emplace(e, Hp(i))?;
            alive.push(e);
            if i % 3 == 0 {
                let victim = alive.remove(alive.len() / 2);
                reg.destroy(victim);
            }
        }
        reg.audit()?;
        for e in alive {
            assert!(reg.get::<Hp>(e)?.is_some());
        }
        Ok(())
    }

    #[test]
    fn audit_flags_components_of_dead_entities() -> anyhow::Result<()> {
        let mut reg = Registry::default();
        let e = reg.create();
        reg.emplace(e, Hp(1))?;
        // Free the slot behind the stores' back.
        reg.entities.deallocate(e);
        let error = reg.audit().err();
        assert_eq!(error, Some(EcsError::Corrupted("store references a dead entity")));
        assert!(error.is_some_and(|e| e.is_fatal()));
        Ok(())
    }
}

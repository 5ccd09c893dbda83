//! Multi-component views.
//!
//! A view is a lazy join: it walks the smallest of the requested stores and
//! keeps the entities present in all the others. Iteration order is the dense
//! order of that driving store, which changes whenever components are added
//! or removed, so callers must not rely on it across mutations.

use super::{
    entity::Entity,
    registry::Registry,
    sparse::{Component, SparseSet},
};

/// A tuple of component types that can be joined.
pub trait Query: 'static {
    /// Borrowed stores the join reads from.
    type Stores<'a>: Copy;
    /// What one matching entity yields.
    type Item<'a>;

    /// Borrows the stores, or `None` if any of them was never created.
    fn fetch(registry: &Registry) -> Option<Self::Stores<'_>>;

    /// Entity list of the smallest store. `None` for the empty query.
    fn driver<'a>(stores: Self::Stores<'a>) -> Option<&'a [Entity]>;

    fn get<'a>(stores: Self::Stores<'a>, entity: Entity) -> Option<Self::Item<'a>>;
}

impl Query for () {
    type Stores<'a> = ();
    type Item<'a> = ();

    fn fetch(_registry: &Registry) -> Option<Self::Stores<'_>> {
        Some(())
    }

    fn driver<'a>(_stores: Self::Stores<'a>) -> Option<&'a [Entity]> {
        None
    }

    fn get<'a>(_stores: Self::Stores<'a>, _entity: Entity) -> Option<Self::Item<'a>> {
        Some(())
    }
}

macro_rules! impl_query {
    ($($name:ident),+) => {
        impl<$($name: Component),+> Query for ($($name,)+) {
            type Stores<'a> = ($(&'a SparseSet<$name>,)+);
            type Item<'a> = ($(&'a $name,)+);

            fn fetch(registry: &Registry) -> Option<Self::Stores<'_>> {
                Some(($(registry.store::<$name>()?,)+))
            }

            #[allow(non_snake_case)]
            fn driver<'a>(stores: Self::Stores<'a>) -> Option<&'a [Entity]> {
                let ($($name,)+) = stores;
                let mut best: Option<&'a [Entity]> = None;
                $(
                    let candidate = $name.entities();
                    if best.map_or(true, |b| candidate.len() < b.len()) {
                        best = Some(candidate);
                    }
                )+
                best
            }

            #[allow(non_snake_case)]
            fn get<'a>(stores: Self::Stores<'a>, entity: Entity) -> Option<Self::Item<'a>> {
                let ($($name,)+) = stores;
                Some(($($name.get(entity)?,)+))
            }
        }
    };
}

impl_query!(A);
impl_query!(A, B);
impl_query!(A, B, C);
impl_query!(A, B, C, D);
impl_query!(A, B, C, D, E);

/// Lazy, restartable join over the stores named by `Q`.
pub struct View<'a, Q: Query> {
    stores: Option<Q::Stores<'a>>,
    driver: &'a [Entity],
    cursor: usize,
}

impl<'a, Q: Query> View<'a, Q> {
    pub(crate) fn new(registry: &'a Registry) -> Self {
        let stores = Q::fetch(registry);
        let driver = stores.and_then(|s| Q::driver(s)).unwrap_or(&[]);
        Self {
            stores,
            driver,
            cursor: 0,
        }
    }

    /// Upper bound on the number of matches (size of the driving store).
    pub fn len_hint(&self) -> usize {
        self.driver.len()
    }

    /// Only the matching entities.
    pub fn entities(self) -> impl Iterator<Item = Entity> + 'a {
        self.map(|(entity, _)| entity)
    }
}

impl<'a, Q: Query> Clone for View<'a, Q> {
    fn clone(&self) -> Self {
        Self {
            stores: self.stores,
            driver: self.driver,
            cursor: 0,
        }
    }
}

impl<'a, Q: Query> Iterator for View<'a, Q> {
    type Item = (Entity, Q::Item<'a>);

    fn next(&mut self) -> Option<Self::Item> {
        let stores = self.stores?;
        while let Some(&entity) = self.driver.get(self.cursor) {
            self.cursor += 1;
            if let Some(item) = Q::get(stores, entity) {
                return Some((entity, item));
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.driver.len().saturating_sub(self.cursor)))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use crate::ecs::Registry;

    #[derive(Debug, PartialEq)]
    struct A(u32);
    #[derive(Debug, PartialEq)]
    struct B(u32);
    #[derive(Debug, PartialEq)]
    struct C;

    #[test]
    fn view_yields_exactly_joint_holders() -> anyhow::Result<()> {
        let mut reg = Registry::default();
        let ab = reg.create();
        let abc = reg.create();
        let a_only = reg.create();
        let b_only = reg.create();

        reg.emplace(ab, A(1))?;
        reg.emplace(ab, B(1))?;
        reg.emplace(abc, A(2))?;
        reg.emplace(abc, B(2))?;
        reg.emplace(abc, C)?;
        reg.emplace(a_only, A(3))?;
        reg.emplace(b_only, B(4))?;

        let found: HashSet<_> = reg.view::<(A, B)>().entities().collect();
        assert_eq!(found, HashSet::from([ab, abc]));
        Ok(())
    }

    #[test]
    fn view_is_restartable() -> anyhow::Result<()> {
        let mut reg = Registry::default();
        for i in 0..10 {
            let e = reg.create();
            reg.emplace(e, A(i))?;
            if i % 2 == 0 {
                reg.emplace(e, B(i))?;
            }
        }
        let view = reg.view::<(A, B)>();
        let first: HashSet<_> = view.clone().entities().collect();
        let second: HashSet<_> = view.entities().collect();
        let third: HashSet<_> = reg.view::<(A, B)>().entities().collect();
        assert_eq!(first.len(), 5);
        assert_eq!(first, second);
        assert_eq!(first, third);
        Ok(())
    }

    #[test]
    fn view_over_missing_store_is_empty() {
        let mut reg = Registry::default();
        let e = reg.create();
        assert!(reg.emplace(e, A(0)).is_ok());
        assert_eq!(reg.view::<(A, C)>().count(), 0);
    }

    #[test]
    fn view_drives_from_smallest_store() -> anyhow::Result<()> {
        let mut reg = Registry::default();
        for i in 0..20 {
            let e = reg.create();
            reg.emplace(e, A(i))?;
            if i == 7 {
                reg.emplace(e, B(i))?;
            }
        }
        let view = reg.view::<(A, B)>();
        assert_eq!(view.len_hint(), 1);
        let items: Vec<_> = view.map(|(_, (a, b))| (a.0, b.0)).collect();
        assert_eq!(items, vec![(7, 7)]);
        Ok(())
    }
}

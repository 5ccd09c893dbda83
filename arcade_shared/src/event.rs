//! Event and messaging system.
//!
//! This is a small typed event bus. The client pushes replicated events
//! (chat, game start, kicks) on it for the presentation layer to drain.

use std::{
    any::{Any, TypeId},
    collections::HashMap,
};

/// Typed event bus.
#[derive(Default)]
pub struct EventBus {
    queues: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl EventBus {
    fn queue_mut<E: 'static + Send + Sync>(&mut self) -> &mut Vec<E> {
        let q = self
            .queues
            .entry(TypeId::of::<E>())
            .or_insert_with(|| Box::new(Vec::<E>::new()));
        match q.downcast_mut::<Vec<E>>() {
            Some(q) => q,
            None => unreachable!("queue keyed by TypeId::of::<E>() holds Vec<E>"),
        }
    }

    /// Pushes an event into the queue.
    pub fn push<E: 'static + Send + Sync>(&mut self, e: E) {
        self.queue_mut::<E>().push(e);
    }

    /// Drains all queued events of a type.
    pub fn drain<E: 'static + Send + Sync>(&mut self) -> Vec<E> {
        self.queues
            .remove(&TypeId::of::<E>())
            .and_then(|boxed| boxed.downcast::<Vec<E>>().ok())
            .map(|boxed| *boxed)
            .unwrap_or_default()
    }

    /// Number of queued events of a type.
    pub fn pending<E: 'static + Send + Sync>(&self) -> usize {
        self.queues
            .get(&TypeId::of::<E>())
            .and_then(|q| q.downcast_ref::<Vec<E>>())
            .map_or(0, Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Chat(&'static str);

    #[test]
    fn drain_returns_in_push_order_and_empties() {
        let mut bus = EventBus::default();
        bus.push(Chat("a"));
        bus.push(Chat("b"));
        bus.push(7u32);
        assert_eq!(bus.pending::<Chat>(), 2);
        assert_eq!(bus.drain::<Chat>(), vec![Chat("a"), Chat("b")]);
        assert!(bus.drain::<Chat>().is_empty());
        assert_eq!(bus.drain::<u32>(), vec![7]);
    }
}

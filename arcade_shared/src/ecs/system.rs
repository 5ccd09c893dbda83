//! Ordered system scheduling.

use tracing::trace_span;

use super::registry::Registry;

/// A unit of per-tick simulation logic.
///
/// Systems own whatever private state they need between ticks (timers, RNG);
/// everything shared goes through the registry.
pub trait System: Send {
    fn name(&self) -> &'static str;
    fn update(&mut self, registry: &mut Registry, dt: f32);
}

/// Runs a fixed list of systems in registration order, once per tick.
#[derive(Debug)]
pub struct SystemManager<S> {
    systems: Vec<S>,
    ticks: u64,
}

impl<S> Default for SystemManager<S> {
    fn default() -> Self {
        Self {
            systems: Vec::new(),
            ticks: 0,
        }
    }
}

impl<S: System> SystemManager<S> {
    pub fn add(&mut self, system: S) -> &mut Self {
        self.systems.push(system);
        self
    }

    /// Builder-style `add`.
    pub fn with(mut self, system: S) -> Self {
        self.systems.push(system);
        self
    }

    /// Runs every system once. Each system sees the writes of the ones before it.
    pub fn tick(&mut self, registry: &mut Registry, dt: f32) {
        for system in &mut self.systems {
            let _span = trace_span!("system", name = system.name()).entered();
            system.update(registry, dt);
        }
        self.ticks += 1;
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn len(&self) -> usize {
        self.systems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.systems.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.systems.iter().map(System::name).collect()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut S> {
        self.systems.iter_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Trace(Vec<&'static str>);

    enum Step {
        First,
        Second,
    }

    impl System for Step {
        fn name(&self) -> &'static str {
            match self {
                Step::First => "first",
                Step::Second => "second",
            }
        }

        fn update(&mut self, registry: &mut Registry, _dt: f32) {
            let name = self.name();
            registry.resource_or_default::<Trace>().0.push(name);
        }
    }

    #[test]
    fn systems_run_in_registration_order() {
        let mut reg = Registry::default();
        let mut manager = SystemManager::default().with(Step::Second).with(Step::First);
        manager.tick(&mut reg, 0.016);
        manager.tick(&mut reg, 0.016);
        assert_eq!(
            reg.resource::<Trace>().map(|t| t.0.clone()),
            Some(vec!["second", "first", "second", "first"])
        );
        assert_eq!(manager.ticks(), 2);
        assert_eq!(manager.names(), vec!["second", "first"]);
    }
}

//! Enemy AI: every `AiBehavior` decides its entity's velocity.

use arcade_shared::{
    components::Velocity,
    ecs::{Entity, Registry},
};

use crate::components::{AiBehavior, Dead};

pub fn update(registry: &mut Registry, dt: f32) {
    let agents: Vec<(Entity, AiBehavior)> = registry
        .store::<AiBehavior>()
        .map(|s| s.iter().map(|(e, b)| (e, *b)).collect())
        .unwrap_or_default();

    for (entity, mut behavior) in agents {
        if registry.has::<Dead>(entity) {
            continue;
        }
        let velocity = behavior.decide(registry, entity, dt);
        if let Ok(Some(v)) = registry.get_mut::<Velocity>(entity) {
            v.0 = velocity;
        }
        if let Ok(Some(b)) = registry.get_mut::<AiBehavior>(entity) {
            *b = behavior;
        }
    }
}

#[cfg(test)]
mod tests {
    use arcade_shared::{components::Transform, math::Vec2};

    use super::*;

    #[test]
    fn sine_behavior_advances_phase_and_sets_velocity() -> anyhow::Result<()> {
        let mut reg = Registry::default();
        let e = reg.create();
        reg.emplace(e, Transform::at(500.0, 300.0))?;
        reg.emplace(e, Velocity::default())?;
        reg.emplace(
            e,
            AiBehavior::Sine {
                speed: 100.0,
                amplitude: 10.0,
                frequency: 1.0,
                phase: 0.0,
            },
        )?;
        update(&mut reg, 0.25);
        let v = reg.get::<Velocity>(e)?.map(|v| v.0).unwrap_or_default();
        assert_eq!(v.x, -100.0);
        assert!(v.y.abs() < 1e-3, "quarter period lands on the crest: {v:?}");
        assert!(matches!(
            reg.get::<AiBehavior>(e)?,
            Some(AiBehavior::Sine { phase, .. }) if *phase > 0.0
        ));
        Ok(())
    }

    #[test]
    fn dead_agents_are_skipped() -> anyhow::Result<()> {
        let mut reg = Registry::default();
        let e = reg.create();
        reg.emplace(e, Transform::at(0.0, 0.0))?;
        reg.emplace(e, Velocity(Vec2::new(5.0, 5.0)))?;
        reg.emplace(e, AiBehavior::Straight { speed: 100.0 })?;
        reg.emplace(e, Dead)?;
        update(&mut reg, 0.1);
        assert_eq!(reg.get::<Velocity>(e)?, Some(&Velocity(Vec2::new(5.0, 5.0))));
        Ok(())
    }
}

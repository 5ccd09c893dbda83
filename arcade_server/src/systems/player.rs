//! Player control: input mask to velocity.

use arcade_shared::{
    components::{InputIntent, Velocity},
    ecs::{Entity, Registry},
    math::Vec2,
};

use crate::components::MovementSpeed;

/// Approach rate toward the target velocity while a direction is held.
pub const ACCELERATION: f32 = 8.0;
/// Approach rate back to rest once input is released.
pub const DECELERATION: f32 = 10.0;

pub fn update(registry: &mut Registry, dt: f32) {
    if let Some(speeds) = registry.store_mut::<MovementSpeed>() {
        for (_, speed) in speeds.iter_mut() {
            if speed.boost_remaining > 0.0 {
                speed.boost_remaining -= dt;
                if speed.boost_remaining <= 0.0 {
                    speed.boost_remaining = 0.0;
                    speed.multiplier = 1.0;
                }
            }
        }
    }

    let steered: Vec<(Entity, Vec2)> = registry
        .view::<(InputIntent, MovementSpeed, Velocity)>()
        .map(|(e, (intent, speed, vel))| {
            let target = intent.mask.direction().normalized() * speed.current();
            let rate = if target == Vec2::ZERO {
                DECELERATION
            } else {
                ACCELERATION
            };
            (e, vel.0.lerp(target, rate * dt))
        })
        .collect();

    for (e, v) in steered {
        if let Ok(Some(vel)) = registry.get_mut::<Velocity>(e) {
            vel.0 = v;
        }
    }
}

#[cfg(test)]
mod tests {
    use arcade_shared::{components::WeaponKind, net::InputMask};

    use super::*;
    use crate::spawn;

    #[test]
    fn held_direction_accelerates_on_one_axis() -> anyhow::Result<()> {
        let mut reg = Registry::default();
        let p = spawn::player(&mut reg, 1, WeaponKind::Classic, Vec2::new(100.0, 100.0))?;
        if let Some(intent) = reg.get_mut::<InputIntent>(p)? {
            intent.mask = InputMask::RIGHT;
        }
        update(&mut reg, 1.0 / 60.0);
        let v = reg.get::<Velocity>(p)?.map(|v| v.0).unwrap_or_default();
        assert!(v.x > 0.0);
        assert_eq!(v.y, 0.0);
        Ok(())
    }

    #[test]
    fn release_decelerates_toward_rest() -> anyhow::Result<()> {
        let mut reg = Registry::default();
        let p = spawn::player(&mut reg, 1, WeaponKind::Classic, Vec2::ZERO)?;
        reg.emplace(p, Velocity(Vec2::new(200.0, 0.0)))?;
        update(&mut reg, 0.05);
        let v = reg.get::<Velocity>(p)?.map(|v| v.0.x).unwrap_or_default();
        assert!(v < 200.0 && v > 0.0, "{v}");
        Ok(())
    }

    #[test]
    fn boost_expires() -> anyhow::Result<()> {
        let mut reg = Registry::default();
        let p = spawn::player(&mut reg, 1, WeaponKind::Classic, Vec2::ZERO)?;
        if let Some(speed) = reg.get_mut::<MovementSpeed>(p)? {
            speed.multiplier = 2.0;
            speed.boost_remaining = 0.1;
        }
        update(&mut reg, 0.2);
        assert_eq!(reg.get::<MovementSpeed>(p)?.map(|s| s.multiplier), Some(1.0));
        Ok(())
    }
}

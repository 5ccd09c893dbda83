//! Guided projectiles: homing shots and boomerangs.

use arcade_shared::{
    components::{EntityKind, Health, Transform, Velocity},
    ecs::{Entity, Registry},
    math::Vec2,
};

use crate::components::{Boomerang, Dead, Faction, Hitbox, Homing, Owner};

/// Distance at which a returning boomerang is caught by its owner.
pub const CATCH_RADIUS: f32 = 24.0;

fn center(transform: &Transform, hitbox: Option<&Hitbox>) -> Vec2 {
    transform.position + hitbox.map_or(Vec2::ZERO, |h| h.size * 0.5)
}

/// Nearest live, damageable body of a faction opposing `faction`.
fn nearest_target(registry: &Registry, from: Vec2, faction: Faction, range: f32) -> Option<Vec2> {
    registry
        .view::<(Transform, Hitbox, Faction, EntityKind)>()
        .filter(|(e, (_, _, f, kind))| {
            faction.opposes(**f)
                && !kind.is_projectile()
                && registry.has::<Health>(*e)
                && !registry.has::<Dead>(*e)
        })
        .map(|(_, (t, h, _, _))| center(t, Some(h)))
        .filter(|p| (*p - from).len_sq() <= range * range)
        .min_by(|a, b| (*a - from).len_sq().total_cmp(&(*b - from).len_sq()))
}

pub fn update(registry: &mut Registry, dt: f32) {
    steer_homing(registry, dt);
    fly_boomerangs(registry, dt);
}

fn steer_homing(registry: &mut Registry, dt: f32) {
    let steered: Vec<(Entity, Vec2)> = registry
        .view::<(Homing, Velocity, Transform, Faction)>()
        .filter_map(|(e, (homing, vel, t, faction))| {
            let from = center(t, registry.get::<Hitbox>(e).ok().flatten());
            let target = nearest_target(registry, from, *faction, homing.range)?;
            let speed = vel.0.len();
            let desired = (target - from).normalized() * speed;
            let turned = vel.0.lerp(desired, homing.steering * dt).normalized() * speed;
            Some((e, turned))
        })
        .collect();

    for (e, v) in steered {
        if let Ok(Some(vel)) = registry.get_mut::<Velocity>(e) {
            vel.0 = v;
        }
    }
}

fn fly_boomerangs(registry: &mut Registry, dt: f32) {
    let flying: Vec<(Entity, Boomerang, Vec2, Option<Entity>)> = registry
        .view::<(Boomerang, Transform)>()
        .map(|(e, (b, t))| {
            let owner = registry.get::<Owner>(e).ok().flatten().map(|o| o.0);
            (e, *b, center(t, registry.get::<Hitbox>(e).ok().flatten()), owner)
        })
        .collect();

    for (e, mut boomerang, at, owner) in flying {
        boomerang.elapsed += dt;
        if !boomerang.returning && boomerang.elapsed >= boomerang.out_time {
            boomerang.returning = true;
        }

        if boomerang.returning {
            let home = owner.and_then(|o| {
                let t = registry.get::<Transform>(o).ok().flatten()?;
                Some(center(t, registry.get::<Hitbox>(o).ok().flatten()))
            });
            match home {
                Some(home) if (home - at).len() <= CATCH_RADIUS => {
                    registry.emplace(e, Dead).ok();
                }
                Some(home) => {
                    if let Ok(Some(vel)) = registry.get_mut::<Velocity>(e) {
                        vel.0 = (home - at).normalized() * boomerang.speed;
                    }
                }
                // Owner gone: keep flying until the lifetime runs out.
                None => {}
            }
        }

        if let Ok(Some(b)) = registry.get_mut::<Boomerang>(e) {
            *b = boomerang;
        }
    }
}

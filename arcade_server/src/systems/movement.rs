//! Integration and expiry.

use arcade_shared::{
    components::{EntityKind, Transform, Velocity},
    ecs::{Entity, Registry},
    math::Vec2,
};

use crate::components::{Arena, Dead, Hitbox, Lifetime};

/// Slack around the arena before off-screen entities are culled.
pub const CULL_MARGIN: f32 = 64.0;

/// Moves every transform by its velocity and keeps players inside the arena.
pub fn integrate(registry: &mut Registry, dt: f32) {
    if let Some(velocities) = registry.store::<Velocity>() {
        let moved: Vec<(Entity, Velocity)> = velocities.iter().map(|(e, v)| (e, *v)).collect();
        for (e, v) in moved {
            if let Ok(Some(t)) = registry.get_mut::<Transform>(e) {
                t.position += v.0 * dt;
            }
        }
    }

    let Some(arena) = registry.resource::<Arena>().map(|a| a.0) else {
        return;
    };
    let players: Vec<(Entity, Vec2)> = registry
        .view::<(EntityKind, Hitbox)>()
        .filter(|(_, (kind, _))| **kind == EntityKind::Player)
        .map(|(e, (_, h))| (e, h.size))
        .collect();
    for (e, size) in players {
        if let Ok(Some(t)) = registry.get_mut::<Transform>(e) {
            t.position = arena.clamp_box(t.position, size);
        }
    }
}

/// Counts down lifetimes and marks expired or escaped entities dead.
pub fn expire(registry: &mut Registry, dt: f32) {
    let mut doomed = Vec::new();

    if let Some(lifetimes) = registry.store_mut::<Lifetime>() {
        for (e, life) in lifetimes.iter_mut() {
            life.0 -= dt;
            if life.0 <= 0.0 {
                doomed.push(e);
            }
        }
    }

    if let Some(arena) = registry.resource::<Arena>().map(|a| a.0) {
        let outer = arena.inflate(CULL_MARGIN);
        for (e, (kind, t, h)) in registry.view::<(EntityKind, Transform, Hitbox)>() {
            let escaped = if kind.is_projectile() {
                !h.rect_at(t).overlaps(&outer)
            } else if kind.is_enemy() || kind.is_powerup() {
                // These enter from the right, so only the left edge culls.
                t.position.x + h.size.x < outer.origin.x
            } else {
                false
            };
            if escaped {
                doomed.push(e);
            }
        }
    }

    for e in doomed {
        registry.emplace(e, Dead).ok();
    }
}

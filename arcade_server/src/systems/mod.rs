//! Server gameplay systems.
//!
//! The set is closed, so systems are plain enum variants dispatched through
//! the shared [`System`] contract. Registration order is the execution order:
//!
//! 1. `PlayerControl`: input mask to velocity.
//! 2. `EnemyAi`: per-entity behaviors pick a velocity.
//! 3. `Weapons`: player fire, beam cycle, turret fire.
//! 4. `Projectiles`: homing and boomerang steering.
//! 5. `Movement`: integrate transforms, clamp players to the arena.
//! 6. `Lifetime`: expire timed entities, cull out-of-bounds ones.
//! 7. `Collision`: overlaps between opposing factions apply damage.
//! 8. `Health`: depleted entities die and their killer scores.
//! 9. `Waves`: level timeline spawns enemies.
//! 10. `NetworkSync`: spawn/death/snapshot/update payloads into the outbox.

use arcade_shared::ecs::{Registry, System, SystemManager};

pub mod ai;
pub mod combat;
pub mod movement;
pub mod player;
pub mod projectiles;
pub mod sync;
pub mod waves;
pub mod weapons;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerSystem {
    PlayerControl,
    EnemyAi,
    Weapons,
    Projectiles,
    Movement,
    Lifetime,
    Collision,
    Health,
    Waves,
    NetworkSync,
}

impl ServerSystem {
    pub const ORDER: [ServerSystem; 10] = [
        Self::PlayerControl,
        Self::EnemyAi,
        Self::Weapons,
        Self::Projectiles,
        Self::Movement,
        Self::Lifetime,
        Self::Collision,
        Self::Health,
        Self::Waves,
        Self::NetworkSync,
    ];
}

impl System for ServerSystem {
    fn name(&self) -> &'static str {
        match self {
            Self::PlayerControl => "player_control",
            Self::EnemyAi => "enemy_ai",
            Self::Weapons => "weapons",
            Self::Projectiles => "projectiles",
            Self::Movement => "movement",
            Self::Lifetime => "lifetime",
            Self::Collision => "collision",
            Self::Health => "health",
            Self::Waves => "waves",
            Self::NetworkSync => "network_sync",
        }
    }

    fn update(&mut self, registry: &mut Registry, dt: f32) {
        match self {
            Self::PlayerControl => player::update(registry, dt),
            Self::EnemyAi => ai::update(registry, dt),
            Self::Weapons => weapons::update(registry, dt),
            Self::Projectiles => projectiles::update(registry, dt),
            Self::Movement => movement::integrate(registry, dt),
            Self::Lifetime => movement::expire(registry, dt),
            Self::Collision => combat::collide(registry, dt),
            Self::Health => combat::resolve_deaths(registry, dt),
            Self::Waves => waves::update(registry, dt),
            Self::NetworkSync => sync::update(registry, dt),
        }
    }
}

/// The full per-room pipeline in canonical order.
pub fn standard() -> SystemManager<ServerSystem> {
    ServerSystem::ORDER
        .into_iter()
        .fold(SystemManager::default(), SystemManager::with)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_pipeline_order() {
        let manager = standard();
        assert_eq!(
            manager.names(),
            vec![
                "player_control",
                "enemy_ai",
                "weapons",
                "projectiles",
                "movement",
                "lifetime",
                "collision",
                "health",
                "waves",
                "network_sync",
            ]
        );
    }
}

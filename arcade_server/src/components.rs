//! Server-only simulation components and room resources.
//!
//! Replicated components (transform, health, ammo, ...) live in
//! `arcade_shared::components`; what is here never crosses the wire.

use arcade_shared::{
    components::{EntityKind, Transform, WeaponKind},
    ecs::{Entity, Registry},
    math::{Rect, Vec2},
    net::Payload,
    templates::{BehaviorTemplate, LevelDefinition, PowerupType},
};
use rand::rngs::StdRng;

/// Axis-aligned collision box anchored at the transform position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hitbox {
    pub size: Vec2,
}

impl Hitbox {
    pub fn rect_at(&self, transform: &Transform) -> Rect {
        Rect::new(transform.position, self.size)
    }
}

/// Side of the fight; collisions only happen between opposing factions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Faction {
    Players,
    Enemies,
}

impl Faction {
    pub fn opposes(self, other: Faction) -> bool {
        self != other
    }
}

/// Damage dealt on contact (bodies) or on hit (projectiles).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Damage(pub i32);

/// Hits absorbed before health is touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shield {
    pub charges: i32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MovementSpeed {
    pub base: f32,
    pub multiplier: f32,
    /// Seconds left on a temporary multiplier; at zero it falls back to 1.
    pub boost_remaining: f32,
}

impl MovementSpeed {
    pub fn new(base: f32) -> Self {
        Self {
            base,
            multiplier: 1.0,
            boost_remaining: 0.0,
        }
    }

    pub fn current(&self) -> f32 {
        self.base * self.multiplier
    }
}

/// Player weapon state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Weapon {
    pub kind: WeaponKind,
    /// Seconds until the next shot is allowed.
    pub cooldown: f32,
    /// Seconds the beam stays on once triggered.
    pub beam_duration: f32,
    /// Seconds the beam needs before it can fire again.
    pub beam_recharge: f32,
    /// Fractional beam damage carried between ticks.
    pub beam_carry: f32,
}

impl Weapon {
    pub fn new(kind: WeaponKind) -> Self {
        Self {
            kind,
            cooldown: 0.0,
            beam_duration: 2.0,
            beam_recharge: 3.0,
            beam_carry: 0.0,
        }
    }
}

/// Pickup carried by a power-up entity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Powerup {
    pub kind: PowerupType,
    pub value: f32,
    pub duration: f32,
}

/// Seconds left of two-shot volleys.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DoubleFire {
    pub remaining: f32,
}

/// Seconds before the entity expires.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Lifetime(pub f32);

/// Steers toward the nearest opposing target in range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Homing {
    /// Turn rate factor per second.
    pub steering: f32,
    pub range: f32,
}

impl Default for Homing {
    fn default() -> Self {
        Self {
            steering: 3.0,
            range: 600.0,
        }
    }
}

/// Flies out, then returns to its owner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Boomerang {
    pub elapsed: f32,
    pub out_time: f32,
    pub speed: f32,
    pub returning: bool,
}

/// Entity that fired a projectile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Owner(pub Entity);

/// Last attacker, credited with the bounty on death.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LastHitBy(pub Entity);

/// Score awarded for destroying this entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bounty(pub i32);

/// Marked for removal; the network sync system announces and destroys it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Dead;

/// Spawn already announced to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Replicated;

/// Session controlling a player entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayerSlot {
    pub session_id: u32,
}

/// Values last sent to clients, used to emit updates only on change.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SyncCache {
    pub health: Option<(i32, i32)>,
    pub ammo: Option<(u16, u16, bool)>,
    pub score: Option<i32>,
    pub beam: Option<bool>,
}

/// Per-entity AI policy: a closed set of behaviors behind one `decide` entry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AiBehavior {
    Straight {
        speed: f32,
    },
    Sine {
        speed: f32,
        amplitude: f32,
        frequency: f32,
        phase: f32,
    },
    Chase {
        speed: f32,
        range: f32,
    },
    Flee {
        speed: f32,
        range: f32,
    },
    Turret {
        speed: f32,
        fire_interval: f32,
        cooldown: f32,
    },
}

impl AiBehavior {
    pub fn from_template(template: BehaviorTemplate, speed: f32) -> Self {
        match template {
            BehaviorTemplate::Straight => Self::Straight { speed },
            BehaviorTemplate::Sine {
                amplitude,
                frequency,
            } => Self::Sine {
                speed,
                amplitude,
                frequency,
                phase: 0.0,
            },
            BehaviorTemplate::Chase { range } => Self::Chase { speed, range },
            BehaviorTemplate::Flee { range } => Self::Flee { speed, range },
            BehaviorTemplate::Turret { fire_interval } => Self::Turret {
                speed,
                fire_interval,
                cooldown: fire_interval,
            },
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Straight { .. } => "straight",
            Self::Sine { .. } => "sine",
            Self::Chase { .. } => "chase",
            Self::Flee { .. } => "flee",
            Self::Turret { .. } => "turret",
        }
    }

    /// Picks this tick's velocity for `entity`. Advances internal timers.
    pub fn decide(&mut self, registry: &Registry, entity: Entity, dt: f32) -> Vec2 {
        let position = registry
            .get::<Transform>(entity)
            .ok()
            .flatten()
            .map(|t| t.position);
        let drift = |speed: f32| Vec2::new(-speed, 0.0);
        match self {
            Self::Straight { speed } | Self::Turret { speed, .. } => drift(*speed),
            Self::Sine {
                speed,
                amplitude,
                frequency,
                phase,
            } => {
                *phase += dt * *frequency * std::f32::consts::TAU;
                // d/dt of amplitude * sin(phase).
                let vy = *amplitude * *frequency * std::f32::consts::TAU * phase.cos();
                Vec2::new(-*speed, vy)
            }
            Self::Chase { speed, range } => {
                match position.and_then(|p| nearest_player(registry, p, *range)) {
                    Some((from, to)) => (to - from).normalized() * *speed,
                    None => drift(*speed),
                }
            }
            Self::Flee { speed, range } => {
                match position.and_then(|p| nearest_player(registry, p, *range)) {
                    Some((from, to)) => {
                        let away = (from - to).normalized();
                        Vec2::new(-*speed * 0.5, away.y * *speed)
                    }
                    None => drift(*speed),
                }
            }
        }
    }

    /// Turret fire timer. Returns `true` when a shot is due.
    pub fn ready_to_fire(&mut self, dt: f32) -> bool {
        match self {
            Self::Turret {
                fire_interval,
                cooldown,
                ..
            } => {
                *cooldown -= dt;
                if *cooldown <= 0.0 {
                    *cooldown += *fire_interval;
                    true
                } else {
                    false
                }
            }
            _ => false,
        }
    }
}

/// Nearest live player position within `range` of `from`.
pub fn nearest_player(registry: &Registry, from: Vec2, range: f32) -> Option<(Vec2, Vec2)> {
    registry
        .view::<(Transform, EntityKind)>()
        .filter(|(e, (_, kind))| **kind == EntityKind::Player && !registry.has::<Dead>(*e))
        .map(|(_, (t, _))| t.position)
        .filter(|p| (*p - from).len_sq() <= range * range)
        .min_by(|a, b| (*a - from).len_sq().total_cmp(&(*b - from).len_sq()))
        .map(|to| (from, to))
}

// ─── Room resources ───

/// Broadcast payloads produced during a tick, drained by the room.
#[derive(Debug, Default)]
pub struct Outbox(pub Vec<Payload>);

/// Allocator for room-unique network ids.
#[derive(Debug)]
pub struct NetIds {
    next: u32,
}

impl Default for NetIds {
    fn default() -> Self {
        Self { next: 1 }
    }
}

impl NetIds {
    pub fn allocate(&mut self) -> u32 {
        let id = self.next;
        self.next += 1;
        id
    }
}

/// Simulation time and tick counter of the room.
#[derive(Debug, Default, Clone, Copy)]
pub struct GameClock {
    pub tick: u32,
    pub elapsed: f32,
}

/// Playfield bounds.
#[derive(Debug, Clone, Copy)]
pub struct Arena(pub Rect);

/// Room tuning knobs from the create request.
#[derive(Debug, Clone, Copy)]
pub struct Difficulty {
    /// Multiplies enemy health and damage.
    pub scale: f32,
}

/// Seeded RNG owned by the room.
#[derive(Debug)]
pub struct RoomRng(pub StdRng);

/// Active level and timeline cursor.
#[derive(Debug)]
pub struct LevelState {
    pub level: LevelDefinition,
    pub cursor: usize,
    pub powerup_cursor: usize,
    /// Timeline time; reset when the level loops.
    pub time: f32,
    pub loops: u32,
}

impl LevelState {
    /// Takes ownership of `level` with its timeline sorted by spawn time.
    pub fn new(mut level: LevelDefinition) -> Self {
        level.spawns.sort_by(|a, b| a.at.total_cmp(&b.at));
        level.powerups.sort_by(|a, b| a.at.total_cmp(&b.at));
        Self {
            level,
            cursor: 0,
            powerup_cursor: 0,
            time: 0.0,
            loops: 0,
        }
    }
}

/// Debug overlay toggle mirrored to clients.
#[derive(Debug, Default, Clone, Copy)]
pub struct DebugFlag(pub bool);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chase_steers_toward_player() -> anyhow::Result<()> {
        let mut reg = Registry::default();
        let player = reg.create();
        reg.emplace(player, Transform::at(100.0, 100.0))?;
        reg.emplace(player, EntityKind::Player)?;
        let enemy = reg.create();
        reg.emplace(enemy, Transform::at(400.0, 100.0))?;

        let mut ai = AiBehavior::Chase {
            speed: 50.0,
            range: 1000.0,
        };
        let v = ai.decide(&reg, enemy, 0.016);
        assert_eq!(v, Vec2::new(-50.0, 0.0));
        Ok(())
    }

    #[test]
    fn chase_drifts_when_nobody_in_range() -> anyhow::Result<()> {
        let mut reg = Registry::default();
        let enemy = reg.create();
        reg.emplace(enemy, Transform::at(400.0, 100.0))?;
        let mut ai = AiBehavior::Chase {
            speed: 30.0,
            range: 10.0,
        };
        assert_eq!(ai.decide(&reg, enemy, 0.016), Vec2::new(-30.0, 0.0));
        Ok(())
    }

    #[test]
    fn turret_fires_on_interval() {
        let mut ai = AiBehavior::Turret {
            speed: 0.0,
            fire_interval: 1.0,
            cooldown: 1.0,
        };
        assert!(!ai.ready_to_fire(0.5));
        assert!(ai.ready_to_fire(0.5));
        assert!(!ai.ready_to_fire(0.5));
        assert!(!AiBehavior::Straight { speed: 1.0 }.ready_to_fire(10.0));
    }

    #[test]
    fn net_ids_are_unique() {
        let mut ids = NetIds::default();
        let a = ids.allocate();
        let b = ids.allocate();
        assert_ne!(a, b);
        assert_eq!(a, 1);
    }
}

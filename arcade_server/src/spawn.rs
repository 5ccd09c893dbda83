//! Archetype constructors.
//!
//! Every networked entity gets its `NetworkId` and `RoomId` here, so the
//! room-unique id invariant has a single owner.

use arcade_shared::{
    components::{
        Ammo, BeamState, EntityKind, Health, InputIntent, NetworkId, RoomId, Score, Transform,
        Velocity, WeaponKind,
    },
    ecs::{Entity, Registry},
    error::EcsError,
    math::Vec2,
    templates::{EntityTemplate, PowerupEvent},
};

use crate::components::{
    AiBehavior, Boomerang, Bounty, Damage, Faction, Hitbox, Homing, Lifetime, MovementSpeed,
    NetIds, Owner, PlayerSlot, Powerup, Shield, Weapon,
};

pub const PLAYER_SIZE: Vec2 = Vec2::new(48.0, 24.0);
pub const PLAYER_SPEED: f32 = 200.0;
pub const PLAYER_HEALTH: i32 = 100;
pub const PLAYER_CONTACT_DAMAGE: i32 = 20;
pub const POWERUP_SIZE: Vec2 = Vec2::new(32.0, 32.0);
/// Power-ups drift left with the scenery.
pub const POWERUP_DRIFT: f32 = 80.0;

/// Identity of the room the registry belongs to.
#[derive(Debug, Clone, Copy)]
pub struct RoomTag(pub u32);

fn networked(
    registry: &mut Registry,
    kind: EntityKind,
    position: Vec2,
) -> Result<Entity, EcsError> {
    let net_id = registry.resource_or_default::<NetIds>().allocate();
    let room = registry.resource::<RoomTag>().map_or(0, |r| r.0);
    let e = registry.create();
    registry.emplace(e, NetworkId(net_id))?;
    registry.emplace(e, RoomId(room))?;
    registry.emplace(e, kind)?;
    registry.emplace(
        e,
        Transform {
            position,
            rotation: 0.0,
        },
    )?;
    registry.emplace(e, Velocity::default())?;
    Ok(e)
}

pub fn player(
    registry: &mut Registry,
    session_id: u32,
    weapon: WeaponKind,
    position: Vec2,
) -> Result<Entity, EcsError> {
    let e = networked(registry, EntityKind::Player, position)?;
    registry.emplace(e, PlayerSlot { session_id })?;
    registry.emplace(e, Faction::Players)?;
    registry.emplace(e, Hitbox { size: PLAYER_SIZE })?;
    registry.emplace(e, Health::full(PLAYER_HEALTH))?;
    registry.emplace(e, Damage(PLAYER_CONTACT_DAMAGE))?;
    registry.emplace(e, MovementSpeed::new(PLAYER_SPEED))?;
    registry.emplace(e, InputIntent::default())?;
    registry.emplace(e, Weapon::new(weapon))?;
    registry.emplace(e, Ammo::default())?;
    registry.emplace(e, Score::default())?;
    if weapon == WeaponKind::Beam {
        registry.emplace(e, BeamState::default())?;
    }
    Ok(e)
}

/// Enemy from a level template. `scale` multiplies health and damage.
pub fn enemy(
    registry: &mut Registry,
    template: &EntityTemplate,
    position: Vec2,
    scale: f32,
) -> Result<Entity, EcsError> {
    let e = networked(registry, template.kind, position)?;
    let health = ((template.health as f32) * scale).round().max(1.0) as i32;
    registry.emplace(e, Faction::Enemies)?;
    registry.emplace(e, Hitbox { size: template.size })?;
    registry.emplace(e, Health::full(health))?;
    registry.emplace(e, Damage(((template.damage as f32) * scale).round() as i32))?;
    registry.emplace(e, Bounty(template.bounty))?;
    registry.emplace(e, AiBehavior::from_template(template.behavior, template.speed))?;
    if template.shield > 0 {
        registry.emplace(
            e,
            Shield {
                charges: template.shield,
            },
        )?;
    }
    Ok(e)
}

/// Power-up drop. It has no faction, so only pickups touch it.
pub fn powerup(registry: &mut Registry, event: &PowerupEvent) -> Result<Entity, EcsError> {
    let e = networked(registry, event.kind.entity_kind(), event.position)?;
    registry.emplace(e, Velocity(Vec2::new(-POWERUP_DRIFT, 0.0)))?;
    registry.emplace(e, Hitbox { size: POWERUP_SIZE })?;
    registry.emplace(
        e,
        Powerup {
            kind: event.kind,
            value: event.value,
            duration: event.duration,
        },
    )?;
    Ok(e)
}

/// Projectile flavours.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Shot {
    Plain,
    Charged,
    Tracking,
    Returning,
    Hostile,
}

impl Shot {
    pub fn kind(self) -> EntityKind {
        match self {
            Shot::Charged => EntityKind::ChargedBullet,
            Shot::Hostile => EntityKind::EnemyBullet,
            _ => EntityKind::Bullet,
        }
    }

    pub fn size(self) -> Vec2 {
        match self {
            Shot::Charged => Vec2::new(24.0, 12.0),
            _ => Vec2::new(12.0, 6.0),
        }
    }
}

pub fn projectile(
    registry: &mut Registry,
    shot: Shot,
    owner: Entity,
    position: Vec2,
    velocity: Vec2,
    damage: i32,
) -> Result<Entity, EcsError> {
    let e = networked(registry, shot.kind(), position)?;
    registry.emplace(e, Velocity(velocity))?;
    registry.emplace(e, Hitbox { size: shot.size() })?;
    registry.emplace(e, Damage(damage))?;
    registry.emplace(e, Owner(owner))?;
    registry.emplace(
        e,
        if shot == Shot::Hostile {
            Faction::Enemies
        } else {
            Faction::Players
        },
    )?;
    registry.emplace(e, Lifetime(4.0))?;
    match shot {
        Shot::Tracking => {
            registry.emplace(e, Homing::default())?;
        }
        Shot::Returning => {
            registry.emplace(
                e,
                Boomerang {
                    elapsed: 0.0,
                    out_time: 0.6,
                    speed: velocity.len(),
                    returning: false,
                },
            )?;
        }
        _ => {}
    }
    Ok(e)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn networked_entities_get_distinct_ids() -> anyhow::Result<()> {
        let mut reg = Registry::default();
        reg.insert_resource(RoomTag(3));
        let a = player(&mut reg, 1, WeaponKind::Classic, Vec2::ZERO)?;
        let b = projectile(&mut reg, Shot::Plain, a, Vec2::ZERO, Vec2::new(1.0, 0.0), 5)?;
        let ids = (reg.get::<NetworkId>(a)?.copied(), reg.get::<NetworkId>(b)?.copied());
        assert_eq!(ids, (Some(NetworkId(1)), Some(NetworkId(2))));
        assert_eq!(reg.get::<RoomId>(b)?, Some(&RoomId(3)));
        assert_eq!(reg.get::<Faction>(b)?, Some(&Faction::Players));
        Ok(())
    }

    #[test]
    fn beam_players_carry_beam_state() -> anyhow::Result<()> {
        let mut reg = Registry::default();
        let classic = player(&mut reg, 1, WeaponKind::Classic, Vec2::ZERO)?;
        let beam = player(&mut reg, 2, WeaponKind::Beam, Vec2::ZERO)?;
        assert!(!reg.has::<BeamState>(classic));
        assert!(reg.has::<BeamState>(beam));
        Ok(())
    }
}

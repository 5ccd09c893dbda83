//! Replicated gameplay components.
//!
//! These are the components both sides of the wire understand: the server
//! simulates them and the client patches them from state payloads. Server-only
//! simulation state lives in the server crate.

use serde::{Deserialize, Serialize};

use crate::{error::DecodeError, math::Vec2, net::InputMask};

/// Position (top-left of the hitbox) and facing.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Transform {
    pub position: Vec2,
    pub rotation: f32,
}

impl Transform {
    pub fn at(x: f32, y: f32) -> Self {
        Self {
            position: Vec2::new(x, y),
            rotation: 0.0,
        }
    }
}

/// Linear velocity in pixels per second.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Velocity(pub Vec2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Health {
    pub current: i32,
    pub max: i32,
}

impl Health {
    pub fn full(max: i32) -> Self {
        Self { current: max, max }
    }

    pub fn is_depleted(&self) -> bool {
        self.current <= 0
    }
}

/// Network-visible identity, unique within one room for the entity's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NetworkId(pub u32);

/// Room an entity belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RoomId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Score(pub i32);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ammo {
    pub current: u16,
    pub max: u16,
    pub reloading: bool,
    /// Seconds until the reload or the shot cooldown completes.
    pub cooldown: f32,
}

impl Default for Ammo {
    fn default() -> Self {
        Self {
            current: 100,
            max: 100,
            reloading: false,
            cooldown: 0.0,
        }
    }
}

/// Beam weapon phase as seen by clients.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BeamState {
    pub active: bool,
    pub remaining: f32,
}

/// Latest logical input for a controllable entity.
///
/// The server writes the highest-sequence mask received this tick; on the
/// client the input collaborator writes it before it is serialized upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InputIntent {
    pub mask: InputMask,
    pub sequence: u32,
}

/// Archetype tag carried in spawn and death payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum EntityKind {
    Player = 1,
    Scout = 2,
    Tank = 3,
    Boss = 4,
    Bullet = 5,
    PowerupHeal = 6,
    PowerupSpeed = 7,
    Obstacle = 8,
    EnemyBullet = 9,
    ObstacleSolid = 10,
    ChargedBullet = 11,
    PowerupDoubleFire = 12,
    PowerupShield = 13,
    BossShield = 14,
}

impl EntityKind {
    pub fn is_enemy(self) -> bool {
        matches!(self, Self::Scout | Self::Tank | Self::Boss | Self::BossShield)
    }

    pub fn is_projectile(self) -> bool {
        matches!(self, Self::Bullet | Self::EnemyBullet | Self::ChargedBullet)
    }

    pub fn is_powerup(self) -> bool {
        matches!(
            self,
            Self::PowerupHeal | Self::PowerupSpeed | Self::PowerupDoubleFire | Self::PowerupShield
        )
    }
}

impl TryFrom<u8> for EntityKind {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            1 => Self::Player,
            2 => Self::Scout,
            3 => Self::Tank,
            4 => Self::Boss,
            5 => Self::Bullet,
            6 => Self::PowerupHeal,
            7 => Self::PowerupSpeed,
            8 => Self::Obstacle,
            9 => Self::EnemyBullet,
            10 => Self::ObstacleSolid,
            11 => Self::ChargedBullet,
            12 => Self::PowerupDoubleFire,
            13 => Self::PowerupShield,
            14 => Self::BossShield,
            _ => {
                return Err(DecodeError::InvalidEnum {
                    field: "entity kind",
                    value,
                })
            }
        })
    }
}

/// Player weapon choice, sent with the login request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum WeaponKind {
    #[default]
    Classic = 0,
    Beam = 1,
    Tracker = 2,
    Boomerang = 3,
}

impl TryFrom<u8> for WeaponKind {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::Classic,
            1 => Self::Beam,
            2 => Self::Tracker,
            3 => Self::Boomerang,
            _ => {
                return Err(DecodeError::InvalidEnum {
                    field: "weapon kind",
                    value,
                })
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_kind_from_wire() {
        assert_eq!(EntityKind::try_from(4), Ok(EntityKind::Boss));
        assert_eq!(
            EntityKind::try_from(0),
            Err(DecodeError::InvalidEnum {
                field: "entity kind",
                value: 0
            })
        );
        assert_eq!(EntityKind::ChargedBullet as u8, 11);
    }

    #[test]
    fn kind_groups_are_disjoint() {
        for v in 1..=14u8 {
            let Ok(kind) = EntityKind::try_from(v) else {
                panic!("{v} should decode");
            };
            let groups = [kind.is_enemy(), kind.is_projectile(), kind.is_powerup()];
            assert!(groups.iter().filter(|g| **g).count() <= 1, "{kind:?}");
        }
    }
}

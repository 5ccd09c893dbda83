//! Entity templates and level definitions.
//!
//! These arrive already parsed (serde); file IO is left to the app. A
//! built-in level is available through [`LevelDefinition::builtin`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{components::EntityKind, math::Vec2};

/// Movement policy an enemy template starts with.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BehaviorTemplate {
    Straight,
    Sine { amplitude: f32, frequency: f32 },
    Chase { range: f32 },
    Flee { range: f32 },
    Turret { fire_interval: f32 },
}

/// Starting component set for a spawned archetype.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityTemplate {
    pub kind: EntityKind,
    pub size: Vec2,
    pub health: i32,
    /// Pixels per second.
    pub speed: f32,
    /// Contact damage dealt to the other side.
    pub damage: i32,
    /// Score awarded to whoever destroys it.
    #[serde(default)]
    pub bounty: i32,
    #[serde(default)]
    pub shield: i32,
    pub behavior: BehaviorTemplate,
}

/// One timed spawn on a level timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpawnEvent {
    /// Seconds since the game started.
    pub at: f32,
    /// Key into [`LevelDefinition::templates`].
    pub template: String,
    #[serde(default = "one")]
    pub count: u32,
    /// Spawn column; usually just past the right edge.
    pub x: f32,
    /// Fixed row, or `None` to roll one from the room's RNG.
    #[serde(default)]
    pub y: Option<f32>,
}

fn one() -> u32 {
    1
}

/// Effect granted by a power-up pickup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerupType {
    /// Restores `value` health, up to the maximum.
    Heal,
    /// Multiplies movement speed by `value` for `duration` seconds.
    Speed,
    /// Two shots per trigger for `duration` seconds.
    DoubleFire,
    /// Adds `value` shield charges.
    Shield,
}

impl PowerupType {
    pub fn entity_kind(self) -> EntityKind {
        match self {
            Self::Heal => EntityKind::PowerupHeal,
            Self::Speed => EntityKind::PowerupSpeed,
            Self::DoubleFire => EntityKind::PowerupDoubleFire,
            Self::Shield => EntityKind::PowerupShield,
        }
    }
}

/// One timed power-up drop on a level timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowerupEvent {
    /// Seconds since the game started.
    pub at: f32,
    #[serde(rename = "type")]
    pub kind: PowerupType,
    pub position: Vec2,
    #[serde(default)]
    pub value: f32,
    #[serde(default)]
    pub duration: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelDefinition {
    pub id: u32,
    pub name: String,
    pub player_start: Vec2,
    pub templates: BTreeMap<String, EntityTemplate>,
    pub spawns: Vec<SpawnEvent>,
    #[serde(default, rename = "powerup_triggers")]
    pub powerups: Vec<PowerupEvent>,
    /// Restart the timeline after the last spawn plus this many seconds.
    #[serde(default)]
    pub loop_after: Option<f32>,
}

impl LevelDefinition {
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    pub fn template(&self, name: &str) -> Option<&EntityTemplate> {
        self.templates.get(name)
    }

    /// Time of the last scheduled spawn or drop.
    pub fn timeline_end(&self) -> f32 {
        let drops = self.powerups.iter().map(|p| p.at);
        self.spawns.iter().map(|s| s.at).chain(drops).fold(0.0, f32::max)
    }

    /// Spawns naming a template that does not exist.
    pub fn dangling_spawns(&self) -> impl Iterator<Item = &SpawnEvent> {
        self.spawns
            .iter()
            .filter(|s| !self.templates.contains_key(&s.template))
    }

    /// Level 1: scouts and sine-wave scouts, tanks, then a boss, looping.
    pub fn builtin() -> Self {
        let mut templates = BTreeMap::new();
        templates.insert(
            "scout".to_string(),
            EntityTemplate {
                kind: EntityKind::Scout,
                size: Vec2::new(40.0, 32.0),
                health: 20,
                speed: 140.0,
                damage: 10,
                bounty: 100,
                shield: 0,
                behavior: BehaviorTemplate::Straight,
            },
        );
        templates.insert(
            "scout_wave".to_string(),
            EntityTemplate {
                kind: EntityKind::Scout,
                size: Vec2::new(40.0, 32.0),
                health: 20,
                speed: 120.0,
                damage: 10,
                bounty: 150,
                shield: 0,
                behavior: BehaviorTemplate::Sine {
                    amplitude: 40.0,
                    frequency: 2.0,
                },
            },
        );
        templates.insert(
            "tank".to_string(),
            EntityTemplate {
                kind: EntityKind::Tank,
                size: Vec2::new(64.0, 48.0),
                health: 80,
                speed: 60.0,
                damage: 20,
                bounty: 300,
                shield: 0,
                behavior: BehaviorTemplate::Turret { fire_interval: 1.5 },
            },
        );
        templates.insert(
            "hunter".to_string(),
            EntityTemplate {
                kind: EntityKind::Scout,
                size: Vec2::new(36.0, 28.0),
                health: 15,
                speed: 160.0,
                damage: 15,
                bounty: 200,
                shield: 0,
                behavior: BehaviorTemplate::Chase { range: 500.0 },
            },
        );
        templates.insert(
            "boss".to_string(),
            EntityTemplate {
                kind: EntityKind::Boss,
                size: Vec2::new(160.0, 160.0),
                health: 1000,
                speed: 40.0,
                damage: 40,
                bounty: 5000,
                shield: 2,
                behavior: BehaviorTemplate::Turret { fire_interval: 0.6 },
            },
        );

        let spawn = |at: f32, template: &str, count: u32, y: Option<f32>| SpawnEvent {
            at,
            template: template.to_string(),
            count,
            x: 1300.0,
            y,
        };
        let spawns = vec![
            spawn(2.0, "scout", 3, None),
            spawn(6.0, "scout_wave", 4, Some(200.0)),
            spawn(10.0, "tank", 1, Some(360.0)),
            spawn(14.0, "hunter", 2, None),
            spawn(18.0, "scout_wave", 4, Some(520.0)),
            spawn(24.0, "tank", 2, None),
            spawn(32.0, "boss", 1, Some(280.0)),
        ];

        let drop = |at: f32, kind: PowerupType, y: f32, value: f32, duration: f32| PowerupEvent {
            at,
            kind,
            position: Vec2::new(1300.0, y),
            value,
            duration,
        };
        let powerups = vec![
            drop(12.0, PowerupType::Heal, 300.0, 30.0, 0.0),
            drop(16.0, PowerupType::DoubleFire, 420.0, 0.0, 8.0),
            drop(20.0, PowerupType::Speed, 240.0, 1.5, 6.0),
            drop(28.0, PowerupType::Shield, 360.0, 2.0, 0.0),
        ];

        Self {
            id: 1,
            name: "Outer Belt".to_string(),
            player_start: Vec2::new(100.0, 340.0),
            templates,
            spawns,
            powerups,
            loop_after: Some(20.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_level_is_self_consistent() {
        let level = LevelDefinition::builtin();
        assert_eq!(level.dangling_spawns().count(), 0);
        assert_eq!(level.timeline_end(), 32.0);
    }

    #[test]
    fn level_parses_from_json_with_defaults() -> anyhow::Result<()> {
        let json = r#"{
            "id": 7,
            "name": "test",
            "player_start": { "x": 10.0, "y": 20.0 },
            "templates": {
                "drone": {
                    "kind": "Scout",
                    "size": { "x": 8.0, "y": 8.0 },
                    "health": 1,
                    "speed": 50.0,
                    "damage": 1,
                    "behavior": { "type": "sine", "amplitude": 5.0, "frequency": 1.0 }
                }
            },
            "spawns": [ { "at": 1.5, "template": "drone", "x": 1300.0 } ]
        }"#;
        let level = LevelDefinition::from_json_str(json)?;
        assert_eq!(level.spawns[0].count, 1);
        assert_eq!(level.spawns[0].y, None);
        assert_eq!(level.loop_after, None);
        assert!(level.powerups.is_empty());
        let drone = level.template("drone").map(|t| (t.bounty, t.behavior));
        assert_eq!(
            drone,
            Some((
                0,
                BehaviorTemplate::Sine {
                    amplitude: 5.0,
                    frequency: 1.0
                }
            ))
        );
        Ok(())
    }

    #[test]
    fn powerup_triggers_parse() -> anyhow::Result<()> {
        let json = r#"{
            "id": 2,
            "name": "drops",
            "player_start": { "x": 0.0, "y": 0.0 },
            "templates": {},
            "spawns": [],
            "powerup_triggers": [
                { "at": 3.0, "type": "speed", "position": { "x": 900.0, "y": 50.0 },
                  "value": 1.5, "duration": 4.0 },
                { "at": 5.0, "type": "heal", "position": { "x": 900.0, "y": 80.0 },
                  "value": 25.0 }
            ]
        }"#;
        let level = LevelDefinition::from_json_str(json)?;
        let kinds: Vec<_> = level.powerups.iter().map(|p| p.kind.entity_kind()).collect();
        assert_eq!(kinds, vec![EntityKind::PowerupSpeed, EntityKind::PowerupHeal]);
        assert_eq!(level.powerups[1].duration, 0.0);
        assert_eq!(level.timeline_end(), 5.0);
        Ok(())
    }
}

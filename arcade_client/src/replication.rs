//! Replication of server state into the client registry.
//!
//! The server addresses entities by [`NetworkId`]; this module keeps the
//! mapping to local handles. Spawn creates, death destroys, snapshots and
//! per-entity updates patch components in place. Payloads for ids the client
//! never saw spawn are dropped.

use std::collections::HashMap;

use arcade_shared::{
    components::{Ammo, BeamState, EntityKind, Health, NetworkId, Score, Transform, Velocity},
    ecs::{Component, Entity, Registry},
    error::EcsError,
    math::Vec2,
    net::{EntityState, Payload},
};
use tracing::{debug, trace};

/// Presentation data for a replicated entity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sprite {
    pub kind: EntityKind,
    pub size: Vec2,
}

/// Local mirror of one room's entities.
#[derive(Default)]
pub struct Replica {
    registry: Registry,
    by_net_id: HashMap<u32, Entity>,
    server_tick: u32,
}

impl Replica {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn entity(&self, net_id: u32) -> Option<Entity> {
        self.by_net_id.get(&net_id).copied()
    }

    pub fn len(&self) -> usize {
        self.by_net_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_net_id.is_empty()
    }

    /// Tick of the newest snapshot applied.
    pub fn server_tick(&self) -> u32 {
        self.server_tick
    }

    /// Drops everything, e.g. when leaving a room.
    pub fn clear(&mut self) {
        self.registry.clear();
        self.by_net_id.clear();
        self.server_tick = 0;
    }

    /// Applies a state or entity-event payload. Returns `false` for payloads
    /// this module does not handle.
    pub fn apply(&mut self, payload: &Payload) -> bool {
        match payload {
            Payload::EntitySpawn {
                net_id,
                kind,
                position,
                size,
            } => self.spawn(*net_id, *kind, *position, *size),
            Payload::EntityDeath { net_id, .. } => self.despawn(*net_id),
            Payload::EntitySnapshot {
                server_tick,
                entities,
                ..
            } => {
                self.server_tick = self.server_tick.max(*server_tick);
                for state in entities {
                    self.patch_state(state);
                }
            }
            Payload::HealthUpdate {
                net_id,
                current,
                max,
            } => self.patch(*net_id, Health {
                current: *current,
                max: *max,
            }),
            Payload::AmmoUpdate {
                net_id,
                current,
                max,
                reloading,
                cooldown,
            } => self.patch(*net_id, Ammo {
                current: *current,
                max: *max,
                reloading: *reloading,
                cooldown: *cooldown,
            }),
            Payload::ScoreUpdate { net_id, score } => self.patch(*net_id, Score(*score)),
            Payload::BeamState {
                net_id,
                active,
                remaining,
            } => self.patch(*net_id, BeamState {
                active: *active,
                remaining: *remaining,
            }),
            _ => return false,
        }
        true
    }

    fn spawn(&mut self, net_id: u32, kind: EntityKind, position: Vec2, size: Vec2) {
        let entity = match self.entity(net_id) {
            Some(entity) => entity,
            None => {
                let entity = self.registry.create();
                self.by_net_id.insert(net_id, entity);
                entity
            }
        };
        match self.fill(entity, net_id, kind, position, size) {
            Ok(()) => debug!(net_id, ?kind, "replicated spawn"),
            Err(error) => debug!(net_id, %error, "replicated spawn failed"),
        }
    }

    fn fill(
        &mut self,
        entity: Entity,
        net_id: u32,
        kind: EntityKind,
        position: Vec2,
        size: Vec2,
    ) -> Result<(), EcsError> {
        self.registry.emplace(entity, NetworkId(net_id))?;
        self.registry.emplace(entity, kind)?;
        self.registry.emplace(entity, Transform {
            position,
            rotation: 0.0,
        })?;
        self.registry.emplace(entity, Velocity::default())?;
        self.registry.emplace(entity, Sprite { kind, size })?;
        Ok(())
    }

    fn despawn(&mut self, net_id: u32) {
        if let Some(entity) = self.by_net_id.remove(&net_id) {
            self.registry.destroy(entity);
            trace!(net_id, "replicated death");
        }
    }

    fn patch_state(&mut self, state: &EntityState) {
        let Some(entity) = self.entity(state.net_id) else {
            trace!(net_id = state.net_id, "snapshot for unknown entity");
            return;
        };
        if let Ok(Some(t)) = self.registry.get_mut::<Transform>(entity) {
            t.position = state.position;
            t.rotation = state.rotation;
        }
        if let Ok(Some(v)) = self.registry.get_mut::<Velocity>(entity) {
            v.0 = state.velocity;
        }
    }

    fn patch<T: Component>(&mut self, net_id: u32, value: T) {
        match self.entity(net_id) {
            Some(entity) => {
                self.registry.emplace(entity, value).ok();
            }
            None => trace!(net_id, "update for unknown entity"),
        }
    }
}

//! Network sync: turns registry changes into outbound payloads.
//!
//! Runs last in the tick. Dead entities are announced and destroyed here, so
//! no other system ever observes a half-removed entity.

use arcade_shared::{
    components::{Ammo, BeamState, EntityKind, Health, NetworkId, Score, Transform, Velocity},
    ecs::{Entity, Registry},
    math::Vec2,
    net::{EntityState, Payload},
};
use tracing::trace;

use crate::components::{Dead, GameClock, Hitbox, Outbox, Replicated, SyncCache};

/// Entities per snapshot packet; keeps each body well under the wire limit.
pub const SNAPSHOT_CHUNK: usize = 1000;

pub fn update(registry: &mut Registry, _dt: f32) {
    let mut out = Vec::new();
    announce_spawns(registry, &mut out);
    reap_dead(registry, &mut out);
    snapshot(registry, &mut out);
    dirty_updates(registry, &mut out);
    registry.resource_or_default::<Outbox>().0.extend(out);
}

fn announce_spawns(registry: &mut Registry, out: &mut Vec<Payload>) {
    let fresh: Vec<(Entity, Payload)> = registry
        .view::<(NetworkId, EntityKind, Transform)>()
        .filter(|(e, _)| !registry.has::<Replicated>(*e) && !registry.has::<Dead>(*e))
        .map(|(e, (id, kind, t))| {
            let size = registry
                .get::<Hitbox>(e)
                .ok()
                .flatten()
                .map_or(Vec2::ZERO, |h| h.size);
            (
                e,
                Payload::EntitySpawn {
                    net_id: id.0,
                    kind: *kind,
                    position: t.position,
                    size,
                },
            )
        })
        .collect();

    for (e, payload) in fresh {
        registry.emplace(e, Replicated).ok();
        out.push(payload);
    }
}

fn reap_dead(registry: &mut Registry, out: &mut Vec<Payload>) {
    let dead: Vec<Entity> = registry
        .store::<Dead>()
        .map(|s| s.entities().to_vec())
        .unwrap_or_default();

    for e in dead {
        // Never-announced entities vanish silently; clients never knew them.
        if registry.has::<Replicated>(e) {
            let id = registry.get::<NetworkId>(e).ok().flatten().copied();
            let kind = registry.get::<EntityKind>(e).ok().flatten().copied();
            let position = registry
                .get::<Transform>(e)
                .ok()
                .flatten()
                .map_or(Vec2::ZERO, |t| t.position);
            if let (Some(id), Some(kind)) = (id, kind) {
                trace!(net_id = id.0, ?kind, "entity death");
                out.push(Payload::EntityDeath {
                    net_id: id.0,
                    kind,
                    position,
                });
            }
        }
        registry.destroy(e);
    }
}

fn snapshot(registry: &Registry, out: &mut Vec<Payload>) {
    let server_tick = registry.resource::<GameClock>().map_or(0, |c| c.tick);
    let mut states: Vec<EntityState> = registry
        .view::<(NetworkId, Transform, Velocity)>()
        .map(|(_, (id, t, v))| EntityState {
            net_id: id.0,
            position: t.position,
            velocity: v.0,
            rotation: t.rotation,
        })
        .collect();
    states.sort_by_key(|s| s.net_id);

    if states.len() <= SNAPSHOT_CHUNK {
        out.push(Payload::EntitySnapshot {
            server_tick,
            full: true,
            entities: states,
        });
        return;
    }
    for chunk in states.chunks(SNAPSHOT_CHUNK) {
        out.push(Payload::EntitySnapshot {
            server_tick,
            full: false,
            entities: chunk.to_vec(),
        });
    }
}

fn dirty_updates(registry: &mut Registry, out: &mut Vec<Payload>) {
    let tracked: Vec<(Entity, u32, SyncCache)> = registry
        .view::<(NetworkId,)>()
        .filter(|(e, _)| {
            registry.has::<Health>(*e)
                || registry.has::<Ammo>(*e)
                || registry.has::<Score>(*e)
                || registry.has::<BeamState>(*e)
        })
        .map(|(e, (id,))| {
            let cache = registry
                .get::<SyncCache>(e)
                .ok()
                .flatten()
                .copied()
                .unwrap_or_default();
            (e, id.0, cache)
        })
        .collect();

    for (e, net_id, mut cache) in tracked {
        if let Ok(Some(h)) = registry.get::<Health>(e) {
            let now = (h.current, h.max);
            if cache.health != Some(now) {
                cache.health = Some(now);
                out.push(Payload::HealthUpdate {
                    net_id,
                    current: h.current,
                    max: h.max,
                });
            }
        }
        if let Ok(Some(a)) = registry.get::<Ammo>(e) {
            let now = (a.current, a.max, a.reloading);
            if cache.ammo != Some(now) {
                cache.ammo = Some(now);
                out.push(Payload::AmmoUpdate {
                    net_id,
                    current: a.current,
                    max: a.max,
                    reloading: a.reloading,
                    cooldown: a.cooldown,
                });
            }
        }
        if let Ok(Some(s)) = registry.get::<Score>(e) {
            if cache.score != Some(s.0) {
                cache.score = Some(s.0);
                out.push(Payload::ScoreUpdate { net_id, score: s.0 });
            }
        }
        if let Ok(Some(b)) = registry.get::<BeamState>(e) {
            if cache.beam != Some(b.active) {
                cache.beam = Some(b.active);
                out.push(Payload::BeamState {
                    net_id,
                    active: b.active,
                    remaining: b.remaining,
                });
            }
        }
        registry.emplace(e, cache).ok();
    }
}

#[cfg(test)]
mod tests {
    use arcade_shared::components::WeaponKind;

    use super::*;
    use crate::spawn::{self, Shot};

    fn drain(reg: &mut Registry) -> Vec<Payload> {
        reg.resource_mut::<Outbox>()
            .map(|o| std::mem::take(&mut o.0))
            .unwrap_or_default()
    }

    fn ops(payloads: &[Payload]) -> Vec<arcade_shared::net::OpCode> {
        payloads.iter().map(Payload::op_code).collect()
    }

    #[test]
    fn new_entities_are_announced_once() -> anyhow::Result<()> {
        use arcade_shared::net::OpCode;

        let mut reg = Registry::default();
        spawn::player(&mut reg, 1, WeaponKind::Classic, Vec2::ZERO)?;
        update(&mut reg, 0.016);
        let first = drain(&mut reg);
        assert_eq!(
            ops(&first),
            vec![
                OpCode::EntitySpawn,
                OpCode::EntitySnapshot,
                OpCode::HealthUpdate,
                OpCode::AmmoUpdate,
                OpCode::ScoreUpdate,
            ]
        );

        update(&mut reg, 0.016);
        assert_eq!(ops(&drain(&mut reg)), vec![OpCode::EntitySnapshot]);
        Ok(())
    }

    #[test]
    fn dead_entities_are_announced_and_destroyed() -> anyhow::Result<()> {
        let mut reg = Registry::default();
        let p = spawn::player(&mut reg, 1, WeaponKind::Classic, Vec2::ZERO)?;
        let shot = spawn::projectile(&mut reg, Shot::Plain, p, Vec2::ZERO, Vec2::ZERO, 1)?;
        update(&mut reg, 0.016);
        drain(&mut reg);

        reg.emplace(shot, Dead)?;
        update(&mut reg, 0.016);
        let out = drain(&mut reg);
        assert!(matches!(out[0], Payload::EntityDeath { net_id: 2, .. }));
        assert!(!reg.is_alive(shot));
        match &out[1] {
            Payload::EntitySnapshot { entities, .. } => assert_eq!(entities.len(), 1),
            other => panic!("expected snapshot, got {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn unannounced_dead_entities_vanish_silently() -> anyhow::Result<()> {
        let mut reg = Registry::default();
        let p = spawn::player(&mut reg, 1, WeaponKind::Classic, Vec2::ZERO)?;
        reg.emplace(p, Dead)?;
        update(&mut reg, 0.016);
        let out = drain(&mut reg);
        assert!(out
            .iter()
            .all(|p| !matches!(p, Payload::EntitySpawn { .. } | Payload::EntityDeath { .. })));
        assert!(!reg.is_alive(p));
        Ok(())
    }

    #[test]
    fn health_change_is_sent_once() -> anyhow::Result<()> {
        let mut reg = Registry::default();
        let p = spawn::player(&mut reg, 1, WeaponKind::Classic, Vec2::ZERO)?;
        update(&mut reg, 0.016);
        drain(&mut reg);

        if let Some(h) = reg.get_mut::<Health>(p)? {
            h.current = 40;
        }
        update(&mut reg, 0.016);
        let updates: Vec<_> = drain(&mut reg)
            .into_iter()
            .filter(|p| matches!(p, Payload::HealthUpdate { .. }))
            .collect();
        assert_eq!(
            updates,
            vec![Payload::HealthUpdate {
                net_id: 1,
                current: 40,
                max: 100
            }]
        );
        Ok(())
    }

    #[test]
    fn large_snapshots_are_chunked() {
        let mut reg = Registry::default();
        for i in 0..(SNAPSHOT_CHUNK + 5) {
            let e = reg.create();
            reg.emplace(e, NetworkId(i as u32 + 1)).ok();
            reg.emplace(e, Transform::default()).ok();
            reg.emplace(e, Velocity::default()).ok();
        }
        let mut out = Vec::new();
        snapshot(&reg, &mut out);
        let sizes: Vec<(usize, bool)> = out
            .iter()
            .filter_map(|p| match p {
                Payload::EntitySnapshot { entities, full, .. } => Some((entities.len(), *full)),
                _ => None,
            })
            .collect();
        assert_eq!(sizes, vec![(SNAPSHOT_CHUNK, false), (5, false)]);
    }
}

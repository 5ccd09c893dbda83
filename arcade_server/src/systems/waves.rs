//! Level timeline: spawns enemy waves and power-up drops as simulation time
//! passes.

use arcade_shared::{
    ecs::Registry,
    math::{Rect, Vec2},
    templates::{EntityTemplate, SpawnEvent},
};
use rand::Rng;
use tracing::{debug, warn};

use crate::{
    components::{Arena, Difficulty, LevelState, RoomRng},
    spawn,
};

/// Horizontal gap between members of one wave.
pub const WAVE_SPACING: f32 = 16.0;
/// Extra health and damage per completed loop.
pub const LOOP_RAMP: f32 = 0.25;

pub fn update(registry: &mut Registry, dt: f32) {
    let Some(mut state) = registry.take_resource::<LevelState>() else {
        return;
    };
    state.time += dt;

    let scale = registry.resource::<Difficulty>().map_or(1.0, |d| d.scale)
        * (1.0 + LOOP_RAMP * state.loops as f32);

    while let Some(event) = state.level.spawns.get(state.cursor) {
        if event.at > state.time {
            break;
        }
        match state.level.template(&event.template) {
            Some(template) => spawn_wave(registry, event, template, scale),
            None => warn!(template = %event.template, "spawn names unknown template"),
        }
        state.cursor += 1;
    }

    while let Some(event) = state.level.powerups.get(state.powerup_cursor) {
        if event.at > state.time {
            break;
        }
        match spawn::powerup(registry, event) {
            Ok(_) => debug!(kind = ?event.kind, at = event.at, "power-up dropped"),
            Err(error) => warn!(%error, "power-up spawn failed"),
        }
        state.powerup_cursor += 1;
    }

    let drained = state.cursor >= state.level.spawns.len()
        && state.powerup_cursor >= state.level.powerups.len();
    if drained {
        if let Some(after) = state.level.loop_after {
            if state.time >= state.level.timeline_end() + after {
                state.cursor = 0;
                state.powerup_cursor = 0;
                state.time = 0.0;
                state.loops += 1;
                debug!(loops = state.loops, "level timeline looped");
            }
        }
    }

    registry.insert_resource(state);
}

fn spawn_wave(registry: &mut Registry, event: &SpawnEvent, template: &EntityTemplate, scale: f32) {
    let arena = registry
        .resource::<Arena>()
        .map_or(Rect::new(Vec2::ZERO, Vec2::new(1280.0, 720.0)), |a| a.0);
    let rows = (arena.size.y - template.size.y).max(0.0);

    for i in 0..event.count {
        let y = match event.y {
            Some(y) => y,
            None => match registry.resource_mut::<RoomRng>() {
                Some(rng) if rows > 0.0 => arena.origin.y + rng.0.gen_range(0.0..rows),
                _ => arena.origin.y + rows / 2.0,
            },
        };
        let x = event.x + i as f32 * (template.size.x + WAVE_SPACING);
        if let Err(error) = spawn::enemy(registry, template, Vec2::new(x, y), scale) {
            warn!(%error, "enemy spawn failed");
        }
    }
    debug!(template = %event.template, count = event.count, at = event.at, "wave spawned");
}

#[cfg(test)]
mod tests {
    use arcade_shared::{
        components::{EntityKind, Health, Transform},
        templates::{LevelDefinition, PowerupType},
    };
    use rand::SeedableRng;

    use super::*;
    use crate::components::Powerup;

    fn room(level: LevelDefinition, seed: u64) -> Registry {
        let mut reg = Registry::default();
        reg.insert_resource(LevelState::new(level));
        reg.insert_resource(RoomRng(rand::rngs::StdRng::seed_from_u64(seed)));
        reg.insert_resource(Arena(Rect::new(Vec2::ZERO, Vec2::new(1280.0, 720.0))));
        reg.insert_resource(Difficulty { scale: 1.0 });
        reg
    }

    fn enemy_rows(reg: &Registry) -> Vec<f32> {
        let mut ys: Vec<f32> = reg
            .view::<(EntityKind, Transform)>()
            .filter(|(_, (k, _))| k.is_enemy())
            .map(|(_, (_, t))| t.position.y)
            .collect();
        ys.sort_by(f32::total_cmp);
        ys
    }

    #[test]
    fn spawns_fire_when_due() {
        let mut reg = room(LevelDefinition::builtin(), 7);
        update(&mut reg, 1.0);
        assert_eq!(reg.count::<EntityKind>(), 0);
        update(&mut reg, 1.5);
        assert_eq!(reg.count::<EntityKind>(), 3);
    }

    #[test]
    fn same_seed_same_rows() {
        let mut a = room(LevelDefinition::builtin(), 42);
        let mut b = room(LevelDefinition::builtin(), 42);
        update(&mut a, 3.0);
        update(&mut b, 3.0);
        assert_eq!(enemy_rows(&a), enemy_rows(&b));
    }

    #[test]
    fn difficulty_scales_health() {
        let mut reg = room(LevelDefinition::builtin(), 1);
        reg.insert_resource(Difficulty { scale: 2.0 });
        update(&mut reg, 2.5);
        let hp: Vec<i32> = reg.view::<(Health,)>().map(|(_, (h,))| h.max).collect();
        assert_eq!(hp, vec![40, 40, 40]);
    }

    #[test]
    fn timeline_loops_after_delay() {
        let mut level = LevelDefinition::builtin();
        level.spawns.truncate(1);
        level.powerups.clear();
        level.loop_after = Some(1.0);
        let mut reg = room(level, 3);
        update(&mut reg, 2.5);
        update(&mut reg, 1.0);
        let loops = reg.resource::<LevelState>().map(|s| (s.loops, s.cursor));
        assert_eq!(loops, Some((1, 0)));
        update(&mut reg, 2.5);
        assert_eq!(reg.count::<EntityKind>(), 6);
    }

    #[test]
    fn powerups_drop_on_schedule() {
        let mut level = LevelDefinition::builtin();
        level.spawns.clear();
        let mut reg = room(level, 5);
        update(&mut reg, 11.0);
        assert_eq!(reg.count::<Powerup>(), 0);
        update(&mut reg, 1.5);
        let drops: Vec<_> = reg
            .view::<(EntityKind, Powerup)>()
            .map(|(_, (k, p))| (*k, p.kind))
            .collect();
        assert_eq!(drops, vec![(EntityKind::PowerupHeal, PowerupType::Heal)]);
        update(&mut reg, 20.0);
        assert_eq!(reg.count::<Powerup>(), 4);
    }
}

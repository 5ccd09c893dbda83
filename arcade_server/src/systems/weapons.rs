//! Weapons: ammo and cooldowns, the beam cycle, and turret fire.
//!
//! Shots are collected while the registry is borrowed and spawned afterwards.

use arcade_shared::{
    components::{Ammo, BeamState, Health, InputIntent, Transform, WeaponKind},
    ecs::{Entity, Registry},
    math::{Rect, Vec2},
    net::InputMask,
};
use tracing::{trace, warn};

use super::combat::apply_damage;
use crate::{
    components::{nearest_player, AiBehavior, Arena, Dead, DoubleFire, Faction, Hitbox, Weapon},
    spawn::{self, Shot},
};

/// Seconds to refill an empty magazine.
pub const RELOAD_TIME: f32 = 2.0;
pub const BEAM_DPS: f32 = 60.0;
pub const BEAM_THICKNESS: f32 = 12.0;
pub const HOSTILE_SHOT_SPEED: f32 = 300.0;
pub const HOSTILE_SHOT_DAMAGE: i32 = 10;
/// Vertical offset of each barrel under double fire.
pub const DOUBLE_FIRE_SPREAD: f32 = 8.0;

/// Tuning of one projectile weapon mode.
#[derive(Debug, Clone, Copy)]
struct Pattern {
    shot: Shot,
    speed: f32,
    damage: i32,
    interval: f32,
    cost: u16,
}

fn pattern(kind: WeaponKind, charged: bool) -> Option<Pattern> {
    let p = match kind {
        WeaponKind::Classic if charged => Pattern {
            shot: Shot::Charged,
            speed: 500.0,
            damage: 30,
            interval: 0.5,
            cost: 3,
        },
        WeaponKind::Classic => Pattern {
            shot: Shot::Plain,
            speed: 600.0,
            damage: 10,
            interval: 0.15,
            cost: 1,
        },
        WeaponKind::Tracker => Pattern {
            shot: Shot::Tracking,
            speed: 450.0,
            damage: 8,
            interval: 0.25,
            cost: 1,
        },
        WeaponKind::Boomerang => Pattern {
            shot: Shot::Returning,
            speed: 500.0,
            damage: 12,
            interval: 0.6,
            cost: 1,
        },
        WeaponKind::Beam => return None,
    };
    Some(p)
}

struct Fire {
    owner: Entity,
    shot: Shot,
    at: Vec2,
    velocity: Vec2,
    damage: i32,
}

fn spend(ammo: &mut Ammo, cost: u16) {
    ammo.current = ammo.current.saturating_sub(cost);
    if ammo.current == 0 {
        ammo.reloading = true;
        ammo.cooldown = RELOAD_TIME;
    }
}

fn can_fire(weapon: &Weapon, ammo: &Ammo) -> bool {
    weapon.cooldown <= 0.0 && !ammo.reloading && ammo.current > 0
}

pub fn update(registry: &mut Registry, dt: f32) {
    let arena = registry.resource::<Arena>().map(|a| a.0);
    let mut volley = Vec::new();
    let mut beams = Vec::new();

    let mut lapsed = Vec::new();
    if let Some(boosts) = registry.store_mut::<DoubleFire>() {
        for (e, boost) in boosts.iter_mut() {
            boost.remaining -= dt;
            if boost.remaining <= 0.0 {
                lapsed.push(e);
            }
        }
    }
    for e in lapsed {
        registry.remove::<DoubleFire>(e);
    }

    let armed: Vec<(Entity, Weapon, Ammo, InputMask, Vec2, Vec2)> = registry
        .view::<(Weapon, Ammo, InputIntent, Transform, Hitbox)>()
        .filter(|(e, _)| !registry.has::<Dead>(*e))
        .map(|(e, (w, a, i, t, h))| (e, *w, *a, i.mask, t.position, h.size))
        .collect();

    for (e, mut weapon, mut ammo, mask, position, size) in armed {
        weapon.cooldown = (weapon.cooldown - dt).max(0.0);
        if ammo.reloading {
            ammo.cooldown -= dt;
            if ammo.cooldown <= 0.0 {
                ammo.current = ammo.max;
                ammo.reloading = false;
                ammo.cooldown = 0.0;
            }
        }

        let muzzle = position + Vec2::new(size.x, size.y / 2.0);
        let shooting = mask.contains(InputMask::SHOOT);

        match pattern(weapon.kind, mask.contains(InputMask::CHARGE)) {
            Some(p) if shooting && can_fire(&weapon, &ammo) => {
                spend(&mut ammo, p.cost);
                weapon.cooldown = p.interval;
                let barrels: &[f32] = if registry.has::<DoubleFire>(e) {
                    &[-DOUBLE_FIRE_SPREAD, DOUBLE_FIRE_SPREAD]
                } else {
                    &[0.0]
                };
                for dy in barrels {
                    volley.push(Fire {
                        owner: e,
                        shot: p.shot,
                        at: muzzle - p.shot.size() * 0.5 + Vec2::new(0.0, *dy),
                        velocity: Vec2::new(p.speed, 0.0),
                        damage: p.damage,
                    });
                }
            }
            Some(_) => {}
            None => {
                let mut beam = registry
                    .get::<BeamState>(e)
                    .ok()
                    .flatten()
                    .copied()
                    .unwrap_or_default();
                if beam.active {
                    beam.remaining -= dt;
                    weapon.beam_carry += BEAM_DPS * dt;
                    let whole = weapon.beam_carry.floor();
                    weapon.beam_carry -= whole;
                    let reach = arena.map_or(2000.0, |a| a.max().x) - muzzle.x;
                    beams.push((
                        e,
                        Rect::new(
                            Vec2::new(muzzle.x, muzzle.y - BEAM_THICKNESS / 2.0),
                            Vec2::new(reach.max(0.0), BEAM_THICKNESS),
                        ),
                        whole as i32,
                    ));
                    if beam.remaining <= 0.0 {
                        beam.active = false;
                        beam.remaining = 0.0;
                        weapon.cooldown = weapon.beam_recharge;
                        weapon.beam_carry = 0.0;
                    }
                } else if shooting && can_fire(&weapon, &ammo) {
                    spend(&mut ammo, 1);
                    beam.active = true;
                    beam.remaining = weapon.beam_duration;
                }
                registry.emplace(e, beam).ok();
            }
        }

        if let Ok(Some(w)) = registry.get_mut::<Weapon>(e) {
            *w = weapon;
        }
        if let Ok(Some(a)) = registry.get_mut::<Ammo>(e) {
            *a = ammo;
        }
    }

    for (owner, strip, damage) in beams {
        if damage <= 0 {
            continue;
        }
        let victims: Vec<Entity> = registry
            .view::<(Transform, Hitbox, Faction)>()
            .filter(|(e, (t, h, f))| {
                **f == Faction::Enemies
                    && registry.has::<Health>(*e)
                    && !registry.has::<Dead>(*e)
                    && h.rect_at(t).overlaps(&strip)
            })
            .map(|(e, _)| e)
            .collect();
        for victim in victims {
            apply_damage(registry, victim, damage, Some(owner));
        }
    }

    turret_fire(registry, dt, &mut volley);

    for fire in volley {
        trace!(owner = ?fire.owner, shot = ?fire.shot, "fire");
        if let Err(error) =
            spawn::projectile(registry, fire.shot, fire.owner, fire.at, fire.velocity, fire.damage)
        {
            warn!(%error, "projectile spawn failed");
        }
    }
}

fn turret_fire(registry: &mut Registry, dt: f32, volley: &mut Vec<Fire>) {
    let turrets: Vec<(Entity, AiBehavior, Vec2, Vec2)> = registry
        .view::<(AiBehavior, Transform, Hitbox)>()
        .filter(|(e, _)| !registry.has::<Dead>(*e))
        .map(|(e, (b, t, h))| (e, *b, t.position, h.size))
        .collect();

    for (e, mut behavior, position, size) in turrets {
        let due = behavior.ready_to_fire(dt);
        if let Ok(Some(b)) = registry.get_mut::<AiBehavior>(e) {
            *b = behavior;
        }
        if !due {
            continue;
        }
        let center = position + size * 0.5;
        let aim = nearest_player(registry, center, f32::INFINITY)
            .map(|(from, to)| (to - from).normalized())
            .filter(|d| *d != Vec2::ZERO)
            .unwrap_or(Vec2::new(-1.0, 0.0));
        volley.push(Fire {
            owner: e,
            shot: Shot::Hostile,
            at: center,
            velocity: aim * HOSTILE_SHOT_SPEED,
            damage: HOSTILE_SHOT_DAMAGE,
        });
    }
}

#[cfg(test)]
mod tests {
    use arcade_shared::components::{EntityKind, Velocity};

    use super::*;

    fn held(reg: &mut Registry, e: Entity, mask: InputMask) -> anyhow::Result<()> {
        if let Some(intent) = reg.get_mut::<InputIntent>(e)? {
            intent.mask = mask;
        }
        Ok(())
    }

    #[test]
    fn classic_fires_then_cools_down() -> anyhow::Result<()> {
        let mut reg = Registry::default();
        let p = spawn::player(&mut reg, 1, WeaponKind::Classic, Vec2::new(10.0, 10.0))?;
        held(&mut reg, p, InputMask::SHOOT)?;

        update(&mut reg, 0.016);
        assert_eq!(reg.count::<crate::components::Owner>(), 1);
        assert_eq!(reg.get::<Ammo>(p)?.map(|a| a.current), Some(99));

        update(&mut reg, 0.016);
        assert_eq!(reg.count::<crate::components::Owner>(), 1, "still cooling down");
        Ok(())
    }

    #[test]
    fn double_fire_shoots_two_until_it_lapses() -> anyhow::Result<()> {
        let mut reg = Registry::default();
        let p = spawn::player(&mut reg, 1, WeaponKind::Classic, Vec2::new(10.0, 100.0))?;
        reg.emplace(p, DoubleFire { remaining: 0.3 })?;
        held(&mut reg, p, InputMask::SHOOT)?;

        update(&mut reg, 0.016);
        let rows: Vec<f32> = reg
            .view::<(crate::components::Owner, Transform)>()
            .map(|(_, (_, t))| t.position.y)
            .collect();
        assert_eq!(rows.len(), 2);
        assert!((rows[0] - rows[1]).abs() == 2.0 * DOUBLE_FIRE_SPREAD);
        // One trigger costs one round either way.
        assert_eq!(reg.get::<Ammo>(p)?.map(|a| a.current), Some(99));

        // Boost lapses; the next trigger is a single shot.
        update(&mut reg, 0.3);
        assert!(!reg.has::<DoubleFire>(p));
        assert_eq!(reg.count::<crate::components::Owner>(), 3);
        Ok(())
    }

    #[test]
    fn charged_shot_costs_more() -> anyhow::Result<()> {
        let mut reg = Registry::default();
        let p = spawn::player(&mut reg, 1, WeaponKind::Classic, Vec2::ZERO)?;
        held(&mut reg, p, InputMask::SHOOT | InputMask::CHARGE)?;
        update(&mut reg, 0.016);
        let kinds: Vec<EntityKind> = reg
            .view::<(EntityKind,)>()
            .map(|(_, (k,))| *k)
            .filter(|k| k.is_projectile())
            .collect();
        assert_eq!(kinds, vec![EntityKind::ChargedBullet]);
        assert_eq!(reg.get::<Ammo>(p)?.map(|a| a.current), Some(97));
        Ok(())
    }

    #[test]
    fn empty_magazine_reloads() -> anyhow::Result<()> {
        let mut reg = Registry::default();
        let p = spawn::player(&mut reg, 1, WeaponKind::Classic, Vec2::ZERO)?;
        reg.emplace(
            p,
            Ammo {
                current: 1,
                ..Ammo::default()
            },
        )?;
        held(&mut reg, p, InputMask::SHOOT)?;
        update(&mut reg, 0.016);
        let ammo = reg.get::<Ammo>(p)?.copied();
        assert_eq!(ammo.map(|a| (a.current, a.reloading)), Some((0, true)));

        held(&mut reg, p, InputMask::empty())?;
        update(&mut reg, RELOAD_TIME + 0.1);
        let ammo = reg.get::<Ammo>(p)?.copied();
        assert_eq!(ammo.map(|a| (a.current, a.reloading)), Some((100, false)));
        Ok(())
    }

    #[test]
    fn beam_damages_enemies_in_its_strip() -> anyhow::Result<()> {
        let mut reg = Registry::default();
        let p = spawn::player(&mut reg, 1, WeaponKind::Beam, Vec2::new(0.0, 100.0))?;
        let target = reg.create();
        reg.emplace(target, Transform::at(300.0, 100.0))?;
        reg.emplace(target, Hitbox { size: Vec2::new(32.0, 32.0) })?;
        reg.emplace(target, Faction::Enemies)?;
        reg.emplace(target, Health::full(100))?;
        held(&mut reg, p, InputMask::SHOOT)?;

        update(&mut reg, 0.1);
        assert_eq!(reg.get::<BeamState>(p)?.map(|b| b.active), Some(true));
        update(&mut reg, 0.5);
        let hp = reg.get::<Health>(target)?.map(|h| h.current);
        assert_eq!(hp, Some(70));
        Ok(())
    }

    #[test]
    fn beam_recharges_after_duration() -> anyhow::Result<()> {
        let mut reg = Registry::default();
        let p = spawn::player(&mut reg, 1, WeaponKind::Beam, Vec2::ZERO)?;
        held(&mut reg, p, InputMask::SHOOT)?;
        update(&mut reg, 0.016);
        update(&mut reg, 2.5);
        assert_eq!(reg.get::<BeamState>(p)?.map(|b| b.active), Some(false));
        let cooldown = reg.get::<Weapon>(p)?.map(|w| w.cooldown).unwrap_or_default();
        assert!(cooldown > 2.0);
        update(&mut reg, 0.016);
        assert_eq!(reg.get::<BeamState>(p)?.map(|b| b.active), Some(false));
        Ok(())
    }

    #[test]
    fn turret_fires_toward_player() -> anyhow::Result<()> {
        let mut reg = Registry::default();
        spawn::player(&mut reg, 1, WeaponKind::Classic, Vec2::new(0.0, 0.0))?;
        let turret = reg.create();
        reg.emplace(turret, Transform::at(400.0, 0.0))?;
        reg.emplace(turret, Hitbox { size: Vec2::new(24.0, 24.0) })?;
        reg.emplace(
            turret,
            AiBehavior::Turret {
                speed: 0.0,
                fire_interval: 1.0,
                cooldown: 0.01,
            },
        )?;
        update(&mut reg, 0.016);
        let hostile: Vec<Vec2> = reg
            .view::<(EntityKind, Velocity)>()
            .filter(|(_, (k, _))| **k == EntityKind::EnemyBullet)
            .map(|(_, (_, v))| v.0)
            .collect();
        assert_eq!(hostile.len(), 1);
        assert!(hostile[0].x < 0.0);
        Ok(())
    }
}

//! Collision, power-up pickup and death resolution.

use std::collections::HashSet;

use arcade_shared::{
    components::{EntityKind, Health, Score, Transform},
    ecs::{Entity, Registry},
    math::Rect,
    templates::PowerupType,
};
use tracing::debug;

use crate::components::{
    Bounty, Damage, Dead, DoubleFire, Faction, Hitbox, LastHitBy, MovementSpeed, Owner, Powerup,
    Shield,
};

/// Applies `amount` to `target`: a shield charge absorbs the hit, otherwise
/// health drops. The attacker is remembered for the bounty.
pub fn apply_damage(
    registry: &mut Registry,
    target: Entity,
    amount: i32,
    attacker: Option<Entity>,
) {
    if let Some(attacker) = attacker {
        registry.emplace(target, LastHitBy(attacker)).ok();
    }
    let absorbed = match registry.get_mut::<Shield>(target) {
        Ok(Some(shield)) if shield.charges > 0 => {
            shield.charges -= 1;
            Some(shield.charges)
        }
        _ => None,
    };
    match absorbed {
        Some(0) => {
            registry.remove::<Shield>(target);
            return;
        }
        Some(_) => return,
        None => {}
    }
    if let Ok(Some(health)) = registry.get_mut::<Health>(target) {
        health.current -= amount;
    }
}

struct Body {
    entity: Entity,
    rect: Rect,
    faction: Faction,
    kind: EntityKind,
    damage: i32,
}

pub fn collide(registry: &mut Registry, _dt: f32) {
    pickup(registry);

    let bodies: Vec<Body> = registry
        .view::<(Transform, Hitbox, Faction, EntityKind)>()
        .filter(|(e, _)| !registry.has::<Dead>(*e))
        .map(|(e, (t, h, f, k))| Body {
            entity: e,
            rect: h.rect_at(t),
            faction: *f,
            kind: *k,
            damage: registry.get::<Damage>(e).ok().flatten().map_or(0, |d| d.0),
        })
        .collect();

    let mut spent = HashSet::new();
    for (i, a) in bodies.iter().enumerate() {
        for b in &bodies[i + 1..] {
            if !a.faction.opposes(b.faction) || !a.rect.overlaps(&b.rect) {
                continue;
            }
            match (a.kind.is_projectile(), b.kind.is_projectile()) {
                (true, true) => {}
                (true, false) => hit(registry, a, b, &mut spent),
                (false, true) => hit(registry, b, a, &mut spent),
                (false, false) => {
                    apply_damage(registry, a.entity, b.damage, Some(b.entity));
                    apply_damage(registry, b.entity, a.damage, Some(a.entity));
                }
            }
        }
    }
}

/// Live players collect overlapping power-ups. Each drop is taken once.
fn pickup(registry: &mut Registry) {
    let drops: Vec<(Entity, Rect, Powerup)> = registry
        .view::<(Transform, Hitbox, Powerup)>()
        .filter(|(e, _)| !registry.has::<Dead>(*e))
        .map(|(e, (t, h, p))| (e, h.rect_at(t), *p))
        .collect();
    if drops.is_empty() {
        return;
    }
    let players: Vec<(Entity, Rect)> = registry
        .view::<(Transform, Hitbox, EntityKind)>()
        .filter(|(e, (_, _, k))| **k == EntityKind::Player && !registry.has::<Dead>(*e))
        .map(|(e, (t, h, _))| (e, h.rect_at(t)))
        .collect();

    for (drop, rect, powerup) in drops {
        let Some(&(player, _)) = players.iter().find(|(_, p)| p.overlaps(&rect)) else {
            continue;
        };
        grant(registry, player, powerup);
        registry.emplace(drop, Dead).ok();
        debug!(?player, kind = ?powerup.kind, "power-up collected");
    }
}

fn grant(registry: &mut Registry, player: Entity, powerup: Powerup) {
    match powerup.kind {
        PowerupType::Heal => {
            if let Ok(Some(health)) = registry.get_mut::<Health>(player) {
                health.current = (health.current + powerup.value as i32).min(health.max);
            }
        }
        PowerupType::Speed => {
            if let Ok(Some(speed)) = registry.get_mut::<MovementSpeed>(player) {
                speed.multiplier = speed.multiplier.max(powerup.value);
                speed.boost_remaining = speed.boost_remaining.max(powerup.duration);
            }
        }
        PowerupType::DoubleFire => {
            let remaining = registry
                .get::<DoubleFire>(player)
                .ok()
                .flatten()
                .map_or(0.0, |d| d.remaining)
                .max(powerup.duration);
            registry.emplace(player, DoubleFire { remaining }).ok();
        }
        PowerupType::Shield => {
            let charges = registry
                .get::<Shield>(player)
                .ok()
                .flatten()
                .map_or(0, |s| s.charges)
                + powerup.value as i32;
            registry.emplace(player, Shield { charges }).ok();
        }
    }
}

/// A projectile hits at most one target per tick, then dies.
fn hit(registry: &mut Registry, projectile: &Body, target: &Body, spent: &mut HashSet<Entity>) {
    if !spent.insert(projectile.entity) {
        return;
    }
    let owner = registry
        .get::<Owner>(projectile.entity)
        .ok()
        .flatten()
        .map(|o| o.0);
    apply_damage(registry, target.entity, projectile.damage, owner);
    registry.emplace(projectile.entity, Dead).ok();
}

/// Depleted entities die; whoever hit them last collects the bounty.
pub fn resolve_deaths(registry: &mut Registry, _dt: f32) {
    let fallen: Vec<(Entity, Option<Entity>, i32)> = registry
        .view::<(Health,)>()
        .filter(|(e, (h,))| h.is_depleted() && !registry.has::<Dead>(*e))
        .map(|(e, _)| {
            let killer = registry.get::<LastHitBy>(e).ok().flatten().map(|l| l.0);
            let bounty = registry.get::<Bounty>(e).ok().flatten().map_or(0, |b| b.0);
            (e, killer, bounty)
        })
        .collect();

    for (e, killer, bounty) in fallen {
        registry.emplace(e, Dead).ok();
        if let Some(killer) = killer {
            if let Ok(Some(score)) = registry.get_mut::<Score>(killer) {
                score.0 += bounty;
                debug!(?killer, bounty, total = score.0, "kill credited");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use arcade_shared::{components::WeaponKind, math::Vec2, templates::PowerupEvent};

    use super::*;
    use crate::spawn::{self, Shot};

    fn drop_at(
        reg: &mut Registry,
        kind: PowerupType,
        at: Vec2,
        value: f32,
        duration: f32,
    ) -> anyhow::Result<Entity> {
        let event = PowerupEvent {
            at: 0.0,
            kind,
            position: at,
            value,
            duration,
        };
        Ok(spawn::powerup(reg, &event)?)
    }

    fn dummy(reg: &mut Registry, x: f32, hp: i32) -> anyhow::Result<Entity> {
        let e = reg.create();
        reg.emplace(e, Transform::at(x, 0.0))?;
        reg.emplace(e, Hitbox { size: Vec2::new(32.0, 32.0) })?;
        reg.emplace(e, Faction::Enemies)?;
        reg.emplace(e, EntityKind::Scout)?;
        reg.emplace(e, Health::full(hp))?;
        reg.emplace(e, Damage(15))?;
        reg.emplace(e, Bounty(50))?;
        Ok(e)
    }

    #[test]
    fn projectile_hit_damages_and_consumes() -> anyhow::Result<()> {
        let mut reg = Registry::default();
        let shooter = spawn::player(&mut reg, 1, WeaponKind::Classic, Vec2::new(0.0, 400.0))?;
        let target = dummy(&mut reg, 300.0, 25)?;
        let at = Vec2::new(305.0, 5.0);
        let bullet = spawn::projectile(&mut reg, Shot::Plain, shooter, at, Vec2::ZERO, 10)?;

        collide(&mut reg, 0.016);
        assert_eq!(reg.get::<Health>(target)?.map(|h| h.current), Some(15));
        assert!(reg.has::<Dead>(bullet));
        assert_eq!(reg.get::<LastHitBy>(target)?, Some(&LastHitBy(shooter)));
        Ok(())
    }

    #[test]
    fn friendly_bodies_do_not_collide() -> anyhow::Result<()> {
        let mut reg = Registry::default();
        let a = spawn::player(&mut reg, 1, WeaponKind::Classic, Vec2::ZERO)?;
        let b = spawn::player(&mut reg, 2, WeaponKind::Classic, Vec2::ZERO)?;
        collide(&mut reg, 0.016);
        assert_eq!(reg.get::<Health>(a)?.map(|h| h.current), Some(spawn::PLAYER_HEALTH));
        assert_eq!(reg.get::<Health>(b)?.map(|h| h.current), Some(spawn::PLAYER_HEALTH));
        Ok(())
    }

    #[test]
    fn shield_absorbs_one_hit() -> anyhow::Result<()> {
        let mut reg = Registry::default();
        let e = dummy(&mut reg, 0.0, 10)?;
        reg.emplace(e, Shield { charges: 1 })?;
        apply_damage(&mut reg, e, 5, None);
        assert_eq!(reg.get::<Health>(e)?.map(|h| h.current), Some(10));
        assert!(!reg.has::<Shield>(e));
        apply_damage(&mut reg, e, 5, None);
        assert_eq!(reg.get::<Health>(e)?.map(|h| h.current), Some(5));
        Ok(())
    }

    #[test]
    fn body_contact_hurts_both_sides() -> anyhow::Result<()> {
        let mut reg = Registry::default();
        let p = spawn::player(&mut reg, 1, WeaponKind::Classic, Vec2::new(10.0, 10.0))?;
        let enemy = dummy(&mut reg, 20.0, 100)?;
        collide(&mut reg, 0.016);
        assert_eq!(
            reg.get::<Health>(p)?.map(|h| h.current),
            Some(spawn::PLAYER_HEALTH - 15)
        );
        assert_eq!(
            reg.get::<Health>(enemy)?.map(|h| h.current),
            Some(100 - spawn::PLAYER_CONTACT_DAMAGE)
        );
        Ok(())
    }

    #[test]
    fn heal_pickup_is_capped_and_consumed() -> anyhow::Result<()> {
        let mut reg = Registry::default();
        let p = spawn::player(&mut reg, 1, WeaponKind::Classic, Vec2::new(100.0, 100.0))?;
        if let Some(health) = reg.get_mut::<Health>(p)? {
            health.current = 90;
        }
        let heal = drop_at(&mut reg, PowerupType::Heal, Vec2::new(110.0, 100.0), 30.0, 0.0)?;

        collide(&mut reg, 0.016);
        assert_eq!(reg.get::<Health>(p)?.map(|h| h.current), Some(spawn::PLAYER_HEALTH));
        assert!(reg.has::<Dead>(heal));

        // Dead drops are not collected twice.
        if let Some(health) = reg.get_mut::<Health>(p)? {
            health.current = 50;
        }
        collide(&mut reg, 0.016);
        assert_eq!(reg.get::<Health>(p)?.map(|h| h.current), Some(50));
        Ok(())
    }

    #[test]
    fn speed_pickup_starts_a_boost() -> anyhow::Result<()> {
        let mut reg = Registry::default();
        let p = spawn::player(&mut reg, 1, WeaponKind::Classic, Vec2::new(100.0, 100.0))?;
        drop_at(&mut reg, PowerupType::Speed, Vec2::new(100.0, 100.0), 1.5, 6.0)?;
        collide(&mut reg, 0.016);
        let speed = reg.get::<MovementSpeed>(p)?.copied();
        assert_eq!(speed.map(|s| (s.multiplier, s.boost_remaining)), Some((1.5, 6.0)));
        Ok(())
    }

    #[test]
    fn shield_and_double_fire_pickups() -> anyhow::Result<()> {
        let mut reg = Registry::default();
        let p = spawn::player(&mut reg, 1, WeaponKind::Classic, Vec2::new(100.0, 100.0))?;
        drop_at(&mut reg, PowerupType::Shield, Vec2::new(100.0, 100.0), 2.0, 0.0)?;
        drop_at(&mut reg, PowerupType::DoubleFire, Vec2::new(100.0, 100.0), 0.0, 8.0)?;
        collide(&mut reg, 0.016);
        assert_eq!(reg.get::<Shield>(p)?, Some(&Shield { charges: 2 }));
        assert_eq!(reg.get::<DoubleFire>(p)?, Some(&DoubleFire { remaining: 8.0 }));

        apply_damage(&mut reg, p, 40, None);
        assert_eq!(reg.get::<Health>(p)?.map(|h| h.current), Some(spawn::PLAYER_HEALTH));
        Ok(())
    }

    #[test]
    fn projectiles_pass_through_powerups() -> anyhow::Result<()> {
        let mut reg = Registry::default();
        let shooter = spawn::player(&mut reg, 1, WeaponKind::Classic, Vec2::new(0.0, 400.0))?;
        let heal = drop_at(&mut reg, PowerupType::Heal, Vec2::new(300.0, 0.0), 10.0, 0.0)?;
        let at = Vec2::new(305.0, 5.0);
        let bullet = spawn::projectile(&mut reg, Shot::Plain, shooter, at, Vec2::ZERO, 10)?;
        collide(&mut reg, 0.016);
        assert!(!reg.has::<Dead>(heal));
        assert!(!reg.has::<Dead>(bullet));
        Ok(())
    }

    #[test]
    fn kill_credits_bounty_to_last_hitter() -> anyhow::Result<()> {
        let mut reg = Registry::default();
        let p = spawn::player(&mut reg, 1, WeaponKind::Classic, Vec2::new(0.0, 400.0))?;
        let e = dummy(&mut reg, 300.0, 5)?;
        apply_damage(&mut reg, e, 5, Some(p));
        resolve_deaths(&mut reg, 0.016);
        assert!(reg.has::<Dead>(e));
        assert_eq!(reg.get::<Score>(p)?, Some(&Score(50)));

        // Already dead: no double credit.
        resolve_deaths(&mut reg, 0.016);
        assert_eq!(reg.get::<Score>(p)?, Some(&Score(50)));
        Ok(())
    }
}

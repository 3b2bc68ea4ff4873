//! Game rules phase: ring progression, unit collisions with contact
//! damage, food consumption, and death detection.
//!
//! Everything here reads and writes the component stores only; deaths are
//! reported to the caller, which schedules the in-place respawn for the
//! next tick.

use crate::game::constants::{
    pigment as pigment_const, rings, stats as stat_const,
};
use crate::game::pool::Slot;
use crate::game::spatial::SpatialGrid;
use crate::game::stores::{
    flags, physics, pigment, pigment_match_percent, stats, tuning, World,
};
use crate::util::vec2::Vec2;

/// Outcome of one rules pass
#[derive(Debug, Default)]
pub struct RulesOutcome {
    /// Slots that died this tick (DEAD set, ACTIVE cleared)
    pub deaths: Vec<Slot>,
    /// Food slots consumed and released this tick
    pub consumed: Vec<Slot>,
    /// Players promoted to a deeper ring
    pub promotions: Vec<(Slot, u8)>,
}

/// Run the rules phase over the whole world
pub fn update(world: &mut World, grid: &mut SpatialGrid, dt: f32) -> RulesOutcome {
    let mut outcome = RulesOutcome::default();

    resolve_unit_collisions(world, grid, dt);
    consume_food(world, grid, &mut outcome);
    progress_rings(world, &mut outcome);
    detect_deaths(world, &mut outcome);

    outcome
}

/// Ring band containing a world position, by distance from the origin
pub fn ring_at(position: Vec2, map_radius: f32) -> u8 {
    let dist = position.length();
    for ring in (0..rings::COUNT).rev() {
        if dist <= rings::BAND_OUTER_FRAC[ring] * map_radius {
            if dist >= rings::BAND_INNER_FRAC[ring] * map_radius {
                return ring as u8;
            }
        }
    }
    rings::OUTER
}

/// Promote players whose match percentage has crossed the next ring's
/// entry threshold while standing inside that ring's band. Commitment is
/// monotone within a life; respawn resets it.
fn progress_rings(world: &mut World, outcome: &mut RulesOutcome) {
    let active: Vec<Slot> = world.active().to_vec();
    for slot in active {
        if !world.is_live(slot) || !world.has_flags(slot, flags::PLAYER) {
            continue;
        }
        let current = world.ring(slot);
        if current as usize + 1 >= rings::COUNT {
            continue;
        }
        let next = current + 1;
        let here = ring_at(world.position(slot), world.map_radius());
        if here == next
            && world.match_percent(slot) >= rings::ENTRY_MATCH_PERCENT[next as usize]
        {
            world.set_ring(slot, next);
            outcome.promotions.push((slot, next));
        }
    }
}

/// Circle-vs-circle collision between live units: positional separation,
/// restitution impulse, and mass-scaled contact damage
fn resolve_unit_collisions(world: &mut World, grid: &SpatialGrid, dt: f32) {
    let mut contacts: Vec<(Slot, Slot)> = Vec::new();
    grid.for_each_dynamic_pair(|a, b| {
        if world.is_live(a) && world.is_live(b) {
            let ra = world.radius(a);
            let rb = world.radius(b);
            let reach = ra + rb;
            if world.position(a).distance_sq_to(world.position(b)) < reach * reach {
                contacts.push((a, b));
            }
        }
    });

    for (a, b) in contacts {
        // Both may have died to an earlier contact this tick
        if !world.is_live(a) || !world.is_live(b) {
            continue;
        }
        let pa = world.position(a);
        let pb = world.position(b);
        let delta = pb - pa;
        let dist = delta.length();
        let reach = world.radius(a) + world.radius(b);
        if dist >= reach {
            continue;
        }

        let normal = if dist > f32::EPSILON {
            delta * (1.0 / dist)
        } else {
            Vec2::new(1.0, 0.0)
        };
        let overlap = reach - dist;

        // Separate proportionally to inverse mass, staying inside the disk
        let ma = world.mass(a);
        let mb = world.mass(b);
        let total = ma + mb;
        let map_radius = world.map_radius();
        world.set_position(a, (pa - normal * (overlap * (mb / total))).clamp_length(map_radius));
        world.set_position(b, (pb + normal * (overlap * (ma / total))).clamp_length(map_radius));

        // Restitution impulse along the contact normal
        let va = world.velocity(a);
        let vb = world.velocity(b);
        let closing = (vb - va).dot(normal);
        if closing < 0.0 {
            use crate::game::constants::physics::{MAX_SPEED_BASE, SPEED_TOLERANCE};
            let restitution = world
                .physics_row(a)[physics::RESTITUTION]
                .min(world.physics_row(b)[physics::RESTITUTION]);
            let impulse = -(1.0 + restitution) * closing / (1.0 / ma + 1.0 / mb);
            // A light body rebounding off a heavy one can exceed the global
            // speed ceiling; saturate both results
            let limit = MAX_SPEED_BASE * SPEED_TOLERANCE;
            world.set_velocity(a, (va - normal * (impulse / ma)).clamp_length(limit));
            world.set_velocity(b, (vb + normal * (impulse / mb)).clamp_length(limit));
        }

        apply_contact_damage(world, a, b, dt);
        apply_contact_damage(world, b, a, dt);
    }
}

fn apply_contact_damage(world: &mut World, attacker: Slot, victim: Slot, dt: f32) {
    // Food and obstacles deal no contact damage
    if !world.has_flags(attacker, flags::PLAYER) || !world.has_flags(victim, flags::PLAYER) {
        return;
    }
    let ratio = (world.mass(attacker) / world.mass(victim))
        .clamp(
            1.0 / stat_const::CONTACT_MASS_RATIO_CAP,
            stat_const::CONTACT_MASS_RATIO_CAP,
        );
    let mult = world.stats_row(attacker)[stats::DAMAGE_MULT];
    let defense = world.stats_row(victim)[stats::DEFENSE].clamp(0.0, 0.9);

    let damage = stat_const::CONTACT_DAMAGE * ratio * mult * (1.0 - defense) * dt;
    let s = world.stats_row_mut(victim);
    s[stats::CUR_HP] -= damage;
}

/// Consume food within a player's magnet-assisted pickup radius
fn consume_food(world: &mut World, grid: &mut SpatialGrid, outcome: &mut RulesOutcome) {
    let mut candidates: Vec<Slot> = Vec::new();
    let active: Vec<Slot> = world.active().to_vec();

    for slot in active {
        if !world.is_live(slot) || !world.has_flags(slot, flags::PLAYER) {
            continue;
        }
        let pos = world.position(slot);
        let reach = world
            .tuning_row(slot)[tuning::MAGNET_RADIUS]
            .max(world.radius(slot));

        candidates.clear();
        grid.query_static(pos, reach + 8.0, &mut candidates);

        for &food in &candidates {
            // A neighbor may have eaten it earlier in this pass
            if !world.has_flags(food, flags::ACTIVE | flags::FOOD) {
                continue;
            }
            let food_pos = world.position(food);
            let pickup = reach + world.radius(food);
            if pos.distance_sq_to(food_pos) > pickup * pickup {
                continue;
            }

            eat(world, slot, food);
            grid.remove_static(food, food_pos);
            world.release(food);
            outcome.consumed.push(food);
        }
    }
}

/// Blend the eater's pigment toward the pellet color and refresh match%
fn eat(world: &mut World, eater: Slot, food: Slot) {
    let food_color = {
        let g = world.pigment_row(food);
        [g[pigment::R], g[pigment::G], g[pigment::B]]
    };
    let target = {
        let g = world.pigment_row(eater);
        [g[pigment::TARGET_R], g[pigment::TARGET_G], g[pigment::TARGET_B]]
    };

    let blend = pigment_const::BLEND_FACTOR;
    let g = world.pigment_row_mut(eater);
    let mixed = [
        g[pigment::R] + (food_color[0] - g[pigment::R]) * blend,
        g[pigment::G] + (food_color[1] - g[pigment::G]) * blend,
        g[pigment::B] + (food_color[2] - g[pigment::B]) * blend,
    ];
    g[pigment::R] = mixed[0];
    g[pigment::G] = mixed[1];
    g[pigment::B] = mixed[2];

    let match_pct = pigment_match_percent(mixed, target);
    world.pigment_row_mut(eater)[pigment::MATCH] = match_pct;
    let s = world.stats_row_mut(eater);
    s[stats::MATCH_PERCENT] = match_pct;
    s[stats::SCORE] += stat_const::FOOD_SCORE;
}

/// Mark entities whose HP reached zero as dead; the caller schedules the
/// respawn for the next tick
fn detect_deaths(world: &mut World, outcome: &mut RulesOutcome) {
    let active: Vec<Slot> = world.active().to_vec();
    for slot in active {
        if !world.has_flags(slot, flags::ACTIVE) || !world.has_flags(slot, flags::PLAYER) {
            continue;
        }
        if world.hp(slot) <= 0.0 {
            world.set_flags(slot, flags::DEAD);
            world.clear_flags(slot, flags::ACTIVE);
            outcome.deaths.push(slot);
        }
    }
}

//! Skill triggering and timed-effect bookkeeping.
//!
//! A `space` action is honored only when the server-side cooldown has
//! expired; clients may fire optimistically and get silently rejected.
//! Concrete skill formulas stay behind the kind table; dash is the default.

use smallvec::SmallVec;

use crate::game::constants::{pigment as pigment_const, skill as skill_const};
use crate::game::pool::Slot;
use crate::game::stores::{
    flags, input, pigment, skill, transform, Effect, World,
};
use crate::util::vec2::Vec2;

/// Effect flags stored in the per-entity effect slots
pub const EFFECT_DASH: u32 = 1 << 0;

/// Food pellet requests produced by eject actions; the caller registers
/// them with the spawner and the static grid
#[derive(Debug, Clone, Copy)]
pub struct EjectRequest {
    pub owner: Slot,
    pub position: Vec2,
    pub color: [f32; 3],
}

/// Advance cooldowns and effects, trigger authorized skill actions
pub fn update(world: &mut World, dt: f32, ejects: &mut Vec<EjectRequest>) {
    let active: Vec<Slot> = world.active().to_vec();

    for slot in active {
        if !world.is_live(slot) || !world.has_flags(slot, flags::PLAYER) {
            continue;
        }

        tick_effects(world, slot, dt);

        let k = world.skill_row_mut(slot);
        if k[skill::COOLDOWN] > 0.0 {
            k[skill::COOLDOWN] = (k[skill::COOLDOWN] - dt).max(0.0);
        }

        let actions = world.actions(slot);
        if actions & input::ACTION_SKILL != 0 {
            try_trigger(world, slot);
        }
        if actions & input::ACTION_EJECT != 0 {
            queue_eject(world, slot, ejects);
        }
        // Actions are one-shot per applied input frame; the steering target
        // persists, the buttons do not
        if actions != 0 {
            world.input_row_mut(slot)[input::ACTIONS] = 0.0;
        }
    }
}

/// Remove expired effects and undo what they granted
fn tick_effects(world: &mut World, slot: Slot, dt: f32) {
    let mut expired: SmallVec<[u32; skill_const::MAX_EFFECTS]> = SmallVec::new();
    {
        let effects = world.effects_mut(slot);
        let mut i = 0;
        while i < effects.len() {
            effects[i].timer -= dt;
            if effects[i].timer <= 0.0 {
                expired.push(effects[i].flag);
                effects.swap_remove(i);
            } else {
                i += 1;
            }
        }
    }
    for flag in expired {
        if flag == EFFECT_DASH {
            // Dash grants no persistent stat change; the impulse decays
            // through friction on its own
        }
    }
}

/// Trigger the entity's skill if the cooldown allows it
fn try_trigger(world: &mut World, slot: Slot) {
    let k = world.skill_row(slot);
    if k[skill::COOLDOWN] > 0.0 {
        return;
    }
    let kind = k[skill::KIND];

    if kind == skill_const::KIND_DASH {
        trigger_dash(world, slot);
    } else {
        // KIND_NONE and unknown kinds are inert hooks
        return;
    }

    let k = world.skill_row_mut(slot);
    k[skill::COOLDOWN] = skill_const::COOLDOWN;
    k[skill::DURATION] = skill_const::DASH_DURATION;
}

/// Dash: impulse toward the current steering target
fn trigger_dash(world: &mut World, slot: Slot) {
    let pos = world.position(slot);
    let i = world.input_row(slot);
    let target = Vec2::new(i[input::TARGET_X], i[input::TARGET_Y]);

    let dir = {
        let to_target = target - pos;
        if to_target.length_sq() > f32::EPSILON {
            to_target.normalize()
        } else {
            let rot = world.transform_row(slot)[transform::ROT];
            Vec2::from_angle(rot)
        }
    };

    // The burst saturates at the global ceiling; the invariant that no
    // velocity exceeds it holds between phases, not just after physics
    let limit = crate::game::constants::physics::MAX_SPEED_BASE
        * crate::game::constants::physics::SPEED_TOLERANCE;
    let vel = (world.velocity(slot) + dir * skill_const::DASH_IMPULSE).clamp_length(limit);
    world.set_velocity(slot, vel);

    let effects = world.effects_mut(slot);
    if effects.len() < skill_const::MAX_EFFECTS {
        effects.push(Effect {
            flag: EFFECT_DASH,
            timer: skill_const::DASH_DURATION,
            scalar: skill_const::DASH_IMPULSE,
        });
    }
}

/// Eject: request a pellet behind the player carrying part of its pigment
fn queue_eject(world: &mut World, slot: Slot, ejects: &mut Vec<EjectRequest>) {
    let pos = world.position(slot);
    let vel = world.velocity(slot);
    let radius = world.radius(slot);

    let backward = if vel.length_sq() > f32::EPSILON {
        -vel.normalize()
    } else {
        Vec2::new(-1.0, 0.0)
    };
    let drop_at = pos + backward * (radius * 2.0);

    let g = world.pigment_row(slot);
    let carry = pigment_const::EJECT_CARRY;
    let color = [
        g[pigment::R] * carry,
        g[pigment::G] * carry,
        g[pigment::B] * carry,
    ];

    ejects.push(EjectRequest {
        owner: slot,
        position: drop_at,
        color,
    });
}

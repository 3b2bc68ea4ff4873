//! Steering toward the input target.
//!
//! The same per-slot function runs on the server tick and inside the client
//! predictor; prediction accuracy depends on the two staying identical.

use crate::game::constants::physics::ACCEL_RATE;
use crate::game::pool::Slot;
use crate::game::stores::{flags, input, physics, transform, tuning, World};
use crate::util::vec2::Vec2;

/// Advance one entity's velocity toward its input target.
///
/// Desired speed is capped both by the entity's tuned maximum and by the
/// distance coverable this tick, so an entity parked on its target settles
/// instead of orbiting it.
pub fn steer_slot(world: &mut World, slot: Slot, dt: f32) {
    let t = world.transform_row(slot);
    let pos = Vec2::new(t[transform::X], t[transform::Y]);

    let i = world.input_row(slot);
    let target = Vec2::new(i[input::TARGET_X], i[input::TARGET_Y]);

    let c = world.tuning_row(slot);
    let max_speed = c[tuning::MAX_SPEED] * c[tuning::SPEED_MULT];

    let to_target = target - pos;
    let dist = to_target.length();

    let desired = if dist > f32::EPSILON && dt > 0.0 {
        to_target.normalize() * (dist / dt).min(max_speed)
    } else {
        Vec2::ZERO
    };

    let vel = world.velocity(slot);
    let blend = (ACCEL_RATE * dt).min(1.0);
    let next = vel + (desired - vel) * blend;
    let p = world.physics_row_mut(slot);
    p[physics::VX] = next.x;
    p[physics::VY] = next.y;
}

/// Steer every live entity that consumes input (players and bots)
pub fn update(world: &mut World, dt: f32) {
    let active: Vec<Slot> = world.active().to_vec();
    for slot in active {
        if world.is_live(slot) && world.has_flags(slot, flags::PLAYER) {
            steer_slot(world, slot, dt);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::constants::world::MAP_RADIUS;
    use crate::game::stores::PlayerSpawn;

    fn spawn(world: &mut World, pos: Vec2) -> Slot {
        world
            .spawn_player(&PlayerSpawn {
                position: pos,
                pigment: [0.5; 3],
                target_pigment: [0.5; 3],
                is_bot: false,
            })
            .unwrap()
    }

    #[test]
    fn test_steer_accelerates_toward_target() {
        let mut world = World::new(16, MAP_RADIUS);
        let slot = spawn(&mut world, Vec2::ZERO);
        let row = world.input_row_mut(slot);
        row[input::TARGET_X] = 150.0;
        row[input::TARGET_Y] = 0.0;

        steer_slot(&mut world, slot, 0.05);
        let vel = world.velocity(slot);
        assert!(vel.x > 0.0);
        assert_eq!(vel.y, 0.0);
    }

    #[test]
    fn test_desired_speed_capped_by_max_speed() {
        let mut world = World::new(16, MAP_RADIUS);
        let slot = spawn(&mut world, Vec2::ZERO);
        let row = world.input_row_mut(slot);
        row[input::TARGET_X] = 1500.0;

        // Drive to steady state
        for _ in 0..200 {
            steer_slot(&mut world, slot, 0.05);
        }
        let max = world.tuning_row(slot)[tuning::MAX_SPEED];
        assert!(world.velocity(slot).length() <= max + 0.5);
    }

    #[test]
    fn test_settles_on_target() {
        let mut world = World::new(16, MAP_RADIUS);
        let slot = spawn(&mut world, Vec2::new(10.0, 10.0));
        let row = world.input_row_mut(slot);
        row[input::TARGET_X] = 10.0;
        row[input::TARGET_Y] = 10.0;

        world.set_velocity(slot, Vec2::new(30.0, 0.0));
        for _ in 0..100 {
            steer_slot(&mut world, slot, 0.05);
        }
        // Desired velocity is zero on target, so steering damps to rest
        assert!(world.velocity(slot).length() < 1.0);
    }

    #[test]
    fn test_update_skips_dead_and_food() {
        let mut world = World::new(16, MAP_RADIUS);
        let player = spawn(&mut world, Vec2::ZERO);
        let food = world.spawn_food(Vec2::new(5.0, 5.0), 0, [1.0; 3]).unwrap();

        world.input_row_mut(player)[input::TARGET_X] = 100.0;
        world.set_flags(player, flags::DEAD);
        world.clear_flags(player, flags::ACTIVE);

        update(&mut world, 0.05);
        assert_eq!(world.velocity(player), Vec2::ZERO);
        assert_eq!(world.velocity(food), Vec2::ZERO);
    }
}

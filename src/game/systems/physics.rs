//! Fixed-step integration: advance positions, apply exponential friction,
//! clamp into the world disk, and enforce the speed ceiling.
//!
//! The per-lane body is shared between the parallel server sweep and the
//! client predictor's single-slot path; both must produce bit-identical
//! results for the same inputs.

use std::sync::atomic::{AtomicU32, Ordering};

use rayon::prelude::*;

use crate::game::constants::physics::{MAX_SPEED_BASE, SPEED_TOLERANCE};
use crate::game::pool::Slot;
use crate::game::stores::{flags, physics, transform, World};

/// Integrate one entity's transform/physics rows. Returns true when the
/// speed ceiling had to clamp a violating velocity.
#[inline]
fn integrate_lanes(t: &mut [f32], p: &mut [f32], dt: f32, map_radius: f32) -> bool {
    t[transform::PREV_X] = t[transform::X];
    t[transform::PREV_Y] = t[transform::Y];
    t[transform::PREV_ROT] = t[transform::ROT];

    let mut x = t[transform::X] + p[physics::VX] * dt;
    let mut y = t[transform::Y] + p[physics::VY] * dt;
    t[transform::ROT] += p[physics::VROT] * dt;

    // Exponential friction; the lane holds the per-second retention base
    let friction = p[physics::FRICTION];
    if friction > 0.0 && friction < 1.0 {
        let keep = friction.powf(dt);
        p[physics::VX] *= keep;
        p[physics::VY] *= keep;
        p[physics::VROT] *= keep;
    }

    // Clamp into the world disk; kill the outward radial velocity so the
    // entity slides along the boundary instead of grinding into it
    let dist_sq = x * x + y * y;
    if dist_sq > map_radius * map_radius {
        let dist = dist_sq.sqrt();
        let nx = x / dist;
        let ny = y / dist;
        x = nx * map_radius;
        y = ny * map_radius;
        let outward = p[physics::VX] * nx + p[physics::VY] * ny;
        if outward > 0.0 {
            p[physics::VX] -= outward * nx;
            p[physics::VY] -= outward * ny;
        }
    }
    t[transform::X] = x;
    t[transform::Y] = y;

    // Speed ceiling
    let limit = MAX_SPEED_BASE * SPEED_TOLERANCE;
    let speed_sq = p[physics::VX] * p[physics::VX] + p[physics::VY] * p[physics::VY];
    if speed_sq > limit * limit {
        let scale = limit / speed_sq.sqrt();
        p[physics::VX] *= scale;
        p[physics::VY] *= scale;
        return true;
    }
    false
}

/// Integrate every live entity in parallel
pub fn update(world: &mut World, dt: f32) {
    let map_radius = world.map_radius();
    let (flag_lanes, transform_lanes, physics_lanes) = world.physics_lanes_mut();

    let violations = AtomicU32::new(0);
    transform_lanes
        .par_chunks_exact_mut(transform::STRIDE)
        .zip(physics_lanes.par_chunks_exact_mut(physics::STRIDE))
        .zip(flag_lanes.par_iter())
        .for_each(|((t, p), &f)| {
            if f & flags::ACTIVE == 0 || f & flags::DEAD != 0 {
                return;
            }
            if integrate_lanes(t, p, dt, map_radius) {
                violations.fetch_add(1, Ordering::Relaxed);
            }
        });

    let clamped = violations.load(Ordering::Relaxed);
    if clamped > 0 {
        tracing::warn!(clamped, "speed ceiling clamped velocities this tick");
    }
}

/// Integrate a single slot; used by the client predictor for the local
/// entity and by reconciliation replay
pub fn integrate_slot(world: &mut World, slot: Slot, dt: f32) {
    let map_radius = world.map_radius();
    let base_t = slot as usize * transform::STRIDE;
    let base_p = slot as usize * physics::STRIDE;
    let (_, transform_lanes, physics_lanes) = world.physics_lanes_mut();
    integrate_lanes(
        &mut transform_lanes[base_t..base_t + transform::STRIDE],
        &mut physics_lanes[base_p..base_p + physics::STRIDE],
        dt,
        map_radius,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::constants::world::MAP_RADIUS;
    use crate::game::stores::PlayerSpawn;
    use crate::util::vec2::Vec2;

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
    fn test_position_integration() {
        let mut world = World::new(16, MAP_RADIUS);
        let slot = spawn(&mut world, Vec2::new(100.0, 50.0));
        world.set_velocity(slot, Vec2::new(100.0, -40.0));

        update(&mut world, 0.05);

        let pos = world.position(slot);
        assert!((pos.x - 105.0).abs() < 1e-3);
        assert!((pos.y - 48.0).abs() < 1e-3);
        // Previous position recorded before the step
        let t = world.transform_row(slot);
        assert_eq!(t[transform::PREV_X], 100.0);
        assert_eq!(t[transform::PREV_Y], 50.0);
    }

    #[test]
    fn test_friction_decays_velocity() {
        let mut world = World::new(16, MAP_RADIUS);
        let slot = spawn(&mut world, Vec2::ZERO);
        world.set_velocity(slot, Vec2::new(100.0, 0.0));

        let before = world.velocity(slot).length();
        update(&mut world, 0.05);
        let after = world.velocity(slot).length();
        assert!(after < before);
        assert!(after > 0.0);
    }

    #[test]
    fn test_world_disk_clamp() {
        let mut world = World::new(16, MAP_RADIUS);
        let slot = spawn(&mut world, Vec2::new(MAP_RADIUS - 1.0, 0.0));
        world.set_velocity(slot, Vec2::new(150.0, 0.0));

        for _ in 0..40 {
            update(&mut world, 0.05);
        }
        assert!(world.position(slot).length() <= MAP_RADIUS + 1e-3);
        // Outward radial velocity removed at the boundary
        let vel = world.velocity(slot);
        let normal = world.position(slot).normalize();
        assert!(vel.dot(normal) <= 1e-3);
    }

    #[test]
    fn test_speed_ceiling_clamp() {
        let mut world = World::new(16, MAP_RADIUS);
        let slot = spawn(&mut world, Vec2::ZERO);
        world.set_velocity(slot, Vec2::new(10_000.0, 0.0));

        update(&mut world, 0.05);

        let limit = MAX_SPEED_BASE * SPEED_TOLERANCE;
        assert!(world.velocity(slot).length() <= limit + 1e-3);
        world.check_invariants();
    }

    #[test]
    fn test_integrate_slot_matches_sweep() {
        let mut a = World::new(16, MAP_RADIUS);
        let mut b = World::new(16, MAP_RADIUS);
        let sa = spawn(&mut a, Vec2::new(10.0, 20.0));
        let sb = spawn(&mut b, Vec2::new(10.0, 20.0));
        a.set_velocity(sa, Vec2::new(42.0, -17.0));
        b.set_velocity(sb, Vec2::new(42.0, -17.0));

        update(&mut a, 0.05);
        integrate_slot(&mut b, sb, 0.05);

        assert_eq!(a.position(sa), b.position(sb));
        assert_eq!(a.velocity(sa), b.velocity(sb));
    }

    #[test]
    fn test_inactive_rows_untouched() {
        let mut world = World::new(16, MAP_RADIUS);
        let slot = spawn(&mut world, Vec2::new(5.0, 5.0));
        world.set_velocity(slot, Vec2::new(50.0, 0.0));
        world.clear_flags(slot, flags::ACTIVE);

        update(&mut world, 0.05);
        assert_eq!(world.position(slot), Vec2::new(5.0, 5.0));
    }
}

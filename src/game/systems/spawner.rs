//! Food spawner: per-ring burst timers and the global pellet cap.
//!
//! Spawning draws from the room's seeded RNG so two rooms started from the
//! same seed place identical pellets. The spawner tracks live pellets in a
//! FIFO of handles; when the cap is exceeded the oldest pellets are culled,
//! with stale handles (already-eaten pellets) skipped on the way.

use std::collections::VecDeque;

use rand::rngs::StdRng;
use rand::Rng;

use crate::game::constants::{food, rings};
use crate::game::pool::{Handle, Slot};
use crate::game::spatial::SpatialGrid;
use crate::game::stores::{flags, World};
use crate::util::vec2::Vec2;

/// Pellet palette, one color per food kind
const KIND_COLORS: [[f32; 3]; food::KINDS] = [
    [0.92, 0.20, 0.20], // red
    [0.95, 0.60, 0.12], // orange
    [0.93, 0.90, 0.25], // yellow
    [0.25, 0.80, 0.35], // green
    [0.22, 0.45, 0.92], // blue
    [0.65, 0.30, 0.85], // violet
];

pub struct FoodSpawner {
    timers: [f32; rings::COUNT],
    /// Spawn-ordered live pellets; entries go stale when eaten
    queue: VecDeque<(Handle, Vec2)>,
    live: usize,
    max_food: usize,
}

impl FoodSpawner {
    pub fn new() -> Self {
        Self::with_cap(food::MAX_FOOD)
    }

    pub fn with_cap(max_food: usize) -> Self {
        // Stagger initial timers so rings don't all burst on the same tick
        let mut timers = [0.0f32; rings::COUNT];
        for (ring, timer) in timers.iter_mut().enumerate() {
            *timer = food::SPAWN_INTERVAL[ring] * (ring as f32 + 1.0) / rings::COUNT as f32;
        }
        Self {
            timers,
            queue: VecDeque::with_capacity(max_food),
            live: 0,
            max_food,
        }
    }

    #[inline]
    pub fn live_count(&self) -> usize {
        self.live
    }

    /// Advance ring timers; a firing timer spawns its ring's burst
    pub fn update(
        &mut self,
        world: &mut World,
        grid: &mut SpatialGrid,
        rng: &mut StdRng,
        dt: f32,
    ) {
        for ring in 0..rings::COUNT {
            self.timers[ring] -= dt;
            if self.timers[ring] <= 0.0 {
                self.timers[ring] = food::SPAWN_INTERVAL[ring];
                self.spawn_burst(world, grid, rng, ring as u8);
            }
        }
        self.enforce_cap(world, grid);
    }

    fn spawn_burst(&mut self, world: &mut World, grid: &mut SpatialGrid, rng: &mut StdRng, ring: u8) {
        let map_radius = world.map_radius();
        let inner = rings::BAND_INNER_FRAC[ring as usize] * map_radius;
        let outer = rings::BAND_OUTER_FRAC[ring as usize] * map_radius;

        for _ in 0..food::BURST_SIZE[ring as usize] {
            let angle = rng.gen_range(0.0..std::f32::consts::TAU);
            let radius = rng.gen_range(inner..outer.max(inner + 1.0));
            let pos = Vec2::from_angle(angle) * radius;
            let kind = rng.gen_range(0..food::KINDS) as u8;
            self.place(world, grid, pos, kind, KIND_COLORS[kind as usize]);
        }
    }

    /// Spawn one pellet and register it with the static grid layer; used by
    /// the burst path and by eject requests
    pub fn place(
        &mut self,
        world: &mut World,
        grid: &mut SpatialGrid,
        pos: Vec2,
        kind: u8,
        color: [f32; 3],
    ) -> Option<Slot> {
        // Keep pellets inside the disk
        let pos = if pos.length() > world.map_radius() {
            pos.normalize() * world.map_radius()
        } else {
            pos
        };

        let slot = world.spawn_food(pos, kind, color)?;
        grid.insert_static(slot, pos);
        self.queue.push_back((world.handle(slot), pos));
        self.live += 1;
        Some(slot)
    }

    /// The rules phase ate a pellet; its FIFO entry is left to go stale
    pub fn on_consumed(&mut self, count: usize) {
        self.live = self.live.saturating_sub(count);
    }

    /// Cull the oldest pellets above the cap, skipping stale handles
    fn enforce_cap(&mut self, world: &mut World, grid: &mut SpatialGrid) {
        while self.live > self.max_food {
            let Some((handle, pos)) = self.queue.pop_front() else {
                // Queue drained with a stale live count; resync
                self.live = 0;
                return;
            };
            match world.resolve(handle) {
                Some(slot) if world.has_flags(slot, flags::ACTIVE | flags::FOOD) => {
                    grid.remove_static(slot, pos);
                    world.release(slot);
                    self.live -= 1;
                }
                _ => {} // stale entry for an eaten pellet
            }
        }
    }
}

impl Default for FoodSpawner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::constants::world::MAP_RADIUS;
    use rand::SeedableRng;

    fn setup() -> (World, SpatialGrid, StdRng) {
        (
            World::new(2048, MAP_RADIUS),
            SpatialGrid::default(),
            StdRng::seed_from_u64(7),
        )
    }

    #[test]
    fn test_timers_fire_bursts() {
        let (mut world, mut grid, mut rng) = setup();
        let mut spawner = FoodSpawner::new();

        // Run five simulated seconds; every ring fires at least once
        for _ in 0..100 {
            spawner.update(&mut world, &mut grid, &mut rng, 0.05);
        }
        assert!(spawner.live_count() > 0);
        assert_eq!(spawner.live_count(), world.active_count());
    }

    #[test]
    fn test_pellets_land_in_their_ring() {
        let (mut world, mut grid, mut rng) = setup();
        let mut spawner = FoodSpawner::new();
        spawner.spawn_burst(&mut world, &mut grid, &mut rng, rings::MIDDLE);

        for &slot in world.active() {
            let dist = world.position(slot).length();
            assert!(dist <= rings::BAND_OUTER_FRAC[rings::MIDDLE as usize] * MAP_RADIUS + 1.0);
            assert!(dist >= rings::BAND_INNER_FRAC[rings::MIDDLE as usize] * MAP_RADIUS - 1.0);
        }
    }

    #[test]
    fn test_cap_culls_oldest() {
        let (mut world, mut grid, mut rng) = setup();
        let mut spawner = FoodSpawner::with_cap(5);

        let mut slots = Vec::new();
        for i in 0..8 {
            let pos = Vec2::new(100.0 + i as f32 * 50.0, 0.0);
            slots.push(spawner.place(&mut world, &mut grid, pos, 0, [1.0, 0.0, 0.0]).unwrap());
        }
        spawner.update(&mut world, &mut grid, &mut rng, 0.0);

        assert!(spawner.live_count() <= 5 + food::BURST_SIZE.iter().sum::<usize>());
        // The first-placed pellets are gone
        assert!(!world.has_flags(slots[0], flags::FOOD));
        assert!(!world.has_flags(slots[1], flags::FOOD));
    }

    #[test]
    fn test_consumed_entries_skipped_by_cull() {
        let (mut world, mut grid, _rng) = setup();
        let mut spawner = FoodSpawner::with_cap(2);

        let a = spawner.place(&mut world, &mut grid, Vec2::new(10.0, 0.0), 0, [1.0; 3]).unwrap();
        let b = spawner.place(&mut world, &mut grid, Vec2::new(20.0, 0.0), 0, [1.0; 3]).unwrap();
        let c = spawner.place(&mut world, &mut grid, Vec2::new(30.0, 0.0), 0, [1.0; 3]).unwrap();

        // Eat the oldest pellet outside the spawner
        grid.remove_static(a, Vec2::new(10.0, 0.0));
        world.release(a);
        spawner.on_consumed(1);

        // live == 2 == cap, no cull needed; b and c stay
        spawner.enforce_cap(&mut world, &mut grid);
        assert!(world.has_flags(b, flags::FOOD));
        assert!(world.has_flags(c, flags::FOOD));

        // Push over the cap; the stale entry for `a` must be skipped and
        // the oldest live pellet (b) culled instead
        let d = spawner.place(&mut world, &mut grid, Vec2::new(40.0, 0.0), 0, [1.0; 3]).unwrap();
        spawner.enforce_cap(&mut world, &mut grid);
        assert!(!world.has_flags(b, flags::FOOD));
        assert!(world.has_flags(c, flags::FOOD));
        assert!(world.has_flags(d, flags::FOOD));
        assert_eq!(spawner.live_count(), 2);
    }

    #[test]
    fn test_deterministic_given_seed() {
        let (mut world_a, mut grid_a, mut rng_a) = setup();
        let (mut world_b, mut grid_b, mut rng_b) = setup();
        let mut spawner_a = FoodSpawner::new();
        let mut spawner_b = FoodSpawner::new();

        for _ in 0..60 {
            spawner_a.update(&mut world_a, &mut grid_a, &mut rng_a, 0.05);
            spawner_b.update(&mut world_b, &mut grid_b, &mut rng_b, 0.05);
        }

        assert_eq!(world_a.active_count(), world_b.active_count());
        for (&sa, &sb) in world_a.active().iter().zip(world_b.active()) {
            assert_eq!(sa, sb);
            assert_eq!(world_a.position(sa), world_b.position(sb));
            assert_eq!(world_a.food_kind(sa), world_b.food_kind(sb));
        }
    }
}

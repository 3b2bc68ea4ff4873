//! Authoritative fixed-timestep game loop.
//!
//! One tick runs seven phases to completion with no yield points:
//! consume inputs, movement, physics, skill, game rules, spawner, and
//! (owned by the caller) broadcast. Given identical input sequences and
//! initial store state, two loops with the same seed produce identical
//! store state; the only RNG consumer is the seeded per-room generator.

use std::time::Instant;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::SimulationConfig;
use crate::game::constants::rings;
use crate::game::pool::Slot;
use crate::game::spatial::SpatialGrid;
use crate::game::stores::{flags, input, pigment, PlayerSpawn, World};
use crate::game::systems::skill::EjectRequest;
use crate::game::systems::{movement, physics, rules, skill, spawner::FoodSpawner};
use crate::net::protocol::InputFrame;
use crate::util::vec2::Vec2;

/// Wall-clock cost of each phase, microseconds
#[derive(Debug, Clone, Copy, Default)]
pub struct PhaseTimings {
    pub consume_us: u64,
    pub movement_us: u64,
    pub physics_us: u64,
    pub skill_us: u64,
    pub rules_us: u64,
    pub spawner_us: u64,
    pub total_us: u64,
}

/// What happened during one tick
#[derive(Debug, Default)]
pub struct TickEvents {
    /// Slots that died this tick; they respawn in place next tick
    pub deaths: Vec<Slot>,
    /// Slots respawned at the start of this tick
    pub respawns: Vec<Slot>,
    /// Ring promotions this tick
    pub promotions: Vec<(Slot, u8)>,
    /// Food pellets consumed this tick
    pub consumed: u32,
    pub timings: PhaseTimings,
}

pub struct GameLoop {
    config: SimulationConfig,
    world: World,
    grid: SpatialGrid,
    spawner: FoodSpawner,
    rng: StdRng,
    tick: u64,
    game_time: f32,
    /// Deaths from the previous tick, respawned at the start of this one
    respawn_queue: Vec<Slot>,
    eject_scratch: Vec<EjectRequest>,
}

impl GameLoop {
    pub fn new(config: SimulationConfig, seed: u64) -> Self {
        let world = World::new(config.max_entities, config.map_radius);
        Self {
            config,
            world,
            grid: SpatialGrid::default(),
            spawner: FoodSpawner::new(),
            rng: StdRng::seed_from_u64(seed),
            tick: 0,
            game_time: 0.0,
            respawn_queue: Vec::new(),
            eject_scratch: Vec::new(),
        }
    }

    #[inline]
    pub fn world(&self) -> &World {
        &self.world
    }

    #[inline]
    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    #[inline]
    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    #[inline]
    pub fn game_time(&self) -> f32 {
        self.game_time
    }

    #[inline]
    pub fn dt(&self) -> f32 {
        self.config.dt()
    }

    #[inline]
    pub fn food_count(&self) -> usize {
        self.spawner.live_count()
    }

    /// Spawn a player at a random outer-ring position
    pub fn spawn_player(&mut self, pigment_choice: [f32; 3], is_bot: bool) -> Option<Slot> {
        let params = PlayerSpawn {
            position: self.roll_spawn_position(),
            pigment: pigment_choice,
            target_pigment: self.roll_target_pigment(),
            is_bot,
        };
        self.world.spawn_player(&params)
    }

    /// Release a player slot (leave path); generation bumps so any stored
    /// handle for it goes stale
    pub fn remove_player(&mut self, slot: Slot) -> bool {
        self.respawn_queue.retain(|&s| s != slot);
        self.world.release(slot)
    }

    fn roll_spawn_position(&mut self) -> Vec2 {
        let map_radius = self.config.map_radius;
        let inner = rings::BAND_INNER_FRAC[rings::OUTER as usize] * map_radius;
        let outer = 0.95 * map_radius;
        let angle = self.rng.gen_range(0.0..std::f32::consts::TAU);
        let radius = self.rng.gen_range(inner..outer);
        Vec2::from_angle(angle) * radius
    }

    fn roll_target_pigment(&mut self) -> [f32; 3] {
        [
            self.rng.gen_range(0.0..1.0),
            self.rng.gen_range(0.0..1.0),
            self.rng.gen_range(0.0..1.0),
        ]
    }

    /// Advance the simulation one tick. `inputs` are the already-validated
    /// frames claimed from the session mailboxes, resolved to slots.
    pub fn tick(&mut self, inputs: &[(Slot, InputFrame)]) -> TickEvents {
        let dt = self.config.dt();
        let started = Instant::now();
        let mut events = TickEvents::default();

        self.tick += 1;
        self.game_time += dt;
        self.grid.begin_tick(self.tick);

        // Deaths scheduled last tick come back first: in-place reset, same
        // slot, same generation
        self.process_respawns(&mut events);

        // Phase 1: consume inputs (bots write through the same store)
        let phase_start = Instant::now();
        self.think_bots(dt);
        for &(slot, frame) in inputs {
            self.apply_input(slot, frame);
        }
        events.timings.consume_us = phase_start.elapsed().as_micros() as u64;

        // Phase 2: movement
        let phase_start = Instant::now();
        movement::update(&mut self.world, dt);
        events.timings.movement_us = phase_start.elapsed().as_micros() as u64;

        // Phase 3: physics integration, then the dynamic grid layer is
        // rebuilt from settled positions
        let phase_start = Instant::now();
        physics::update(&mut self.world, dt);
        for &slot in &self.world.active().to_vec() {
            if self.world.is_live(slot) && !self.world.has_flags(slot, flags::FOOD) {
                self.grid.insert_dynamic(slot, self.world.position(slot));
            }
        }
        events.timings.physics_us = phase_start.elapsed().as_micros() as u64;

        // Phase 4: skills; ejected pellets register with the spawner
        let phase_start = Instant::now();
        self.eject_scratch.clear();
        let mut ejects = std::mem::take(&mut self.eject_scratch);
        skill::update(&mut self.world, dt, &mut ejects);
        for req in ejects.drain(..) {
            self.spawner
                .place(&mut self.world, &mut self.grid, req.position, 0, req.color);
        }
        self.eject_scratch = ejects;
        events.timings.skill_us = phase_start.elapsed().as_micros() as u64;

        // Phase 5: game rules
        let phase_start = Instant::now();
        let outcome = rules::update(&mut self.world, &mut self.grid, dt);
        self.spawner.on_consumed(outcome.consumed.len());
        events.consumed = outcome.consumed.len() as u32;
        events.promotions = outcome.promotions;
        self.respawn_queue.extend_from_slice(&outcome.deaths);
        events.deaths = outcome.deaths;
        events.timings.rules_us = phase_start.elapsed().as_micros() as u64;

        // Phase 6: food spawner
        let phase_start = Instant::now();
        self.spawner
            .update(&mut self.world, &mut self.grid, &mut self.rng, dt);
        events.timings.spawner_us = phase_start.elapsed().as_micros() as u64;

        events.timings.total_us = started.elapsed().as_micros() as u64;
        self.warn_if_slow(&events.timings);

        #[cfg(debug_assertions)]
        self.world.check_invariants();

        events
    }

    fn process_respawns(&mut self, events: &mut TickEvents) {
        if self.respawn_queue.is_empty() {
            return;
        }
        let queue = std::mem::take(&mut self.respawn_queue);
        for slot in queue {
            // Leave may have released the slot between death and respawn
            if !self.world.has_flags(slot, flags::DEAD) {
                continue;
            }
            let is_bot = self.world.has_flags(slot, flags::BOT);
            let g = self.world.pigment_row(slot);
            let target = [
                g[pigment::TARGET_R],
                g[pigment::TARGET_G],
                g[pigment::TARGET_B],
            ];
            let params = PlayerSpawn {
                position: self.roll_spawn_position(),
                pigment: [0.5, 0.5, 0.5],
                target_pigment: target,
                is_bot,
            };
            self.world.respawn_in_place(slot, &params);
            events.respawns.push(slot);
        }
    }

    /// Write a validated input frame into the store
    fn apply_input(&mut self, slot: Slot, frame: InputFrame) {
        if !self.world.is_live(slot) {
            return;
        }
        let map_radius = self.config.map_radius;
        let target = Vec2::new(
            frame.target.x.clamp(-map_radius, map_radius),
            frame.target.y.clamp(-map_radius, map_radius),
        );
        let mut actions = 0u32;
        if frame.space {
            actions |= input::ACTION_SKILL;
        }
        if frame.eject {
            actions |= input::ACTION_EJECT;
        }
        let row = self.world.input_row_mut(slot);
        row[input::TARGET_X] = target.x;
        row[input::TARGET_Y] = target.y;
        row[input::ACTIONS] = actions as f32;
    }

    /// Wander steering for maintenance bots, written through the same
    /// Input store the network path uses
    fn think_bots(&mut self, _dt: f32) {
        let bots: Vec<Slot> = self
            .world
            .active()
            .iter()
            .copied()
            .filter(|&s| self.world.is_live(s) && self.world.has_flags(s, flags::BOT))
            .collect();

        for slot in bots {
            let pos = self.world.position(slot);
            let row = self.world.input_row(slot);
            let target = Vec2::new(row[input::TARGET_X], row[input::TARGET_Y]);

            // Re-roll the wander target when the current one is reached
            if pos.distance_sq_to(target) < 40.0 * 40.0 {
                let next = self.roll_spawn_position();
                let row = self.world.input_row_mut(slot);
                row[input::TARGET_X] = next.x;
                row[input::TARGET_Y] = next.y;
            }
        }
    }

    fn warn_if_slow(&self, timings: &PhaseTimings) {
        let budget_us =
            (self.config.dt() * crate::game::constants::tick::SLOW_FACTOR * 1_000_000.0) as u64;
        if timings.total_us > budget_us {
            tracing::warn!(
                tick = self.tick,
                total_us = timings.total_us,
                consume_us = timings.consume_us,
                movement_us = timings.movement_us,
                physics_us = timings.physics_us,
                skill_us = timings.skill_us,
                rules_us = timings.rules_us,
                spawner_us = timings.spawner_us,
                "slow tick"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::constants::physics::MAX_SPEED_BASE;

    fn new_loop() -> GameLoop {
        GameLoop::new(SimulationConfig::default(), 42)
    }

    fn input_toward(seq: u32, x: f32, y: f32) -> InputFrame {
        InputFrame {
            seq,
            target: Vec2::new(x, y),
            space: false,
            eject: false,
        }
    }

    #[test]
    fn test_join_and_one_tick_move() {
        let mut game = new_loop();
        let slot = game.spawn_player([0.5; 3], false).unwrap();
        game.world_mut().set_position(slot, Vec2::ZERO);
        {
            let row = game.world_mut().input_row_mut(slot);
            row[input::TARGET_X] = 0.0;
            row[input::TARGET_Y] = 0.0;
        }

        game.tick(&[(slot, input_toward(1, 150.0, 0.0))]);

        let pos = game.world().position(slot);
        assert!(pos.x > 0.0, "must move toward the target, got {}", pos.x);
        assert!(
            pos.x <= MAX_SPEED_BASE * 0.05 * 1.01,
            "single-tick displacement bounded by max speed, got {}",
            pos.x
        );
        assert_eq!(pos.y, 0.0);
    }

    #[test]
    fn test_sustained_input_reaches_target() {
        let mut game = new_loop();
        let slot = game.spawn_player([0.5; 3], false).unwrap();
        game.world_mut().set_position(slot, Vec2::ZERO);

        for i in 0..100 {
            game.tick(&[(slot, input_toward(i + 1, 150.0, 0.0))]);
        }

        let pos = game.world().position(slot);
        assert!((pos.x - 150.0).abs() < 5.0, "should settle near x=150, got {}", pos.x);
        assert!(game.world().velocity(slot).length() < 5.0, "velocity decays at the target");
    }

    #[test]
    fn test_death_respawns_next_tick_same_slot() {
        let mut game = new_loop();
        let slot = game.spawn_player([0.2; 3], false).unwrap();
        let handle = game.world().handle(slot);

        game.world_mut().stats_row_mut(slot)[crate::game::stores::stats::CUR_HP] = 0.0;
        let events = game.tick(&[]);
        assert_eq!(events.deaths, vec![slot]);
        assert!(game.world().has_flags(slot, flags::DEAD));

        let events = game.tick(&[]);
        assert_eq!(events.respawns, vec![slot]);
        assert!(game.world().is_live(slot));
        // Index preserved, generation unchanged, handle still resolves
        assert_eq!(game.world().resolve(handle), Some(slot));
        assert!(game.world().hp(slot) > 0.0);
    }

    #[test]
    fn test_leave_cancels_pending_respawn() {
        let mut game = new_loop();
        let slot = game.spawn_player([0.2; 3], false).unwrap();
        game.world_mut().stats_row_mut(slot)[crate::game::stores::stats::CUR_HP] = 0.0;
        game.tick(&[]);

        assert!(game.remove_player(slot));
        let events = game.tick(&[]);
        assert!(events.respawns.is_empty());
        assert!(!game.world().has_flags(slot, flags::ACTIVE));
    }

    #[test]
    fn test_food_appears_over_time() {
        let mut game = new_loop();
        for _ in 0..100 {
            game.tick(&[]);
        }
        assert!(game.food_count() > 0);
    }

    #[test]
    fn test_deterministic_with_same_seed() {
        let mut a = GameLoop::new(SimulationConfig::default(), 9);
        let mut b = GameLoop::new(SimulationConfig::default(), 9);
        let sa = a.spawn_player([0.3; 3], false).unwrap();
        let sb = b.spawn_player([0.3; 3], false).unwrap();
        assert_eq!(sa, sb);

        for i in 0..50 {
            let frame = input_toward(i + 1, 400.0, -250.0);
            a.tick(&[(sa, frame)]);
            b.tick(&[(sb, frame)]);
        }

        assert_eq!(a.world().position(sa), b.world().position(sb));
        assert_eq!(a.world().velocity(sa), b.world().velocity(sb));
        assert_eq!(a.food_count(), b.food_count());
    }

    #[test]
    fn test_bot_wanders() {
        let mut game = new_loop();
        let bot = game.spawn_player([0.5; 3], true).unwrap();
        let start = game.world().position(bot);

        for _ in 0..40 {
            game.tick(&[]);
        }
        assert!(game.world().position(bot).distance_to(start) > 1.0);
    }

    #[test]
    fn test_input_ignored_for_dead_slot() {
        let mut game = new_loop();
        let slot = game.spawn_player([0.5; 3], false).unwrap();
        game.world_mut().stats_row_mut(slot)[crate::game::stores::stats::CUR_HP] = 0.0;
        game.tick(&[]); // dies here

        // Input arriving for the dead slot is dropped; respawn happens first
        // at the start of the tick, so this frame applies to the respawned
        // entity only if the slot is live again
        let events = game.tick(&[(slot, input_toward(5, 100.0, 0.0))]);
        assert_eq!(events.respawns, vec![slot]);
    }
}

//! Struct-of-arrays component stores.
//!
//! Every store is one contiguous numeric array of `capacity * stride`
//! lanes indexed by entity slot. The stores are the only truth about an
//! entity; snapshots and client render state are projections. Readers must
//! gate on the ACTIVE flag: a row whose slot is inactive has no meaning.

use smallvec::SmallVec;

use crate::game::constants::{self, physics as phys_const, skill as skill_const, stats as stat_const};
use crate::game::pool::{EntityPool, Handle, Slot};
use crate::util::vec2::Vec2;

/// Entity flag bits
pub mod flags {
    pub const ACTIVE: u32 = 1 << 0;
    pub const PLAYER: u32 = 1 << 1;
    pub const BOT: u32 = 1 << 2;
    pub const FOOD: u32 = 1 << 3;
    pub const PROJECTILE: u32 = 1 << 4;
    pub const DEAD: u32 = 1 << 5;
    pub const OBSTACLE: u32 = 1 << 6;

    /// Food color kind lives in bits 8..=10
    pub const FOOD_KIND_SHIFT: u32 = 8;
    pub const FOOD_KIND_MASK: u32 = 0b111 << FOOD_KIND_SHIFT;

    /// Ring id (0 outer .. 3 core) lives in bits 12..=13
    pub const RING_SHIFT: u32 = 12;
    pub const RING_MASK: u32 = 0b11 << RING_SHIFT;
}

/// Transform store lanes
pub mod transform {
    pub const X: usize = 0;
    pub const Y: usize = 1;
    pub const ROT: usize = 2;
    pub const SCALE: usize = 3;
    pub const PREV_X: usize = 4;
    pub const PREV_Y: usize = 5;
    pub const PREV_ROT: usize = 6;
    pub const STRIDE: usize = 8;
}

/// Physics store lanes
pub mod physics {
    pub const VX: usize = 0;
    pub const VY: usize = 1;
    pub const VROT: usize = 2;
    pub const MASS: usize = 3;
    pub const RADIUS: usize = 4;
    pub const RESTITUTION: usize = 5;
    pub const FRICTION: usize = 6;
    pub const STRIDE: usize = 8;
}

/// Stats store lanes
pub mod stats {
    pub const CUR_HP: usize = 0;
    pub const MAX_HP: usize = 1;
    pub const SCORE: usize = 2;
    pub const MATCH_PERCENT: usize = 3;
    pub const DEFENSE: usize = 4;
    pub const DAMAGE_MULT: usize = 5;
    pub const STRIDE: usize = 8;
}

/// Input store lanes. The actions bitmask is a small integer (bit 0 =
/// skill, bit 1 = eject) stored exactly in the f32 lane.
pub mod input {
    pub const TARGET_X: usize = 0;
    pub const TARGET_Y: usize = 1;
    pub const ACTIONS: usize = 2;
    pub const STRIDE: usize = 4;

    pub const ACTION_SKILL: u32 = 1 << 0;
    pub const ACTION_EJECT: u32 = 1 << 1;
}

/// Per-entity tuning lanes
pub mod tuning {
    pub const MAX_SPEED: usize = 0;
    pub const SPEED_MULT: usize = 1;
    pub const MAGNET_RADIUS: usize = 2;
    pub const STRIDE: usize = 4;
}

/// Skill store lanes; payload lanes are kind-specific scratch
pub mod skill {
    pub const COOLDOWN: usize = 0;
    pub const DURATION: usize = 1;
    pub const KIND: usize = 2;
    pub const PAYLOAD0: usize = 3;
    pub const STRIDE: usize = 8;
}

/// Pigment store lanes
pub mod pigment {
    pub const R: usize = 0;
    pub const G: usize = 1;
    pub const B: usize = 2;
    pub const MATCH: usize = 3;
    pub const TARGET_R: usize = 4;
    pub const TARGET_G: usize = 5;
    pub const TARGET_B: usize = 6;
    pub const STRIDE: usize = 8;
}

/// A timed status effect held in the per-entity fixed-capacity slots
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Effect {
    pub flag: u32,
    pub timer: f32,
    pub scalar: f32,
}

pub type EffectSlots = SmallVec<[Effect; skill_const::MAX_EFFECTS]>;

/// Parameters for spawning a player entity
#[derive(Debug, Clone)]
pub struct PlayerSpawn {
    pub position: Vec2,
    pub pigment: [f32; 3],
    pub target_pigment: [f32; 3],
    pub is_bot: bool,
}

/// Owner of the pool and every component store.
pub struct World {
    pool: EntityPool,
    map_radius: f32,
    flags: Box<[u32]>,
    transform: Box<[f32]>,
    physics: Box<[f32]>,
    stats: Box<[f32]>,
    input: Box<[f32]>,
    tuning: Box<[f32]>,
    skill: Box<[f32]>,
    pigment: Box<[f32]>,
    effects: Box<[EffectSlots]>,
}

impl World {
    pub fn new(capacity: usize, map_radius: f32) -> Self {
        Self {
            pool: EntityPool::new(capacity),
            map_radius,
            flags: vec![0u32; capacity].into_boxed_slice(),
            transform: vec![0.0; capacity * transform::STRIDE].into_boxed_slice(),
            physics: vec![0.0; capacity * physics::STRIDE].into_boxed_slice(),
            stats: vec![0.0; capacity * stats::STRIDE].into_boxed_slice(),
            input: vec![0.0; capacity * input::STRIDE].into_boxed_slice(),
            tuning: vec![0.0; capacity * tuning::STRIDE].into_boxed_slice(),
            skill: vec![0.0; capacity * skill::STRIDE].into_boxed_slice(),
            pigment: vec![0.0; capacity * pigment::STRIDE].into_boxed_slice(),
            effects: vec![EffectSlots::new(); capacity].into_boxed_slice(),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.pool.capacity()
    }

    #[inline]
    pub fn map_radius(&self) -> f32 {
        self.map_radius
    }

    #[inline]
    pub fn active(&self) -> &[Slot] {
        self.pool.active()
    }

    #[inline]
    pub fn active_count(&self) -> usize {
        self.pool.active_count()
    }

    #[inline]
    pub fn handle(&self, slot: Slot) -> Handle {
        self.pool.handle(slot)
    }

    #[inline]
    pub fn resolve(&self, handle: Handle) -> Option<Slot> {
        self.pool.resolve(handle)
    }

    // --- flags ---

    #[inline]
    pub fn flags(&self, slot: Slot) -> u32 {
        self.flags[slot as usize]
    }

    #[inline]
    pub fn has_flags(&self, slot: Slot, mask: u32) -> bool {
        self.flags[slot as usize] & mask == mask
    }

    #[inline]
    pub fn set_flags(&mut self, slot: Slot, mask: u32) {
        self.flags[slot as usize] |= mask;
    }

    #[inline]
    pub fn clear_flags(&mut self, slot: Slot, mask: u32) {
        self.flags[slot as usize] &= !mask;
    }

    /// Live for simulation purposes: ACTIVE and not DEAD
    #[inline]
    pub fn is_live(&self, slot: Slot) -> bool {
        let f = self.flags[slot as usize];
        f & flags::ACTIVE != 0 && f & flags::DEAD == 0
    }

    #[inline]
    pub fn ring(&self, slot: Slot) -> u8 {
        ((self.flags[slot as usize] & flags::RING_MASK) >> flags::RING_SHIFT) as u8
    }

    pub fn set_ring(&mut self, slot: Slot, ring: u8) {
        let f = &mut self.flags[slot as usize];
        *f = (*f & !flags::RING_MASK) | (((ring as u32) << flags::RING_SHIFT) & flags::RING_MASK);
    }

    #[inline]
    pub fn food_kind(&self, slot: Slot) -> u8 {
        ((self.flags[slot as usize] & flags::FOOD_KIND_MASK) >> flags::FOOD_KIND_SHIFT) as u8
    }

    // --- raw rows ---

    #[inline]
    pub fn transform_row(&self, slot: Slot) -> &[f32] {
        let base = slot as usize * transform::STRIDE;
        &self.transform[base..base + transform::STRIDE]
    }

    #[inline]
    pub fn transform_row_mut(&mut self, slot: Slot) -> &mut [f32] {
        let base = slot as usize * transform::STRIDE;
        &mut self.transform[base..base + transform::STRIDE]
    }

    #[inline]
    pub fn physics_row(&self, slot: Slot) -> &[f32] {
        let base = slot as usize * physics::STRIDE;
        &self.physics[base..base + physics::STRIDE]
    }

    #[inline]
    pub fn physics_row_mut(&mut self, slot: Slot) -> &mut [f32] {
        let base = slot as usize * physics::STRIDE;
        &mut self.physics[base..base + physics::STRIDE]
    }

    #[inline]
    pub fn stats_row(&self, slot: Slot) -> &[f32] {
        let base = slot as usize * stats::STRIDE;
        &self.stats[base..base + stats::STRIDE]
    }

    #[inline]
    pub fn stats_row_mut(&mut self, slot: Slot) -> &mut [f32] {
        let base = slot as usize * stats::STRIDE;
        &mut self.stats[base..base + stats::STRIDE]
    }

    #[inline]
    pub fn input_row(&self, slot: Slot) -> &[f32] {
        let base = slot as usize * input::STRIDE;
        &self.input[base..base + input::STRIDE]
    }

    #[inline]
    pub fn input_row_mut(&mut self, slot: Slot) -> &mut [f32] {
        let base = slot as usize * input::STRIDE;
        &mut self.input[base..base + input::STRIDE]
    }

    #[inline]
    pub fn tuning_row(&self, slot: Slot) -> &[f32] {
        let base = slot as usize * tuning::STRIDE;
        &self.tuning[base..base + tuning::STRIDE]
    }

    #[inline]
    pub fn tuning_row_mut(&mut self, slot: Slot) -> &mut [f32] {
        let base = slot as usize * tuning::STRIDE;
        &mut self.tuning[base..base + tuning::STRIDE]
    }

    #[inline]
    pub fn skill_row(&self, slot: Slot) -> &[f32] {
        let base = slot as usize * skill::STRIDE;
        &self.skill[base..base + skill::STRIDE]
    }

    #[inline]
    pub fn skill_row_mut(&mut self, slot: Slot) -> &mut [f32] {
        let base = slot as usize * skill::STRIDE;
        &mut self.skill[base..base + skill::STRIDE]
    }

    #[inline]
    pub fn pigment_row(&self, slot: Slot) -> &[f32] {
        let base = slot as usize * pigment::STRIDE;
        &self.pigment[base..base + pigment::STRIDE]
    }

    #[inline]
    pub fn pigment_row_mut(&mut self, slot: Slot) -> &mut [f32] {
        let base = slot as usize * pigment::STRIDE;
        &mut self.pigment[base..base + pigment::STRIDE]
    }

    #[inline]
    pub fn effects(&self, slot: Slot) -> &EffectSlots {
        &self.effects[slot as usize]
    }

    #[inline]
    pub fn effects_mut(&mut self, slot: Slot) -> &mut EffectSlots {
        &mut self.effects[slot as usize]
    }

    /// Parallel access to the arrays the physics sweep mutates
    pub(crate) fn physics_lanes_mut(&mut self) -> (&[u32], &mut [f32], &mut [f32]) {
        (&self.flags, &mut self.transform, &mut self.physics)
    }

    // --- typed convenience views ---

    #[inline]
    pub fn position(&self, slot: Slot) -> Vec2 {
        let t = self.transform_row(slot);
        Vec2::new(t[transform::X], t[transform::Y])
    }

    #[inline]
    pub fn set_position(&mut self, slot: Slot, pos: Vec2) {
        let t = self.transform_row_mut(slot);
        t[transform::X] = pos.x;
        t[transform::Y] = pos.y;
    }

    #[inline]
    pub fn velocity(&self, slot: Slot) -> Vec2 {
        let p = self.physics_row(slot);
        Vec2::new(p[physics::VX], p[physics::VY])
    }

    #[inline]
    pub fn set_velocity(&mut self, slot: Slot, vel: Vec2) {
        let p = self.physics_row_mut(slot);
        p[physics::VX] = vel.x;
        p[physics::VY] = vel.y;
    }

    #[inline]
    pub fn radius(&self, slot: Slot) -> f32 {
        self.physics_row(slot)[physics::RADIUS]
    }

    #[inline]
    pub fn mass(&self, slot: Slot) -> f32 {
        self.physics_row(slot)[physics::MASS]
    }

    #[inline]
    pub fn hp(&self, slot: Slot) -> f32 {
        self.stats_row(slot)[stats::CUR_HP]
    }

    #[inline]
    pub fn match_percent(&self, slot: Slot) -> f32 {
        self.stats_row(slot)[stats::MATCH_PERCENT]
    }

    #[inline]
    pub fn actions(&self, slot: Slot) -> u32 {
        self.input_row(slot)[input::ACTIONS] as u32
    }

    // --- lifecycle ---

    /// Allocate and initialize a player (or bot) entity
    pub fn spawn_player(&mut self, params: &PlayerSpawn) -> Option<Slot> {
        let slot = self.pool.allocate()?;
        self.init_player_rows(slot, params);
        Some(slot)
    }

    fn init_player_rows(&mut self, slot: Slot, params: &PlayerSpawn) {
        self.zero_rows(slot);

        let mut f = flags::ACTIVE | flags::PLAYER;
        if params.is_bot {
            f |= flags::BOT;
        }
        self.flags[slot as usize] = f;
        self.set_ring(slot, constants::rings::OUTER);

        let t = self.transform_row_mut(slot);
        t[transform::X] = params.position.x;
        t[transform::Y] = params.position.y;
        t[transform::SCALE] = 1.0;
        t[transform::PREV_X] = params.position.x;
        t[transform::PREV_Y] = params.position.y;

        let p = self.physics_row_mut(slot);
        p[physics::RADIUS] = phys_const::PLAYER_RADIUS;
        p[physics::MASS] = constants::radius_to_mass(phys_const::PLAYER_RADIUS);
        p[physics::RESTITUTION] = phys_const::RESTITUTION;
        p[physics::FRICTION] = phys_const::FRICTION;

        let s = self.stats_row_mut(slot);
        s[stats::CUR_HP] = stat_const::PLAYER_MAX_HP;
        s[stats::MAX_HP] = stat_const::PLAYER_MAX_HP;
        s[stats::DAMAGE_MULT] = 1.0;

        let i = self.input_row_mut(slot);
        i[input::TARGET_X] = params.position.x;
        i[input::TARGET_Y] = params.position.y;

        let c = self.tuning_row_mut(slot);
        c[tuning::MAX_SPEED] = phys_const::MAX_SPEED_BASE;
        c[tuning::SPEED_MULT] = 1.0;
        c[tuning::MAGNET_RADIUS] = phys_const::PLAYER_RADIUS * 3.0;

        let k = self.skill_row_mut(slot);
        k[skill::KIND] = skill_const::KIND_DASH;

        let g = self.pigment_row_mut(slot);
        g[pigment::R] = params.pigment[0];
        g[pigment::G] = params.pigment[1];
        g[pigment::B] = params.pigment[2];
        g[pigment::TARGET_R] = params.target_pigment[0];
        g[pigment::TARGET_G] = params.target_pigment[1];
        g[pigment::TARGET_B] = params.target_pigment[2];
        let match_pct = pigment_match_percent(params.pigment, params.target_pigment);
        self.pigment_row_mut(slot)[pigment::MATCH] = match_pct;
        self.stats_row_mut(slot)[stats::MATCH_PERCENT] = match_pct;
    }

    /// Allocate and initialize a food pellet
    pub fn spawn_food(&mut self, position: Vec2, kind: u8, color: [f32; 3]) -> Option<Slot> {
        let slot = self.pool.allocate()?;
        self.zero_rows(slot);

        self.flags[slot as usize] = flags::ACTIVE
            | flags::FOOD
            | (((kind as u32) << flags::FOOD_KIND_SHIFT) & flags::FOOD_KIND_MASK);

        let t = self.transform_row_mut(slot);
        t[transform::X] = position.x;
        t[transform::Y] = position.y;
        t[transform::SCALE] = 1.0;
        t[transform::PREV_X] = position.x;
        t[transform::PREV_Y] = position.y;

        let p = self.physics_row_mut(slot);
        p[physics::RADIUS] = constants::food::RADIUS;
        p[physics::MASS] = constants::food::MASS;
        p[physics::FRICTION] = phys_const::FRICTION;

        let s = self.stats_row_mut(slot);
        s[stats::CUR_HP] = 1.0;
        s[stats::MAX_HP] = 1.0;

        let g = self.pigment_row_mut(slot);
        g[pigment::R] = color[0];
        g[pigment::G] = color[1];
        g[pigment::B] = color[2];

        Some(slot)
    }

    /// Release a slot: zero every store row, clear flags, bump generation.
    /// A second release of the same slot is a no-op.
    pub fn release(&mut self, slot: Slot) -> bool {
        if !self.pool.is_active(slot) {
            return false;
        }
        self.zero_rows(slot);
        self.flags[slot as usize] = 0;
        self.pool.release(slot)
    }

    /// In-place respawn: every row reset, index and generation preserved,
    /// flags restored to ACTIVE | PLAYER (| BOT). The stored handle on the
    /// session stays valid across this.
    pub fn respawn_in_place(&mut self, slot: Slot, params: &PlayerSpawn) {
        debug_assert!(self.pool.is_active(slot));
        self.init_player_rows(slot, params);
    }

    fn zero_rows(&mut self, slot: Slot) {
        self.transform_row_mut(slot).fill(0.0);
        self.physics_row_mut(slot).fill(0.0);
        self.stats_row_mut(slot).fill(0.0);
        self.input_row_mut(slot).fill(0.0);
        self.tuning_row_mut(slot).fill(0.0);
        self.skill_row_mut(slot).fill(0.0);
        self.pigment_row_mut(slot).fill(0.0);
        self.effects[slot as usize].clear();
    }

    /// Universal store invariants from the testable-properties list; used by
    /// tests and debug builds after rule phases.
    #[cfg(any(test, debug_assertions))]
    pub fn check_invariants(&self) {
        use crate::game::constants::physics::{MAX_SPEED_BASE, SPEED_TOLERANCE};

        self.pool.check_invariants();
        for &slot in self.pool.active() {
            if !self.has_flags(slot, flags::ACTIVE) {
                continue;
            }
            let p = self.physics_row(slot);
            let s = self.stats_row(slot);
            assert!(p[physics::RADIUS] > 0.0, "slot {slot}: radius must be positive");
            assert!(p[physics::MASS] > 0.0, "slot {slot}: mass must be positive");
            assert!(s[stats::MAX_HP] > 0.0, "slot {slot}: max hp must be positive");
            assert!(
                self.position(slot).length() <= self.map_radius + 1e-3,
                "slot {slot}: position outside the world disk"
            );
            assert!(
                self.velocity(slot).length() <= MAX_SPEED_BASE * SPEED_TOLERANCE + 1e-3,
                "slot {slot}: velocity above the clamped limit"
            );
        }
    }
}

/// Match percentage between a pigment and its target in the unit RGB cube
pub fn pigment_match_percent(color: [f32; 3], target: [f32; 3]) -> f32 {
    let dx = color[0] - target[0];
    let dy = color[1] - target[1];
    let dz = color[2] - target[2];
    let dist = (dx * dx + dy * dy + dz * dz).sqrt();
    (100.0 * (1.0 - dist / constants::pigment::MAX_COLOR_DIST)).clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::constants::world::MAP_RADIUS;

    fn test_world() -> World {
        World::new(64, MAP_RADIUS)
    }

    fn player_at(pos: Vec2) -> PlayerSpawn {
        PlayerSpawn {
            position: pos,
            pigment: [0.2, 0.2, 0.2],
            target_pigment: [0.8, 0.8, 0.8],
            is_bot: false,
        }
    }

    #[test]
    fn test_spawn_player_initializes_rows() {
        let mut world = test_world();
        let slot = world.spawn_player(&player_at(Vec2::new(10.0, -5.0))).unwrap();

        assert!(world.has_flags(slot, flags::ACTIVE | flags::PLAYER));
        assert!(!world.has_flags(slot, flags::BOT));
        assert_eq!(world.ring(slot), constants::rings::OUTER);
        assert_eq!(world.position(slot), Vec2::new(10.0, -5.0));
        assert!(world.radius(slot) > 0.0);
        assert!(world.mass(slot) > 0.0);
        assert_eq!(world.hp(slot), stat_const::PLAYER_MAX_HP);
        world.check_invariants();
    }

    #[test]
    fn test_release_zeroes_rows() {
        let mut world = test_world();
        let slot = world.spawn_player(&player_at(Vec2::new(100.0, 0.0))).unwrap();
        assert!(world.release(slot));

        assert_eq!(world.flags(slot), 0);
        assert_eq!(world.position(slot), Vec2::ZERO);
        assert_eq!(world.radius(slot), 0.0);
        assert!(world.effects(slot).is_empty());

        // Double release is a no-op
        assert!(!world.release(slot));
        world.check_invariants();
    }

    #[test]
    fn test_respawn_preserves_handle() {
        let mut world = test_world();
        let slot = world.spawn_player(&player_at(Vec2::new(50.0, 50.0))).unwrap();
        let handle = world.handle(slot);

        // Simulate death then in-place respawn
        world.set_flags(slot, flags::DEAD);
        world.clear_flags(slot, flags::ACTIVE);
        world.respawn_in_place(slot, &player_at(Vec2::new(-200.0, 0.0)));

        assert_eq!(world.resolve(handle), Some(slot));
        assert!(world.has_flags(slot, flags::ACTIVE | flags::PLAYER));
        assert!(!world.has_flags(slot, flags::DEAD));
        assert_eq!(world.hp(slot), stat_const::PLAYER_MAX_HP);
    }

    #[test]
    fn test_spawn_food_kind_bits() {
        let mut world = test_world();
        let slot = world
            .spawn_food(Vec2::new(1.0, 2.0), 5, [0.1, 0.5, 0.9])
            .unwrap();

        assert!(world.has_flags(slot, flags::ACTIVE | flags::FOOD));
        assert_eq!(world.food_kind(slot), 5);
        assert!(!world.has_flags(slot, flags::PLAYER));
        world.check_invariants();
    }

    #[test]
    fn test_ring_bits_roundtrip() {
        let mut world = test_world();
        let slot = world.spawn_player(&player_at(Vec2::ZERO)).unwrap();
        for ring in 0..4u8 {
            world.set_ring(slot, ring);
            assert_eq!(world.ring(slot), ring);
        }
        // Ring bits must not disturb neighboring flags
        assert!(world.has_flags(slot, flags::ACTIVE | flags::PLAYER));
    }

    #[test]
    fn test_pigment_match_percent() {
        assert!((pigment_match_percent([0.5; 3], [0.5; 3]) - 100.0).abs() < 1e-4);
        assert!(pigment_match_percent([0.0; 3], [1.0; 3]).abs() < 1e-4);
        let half = pigment_match_percent([0.0; 3], [0.5; 3]);
        assert!(half > 49.0 && half < 51.0);
    }

    #[test]
    fn test_actions_lane_roundtrip() {
        let mut world = test_world();
        let slot = world.spawn_player(&player_at(Vec2::ZERO)).unwrap();
        let row = world.input_row_mut(slot);
        row[input::ACTIONS] = (input::ACTION_SKILL | input::ACTION_EJECT) as f32;
        assert_eq!(world.actions(slot), 0b11);
    }
}

//! Uniform-cell spatial hash used by collision, food consumption, and
//! magnet queries.
//!
//! Two layers share the cell geometry: a dynamic layer rebuilt every tick
//! (players, bots, projectiles) and a static layer mutated only on food
//! spawn/consume. Buckets persist across `clear()` so the per-tick rebuild
//! allocates nothing; buckets that stay empty long enough are garbage
//! collected on a tick timer.

use rustc_hash::FxHashMap;

use crate::game::constants::grid;
use crate::game::pool::Slot;
use crate::util::vec2::Vec2;

/// Packed cell key: `(cx << 16) | (cy & 0xFFFF)`
pub type CellKey = u32;

#[inline]
fn pack_key(cx: i32, cy: i32) -> CellKey {
    ((cx as u32) << 16) | (cy as u32 & 0xFFFF)
}

#[inline]
fn unpack_key(key: CellKey) -> (i32, i32) {
    ((key >> 16) as i16 as i32, (key & 0xFFFF) as i16 as i32)
}

#[derive(Debug, Default)]
struct Bucket {
    items: Vec<Slot>,
    /// Tick at which this bucket last held an entry
    last_occupied: u64,
}

/// Uniform spatial hash grid over the world disk
pub struct SpatialGrid {
    cell: f32,
    inv_cell: f32,
    dynamic: FxHashMap<CellKey, Bucket>,
    statics: FxHashMap<CellKey, Bucket>,
    tick: u64,
}

impl SpatialGrid {
    pub fn new(cell: f32) -> Self {
        Self {
            cell,
            inv_cell: 1.0 / cell,
            dynamic: FxHashMap::default(),
            statics: FxHashMap::default(),
            tick: 0,
        }
    }

    #[inline]
    pub fn cell_size(&self) -> f32 {
        self.cell
    }

    #[inline]
    fn cell_of(&self, pos: Vec2) -> (i32, i32) {
        (
            (pos.x * self.inv_cell).floor() as i32,
            (pos.y * self.inv_cell).floor() as i32,
        )
    }

    /// Key of the cell containing `pos`
    #[inline]
    pub fn key_of(&self, pos: Vec2) -> CellKey {
        let (cx, cy) = self.cell_of(pos);
        pack_key(cx, cy)
    }

    /// Start a tick: empty every dynamic bucket (allocations kept) and run
    /// the stale-bucket sweep when its interval comes up.
    pub fn begin_tick(&mut self, tick: u64) {
        self.tick = tick;
        for bucket in self.dynamic.values_mut() {
            if !bucket.items.is_empty() {
                bucket.last_occupied = tick;
                bucket.items.clear();
            }
        }
        if tick > 0 && tick % grid::GC_IDLE_TICKS == 0 {
            self.gc();
        }
    }

    /// Drop buckets that have been empty longer than the GC window
    pub fn gc(&mut self) {
        let deadline = self.tick.saturating_sub(grid::GC_IDLE_TICKS);
        self.dynamic
            .retain(|_, b| !b.items.is_empty() || b.last_occupied >= deadline);
        self.statics
            .retain(|_, b| !b.items.is_empty() || b.last_occupied >= deadline);
    }

    pub fn insert_dynamic(&mut self, slot: Slot, pos: Vec2) {
        let key = self.key_of(pos);
        let tick = self.tick;
        let bucket = self.dynamic.entry(key).or_insert_with(|| Bucket {
            items: Vec::with_capacity(grid::BUCKET_CAPACITY),
            last_occupied: 0,
        });
        bucket.items.push(slot);
        bucket.last_occupied = tick;
    }

    pub fn insert_static(&mut self, slot: Slot, pos: Vec2) {
        let key = self.key_of(pos);
        let tick = self.tick;
        let bucket = self.statics.entry(key).or_insert_with(|| Bucket {
            items: Vec::with_capacity(grid::BUCKET_CAPACITY),
            last_occupied: 0,
        });
        bucket.items.push(slot);
        bucket.last_occupied = tick;
    }

    /// Remove one static entry; position must match the insert position
    pub fn remove_static(&mut self, slot: Slot, pos: Vec2) {
        let key = self.key_of(pos);
        let tick = self.tick;
        if let Some(bucket) = self.statics.get_mut(&key) {
            if let Some(i) = bucket.items.iter().position(|&s| s == slot) {
                bucket.items.swap_remove(i);
                bucket.last_occupied = tick;
            }
        }
    }

    /// Collect dynamic-layer candidates within `radius` of `pos` into `out`.
    /// Candidates are cell-coarse; callers do the exact distance test.
    pub fn query_dynamic(&self, pos: Vec2, radius: f32, out: &mut Vec<Slot>) {
        Self::query_layer(&self.dynamic, self.inv_cell, pos, radius, out);
    }

    /// Collect static-layer (food) candidates within `radius` of `pos`
    pub fn query_static(&self, pos: Vec2, radius: f32, out: &mut Vec<Slot>) {
        Self::query_layer(&self.statics, self.inv_cell, pos, radius, out);
    }

    fn query_layer(
        layer: &FxHashMap<CellKey, Bucket>,
        inv_cell: f32,
        pos: Vec2,
        radius: f32,
        out: &mut Vec<Slot>,
    ) {
        let min_x = ((pos.x - radius) * inv_cell).floor() as i32;
        let max_x = ((pos.x + radius) * inv_cell).floor() as i32;
        let min_y = ((pos.y - radius) * inv_cell).floor() as i32;
        let max_y = ((pos.y + radius) * inv_cell).floor() as i32;

        for cx in min_x..=max_x {
            for cy in min_y..=max_y {
                if let Some(bucket) = layer.get(&pack_key(cx, cy)) {
                    out.extend_from_slice(&bucket.items);
                }
            }
        }
    }

    /// Visit each dynamic-layer candidate pair exactly once: pairs within a
    /// cell plus pairs against the right, bottom, bottom-right, and
    /// bottom-left neighbor cells.
    pub fn for_each_dynamic_pair<F>(&self, mut callback: F)
    where
        F: FnMut(Slot, Slot),
    {
        const HALF_NEIGHBORS: [(i32, i32); 4] = [(1, 0), (0, 1), (1, 1), (-1, 1)];

        for (&key, bucket) in &self.dynamic {
            let items = &bucket.items;
            for i in 0..items.len() {
                for j in (i + 1)..items.len() {
                    callback(items[i], items[j]);
                }
            }

            let (cx, cy) = unpack_key(key);
            for &(dx, dy) in &HALF_NEIGHBORS {
                if let Some(other) = self.dynamic.get(&pack_key(cx + dx, cy + dy)) {
                    for &a in items {
                        for &b in &other.items {
                            callback(a, b);
                        }
                    }
                }
            }
        }
    }

    /// Bucket counts (dynamic occupied, static occupied, total allocated)
    pub fn bucket_stats(&self) -> (usize, usize, usize) {
        let dyn_occupied = self.dynamic.values().filter(|b| !b.items.is_empty()).count();
        let static_occupied = self.statics.values().filter(|b| !b.items.is_empty()).count();
        (
            dyn_occupied,
            static_occupied,
            self.dynamic.len() + self.statics.len(),
        )
    }
}

impl Default for SpatialGrid {
    fn default() -> Self {
        Self::new(grid::CELL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_packing_negative_cells() {
        let key = pack_key(-3, -7);
        assert_eq!(unpack_key(key), (-3, -7));
        let key = pack_key(12, -1);
        assert_eq!(unpack_key(key), (12, -1));
    }

    #[test]
    fn test_neighboring_cells_have_distinct_keys() {
        let mut seen = std::collections::HashSet::new();
        for cx in -5..5 {
            for cy in -5..5 {
                assert!(seen.insert(pack_key(cx, cy)));
            }
        }
    }

    #[test]
    fn test_query_finds_nearby_dynamic() {
        let mut grid = SpatialGrid::new(64.0);
        grid.begin_tick(1);
        grid.insert_dynamic(1, Vec2::new(10.0, 10.0));
        grid.insert_dynamic(2, Vec2::new(50.0, 10.0));
        grid.insert_dynamic(3, Vec2::new(500.0, 500.0));

        let mut out = Vec::new();
        grid.query_dynamic(Vec2::new(20.0, 10.0), 64.0, &mut out);
        assert!(out.contains(&1));
        assert!(out.contains(&2));
        assert!(!out.contains(&3));
    }

    #[test]
    fn test_clear_keeps_buckets() {
        let mut grid = SpatialGrid::new(64.0);
        grid.begin_tick(1);
        grid.insert_dynamic(1, Vec2::new(0.0, 0.0));

        grid.begin_tick(2);
        let mut out = Vec::new();
        grid.query_dynamic(Vec2::ZERO, 10.0, &mut out);
        assert!(out.is_empty());
        // Bucket still allocated, just empty
        let (_, _, total) = grid.bucket_stats();
        assert_eq!(total, 1);
    }

    #[test]
    fn test_static_layer_survives_tick() {
        let mut grid = SpatialGrid::new(64.0);
        grid.begin_tick(1);
        grid.insert_static(7, Vec2::new(100.0, 100.0));

        grid.begin_tick(2);
        let mut out = Vec::new();
        grid.query_static(Vec2::new(100.0, 100.0), 8.0, &mut out);
        assert_eq!(out, vec![7]);

        grid.remove_static(7, Vec2::new(100.0, 100.0));
        out.clear();
        grid.query_static(Vec2::new(100.0, 100.0), 8.0, &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn test_pair_visits_each_pair_once() {
        let mut grid = SpatialGrid::new(64.0);
        grid.begin_tick(1);
        // Two in one cell, one in the right neighbor
        grid.insert_dynamic(1, Vec2::new(10.0, 10.0));
        grid.insert_dynamic(2, Vec2::new(20.0, 10.0));
        grid.insert_dynamic(3, Vec2::new(70.0, 10.0));

        let mut pairs = Vec::new();
        grid.for_each_dynamic_pair(|a, b| {
            let pair = if a < b { (a, b) } else { (b, a) };
            pairs.push(pair);
        });
        pairs.sort_unstable();
        assert_eq!(pairs, vec![(1, 2), (1, 3), (2, 3)]);
    }

    #[test]
    fn test_gc_drops_stale_empty_buckets() {
        let mut grid = SpatialGrid::new(64.0);
        grid.begin_tick(1);
        grid.insert_dynamic(1, Vec2::new(0.0, 0.0));

        // Bucket goes empty at tick 2 and never refills
        grid.begin_tick(2);
        let (_, _, total) = grid.bucket_stats();
        assert_eq!(total, 1);

        grid.begin_tick(2 + grid::GC_IDLE_TICKS * 2);
        grid.gc();
        let (_, _, total) = grid.bucket_stats();
        assert_eq!(total, 0);
    }
}

//! Interpolation buffer for remote entities.
//!
//! A bounded ring of timestamped snapshots. Writes reuse the oldest slot's
//! map in place (update present keys, drop absent ones), so steady-state
//! operation allocates nothing. Reads interpolate each remote entity at
//! `now - delay`, bracketing the render time between the newest snapshot at
//! or before it and the one after.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::game::pool::Slot;
use crate::net::codec::TransformFrame;
use crate::util::vec2::Vec2;

/// Interpolated remote entity state
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RemoteSample {
    pub position: Vec2,
    pub velocity: Vec2,
}

#[derive(Debug, Default)]
struct RingEntry {
    time_ms: f64,
    entities: FxHashMap<Slot, RemoteSample>,
    valid: bool,
}

/// Bounded ring of past snapshots with fixed-delay readout
pub struct InterpolationBuffer {
    ring: Vec<RingEntry>,
    head: usize,
    count: usize,
    delay_ms: f64,
    active_scratch: FxHashSet<Slot>,
}

impl InterpolationBuffer {
    pub fn new(capacity: usize, delay_ms: u64) -> Self {
        let mut ring = Vec::with_capacity(capacity);
        ring.resize_with(capacity, RingEntry::default);
        Self {
            ring,
            head: 0,
            count: 0,
            delay_ms: delay_ms as f64,
            active_scratch: FxHashSet::default(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Write a decoded frame into the ring at `time_ms`, excluding the
    /// locally predicted slot. The reused map is reconciled against the
    /// frame's active set: stale keys are removed, present ones updated.
    pub fn push(&mut self, time_ms: f64, frame: &TransformFrame, local_slot: Option<Slot>) {
        self.active_scratch.clear();
        for entity in &frame.entities {
            if Some(entity.slot) != local_slot {
                self.active_scratch.insert(entity.slot);
            }
        }

        let entry = &mut self.ring[self.head];
        entry.time_ms = time_ms;
        entry.valid = true;
        let active = &self.active_scratch;
        entry.entities.retain(|slot, _| active.contains(slot));
        for entity in &frame.entities {
            if Some(entity.slot) == local_slot {
                continue;
            }
            entry.entities.insert(
                entity.slot,
                RemoteSample {
                    position: entity.position,
                    velocity: entity.velocity,
                },
            );
        }

        self.head = (self.head + 1) % self.ring.len();
        self.count = (self.count + 1).min(self.ring.len());
    }

    /// Sample every remote entity at `now_ms - delay`, invoking `apply` per
    /// entity. No allocation; the caller mutates its render state in place.
    pub fn sample<F>(&self, now_ms: f64, mut apply: F)
    where
        F: FnMut(Slot, RemoteSample),
    {
        if self.count == 0 {
            return;
        }
        let render_time = now_ms - self.delay_ms;

        // Newest snapshot at or before render time, and its successor
        let mut older: Option<&RingEntry> = None;
        let mut newer: Option<&RingEntry> = None;
        for offset in 0..self.count {
            // Walk backward from the most recent write
            let idx = (self.head + self.ring.len() - 1 - offset) % self.ring.len();
            let entry = &self.ring[idx];
            if !entry.valid {
                continue;
            }
            if entry.time_ms <= render_time {
                older = Some(entry);
                break;
            }
            newer = Some(entry);
        }

        match (older, newer) {
            (Some(older), Some(newer)) => {
                let span = newer.time_ms - older.time_ms;
                let t = if span > f64::EPSILON {
                    ((render_time - older.time_ms) / span).clamp(0.0, 1.0) as f32
                } else {
                    0.0
                };
                for (&slot, from) in &older.entities {
                    match newer.entities.get(&slot) {
                        Some(to) => apply(
                            slot,
                            RemoteSample {
                                position: from.position.lerp(to.position, t),
                                velocity: from.velocity.lerp(to.velocity, t),
                            },
                        ),
                        // Gone in the newer snapshot; hold the last state
                        None => apply(slot, *from),
                    }
                }
                // Entities that appeared in the newer snapshot only
                for (&slot, to) in &newer.entities {
                    if !older.entities.contains_key(&slot) {
                        apply(slot, *to);
                    }
                }
            }
            (Some(only), None) => {
                // Render time is at or past the newest snapshot
                for (&slot, sample) in &only.entities {
                    apply(slot, *sample);
                }
            }
            (None, _) => {
                // Nothing at or before render time; fall back to the most
                // recent snapshot
                let idx = (self.head + self.ring.len() - 1) % self.ring.len();
                let entry = &self.ring[idx];
                if entry.valid {
                    for (&slot, sample) in &entry.entities {
                        apply(slot, *sample);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::codec::EntityRecord;

    fn frame(entries: &[(Slot, f32)]) -> TransformFrame {
        TransformFrame {
            server_time: 0.0,
            entities: entries
                .iter()
                .map(|&(slot, x)| EntityRecord {
                    slot,
                    position: Vec2::new(x, 0.0),
                    velocity: Vec2::ZERO,
                    last_processed_seq: 0,
                })
                .collect(),
        }
    }

    fn sample_one(buffer: &InterpolationBuffer, now: f64, slot: Slot) -> Option<RemoteSample> {
        let mut result = None;
        buffer.sample(now, |s, sample| {
            if s == slot {
                result = Some(sample);
            }
        });
        result
    }

    #[test]
    fn test_interpolates_between_brackets() {
        // Snapshots at 0, 50, 100 ms with x = 0, 10, 20; render at
        // wall-time 150 with 100 ms delay lands exactly on the 50 ms frame
        let mut buffer = InterpolationBuffer::new(20, 100);
        buffer.push(0.0, &frame(&[(7, 0.0)]), None);
        buffer.push(50.0, &frame(&[(7, 10.0)]), None);
        buffer.push(100.0, &frame(&[(7, 20.0)]), None);

        let sample = sample_one(&buffer, 150.0, 7).unwrap();
        assert!((sample.position.x - 10.0).abs() < 1e-5);
    }

    #[test]
    fn test_midpoint_interpolation() {
        let mut buffer = InterpolationBuffer::new(20, 100);
        buffer.push(0.0, &frame(&[(7, 0.0)]), None);
        buffer.push(50.0, &frame(&[(7, 10.0)]), None);
        buffer.push(100.0, &frame(&[(7, 20.0)]), None);

        // Render time 75 ms: halfway between the 50 and 100 ms frames
        let sample = sample_one(&buffer, 175.0, 7).unwrap();
        assert!((sample.position.x - 15.0).abs() < 1e-5);
    }

    #[test]
    fn test_render_past_newest_uses_it_directly() {
        let mut buffer = InterpolationBuffer::new(20, 100);
        buffer.push(0.0, &frame(&[(3, 5.0)]), None);
        buffer.push(50.0, &frame(&[(3, 9.0)]), None);

        let sample = sample_one(&buffer, 500.0, 3).unwrap();
        assert!((sample.position.x - 9.0).abs() < 1e-5);
    }

    #[test]
    fn test_nothing_before_render_time_falls_back() {
        let mut buffer = InterpolationBuffer::new(20, 100);
        buffer.push(1000.0, &frame(&[(3, 42.0)]), None);

        // Render time 0 predates everything
        let sample = sample_one(&buffer, 100.0, 3).unwrap();
        assert!((sample.position.x - 42.0).abs() < 1e-5);
    }

    #[test]
    fn test_local_slot_excluded() {
        let mut buffer = InterpolationBuffer::new(20, 0);
        buffer.push(0.0, &frame(&[(1, 1.0), (2, 2.0)]), Some(1));

        assert!(sample_one(&buffer, 10.0, 1).is_none());
        assert!(sample_one(&buffer, 10.0, 2).is_some());
    }

    #[test]
    fn test_ring_reuses_slots_and_drops_stale_keys() {
        let mut buffer = InterpolationBuffer::new(3, 0);
        for i in 0..10 {
            // Entity 9 appears only in early frames
            let entries: Vec<(Slot, f32)> = if i < 5 {
                vec![(1, i as f32), (9, 0.0)]
            } else {
                vec![(1, i as f32)]
            };
            buffer.push(i as f64 * 50.0, &frame(&entries), None);
        }
        assert_eq!(buffer.len(), 3);

        // After overwriting, the reused maps no longer carry entity 9
        let mut slots = Vec::new();
        buffer.sample(10_000.0, |slot, _| slots.push(slot));
        assert_eq!(slots, vec![1]);
    }

    #[test]
    fn test_count_saturates_at_capacity() {
        let mut buffer = InterpolationBuffer::new(4, 100);
        for i in 0..20 {
            buffer.push(i as f64, &frame(&[(1, 0.0)]), None);
        }
        assert_eq!(buffer.len(), 4);
    }
}

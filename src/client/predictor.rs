//! Client-side prediction and server reconciliation for the local entity.
//!
//! Prediction runs the same movement and physics steps the server runs, on
//! a private store. Each dispatched input is remembered in a bounded
//! pending ring; when a snapshot arrives the local state snaps to the
//! authoritative row, acked inputs are discarded, and the remainder replays
//! on top. Divergence below the reconcile threshold is left for the render
//! lerp to absorb; anything larger snaps.

use crate::config::ClientConfig;
use crate::game::constants::client as client_const;
use crate::game::constants::input as input_const;
use crate::game::pool::Slot;
use crate::game::stores::{input, PlayerSpawn, World};
use crate::game::systems::{movement, physics};
use crate::util::vec2::Vec2;

/// One input dispatched to the server and not yet acked
#[derive(Debug, Clone, Copy)]
pub struct PendingInput {
    pub seq: u32,
    pub target: Vec2,
    pub space: bool,
    pub eject: bool,
    pub dt: f32,
}

/// How a reconciliation pass resolved
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReconcileOutcome {
    /// Divergence exceeded the threshold; the view should snap
    Snapped { error: f32 },
    /// Divergence small enough for the render lerp to absorb
    Smoothed { error: f32 },
}

impl ReconcileOutcome {
    pub fn error(&self) -> f32 {
        match *self {
            ReconcileOutcome::Snapped { error } | ReconcileOutcome::Smoothed { error } => error,
        }
    }
}

/// Local predictor for the player's own entity
pub struct Predictor {
    world: World,
    slot: Slot,
    pending: Vec<PendingInput>,
    next_seq: u32,
    threshold: f32,
}

impl Predictor {
    pub fn new(map_radius: f32, config: &ClientConfig) -> Self {
        let mut world = World::new(8, map_radius);
        let slot = world
            .spawn_player(&PlayerSpawn {
                position: Vec2::ZERO,
                pigment: [0.5; 3],
                target_pigment: [0.5; 3],
                is_bot: false,
            })
            .unwrap_or(0);
        Self {
            world,
            slot,
            pending: Vec::with_capacity(client_const::PENDING_INPUTS),
            next_seq: 1,
            threshold: config.reconcile_threshold,
        }
    }

    #[inline]
    pub fn position(&self) -> Vec2 {
        self.world.position(self.slot)
    }

    #[inline]
    pub fn velocity(&self) -> Vec2 {
        self.world.velocity(self.slot)
    }

    #[inline]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Most recently dispatched sequence number
    pub fn last_sent_seq(&self) -> u32 {
        self.next_seq.wrapping_sub(1) & (input_const::SEQ_MODULO - 1)
    }

    /// Predict one input locally and record it for replay. Returns the
    /// sequence number to send to the server.
    pub fn predict(&mut self, target: Vec2, space: bool, eject: bool, dt: f32) -> u32 {
        let seq = self.next_seq;
        self.next_seq = (self.next_seq + 1) & (input_const::SEQ_MODULO - 1);
        if self.next_seq == 0 {
            self.next_seq = 1;
        }

        self.step(target, space, eject, dt);

        if self.pending.len() >= client_const::PENDING_INPUTS {
            self.pending.remove(0);
        }
        self.pending.push(PendingInput {
            seq,
            target,
            space,
            eject,
            dt,
        });
        seq
    }

    /// Apply the authoritative row for the local entity, drop acked inputs,
    /// and replay the rest through the shared simulation steps.
    pub fn reconcile(
        &mut self,
        server_position: Vec2,
        server_velocity: Vec2,
        ack_seq: u32,
    ) -> ReconcileOutcome {
        let before = self.world.position(self.slot);

        self.world.set_position(self.slot, server_position);
        self.world.set_velocity(self.slot, server_velocity);

        // In-place swap-shrink of acked entries; replay needs seq order, so
        // restore it after the shrink pass
        let mut i = 0;
        while i < self.pending.len() {
            if seq_not_after(self.pending[i].seq, ack_seq) {
                self.pending.swap_remove(i);
            } else {
                i += 1;
            }
        }
        let ack = ack_seq;
        self.pending
            .sort_unstable_by_key(|p| p.seq.wrapping_sub(ack) & (input_const::SEQ_MODULO - 1));

        let replay: Vec<PendingInput> = self.pending.clone();
        for p in replay {
            self.step(p.target, p.space, p.eject, p.dt);
        }

        let after = self.world.position(self.slot);
        let error = before.distance_to(after);
        if error > self.threshold {
            ReconcileOutcome::Snapped { error }
        } else {
            ReconcileOutcome::Smoothed { error }
        }
    }

    /// Reconstruct the full ack sequence from the 16-bit wire field using
    /// the last sequence this predictor handed out as the reference.
    pub fn expand_ack(&self, ack16: u16) -> u32 {
        let mask = input_const::SEQ_MODULO - 1;
        let reference = self.last_sent_seq();
        let mut candidate = (reference & !0xFFFF) | ack16 as u32;
        // The ack can never be ahead of what we sent
        if candidate > reference {
            candidate = candidate.wrapping_sub(0x1_0000) & mask;
        }
        candidate
    }

    /// One shared simulation step: write the input row, steer, integrate
    fn step(&mut self, target: Vec2, space: bool, eject: bool, dt: f32) {
        let map_radius = self.world.map_radius();
        let mut actions = 0u32;
        if space {
            actions |= input::ACTION_SKILL;
        }
        if eject {
            actions |= input::ACTION_EJECT;
        }
        let row = self.world.input_row_mut(self.slot);
        row[input::TARGET_X] = target.x.clamp(-map_radius, map_radius);
        row[input::TARGET_Y] = target.y.clamp(-map_radius, map_radius);
        row[input::ACTIONS] = actions as f32;

        movement::steer_slot(&mut self.world, self.slot, dt);
        physics::integrate_slot(&mut self.world, self.slot, dt);
    }
}

/// True when `seq` is at or before `ack` in 2^31 modular order
fn seq_not_after(seq: u32, ack: u32) -> bool {
    let mask = input_const::SEQ_MODULO - 1;
    let ahead = seq.wrapping_sub(ack) & mask;
    ahead == 0 || ahead > input_const::SEQ_MODULO / 2
}

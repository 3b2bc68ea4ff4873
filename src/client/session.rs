//! Client session glue: decoded snapshot frames flow into reconciliation
//! for the local entity and into the interpolation ring for everyone else.

use crate::client::interp::{InterpolationBuffer, RemoteSample};
use crate::client::predictor::{Predictor, ReconcileOutcome};
use crate::client::status::ConnectionState;
use crate::config::ClientConfig;
use crate::game::pool::Slot;
use crate::net::codec::{decode_frame, FrameError};
use crate::net::protocol::InputFrame;
use crate::util::vec2::Vec2;

/// One connected (or offline-mode) client simulation
pub struct ClientSession {
    config: ClientConfig,
    /// Wire slot of the local entity, from the join ack
    local_slot: Slot,
    predictor: Predictor,
    interp: InterpolationBuffer,
    pub connection: ConnectionState,
    expect_crc: bool,
    last_server_time: f32,
}

impl ClientSession {
    /// Build from the join ack fields
    pub fn new(local_slot: Slot, map_radius: f32, config: ClientConfig, expect_crc: bool) -> Self {
        let predictor = Predictor::new(map_radius, &config);
        let interp = InterpolationBuffer::new(config.snapshot_buffer, config.interp_delay_ms);
        Self {
            config,
            local_slot,
            predictor,
            interp,
            connection: ConnectionState::new(),
            expect_crc,
            last_server_time: f32::NEG_INFINITY,
        }
    }

    #[inline]
    pub fn local_slot(&self) -> Slot {
        self.local_slot
    }

    #[inline]
    pub fn predicted_position(&self) -> Vec2 {
        self.predictor.position()
    }

    /// Predict one input locally and return the frame to send
    pub fn dispatch_input(&mut self, target: Vec2, space: bool, eject: bool, dt: f32) -> InputFrame {
        let seq = self.predictor.predict(target, space, eject, dt);
        InputFrame {
            seq,
            target,
            space,
            eject,
        }
    }

    /// Handle one received snapshot frame. Any parse failure drops the
    /// whole frame; out-of-order frames (non-increasing server time) are
    /// dropped too so `serverGameTime` stays non-decreasing for consumers.
    pub fn on_frame(
        &mut self,
        bytes: &[u8],
        now_ms: f64,
    ) -> Result<Option<ReconcileOutcome>, FrameError> {
        let frame = decode_frame(bytes, self.expect_crc)?;
        if frame.server_time < self.last_server_time {
            return Ok(None);
        }
        self.last_server_time = frame.server_time;

        // Reconcile the local entity against its authoritative row
        let outcome = frame
            .entities
            .iter()
            .find(|e| e.slot == self.local_slot)
            .map(|local| {
                let ack = self.predictor.expand_ack(local.last_processed_seq);
                self.predictor
                    .reconcile(local.position, local.velocity, ack)
            });

        // Remote entities feed the interpolation ring
        self.interp.push(now_ms, &frame, Some(self.local_slot));

        Ok(outcome)
    }

    /// Interpolated remote entities at `now - delay`
    pub fn sample_remotes<F>(&self, now_ms: f64, apply: F)
    where
        F: FnMut(Slot, RemoteSample),
    {
        self.interp.sample(now_ms, apply);
    }

    #[inline]
    pub fn reconcile_threshold(&self) -> f32 {
        self.config.reconcile_threshold
    }
}

//! Input frame validation: sequence progression, float hygiene, bounds
//! clamping, and per-session escalation heuristics.
//!
//! Violations never disconnect a client; the frame is dropped, the drop is
//! counted, and logging is throttled. Two heuristics escalate to a
//! position-correction broadcast: a drop ratio above one half over the
//! review window, or repeated sequence-jump violations. Movement is fully
//! server-authoritative (inputs carry targets, not positions), so there is
//! no client position to teleport-check.

use std::time::{Duration, Instant};

use hashbrown::HashMap;

use crate::game::constants::input as limits;
use crate::net::protocol::{InputFrame, SessionId};
use crate::util::vec2::Vec2;

/// Why an input frame was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum InputViolation {
    #[error("non-finite float in input")]
    NonFinite,
    #[error("sequence not increasing: last={last}, got={seq}")]
    SequenceStale { last: u32, seq: u32 },
    #[error("sequence jumped too far: last={last}, got={seq}")]
    SequenceJump { last: u32, seq: u32 },
}

#[derive(Debug)]
struct SessionState {
    /// Last accepted sequence number, normalized modulo 2^31
    last_seq: Option<u32>,
    accepted: u32,
    dropped: u32,
    window_start: Instant,
    jump_violations: u32,
    drop_log_counter: u32,
}

impl SessionState {
    fn new() -> Self {
        Self {
            last_seq: None,
            accepted: 0,
            dropped: 0,
            window_start: Instant::now(),
            jump_violations: 0,
            drop_log_counter: 0,
        }
    }
}

/// Per-session input validator shared by one room
pub struct InputGate {
    sessions: HashMap<SessionId, SessionState>,
    max_sequence_jump: u32,
    map_radius: f32,
}

/// Normalize a raw client sequence number modulo 2^31
#[inline]
pub fn normalize_seq(seq: u32) -> u32 {
    seq & (limits::SEQ_MODULO - 1)
}

impl InputGate {
    pub fn new(max_sequence_jump: u32, map_radius: f32) -> Self {
        Self {
            sessions: HashMap::new(),
            max_sequence_jump,
            map_radius,
        }
    }

    pub fn register(&mut self, session: SessionId) {
        self.sessions.insert(session, SessionState::new());
    }

    pub fn unregister(&mut self, session: SessionId) {
        self.sessions.remove(&session);
    }

    /// Last sequence number accepted for a session (snapshot ack source)
    pub fn last_processed_seq(&self, session: SessionId) -> u32 {
        self.sessions
            .get(&session)
            .and_then(|s| s.last_seq)
            .unwrap_or(0)
    }

    /// Validate and sanitize a frame in place. On Ok the frame is safe to
    /// apply: sequence recorded, booleans already normalized by decode, and
    /// the target clamped into world bounds (clamping is not a drop).
    pub fn admit(
        &mut self,
        session: SessionId,
        frame: &mut InputFrame,
    ) -> Result<(), InputViolation> {
        let map_radius = self.map_radius;
        let max_jump = self.max_sequence_jump;
        let state = self
            .sessions
            .entry(session)
            .or_insert_with(SessionState::new);

        if !frame.target.is_finite() {
            state.dropped += 1;
            return Err(InputViolation::NonFinite);
        }

        let seq = normalize_seq(frame.seq);
        if let Some(last) = state.last_seq {
            match sequence_advance(last, seq, max_jump) {
                SeqCheck::Ok => {}
                SeqCheck::Stale => {
                    state.dropped += 1;
                    return Err(InputViolation::SequenceStale { last, seq });
                }
                SeqCheck::Jump => {
                    state.dropped += 1;
                    state.jump_violations += 1;
                    return Err(InputViolation::SequenceJump { last, seq });
                }
            }
        }
        state.last_seq = Some(seq);
        state.accepted += 1;
        frame.seq = seq;

        frame.target = Vec2::new(
            frame.target.x.clamp(-map_radius, map_radius),
            frame.target.y.clamp(-map_radius, map_radius),
        );
        Ok(())
    }

    /// Count a drop that happened outside `admit` (rate limit, size); the
    /// return value says whether this particular drop should be logged.
    pub fn note_drop(&mut self, session: SessionId) -> bool {
        let state = self
            .sessions
            .entry(session)
            .or_insert_with(SessionState::new);
        state.dropped += 1;
        state.drop_log_counter = state.drop_log_counter.wrapping_add(1);
        state.drop_log_counter % limits::DROP_LOG_EVERY == 1
    }

    /// Escalation check: run once per review window per session. Returns
    /// true when the session's recent behavior warrants a position
    /// correction broadcast. Counters reset on expiry of the window.
    pub fn should_escalate(&mut self, session: SessionId) -> bool {
        let Some(state) = self.sessions.get_mut(&session) else {
            return false;
        };
        let now = Instant::now();
        if now.duration_since(state.window_start)
            < Duration::from_secs(limits::ESCALATE_WINDOW_S)
        {
            return false;
        }

        let total = state.accepted + state.dropped;
        let ratio = if total > 0 {
            state.dropped as f32 / total as f32
        } else {
            0.0
        };
        let escalate = ratio > limits::ESCALATE_DROP_RATIO || state.jump_violations >= 3;

        state.window_start = now;
        state.accepted = 0;
        state.dropped = 0;
        state.jump_violations = 0;
        escalate
    }

}

enum SeqCheck {
    Ok,
    Stale,
    Jump,
}

/// Strict-greater comparison on 2^31-normalized sequence numbers, rolling
/// forward across the wrap window
fn sequence_advance(last: u32, seq: u32, max_jump: u32) -> SeqCheck {
    if seq > last {
        if seq - last > max_jump {
            SeqCheck::Jump
        } else {
            SeqCheck::Ok
        }
    } else if last - seq > limits::SEQ_MODULO / 2 {
        // Wrapped around 2^31; distance measured through the wrap point
        let jump = seq + (limits::SEQ_MODULO - last);
        if jump > max_jump {
            SeqCheck::Jump
        } else {
            SeqCheck::Ok
        }
    } else {
        SeqCheck::Stale
    }
}

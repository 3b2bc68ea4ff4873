//! Game room: owns the simulation, the per-session state, and the
//! broadcast fan-out.
//!
//! The room is single-writer: `tick_once` advances every phase on one
//! logical worker. Connections feed it through one-slot mailboxes and read
//! from bounded outbound queues, so neither side can stall the tick.

use std::sync::Arc;
use std::time::{Duration, Instant};

use hashbrown::HashMap;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::anticheat::rate_limiter::RateLimiter;
use crate::anticheat::validator::{InputGate, InputViolation};
use crate::config::SimulationConfig;
use crate::game::game_loop::GameLoop;
use crate::game::mailbox::{InputMailbox, MailboxRegistry};
use crate::game::pool::{Handle, Slot};
use crate::game::stores::flags;
use crate::metrics::Metrics;
use crate::net::codec::{self, DeltaTracker};
use crate::net::connection::{Outbound, OutboundSender};
use crate::net::protocol::{
    self, InputFrame, JoinOptions, RoomStatus, ServerMessage, SessionId,
};

/// Join / dispatch failures
#[derive(Debug, Clone, thiserror::Error)]
pub enum RoomError {
    #[error("room is full")]
    RoomFull,
    #[error("entity quota exceeded for this client")]
    QuotaExceeded,
    #[error("entity pool exhausted")]
    PoolExhausted,
    #[error("room is shutting down")]
    Disposed,
    #[error("unknown session")]
    UnknownSession,
}

/// What a successful join hands back to the connection
pub struct JoinGrant {
    pub slot: Slot,
    pub handle: Handle,
    pub mailbox: Arc<InputMailbox>,
    pub rate_limiter: Arc<Mutex<RateLimiter>>,
    pub outbound: OutboundSender,
}

struct SessionEntry {
    handle: Handle,
    entity_count: usize,
    outbound: OutboundSender,
    name: String,
}

pub struct Room {
    id: Uuid,
    config: SimulationConfig,
    max_clients: usize,
    idle_timeout: Duration,
    game: GameLoop,
    mailboxes: Arc<MailboxRegistry>,
    gate: InputGate,
    rate_limiter: Arc<Mutex<RateLimiter>>,
    sessions: HashMap<SessionId, SessionEntry>,
    delta: Option<DeltaTracker>,
    metrics: Arc<Metrics>,
    empty_since: Option<Instant>,
    disposed: bool,
    input_scratch: Vec<(SessionId, InputFrame)>,
    slot_inputs: Vec<(Slot, InputFrame)>,
}

impl Room {
    pub fn new(
        config: SimulationConfig,
        max_clients: usize,
        idle_timeout: Duration,
        metrics: Arc<Metrics>,
        seed: u64,
    ) -> Self {
        let mut game = GameLoop::new(config.clone(), seed);
        for _ in 0..config.bot_count {
            if game.spawn_player([0.5, 0.5, 0.5], true).is_none() {
                warn!("pool exhausted while seeding bots");
                break;
            }
        }

        let gate = InputGate::new(config.max_sequence_jump, config.map_radius);
        let rate_limiter = Arc::new(Mutex::new(RateLimiter::new(config.rate_limit_max)));
        Metrics::incr(&metrics.rooms_active);

        Self {
            id: Uuid::new_v4(),
            max_clients,
            idle_timeout,
            game,
            mailboxes: Arc::new(MailboxRegistry::new()),
            gate,
            rate_limiter,
            sessions: HashMap::new(),
            delta: config.snapshot_delta.then(DeltaTracker::new),
            metrics,
            empty_since: Some(Instant::now()),
            disposed: false,
            input_scratch: Vec::new(),
            slot_inputs: Vec::new(),
            config,
        }
    }

    #[inline]
    pub fn id(&self) -> Uuid {
        self.id
    }

    #[inline]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    #[inline]
    pub fn has_space(&self) -> bool {
        !self.disposed && self.sessions.len() < self.max_clients
    }

    #[inline]
    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    #[inline]
    pub fn tick_period(&self) -> Duration {
        self.config.tick_period()
    }

    pub fn game(&self) -> &GameLoop {
        &self.game
    }

    /// Accept a session: allocate its entity, wire its mailbox, and push
    /// the join ack onto its outbound queue.
    pub fn on_join(
        &mut self,
        session: SessionId,
        opts: JoinOptions,
        outbound: OutboundSender,
    ) -> Result<JoinGrant, RoomError> {
        if self.disposed {
            return Err(RoomError::Disposed);
        }
        if self.sessions.len() >= self.max_clients {
            Metrics::incr(&self.metrics.joins_rejected);
            return Err(RoomError::RoomFull);
        }
        if let Some(entry) = self.sessions.get(&session) {
            if entry.entity_count >= self.config.max_entities_per_client {
                Metrics::incr(&self.metrics.joins_rejected);
                return Err(RoomError::QuotaExceeded);
            }
        }

        let pigment = opts
            .pigment
            .filter(|p| p.r.is_finite() && p.g.is_finite() && p.b.is_finite())
            .map(|p| [p.r.clamp(0.0, 1.0), p.g.clamp(0.0, 1.0), p.b.clamp(0.0, 1.0)])
            .unwrap_or([0.5, 0.5, 0.5]);
        let name = opts
            .name
            .filter(|n| !n.is_empty() && n.len() <= 24)
            .unwrap_or_else(|| "player".to_string());

        let Some(slot) = self.game.spawn_player(pigment, false) else {
            warn!(room = %self.id, "join rejected, entity pool exhausted");
            Metrics::incr(&self.metrics.joins_rejected);
            return Err(RoomError::PoolExhausted);
        };
        let handle = self.game.world().handle(slot);

        let mailbox = self.mailboxes.register(session);
        self.rate_limiter.lock().register(session);
        self.gate.register(session);

        let accepted = ServerMessage::JoinAccepted {
            session,
            slot,
            handle: handle.raw(),
            map_radius: self.config.map_radius,
            tick_rate_hz: self.config.tick_rate_hz,
        };
        if let Ok(bytes) = protocol::encode(&accepted) {
            outbound.push(Outbound::Control(Arc::new(bytes)));
        }

        self.sessions.insert(
            session,
            SessionEntry {
                handle,
                entity_count: 1,
                outbound: outbound.clone(),
                name: name.clone(),
            },
        );
        self.empty_since = None;
        Metrics::incr(&self.metrics.joins_accepted);
        Metrics::set(&self.metrics.sessions_active, self.sessions.len() as u64);
        info!(room = %self.id, session = %session, slot, name, "session joined");

        Ok(JoinGrant {
            slot,
            handle,
            mailbox,
            rate_limiter: self.rate_limiter.clone(),
            outbound,
        })
    }

    /// Release a departing session's entity and trackers
    pub fn on_leave(&mut self, session: SessionId) {
        let Some(entry) = self.sessions.remove(&session) else {
            return;
        };
        if let Some(slot) = self.game.world().resolve(entry.handle) {
            self.game.remove_player(slot);
        }
        self.mailboxes.unregister(session);
        self.rate_limiter.lock().unregister(session);
        self.gate.unregister(session);

        Metrics::set(&self.metrics.sessions_active, self.sessions.len() as u64);
        info!(room = %self.id, session = %session, name = entry.name, "session left");

        if self.sessions.is_empty() {
            self.empty_since = Some(Instant::now());
        }
    }

    /// One full tick: claim inputs, validate, simulate, broadcast
    pub fn tick_once(&mut self) {
        if self.disposed {
            return;
        }

        // Phase 1a: claim queued inputs and validate them
        self.input_scratch.clear();
        let mut claimed = std::mem::take(&mut self.input_scratch);
        self.mailboxes.drain(&mut claimed);

        self.slot_inputs.clear();
        let mut inputs = std::mem::take(&mut self.slot_inputs);
        for (session, mut frame) in claimed.drain(..) {
            match self.admit_frame(session, &mut frame) {
                Some(slot) => inputs.push((slot, frame)),
                None => {}
            }
        }
        self.input_scratch = claimed;

        // Phases 1b-6
        let events = self.game.tick(&inputs);
        self.slot_inputs = inputs;

        // Escalation heuristics fire a position correction, never a kick
        self.send_corrections();

        // Phase 7: broadcast
        self.broadcast_snapshot();

        // Housekeeping
        self.rate_limiter.lock().sweep();
        self.update_gauges(events.timings.total_us);

        if events.timings.total_us
            > (self.config.dt() * crate::game::constants::tick::SLOW_FACTOR * 1e6) as u64
        {
            Metrics::incr(&self.metrics.slow_ticks);
        }
    }

    /// Validate one claimed frame and resolve it to a store slot
    fn admit_frame(&mut self, session: SessionId, frame: &mut InputFrame) -> Option<Slot> {
        let entry = self.sessions.get_mut(&session)?;

        match self.gate.admit(session, frame) {
            Ok(()) => {}
            Err(violation) => {
                Metrics::incr(&self.metrics.inputs_dropped);
                if matches!(
                    violation,
                    InputViolation::SequenceStale { .. } | InputViolation::SequenceJump { .. }
                ) {
                    Metrics::incr(&self.metrics.sequence_violations);
                }
                if self.gate.note_drop(session) {
                    debug!(session = %session, %violation, "input dropped");
                }
                return None;
            }
        }

        // Handle guard: a stale handle means the slot was recycled under
        // this session (normal across a leave/rejoin race). Drop the frame
        // and refresh the stored handle.
        match self.game.world().resolve(entry.handle) {
            Some(slot) => {
                Metrics::incr(&self.metrics.inputs_accepted);
                Some(slot)
            }
            None => {
                let refreshed = self.game.world().handle(entry.handle.index());
                debug!(
                    session = %session,
                    stale = entry.handle.raw(),
                    refreshed = refreshed.raw(),
                    "handle mismatch, frame dropped"
                );
                entry.handle = refreshed;
                Metrics::incr(&self.metrics.inputs_dropped);
                None
            }
        }
    }

    fn send_corrections(&mut self) {
        let mut corrections: Vec<(SessionId, Slot)> = Vec::new();
        for (&session, entry) in &self.sessions {
            if let Some(slot) = self.game.world().resolve(entry.handle) {
                if self.gate.should_escalate(session) {
                    corrections.push((session, slot));
                }
            }
        }
        for (session, slot) in corrections {
            let world = self.game.world();
            let message = ServerMessage::PositionCorrection {
                slot,
                position: world.position(slot),
                velocity: world.velocity(slot),
            };
            if let Ok(bytes) = protocol::encode(&message) {
                if let Some(entry) = self.sessions.get(&session) {
                    entry.outbound.push(Outbound::Control(Arc::new(bytes)));
                    Metrics::incr(&self.metrics.position_corrections);
                    warn!(session = %session, slot, "position correction sent");
                }
            }
        }
    }

    fn broadcast_snapshot(&mut self) {
        // Per-slot acks for the sessions owning each player entity
        let mut acks: FxHashMap<Slot, u16> = FxHashMap::default();
        for (&session, entry) in &self.sessions {
            if let Some(slot) = self.game.world().resolve(entry.handle) {
                acks.insert(slot, self.gate.last_processed_seq(session) as u16);
            }
        }

        let frame = codec::frame_from_world(self.game.world(), self.game.game_time(), |slot| {
            acks.get(&slot).copied().unwrap_or(0)
        });
        let frame = match &mut self.delta {
            Some(tracker) => tracker.filter(&frame),
            None => frame,
        };

        let bytes = Arc::new(codec::encode_frame(&frame, self.config.snapshot_crc));
        let mut dropped = 0usize;
        for entry in self.sessions.values() {
            dropped += entry.outbound.push(Outbound::Frame(bytes.clone()));
        }
        if dropped > 0 {
            Metrics::add(&self.metrics.frames_dropped_backpressure, dropped as u64);
        }
    }

    fn update_gauges(&self, tick_us: u64) {
        let world = self.game.world();
        let bots = world
            .active()
            .iter()
            .filter(|&&s| world.has_flags(s, flags::BOT))
            .count();
        Metrics::incr(&self.metrics.ticks_total);
        Metrics::set(&self.metrics.tick_time_us, tick_us);
        Metrics::set(&self.metrics.entities_active, world.active_count() as u64);
        Metrics::set(&self.metrics.food_active, self.game.food_count() as u64);
        Metrics::set(&self.metrics.bots_active, bots as u64);
    }

    /// Room is empty past the idle timeout or was externally disposed
    pub fn should_dispose(&self) -> bool {
        if self.disposed {
            return false;
        }
        match self.empty_since {
            Some(since) => since.elapsed() >= self.idle_timeout,
            None => false,
        }
    }

    /// Stop the room: notify subscribers, release every slot, clear
    /// trackers. Nothing survives disposal.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;

        if let Ok(bytes) = protocol::encode(&ServerMessage::Status(RoomStatus::Offline)) {
            let bytes = Arc::new(bytes);
            for entry in self.sessions.values() {
                entry.outbound.push(Outbound::Control(bytes.clone()));
            }
        }

        let sessions: Vec<SessionId> = self.sessions.keys().copied().collect();
        for session in sessions {
            self.on_leave(session);
        }
        let slots: Vec<Slot> = self.game.world().active().to_vec();
        for slot in slots {
            self.game.remove_player(slot);
        }

        self.metrics
            .rooms_active
            .fetch_sub(1, std::sync::atomic::Ordering::Relaxed);
        info!(room = %self.id, "room disposed");
    }
}

impl Drop for Room {
    fn drop(&mut self) {
        if !self.disposed {
            self.dispose();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::connection::outbound_queue;
    use crate::util::vec2::Vec2;

    fn test_room() -> Room {
        let mut config = SimulationConfig::default();
        config.bot_count = 0;
        Room::new(
            config,
            4,
            Duration::from_secs(60),
            Arc::new(Metrics::new()),
            1,
        )
    }

    fn join(room: &mut Room) -> (SessionId, JoinGrant, crate::net::connection::OutboundReceiver) {
        let session = Uuid::new_v4();
        let (tx, rx) = outbound_queue(16);
        let grant = room.on_join(session, JoinOptions::default(), tx).unwrap();
        (session, grant, rx)
    }

    fn frame(seq: u32, x: f32, y: f32) -> InputFrame {
        InputFrame {
            seq,
            target: Vec2::new(x, y),
            space: false,
            eject: false,
        }
    }

    #[test]
    fn test_join_allocates_entity() {
        let mut room = test_room();
        let (_, grant, _rx) = join(&mut room);
        assert!(room.game().world().is_live(grant.slot));
        assert_eq!(room.session_count(), 1);
    }

    #[test]
    fn test_room_full_rejects() {
        let mut room = test_room();
        for _ in 0..4 {
            join(&mut room);
        }
        let (tx, _rx) = outbound_queue(4);
        let result = room.on_join(Uuid::new_v4(), JoinOptions::default(), tx);
        assert!(matches!(result, Err(RoomError::RoomFull)));
    }

    #[test]
    fn test_input_flows_to_store() {
        let mut room = test_room();
        let (_, grant, _rx) = join(&mut room);
        let target = Vec2::new(150.0, 0.0);
        let before = room.game().world().position(grant.slot).distance_to(target);
        grant.mailbox.post(frame(1, target.x, target.y));

        for seq in 2..10 {
            room.tick_once();
            grant.mailbox.post(frame(seq, target.x, target.y));
        }
        room.tick_once();

        let after = room.game().world().position(grant.slot).distance_to(target);
        assert!(after < before, "entity should steer toward the input target");
    }

    #[test]
    fn test_leave_releases_slot_and_bumps_generation() {
        let mut room = test_room();
        let (session, grant, _rx) = join(&mut room);
        let generation_before = grant.handle.generation();

        room.on_leave(session);
        assert!(!room.game().world().is_live(grant.slot));
        assert_eq!(room.game().world().resolve(grant.handle), None);

        // The recycled slot gets a new generation for the next tenant
        let (_, grant2, _rx2) = join(&mut room);
        assert_eq!(grant2.slot, grant.slot);
        assert_eq!(grant2.handle.generation(), generation_before.wrapping_add(1));
    }

    #[test]
    fn test_stale_handle_input_dropped_aba() {
        let mut room = test_room();
        let (session_a, grant_a, _rx_a) = join(&mut room);
        room.on_leave(session_a);

        // B takes the same slot with a fresh generation
        let (_, grant_b, _rx_b) = join(&mut room);
        assert_eq!(grant_a.slot, grant_b.slot);
        assert_ne!(grant_a.handle, grant_b.handle);

        // A's late frame resolves against A's stale handle internally; we
        // emulate the race by restoring A's session entry with the stale
        // handle before the tick
        let (tx, _rx) = outbound_queue(4);
        room.sessions.insert(
            session_a,
            SessionEntry {
                handle: grant_a.handle,
                entity_count: 1,
                outbound: tx,
                name: "ghost".into(),
            },
        );
        room.gate.register(session_a);
        let b_pos_before = room.game().world().position(grant_b.slot);
        let mut late = frame(99, -1500.0, -1500.0);
        assert_eq!(room.admit_frame(session_a, &mut late), None);

        // B's row was not touched by A's frame
        assert_eq!(room.game().world().position(grant_b.slot), b_pos_before);
    }

    #[test]
    fn test_snapshot_broadcast_to_all_sessions() {
        let mut room = test_room();
        let (_, _g1, rx1) = join(&mut room);
        let (_, _g2, rx2) = join(&mut room);

        room.tick_once();

        // Each receiver got the join ack plus at least one frame
        let mut saw_frame = [false; 2];
        for (i, rx) in [rx1, rx2].into_iter().enumerate() {
            while let Some(message) = rx.try_recv() {
                if matches!(message, Outbound::Frame(_)) {
                    saw_frame[i] = true;
                }
            }
        }
        assert!(saw_frame[0] && saw_frame[1]);
    }

    #[test]
    fn test_dispose_notifies_and_clears() {
        let mut room = test_room();
        let (_, grant, rx) = join(&mut room);

        room.dispose();
        assert!(room.is_disposed());
        assert_eq!(room.session_count(), 0);
        assert!(!room.game().world().is_live(grant.slot));

        let mut saw_offline = false;
        while let Some(message) = rx.try_recv() {
            if let Outbound::Control(bytes) = message {
                if let Ok(ServerMessage::Status(RoomStatus::Offline)) =
                    protocol::decode::<ServerMessage>(&bytes)
                {
                    saw_offline = true;
                }
            }
        }
        assert!(saw_offline);
    }

    #[test]
    fn test_idle_room_wants_disposal() {
        let mut config = SimulationConfig::default();
        config.bot_count = 0;
        let mut room = Room::new(
            config,
            4,
            Duration::from_millis(0),
            Arc::new(Metrics::new()),
            1,
        );
        assert!(room.should_dispose());

        let (session, _grant, _rx) = join(&mut room);
        assert!(!room.should_dispose());
        room.on_leave(session);
        assert!(room.should_dispose());
    }
}

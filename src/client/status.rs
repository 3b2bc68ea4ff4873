//! Client connection status machine and reconnect backoff.
//!
//! Status flow: offline → connecting → online → reconnecting → error →
//! offline mode. Reconnect delays grow exponentially with ±30 % jitter up
//! to a cap; after the attempt budget is spent the client drops into
//! offline mode and keeps simulating locally with no remote peers.

use std::time::Duration;

use rand::Rng;

use crate::game::constants::client as limits;

/// User-visible connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Offline,
    Connecting,
    Online,
    Reconnecting,
    Error,
    /// Singleplayer continuation on the same simulation core
    OfflineMode,
}

/// Exponential backoff with jitter for reconnect attempts
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    jitter: f32,
    attempt: u32,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration, jitter: f32) -> Self {
        Self {
            base,
            max,
            jitter,
            attempt: 0,
        }
    }

    #[inline]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Next delay: base * 2^attempt, jittered, capped
    pub fn next_delay(&mut self) -> Duration {
        let exp = self
            .base
            .saturating_mul(1u32 << self.attempt.min(16))
            .min(self.max);
        self.attempt += 1;

        let jitter_scale = 1.0 + rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        let jittered = exp.as_secs_f64() * jitter_scale as f64;
        Duration::from_secs_f64(jittered.max(0.0)).min(self.max)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(
            Duration::from_millis(limits::BACKOFF_BASE_MS),
            Duration::from_millis(limits::BACKOFF_MAX_MS),
            limits::BACKOFF_JITTER,
        )
    }
}

/// Connection lifecycle tracker
#[derive(Debug)]
pub struct ConnectionState {
    status: ConnectionStatus,
    backoff: Backoff,
    max_attempts: u32,
}

impl ConnectionState {
    pub fn new() -> Self {
        Self {
            status: ConnectionStatus::Offline,
            backoff: Backoff::default(),
            max_attempts: limits::MAX_ATTEMPTS,
        }
    }

    #[inline]
    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    /// Start a connection attempt
    pub fn connect(&mut self) {
        self.status = ConnectionStatus::Connecting;
    }

    /// Connection established; the attempt budget refills
    pub fn connected(&mut self) {
        self.status = ConnectionStatus::Online;
        self.backoff.reset();
    }

    /// Connection lost. Returns the delay to wait before the next attempt,
    /// or None when the budget is spent and the client goes offline-mode.
    pub fn connection_lost(&mut self) -> Option<Duration> {
        if self.backoff.attempt() >= self.max_attempts {
            self.status = ConnectionStatus::OfflineMode;
            return None;
        }
        self.status = ConnectionStatus::Reconnecting;
        Some(self.backoff.next_delay())
    }

    /// Unrecoverable protocol or handshake failure
    pub fn failed(&mut self) {
        self.status = ConnectionStatus::Error;
    }

    /// Leave error state into offline mode (simulation continues locally)
    pub fn enter_offline_mode(&mut self) {
        self.status = ConnectionStatus::OfflineMode;
    }

    /// Back to a clean offline state
    pub fn shutdown(&mut self) {
        self.status = ConnectionStatus::Offline;
        self.backoff.reset();
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_flow() {
        let mut state = ConnectionState::new();
        assert_eq!(state.status(), ConnectionStatus::Offline);

        state.connect();
        assert_eq!(state.status(), ConnectionStatus::Connecting);

        state.connected();
        assert_eq!(state.status(), ConnectionStatus::Online);

        assert!(state.connection_lost().is_some());
        assert_eq!(state.status(), ConnectionStatus::Reconnecting);
    }

    #[test]
    fn test_offline_mode_after_budget() {
        let mut state = ConnectionState::new();
        state.connect();
        state.connected();

        let mut delays = 0;
        while state.connection_lost().is_some() {
            delays += 1;
            assert!(delays <= limits::MAX_ATTEMPTS, "budget must be finite");
        }
        assert_eq!(state.status(), ConnectionStatus::OfflineMode);
        assert_eq!(delays, limits::MAX_ATTEMPTS);
    }

    #[test]
    fn test_reconnect_resets_budget() {
        let mut state = ConnectionState::new();
        state.connect();
        state.connected();
        let _ = state.connection_lost();
        let _ = state.connection_lost();

        state.connected();
        // Full budget again
        let mut delays = 0;
        while state.connection_lost().is_some() {
            delays += 1;
        }
        assert_eq!(delays, limits::MAX_ATTEMPTS);
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let mut backoff = Backoff::new(
            Duration::from_millis(100),
            Duration::from_secs(10),
            0.0, // no jitter for determinism
        );
        let first = backoff.next_delay();
        let second = backoff.next_delay();
        let third = backoff.next_delay();
        assert!(second > first);
        assert!(third > second);

        for _ in 0..20 {
            assert!(backoff.next_delay() <= Duration::from_secs(10));
        }
    }

    #[test]
    fn test_backoff_jitter_stays_in_band() {
        let mut backoff = Backoff::new(
            Duration::from_millis(1000),
            Duration::from_secs(60),
            0.3,
        );
        let delay = backoff.next_delay();
        let ms = delay.as_millis() as i64;
        assert!((700..=1300).contains(&ms), "jittered delay {ms}ms outside ±30%");
    }

    #[test]
    fn test_error_then_offline_mode() {
        let mut state = ConnectionState::new();
        state.connect();
        state.failed();
        assert_eq!(state.status(), ConnectionStatus::Error);
        state.enter_offline_mode();
        assert_eq!(state.status(), ConnectionStatus::OfflineMode);
    }
}

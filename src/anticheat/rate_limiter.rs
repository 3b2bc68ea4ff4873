//! Per-session input rate limiting.
//!
//! A rolling one-second window per session; the counter resets when the
//! window expires. Entries idle past the sweep threshold are removed by the
//! periodic cleanup pass so departed sessions do not accumulate.

use std::time::{Duration, Instant};

use hashbrown::HashMap;

use crate::game::constants::{input, room};
use crate::net::protocol::SessionId;

/// Rate limit exceeded for a session
#[derive(Debug, Clone, thiserror::Error)]
#[error("input rate exceeded: {count} inputs in the current window")]
pub struct RateExceeded {
    pub count: u32,
}

#[derive(Debug)]
struct WindowState {
    count: u32,
    window_start: Instant,
    last_seen: Instant,
}

/// Rolling-window rate limiter for input messages
pub struct RateLimiter {
    sessions: HashMap<SessionId, WindowState>,
    max_per_window: u32,
    window: Duration,
    last_sweep: Instant,
}

impl RateLimiter {
    pub fn new(max_per_window: u32) -> Self {
        Self {
            sessions: HashMap::new(),
            max_per_window,
            window: Duration::from_millis(input::RATE_LIMIT_WINDOW_MS),
            last_sweep: Instant::now(),
        }
    }

    pub fn register(&mut self, session: SessionId) {
        let now = Instant::now();
        self.sessions.insert(
            session,
            WindowState {
                count: 0,
                window_start: now,
                last_seen: now,
            },
        );
    }

    pub fn unregister(&mut self, session: SessionId) {
        self.sessions.remove(&session);
    }

    /// Count one input; Err when the session exceeded its window budget
    pub fn check(&mut self, session: SessionId) -> Result<(), RateExceeded> {
        self.check_at(session, Instant::now())
    }

    fn check_at(&mut self, session: SessionId, now: Instant) -> Result<(), RateExceeded> {
        let window = self.window;
        let max = self.max_per_window;
        let state = self.sessions.entry(session).or_insert(WindowState {
            count: 0,
            window_start: now,
            last_seen: now,
        });

        if now.duration_since(state.window_start) >= window {
            state.window_start = now;
            state.count = 0;
        }
        state.last_seen = now;
        state.count += 1;

        if state.count > max {
            Err(RateExceeded { count: state.count })
        } else {
            Ok(())
        }
    }

    /// Periodic cleanup: drop entries idle longer than the sweep interval.
    /// Called opportunistically from the room tick.
    pub fn sweep(&mut self) {
        let now = Instant::now();
        if now.duration_since(self.last_sweep) < Duration::from_secs(room::RATE_SWEEP_INTERVAL_S) {
            return;
        }
        self.last_sweep = now;
        let idle_cutoff = Duration::from_secs(room::RATE_SWEEP_INTERVAL_S);
        self.sessions
            .retain(|_, s| now.duration_since(s.last_seen) < idle_cutoff);
    }

    pub fn tracked_sessions(&self) -> usize {
        self.sessions.len()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(input::RATE_LIMIT_MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_under_limit_passes() {
        let mut limiter = RateLimiter::new(60);
        let session = Uuid::new_v4();
        limiter.register(session);

        for _ in 0..60 {
            assert!(limiter.check(session).is_ok());
        }
    }

    #[test]
    fn test_sixty_first_in_window_drops() {
        let mut limiter = RateLimiter::new(60);
        let session = Uuid::new_v4();
        limiter.register(session);

        let now = Instant::now();
        for _ in 0..60 {
            assert!(limiter.check_at(session, now).is_ok());
        }
        // 61st and beyond inside the same window are rejected
        assert!(limiter.check_at(session, now).is_err());
        assert!(limiter.check_at(session, now).is_err());
    }

    #[test]
    fn test_throughput_resumes_after_window() {
        let mut limiter = RateLimiter::new(60);
        let session = Uuid::new_v4();
        limiter.register(session);

        let now = Instant::now();
        for _ in 0..61 {
            let _ = limiter.check_at(session, now);
        }
        assert!(limiter.check_at(session, now).is_err());

        let later = now + Duration::from_millis(input::RATE_LIMIT_WINDOW_MS + 1);
        assert!(limiter.check_at(session, later).is_ok());
    }

    #[test]
    fn test_sessions_are_independent() {
        let mut limiter = RateLimiter::new(2);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        limiter.register(a);
        limiter.register(b);

        let now = Instant::now();
        assert!(limiter.check_at(a, now).is_ok());
        assert!(limiter.check_at(a, now).is_ok());
        assert!(limiter.check_at(a, now).is_err());
        // b still has its full budget
        assert!(limiter.check_at(b, now).is_ok());
    }

    #[test]
    fn test_unregister_forgets_state() {
        let mut limiter = RateLimiter::new(1);
        let session = Uuid::new_v4();
        limiter.register(session);
        let now = Instant::now();
        let _ = limiter.check_at(session, now);
        assert!(limiter.check_at(session, now).is_err());

        limiter.unregister(session);
        assert_eq!(limiter.tracked_sessions(), 0);
    }
}

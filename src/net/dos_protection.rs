//! Connection-level protections: the per-IP room-creation limiter and
//! client IP resolution behind proxies.
//!
//! `TRUST_PROXY` is the one security-critical operator knob here: the
//! proxy-supplied address is honored only when it is explicitly enabled,
//! otherwise the socket remote address is authoritative.

use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use hashbrown::HashMap;

/// Rejections from connection-level protection
#[derive(Debug, Clone, thiserror::Error)]
pub enum DosError {
    #[error("room creation limit reached for this address")]
    RoomCreateLimit,
}

#[derive(Debug)]
struct CreateWindow {
    count: u32,
    window_start: Instant,
}

/// Per-IP sliding window limiting new-room creation
pub struct RoomCreateLimiter {
    windows: HashMap<IpAddr, CreateWindow>,
    max_per_window: u32,
    window: Duration,
}

impl RoomCreateLimiter {
    pub fn new(max_per_minute: u32) -> Self {
        Self {
            windows: HashMap::new(),
            max_per_window: max_per_minute,
            window: Duration::from_secs(60),
        }
    }

    /// Count one room creation attempt from `ip`
    pub fn check(&mut self, ip: IpAddr) -> Result<(), DosError> {
        self.check_at(ip, Instant::now())
    }

    fn check_at(&mut self, ip: IpAddr, now: Instant) -> Result<(), DosError> {
        let window = self.window;
        let state = self.windows.entry(ip).or_insert(CreateWindow {
            count: 0,
            window_start: now,
        });
        if now.duration_since(state.window_start) >= window {
            state.window_start = now;
            state.count = 0;
        }
        state.count += 1;
        if state.count > self.max_per_window {
            Err(DosError::RoomCreateLimit)
        } else {
            Ok(())
        }
    }

    /// Drop windows that expired; called from the manager's sweep
    pub fn sweep(&mut self) {
        let now = Instant::now();
        let window = self.window;
        self.windows
            .retain(|_, w| now.duration_since(w.window_start) < window * 2);
    }

    pub fn tracked_ips(&self) -> usize {
        self.windows.len()
    }
}

/// Resolve the client IP for rate limiting. The proxy header is used only
/// when `trust_proxy` is set; a malformed header falls back to the socket
/// address.
pub fn client_ip(remote: SocketAddr, proxy_header: Option<&str>, trust_proxy: bool) -> IpAddr {
    if trust_proxy {
        if let Some(header) = proxy_header {
            // X-Forwarded-For style: first hop is the client
            let first = header.split(',').next().unwrap_or("").trim();
            if let Ok(ip) = first.parse::<IpAddr>() {
                return ip;
            }
            tracing::warn!(header, "unparseable proxy header, using socket address");
        }
    }
    remote.ip()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_room_create_limit() {
        let mut limiter = RoomCreateLimiter::new(5);
        let addr = ip("10.0.0.1");
        let now = Instant::now();

        for _ in 0..5 {
            assert!(limiter.check_at(addr, now).is_ok());
        }
        assert!(limiter.check_at(addr, now).is_err());
    }

    #[test]
    fn test_limit_resets_after_window() {
        let mut limiter = RoomCreateLimiter::new(2);
        let addr = ip("10.0.0.2");
        let now = Instant::now();

        let _ = limiter.check_at(addr, now);
        let _ = limiter.check_at(addr, now);
        assert!(limiter.check_at(addr, now).is_err());

        let later = now + Duration::from_secs(61);
        assert!(limiter.check_at(addr, later).is_ok());
    }

    #[test]
    fn test_ips_independent() {
        let mut limiter = RoomCreateLimiter::new(1);
        let now = Instant::now();
        assert!(limiter.check_at(ip("10.0.0.3"), now).is_ok());
        assert!(limiter.check_at(ip("10.0.0.3"), now).is_err());
        assert!(limiter.check_at(ip("10.0.0.4"), now).is_ok());
    }

    #[test]
    fn test_client_ip_ignores_proxy_by_default() {
        let remote: SocketAddr = "192.168.1.10:5000".parse().unwrap();
        let resolved = client_ip(remote, Some("203.0.113.9"), false);
        assert_eq!(resolved, ip("192.168.1.10"));
    }

    #[test]
    fn test_client_ip_trusts_proxy_when_enabled() {
        let remote: SocketAddr = "192.168.1.10:5000".parse().unwrap();
        let resolved = client_ip(remote, Some("203.0.113.9, 10.0.0.1"), true);
        assert_eq!(resolved, ip("203.0.113.9"));
    }

    #[test]
    fn test_client_ip_bad_header_falls_back() {
        let remote: SocketAddr = "192.168.1.10:5000".parse().unwrap();
        let resolved = client_ip(remote, Some("not-an-ip"), true);
        assert_eq!(resolved, ip("192.168.1.10"));
    }
}

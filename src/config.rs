use std::net::IpAddr;
use std::time::Duration;

use crate::game::constants::{client, input, pool, room, tick, world};

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

fn env_flag(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(v) => matches!(v.as_str(), "1" | "true" | "on" | "yes"),
        Err(_) => default,
    }
}

/// Server process configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server to
    pub bind_address: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Maximum clients per room
    pub max_clients: usize,
    /// New rooms allowed per source IP per minute
    pub room_create_max_per_min: u32,
    /// Trust the proxy-supplied client IP header instead of the socket address.
    /// Must only be enabled when the server actually sits behind a proxy.
    pub trust_proxy: bool,
    /// Rooms with zero clients are disposed after this long
    pub idle_timeout: Duration,
    /// Emit structured JSON logs
    pub log_json: bool,
    /// Path to a TLS certificate PEM (self-signed identity generated if unset)
    pub tls_cert_path: Option<String>,
    /// Path to the TLS key PEM
    pub tls_key_path: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::from([0, 0, 0, 0]),
            port: 4433,
            max_clients: room::MAX_CLIENTS,
            room_create_max_per_min: room::CREATE_MAX_PER_MIN,
            trust_proxy: false,
            idle_timeout: Duration::from_secs(room::IDLE_TIMEOUT_S),
            log_json: cfg!(not(debug_assertions)),
            tls_cert_path: None,
            tls_key_path: None,
        }
    }
}

impl ServerConfig {
    /// Load config from environment or use defaults
    pub fn load_or_default() -> Self {
        let mut config = Self::default();

        if let Some(addr) = env_parse("BIND_ADDRESS") {
            config.bind_address = addr;
        }
        if let Some(port) = env_parse("PORT") {
            config.port = port;
        }
        if let Some(max) = env_parse("MAX_CLIENTS") {
            config.max_clients = max;
        }
        if let Some(max) = env_parse("ROOM_CREATE_MAX") {
            config.room_create_max_per_min = max;
        }
        config.trust_proxy = env_flag("TRUST_PROXY", config.trust_proxy);
        if let Some(secs) = env_parse::<u64>("IDLE_TIMEOUT_S") {
            config.idle_timeout = Duration::from_secs(secs);
        }
        config.log_json = env_flag("LOG_JSON", config.log_json);
        config.tls_cert_path = std::env::var("TLS_CERT_PATH").ok();
        config.tls_key_path = std::env::var("TLS_KEY_PATH").ok();

        config
    }
}

/// Per-room simulation configuration
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Authoritative tick rate in Hz
    pub tick_rate_hz: u32,
    /// Entity pool capacity
    pub max_entities: usize,
    /// Entities a single client may own, bots included
    pub max_entities_per_client: usize,
    /// Per-session inputs allowed per second
    pub rate_limit_max: u32,
    /// Serialized input messages larger than this are dropped
    pub max_msg_bytes: usize,
    /// Maximum allowed sequence jump between consecutive inputs
    pub max_sequence_jump: u32,
    /// World disk radius
    pub map_radius: f32,
    /// Maintenance bots kept alive per room
    pub bot_count: usize,
    /// Append a CRC-32 trailer to snapshot frames
    pub snapshot_crc: bool,
    /// Filter near-stationary entities out of snapshots (bandwidth
    /// experiment; clients must tolerate partial frames)
    pub snapshot_delta: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            tick_rate_hz: tick::RATE,
            max_entities: pool::MAX_ENTITIES,
            max_entities_per_client: room::MAX_ENTITIES_PER_CLIENT,
            rate_limit_max: input::RATE_LIMIT_MAX,
            max_msg_bytes: input::MAX_MSG_BYTES,
            max_sequence_jump: input::MAX_SEQUENCE_JUMP,
            map_radius: world::MAP_RADIUS,
            bot_count: room::BOT_COUNT,
            snapshot_crc: false,
            snapshot_delta: false,
        }
    }
}

impl SimulationConfig {
    pub fn load_or_default() -> Self {
        let mut config = Self::default();

        if let Some(rate) = env_parse::<u32>("TICK_RATE_HZ") {
            if rate > 0 {
                config.tick_rate_hz = rate;
            }
        }
        if let Some(max) = env_parse::<usize>("MAX_ENTITIES") {
            // Handle format packs the slot into a u16
            config.max_entities = max.min(u16::MAX as usize);
        }
        if let Some(max) = env_parse("MAX_ENTITIES_PER_CLIENT") {
            config.max_entities_per_client = max;
        }
        if let Some(max) = env_parse("RATE_LIMIT_MAX") {
            config.rate_limit_max = max;
        }
        if let Some(max) = env_parse("MAX_MSG_BYTES") {
            config.max_msg_bytes = max;
        }
        if let Some(max) = env_parse("MAX_SEQUENCE_JUMP") {
            config.max_sequence_jump = max;
        }
        if let Some(radius) = env_parse::<f32>("MAP_RADIUS") {
            if radius > 0.0 {
                config.map_radius = radius;
            }
        }
        if let Some(bots) = env_parse("BOT_COUNT") {
            config.bot_count = bots;
        }
        config.snapshot_crc = env_flag("SNAPSHOT_CRC", config.snapshot_crc);
        config.snapshot_delta = env_flag("SNAPSHOT_DELTA", config.snapshot_delta);

        config
    }

    /// Delta time per tick in seconds
    #[inline]
    pub fn dt(&self) -> f32 {
        1.0 / self.tick_rate_hz as f32
    }

    /// Tick period as a Duration
    #[inline]
    pub fn tick_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_rate_hz as f64)
    }
}

/// Client-side prediction/interpolation configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Render delay for remote entity interpolation, milliseconds
    pub interp_delay_ms: u64,
    /// Snapshot ring capacity
    pub snapshot_buffer: usize,
    /// Reconciliation snap-vs-lerp cutoff in world units
    pub reconcile_threshold: f32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            interp_delay_ms: client::INTERP_DELAY_MS,
            snapshot_buffer: client::SNAPSHOT_BUFFER,
            reconcile_threshold: client::RECONCILE_THRESHOLD,
        }
    }
}

impl ClientConfig {
    pub fn load_or_default() -> Self {
        let mut config = Self::default();

        if let Some(ms) = env_parse("INTERP_DELAY_MS") {
            config.interp_delay_ms = ms;
        }
        if let Some(n) = env_parse::<usize>("SNAPSHOT_BUFFER") {
            if n >= 2 {
                config.snapshot_buffer = n;
            }
        }
        if let Some(t) = env_parse("RECONCILE_THRESHOLD") {
            config.reconcile_threshold = t;
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_server_config() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 4433);
        assert_eq!(config.max_clients, 50);
        assert_eq!(config.room_create_max_per_min, 5);
        assert!(!config.trust_proxy);
    }

    #[test]
    fn test_default_simulation_config() {
        let config = SimulationConfig::default();
        assert_eq!(config.tick_rate_hz, 20);
        assert!((config.dt() - 0.05).abs() < f32::EPSILON);
        assert_eq!(config.max_entities, 4096);
        assert_eq!(config.max_entities_per_client, 5);
        assert_eq!(config.max_sequence_jump, 30);
        assert_eq!(config.max_msg_bytes, 1024);
    }

    #[test]
    fn test_default_client_config() {
        let config = ClientConfig::default();
        assert_eq!(config.interp_delay_ms, 100);
        assert_eq!(config.snapshot_buffer, 20);
    }

    #[test]
    fn test_tick_period() {
        let config = SimulationConfig::default();
        assert_eq!(config.tick_period(), Duration::from_millis(50));
    }
}

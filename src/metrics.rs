//! Server metrics registry and the tiny HTTP endpoint that exposes it.
//!
//! - `/metrics`: Prometheus text format
//! - `/json`: plain JSON for direct inspection
//! - `/health`: liveness probe

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, info};

/// Counter and gauge registry shared across rooms and the transport
#[derive(Debug)]
pub struct Metrics {
    // Rooms and population
    pub rooms_active: AtomicU64,
    pub sessions_active: AtomicU64,
    pub entities_active: AtomicU64,
    pub food_active: AtomicU64,
    pub bots_active: AtomicU64,

    // Input intake
    pub inputs_accepted: AtomicU64,
    pub inputs_dropped: AtomicU64,
    pub inputs_rate_limited: AtomicU64,
    pub sequence_violations: AtomicU64,
    pub position_corrections: AtomicU64,

    // Tick health
    pub ticks_total: AtomicU64,
    pub slow_ticks: AtomicU64,
    pub tick_time_us: AtomicU64,

    // Broadcast
    pub snapshots_sent: AtomicU64,
    pub snapshot_bytes: AtomicU64,
    pub frames_dropped_backpressure: AtomicU64,

    // Connection protection
    pub joins_accepted: AtomicU64,
    pub joins_rejected: AtomicU64,
    pub rooms_rate_limited: AtomicU64,
    pub protocol_errors: AtomicU64,

    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            rooms_active: AtomicU64::new(0),
            sessions_active: AtomicU64::new(0),
            entities_active: AtomicU64::new(0),
            food_active: AtomicU64::new(0),
            bots_active: AtomicU64::new(0),
            inputs_accepted: AtomicU64::new(0),
            inputs_dropped: AtomicU64::new(0),
            inputs_rate_limited: AtomicU64::new(0),
            sequence_violations: AtomicU64::new(0),
            position_corrections: AtomicU64::new(0),
            ticks_total: AtomicU64::new(0),
            slow_ticks: AtomicU64::new(0),
            tick_time_us: AtomicU64::new(0),
            snapshots_sent: AtomicU64::new(0),
            snapshot_bytes: AtomicU64::new(0),
            frames_dropped_backpressure: AtomicU64::new(0),
            joins_accepted: AtomicU64::new(0),
            joins_rejected: AtomicU64::new(0),
            rooms_rate_limited: AtomicU64::new(0),
            protocol_errors: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    #[inline]
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add(counter: &AtomicU64, value: u64) {
        counter.fetch_add(value, Ordering::Relaxed);
    }

    #[inline]
    pub fn set(gauge: &AtomicU64, value: u64) {
        gauge.store(value, Ordering::Relaxed);
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Render the Prometheus text exposition
    pub fn to_prometheus(&self) -> String {
        let mut out = String::with_capacity(2048);
        let mut gauge = |name: &str, help: &str, value: u64| {
            out.push_str(&format!(
                "# HELP {name} {help}\n# TYPE {name} gauge\n{name} {value}\n"
            ));
        };

        gauge("arena_rooms_active", "Active rooms", self.rooms_active.load(Ordering::Relaxed));
        gauge("arena_sessions_active", "Connected sessions", self.sessions_active.load(Ordering::Relaxed));
        gauge("arena_entities_active", "Live entities across rooms", self.entities_active.load(Ordering::Relaxed));
        gauge("arena_food_active", "Live food pellets", self.food_active.load(Ordering::Relaxed));
        gauge("arena_bots_active", "Live bots", self.bots_active.load(Ordering::Relaxed));
        gauge("arena_inputs_accepted_total", "Inputs accepted", self.inputs_accepted.load(Ordering::Relaxed));
        gauge("arena_inputs_dropped_total", "Inputs dropped by validation", self.inputs_dropped.load(Ordering::Relaxed));
        gauge("arena_inputs_rate_limited_total", "Inputs dropped by rate limit", self.inputs_rate_limited.load(Ordering::Relaxed));
        gauge("arena_sequence_violations_total", "Sequence violations", self.sequence_violations.load(Ordering::Relaxed));
        gauge("arena_position_corrections_total", "Position corrections sent", self.position_corrections.load(Ordering::Relaxed));
        gauge("arena_ticks_total", "Simulation ticks", self.ticks_total.load(Ordering::Relaxed));
        gauge("arena_slow_ticks_total", "Ticks over the soft deadline", self.slow_ticks.load(Ordering::Relaxed));
        gauge("arena_tick_time_us", "Last tick duration (us)", self.tick_time_us.load(Ordering::Relaxed));
        gauge("arena_snapshots_sent_total", "Snapshot frames sent", self.snapshots_sent.load(Ordering::Relaxed));
        gauge("arena_snapshot_bytes_total", "Snapshot bytes sent", self.snapshot_bytes.load(Ordering::Relaxed));
        gauge("arena_frames_dropped_backpressure_total", "Frames dropped to slow clients", self.frames_dropped_backpressure.load(Ordering::Relaxed));
        gauge("arena_joins_accepted_total", "Joins accepted", self.joins_accepted.load(Ordering::Relaxed));
        gauge("arena_joins_rejected_total", "Joins rejected", self.joins_rejected.load(Ordering::Relaxed));
        gauge("arena_rooms_rate_limited_total", "Room creations rate limited", self.rooms_rate_limited.load(Ordering::Relaxed));
        gauge("arena_protocol_errors_total", "Protocol parse errors", self.protocol_errors.load(Ordering::Relaxed));
        gauge("arena_uptime_seconds", "Server uptime", self.uptime_seconds());
        out
    }

    pub fn to_json(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            rooms_active: self.rooms_active.load(Ordering::Relaxed),
            sessions_active: self.sessions_active.load(Ordering::Relaxed),
            entities_active: self.entities_active.load(Ordering::Relaxed),
            food_active: self.food_active.load(Ordering::Relaxed),
            inputs_accepted: self.inputs_accepted.load(Ordering::Relaxed),
            inputs_dropped: self.inputs_dropped.load(Ordering::Relaxed),
            ticks_total: self.ticks_total.load(Ordering::Relaxed),
            slow_ticks: self.slow_ticks.load(Ordering::Relaxed),
            snapshots_sent: self.snapshots_sent.load(Ordering::Relaxed),
            uptime_seconds: self.uptime_seconds(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// JSON projection served at `/json`
#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub rooms_active: u64,
    pub sessions_active: u64,
    pub entities_active: u64,
    pub food_active: u64,
    pub inputs_accepted: u64,
    pub inputs_dropped: u64,
    pub ticks_total: u64,
    pub slow_ticks: u64,
    pub snapshots_sent: u64,
    pub uptime_seconds: u64,
}

/// Serve the metrics endpoint until the process exits
pub async fn start_metrics_server(metrics: Arc<Metrics>, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!("metrics endpoint on http://0.0.0.0:{port}/metrics");

    loop {
        let (mut stream, peer) = listener.accept().await?;
        let metrics = metrics.clone();
        tokio::spawn(async move {
            let mut buf = [0u8; 1024];
            let n = match stream.read(&mut buf).await {
                Ok(n) => n,
                Err(e) => {
                    debug!("metrics read error from {peer}: {e}");
                    return;
                }
            };
            let request = String::from_utf8_lossy(&buf[..n]);

            let (status, content_type, body) = if request.starts_with("GET /metrics") {
                ("200 OK", "text/plain; version=0.0.4", metrics.to_prometheus())
            } else if request.starts_with("GET /json") {
                let body = serde_json::to_string(&metrics.to_json()).unwrap_or_default();
                ("200 OK", "application/json", body)
            } else if request.starts_with("GET /health") {
                ("200 OK", "text/plain", "ok".to_string())
            } else {
                ("404 Not Found", "text/plain", "not found".to_string())
            };

            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            let _ = stream.write_all(response.as_bytes()).await;
        });
    }
}

//! WebTransport endpoint: accepts sessions, routes each join into a room,
//! and tears the entity down when the connection goes away.

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::game::constants::room as room_const;
use crate::lobby::manager::RoomManager;
use crate::metrics::Metrics;
use crate::net::connection::{outbound_queue, run_session};
use crate::net::dos_protection::client_ip;
use crate::net::protocol::{self, ClientMessage, ServerMessage, SessionId};
use crate::net::tls::TlsConfig;

/// WebTransport server front end
pub struct ArenaServer {
    config: ServerConfig,
    tls: TlsConfig,
    rooms: Arc<RwLock<RoomManager>>,
    metrics: Arc<Metrics>,
}

impl ArenaServer {
    pub async fn new(
        config: ServerConfig,
        rooms: Arc<RwLock<RoomManager>>,
        metrics: Arc<Metrics>,
    ) -> anyhow::Result<Self> {
        let tls = TlsConfig::load(
            config.tls_cert_path.as_deref(),
            config.tls_key_path.as_deref(),
        )
        .await?;
        Ok(Self {
            config,
            tls,
            rooms,
            metrics,
        })
    }

    pub fn cert_hash(&self) -> &str {
        &self.tls.cert_hash
    }

    /// Accept loop; runs until the process shuts down
    pub async fn run(self) -> anyhow::Result<()> {
        let server_config = wtransport::ServerConfig::builder()
            .with_bind_default(self.config.port)
            .with_identity(self.tls.identity)
            .build();
        let endpoint = wtransport::Endpoint::server(server_config)?;
        info!("webtransport endpoint on port {}", self.config.port);

        // Periodic sweep of disposed rooms and stale limiter windows
        let sweeper_rooms = self.rooms.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(
                room_const::RATE_SWEEP_INTERVAL_S,
            ));
            loop {
                interval.tick().await;
                sweeper_rooms.write().await.sweep();
            }
        });

        let max_msg_bytes = self.rooms.read().await.sim_config().max_msg_bytes;
        loop {
            let incoming = endpoint.accept().await;
            let rooms = self.rooms.clone();
            let metrics = self.metrics.clone();
            let trust_proxy = self.config.trust_proxy;

            tokio::spawn(async move {
                if let Err(e) =
                    handle_session(incoming, rooms, metrics, trust_proxy, max_msg_bytes).await
                {
                    debug!("session ended with error: {e:#}");
                }
            });
        }
    }
}

/// Accept one incoming session, wait for its join, run it, clean up
async fn handle_session(
    incoming: wtransport::endpoint::IncomingSession,
    rooms: Arc<RwLock<RoomManager>>,
    metrics: Arc<Metrics>,
    trust_proxy: bool,
    max_msg_bytes: usize,
) -> anyhow::Result<()> {
    let remote = incoming.remote_address();
    let request = incoming.await?;
    let forwarded = request.headers().get("x-forwarded-for");
    let ip = client_ip(remote, forwarded.map(|s| s.as_str()), trust_proxy);
    let connection = request.accept().await?;

    let session: SessionId = Uuid::new_v4();
    debug!(session = %session, %remote, "connection accepted");

    // The first message on the first stream must be a join
    let (mut stream_tx, mut stream_rx) = connection.accept_bi().await?;
    let payload = crate::net::framing::read_message(&mut stream_rx, max_msg_bytes).await?;
    let opts = match protocol::decode::<ClientMessage>(&payload) {
        Ok(ClientMessage::Join(opts)) => opts,
        Ok(other) => {
            warn!(session = %session, "expected join, got {other:?}");
            Metrics::incr(&metrics.protocol_errors);
            return Ok(());
        }
        Err(e) => {
            warn!(session = %session, error = %e, "undecodable join");
            Metrics::incr(&metrics.protocol_errors);
            return Ok(());
        }
    };

    // Place the session into a room
    let room = match rooms.write().await.room_for_join(ip) {
        Ok(room) => room,
        Err(e) => {
            send_reject(&mut stream_tx, e.to_string()).await;
            return Ok(());
        }
    };

    let (outbound_tx, outbound_rx) = outbound_queue(room_const::SEND_QUEUE_DEPTH);
    let grant = {
        let join_result = room.lock().on_join(session, opts, outbound_tx);
        match join_result {
            Ok(grant) => grant,
            Err(e) => {
                send_reject(&mut stream_tx, e.to_string()).await;
                return Ok(());
            }
        }
    };

    let result = run_session(
        connection,
        (stream_tx, stream_rx),
        session,
        grant.mailbox.clone(),
        grant.rate_limiter.clone(),
        grant.outbound.clone(),
        outbound_rx,
        max_msg_bytes,
        metrics,
    )
    .await;

    // Leave path runs no matter how the connection ended
    room.lock().on_leave(session);
    result
}

async fn send_reject(stream: &mut wtransport::SendStream, reason: String) {
    let message = ServerMessage::JoinRejected { reason };
    if let Ok(bytes) = protocol::encode(&message) {
        let mut tagged = Vec::with_capacity(bytes.len() + 1);
        tagged.push(protocol::CHANNEL_CONTROL);
        tagged.extend_from_slice(&bytes);
        let _ = crate::net::framing::write_message(stream, &tagged, 64 * 1024).await;
    }
}

//! Per-connection plumbing: the bounded outbound queue the room fans out
//! into, and the read/write tasks bridging one WebTransport session to a
//! room.
//!
//! The outbound queue is bounded and drops the oldest entry on overflow, so
//! a slow client sheds its own frames and never stalls the tick. Input
//! flows the other way through the session's one-slot mailbox without
//! touching the room lock.

use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::anticheat::rate_limiter::RateLimiter;
use crate::game::mailbox::InputMailbox;
use crate::metrics::Metrics;
use crate::net::protocol::{self, ClientMessage, SessionId, CHANNEL_CONTROL, CHANNEL_FRAME};

/// One queued outbound payload
#[derive(Debug, Clone)]
pub enum Outbound {
    /// Reliable control message (stream)
    Control(Arc<Vec<u8>>),
    /// Transform frame (datagram preferred, stream fallback)
    Frame(Arc<Vec<u8>>),
}

/// Producer half of the per-connection outbound queue
#[derive(Clone)]
pub struct OutboundSender {
    tx: Sender<Outbound>,
    rx: Receiver<Outbound>,
    notify: Arc<Notify>,
}

/// Consumer half, owned by the connection's writer task
pub struct OutboundReceiver {
    rx: Receiver<Outbound>,
    notify: Arc<Notify>,
}

/// Create a bounded outbound queue with drop-oldest overflow behavior
pub fn outbound_queue(depth: usize) -> (OutboundSender, OutboundReceiver) {
    let (tx, rx) = bounded(depth);
    let notify = Arc::new(Notify::new());
    (
        OutboundSender {
            tx,
            rx: rx.clone(),
            notify: notify.clone(),
        },
        OutboundReceiver { rx, notify },
    )
}

impl OutboundSender {
    /// Enqueue a payload; on overflow the oldest entry is discarded.
    /// Returns the number of entries dropped to make room.
    pub fn push(&self, message: Outbound) -> usize {
        let mut dropped = 0;
        let mut pending = message;
        loop {
            match self.tx.try_send(pending) {
                Ok(()) => break,
                Err(TrySendError::Full(back)) => {
                    if self.rx.try_recv().is_ok() {
                        dropped += 1;
                    }
                    pending = back;
                }
                Err(TrySendError::Disconnected(_)) => break,
            }
        }
        self.notify.notify_one();
        dropped
    }
}

impl OutboundReceiver {
    /// Non-blocking pop; used by tests and drain paths
    pub fn try_recv(&self) -> Option<Outbound> {
        self.rx.try_recv().ok()
    }

    /// Await the next payload
    pub async fn recv(&mut self) -> Option<Outbound> {
        loop {
            match self.rx.try_recv() {
                Ok(message) => return Some(message),
                Err(crossbeam_channel::TryRecvError::Empty) => {
                    self.notify.notified().await;
                }
                Err(crossbeam_channel::TryRecvError::Disconnected) => return None,
            }
        }
    }
}

/// Drive one accepted WebTransport session: a reader task feeding the
/// session mailbox and a writer task draining the outbound queue.
/// Returns when either side closes. The stream pair is the one the join
/// arrived on; control and fallback frames reuse it.
pub async fn run_session(
    connection: wtransport::Connection,
    streams: (wtransport::SendStream, wtransport::RecvStream),
    session: SessionId,
    mailbox: Arc<InputMailbox>,
    rate_limiter: Arc<Mutex<RateLimiter>>,
    outbound_tx: OutboundSender,
    mut outbound: OutboundReceiver,
    max_msg_bytes: usize,
    metrics: Arc<Metrics>,
) -> anyhow::Result<()> {
    let (mut stream_tx, mut stream_rx) = streams;

    let reader_metrics = metrics.clone();
    let reader = async {
        // Invalid-message accounting for the close-on-abuse rule
        let mut invalid_streak = 0u32;
        let mut rate_drop_count = 0u64;

        loop {
            let payload =
                match crate::net::framing::read_message(&mut stream_rx, max_msg_bytes).await {
                    Ok(payload) => payload,
                    Err(crate::net::framing::FramingError::MessageTooLarge(len, max)) => {
                        debug!(session = %session, len, max, "oversized message dropped");
                        Metrics::incr(&reader_metrics.inputs_dropped);
                        invalid_streak += 1;
                        if invalid_streak >= 16 {
                            warn!(session = %session, "too many invalid messages, closing");
                            break;
                        }
                        continue;
                    }
                    Err(_) => break,
                };

            let message: ClientMessage = match protocol::decode(&payload) {
                Ok(message) => message,
                Err(e) => {
                    debug!(session = %session, error = %e, "undecodable message dropped");
                    Metrics::incr(&reader_metrics.protocol_errors);
                    invalid_streak += 1;
                    if invalid_streak >= 16 {
                        warn!(session = %session, "too many invalid messages, closing");
                        break;
                    }
                    continue;
                }
            };
            invalid_streak = 0;

            match message {
                ClientMessage::Input(frame) => {
                    if rate_limiter.lock().check(session).is_err() {
                        Metrics::incr(&reader_metrics.inputs_rate_limited);
                        rate_drop_count += 1;
                        if rate_drop_count % 20 == 1 {
                            debug!(session = %session, dropped = rate_drop_count, "input rate limited");
                        }
                        continue;
                    }
                    mailbox.post(frame);
                }
                ClientMessage::Leave => break,
                ClientMessage::Ping { timestamp } => {
                    let server_timestamp = std::time::SystemTime::now()
                        .duration_since(std::time::UNIX_EPOCH)
                        .map(|d| d.as_millis() as u64)
                        .unwrap_or(0);
                    let pong = crate::net::protocol::ServerMessage::Pong {
                        client_timestamp: timestamp,
                        server_timestamp,
                    };
                    if let Ok(bytes) = protocol::encode(&pong) {
                        outbound_tx.push(Outbound::Control(Arc::new(bytes)));
                    }
                }
                ClientMessage::Join(_) => {
                    // Already joined; duplicate joins are ignored
                    debug!(session = %session, "duplicate join ignored");
                }
            }
        }
    };

    let writer_metrics = metrics;
    let writer = async {
        while let Some(message) = outbound.recv().await {
            match message {
                Outbound::Control(bytes) => {
                    let mut tagged = Vec::with_capacity(bytes.len() + 1);
                    tagged.push(CHANNEL_CONTROL);
                    tagged.extend_from_slice(&bytes);
                    if crate::net::framing::write_message(&mut stream_tx, &tagged, 64 * 1024)
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                Outbound::Frame(bytes) => {
                    // Datagram first; stream fallback keeps snapshots
                    // flowing where datagrams are unsupported
                    if connection.send_datagram(bytes.as_slice()).is_err() {
                        let mut tagged = Vec::with_capacity(bytes.len() + 1);
                        tagged.push(CHANNEL_FRAME);
                        tagged.extend_from_slice(&bytes);
                        if crate::net::framing::write_message(&mut stream_tx, &tagged, 64 * 1024)
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    Metrics::incr(&writer_metrics.snapshots_sent);
                    Metrics::add(&writer_metrics.snapshot_bytes, bytes.len() as u64);
                }
            }
        }
    };

    tokio::select! {
        _ = reader => {}
        _ = writer => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn control(byte: u8) -> Outbound {
        Outbound::Control(Arc::new(vec![byte]))
    }

    fn first_byte(message: &Outbound) -> u8 {
        match message {
            Outbound::Control(b) | Outbound::Frame(b) => b[0],
        }
    }

    #[test]
    fn test_queue_delivers_in_order() {
        let (tx, rx) = outbound_queue(8);
        tx.push(control(1));
        tx.push(control(2));
        tx.push(control(3));

        assert_eq!(rx.try_recv().map(|m| first_byte(&m)), Some(1));
        assert_eq!(rx.try_recv().map(|m| first_byte(&m)), Some(2));
        assert_eq!(rx.try_recv().map(|m| first_byte(&m)), Some(3));
    }

    #[test]
    fn test_overflow_drops_oldest() {
        let (tx, rx) = outbound_queue(2);
        tx.push(control(1));
        tx.push(control(2));
        let dropped = tx.push(control(3));
        assert_eq!(dropped, 1);

        // Oldest (1) was discarded; 2 and 3 remain
        assert_eq!(rx.try_recv().map(|m| first_byte(&m)), Some(2));
        assert_eq!(rx.try_recv().map(|m| first_byte(&m)), Some(3));
    }

    #[tokio::test]
    async fn test_receiver_wakes_on_push() {
        let (tx, mut rx) = outbound_queue(4);

        let handle = tokio::spawn(async move { rx.recv().await.map(|m| first_byte(&m)) });
        // Give the receiver a chance to park
        tokio::task::yield_now().await;
        tx.push(control(9));

        let got = tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got, Some(9));
    }
}

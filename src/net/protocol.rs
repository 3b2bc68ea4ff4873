//! Control-plane message types.
//!
//! Control messages (join, input, leave, ping, status) are serde structs
//! carried as length-prefixed bincode over the reliable stream. Snapshot
//! frames are NOT represented here: they are hand-packed binary (see
//! `net::codec`) and travel on the unreliable datagram channel, falling
//! back to the stream when datagrams are unsupported.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::util::vec2::Vec2;

/// Unique id of a connected session
pub type SessionId = Uuid;

/// Stream channel tags; the first payload byte after the length prefix
pub const CHANNEL_CONTROL: u8 = 0;
pub const CHANNEL_FRAME: u8 = 1;

/// One client input for one tick
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct InputFrame {
    /// Client sequence number, normalized modulo 2^31 on intake
    pub seq: u32,
    /// Steering target in world coordinates
    pub target: Vec2,
    /// Skill button held this frame
    pub space: bool,
    /// Eject button held this frame
    pub eject: bool,
}

/// Body shape chosen at join; cosmetic only
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum Shape {
    #[default]
    Circle,
    Square,
    Triangle,
    Hex,
}

/// Starting pigment chosen at join; components clamped to [0, 1]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PigmentChoice {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

/// Options sent with a join request; everything is optional
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JoinOptions {
    pub name: Option<String>,
    pub shape: Option<Shape>,
    pub pigment: Option<PigmentChoice>,
}

/// Messages from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ClientMessage {
    /// Request to join the room
    Join(JoinOptions),
    /// Player input for the current tick
    Input(InputFrame),
    /// Orderly leave
    Leave,
    /// Latency probe
    Ping { timestamp: u64 },
}

/// Room availability, published to subscribers on lifecycle changes
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RoomStatus {
    Online,
    Offline,
}

/// Messages from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ServerMessage {
    /// Join succeeded; the client keys snapshot rows by `slot`
    JoinAccepted {
        session: SessionId,
        slot: u16,
        handle: u32,
        map_radius: f32,
        tick_rate_hz: u32,
    },
    /// Join refused (room full, quota, pool exhausted)
    JoinRejected { reason: String },
    /// Authoritative position override after an anti-cheat escalation
    PositionCorrection { slot: u16, position: Vec2, velocity: Vec2 },
    /// Room lifecycle change
    Status(RoomStatus),
    /// Latency probe response
    Pong {
        client_timestamp: u64,
        server_timestamp: u64,
    },
    /// Server is closing this session
    Kicked { reason: String },
}

/// Errors from message encode/decode
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("encode failed: {0}")]
    Encode(#[from] bincode::error::EncodeError),
    #[error("decode failed: {0}")]
    Decode(#[from] bincode::error::DecodeError),
}

/// Encode a control message with the standard bincode config
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, ProtocolError> {
    Ok(bincode::serde::encode_to_vec(message, bincode::config::standard())?)
}

/// Decode a control message; trailing bytes are rejected by length checks
/// at the framing layer, not here
pub fn decode<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, ProtocolError> {
    let (value, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_roundtrip() {
        let input = InputFrame {
            seq: 42,
            target: Vec2::new(150.0, -20.0),
            space: true,
            eject: false,
        };
        let bytes = encode(&ClientMessage::Input(input)).unwrap();
        let decoded: ClientMessage = decode(&bytes).unwrap();
        match decoded {
            ClientMessage::Input(got) => assert_eq!(got, input),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_join_options_roundtrip() {
        let opts = JoinOptions {
            name: Some("ink".to_string()),
            shape: Some(Shape::Hex),
            pigment: Some(PigmentChoice { r: 0.1, g: 0.5, b: 0.9 }),
        };
        let bytes = encode(&ClientMessage::Join(opts.clone())).unwrap();
        let decoded: ClientMessage = decode(&bytes).unwrap();
        match decoded {
            ClientMessage::Join(got) => {
                assert_eq!(got.name, opts.name);
                assert_eq!(got.shape, opts.shape);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_join_accepted_roundtrip() {
        let msg = ServerMessage::JoinAccepted {
            session: Uuid::new_v4(),
            slot: 7,
            handle: (3 << 16) | 7,
            map_radius: 2000.0,
            tick_rate_hz: 20,
        };
        let bytes = encode(&msg).unwrap();
        let decoded: ServerMessage = decode(&bytes).unwrap();
        match decoded {
            ServerMessage::JoinAccepted { slot, handle, .. } => {
                assert_eq!(slot, 7);
                assert_eq!(handle, (3 << 16) | 7);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_decode_garbage_fails() {
        let garbage = [0xFF, 0xFE, 0xFD, 0x01, 0x02];
        let result: Result<ClientMessage, _> = decode(&garbage);
        assert!(result.is_err());
    }

    #[test]
    fn test_input_message_stays_small() {
        // The rate limiter assumes inputs are far under MAX_MSG_BYTES
        let bytes = encode(&ClientMessage::Input(InputFrame::default())).unwrap();
        assert!(bytes.len() < 64);
    }
}

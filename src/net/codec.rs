//! Indexed transform frame codec.
//!
//! Wire layout (little-endian):
//!
//! ```text
//! u8  packet type = 1
//! f32 server game time
//! u16 entity count
//! per entity:
//!   u16 entity index
//!   f32 x, f32 y
//!   f32 vx, f32 vy
//!   u16 last processed seq (0 for non-player entities)
//! trailer: u32 crc32 (config-enabled)
//! ```
//!
//! The entity index is the store slot, not the generation-qualified handle;
//! clients map it through the slot table established at join. Decoding is
//! bounds-checked per field and drops the whole frame on any overrun.

use rustc_hash::FxHashMap;

use crate::game::pool::Slot;
use crate::game::stores::{flags, World};
use crate::net::framing::{FrameCursor, FrameWriter};
use crate::util::vec2::Vec2;

/// Packet type tag for indexed transform frames
pub const PACKET_TRANSFORM: u8 = 1;

/// Bytes per encoded entity record
const ENTITY_RECORD_BYTES: usize = 2 + 4 * 4 + 2;
/// Frame header bytes (type + time + count)
const HEADER_BYTES: usize = 1 + 4 + 2;

/// Movement below this distance lets the delta filter skip an entity
const DELTA_EPSILON: f32 = 0.01;
/// A full (unfiltered) frame is forced this often
const DELTA_FULL_REFRESH_FRAMES: u32 = 60;

/// One entity's row in a transform frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntityRecord {
    pub slot: Slot,
    pub position: Vec2,
    pub velocity: Vec2,
    /// Ack of the owning session's last processed input seq; 0 otherwise
    pub last_processed_seq: u16,
}

/// Decoded (or to-be-encoded) transform frame
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransformFrame {
    pub server_time: f32,
    pub entities: Vec<EntityRecord>,
}

/// Frame decode failures; any failure drops the frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("frame truncated")]
    Truncated,
    #[error("unexpected packet type {0}")]
    WrongPacketType(u8),
    #[error("crc mismatch")]
    CrcMismatch,
    #[error("declared entity count exceeds frame size")]
    CountOverrun,
}

/// Project the world into a transform frame. Only slots that are ACTIVE
/// and not DEAD are emitted; `ack_for` supplies the per-player input ack.
pub fn frame_from_world<F>(world: &World, server_time: f32, ack_for: F) -> TransformFrame
where
    F: Fn(Slot) -> u16,
{
    let mut entities = Vec::with_capacity(world.active_count());
    for &slot in world.active() {
        if !world.is_live(slot) {
            continue;
        }
        let ack = if world.has_flags(slot, flags::PLAYER) && !world.has_flags(slot, flags::BOT) {
            ack_for(slot)
        } else {
            0
        };
        entities.push(EntityRecord {
            slot,
            position: world.position(slot),
            velocity: world.velocity(slot),
            last_processed_seq: ack,
        });
    }
    TransformFrame {
        server_time,
        entities,
    }
}

/// Encode a frame, optionally appending the CRC-32 trailer
pub fn encode_frame(frame: &TransformFrame, with_crc: bool) -> Vec<u8> {
    let mut writer =
        FrameWriter::with_capacity(HEADER_BYTES + frame.entities.len() * ENTITY_RECORD_BYTES + 4);
    writer.put_u8(PACKET_TRANSFORM);
    writer.put_f32(frame.server_time);
    writer.put_u16(frame.entities.len() as u16);

    for entity in &frame.entities {
        writer.put_u16(entity.slot);
        writer.put_f32(entity.position.x);
        writer.put_f32(entity.position.y);
        writer.put_f32(entity.velocity.x);
        writer.put_f32(entity.velocity.y);
        writer.put_u16(entity.last_processed_seq);
    }

    if with_crc {
        let crc = crc32(writer.as_bytes());
        writer.put_u32(crc);
    }
    writer.into_bytes()
}

/// Decode a frame. `expect_crc` must match the encoder's configuration.
pub fn decode_frame(bytes: &[u8], expect_crc: bool) -> Result<TransformFrame, FrameError> {
    let payload = if expect_crc {
        if bytes.len() < 4 {
            return Err(FrameError::Truncated);
        }
        let (payload, trailer) = bytes.split_at(bytes.len() - 4);
        let stated = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
        if crc32(payload) != stated {
            return Err(FrameError::CrcMismatch);
        }
        payload
    } else {
        bytes
    };

    let mut cursor = FrameCursor::new(payload);
    let packet_type = cursor.get_u8().ok_or(FrameError::Truncated)?;
    if packet_type != PACKET_TRANSFORM {
        return Err(FrameError::WrongPacketType(packet_type));
    }
    let server_time = cursor.get_f32().ok_or(FrameError::Truncated)?;
    let count = cursor.get_u16().ok_or(FrameError::Truncated)? as usize;

    if count * ENTITY_RECORD_BYTES > cursor.remaining() {
        return Err(FrameError::CountOverrun);
    }

    let mut entities = Vec::with_capacity(count);
    for _ in 0..count {
        let slot = cursor.get_u16().ok_or(FrameError::Truncated)?;
        let x = cursor.get_f32().ok_or(FrameError::Truncated)?;
        let y = cursor.get_f32().ok_or(FrameError::Truncated)?;
        let vx = cursor.get_f32().ok_or(FrameError::Truncated)?;
        let vy = cursor.get_f32().ok_or(FrameError::Truncated)?;
        let last_processed_seq = cursor.get_u16().ok_or(FrameError::Truncated)?;
        entities.push(EntityRecord {
            slot,
            position: Vec2::new(x, y),
            velocity: Vec2::new(vx, vy),
            last_processed_seq,
        });
    }

    Ok(TransformFrame {
        server_time,
        entities,
    })
}

/// Optional bandwidth filter: drop entities whose position moved less than
/// `DELTA_EPSILON` since the last frame that carried them, with a full
/// refresh forced every `DELTA_FULL_REFRESH_FRAMES` frames. Off by default;
/// the client interpolation ring assumes full frames.
pub struct DeltaTracker {
    last_sent: FxHashMap<Slot, Vec2>,
    frames_since_full: u32,
}

impl DeltaTracker {
    pub fn new() -> Self {
        Self {
            last_sent: FxHashMap::default(),
            frames_since_full: 0,
        }
    }

    pub fn filter(&mut self, frame: &TransformFrame) -> TransformFrame {
        self.frames_since_full += 1;
        let full = self.frames_since_full >= DELTA_FULL_REFRESH_FRAMES;
        if full {
            self.frames_since_full = 0;
        }

        let mut entities = Vec::with_capacity(frame.entities.len());
        for entity in &frame.entities {
            let moved = match self.last_sent.get(&entity.slot) {
                Some(prev) => entity.position.distance_to(*prev) >= DELTA_EPSILON,
                None => true,
            };
            if full || moved {
                self.last_sent.insert(entity.slot, entity.position);
                entities.push(*entity);
            }
        }

        // Forget slots that vanished from the source frame
        if full {
            let alive: FxHashMap<Slot, Vec2> = frame
                .entities
                .iter()
                .map(|e| (e.slot, e.position))
                .collect();
            self.last_sent.retain(|slot, _| alive.contains_key(slot));
        }

        TransformFrame {
            server_time: frame.server_time,
            entities,
        }
    }
}

impl Default for DeltaTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// IEEE CRC-32 with a compile-time table
const fn crc32_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u32;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ 0xEDB8_8320
            } else {
                crc >> 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

static CRC32_TABLE: [u32; 256] = crc32_table();

pub fn crc32(bytes: &[u8]) -> u32 {
    let mut crc = 0xFFFF_FFFFu32;
    for &b in bytes {
        let idx = ((crc ^ b as u32) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[idx];
    }
    crc ^ 0xFFFF_FFFF
}

/// Simulation timing constants
pub mod tick {
    /// Authoritative server tick rate in Hz
    pub const RATE: u32 = 20;
    /// Delta time per server tick in seconds
    pub const DT: f32 = 1.0 / RATE as f32;
    /// Tick duration in milliseconds
    pub const DURATION_MS: u64 = 1000 / RATE as u64;
    /// Singleplayer / client-local simulation rate in Hz
    pub const CLIENT_RATE: u32 = 60;
    /// A tick taking longer than DT * SLOW_FACTOR logs a slow-tick warning
    pub const SLOW_FACTOR: f32 = 2.0;
}

/// Entity pool sizing
pub mod pool {
    /// Default fixed pool capacity; the handle format caps this at u16::MAX
    pub const MAX_ENTITIES: usize = 4096;
}

/// World geometry
pub mod world {
    /// Radius of the playable disk in world units
    pub const MAP_RADIUS: f32 = 2000.0;
}

/// Movement and physics constants
pub mod physics {
    /// Base maximum speed in world units per second
    pub const MAX_SPEED_BASE: f32 = 150.0;
    /// Post-clamp speed tolerance; |v| may not exceed MAX_SPEED_BASE * SPEED_TOLERANCE
    pub const SPEED_TOLERANCE: f32 = 1.1;
    /// Exponential friction base, applied as v *= FRICTION.powf(dt)
    pub const FRICTION: f32 = 0.05;
    /// Velocity approaches the steering target at this rate (1/s)
    pub const ACCEL_RATE: f32 = 8.0;
    /// Default collision restitution
    pub const RESTITUTION: f32 = 0.6;
    /// Default body density; mass = DENSITY * pi * r^2
    pub const DENSITY: f32 = 1.0;
    /// Starting body radius for players
    pub const PLAYER_RADIUS: f32 = 15.0;
}

/// Ring geometry and progression thresholds.
///
/// The world disk is divided into four radial bands; a player commits to a
/// deeper ring when their pigment match crosses the ring's entry threshold
/// while standing inside the ring's band. Band edges are fractions of
/// MAP_RADIUS so they survive operator overrides of the map size.
pub mod rings {
    /// Ring ids, shallow to deep
    pub const OUTER: u8 = 0;
    pub const MIDDLE: u8 = 1;
    pub const INNER: u8 = 2;
    pub const CORE: u8 = 3;
    pub const COUNT: usize = 4;

    /// Outer radius of each band as a fraction of MAP_RADIUS, indexed by ring id
    pub const BAND_OUTER_FRAC: [f32; COUNT] = [1.0, 0.7, 0.375, 0.125];
    /// Inner radius of each band as a fraction of MAP_RADIUS
    pub const BAND_INNER_FRAC: [f32; COUNT] = [0.7, 0.375, 0.125, 0.0];

    /// Match percentage required to enter each ring (outer has no gate)
    pub const ENTRY_MATCH_PERCENT: [f32; COUNT] = [0.0, 25.0, 50.0, 75.0];
}

/// Combat and health
pub mod stats {
    /// Starting and maximum hit points for players
    pub const PLAYER_MAX_HP: f32 = 100.0;
    /// Contact damage per second at equal mass
    pub const CONTACT_DAMAGE: f32 = 12.0;
    /// Contact damage scales by (attacker_mass / victim_mass) up to this cap
    pub const CONTACT_MASS_RATIO_CAP: f32 = 3.0;
    /// Score granted per food pellet consumed
    pub const FOOD_SCORE: f32 = 10.0;
}

/// Pigment blending
pub mod pigment {
    /// Fraction of the distance to the food color covered per pellet eaten
    pub const BLEND_FACTOR: f32 = 0.15;
    /// Fraction of the player's pigment carried by an ejected pellet
    pub const EJECT_CARRY: f32 = 0.25;
    /// Maximum distance between two colors in the unit RGB cube
    pub const MAX_COLOR_DIST: f32 = 1.732_050_8; // sqrt(3)
}

/// Skill defaults; concrete formulas stay hooks behind the kind table
pub mod skill {
    /// Skill kind ids
    pub const KIND_NONE: f32 = 0.0;
    pub const KIND_DASH: f32 = 1.0;
    /// Default cooldown after a successful trigger, seconds
    pub const COOLDOWN: f32 = 3.0;
    /// Dash impulse magnitude in world units per second
    pub const DASH_IMPULSE: f32 = 220.0;
    /// Dash effect duration, seconds
    pub const DASH_DURATION: f32 = 0.4;
    /// Fixed capacity of the per-entity effect slots
    pub const MAX_EFFECTS: usize = 4;
}

/// Food spawning
pub mod food {
    /// Global live-pellet cap; the spawner culls the oldest beyond this
    pub const MAX_FOOD: usize = 1024;
    /// Seconds between bursts, indexed by ring id
    pub const SPAWN_INTERVAL: [f32; super::rings::COUNT] = [2.0, 2.5, 3.0, 4.0];
    /// Pellets per burst, indexed by ring id
    pub const BURST_SIZE: [usize; super::rings::COUNT] = [8, 6, 4, 2];
    /// Pellet body radius
    pub const RADIUS: f32 = 4.0;
    /// Pellet mass
    pub const MASS: f32 = 1.0;
    /// Number of food color kinds (flag bits 8..=10)
    pub const KINDS: usize = 6;
}

/// Spatial grid sizing
pub mod grid {
    /// Cell edge length in world units; ~2x the largest interacting radius
    pub const CELL: f32 = 64.0;
    /// Buckets empty for this many ticks are garbage collected
    pub const GC_IDLE_TICKS: u64 = 1200; // 60 s at 20 Hz
    /// Expected entities per occupied cell
    pub const BUCKET_CAPACITY: usize = 8;
}

/// Input intake limits
pub mod input {
    /// Per-session inputs allowed per rolling window
    pub const RATE_LIMIT_MAX: u32 = 60;
    /// Rolling window length in milliseconds
    pub const RATE_LIMIT_WINDOW_MS: u64 = 1000;
    /// Maximum serialized input message size in bytes
    pub const MAX_MSG_BYTES: usize = 1024;
    /// Maximum allowed jump between consecutive sequence numbers
    pub const MAX_SEQUENCE_JUMP: u32 = 30;
    /// Sequence numbers are normalized modulo 2^31 on intake
    pub const SEQ_MODULO: u32 = 1 << 31;
    /// A drop is logged only every Nth occurrence per session
    pub const DROP_LOG_EVERY: u32 = 20;
    /// Sessions dropping more than this fraction over the review window escalate
    pub const ESCALATE_DROP_RATIO: f32 = 0.5;
    /// Escalation review window in seconds
    pub const ESCALATE_WINDOW_S: u64 = 10;
}

/// Room limits and lifecycle
pub mod room {
    /// Maximum clients per room
    pub const MAX_CLIENTS: usize = 50;
    /// Entities a single client may own, bots included
    pub const MAX_ENTITIES_PER_CLIENT: usize = 5;
    /// New rooms allowed per source IP per minute
    pub const CREATE_MAX_PER_MIN: u32 = 5;
    /// Seconds a room with zero clients survives before disposal
    pub const IDLE_TIMEOUT_S: u64 = 60;
    /// Rate-limit tables are swept this often, entries idle longer are dropped
    pub const RATE_SWEEP_INTERVAL_S: u64 = 60;
    /// Default number of maintenance bots per room
    pub const BOT_COUNT: usize = 8;
    /// Per-connection outbound queue depth; overflow drops the oldest frame
    pub const SEND_QUEUE_DEPTH: usize = 32;
}

/// Client-side prediction and interpolation
pub mod client {
    /// Capacity of the pending-input ring
    pub const PENDING_INPUTS: usize = 256;
    /// Snapshot ring size
    pub const SNAPSHOT_BUFFER: usize = 20;
    /// Render delay for remote interpolation, milliseconds
    pub const INTERP_DELAY_MS: u64 = 100;
    /// Reconciliation snap threshold in world units
    pub const RECONCILE_THRESHOLD: f32 = 3.0;
    /// Reconnect backoff: initial delay in milliseconds
    pub const BACKOFF_BASE_MS: u64 = 500;
    /// Reconnect backoff: maximum delay in milliseconds
    pub const BACKOFF_MAX_MS: u64 = 15_000;
    /// Reconnect backoff: jitter fraction applied to each delay
    pub const BACKOFF_JITTER: f32 = 0.3;
    /// Attempts before the client gives up and enters offline mode
    pub const MAX_ATTEMPTS: u32 = 8;
}

/// Derived helper: mass of a disk body of the given radius
#[inline]
pub fn radius_to_mass(radius: f32) -> f32 {
    physics::DENSITY * std::f32::consts::PI * radius * radius
}

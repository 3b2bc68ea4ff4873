//! Chroma Royale server library.
//!
//! Authoritative multiplayer simulation core for a real-time arena game:
//! a fixed-capacity entity pool with generational handles, struct-of-array
//! component stores, a fixed-timestep tick, validated input intake over
//! per-session mailboxes, a binary snapshot protocol, and the client-side
//! prediction/interpolation that consumes it.

pub mod anticheat;
pub mod client;
pub mod config;
pub mod game;
pub mod lobby;
pub mod metrics;
pub mod net;
pub mod util;

//! Tunable operational defaults.
//!
//! Wire-format constants live in [`crate::message`]. This module holds
//! the knobs that can be overridden via CLI flags, plus the donation
//! heuristic bounds.

/// Refuse to donate at all when fewer free addresses than this remain;
/// giving them away would immediately starve the donor.
pub const MIN_SAFE_FREE_ADDRESSES: u32 = 5;

/// Never hand more than this many addresses to a peer in one donation.
pub const MAX_ADDRESSES_TO_GIVE_UP: u32 = 256;

/// How long a tombstoned peer's entries linger before their space is
/// reclaimed, in seconds.
pub const DEFAULT_TOMBSTONE_TIMEOUT_SECS: i64 = 600;

/// Bound on the coordinator's command queue.
pub const COMMAND_CHANNEL_SIZE: usize = 16;

/// Bound on each mesh connection's inbound message queue.
pub const MESH_CHANNEL_SIZE: usize = 100;

/// Interval between periodic full-state gossip pushes, in seconds.
pub const GOSSIP_INTERVAL_SECS: u64 = 10;

/// How long shutdown lingers so the final tombstone broadcast can make
/// it out of the process, in milliseconds.
pub const SHUTDOWN_LINGER_MS: u64 = 100;

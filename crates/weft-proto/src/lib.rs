//! # weft-proto
//!
//! Shared types, error codes, tuning constants and gossip wire framing
//! for the weft distributed IPAM fabric.
//!
//! This crate defines the 32-bit IPv4 address arithmetic, peer naming,
//! the unified error type, and the message envelope exchanged over the
//! gossip transport. The allocation algorithms live in `weft-core`.

pub mod address;
pub mod defaults;
pub mod error;
pub mod message;
pub mod peer;

// Re-export commonly used types at the crate root
pub use address::{Address, CidrV4, Offset, Range};
pub use error::{WeftError, WeftResult};
pub use message::{MessageKind, WIRE_VERSION};
pub use peer::PeerName;

//! Unified error type for all weft operations.
//!
//! Three broad families, mirroring how callers must react:
//! * ring/CRDT errors: a gossiped ring was rejected, local state is
//!   untouched; the sender should reconcile and retry.
//! * resource exhaustion: recoverable; the coordinator parks the
//!   request and retries when space or ring state changes.
//! * user errors: returned synchronously, never retried.
//!
//! An impossible *local* ring state is a panic, not an error: carrying
//! on could hand the same address to two peers.

use serde::{Deserialize, Serialize};

use crate::peer::PeerName;

pub type WeftResult<T> = Result<T, WeftError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum WeftError {
    // Ring / CRDT merge errors
    #[error("ring entries are not sorted")]
    NotSorted,
    #[error("token appears twice in ring")]
    TokenRepeated,
    #[error("token is out of range")]
    TokenOutOfRange,
    #[error("cannot merge rings for different universes")]
    DifferentUniverse,
    #[error("received a newer version for an entry I own")]
    NewerVersion,
    #[error("received an invalid entry update")]
    InvalidEntry,
    #[error("received a new entry inside my own range")]
    EntryInMyRange,
    #[error("entry reports more free space than its range holds")]
    TooMuchFreeSpace,
    #[error("unsupported wire version {0}")]
    BadWireVersion(u8),
    #[error("codec error: {0}")]
    Codec(String),

    // Resource exhaustion (recoverable)
    #[error("no peer has free space")]
    NoFreeSpace,
    #[error("no space left in any owned range")]
    SpaceExhausted,

    // User errors (synchronous, never retried)
    #[error("address is already free")]
    DuplicateFree,
    #[error("address was never allocated")]
    NotAllocated,
    #[error("address lies outside every owned range")]
    AddressOutOfSpace,
    #[error("address is already owned by {ident}")]
    AddressInUse { ident: String },
    #[error("address is owned by peer {peer}")]
    OwnedByPeer { peer: PeerName },
    #[error("no matching address for {ident}")]
    NoMatchingAddress { ident: String },
    #[error("tombstone timeout must be greater than zero")]
    InvalidTimeout,
    #[error("no ring entries for peer {peer}")]
    NoPeerEntries { peer: PeerName },
    #[error("invalid universe or address: {0}")]
    InvalidUniverse(String),
    #[error("invalid peer name: {0}")]
    InvalidPeerName(String),

    // Lifecycle
    #[error("allocator is shutting down")]
    ShuttingDown,
    #[error("request cancelled")]
    Cancelled,
    #[error("allocator has stopped")]
    Stopped,
}

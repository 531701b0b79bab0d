//! The boundary between the allocator and whatever carries its gossip.
//!
//! The allocator sends through a [`Gossip`] implementation and receives
//! through its own [`Gossiper`] implementation. Both sides are
//! best-effort: a lost message delays convergence, never breaks it,
//! because the periodic full-state exchange repairs any gap.
//!
//! The in-process mesh router in [`crate::mesh`] implements [`Gossip`]
//! for single-process deployments and tests; production transports
//! implement it over their own wire.

use async_trait::async_trait;
use bytes::Bytes;

use weft_proto::error::WeftResult;
use weft_proto::peer::PeerName;

/// Outbound side: how the allocator reaches other peers.
#[async_trait]
pub trait Gossip: Send + Sync {
    /// Send a framed message to one peer. Fire-and-forget.
    async fn gossip_unicast(&self, dst: PeerName, payload: Bytes) -> WeftResult<()>;

    /// Send a framed message to every other peer. Fire-and-forget.
    async fn gossip_broadcast(&self, payload: Bytes) -> WeftResult<()>;

    /// Deterministically pick a leader among the currently visible
    /// peers. Every peer that runs the election over the same view
    /// picks the same winner.
    async fn leader_elect(&self) -> WeftResult<PeerName>;
}

/// Inbound side: what the transport calls on delivery.
#[async_trait]
pub trait Gossiper: Send + Sync {
    async fn on_gossip_unicast(&self, src: PeerName, payload: Bytes) -> WeftResult<()>;

    async fn on_gossip_broadcast(&self, payload: Bytes) -> WeftResult<()>;

    /// Handle a periodic full-state exchange. Same payload shape as a
    /// broadcast ring update.
    async fn on_gossip(&self, payload: Bytes) -> WeftResult<()>;

    /// Produce this peer's full state for the periodic exchange, or
    /// None when there is nothing to say yet.
    async fn gossip(&self) -> Option<GossipState>;
}

/// A full-state gossip payload. States from the same peer supersede
/// each other wholesale; there is no incremental diffing, the receiver
/// merges the ring inside.
#[derive(Debug, Clone)]
pub struct GossipState {
    frame: Bytes,
}

impl GossipState {
    pub fn new(frame: Bytes) -> GossipState {
        GossipState { frame }
    }

    pub fn frame(&self) -> Bytes {
        self.frame.clone()
    }

    /// Combine with a later state from the same peer: the newer one
    /// wins outright.
    pub fn merge(self, newer: GossipState) -> GossipState {
        newer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_merge_keeps_newest() {
        let old = GossipState::new(Bytes::from_static(b"old"));
        let new = GossipState::new(Bytes::from_static(b"new"));
        assert_eq!(old.merge(new).frame(), Bytes::from_static(b"new"));
    }
}

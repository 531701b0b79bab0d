//! Parked operations waiting for ring or space changes.
//!
//! An allocate with no free space, or a claim for an address the ring
//! has not settled yet, is parked here rather than failed. The reply
//! sender doubles as the cancellation signal: when the caller drops
//! its receiver the op is dead and the coordinator skips it on the
//! next retry pass.

use tokio::sync::oneshot;

use weft_proto::address::Address;
use weft_proto::error::WeftResult;

pub struct PendingAllocate {
    pub ident: String,
    reply: oneshot::Sender<WeftResult<Address>>,
}

impl PendingAllocate {
    pub fn new(ident: String, reply: oneshot::Sender<WeftResult<Address>>) -> PendingAllocate {
        PendingAllocate { ident, reply }
    }

    pub fn is_cancelled(&self) -> bool {
        self.reply.is_closed()
    }

    pub fn finish(self, result: WeftResult<Address>) {
        // The caller may have gone away; that is its problem.
        let _ = self.reply.send(result);
    }
}

pub struct PendingClaim {
    pub ident: String,
    pub addr: Address,
    reply: oneshot::Sender<WeftResult<()>>,
}

impl PendingClaim {
    pub fn new(
        ident: String,
        addr: Address,
        reply: oneshot::Sender<WeftResult<()>>,
    ) -> PendingClaim {
        PendingClaim { ident, addr, reply }
    }

    pub fn is_cancelled(&self) -> bool {
        self.reply.is_closed()
    }

    pub fn finish(self, result: WeftResult<()>) {
        let _ = self.reply.send(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_is_receiver_drop() {
        let (tx, rx) = oneshot::channel();
        let op = PendingAllocate::new("c1".to_string(), tx);
        assert!(!op.is_cancelled());
        drop(rx);
        assert!(op.is_cancelled());
    }
}

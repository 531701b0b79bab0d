//! Allocator configuration, assembled from CLI flags in `main.rs` or
//! directly by tests.

use weft_proto::address::{CidrV4, Range};
use weft_proto::defaults::DEFAULT_TOMBSTONE_TIMEOUT_SECS;
use weft_proto::peer::PeerName;

#[derive(Debug, Clone)]
pub struct Config {
    pub peer_name: PeerName,
    /// The CIDR block shared by every peer in the fabric.
    pub universe: CidrV4,
    /// Seconds a tombstoned peer's entries linger before reclaim.
    pub tombstone_timeout: i64,
    /// Fixed seed for allocation decisions; None draws from entropy.
    pub rng_seed: Option<u64>,
}

impl Config {
    pub fn new(peer_name: PeerName, universe: CidrV4) -> Config {
        Config {
            peer_name,
            universe,
            tombstone_timeout: DEFAULT_TOMBSTONE_TIMEOUT_SECS,
            rng_seed: None,
        }
    }

    /// The range actually handed out: the universe minus the network
    /// and broadcast addresses.
    pub fn allocation_range(&self) -> Range {
        self.universe.host_range()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocation_range_excludes_boundaries() {
        let cfg = Config::new(
            "01:00:00:00:00:01".parse().unwrap(),
            "10.0.3.0/28".parse().unwrap(),
        );
        let r = cfg.allocation_range();
        assert_eq!(r.start.to_string(), "10.0.3.1");
        assert_eq!(r.size(), 14);
        assert_eq!(cfg.tombstone_timeout, DEFAULT_TOMBSTONE_TIMEOUT_SECS);
    }
}

//! Peer naming.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::WeftError;

/// Identity of a peer in the mesh, rendered MAC-style
/// (`7a:9f:00:01:02:03`). Names are compared as plain integers; the
/// mesh guarantees uniqueness, we just carry them around.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct PeerName(pub u64);

impl PeerName {
    /// The nil name: returned by ownership queries on an empty ring.
    pub const UNKNOWN: PeerName = PeerName(0);

    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PeerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.0.to_be_bytes();
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[2], b[3], b[4], b[5], b[6], b[7]
        )
    }
}

impl FromStr for PeerName {
    type Err = WeftError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || WeftError::InvalidPeerName(s.to_string());
        let mut value: u64 = 0;
        let mut parts = 0;
        for part in s.split(':') {
            if part.len() != 2 {
                return Err(bad());
            }
            let byte = u8::from_str_radix(part, 16).map_err(|_| bad())?;
            value = value << 8 | u64::from(byte);
            parts += 1;
        }
        if parts != 6 {
            return Err(bad());
        }
        Ok(PeerName(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let name: PeerName = "7a:9f:00:01:02:03".parse().unwrap();
        assert_eq!(name.to_string(), "7a:9f:00:01:02:03");
        assert_ne!(name, PeerName::UNKNOWN);
    }

    #[test]
    fn test_reject_malformed() {
        assert!("7a:9f".parse::<PeerName>().is_err());
        assert!("7a:9f:00:01:02:zz".parse::<PeerName>().is_err());
        assert!("7a9f:00:01:02:03".parse::<PeerName>().is_err());
    }

    #[test]
    fn test_ordering_matches_value() {
        let lo: PeerName = "00:00:00:00:00:01".parse().unwrap();
        let hi: PeerName = "00:00:00:00:00:02".parse().unwrap();
        assert!(lo < hi);
    }
}

//! Point-in-time snapshots of the allocator for operators.

use std::collections::BTreeMap;
use std::fmt;

use weft_proto::address::{Address, Range};
use weft_proto::peer::PeerName;

#[derive(Debug, Clone)]
pub struct Status {
    pub peer: PeerName,
    pub universe: Range,
    pub entries: Vec<EntryStatus>,
    /// Free addresses in ranges this peer owns.
    pub local_free: u64,
    /// Free addresses other peers last reported.
    pub remote_free: u64,
    pub owned_addresses: usize,
    pub pending_allocates: Vec<String>,
    pub pending_claims: Vec<ClaimStatus>,
}

#[derive(Debug, Clone)]
pub struct EntryStatus {
    pub token: Address,
    pub peer: PeerName,
    pub version: u32,
    pub tombstone: i64,
    pub free: u32,
}

#[derive(Debug, Clone)]
pub struct ClaimStatus {
    pub ident: String,
    pub addr: Address,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerStats {
    pub ranges: usize,
    pub reported_free: u64,
}

/// Per-peer aggregation over the live ring entries.
pub fn peer_stats(entries: &[EntryStatus]) -> BTreeMap<PeerName, PeerStats> {
    let mut stats: BTreeMap<PeerName, PeerStats> = BTreeMap::new();
    for e in entries.iter().filter(|e| e.tombstone == 0) {
        let s = stats.entry(e.peer).or_default();
        s.ranges += 1;
        s.reported_free += u64::from(e.free);
    }
    stats
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "allocator {} universe {} ({} owned, {} local free, {} remote free)",
            self.peer, self.universe, self.owned_addresses, self.local_free, self.remote_free
        )?;
        for (peer, s) in peer_stats(&self.entries) {
            writeln!(
                f,
                "  peer {}: {} range(s), {} reported free",
                peer, s.ranges, s.reported_free
            )?;
        }
        for e in self.entries.iter().filter(|e| e.tombstone != 0) {
            writeln!(f, "  tombstone at {} for {} until {}", e.token, e.peer, e.tombstone)?;
        }
        if !self.pending_allocates.is_empty() {
            writeln!(f, "  pending allocates: {}", self.pending_allocates.join(", "))?;
        }
        for c in &self.pending_claims {
            writeln!(f, "  pending claim of {} for {}", c.addr, c.ident)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(token: &str, peer: &str, tombstone: i64, free: u32) -> EntryStatus {
        EntryStatus {
            token: token.parse().unwrap(),
            peer: peer.parse().unwrap(),
            version: 0,
            tombstone,
            free,
        }
    }

    #[test]
    fn test_peer_stats_skips_tombstones() {
        let entries = vec![
            entry("10.0.0.0", "01:00:00:00:00:01", 0, 10),
            entry("10.0.0.64", "01:00:00:00:00:02", 99, 50),
            entry("10.0.0.128", "01:00:00:00:00:01", 0, 5),
        ];
        let stats = peer_stats(&entries);
        assert_eq!(stats.len(), 1);
        let s = &stats[&"01:00:00:00:00:01".parse().unwrap()];
        assert_eq!(s.ranges, 2);
        assert_eq!(s.reported_free, 15);
    }
}

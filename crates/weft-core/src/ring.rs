//! The ring CRDT.
//!
//! The ring maps contiguous token ranges of the address universe to
//! owning peers. Each entry carries a per-token version number and a
//! tombstone timestamp; peers mutate their copies independently and
//! converge through [`Ring::merge`], a deterministic join over the two
//! sorted entry lists.
//!
//! Entries for dead peers are kept as tombstones until they expire so
//! that stale gossip cannot resurrect old ownership.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use weft_proto::address::{Address, Offset, Range};
use weft_proto::error::{WeftError, WeftResult};
use weft_proto::peer::PeerName;

/// One entry on the ring: the owner of `[token, next_token)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Start of the range owned by this entry.
    pub token: Address,
    /// Who owns this range.
    pub peer: PeerName,
    /// Unix time at which this tombstone expires; 0 means live.
    pub tombstone: i64,
    /// Version of this entry, bumped on every change.
    pub version: u32,
    /// Advisory count of free addresses in the range. Only used to
    /// steer space requests, never for correctness.
    pub free: Offset,
}

impl Entry {
    fn new(token: Address, peer: PeerName, free: Offset) -> Entry {
        Entry {
            token,
            peer,
            tombstone: 0,
            version: 0,
            free,
        }
    }

    fn update(&mut self, peer: PeerName, free: Offset) {
        self.peer = peer;
        self.tombstone = 0;
        self.version += 1;
        self.free = free;
    }

    fn is_live(&self) -> bool {
        self.tombstone == 0
    }
}

/// Is `token` inside the cyclic interval `[first, second)`?
fn token_between(first: Address, second: Address, token: Address) -> bool {
    if first == second {
        // Only one token on the ring; everything except that token is
        // "between".
        token != first
    } else if first < second {
        first <= token && token < second
    } else {
        first <= token || token < second
    }
}

fn cyc(i: isize, len: usize) -> usize {
    i.rem_euclid(len as isize) as usize
}

/// A peer's view of how the universe `[start, end)` is partitioned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ring {
    start: Address,
    end: Address,
    peer: PeerName,
    entries: Vec<Entry>,
}

impl Ring {
    /// Create an empty ring for the universe `[start, end)` owned by
    /// nobody, viewed by `peer`.
    pub fn new(start: Address, end: Address, peer: PeerName) -> Ring {
        assert!(start < end, "universe start must be below its end");
        Ring {
            start,
            end,
            peer,
            entries: Vec::new(),
        }
    }

    pub fn start(&self) -> Address {
        self.start
    }

    pub fn end(&self) -> Address {
        self.end
    }

    pub fn peer_name(&self) -> PeerName {
        self.peer
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn universe_size(&self) -> Offset {
        self.end.subtract(self.start)
    }

    /// True if the ring has no live entries (tombstones may remain).
    pub fn is_empty(&self) -> bool {
        self.entries.iter().all(|e| !e.is_live())
    }

    pub fn contains(&self, addr: Address) -> bool {
        addr >= self.start && addr < self.end
    }

    /// Distance from `a` forward to `b`, wrapping through the origin.
    /// `distance(a, a)` is the whole universe, not zero.
    fn distance(&self, a: Address, b: Address) -> Offset {
        if b > a {
            b.subtract(a)
        } else {
            (self.end.subtract(a)) + (b.subtract(self.start))
        }
    }

    fn live_indices(&self) -> Vec<usize> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.is_live())
            .map(|(i, _)| i)
            .collect()
    }

    fn get_entry_mut(&mut self, token: Address) -> Option<&mut Entry> {
        let i = self.entries.partition_point(|e| e.token < token);
        self.entries.get_mut(i).filter(|e| e.token == token)
    }

    fn get_entry(&self, token: Address) -> Option<&Entry> {
        let i = self.entries.partition_point(|e| e.token < token);
        self.entries.get(i).filter(|e| e.token == token)
    }

    fn insert_entry(&mut self, e: Entry) {
        let i = self.entries.partition_point(|x| x.token < e.token);
        if self.entries.get(i).is_some_and(|x| x.token == e.token) {
            panic!("inserting an existing token {}", e.token);
        }
        self.entries.insert(i, e);
    }

    pub fn check_invariants(&self) -> WeftResult<()> {
        for w in self.entries.windows(2) {
            if w[0].token > w[1].token {
                return Err(WeftError::NotSorted);
            }
            if w[0].token == w[1].token {
                return Err(WeftError::TokenRepeated);
            }
        }
        if let (Some(first), Some(last)) = (self.entries.first(), self.entries.last()) {
            if first.token < self.start || last.token >= self.end {
                return Err(WeftError::TokenOutOfRange);
            }
        }
        // Free counts may never exceed the range size; tombstones are
        // transparent here, a live range spans them.
        let live = self.live_indices();
        for (pos, &i) in live.iter().enumerate() {
            let e = &self.entries[i];
            let next = &self.entries[live[(pos + 1) % live.len()]];
            if e.free > self.distance(e.token, next.token) {
                return Err(WeftError::TooMuchFreeSpace);
            }
        }
        Ok(())
    }

    fn assert_invariants(&self) {
        if let Err(e) = self.check_invariants() {
            panic!("ring invariant violated: {e}");
        }
    }

    /// The peer owning the range containing `addr`, or
    /// [`PeerName::UNKNOWN`] if the ring has no live entries yet.
    pub fn owner(&self, addr: Address) -> PeerName {
        assert!(self.contains(addr), "address out of universe");
        let live = self.live_indices();
        if live.is_empty() {
            return PeerName::UNKNOWN;
        }
        // Rightmost live entry with token <= addr, wrapping to the
        // last entry for addresses below the first token.
        let n = live.partition_point(|&i| self.entries[i].token <= addr);
        self.entries[live[cyc(n as isize - 1, live.len())]].peer
    }

    /// All contiguous ranges owned by this peer, sorted, with a range
    /// wrapping past the universe end split in two.
    pub fn owned_ranges(&self) -> Vec<Range> {
        self.assert_invariants();
        let live = self.live_indices();
        let mut result = Vec::new();
        for (pos, &i) in live.iter().enumerate() {
            let e = &self.entries[i];
            if e.peer != self.peer {
                continue;
            }
            let next = &self.entries[live[(pos + 1) % live.len()]];
            if next.token == self.start {
                // Last range on the ring, ending exactly at the top.
                result.push(Range {
                    start: e.token,
                    end: self.end,
                });
            } else if next.token <= e.token {
                // Wrapped through the origin; split, keeping the
                // result sorted.
                result.insert(
                    0,
                    Range {
                        start: self.start,
                        end: next.token,
                    },
                );
                result.push(Range {
                    start: e.token,
                    end: self.end,
                });
            } else {
                result.push(Range {
                    start: e.token,
                    end: next.token,
                });
            }
        }
        result
    }

    /// For every live entry owned by this peer: its token and the
    /// (wrap-split) ranges it spans. Used for free-space reporting.
    pub fn owned_entry_spans(&self) -> Vec<(Address, Vec<Range>)> {
        let live = self.live_indices();
        let mut result = Vec::new();
        for (pos, &i) in live.iter().enumerate() {
            let e = &self.entries[i];
            if e.peer != self.peer {
                continue;
            }
            let next = &self.entries[live[(pos + 1) % live.len()]];
            let mut pieces = Vec::with_capacity(2);
            if next.token > e.token {
                pieces.push(Range {
                    start: e.token,
                    end: next.token,
                });
            } else {
                pieces.push(Range {
                    start: e.token,
                    end: self.end,
                });
                if next.token > self.start {
                    pieces.push(Range {
                        start: self.start,
                        end: next.token,
                    });
                }
            }
            result.push((e.token, pieces));
        }
        result
    }

    /// Partition the whole universe among `peers`, one token each,
    /// remainder to the first peers. Only valid on a ring with no live
    /// entries; used once at bootstrap by the election winner.
    pub fn claim_for_peers(&mut self, peers: &[PeerName]) {
        assert!(self.is_empty(), "cannot bootstrap a ring that has entries");
        assert!(!peers.is_empty());
        let total = self.universe_size();
        assert!(
            peers.len() as u32 <= total,
            "more peers than addresses in the universe"
        );
        let share = total / peers.len() as u32;
        let remainder = total % peers.len() as u32;
        let mut pos = self.start;
        for (i, &peer) in peers.iter().enumerate() {
            let size = share + if (i as u32) < remainder { 1 } else { 0 };
            // A tombstone may still sit at this token; resurrect it.
            if let Some(e) = self.get_entry_mut(pos) {
                e.update(peer, size);
            } else {
                self.insert_entry(Entry::new(pos, peer, size));
            }
            pos = pos.add(size);
        }
        assert!(pos == self.end);
        self.assert_invariants();
    }

    /// Reassign `[start, end)` to `peer`. The calling peer must own
    /// every live token in the range; this may insert up to two
    /// boundary tokens, leaving the complement with its current owner.
    /// Precondition violations panic: they are logic bugs, not
    /// gossip-delivery problems.
    pub fn grant_range_to_host(&mut self, start: Address, end: Address, peer: PeerName) {
        self.assert_invariants();
        let length = self.distance(start, end);
        assert!(
            self.start <= start && start < self.end,
            "granting a range outside the universe"
        );
        assert!(
            self.start < end && end <= self.end,
            "granting a range outside the universe"
        );
        assert!(!self.entries.is_empty(), "cannot grant on an empty ring");
        assert!(length > 0, "cannot grant a zero-sized range");

        // The checks run on the ring minus tombstones (a new range may
        // span dead entries), but mutation hits the real entries.
        let live = self.live_indices();
        assert!(!live.is_empty(), "cannot grant on an empty ring");

        let n = live.partition_point(|&i| self.entries[i].token <= start);
        let preceding = n as isize - 1;
        let prev_token = self.entries[live[cyc(preceding, live.len())]].token;
        assert!(
            self.entries[live[cyc(preceding, live.len())]].peer == self.peer,
            "granting in a range we do not own"
        );

        // There is never a token at `self.end`; a grant ending there
        // wants the origin token instead.
        let end_tok = if end == self.end { self.start } else { end };
        let next_token = self.entries[live[cyc(preceding + 1, live.len())]].token;
        assert!(
            token_between(prev_token, next_token, end_tok) || next_token == end_tok,
            "granting a range that spans a live token"
        );

        // Start boundary: take over an existing token or insert one.
        if let Some(e) = self.get_entry_mut(start) {
            e.update(peer, length);
        } else {
            self.insert_entry(Entry::new(start, peer, length));
        }

        // The preceding entry (ours) now ends at `start`.
        if prev_token != start {
            let d = self.distance(prev_token, start);
            let e = self.get_entry_mut(prev_token).expect("token vanished");
            e.free = d;
            e.version += 1;
        }

        // End boundary: we keep the complement, so the token there must
        // be ours and live.
        match self.get_entry(end_tok) {
            Some(e) if e.is_live() => {}
            Some(_) => {
                // Resurrect the tombstone for ourselves. `next_token`
                // may equal the entry after it, which only
                // under-reports free space until the next report pass.
                let me = self.peer;
                let f = self.distance(end_tok, next_token);
                let e = self.get_entry_mut(end_tok).expect("token vanished");
                e.update(me, f);
            }
            None => {
                let f = self.distance(end_tok, next_token);
                self.insert_entry(Entry::new(end_tok, self.peer, f));
            }
        }
        self.assert_invariants();
    }

    /// CRDT join with a gossiped ring. Returns whether the local ring
    /// changed, so callers can tell fresh news from an echo. On error
    /// the local ring is untouched; the error tells the caller whether
    /// the input was malformed or conflicts with a range we still
    /// believe we own.
    pub fn merge(&mut self, gossip: Ring) -> WeftResult<bool> {
        self.assert_invariants();
        // Validate the input without panicking: a malformed peer must
        // not corrupt us.
        gossip.check_invariants()?;
        if self.start != gossip.start || self.end != gossip.end {
            return Err(WeftError::DifferentUniverse);
        }

        // Receiving a ring in which we are tombstoned means an operator
        // declared this peer dead. Continuing could double-allocate.
        for e in &gossip.entries {
            if e.peer == self.peer && e.tombstone > 0 {
                panic!("ring merge: this peer has been tombstoned by the cluster");
            }
        }

        let mut result: Vec<Entry> = Vec::with_capacity(self.entries.len() + gossip.entries.len());
        let mut previous_owner: Option<PeerName> = None;
        let mut i = 0;
        let mut j = 0;
        while i < self.entries.len() && j < gossip.entries.len() {
            let mine = &self.entries[i];
            let theirs = &gossip.entries[j];
            match mine.token.cmp(&theirs.token) {
                std::cmp::Ordering::Less => {
                    if mine.is_live() {
                        previous_owner = Some(mine.peer);
                    }
                    result.push(mine.clone());
                    i += 1;
                }
                std::cmp::Ordering::Greater => {
                    // A new token: make sure it is not slicing into a
                    // range we still believe is ours.
                    if previous_owner == Some(self.peer) && theirs.peer != self.peer {
                        return Err(WeftError::EntryInMyRange);
                    }
                    result.push(theirs.clone());
                    previous_owner = None;
                    j += 1;
                }
                std::cmp::Ordering::Equal => {
                    if mine.version >= theirs.version {
                        if mine.version == theirs.version && mine != theirs {
                            debug!(token = %mine.token, "conflicting entries at equal version");
                            return Err(WeftError::InvalidEntry);
                        }
                        if mine.is_live() {
                            previous_owner = Some(mine.peer);
                        }
                        result.push(mine.clone());
                    } else {
                        // We should never hear news about our own token.
                        if mine.peer == self.peer {
                            return Err(WeftError::NewerVersion);
                        }
                        result.push(theirs.clone());
                        previous_owner = None;
                    }
                    i += 1;
                    j += 1;
                }
            }
        }
        while i < self.entries.len() {
            result.push(self.entries[i].clone());
            i += 1;
        }
        while j < gossip.entries.len() {
            let theirs = &gossip.entries[j];
            if previous_owner == Some(self.peer) && theirs.peer != self.peer {
                return Err(WeftError::EntryInMyRange);
            }
            result.push(theirs.clone());
            previous_owner = None;
            j += 1;
        }

        let changed = self.entries != result;
        self.entries = result;
        self.assert_invariants();
        Ok(changed)
    }

    /// Pick a peer to beg for space, weighted by the free counts it
    /// gossiped. Tombstoned peers report no free space and are never
    /// chosen.
    pub fn choose_peer_to_ask_for_space<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
    ) -> WeftResult<PeerName> {
        let mut total: BTreeMap<PeerName, u64> = BTreeMap::new();
        for &i in &self.live_indices() {
            let e = &self.entries[i];
            if e.free == 0 || e.peer == self.peer {
                continue;
            }
            *total.entry(e.peer).or_insert(0) += u64::from(e.free);
        }
        let sum: u64 = total.values().sum();
        if sum == 0 {
            return Err(WeftError::NoFreeSpace);
        }
        let mut rn = rng.gen_range(0..sum);
        for (peer, space) in &total {
            if rn < *space {
                return Ok(*peer);
            }
            rn -= space;
        }
        unreachable!("weighted choice ran past the total");
    }

    /// Mark every entry owned by `peer` dead, expiring `timeout`
    /// seconds from `now`.
    pub fn tombstone_peer(&mut self, peer: PeerName, timeout: i64, now: i64) -> WeftResult<()> {
        self.assert_invariants();
        if timeout <= 0 {
            return Err(WeftError::InvalidTimeout);
        }
        let deadline = now + timeout;
        let mut found = false;
        for e in &mut self.entries {
            if e.peer == peer {
                found = true;
                e.tombstone = deadline;
                e.version += 1;
            }
        }
        if !found {
            return Err(WeftError::NoPeerEntries { peer });
        }
        self.assert_invariants();
        Ok(())
    }

    /// Drop tombstones whose deadline has passed. Returns true if
    /// anything was removed (the caller's owned ranges may have grown).
    pub fn expire_tombstones(&mut self, now: i64) -> bool {
        let before = self.entries.len();
        self.entries
            .retain(|e| e.tombstone == 0 || e.tombstone > now);
        self.assert_invariants();
        self.entries.len() != before
    }

    /// Record how many addresses are actually free in the range whose
    /// entry starts at `token`, so other peers can target their space
    /// requests. Only bumps the version when the count changes.
    pub fn report_free(&mut self, token: Address, free: Offset) {
        let live = self.live_indices();
        let pos = live
            .iter()
            .position(|&i| self.entries[i].token == token)
            .expect("reporting free space on a token we do not hold");
        let idx = live[pos];
        assert!(
            self.entries[idx].peer == self.peer,
            "reporting free space on a range we do not own"
        );
        let next_token = self.entries[live[(pos + 1) % live.len()]].token;
        let max = self.distance(token, next_token);
        assert!(free <= max, "reporting more free space than the range holds");
        if self.entries[idx].free != free {
            self.entries[idx].free = free;
            self.entries[idx].version += 1;
        }
    }

    /// Every peer named anywhere on the ring, tombstoned or not.
    pub fn peer_names(&self) -> BTreeSet<PeerName> {
        self.entries.iter().map(|e| e.peer).collect()
    }

    /// Advisory sum of free addresses reported by other peers.
    pub fn total_remote_free(&self) -> u64 {
        self.entries
            .iter()
            .filter(|e| e.is_live() && e.peer != self.peer)
            .map(|e| u64::from(e.free))
            .sum()
    }

    pub fn encode(&self) -> Vec<u8> {
        bincode::serialize(self).expect("ring serialization cannot fail")
    }

    pub fn decode(buf: &[u8]) -> WeftResult<Ring> {
        bincode::deserialize(buf).map_err(|e| WeftError::Codec(e.to_string()))
    }
}

impl fmt::Display for Ring {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for e in &self.entries {
            writeln!(
                f,
                "{} -> {} (tombstone {}, v{}, free {})",
                e.token, e.peer, e.tombstone, e.version, e.free
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn addr(s: &str) -> Address {
        s.parse().unwrap()
    }

    fn peer(s: &str) -> PeerName {
        s.parse().unwrap()
    }

    fn p1() -> PeerName {
        peer("01:00:00:00:02:00")
    }

    fn p2() -> PeerName {
        peer("02:00:00:00:02:00")
    }

    fn p3() -> PeerName {
        peer("03:00:00:00:02:00")
    }

    fn test_ring(owner: PeerName) -> Ring {
        Ring::new(addr("10.0.0.0"), addr("10.0.0.255"), owner)
    }

    fn raw_entry(token: &str, peer: PeerName) -> Entry {
        Entry::new(addr(token), peer, 0)
    }

    #[test]
    fn test_invariants() {
        let mut ring = test_ring(p1());
        ring.entries = vec![raw_entry("10.0.0.245", p1()), raw_entry("10.0.0.10", p2())];
        assert_eq!(ring.check_invariants(), Err(WeftError::NotSorted));

        ring.entries = vec![raw_entry("10.0.0.245", p1()), raw_entry("10.0.0.245", p2())];
        assert_eq!(ring.check_invariants(), Err(WeftError::TokenRepeated));

        let mut ring = Ring::new(addr("10.0.0.10"), addr("10.0.0.245"), p1());
        ring.entries = vec![raw_entry("10.0.0.0", p1())];
        assert_eq!(ring.check_invariants(), Err(WeftError::TokenOutOfRange));

        ring.entries = vec![raw_entry("10.0.0.245", p1())];
        assert_eq!(ring.check_invariants(), Err(WeftError::TokenOutOfRange));

        let mut ring = test_ring(p1());
        ring.entries = vec![Entry::new(addr("10.0.0.10"), p1(), 250)];
        assert_eq!(ring.check_invariants(), Err(WeftError::TooMuchFreeSpace));
    }

    #[test]
    fn test_claim_for_single_peer() {
        let mut ring = test_ring(p1());
        ring.claim_for_peers(&[p1()]);
        assert_eq!(ring.entries.len(), 1);
        assert_eq!(ring.entries[0].token, addr("10.0.0.0"));
        assert_eq!(ring.entries[0].free, 255);
        assert_eq!(ring.owner(addr("10.0.0.100")), p1());
        assert_eq!(
            ring.owned_ranges(),
            vec![Range {
                start: addr("10.0.0.0"),
                end: addr("10.0.0.255"),
            }]
        );
    }

    #[test]
    fn test_claim_for_peers_shares() {
        let mut ring = Ring::new(addr("10.0.0.0"), addr("10.0.0.16"), p1());
        ring.claim_for_peers(&[p1(), p2(), p3()]);
        // 16 = 6 + 5 + 5
        let sizes: Vec<u32> = ring.entries.iter().map(|e| e.free).collect();
        assert_eq!(sizes, vec![6, 5, 5]);
        assert_eq!(ring.entries[0].token, addr("10.0.0.0"));
        assert_eq!(ring.entries[1].token, addr("10.0.0.6"));
        assert_eq!(ring.entries[2].token, addr("10.0.0.11"));
        assert_eq!(ring.owner(addr("10.0.0.12")), p3());
    }

    #[test]
    fn test_owner_empty_ring() {
        let ring = test_ring(p1());
        assert_eq!(ring.owner(addr("10.0.0.1")), PeerName::UNKNOWN);
    }

    #[test]
    fn test_grant_simple() {
        let mut ring1 = test_ring(p1());
        ring1.claim_for_peers(&[p1()]);

        // Grant everything to peer2
        ring1.grant_range_to_host(addr("10.0.0.0"), addr("10.0.0.255"), p2());
        assert_eq!(ring1.entries.len(), 1);
        assert_eq!(ring1.entries[0].peer, p2());
        assert_eq!(ring1.entries[0].version, 1);
        assert_eq!(ring1.entries[0].free, 255);

        // peer2 grants the tail back to peer1
        let mut ring2 = test_ring(p2());
        ring2.entries = ring1.entries.clone();
        ring2.grant_range_to_host(addr("10.0.0.10"), addr("10.0.0.255"), p1());
        assert_eq!(ring2.entries.len(), 2);
        assert_eq!(ring2.entries[0].peer, p2());
        assert_eq!(ring2.entries[0].free, 10);
        assert_eq!(ring2.entries[0].version, 2);
        assert_eq!(ring2.entries[1].token, addr("10.0.0.10"));
        assert_eq!(ring2.entries[1].peer, p1());
        assert_eq!(ring2.entries[1].free, 245);

        // and peer1 splits its own range in the middle
        let mut ring3 = test_ring(p1());
        ring3.entries = ring2.entries.clone();
        ring3.grant_range_to_host(addr("10.0.0.245"), addr("10.0.0.255"), p2());
        assert_eq!(ring3.entries.len(), 3);
        assert_eq!(ring3.entries[1].free, 235);
        assert_eq!(ring3.entries[1].version, 1);
        assert_eq!(ring3.entries[2].token, addr("10.0.0.245"));
        assert_eq!(ring3.entries[2].peer, p2());
        assert_eq!(ring3.entries[2].free, 10);
    }

    #[test]
    fn test_grant_middle_inserts_end_token() {
        let mut ring = test_ring(p1());
        ring.claim_for_peers(&[p1()]);
        ring.grant_range_to_host(addr("10.0.0.10"), addr("10.0.0.20"), p2());
        assert_eq!(ring.entries.len(), 3);
        assert_eq!(ring.owner(addr("10.0.0.5")), p1());
        assert_eq!(ring.owner(addr("10.0.0.15")), p2());
        assert_eq!(ring.owner(addr("10.0.0.20")), p1());
        // our complement token was inserted at the end of the grant
        assert_eq!(ring.entries[2].token, addr("10.0.0.20"));
        assert_eq!(ring.entries[2].peer, p1());
    }

    #[test]
    fn test_grant_resurrects_tombstoned_end_token() {
        let mut ring = test_ring(p1());
        ring.claim_for_peers(&[p1()]);
        ring.grant_range_to_host(addr("10.0.0.128"), addr("10.0.0.255"), p2());
        ring.tombstone_peer(p2(), 100, 1000).unwrap();

        // The grant ends on peer2's dead token, so we take it over.
        ring.grant_range_to_host(addr("10.0.0.96"), addr("10.0.0.128"), p3());
        assert_eq!(ring.entries.len(), 3);
        assert_eq!(ring.entries[1].token, addr("10.0.0.96"));
        assert_eq!(ring.entries[1].peer, p3());
        let e = &ring.entries[2];
        assert_eq!(e.token, addr("10.0.0.128"));
        assert_eq!(e.peer, p1());
        assert!(e.is_live());
        assert_eq!(e.free, 127);
        assert_eq!(ring.owner(addr("10.0.0.200")), p1());
    }

    #[test]
    #[should_panic(expected = "granting in a range we do not own")]
    fn test_grant_unowned_panics() {
        let mut ring = test_ring(p2());
        let mut seed = test_ring(p1());
        seed.claim_for_peers(&[p1()]);
        ring.entries = seed.entries;
        ring.grant_range_to_host(addr("10.0.0.10"), addr("10.0.0.20"), p3());
    }

    #[test]
    fn test_merge_adopts_remote_ring() {
        let mut ring1 = test_ring(p1());
        ring1.claim_for_peers(&[p1()]);
        ring1.grant_range_to_host(addr("10.0.0.128"), addr("10.0.0.255"), p2());

        let mut ring2 = test_ring(p2());
        assert!(ring2.merge(ring1.clone()).unwrap());
        assert_eq!(ring1.entries, ring2.entries);
        // An echo of the same ring is a no-op.
        assert!(!ring2.merge(ring1.clone()).unwrap());
        assert_eq!(
            ring2.owned_ranges(),
            vec![Range {
                start: addr("10.0.0.128"),
                end: addr("10.0.0.255"),
            }]
        );
    }

    #[test]
    fn test_merge_rejects_different_universe() {
        let mut ring1 = test_ring(p1());
        ring1.claim_for_peers(&[p1()]);
        let mut other = Ring::new(addr("10.0.1.0"), addr("10.0.1.255"), p2());
        other.claim_for_peers(&[p2()]);
        assert_eq!(ring1.merge(other), Err(WeftError::DifferentUniverse));
    }

    #[test]
    fn test_merge_rejects_entry_in_my_range() {
        let mut ring1 = test_ring(p1());
        ring1.claim_for_peers(&[p1()]);

        // A remote ring claims a slice out of our range without us
        // having granted it.
        let mut rogue = test_ring(p3());
        rogue.entries = vec![Entry::new(addr("10.0.0.50"), p3(), 100)];
        assert_eq!(ring1.merge(rogue), Err(WeftError::EntryInMyRange));
    }

    #[test]
    fn test_merge_rejects_newer_version_of_our_token() {
        let mut ring1 = test_ring(p1());
        ring1.claim_for_peers(&[p1()]);

        let mut rogue = test_ring(p2());
        rogue.entries = ring1.entries.clone();
        rogue.entries[0].version += 1;
        assert_eq!(ring1.merge(rogue), Err(WeftError::NewerVersion));
    }

    #[test]
    fn test_merge_rejects_conflict_at_equal_version() {
        let mut ring1 = test_ring(p1());
        ring1.claim_for_peers(&[p2()]);

        let mut rogue = test_ring(p3());
        rogue.entries = ring1.entries.clone();
        rogue.entries[0].peer = p3();
        assert_eq!(ring1.merge(rogue), Err(WeftError::InvalidEntry));
    }

    #[test]
    fn test_merge_does_not_mutate_on_error() {
        let mut ring1 = test_ring(p1());
        ring1.claim_for_peers(&[p1()]);
        let before = ring1.entries.clone();

        let mut malformed = test_ring(p2());
        malformed.entries = vec![raw_entry("10.0.0.5", p2()), raw_entry("10.0.0.1", p2())];
        assert!(ring1.merge(malformed).is_err());
        assert_eq!(ring1.entries, before);
    }

    #[test]
    #[should_panic(expected = "tombstoned")]
    fn test_merge_panics_when_we_are_tombstoned() {
        let mut ring1 = test_ring(p1());
        ring1.claim_for_peers(&[p1()]);

        let mut gossip = ring1.clone();
        gossip.peer = p2();
        gossip.entries[0].tombstone = 12345;
        gossip.entries[0].version += 1;
        ring1.merge(gossip).unwrap();
    }

    // Rings derived from a common ancestor by grants inside each
    // peer's own share must merge to the same result in any order.
    #[test]
    fn test_merge_order_independent() {
        let mut ancestor = test_ring(p1());
        ancestor.claim_for_peers(&[p1(), p2(), p3()]);

        let mut a = ancestor.clone();
        a.grant_range_to_host(addr("10.0.0.10"), addr("10.0.0.20"), p2());

        let mut b = ancestor.clone();
        b.peer = p2();
        b.grant_range_to_host(addr("10.0.0.100"), addr("10.0.0.120"), p3());

        let mut c = ancestor.clone();
        c.peer = p3();
        c.grant_range_to_host(addr("10.0.0.200"), addr("10.0.0.220"), p1());

        let mut ab_c = test_ring(peer("04:00:00:00:02:00"));
        ab_c.merge(a.clone()).unwrap();
        ab_c.merge(b.clone()).unwrap();
        ab_c.merge(c.clone()).unwrap();

        let mut ac_b = test_ring(peer("04:00:00:00:02:00"));
        ac_b.merge(a).unwrap();
        ac_b.merge(c).unwrap();
        ac_b.merge(b).unwrap();

        assert_eq!(ab_c.entries, ac_b.entries);
    }

    #[test]
    fn test_owned_ranges_split_around_origin() {
        let mut ring = test_ring(p1());
        // Single entry not at the origin: range wraps and is split.
        ring.entries = vec![Entry::new(addr("10.0.0.10"), p1(), 0)];
        assert_eq!(
            ring.owned_ranges(),
            vec![
                Range {
                    start: addr("10.0.0.0"),
                    end: addr("10.0.0.10"),
                },
                Range {
                    start: addr("10.0.0.10"),
                    end: addr("10.0.0.255"),
                },
            ]
        );
    }

    #[test]
    fn test_tombstone_and_expiry() {
        let mut ring = test_ring(p1());
        ring.claim_for_peers(&[p1()]);
        ring.grant_range_to_host(addr("10.0.0.128"), addr("10.0.0.255"), p2());

        assert_eq!(
            ring.tombstone_peer(p3(), 100, 1000),
            Err(WeftError::NoPeerEntries { peer: p3() })
        );
        assert_eq!(
            ring.tombstone_peer(p2(), 0, 1000),
            Err(WeftError::InvalidTimeout)
        );

        ring.tombstone_peer(p2(), 100, 1000).unwrap();
        // Dead entries are excluded from ownership queries; our range
        // now extends through them.
        assert_eq!(ring.owner(addr("10.0.0.200")), p1());
        assert_eq!(
            ring.owned_ranges(),
            vec![Range {
                start: addr("10.0.0.0"),
                end: addr("10.0.0.255"),
            }]
        );

        assert!(!ring.expire_tombstones(1099));
        assert!(ring.expire_tombstones(1100));
        assert_eq!(ring.entries.len(), 1);
    }

    #[test]
    fn test_choose_peer_weighted() {
        let mut ring = test_ring(p1());
        ring.entries = vec![
            Entry::new(addr("10.0.0.0"), p1(), 0),
            Entry::new(addr("10.0.0.128"), p2(), 100),
        ];
        let mut rng = StdRng::seed_from_u64(1);
        // p1 is us and reports nothing; p2 is the only candidate.
        for _ in 0..10 {
            assert_eq!(ring.choose_peer_to_ask_for_space(&mut rng).unwrap(), p2());
        }

        ring.entries[1].free = 0;
        assert_eq!(
            ring.choose_peer_to_ask_for_space(&mut rng),
            Err(WeftError::NoFreeSpace)
        );

        // Tombstoned peers are never chosen, whatever they last
        // reported.
        ring.entries[1].free = 100;
        ring.entries[1].tombstone = 99;
        assert_eq!(
            ring.choose_peer_to_ask_for_space(&mut rng),
            Err(WeftError::NoFreeSpace)
        );
    }

    #[test]
    fn test_report_free() {
        let mut ring = test_ring(p1());
        ring.claim_for_peers(&[p1()]);
        let v = ring.entries[0].version;
        ring.report_free(addr("10.0.0.0"), 200);
        assert_eq!(ring.entries[0].free, 200);
        assert_eq!(ring.entries[0].version, v + 1);
        // Reporting the same number again must not churn the version.
        ring.report_free(addr("10.0.0.0"), 200);
        assert_eq!(ring.entries[0].version, v + 1);
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let mut ring = test_ring(p1());
        ring.claim_for_peers(&[p1()]);
        ring.grant_range_to_host(addr("10.0.0.100"), addr("10.0.0.200"), p2());
        ring.tombstone_peer(p2(), 60, 5000).unwrap();

        let buf = ring.encode();
        let decoded = Ring::decode(&buf).unwrap();
        assert_eq!(ring, decoded);
        // Byte-identical re-encoding: the equal-version merge check
        // depends on it.
        assert_eq!(buf, decoded.encode());
    }
}

//! The set of spaces a peer owns, and the donation heuristic.

use tracing::debug;

use weft_proto::address::{Address, Offset, Range};
use weft_proto::defaults::{MAX_ADDRESSES_TO_GIVE_UP, MIN_SAFE_FREE_ADDRESSES};
use weft_proto::error::{WeftError, WeftResult};

use crate::space::Space;

/// All the spaces this peer may allocate from, sorted by start
/// address and pairwise disjoint.
#[derive(Debug, Clone, Default)]
pub struct SpaceSet {
    spaces: Vec<Space>,
}

impl SpaceSet {
    pub fn new() -> SpaceSet {
        SpaceSet { spaces: Vec::new() }
    }

    pub fn spaces(&self) -> &[Space] {
        &self.spaces
    }

    pub fn add_space(&mut self, space: Space) {
        let i = self
            .spaces
            .partition_point(|s| s.start() < space.start());
        if let Some(prev) = i.checked_sub(1).and_then(|p| self.spaces.get(p)) {
            assert!(prev.end() <= space.start(), "overlapping spaces");
        }
        if let Some(next) = self.spaces.get(i) {
            assert!(space.end() <= next.start(), "overlapping spaces");
        }
        self.spaces.insert(i, space);
    }

    /// Does any space cover `addr`?
    pub fn contains(&self, addr: Address) -> bool {
        self.spaces.iter().any(|s| s.contains(addr))
    }

    /// Do the current spaces cover `range` entirely?
    pub fn covers(&self, range: &Range) -> bool {
        self.uncovered(range).is_empty()
    }

    /// The sub-ranges of `range` no space covers yet. Used to decide
    /// what to add when the ring hands this peer new territory.
    pub fn uncovered(&self, range: &Range) -> Vec<Range> {
        let mut gaps = Vec::new();
        let mut pos = range.start;
        for s in &self.spaces {
            if s.end() <= pos {
                continue;
            }
            if s.start() >= range.end {
                break;
            }
            if s.start() > pos {
                gaps.push(Range {
                    start: pos,
                    end: s.start(),
                });
            }
            pos = s.end();
            if pos >= range.end {
                return gaps;
            }
        }
        if pos < range.end {
            gaps.push(Range {
                start: pos,
                end: range.end,
            });
        }
        gaps
    }

    pub fn num_free_addresses(&self) -> u64 {
        self.spaces.iter().map(|s| u64::from(s.num_free())).sum()
    }

    pub fn num_free_addresses_in_range(&self, r: &Range) -> Offset {
        self.spaces.iter().map(|s| s.num_free_in_range(r)).sum()
    }

    /// Hand out the lowest free address across all spaces.
    pub fn allocate(&mut self) -> Option<Address> {
        self.spaces.iter_mut().find_map(|s| s.allocate())
    }

    pub fn free(&mut self, addr: Address) -> WeftResult<()> {
        match self.spaces.iter_mut().find(|s| s.contains(addr)) {
            Some(s) => s.free(addr),
            None => Err(WeftError::AddressOutOfSpace),
        }
    }

    /// Mark `addr` allocated. Fails only if no space covers it.
    pub fn claim(&mut self, addr: Address) -> WeftResult<()> {
        if self.spaces.iter_mut().any(|s| s.claim(addr)) {
            Ok(())
        } else {
            Err(WeftError::AddressOutOfSpace)
        }
    }

    /// Carve out a free range to donate to a peer asking for space.
    ///
    /// Takes the tail of the biggest free chunk, capped at
    /// [`MAX_ADDRESSES_TO_GIVE_UP`] and at half our total free
    /// addresses, and refuses entirely when we are nearly out
    /// ourselves.
    pub fn give_up_space(&mut self) -> Option<Range> {
        let total_free = self.num_free_addresses();
        if total_free < u64::from(MIN_SAFE_FREE_ADDRESSES) {
            debug!(total_free, "not donating, too little free space left");
            return None;
        }

        let (idx, chunk) = self
            .spaces
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.biggest_free_chunk().map(|c| (i, c)))
            .max_by_key(|(_, c)| c.size())?;

        let mut give = chunk.size().min(MAX_ADDRESSES_TO_GIVE_UP);
        give = give.min((total_free / 2) as Offset);
        if give == 0 {
            return None;
        }
        let donation = Range {
            start: chunk.start.add(chunk.size() - give),
            end: chunk.end,
        };
        self.carve(idx, donation);
        Some(donation)
    }

    // Remove `r` (which must be entirely free) from the space at
    // `idx`, splitting the space around it.
    fn carve(&mut self, idx: usize, r: Range) {
        let space = self.spaces.remove(idx);
        assert!(
            space.start() <= r.start && r.end <= space.end(),
            "carving a range the space does not cover"
        );
        let (left, rest) = if r.start > space.start() {
            let (l, rest) = space.split(r.start);
            (Some(l), rest)
        } else {
            (None, space)
        };
        let (middle, right) = if r.end < rest.end() {
            let (m, t) = rest.split(r.end);
            (m, Some(t))
        } else {
            (rest, None)
        };
        assert!(middle.is_all_free(), "carving allocated addresses");
        // Reinsert in order; the middle is gone.
        if let Some(t) = right {
            self.spaces.insert(idx, t);
        }
        if let Some(l) = left {
            self.spaces.insert(idx, l);
        }
    }
}

//! A contiguous block of addresses this peer may allocate from.
//!
//! Allocation state is a high-water mark plus a sorted free list of
//! addresses returned below it. Addresses above the mark have never
//! been handed out, so the free list stays small in the common case.

use weft_proto::address::{Address, Offset, Range};
use weft_proto::error::{WeftError, WeftResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Space {
    start: Address,
    size: Offset,
    /// Addresses in `[start, start + max_allocated)` have been handed
    /// out at some point; the rest are untouched.
    max_allocated: Offset,
    /// Sorted list of returned addresses below the high-water mark.
    free_list: Vec<Address>,
}

impl Space {
    pub fn new(start: Address, size: Offset) -> Space {
        assert!(size > 0, "empty space");
        Space {
            start,
            size,
            max_allocated: 0,
            free_list: Vec::new(),
        }
    }

    pub fn start(&self) -> Address {
        self.start
    }

    pub fn size(&self) -> Offset {
        self.size
    }

    pub fn end(&self) -> Address {
        self.start.add(self.size)
    }

    pub fn range(&self) -> Range {
        Range {
            start: self.start,
            end: self.end(),
        }
    }

    pub fn contains(&self, addr: Address) -> bool {
        addr >= self.start && addr < self.end()
    }

    pub fn num_free(&self) -> Offset {
        (self.size - self.max_allocated) + self.free_list.len() as Offset
    }

    /// Hand out the lowest free address, or None if the space is full.
    pub fn allocate(&mut self) -> Option<Address> {
        if !self.free_list.is_empty() {
            return Some(self.free_list.remove(0));
        }
        if self.max_allocated < self.size {
            let addr = self.start.add(self.max_allocated);
            self.max_allocated += 1;
            Some(addr)
        } else {
            None
        }
    }

    /// Return an address to the space.
    pub fn free(&mut self, addr: Address) -> WeftResult<()> {
        if !self.contains(addr) {
            return Err(WeftError::AddressOutOfSpace);
        }
        if addr.subtract(self.start) >= self.max_allocated {
            return Err(WeftError::NotAllocated);
        }
        match self.free_list.binary_search(&addr) {
            Ok(_) => return Err(WeftError::DuplicateFree),
            Err(i) => self.free_list.insert(i, addr),
        }
        self.drain_trailing();
        Ok(())
    }

    /// Mark a specific address as allocated, whatever its current
    /// state. Returns false if the address is outside this space, true
    /// otherwise (including when it was already allocated; ownership
    /// bookkeeping is the caller's problem).
    pub fn claim(&mut self, addr: Address) -> bool {
        if !self.contains(addr) {
            return false;
        }
        let offset = addr.subtract(self.start);
        if offset >= self.max_allocated {
            // Everything between the mark and the claimed address is
            // still free; record it before moving the mark past it.
            for i in self.max_allocated..offset {
                self.free_list.push(self.start.add(i));
            }
            self.max_allocated = offset + 1;
        } else if let Ok(i) = self.free_list.binary_search(&addr) {
            self.free_list.remove(i);
        }
        true
    }

    // Pull the high-water mark back over any free addresses directly
    // below it, so they rejoin the untouched tail.
    fn drain_trailing(&mut self) {
        while self.max_allocated > 0 {
            match self.free_list.last() {
                Some(&last) if last == self.start.add(self.max_allocated - 1) => {
                    self.free_list.pop();
                    self.max_allocated -= 1;
                }
                _ => break,
            }
        }
    }

    /// The largest contiguous run of free addresses, if any. Ties go
    /// to the lowest run.
    pub fn biggest_free_chunk(&self) -> Option<Range> {
        let mut best: Option<Range> = None;
        let mut consider = |r: Range| {
            if best.map_or(true, |b| r.size() > b.size()) {
                best = Some(r);
            }
        };
        let mut i = 0;
        while i < self.free_list.len() {
            let run_start = self.free_list[i];
            let mut j = i + 1;
            while j < self.free_list.len()
                && self.free_list[j] == run_start.add((j - i) as Offset)
            {
                j += 1;
            }
            consider(Range {
                start: run_start,
                end: run_start.add((j - i) as Offset),
            });
            i = j;
        }
        if self.max_allocated < self.size {
            consider(Range {
                start: self.start.add(self.max_allocated),
                end: self.end(),
            });
        }
        best
    }

    /// Free addresses inside `r`, which need not be contained in this
    /// space.
    pub fn num_free_in_range(&self, r: &Range) -> Offset {
        let from_list = self
            .free_list
            .iter()
            .filter(|a| r.contains(**a))
            .count() as Offset;
        let tail = Range {
            start: self.start.add(self.max_allocated),
            end: self.end(),
        };
        from_list + tail.overlap(r)
    }

    /// Split into `[start, addr)` and `[addr, end)`, preserving the
    /// allocation state of both halves.
    pub fn split(self, addr: Address) -> (Space, Space) {
        assert!(
            addr > self.start && addr < self.end(),
            "split point outside the space"
        );
        let cut = addr.subtract(self.start);
        let (left_free, right_free): (Vec<Address>, Vec<Address>) =
            self.free_list.into_iter().partition(|a| *a < addr);
        let mut left = Space {
            start: self.start,
            size: cut,
            max_allocated: self.max_allocated.min(cut),
            free_list: left_free,
        };
        let mut right = Space {
            start: addr,
            size: self.size - cut,
            max_allocated: self.max_allocated.saturating_sub(cut),
            free_list: right_free,
        };
        left.drain_trailing();
        right.drain_trailing();
        (left, right)
    }

    /// True if no address in this space is currently allocated.
    pub fn is_all_free(&self) -> bool {
        self.num_free() == self.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> Address {
        s.parse().unwrap()
    }

    #[test]
    fn test_allocate_sequential() {
        let mut space = Space::new(addr("10.0.3.4"), 4);
        assert_eq!(space.num_free(), 4);
        assert_eq!(space.allocate(), Some(addr("10.0.3.4")));
        assert_eq!(space.allocate(), Some(addr("10.0.3.5")));
        assert_eq!(space.allocate(), Some(addr("10.0.3.6")));
        assert_eq!(space.allocate(), Some(addr("10.0.3.7")));
        assert_eq!(space.allocate(), None);
        assert_eq!(space.num_free(), 0);
    }

    #[test]
    fn test_free_reuses_lowest() {
        let mut space = Space::new(addr("10.0.3.0"), 16);
        for _ in 0..4 {
            space.allocate().unwrap();
        }
        space.free(addr("10.0.3.2")).unwrap();
        space.free(addr("10.0.3.0")).unwrap();
        assert_eq!(space.allocate(), Some(addr("10.0.3.0")));
        assert_eq!(space.allocate(), Some(addr("10.0.3.2")));
        assert_eq!(space.allocate(), Some(addr("10.0.3.4")));
    }

    #[test]
    fn test_free_errors() {
        let mut space = Space::new(addr("10.0.3.0"), 16);
        space.allocate().unwrap();
        assert_eq!(space.free(addr("10.0.4.0")), Err(WeftError::AddressOutOfSpace));
        assert_eq!(space.free(addr("10.0.3.5")), Err(WeftError::NotAllocated));
        space.free(addr("10.0.3.0")).unwrap();
        // The trailing drain pulled the mark back to zero, so a second
        // free sees the address as never allocated.
        assert_eq!(space.free(addr("10.0.3.0")), Err(WeftError::NotAllocated));
    }

    #[test]
    fn test_duplicate_free() {
        let mut space = Space::new(addr("10.0.3.0"), 16);
        space.allocate().unwrap();
        space.allocate().unwrap();
        space.free(addr("10.0.3.0")).unwrap();
        assert_eq!(space.free(addr("10.0.3.0")), Err(WeftError::DuplicateFree));
    }

    #[test]
    fn test_trailing_drain() {
        let mut space = Space::new(addr("10.0.3.0"), 16);
        for _ in 0..5 {
            space.allocate().unwrap();
        }
        space.free(addr("10.0.3.2")).unwrap();
        space.free(addr("10.0.3.4")).unwrap();
        space.free(addr("10.0.3.3")).unwrap();
        // Freeing 3 and 4 with 2 already free drains the mark back to
        // 2 allocations.
        assert_eq!(space.num_free(), 14);
        assert_eq!(space.allocate(), Some(addr("10.0.3.2")));
    }

    #[test]
    fn test_claim_backfills_gap() {
        let mut space = Space::new(addr("10.0.3.0"), 16);
        assert!(space.claim(addr("10.0.3.5")));
        // 0..5 are now tracked free addresses, 5 is allocated.
        assert_eq!(space.num_free(), 15);
        assert_eq!(space.allocate(), Some(addr("10.0.3.0")));
        assert_eq!(space.free(addr("10.0.3.5")), Ok(()));
        assert!(!space.claim(addr("10.0.4.0")));
    }

    #[test]
    fn test_claim_from_free_list() {
        let mut space = Space::new(addr("10.0.3.0"), 16);
        for _ in 0..3 {
            space.allocate().unwrap();
        }
        space.free(addr("10.0.3.1")).unwrap();
        assert!(space.claim(addr("10.0.3.1")));
        assert_eq!(space.allocate(), Some(addr("10.0.3.3")));
        // Claiming an already-allocated address is a no-op here.
        assert!(space.claim(addr("10.0.3.1")));
        assert_eq!(space.num_free(), 12);
    }

    #[test]
    fn test_biggest_free_chunk() {
        let mut space = Space::new(addr("10.0.3.0"), 16);
        assert_eq!(
            space.biggest_free_chunk(),
            Some(Range {
                start: addr("10.0.3.0"),
                end: addr("10.0.3.16"),
            })
        );
        for _ in 0..10 {
            space.allocate().unwrap();
        }
        space.free(addr("10.0.3.2")).unwrap();
        space.free(addr("10.0.3.3")).unwrap();
        space.free(addr("10.0.3.4")).unwrap();
        // The 6-address tail still beats the 3-address interior run.
        assert_eq!(
            space.biggest_free_chunk(),
            Some(Range {
                start: addr("10.0.3.10"),
                end: addr("10.0.3.16"),
            })
        );
        for i in 0..6 {
            space.claim(addr("10.0.3.10").add(i));
        }
        // Tail exhausted; the interior run is all that is left.
        let chunk = space.biggest_free_chunk().unwrap();
        assert_eq!(chunk.start, addr("10.0.3.2"));
        assert_eq!(chunk.size(), 3);
    }

    #[test]
    fn test_split_preserves_state() {
        let mut space = Space::new(addr("10.0.3.0"), 16);
        for _ in 0..10 {
            space.allocate().unwrap();
        }
        space.free(addr("10.0.3.3")).unwrap();
        space.free(addr("10.0.3.8")).unwrap();

        let total_free = space.num_free();
        let (mut left, mut right) = space.split(addr("10.0.3.6"));
        assert_eq!(left.range().start, addr("10.0.3.0"));
        assert_eq!(left.size(), 6);
        assert_eq!(right.range().start, addr("10.0.3.6"));
        assert_eq!(right.size(), 10);
        assert_eq!(left.num_free() + right.num_free(), total_free);
        assert_eq!(left.allocate(), Some(addr("10.0.3.3")));
        assert_eq!(right.allocate(), Some(addr("10.0.3.8")));
    }

    #[test]
    fn test_num_free_in_range() {
        let mut space = Space::new(addr("10.0.3.0"), 16);
        for _ in 0..8 {
            space.allocate().unwrap();
        }
        space.free(addr("10.0.3.2")).unwrap();
        let r = Range {
            start: addr("10.0.3.0"),
            end: addr("10.0.3.10"),
        };
        // One free-list entry plus the tail overlap 8..10.
        assert_eq!(space.num_free_in_range(&r), 3);
        let whole = Range {
            start: addr("10.0.0.0"),
            end: addr("10.1.0.0"),
        };
        assert_eq!(space.num_free_in_range(&whole), space.num_free());
    }
}

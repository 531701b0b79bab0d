//! IPv4 address arithmetic.
//!
//! Addresses are plain 32-bit unsigned integers with a total order;
//! ranges are half-open `[start, end)` intervals that never wrap.
//! Wraparound through the top of the universe is handled explicitly by
//! the ring, never here.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use crate::error::WeftError;

/// Distance between two addresses.
pub type Offset = u32;

/// A 32-bit IPv4 address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Address(pub u32);

impl Address {
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Add an offset. Wraps modulo 2^32; ring token arithmetic relies
    /// on the caller keeping results inside the universe.
    pub fn add(self, i: Offset) -> Address {
        Address(self.0.wrapping_add(i))
    }

    /// Distance from `b` up to `self`. Panics if `self < b`; a negative
    /// distance is a logic error at every call site.
    pub fn subtract(self, b: Address) -> Offset {
        assert!(self >= b, "address subtraction went negative");
        self.0 - b.0
    }
}

impl From<Ipv4Addr> for Address {
    fn from(ip: Ipv4Addr) -> Self {
        Address(u32::from(ip))
    }
}

impl From<Address> for Ipv4Addr {
    fn from(addr: Address) -> Self {
        Ipv4Addr::from(addr.0)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Ipv4Addr::from(self.0))
    }
}

impl FromStr for Address {
    type Err = WeftError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ip: Ipv4Addr = s
            .parse()
            .map_err(|_| WeftError::InvalidUniverse(s.to_string()))?;
        Ok(Address::from(ip))
    }
}

/// A half-open address interval `[start, end)`, `start <= end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Range {
    pub start: Address,
    pub end: Address,
}

impl Range {
    pub fn new(start: Address, size: Offset) -> Range {
        Range {
            start,
            end: start.add(size),
        }
    }

    pub fn size(&self) -> Offset {
        self.end.subtract(self.start)
    }

    pub fn contains(&self, addr: Address) -> bool {
        addr >= self.start && addr < self.end
    }

    pub fn overlaps(&self, other: &Range) -> bool {
        !(self.start >= other.end || self.end <= other.start)
    }

    /// Number of addresses in the intersection with `other`.
    pub fn overlap(&self, other: &Range) -> Offset {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        if end > start {
            end.subtract(start)
        } else {
            0
        }
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}-{})", self.start, self.end)
    }
}

/// An IPv4 CIDR block, e.g. `10.32.0.0/12`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CidrV4 {
    pub start: Address,
    pub prefix_len: u8,
}

impl CidrV4 {
    pub fn size(&self) -> Offset {
        // A /0 would overflow u32; we reject it at parse time.
        1u32 << (32 - self.prefix_len)
    }

    pub fn range(&self) -> Range {
        Range::new(self.start, self.size())
    }

    /// The allocatable range: excludes the network and broadcast
    /// addresses per RFC 1122.
    pub fn host_range(&self) -> Range {
        Range::new(self.start.add(1), self.size() - 2)
    }
}

impl fmt::Display for CidrV4 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.start, self.prefix_len)
    }
}

impl FromStr for CidrV4 {
    type Err = WeftError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || WeftError::InvalidUniverse(s.to_string());
        let (ip_str, len_str) = s.split_once('/').ok_or_else(bad)?;
        let ip: Ipv4Addr = ip_str.parse().map_err(|_| bad())?;
        let prefix_len: u8 = len_str.parse().map_err(|_| bad())?;
        if prefix_len == 0 || prefix_len > 30 {
            // Need at least 4 addresses to have anything to hand out
            // once the network and broadcast addresses are excluded.
            return Err(bad());
        }
        let mask = !0u32 << (32 - prefix_len);
        Ok(CidrV4 {
            start: Address(u32::from(ip) & mask),
            prefix_len,
        })
    }
}

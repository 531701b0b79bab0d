//! # weft-core
//!
//! The allocation algorithms of the weft IPAM fabric: a CRDT ring that
//! partitions the address universe among peers, and the per-peer
//! free-space bookkeeping for the ranges this peer owns. Everything in
//! this crate is synchronous and single-threaded; the coordinator in
//! `weftd` serializes all access.

pub mod ring;
pub mod space;
pub mod space_set;

pub use ring::{Entry, Ring};
pub use space::Space;
pub use space_set::SpaceSet;

//! Partition placement for Tern.
//!
//! This crate owns the device table and the partition → replica → device
//! assignment of a cluster. [`RingBuilder`] is the mutable, persisted form an
//! operator edits; [`RingBuilder::rebalance`] re-derives assignments after
//! topology changes, honoring region/zone anti-affinity, device weights, the
//! overload factor and the `min_part_hours` cooldown. [`Ring`] is the
//! immutable artifact routing code reads through the [`RingView`] trait.

mod builder;
mod device;
mod error;
mod hash;
mod rebalance;
mod ring;


pub use builder::{BuilderInfo, MAX_BALANCE, MAX_PART_POWER, RingBuilder};
pub use device::{DeviceFilter, DeviceUpdate, NewDevice};
pub use error::PlacementError;
pub use hash::PathHasher;
pub use rebalance::RebalanceSummary;
pub use ring::{Ring, RingView};

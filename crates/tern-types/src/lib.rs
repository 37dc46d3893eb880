//! Shared types and identifiers for Tern.
//!
//! This crate defines the plain data used across the Tern workspace:
//! device identity ([`DeviceId`], [`Device`]), ring addressing
//! ([`RingType`], [`Policy`]), and the records exchanged with the
//! replication-queue store ([`QueuedReplication`], [`ProcessPass`]).

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Device identity
// ---------------------------------------------------------------------------

/// Identifier for a storage device in a ring.
///
/// Ids are small integers used as slot indexes into the device table. A slot
/// freed by a completed removal may be handed out again by a later add.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct DeviceId(u32);

impl DeviceId {
    /// Return the id as a table index.
    pub fn index(&self) -> usize {
        self.0 as usize
    }

    /// Return the raw integer value.
    pub fn get(&self) -> u32 {
        self.0
    }
}

impl From<u32> for DeviceId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceId({})", self.0)
    }
}

/// A storage device that the ring assigns partitions to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    /// Stable slot id.
    pub id: DeviceId,
    /// Region (largest failure domain).
    pub region: u32,
    /// Zone within the region.
    pub zone: u32,
    /// Address clients use to reach the storage service.
    pub ip: String,
    /// Port of the storage service.
    pub port: u16,
    /// Address used for replication traffic. Empty means "same as `ip`".
    pub replication_ip: String,
    /// Port used for replication traffic. Zero means "same as `port`".
    pub replication_port: u16,
    /// Mount name of the device on its server.
    pub device: String,
    /// Free-form operator metadata.
    pub meta: String,
    /// Relative capacity. Zero keeps the device in the table without
    /// assigning it any partitions.
    pub weight: f64,
    /// Number of partition replicas currently assigned to this device.
    pub parts: u64,
    /// Set when the device is scheduled for removal on the next rebalance.
    #[serde(default)]
    pub deleted: bool,
}

impl Device {
    /// `ip:port` label of the storage service.
    pub fn service_address(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }

    /// `ip:port` label of the replication endpoint, falling back to the
    /// service address fields when no dedicated replication address is set.
    pub fn replication_address(&self) -> String {
        let ip = if self.replication_ip.is_empty() {
            &self.ip
        } else {
            &self.replication_ip
        };
        let port = if self.replication_port == 0 {
            self.port
        } else {
            self.replication_port
        };
        format!("{ip}:{port}")
    }

    /// Zone key, unique across regions.
    pub fn zone_key(&self) -> (u32, u32) {
        (self.region, self.zone)
    }

    /// Whether the device participates in placement.
    pub fn is_assignable(&self) -> bool {
        !self.deleted && self.weight > 0.0
    }
}

// ---------------------------------------------------------------------------
// Rings and policies
// ---------------------------------------------------------------------------

/// Which ring a query or audit refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RingType {
    /// The container ring.
    Container,
    /// An object ring (one per storage policy).
    Object,
}

impl RingType {
    /// Lowercase name used in file names and store keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            RingType::Container => "container",
            RingType::Object => "object",
        }
    }
}

impl fmt::Display for RingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An object-storage policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    /// Policy index; selects the object ring.
    pub index: u32,
    /// Human-readable policy name.
    pub name: String,
}

// ---------------------------------------------------------------------------
// Replication-queue records
// ---------------------------------------------------------------------------

/// A pending replication: a replica known to be missing from its device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedReplication {
    /// Partition whose replica is missing.
    pub partition: u64,
    /// Device the replica should be on.
    pub to_device: DeviceId,
    /// When the replication was queued.
    pub time: DateTime<Utc>,
}

/// Progress of a named background pass (e.g. a dispersion scan).
///
/// `None` timestamps mean the pass has never started, or has not completed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessPass {
    /// When the most recent pass started.
    pub start: Option<DateTime<Utc>>,
    /// When progress was last recorded.
    pub last_update: Option<DateTime<Utc>>,
    /// Free-form progress marker written by the scanner.
    pub progress: String,
    /// When the most recent pass completed.
    pub complete: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Immutable ring: the read-optimized artifact routing code consults.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tern_types::{Device, DeviceId};
use tracing::debug;

use crate::PlacementError;
use crate::hash::PathHasher;

/// Read-only partition lookups.
///
/// Implemented by [`Ring`]; consumers such as the dispersion audit take
/// `&dyn RingView` so tests can supply fixed layouts.
pub trait RingView: Send + Sync {
    /// Number of partitions.
    fn partition_count(&self) -> u64;

    /// Number of replica rows (the replica count rounded up).
    fn replica_count(&self) -> usize;

    /// Devices holding `partition`, in replica order.
    ///
    /// Returns `None` when the partition is out of range.
    fn get_nodes(&self, partition: u64) -> Option<Vec<&Device>>;

    /// Partition a storage path hashes to.
    fn get_partition(&self, account: &str, container: &str, object: &str) -> u64;

    /// Device table indexed by id.
    fn all_devices(&self) -> &[Option<Device>];
}

/// Immutable partition → replica → device table, produced by
/// [`RingBuilder::write_ring`](crate::RingBuilder::write_ring).
///
/// Path-hash salts are not part of the artifact; supply them with
/// [`with_path_hasher`](Self::with_path_hasher) after loading.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ring {
    part_power: u8,
    replicas: f64,
    replica2part2dev: Vec<Vec<DeviceId>>,
    devs: Vec<Option<Device>>,
    #[serde(skip)]
    hasher: PathHasher,
}

impl Ring {
    pub(crate) fn from_parts(
        part_power: u8,
        replicas: f64,
        replica2part2dev: Vec<Vec<DeviceId>>,
        devs: Vec<Option<Device>>,
    ) -> Self {
        Self {
            part_power,
            replicas,
            replica2part2dev,
            devs,
            hasher: PathHasher::default(),
        }
    }

    /// Load a ring artifact.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PlacementError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        let ring: Ring = postcard::from_bytes(&bytes)?;
        debug!(path = %path.display(), partitions = ring.partition_count(), "loaded ring");
        Ok(ring)
    }

    /// Write the ring artifact, replacing any existing file atomically.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), PlacementError> {
        let path = path.as_ref();
        let bytes = postcard::to_allocvec(self)?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Use the given salts for [`get_partition`](RingView::get_partition).
    pub fn with_path_hasher(mut self, hasher: PathHasher) -> Self {
        self.hasher = hasher;
        self
    }

    pub fn part_power(&self) -> u8 {
        self.part_power
    }

    /// Configured replica count, possibly fractional.
    pub fn replicas(&self) -> f64 {
        self.replicas
    }

    /// Look up a device by id.
    pub fn device(&self, id: DeviceId) -> Option<&Device> {
        self.devs.get(id.index()).and_then(Option::as_ref)
    }
}

impl RingView for Ring {
    fn partition_count(&self) -> u64 {
        1u64 << self.part_power
    }

    fn replica_count(&self) -> usize {
        self.replica2part2dev.len()
    }

    fn get_nodes(&self, partition: u64) -> Option<Vec<&Device>> {
        if partition >= self.partition_count() {
            return None;
        }
        let part = partition as usize;
        Some(
            self.replica2part2dev
                .iter()
                .filter_map(|row| row.get(part))
                .filter_map(|id| self.device(*id))
                .collect(),
        )
    }

    fn get_partition(&self, account: &str, container: &str, object: &str) -> u64 {
        self.hasher
            .partition(self.part_power, account, container, object)
    }

    fn all_devices(&self) -> &[Option<Device>] {
        &self.devs
    }
}

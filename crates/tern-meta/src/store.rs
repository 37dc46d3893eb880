//! [`MetaStore`] implementation wrapping Fjall keyspaces.

use std::path::Path;

use chrono::{DateTime, Utc};
use fjall::{Database, Keyspace, KeyspaceCreateOptions};
use tern_types::{DeviceId, ProcessPass, QueuedReplication, RingType};
use tracing::debug;

use crate::{MetaError, ReplicationQueue};

type Result<T> = std::result::Result<T, MetaError>;

/// Replication-queue store backed by Fjall.
pub struct MetaStore {
    /// The underlying Fjall database handle.
    #[allow(dead_code)]
    db: Database,
    /// ring ++ policy ++ tag ++ partition ++ device → QueuedReplication.
    queued: Keyspace,
    /// label ++ ring ++ policy → ProcessPass.
    passes: Keyspace,
    /// ring ++ policy ++ `ip:port` → count (8 bytes BE).
    service_errors: Keyspace,
    /// ring ++ policy ++ `ip:port/device` → count (8 bytes BE).
    device_errors: Keyspace,
}

impl MetaStore {
    /// Open a persistent MetaStore at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = Database::builder(path).open()?;
        Self::init_keyspaces(db)
    }

    /// Open a temporary MetaStore that is cleaned up on drop.
    ///
    /// Useful for tests.
    pub fn open_temporary() -> Result<Self> {
        let tmp = tempfile::tempdir().map_err(std::io::Error::other)?;
        let db = Database::builder(tmp.path()).temporary(true).open()?;
        Self::init_keyspaces(db)
    }

    fn init_keyspaces(db: Database) -> Result<Self> {
        let queued = db.keyspace("queued", KeyspaceCreateOptions::default)?;
        let passes = db.keyspace("passes", KeyspaceCreateOptions::default)?;
        let service_errors = db.keyspace("service_errors", KeyspaceCreateOptions::default)?;
        let device_errors = db.keyspace("device_errors", KeyspaceCreateOptions::default)?;
        Ok(Self {
            db,
            queued,
            passes,
            service_errors,
            device_errors,
        })
    }

    // ----- Queued replications -----

    /// Record that a replica of `entry.partition` is missing from
    /// `entry.to_device`. Re-queuing the same pair replaces the timestamp.
    pub fn queue_replication(
        &self,
        ring_type: RingType,
        policy: u32,
        tag: &str,
        entry: &QueuedReplication,
    ) -> Result<()> {
        let key = queued_key(ring_type, policy, tag, entry.partition, entry.to_device);
        let value = postcard::to_allocvec(entry)?;
        self.queued.insert(key.as_slice(), value.as_slice())?;
        debug!(
            %ring_type,
            policy,
            tag,
            partition = entry.partition,
            to_device = %entry.to_device,
            "queued replication"
        );
        Ok(())
    }

    /// Drop a queued replication, e.g. once the replica has been restored.
    pub fn clear_replication(
        &self,
        ring_type: RingType,
        policy: u32,
        tag: &str,
        partition: u64,
        to_device: DeviceId,
    ) -> Result<()> {
        let key = queued_key(ring_type, policy, tag, partition, to_device);
        self.queued.remove(key.as_slice())?;
        debug!(%ring_type, policy, tag, partition, %to_device, "cleared replication");
        Ok(())
    }

    // ----- Process passes -----

    /// Begin a new pass, discarding any previous completion time.
    pub fn start_pass(
        &self,
        label: &str,
        ring_type: RingType,
        policy: u32,
        at: DateTime<Utc>,
        progress: &str,
    ) -> Result<()> {
        let pass = ProcessPass {
            start: Some(at),
            last_update: Some(at),
            progress: progress.to_string(),
            complete: None,
        };
        self.put_pass(label, ring_type, policy, &pass)?;
        debug!(label, %ring_type, policy, "started pass");
        Ok(())
    }

    /// Record progress on the current pass.
    pub fn update_pass(
        &self,
        label: &str,
        ring_type: RingType,
        policy: u32,
        at: DateTime<Utc>,
        progress: &str,
    ) -> Result<()> {
        let mut pass = self.get_pass(label, ring_type, policy)?;
        pass.last_update = Some(at);
        pass.progress = progress.to_string();
        self.put_pass(label, ring_type, policy, &pass)
    }

    /// Mark the current pass complete.
    pub fn complete_pass(
        &self,
        label: &str,
        ring_type: RingType,
        policy: u32,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let mut pass = self.get_pass(label, ring_type, policy)?;
        pass.last_update = Some(at);
        pass.complete = Some(at);
        self.put_pass(label, ring_type, policy, &pass)?;
        debug!(label, %ring_type, policy, "completed pass");
        Ok(())
    }

    fn get_pass(&self, label: &str, ring_type: RingType, policy: u32) -> Result<ProcessPass> {
        match self.passes.get(pass_key(label, ring_type, policy).as_slice())? {
            Some(bytes) => Ok(postcard::from_bytes(&bytes)?),
            None => Ok(ProcessPass::default()),
        }
    }

    fn put_pass(
        &self,
        label: &str,
        ring_type: RingType,
        policy: u32,
        pass: &ProcessPass,
    ) -> Result<()> {
        let value = postcard::to_allocvec(pass)?;
        self.passes
            .insert(pass_key(label, ring_type, policy).as_slice(), value.as_slice())?;
        Ok(())
    }

    // ----- Error counters -----

    /// Count one error from the service at `address` (`ip:port`).
    pub fn record_service_error(&self, ring_type: RingType, policy: u32, address: &str) -> Result<()> {
        let count = increment(&self.service_errors, "service_errors", ring_type, policy, address)?;
        debug!(%ring_type, policy, address, count, "recorded service error");
        Ok(())
    }

    /// Count one error from the device at `address` (`ip:port/device`).
    pub fn record_device_error(&self, ring_type: RingType, policy: u32, address: &str) -> Result<()> {
        let count = increment(&self.device_errors, "device_errors", ring_type, policy, address)?;
        debug!(%ring_type, policy, address, count, "recorded device error");
        Ok(())
    }
}

impl ReplicationQueue for MetaStore {
    fn queued_replications(
        &self,
        ring_type: RingType,
        policy: u32,
        tag: &str,
    ) -> Result<Vec<QueuedReplication>> {
        let mut prefix = ring_prefix(ring_type, policy);
        prefix.extend_from_slice(tag.as_bytes());
        prefix.push(0);

        let mut entries = Vec::new();
        for guard in self.queued.prefix(prefix.as_slice()) {
            let v = guard.value()?;
            entries.push(postcard::from_bytes(&v)?);
        }
        Ok(entries)
    }

    fn count_of_services_with_errors(&self, ring_type: RingType, policy: u32) -> Result<usize> {
        count_nonzero(&self.service_errors, "service_errors", ring_type, policy)
    }

    fn count_of_devices_with_errors(&self, ring_type: RingType, policy: u32) -> Result<usize> {
        count_nonzero(&self.device_errors, "device_errors", ring_type, policy)
    }

    fn process_pass(&self, label: &str, ring_type: RingType, policy: u32) -> Result<ProcessPass> {
        self.get_pass(label, ring_type, policy)
    }
}

/// `ring_type ++ 0x00 ++ policy (4 bytes BE)`.
fn ring_prefix(ring_type: RingType, policy: u32) -> Vec<u8> {
    let mut key = Vec::with_capacity(32);
    key.extend_from_slice(ring_type.as_str().as_bytes());
    key.push(0);
    key.extend_from_slice(&policy.to_be_bytes());
    key
}

/// `ring prefix ++ tag ++ 0x00 ++ partition (8 bytes BE) ++ device (4 bytes BE)`.
///
/// Big-endian keeps a tag's entries in partition order.
fn queued_key(
    ring_type: RingType,
    policy: u32,
    tag: &str,
    partition: u64,
    to_device: DeviceId,
) -> Vec<u8> {
    let mut key = ring_prefix(ring_type, policy);
    key.extend_from_slice(tag.as_bytes());
    key.push(0);
    key.extend_from_slice(&partition.to_be_bytes());
    key.extend_from_slice(&to_device.get().to_be_bytes());
    key
}

/// `label ++ 0x00 ++ ring prefix`.
fn pass_key(label: &str, ring_type: RingType, policy: u32) -> Vec<u8> {
    let mut key = label.as_bytes().to_vec();
    key.push(0);
    key.extend_from_slice(&ring_prefix(ring_type, policy));
    key
}

fn counter_key(ring_type: RingType, policy: u32, address: &str) -> Vec<u8> {
    let mut key = ring_prefix(ring_type, policy);
    key.extend_from_slice(address.as_bytes());
    key
}

fn decode_count(keyspace: &'static str, bytes: &[u8]) -> Result<u64> {
    let arr: [u8; 8] = bytes.try_into().map_err(|_| MetaError::Corrupt {
        keyspace,
        reason: format!("counter is {} bytes, expected 8", bytes.len()),
    })?;
    Ok(u64::from_be_bytes(arr))
}

fn increment(
    counters: &Keyspace,
    name: &'static str,
    ring_type: RingType,
    policy: u32,
    address: &str,
) -> Result<u64> {
    let key = counter_key(ring_type, policy, address);
    let current = match counters.get(key.as_slice())? {
        Some(bytes) => decode_count(name, &bytes)?,
        None => 0,
    };
    let next = current.saturating_add(1);
    counters.insert(key.as_slice(), next.to_be_bytes().as_slice())?;
    Ok(next)
}

fn count_nonzero(
    counters: &Keyspace,
    name: &'static str,
    ring_type: RingType,
    policy: u32,
) -> Result<usize> {
    let prefix = ring_prefix(ring_type, policy);
    let mut count = 0;
    for guard in counters.prefix(prefix.as_slice()) {
        let v = guard.value()?;
        if decode_count(name, &v)? > 0 {
            count += 1;
        }
    }
    Ok(count)
}

//! Shared test harness for Tern integration tests.
//!
//! Provides [`TestCluster`]: ring builders and ring artifacts laid out in a
//! temporary directory the way an operator would keep them, plus a
//! [`MetaStore`] holding the replication backlog.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;
use tern_dispersion::{ClusterContext, RingDirectory, StaticPolicies};
use tern_meta::MetaStore;
use tern_placement::{NewDevice, PathHasher, RingBuilder};
use tern_types::{Policy, RingType};

/// Salts every test cluster hashes with.
pub const HASH_PREFIX: &str = "";
pub const HASH_SUFFIX: &str = "integration";

/// A device for region `region`, zone `zone`, host number `host`.
pub fn device(region: u32, zone: u32, host: u8, weight: f64) -> NewDevice {
    NewDevice {
        region,
        zone,
        ip: format!("10.{region}.{zone}.{host}"),
        port: 6200,
        device: format!("sd{}", (b'a' + host) as char),
        meta: format!("r{region}z{zone}h{host}"),
        weight,
        ..Default::default()
    }
}

/// Rings, builders and a replication-queue store in one temp directory.
pub struct TestCluster {
    dir: TempDir,
    meta: Arc<MetaStore>,
    policies: Vec<Policy>,
}

impl TestCluster {
    /// Empty cluster: no rings yet, an empty store, no policies.
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("rings")).unwrap();
        let meta = Arc::new(MetaStore::open(dir.path().join("meta")).unwrap());
        Self {
            dir,
            meta,
            policies: Vec::new(),
        }
    }

    /// Cluster with a container ring and one object ring (policy 0, "gold"),
    /// each spread over `zones` zones with one device per zone.
    pub fn with_rings(part_power: u8, replicas: f64, zones: u32) -> Self {
        let mut cluster = Self::new();
        cluster.build_ring(RingType::Container, 0, part_power, replicas, zones);
        cluster.add_policy(0, "gold", part_power, replicas, zones);
        cluster
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn rings_dir(&self) -> PathBuf {
        self.dir.path().join("rings")
    }

    pub fn meta(&self) -> &MetaStore {
        &self.meta
    }

    pub fn hasher() -> PathHasher {
        PathHasher::new(HASH_PREFIX, HASH_SUFFIX)
    }

    pub fn ring_directory(&self) -> RingDirectory {
        RingDirectory::new(self.rings_dir(), Self::hasher())
    }

    /// Builder file for a ring type and policy.
    pub fn builder_path(&self, ring_type: RingType, policy: u32) -> PathBuf {
        self.dir
            .path()
            .join(format!("{}-{policy}.builder", ring_type.as_str()))
    }

    /// Register a policy and build its object ring.
    pub fn add_policy(&mut self, index: u32, name: &str, part_power: u8, replicas: f64, zones: u32) {
        self.build_ring(RingType::Object, index, part_power, replicas, zones);
        self.policies.push(Policy {
            index,
            name: name.to_string(),
        });
    }

    /// Register a policy without writing a ring for it.
    pub fn add_policy_without_ring(&mut self, index: u32, name: &str) {
        self.policies.push(Policy {
            index,
            name: name.to_string(),
        });
    }

    /// Create, populate, rebalance and publish one ring.
    pub fn build_ring(
        &self,
        ring_type: RingType,
        policy: u32,
        part_power: u8,
        replicas: f64,
        zones: u32,
    ) -> RingBuilder {
        let path = self.builder_path(ring_type, policy);
        let mut builder = RingBuilder::create(&path, part_power, replicas, 1).unwrap();
        for zone in 1..=zones {
            builder.add_device(device(1, zone, 1, 100.0)).unwrap();
        }
        builder.rebalance().unwrap();
        builder.save(&path).unwrap();
        builder
            .write_ring(self.ring_directory().path_for(ring_type, policy))
            .unwrap();
        builder
    }

    /// Context for the dispersion audit over this cluster.
    pub fn context(&self) -> ClusterContext {
        ClusterContext {
            rings: Arc::new(self.ring_directory()),
            queue: self.meta.clone(),
            policies: Arc::new(StaticPolicies::new(self.policies.clone())),
        }
    }
}

impl Default for TestCluster {
    fn default() -> Self {
        Self::new()
    }
}

//! Explicit cluster dependencies for the dispersion audit: where rings come
//! from, which policies exist, and which store holds the replication queue.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tern_meta::ReplicationQueue;
use tern_placement::{PathHasher, Ring, RingView};
use tern_types::{Policy, RingType};
use tracing::debug;

use crate::DispersionError;

/// Loads the ring for a ring type and policy.
pub trait RingSource: Send + Sync {
    /// Ring used by `ring_type` for `policy`. Container rings ignore `policy`.
    fn ring(&self, ring_type: RingType, policy: u32) -> Result<Arc<dyn RingView>, DispersionError>;
}

/// Enumerates configured object-storage policies.
///
/// A registry that cannot read its source returns
/// [`DispersionError::Policies`]; the report then lists the error and skips
/// every object ring.
pub trait PolicyRegistry: Send + Sync {
    /// All policies, in ascending index order.
    fn policies(&self) -> Result<Vec<Policy>, DispersionError>;
}

/// Everything the report builder needs, passed in rather than looked up.
#[derive(Clone)]
pub struct ClusterContext {
    pub rings: Arc<dyn RingSource>,
    pub queue: Arc<dyn ReplicationQueue>,
    pub policies: Arc<dyn PolicyRegistry>,
}

/// Ring artifacts stored in one directory: `container.ring`, `object.ring`
/// for policy 0 and `object-<N>.ring` for other policies.
#[derive(Debug, Clone)]
pub struct RingDirectory {
    dir: PathBuf,
    hasher: PathHasher,
}

impl RingDirectory {
    /// Rings under `dir`, hashed with the cluster's path salts.
    pub fn new(dir: impl Into<PathBuf>, hasher: PathHasher) -> Self {
        Self {
            dir: dir.into(),
            hasher,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File holding the ring for `ring_type` and `policy`.
    pub fn path_for(&self, ring_type: RingType, policy: u32) -> PathBuf {
        let name = match (ring_type, policy) {
            (RingType::Container, _) => "container.ring".to_string(),
            (RingType::Object, 0) => "object.ring".to_string(),
            (RingType::Object, n) => format!("object-{n}.ring"),
        };
        self.dir.join(name)
    }

    /// Load a ring with the cluster's salts applied.
    pub fn load(&self, ring_type: RingType, policy: u32) -> Result<Ring, DispersionError> {
        let path = self.path_for(ring_type, policy);
        let ring = Ring::load(&path).map_err(|source| DispersionError::Ring {
            ring_type,
            policy,
            source,
        })?;
        debug!(path = %path.display(), %ring_type, policy, "loaded ring");
        Ok(ring.with_path_hasher(self.hasher.clone()))
    }
}

impl RingSource for RingDirectory {
    fn ring(&self, ring_type: RingType, policy: u32) -> Result<Arc<dyn RingView>, DispersionError> {
        Ok(Arc::new(self.load(ring_type, policy)?))
    }
}

/// A fixed policy list.
#[derive(Debug, Clone)]
pub struct StaticPolicies {
    policies: Vec<Policy>,
}

impl StaticPolicies {
    /// Use `policies`, sorted by index. An empty list falls back to the
    /// default policy.
    pub fn new(mut policies: Vec<Policy>) -> Self {
        if policies.is_empty() {
            return Self::default();
        }
        policies.sort_by_key(|p| p.index);
        policies.dedup_by_key(|p| p.index);
        Self { policies }
    }
}

impl Default for StaticPolicies {
    /// Policy 0, named `gold`.
    fn default() -> Self {
        Self {
            policies: vec![Policy {
                index: 0,
                name: "gold".to_string(),
            }],
        }
    }
}

impl PolicyRegistry for StaticPolicies {
    fn policies(&self) -> Result<Vec<Policy>, DispersionError> {
        Ok(self.policies.clone())
    }
}

//! Path hashing: maps `account/container/object` names onto partitions.

/// Hashes storage paths with the cluster's salts.
///
/// The prefix and suffix are cluster-wide secrets; every node must use the
/// same values or they will disagree about where data lives.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathHasher {
    prefix: String,
    suffix: String,
}

impl PathHasher {
    /// Create a hasher with the given salts.
    pub fn new(prefix: impl Into<String>, suffix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            suffix: suffix.into(),
        }
    }

    /// Hash a storage path.
    ///
    /// An empty `container` hashes the account path, an empty `object` hashes
    /// the container path.
    pub fn hash_path(&self, account: &str, container: &str, object: &str) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.prefix.as_bytes());
        hasher.update(b"/");
        hasher.update(account.as_bytes());
        if !container.is_empty() {
            hasher.update(b"/");
            hasher.update(container.as_bytes());
            if !object.is_empty() {
                hasher.update(b"/");
                hasher.update(object.as_bytes());
            }
        }
        hasher.update(self.suffix.as_bytes());
        hasher.finalize().into()
    }

    /// Partition of a storage path in a ring of `2^part_power` partitions.
    ///
    /// Uses the top `part_power` bits of the first four hash bytes.
    pub fn partition(&self, part_power: u8, account: &str, container: &str, object: &str) -> u64 {
        let hash = self.hash_path(account, container, object);
        let top = u32::from_be_bytes([hash[0], hash[1], hash[2], hash[3]]);
        u64::from(top >> (32 - u32::from(part_power)))
    }
}

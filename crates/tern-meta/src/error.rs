//! Error types for the replication-queue store.

/// Errors returned by [`MetaStore`](crate::MetaStore) and
/// [`ReplicationQueue`](crate::ReplicationQueue) operations.
#[derive(Debug, thiserror::Error)]
pub enum MetaError {
    /// Fjall database error.
    #[error("fjall error: {0}")]
    Fjall(#[from] fjall::Error),

    /// I/O error (e.g. from Fjall guard operations).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serde(#[from] postcard::Error),

    /// A stored value has an unexpected shape.
    #[error("corrupt entry in {keyspace}: {reason}")]
    Corrupt {
        /// Keyspace holding the entry.
        keyspace: &'static str,
        /// What is wrong with it.
        reason: String,
    },

    /// The store is unreachable or refused the query.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

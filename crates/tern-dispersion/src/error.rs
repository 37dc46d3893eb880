//! Error types for the dispersion audit.

use tern_types::RingType;

/// Errors raised while gathering dispersion inputs.
///
/// The report builder never returns these; it records their text in the
/// report and moves on to the next ring.
#[derive(Debug, thiserror::Error)]
pub enum DispersionError {
    /// A ring artifact could not be loaded.
    #[error("could not load {ring_type} ring for policy {policy}: {source}")]
    Ring {
        /// Which ring was requested.
        ring_type: RingType,
        /// Policy index of the ring.
        policy: u32,
        /// Underlying load failure.
        #[source]
        source: tern_placement::PlacementError,
    },

    /// A replication-queue query failed.
    #[error("replication queue error: {0}")]
    Meta(#[from] tern_meta::MetaError),

    /// The policy registry could not be read.
    ///
    /// For [`PolicyRegistry`](crate::PolicyRegistry) implementations that
    /// load policies from a file or a service; the static registry built
    /// from configuration never returns it.
    #[error("policy registry error: {0}")]
    Policies(String),
}

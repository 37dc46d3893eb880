//! Read contract of the replication-queue store.

use tern_types::{ProcessPass, QueuedReplication, RingType};

use crate::MetaError;

/// Queries the dispersion report issues against the replication-queue store.
///
/// Calls are blocking. Implementations must be `Send + Sync` so one store can
/// be shared by every report and scanner in the process.
pub trait ReplicationQueue: Send + Sync {
    /// Pending replications for one ring, filtered by `tag`.
    fn queued_replications(
        &self,
        ring_type: RingType,
        policy: u32,
        tag: &str,
    ) -> Result<Vec<QueuedReplication>, MetaError>;

    /// Number of services that reported errors during the current pass.
    fn count_of_services_with_errors(
        &self,
        ring_type: RingType,
        policy: u32,
    ) -> Result<usize, MetaError>;

    /// Number of devices that reported errors during the current pass.
    fn count_of_devices_with_errors(
        &self,
        ring_type: RingType,
        policy: u32,
    ) -> Result<usize, MetaError>;

    /// Progress of the most recent pass named `label`.
    ///
    /// A pass that was never recorded is returned as
    /// [`ProcessPass::default`].
    fn process_pass(
        &self,
        label: &str,
        ring_type: RingType,
        policy: u32,
    ) -> Result<ProcessPass, MetaError>;
}

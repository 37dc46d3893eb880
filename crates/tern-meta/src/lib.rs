//! Replication-queue and scan-progress store wrapping Fjall.
//!
//! The dispersion audit reads this store through the [`ReplicationQueue`]
//! trait. [`MetaStore`] is the local Fjall-backed implementation; it also
//! exposes the writer methods scanners use to record what they find. Four
//! keyspaces:
//!
//! - `queued`: ring type ++ policy ++ tag ++ partition ++ device →
//!   [`QueuedReplication`](tern_types::QueuedReplication)
//! - `passes`: label ++ ring type ++ policy →
//!   [`ProcessPass`](tern_types::ProcessPass)
//! - `service_errors`: ring type ++ policy ++ `ip:port` → error count
//! - `device_errors`: ring type ++ policy ++ `ip:port/device` → error count

mod error;
mod store;
mod traits;

pub use error::MetaError;
pub use store::MetaStore;
pub use traits::ReplicationQueue;

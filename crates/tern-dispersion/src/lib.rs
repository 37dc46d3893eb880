//! Dispersion audit for Tern.
//!
//! This crate provides:
//!
//! - [`NameGenerator`]: finds one dispersion name per ring partition, in
//!   parallel, with cooperative cancellation.
//! - [`ReportBuilder`]: cross-references the replication backlog with the
//!   rings and renders a [`DispersionReport`].
//! - [`ClusterContext`]: the explicit ring source, policy registry and
//!   replication-queue store the audit runs against.

pub mod context;
pub mod error;
pub mod names;
pub mod report;

pub use context::{ClusterContext, PolicyRegistry, RingDirectory, RingSource, StaticPolicies};
pub use error::DispersionError;
pub use names::{ADMIN_ACCOUNT, CONTAINER_PREFIX, NameGenerator, object_container};
pub use report::{
    DISPERSION_TAG, DispersionReport, MissingReplica, NEVER_RUN_SUFFIX, ReportBuilder, SCAN_LABEL,
    SubReport, format_duration,
};

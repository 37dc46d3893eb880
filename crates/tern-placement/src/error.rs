//! Error types for ring building and placement.

use std::path::PathBuf;

use tern_types::DeviceId;

/// Errors returned by [`RingBuilder`](crate::RingBuilder) and
/// [`Ring`](crate::Ring) operations.
///
/// Validation errors are returned before any state is touched, so a failed
/// call leaves the builder exactly as it was.
#[derive(Debug, thiserror::Error)]
pub enum PlacementError {
    /// A builder already exists at the target path.
    #[error("builder file already exists at {0}")]
    AlreadyExists(PathBuf),

    /// The partition power is outside the supported range.
    #[error("partition power {0} out of range (expected 1..=32)")]
    InvalidPartPower(u8),

    /// The replica count is below one or not a finite number.
    #[error("replica count must be at least 1, got {0}")]
    InvalidReplicas(f64),

    /// A device weight is negative or not a finite number.
    #[error("weight must be a non-negative number, got {0}")]
    InvalidWeight(f64),

    /// The overload factor is negative or not a finite number.
    #[error("overload must be a non-negative number, got {0}")]
    InvalidOverload(f64),

    /// A device field failed validation.
    #[error("invalid {field}: {reason}")]
    InvalidField {
        /// Name of the offending field.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },

    /// Another live device already uses this `ip:port/device` triple.
    #[error("device {address} already exists with id {existing}")]
    DuplicateDevice {
        /// The conflicting `ip:port/device` label.
        address: String,
        /// Id of the device already holding it.
        existing: DeviceId,
    },

    /// The device id does not name a device in the table.
    #[error("device {0} not found")]
    DeviceNotFound(DeviceId),

    /// Rebalance was requested but no device carries any weight.
    #[error("total device weight is zero; cannot assign partitions")]
    ZeroWeight,

    /// Fewer weighted devices than replicas; replicas would have to share a device.
    #[error("{needed} replicas need at least {needed} weighted devices, only {available} available")]
    InsufficientDevices {
        /// Number of replicas per partition (rounded up).
        needed: usize,
        /// Number of devices that can take partitions.
        available: usize,
    },

    /// The builder has unassigned or invalid partitions; rebalance first.
    #[error("builder is not ready to write a ring: {0}")]
    NotRebalanced(String),

    /// I/O error reading or writing a builder or ring file.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serde(#[from] postcard::Error),
}

//! Typed inputs for device-table operations: new devices, search filters,
//! and bulk field updates.

use tern_types::Device;

/// Fields of a device to add to the table.
///
/// Already validated at the input boundary; the builder only checks the
/// invariants it owns (weight range, required fields, duplicates).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewDevice {
    pub region: u32,
    pub zone: u32,
    pub ip: String,
    pub port: u16,
    pub replication_ip: String,
    pub replication_port: u16,
    pub device: String,
    pub meta: String,
    pub weight: f64,
}

/// Conjunction of device attributes to match.
///
/// `None` fields match everything, so the default filter selects every live
/// device. `meta` matches as a substring, every other field exactly.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceFilter {
    pub region: Option<u32>,
    pub zone: Option<u32>,
    pub ip: Option<String>,
    pub port: Option<u16>,
    pub replication_ip: Option<String>,
    pub replication_port: Option<u16>,
    pub device: Option<String>,
    pub weight: Option<f64>,
    pub meta: Option<String>,
}

impl DeviceFilter {
    /// Whether `dev` satisfies every set field.
    pub fn matches(&self, dev: &Device) -> bool {
        self.region.is_none_or(|r| dev.region == r)
            && self.zone.is_none_or(|z| dev.zone == z)
            && self.ip.as_deref().is_none_or(|ip| dev.ip == ip)
            && self.port.is_none_or(|p| dev.port == p)
            && self
                .replication_ip
                .as_deref()
                .is_none_or(|ip| dev.replication_ip == ip)
            && self.replication_port.is_none_or(|p| dev.replication_port == p)
            && self.device.as_deref().is_none_or(|d| dev.device == d)
            && self.weight.is_none_or(|w| (dev.weight - w).abs() < 1e-9)
            && self.meta.as_deref().is_none_or(|m| dev.meta.contains(m))
    }

    /// Whether no field is set.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// New values for a device's address and identity fields.
///
/// Region, zone and weight are not part of this update: the first two define
/// the failure domain and weight has its own operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceUpdate {
    pub ip: Option<String>,
    pub port: Option<u16>,
    pub replication_ip: Option<String>,
    pub replication_port: Option<u16>,
    pub device: Option<String>,
    pub meta: Option<String>,
}

impl DeviceUpdate {
    /// Whether the update changes nothing.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Apply the update to a device.
    pub(crate) fn apply(&self, dev: &mut Device) {
        if let Some(ip) = &self.ip {
            dev.ip.clone_from(ip);
        }
        if let Some(port) = self.port {
            dev.port = port;
        }
        if let Some(ip) = &self.replication_ip {
            dev.replication_ip.clone_from(ip);
        }
        if let Some(port) = self.replication_port {
            dev.replication_port = port;
        }
        if let Some(name) = &self.device {
            dev.device.clone_from(name);
        }
        if let Some(meta) = &self.meta {
            dev.meta.clone_from(meta);
        }
    }
}

/// `ip:port/device` label used for duplicate detection.
pub(crate) fn device_label(ip: &str, port: u16, device: &str) -> String {
    format!("{ip}:{port}/{device}")
}

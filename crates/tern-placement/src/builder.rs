//! Ring builder: the device table, the partition assignment, and the
//! operator-facing mutations over them.

use std::collections::HashSet;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tern_types::{Device, DeviceId};
use tracing::{debug, info};

use crate::PlacementError;
use crate::device::{DeviceFilter, DeviceUpdate, NewDevice, device_label};
use crate::ring::Ring;

type Result<T> = std::result::Result<T, PlacementError>;

/// Largest supported partition power.
///
/// The assignment table is held in memory and persisted whole, so 2^24
/// partitions at a handful of replicas is already several hundred MiB.
pub const MAX_PART_POWER: u8 = 24;

/// Balance reported when a device with no weight still holds partitions.
pub const MAX_BALANCE: f64 = 999.99;

/// Mutable ring state: devices plus the partition → replica → device table.
///
/// A builder is persisted between operator commands and only turned into an
/// immutable [`Ring`] by [`RingBuilder::write_ring`]. Mutations never move
/// partitions themselves; that only happens in
/// [`rebalance`](RingBuilder::rebalance).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RingBuilder {
    pub(crate) part_power: u8,
    pub(crate) replicas: f64,
    pub(crate) min_part_hours: u32,
    pub(crate) overload: f64,
    pub(crate) version: u64,
    /// Device table indexed by id. `None` marks a free slot.
    pub(crate) devs: Vec<Option<Device>>,
    /// One row per replica; each row maps partition → device. The last row
    /// is shorter when the replica count is fractional.
    pub(crate) replica2part2dev: Vec<Vec<Option<DeviceId>>>,
    /// Unix seconds of each partition's most recent move (0 = never).
    pub(crate) last_moved: Vec<u64>,
}

/// Summary of a builder for operator display.
#[derive(Debug, Clone, PartialEq)]
pub struct BuilderInfo {
    pub version: u64,
    pub partitions: u64,
    pub replicas: f64,
    pub regions: usize,
    pub zones: usize,
    pub devices: usize,
    pub balance: f64,
    pub min_part_hours: u32,
    pub min_part_seconds_left: u64,
    pub overload: f64,
}

impl RingBuilder {
    /// Create an empty in-memory builder.
    pub fn new(part_power: u8, replicas: f64, min_part_hours: u32) -> Result<Self> {
        if part_power == 0 || part_power > MAX_PART_POWER {
            return Err(PlacementError::InvalidPartPower(part_power));
        }
        if !replicas.is_finite() || replicas < 1.0 {
            return Err(PlacementError::InvalidReplicas(replicas));
        }

        let parts = 1usize << part_power;
        let replica2part2dev = replica_row_lengths(parts, replicas)
            .into_iter()
            .map(|len| vec![None; len])
            .collect();

        Ok(Self {
            part_power,
            replicas,
            min_part_hours,
            overload: 0.0,
            version: 0,
            devs: Vec::new(),
            replica2part2dev,
            last_moved: vec![0; parts],
        })
    }

    /// Create a builder and persist it at `path`.
    ///
    /// Fails if a file already exists there.
    pub fn create(
        path: impl AsRef<Path>,
        part_power: u8,
        replicas: f64,
        min_part_hours: u32,
    ) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            return Err(PlacementError::AlreadyExists(path.to_path_buf()));
        }
        let builder = Self::new(part_power, replicas, min_part_hours)?;
        builder.save(path)?;
        info!(path = %path.display(), part_power, replicas, min_part_hours, "created ring builder");
        Ok(builder)
    }

    /// Load a builder previously written with [`save`](Self::save).
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = std::fs::read(path.as_ref())?;
        Ok(postcard::from_bytes(&bytes)?)
    }

    /// Persist the builder. The file is replaced atomically.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let bytes = postcard::to_allocvec(self)?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, path)?;
        debug!(path = %path.display(), version = self.version, "saved ring builder");
        Ok(())
    }

    // ----- Accessors -----

    pub fn part_power(&self) -> u8 {
        self.part_power
    }

    /// Number of partitions (`2^part_power`).
    pub fn partition_count(&self) -> u64 {
        1u64 << self.part_power
    }

    pub fn replicas(&self) -> f64 {
        self.replicas
    }

    pub fn min_part_hours(&self) -> u32 {
        self.min_part_hours
    }

    pub fn overload(&self) -> f64 {
        self.overload
    }

    /// Assignment version, bumped whenever a rebalance changes placement.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Device table indexed by id, including free slots.
    pub fn devices(&self) -> &[Option<Device>] {
        &self.devs
    }

    /// Look up a device by id. Devices pending removal are still returned.
    pub fn device(&self, id: DeviceId) -> Option<&Device> {
        self.devs.get(id.index()).and_then(Option::as_ref)
    }

    /// Devices currently holding replicas of `partition`, in replica order.
    pub fn partition_devices(&self, partition: u64) -> Vec<DeviceId> {
        let part = partition as usize;
        self.replica2part2dev
            .iter()
            .filter_map(|row| row.get(part).copied().flatten())
            .collect()
    }

    /// Unix seconds of the partition's last move (0 = never moved).
    pub fn last_moved(&self, partition: u64) -> u64 {
        self.last_moved.get(partition as usize).copied().unwrap_or(0)
    }

    pub(crate) fn live_devices(&self) -> impl Iterator<Item = &Device> {
        self.devs.iter().flatten().filter(|d| !d.deleted)
    }

    // ----- Settings -----

    /// Set the overload factor.
    pub fn set_overload(&mut self, overload: f64) -> Result<()> {
        if !overload.is_finite() || overload < 0.0 {
            return Err(PlacementError::InvalidOverload(overload));
        }
        self.overload = overload;
        debug!(overload, "set overload");
        Ok(())
    }

    /// Set the minimum hours between moves of the same partition.
    pub fn set_min_part_hours(&mut self, hours: u32) {
        self.min_part_hours = hours;
        debug!(hours, "set min_part_hours");
    }

    /// Forget all partition move times so the next rebalance may move anything.
    pub fn pretend_min_part_hours_passed(&mut self) {
        self.last_moved.iter_mut().for_each(|t| *t = 0);
    }

    // ----- Device table -----

    /// Add a device and return its id.
    ///
    /// The lowest free slot is reused. The device gets no partitions until
    /// the next rebalance.
    pub fn add_device(&mut self, new: NewDevice) -> Result<DeviceId> {
        validate_weight(new.weight)?;
        validate_required("ip", &new.ip)?;
        validate_required("device", &new.device)?;
        self.check_duplicate(&new.ip, new.port, &new.device, &HashSet::new())?;

        let slot = self
            .devs
            .iter()
            .position(Option::is_none)
            .unwrap_or(self.devs.len());
        let id = DeviceId::from(slot as u32);
        let dev = Device {
            id,
            region: new.region,
            zone: new.zone,
            ip: new.ip,
            port: new.port,
            replication_ip: new.replication_ip,
            replication_port: new.replication_port,
            device: new.device,
            meta: new.meta,
            weight: new.weight,
            parts: 0,
            deleted: false,
        };

        info!(%id, address = %device_label(&dev.ip, dev.port, &dev.device), weight = dev.weight, "added device");
        if slot == self.devs.len() {
            self.devs.push(Some(dev));
        } else {
            self.devs[slot] = Some(dev);
        }
        Ok(id)
    }

    /// Every live device matching `filter`. Devices pending removal are
    /// excluded.
    pub fn search(&self, filter: &DeviceFilter) -> Vec<&Device> {
        self.live_devices().filter(|d| filter.matches(d)).collect()
    }

    /// Set the weight of each listed device.
    pub fn set_weight(&mut self, ids: &[DeviceId], weight: f64) -> Result<()> {
        validate_weight(weight)?;
        self.check_live(ids)?;
        for id in ids {
            if let Some(dev) = self.device_mut(*id) {
                dev.weight = weight;
            }
            debug!(%id, weight, "set device weight");
        }
        Ok(())
    }

    /// Update address and identity fields of each listed device.
    ///
    /// Every resulting device is validated (required fields, duplicates)
    /// before any of them is changed.
    pub fn set_info(&mut self, ids: &[DeviceId], update: &DeviceUpdate) -> Result<()> {
        self.check_live(ids)?;
        if let Some(ip) = &update.ip {
            validate_required("ip", ip)?;
        }
        if let Some(name) = &update.device {
            validate_required("device", name)?;
        }

        let targets: HashSet<DeviceId> = ids.iter().copied().collect();
        let mut seen = HashSet::new();
        for id in ids {
            let Some(mut dev) = self.device(*id).cloned() else {
                return Err(PlacementError::DeviceNotFound(*id));
            };
            update.apply(&mut dev);
            let label = device_label(&dev.ip, dev.port, &dev.device);
            if !seen.insert(label.clone()) {
                return Err(PlacementError::DuplicateDevice {
                    address: label,
                    existing: *id,
                });
            }
            self.check_duplicate(&dev.ip, dev.port, &dev.device, &targets)?;
        }

        for id in ids {
            if let Some(dev) = self.device_mut(*id) {
                update.apply(dev);
            }
            debug!(%id, "updated device info");
        }
        Ok(())
    }

    /// Schedule devices for removal.
    ///
    /// Their partitions are reassigned, and their slots freed, by the next
    /// rebalance.
    pub fn remove_devices(&mut self, ids: &[DeviceId]) -> Result<()> {
        for id in ids {
            if self.device(*id).is_none() {
                return Err(PlacementError::DeviceNotFound(*id));
            }
        }
        for id in ids {
            if let Some(dev) = self.device_mut(*id) {
                dev.deleted = true;
            }
            info!(%id, "device scheduled for removal");
        }
        Ok(())
    }

    fn device_mut(&mut self, id: DeviceId) -> Option<&mut Device> {
        self.devs.get_mut(id.index()).and_then(Option::as_mut)
    }

    fn check_live(&self, ids: &[DeviceId]) -> Result<()> {
        for id in ids {
            match self.device(*id) {
                Some(dev) if !dev.deleted => {}
                _ => return Err(PlacementError::DeviceNotFound(*id)),
            }
        }
        Ok(())
    }

    /// Fail if a live device outside `ignore` already has this triple.
    fn check_duplicate(
        &self,
        ip: &str,
        port: u16,
        device: &str,
        ignore: &HashSet<DeviceId>,
    ) -> Result<()> {
        let clash = self.live_devices().find(|d| {
            !ignore.contains(&d.id) && d.ip == ip && d.port == port && d.device == device
        });
        match clash {
            Some(existing) => Err(PlacementError::DuplicateDevice {
                address: device_label(ip, port, device),
                existing: existing.id,
            }),
            None => Ok(()),
        }
    }

    // ----- Balance -----

    /// Total replica slots across all partitions.
    pub(crate) fn slot_count(&self) -> usize {
        self.replica2part2dev.iter().map(Vec::len).sum()
    }

    /// Sum of weights of devices that can take partitions.
    pub(crate) fn assignable_weight(&self) -> f64 {
        self.live_devices()
            .filter(|d| d.is_assignable())
            .map(|d| d.weight)
            .sum()
    }

    /// Ideal number of replica slots per device slot; 0 for devices that
    /// cannot take partitions.
    ///
    /// Shares are proportional to weight, except that a device never wants
    /// more than one replica of every partition. Slots a capped device cannot
    /// hold are spread over the remaining devices by weight.
    pub(crate) fn wanted_parts(&self) -> Vec<f64> {
        let cap = self.partition_count() as f64;
        let mut wanted = vec![0.0; self.devs.len()];
        let mut capped = vec![false; self.devs.len()];
        loop {
            let free: Vec<&Device> = self
                .live_devices()
                .filter(|d| d.is_assignable() && !capped[d.id.index()])
                .collect();
            let free_weight: f64 = free.iter().map(|d| d.weight).sum();
            if free_weight <= 0.0 {
                break;
            }
            let capped_count = capped.iter().filter(|&&c| c).count();
            let free_slots = self.slot_count() as f64 - capped_count as f64 * cap;

            let mut changed = false;
            for dev in free {
                let share = dev.weight / free_weight * free_slots;
                if share > cap {
                    capped[dev.id.index()] = true;
                    wanted[dev.id.index()] = cap;
                    changed = true;
                } else {
                    wanted[dev.id.index()] = share;
                }
            }
            if !changed {
                break;
            }
        }
        wanted
    }

    /// Largest percentage deviation between a device's assigned and ideal
    /// partition counts. 0 means perfectly balanced.
    pub fn get_balance(&self) -> f64 {
        let wanted_parts = self.wanted_parts();
        let mut balance: f64 = 0.0;
        for dev in self.devs.iter().flatten() {
            if !dev.is_assignable() {
                if dev.parts > 0 {
                    return MAX_BALANCE;
                }
                continue;
            }
            let wanted = wanted_parts[dev.id.index()];
            if wanted <= 0.0 {
                continue;
            }
            let dev_balance = 100.0 * (dev.parts as f64 - wanted).abs() / wanted;
            balance = balance.max(dev_balance);
        }
        balance
    }

    /// Greatest remaining cooldown, in seconds, across all partitions.
    pub fn min_part_seconds_left(&self) -> u64 {
        self.min_part_seconds_left_at(now_secs())
    }

    pub(crate) fn min_part_seconds_left_at(&self, now: u64) -> u64 {
        let cooldown = u64::from(self.min_part_hours) * 3600;
        self.last_moved
            .iter()
            .filter(|&&t| t > 0)
            .map(|&t| t.saturating_add(cooldown).saturating_sub(now))
            .max()
            .unwrap_or(0)
    }

    /// Number of distinct regions and zones among devices that can take
    /// partitions.
    pub fn devices_by_tier(&self) -> (usize, usize) {
        let mut regions = HashSet::new();
        let mut zones = HashSet::new();
        for dev in self.live_devices().filter(|d| d.is_assignable()) {
            regions.insert(dev.region);
            zones.insert(dev.zone_key());
        }
        (regions.len(), zones.len())
    }

    /// Operator summary of the builder.
    pub fn info(&self) -> BuilderInfo {
        let devices = self.live_devices().count();
        let (regions, zones) = self.devices_by_tier();
        BuilderInfo {
            version: self.version,
            partitions: self.partition_count(),
            replicas: self.replicas,
            regions,
            zones,
            devices,
            balance: if devices == 0 { 0.0 } else { self.get_balance() },
            min_part_hours: self.min_part_hours,
            min_part_seconds_left: self.min_part_seconds_left(),
            overload: self.overload,
        }
    }

    // ----- Ring output -----

    /// Build the immutable ring from the current assignment.
    ///
    /// Fails if any replica slot is unassigned or points at a device that is
    /// missing or pending removal.
    pub fn to_ring(&self) -> Result<Ring> {
        let mut rows = Vec::with_capacity(self.replica2part2dev.len());
        for (replica, row) in self.replica2part2dev.iter().enumerate() {
            let mut out = Vec::with_capacity(row.len());
            for (part, slot) in row.iter().enumerate() {
                let Some(id) = slot else {
                    return Err(PlacementError::NotRebalanced(format!(
                        "replica {replica} of partition {part} is unassigned"
                    )));
                };
                match self.device(*id) {
                    Some(dev) if !dev.deleted => out.push(*id),
                    _ => {
                        return Err(PlacementError::NotRebalanced(format!(
                            "replica {replica} of partition {part} is on removed device {id}"
                        )));
                    }
                }
            }
            rows.push(out);
        }

        let devs = self
            .devs
            .iter()
            .map(|slot| slot.clone().filter(|d| !d.deleted))
            .collect();
        Ok(Ring::from_parts(self.part_power, self.replicas, rows, devs))
    }

    /// Write the immutable ring artifact consumed by routing code.
    pub fn write_ring(&self, path: impl AsRef<Path>) -> Result<()> {
        let ring = self.to_ring()?;
        ring.save(path.as_ref())?;
        info!(path = %path.as_ref().display(), version = self.version, "wrote ring");
        Ok(())
    }
}

/// Length of each replica row for `parts` partitions.
///
/// Whole replicas get a full row; a fractional remainder gets a row covering
/// that fraction of partitions.
pub(crate) fn replica_row_lengths(parts: usize, replicas: f64) -> Vec<usize> {
    let whole = replicas.floor() as usize;
    let mut rows = vec![parts; whole];
    let tail = ((replicas - whole as f64) * parts as f64).round() as usize;
    if tail > 0 {
        rows.push(tail.min(parts));
    }
    rows
}

pub(crate) fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn validate_weight(weight: f64) -> Result<()> {
    if !weight.is_finite() || weight < 0.0 {
        return Err(PlacementError::InvalidWeight(weight));
    }
    Ok(())
}

fn validate_required(field: &'static str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(PlacementError::InvalidField {
            field,
            reason: "must not be empty".to_string(),
        });
    }
    Ok(())
}

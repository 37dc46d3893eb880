//! Rebalance engine: re-derives partition assignments after topology changes.
//!
//! A rebalance runs in three passes over a copy of the assignment table:
//!
//! 1. **Gather** replica slots that must move regardless of cooldown: empty
//!    slots, replicas on removed or zero-weight devices, and replicas that
//!    break anti-affinity (two replicas on one device, or fewer distinct
//!    regions/zones than the cluster could provide).
//! 2. **Place** every gathered slot on the best remaining device: prefer a
//!    new region, then a new zone, then a device under its overload limit,
//!    then the largest deficit, then the lowest id.
//! 3. **Balance** by moving replicas off devices holding more than their
//!    share (rounded up) onto devices below it. A move is only made when the
//!    destination keeps the partition at least as dispersed as before.
//!    Partitions still inside their `min_part_hours` cooldown are skipped,
//!    and a partition moves at most one replica per rebalance.
//!
//! Overload only widens where forced replicas may land in pass 2; balance
//! moves always aim at the weighted share.
//!
//! The builder is only modified once all three passes have finished.

use std::cmp::Ordering;
use std::collections::HashSet;

use tern_types::DeviceId;
use tracing::{debug, info};

use crate::PlacementError;
use crate::builder::{RingBuilder, now_secs};

/// Outcome of a successful rebalance.
#[derive(Debug, Clone, PartialEq)]
pub struct RebalanceSummary {
    /// Replica slots whose device changed.
    pub moved: usize,
    /// Balance after the rebalance (see [`RingBuilder::get_balance`]).
    pub balance: f64,
    /// Devices whose removal completed; their ids may be reused.
    pub removed: Vec<DeviceId>,
    /// Builder version after the rebalance.
    pub version: u64,
}

/// Placement view of one assignable device.
#[derive(Debug, Clone)]
struct Target {
    id: DeviceId,
    region: u32,
    zone: (u32, u32),
    wanted: f64,
    /// `wanted` rounded up; a device above this gives up replicas.
    share: u64,
    /// Share plus overload; forced placements avoid devices at this count.
    max_parts: u64,
}

/// Working state for a single rebalance.
struct Plan<'a> {
    builder: &'a RingBuilder,
    table: Vec<Vec<Option<DeviceId>>>,
    /// Per device-slot count of assigned replicas in `table`.
    counts: Vec<u64>,
    /// Indexed by device slot; `None` for devices that cannot take partitions.
    targets: Vec<Option<Target>>,
    region_count: usize,
    zone_count: usize,
    /// Slots awaiting placement, as (partition, replica).
    gathered: Vec<(usize, usize)>,
    touched: HashSet<usize>,
}

impl RingBuilder {
    /// Rebalance using the current wall-clock time for cooldown bookkeeping.
    pub fn rebalance(&mut self) -> Result<RebalanceSummary, PlacementError> {
        self.rebalance_at(now_secs())
    }

    /// Rebalance as if the current time were `now` (unix seconds).
    ///
    /// Fails without touching the builder when no device carries weight, or
    /// when there are fewer assignable devices than replicas.
    pub fn rebalance_at(&mut self, now: u64) -> Result<RebalanceSummary, PlacementError> {
        if self.assignable_weight() <= 0.0 {
            return Err(PlacementError::ZeroWeight);
        }
        let assignable = self.live_devices().filter(|d| d.is_assignable()).count();
        let needed = self.replica2part2dev.len();
        if assignable < needed {
            return Err(PlacementError::InsufficientDevices {
                needed,
                available: assignable,
            });
        }

        let mut plan = Plan::new(self);
        plan.gather_unassignable();
        plan.gather_dispersion();
        plan.place();
        plan.balance(now);
        let table = plan.table;

        let mut moved = 0usize;
        let mut changed = HashSet::new();
        for (old_row, new_row) in self.replica2part2dev.iter().zip(&table) {
            for (part, (old, new)) in old_row.iter().zip(new_row).enumerate() {
                if old != new {
                    moved += 1;
                    changed.insert(part);
                }
            }
        }
        for part in &changed {
            self.last_moved[*part] = now;
        }
        self.replica2part2dev = table;

        let mut counts = vec![0u64; self.devs.len()];
        for id in self.replica2part2dev.iter().flatten().flatten() {
            counts[id.index()] += 1;
        }
        let mut removed = Vec::new();
        for (slot, entry) in self.devs.iter_mut().enumerate() {
            let Some(dev) = entry.as_mut() else { continue };
            if dev.deleted {
                removed.push(dev.id);
                *entry = None;
            } else {
                dev.parts = counts[slot];
            }
        }

        if moved > 0 || !removed.is_empty() {
            self.version += 1;
        }
        let balance = self.get_balance();
        info!(
            moved,
            partitions = changed.len(),
            removed = removed.len(),
            balance,
            version = self.version,
            "rebalanced ring"
        );

        Ok(RebalanceSummary {
            moved,
            balance,
            removed,
            version: self.version,
        })
    }
}

impl<'a> Plan<'a> {
    fn new(builder: &'a RingBuilder) -> Self {
        let wanted_parts = builder.wanted_parts();
        let mut targets = vec![None; builder.devs.len()];
        let mut regions = HashSet::new();
        let mut zones = HashSet::new();
        for dev in builder.live_devices().filter(|d| d.is_assignable()) {
            let wanted = wanted_parts[dev.id.index()];
            let share = wanted.ceil() as u64;
            let max_parts = (wanted * (1.0 + builder.overload)).ceil() as u64;
            regions.insert(dev.region);
            zones.insert(dev.zone_key());
            targets[dev.id.index()] = Some(Target {
                id: dev.id,
                region: dev.region,
                zone: dev.zone_key(),
                wanted,
                share,
                max_parts,
            });
        }

        let table = builder.replica2part2dev.clone();
        let mut counts = vec![0u64; builder.devs.len()];
        for id in table.iter().flatten().flatten() {
            if let Some(count) = counts.get_mut(id.index()) {
                *count += 1;
            }
        }

        Self {
            builder,
            table,
            counts,
            targets,
            region_count: regions.len(),
            zone_count: zones.len(),
            gathered: Vec::new(),
            touched: HashSet::new(),
        }
    }

    fn partition_count(&self) -> usize {
        self.table.first().map_or(0, Vec::len)
    }

    fn target(&self, id: DeviceId) -> Option<&Target> {
        self.targets.get(id.index()).and_then(Option::as_ref)
    }

    /// Replicas currently assigned for `part`, as (replica, device).
    fn holders(&self, part: usize) -> Vec<(usize, DeviceId)> {
        self.table
            .iter()
            .enumerate()
            .filter_map(|(replica, row)| row.get(part).copied().flatten().map(|id| (replica, id)))
            .collect()
    }

    /// Number of replica rows that cover `part`.
    fn slots_for(&self, part: usize) -> usize {
        self.table.iter().filter(|row| part < row.len()).count()
    }

    fn unassign(&mut self, part: usize, replica: usize) {
        if let Some(id) = self.table[replica][part].take() {
            if let Some(count) = self.counts.get_mut(id.index()) {
                *count = count.saturating_sub(1);
            }
        }
        self.gathered.push((part, replica));
        self.touched.insert(part);
    }

    /// Empty slots and replicas on devices that can no longer hold data.
    fn gather_unassignable(&mut self) {
        for replica in 0..self.table.len() {
            for part in 0..self.table[replica].len() {
                match self.table[replica][part] {
                    None => {
                        self.gathered.push((part, replica));
                        self.touched.insert(part);
                    }
                    Some(id) if self.target(id).is_none() => self.unassign(part, replica),
                    Some(_) => {}
                }
            }
        }
    }

    /// Replicas that break anti-affinity. Ignores cooldown.
    fn gather_dispersion(&mut self) {
        for part in 0..self.partition_count() {
            let slots = self.slots_for(part);

            // Same device twice: keep the first.
            let mut seen = HashSet::new();
            for (replica, id) in self.holders(part) {
                if !seen.insert(id) {
                    self.unassign(part, replica);
                }
            }

            let wanted_regions = slots.min(self.region_count);
            while let Some(replica) = self.tier_victim(part, slots, wanted_regions, |t| {
                (t.region, 0)
            }) {
                self.unassign(part, replica);
            }

            let wanted_zones = slots.min(self.zone_count);
            while let Some(replica) = self.tier_victim(part, slots, wanted_zones, |t| t.zone) {
                self.unassign(part, replica);
            }
        }
    }

    /// The last replica of `part` sharing a tier with an earlier one, if the
    /// partition can no longer reach `wanted` distinct tiers by filling its
    /// empty slots.
    fn tier_victim(
        &self,
        part: usize,
        slots: usize,
        wanted: usize,
        tier: impl Fn(&Target) -> (u32, u32),
    ) -> Option<usize> {
        let holders = self.holders(part);
        let mut distinct = HashSet::new();
        let mut duplicate = None;
        for (replica, id) in &holders {
            let Some(target) = self.target(*id) else {
                continue;
            };
            if !distinct.insert(tier(target)) {
                duplicate = Some(*replica);
            }
        }
        let empty = slots - holders.len();
        if distinct.len() + empty >= wanted {
            return None;
        }
        duplicate
    }

    fn place(&mut self) {
        let mut gathered = std::mem::take(&mut self.gathered);
        gathered.sort_unstable();
        for (part, replica) in gathered {
            if let Some(id) = self.best_device(part) {
                self.table[replica][part] = Some(id);
                self.counts[id.index()] += 1;
            }
        }
    }

    /// Best device for a new replica of `part`, among devices not already
    /// holding it.
    fn best_device(&self, part: usize) -> Option<DeviceId> {
        let holders: Vec<&Target> = self
            .holders(part)
            .into_iter()
            .filter_map(|(_, id)| self.target(id))
            .collect();

        self.targets
            .iter()
            .flatten()
            .filter(|t| holders.iter().all(|h| h.id != t.id))
            .min_by(|a, b| self.compare(a, b, &holders))
            .map(|t| t.id)
    }

    /// Replicas held beyond `id`'s share.
    fn excess(&self, id: DeviceId) -> u64 {
        self.target(id)
            .map_or(0, |t| self.counts[id.index()].saturating_sub(t.share))
    }

    /// Move replicas off devices above their share, outside cooldown.
    fn balance(&mut self, now: u64) {
        let cooldown = u64::from(self.builder.min_part_hours) * 3600;
        let mut over: u64 = self.targets.iter().flatten().map(|t| self.excess(t.id)).sum();
        if over == 0 {
            return;
        }

        let mut skipped = 0usize;
        let mut stuck = 0usize;
        for part in 0..self.partition_count() {
            if self.touched.contains(&part) {
                continue;
            }
            let last = self.builder.last_moved[part];
            if last != 0 && last.saturating_add(cooldown) > now {
                skipped += 1;
                continue;
            }

            let mut victims: Vec<(usize, DeviceId)> = self
                .holders(part)
                .into_iter()
                .filter(|(_, id)| self.excess(*id) > 0)
                .collect();
            victims.sort_by(|(_, a), (_, b)| {
                self.excess(*b).cmp(&self.excess(*a)).then_with(|| a.cmp(b))
            });
            if victims.is_empty() {
                continue;
            }

            let dest = victims.iter().find_map(|&(replica, id)| {
                Some((replica, id, self.balance_destination(part, replica)?))
            });
            let Some((replica, from, to)) = dest else {
                stuck += 1;
                continue;
            };
            self.table[replica][part] = Some(to);
            self.counts[from.index()] -= 1;
            self.counts[to.index()] += 1;
            self.touched.insert(part);
            over -= 1;
            if over == 0 {
                break;
            }
        }
        if skipped > 0 {
            debug!(skipped, "partitions held back by min_part_hours");
        }
        if stuck > 0 {
            debug!(stuck, "partitions with no device able to take an excess replica");
        }
    }

    /// Device below its share that could take `replica` of `part` without
    /// the partition losing a distinct region or zone.
    fn balance_destination(&self, part: usize, replica: usize) -> Option<DeviceId> {
        let victim = self.target(self.table[replica][part]?)?;
        let others: Vec<&Target> = self
            .holders(part)
            .into_iter()
            .filter(|&(r, _)| r != replica)
            .filter_map(|(_, id)| self.target(id))
            .collect();
        let tier = |t: &Target| {
            (
                others.iter().any(|h| h.region == t.region),
                others.iter().any(|h| h.zone == t.zone),
            )
        };
        let limit = tier(victim);

        self.targets
            .iter()
            .flatten()
            .filter(|t| t.id != victim.id && others.iter().all(|h| h.id != t.id))
            .filter(|t| self.counts[t.id.index()] < t.share && tier(t) <= limit)
            .min_by(|a, b| self.compare(a, b, &others))
            .map(|t| t.id)
    }

    fn compare(&self, a: &Target, b: &Target, holders: &[&Target]) -> Ordering {
        let key = |t: &Target| {
            (
                holders.iter().any(|h| h.region == t.region),
                holders.iter().any(|h| h.zone == t.zone),
                self.counts[t.id.index()] >= t.max_parts,
            )
        };
        let deficit = |t: &Target| t.wanted - self.counts[t.id.index()] as f64;

        key(a)
            .cmp(&key(b))
            .then_with(|| deficit(b).total_cmp(&deficit(a)))
            .then_with(|| a.id.cmp(&b.id))
    }
}

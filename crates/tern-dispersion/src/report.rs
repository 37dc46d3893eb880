//! Dispersion report: cross-references the replication backlog against the
//! rings to say whether every partition's replicas are where they belong.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use tern_placement::RingView;
use tern_types::{ProcessPass, QueuedReplication, RingType};
use tracing::{info, warn};

use crate::context::ClusterContext;

/// Replication-queue tag written by the dispersion scanner.
pub const DISPERSION_TAG: &str = "dispersion";

/// Process-pass label of the dispersion scanner.
pub const SCAN_LABEL: &str = "dispersion scan";

/// Progress marker suffix meaning the scan has never actually started.
pub const NEVER_RUN_SUFFIX: &str = "-init does not yet exist";

const REPORT_NAME: &str = "Dispersion Report";

/// One replica the dispersion scan found missing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingReplica {
    /// When the replication was queued.
    pub time: DateTime<Utc>,
    /// `ip:port` of the service that should hold the replica.
    pub service: String,
    /// Device name on that service.
    pub device: String,
}

/// Dispersion state of one ring.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubReport {
    /// Policy name; empty for the container ring.
    pub policy_name: String,
    /// Start of the most recent scan, `None` if never run.
    pub start: Option<DateTime<Utc>>,
    /// Completion of the most recent scan, `None` if never run or in progress.
    pub complete: Option<DateTime<Utc>>,
    pub total_partitions: u64,
    pub replica_count: usize,
    /// Missing replicas keyed by partition.
    pub partitions: BTreeMap<u64, Vec<MissingReplica>>,
    pub services_with_errors: usize,
    pub devices_with_errors: usize,
    /// Set when the backlog query for this ring failed.
    pub queue_failed: bool,
}

impl SubReport {
    fn for_ring(ring: &dyn RingView) -> Self {
        Self {
            total_partitions: ring.partition_count(),
            replica_count: ring.replica_count(),
            ..Self::default()
        }
    }

    /// No missing replicas and the backlog was readable.
    pub fn passed(&self) -> bool {
        self.partitions.is_empty() && !self.queue_failed
    }

    /// Take scan times from `pass`, treating the never-run marker as no scan.
    fn apply_pass(&mut self, pass: ProcessPass) {
        if pass.progress.ends_with(NEVER_RUN_SUFFIX) {
            self.start = None;
            self.complete = None;
        } else {
            self.start = pass.start;
            self.complete = pass.complete;
        }
    }

    fn record_missing(&mut self, ring: &dyn RingView, entry: QueuedReplication) {
        let device = ring
            .all_devices()
            .get(entry.to_device.index())
            .and_then(Option::as_ref);
        let missing = match device {
            Some(dev) => MissingReplica {
                time: entry.time,
                service: dev.service_address(),
                device: dev.device.clone(),
            },
            None => MissingReplica {
                time: entry.time,
                service: format!("unknown device {}", entry.to_device),
                device: String::new(),
            },
        };
        self.partitions.entry(entry.partition).or_default().push(missing);
    }

    /// Number of partitions missing each count of copies, ascending.
    pub fn histogram(&self) -> BTreeMap<usize, usize> {
        let mut counts = BTreeMap::new();
        for missing in self.partitions.values() {
            *counts.entry(missing.len()).or_insert(0) += 1;
        }
        counts
    }

    /// Text form of the sub-report, with durations measured from `now`.
    pub fn render(&self, now: DateTime<Utc>) -> String {
        let mut s = String::new();
        match (self.start, self.complete) {
            (None, _) => s.push_str("No known dispersion scan has been run.\n"),
            (Some(start), None) => s.push_str(&format!(
                "Last dispersion scan started {} and has yet to complete after {}.\n",
                start.format("%Y-%m-%d %H:%M"),
                format_duration((now - start).num_seconds()),
            )),
            (Some(start), Some(complete)) => s.push_str(&format!(
                "Last dispersion scan ran from {} to {} ({} ago for {}).\n",
                start.format("%Y-%m-%d %H:%M"),
                complete.format("%Y-%m-%d %H:%M"),
                format_duration((now - complete).num_seconds()),
                format_duration((complete - start).num_seconds()),
            )),
        }
        s.push_str(&format!(
            "There are {} partitions configured for {} copies.\n",
            self.total_partitions, self.replica_count
        ));
        if self.start.is_some() && self.partitions.is_empty() {
            s.push_str("All partition copies were in place when last checked.\n");
        } else {
            for (copies, partitions) in self.histogram() {
                if partitions == 1 {
                    s.push_str("! 1 partition was missing ");
                } else {
                    s.push_str(&format!("! {partitions} partitions were missing "));
                }
                if copies == 1 {
                    s.push_str("1 copy.\n");
                } else {
                    s.push_str(&format!("{copies} copies.\n"));
                }
            }
        }
        s.push_str(&error_caveat(self.services_with_errors, "service", "services"));
        s.push_str(&error_caveat(self.devices_with_errors, "device", "devices"));
        s
    }
}

fn error_caveat(count: usize, one: &str, many: &str) -> String {
    match count {
        0 => String::new(),
        1 => format!("!! 1 {one} has been giving errors which may skew the report.\n"),
        n => format!("!! {n} {many} have been giving errors which may skew the report.\n"),
    }
}

/// Whole-cluster dispersion report.
#[derive(Debug, Clone, PartialEq)]
pub struct DispersionReport {
    pub name: String,
    pub time: DateTime<Utc>,
    pub pass: bool,
    /// Query failures, in the order they happened.
    pub errors: Vec<String>,
    /// Container ring; `None` when its ring could not be loaded.
    pub container: Option<SubReport>,
    /// Object rings keyed by policy index.
    pub objects: BTreeMap<u32, SubReport>,
}

impl DispersionReport {
    fn new(time: DateTime<Utc>) -> Self {
        Self {
            name: REPORT_NAME.to_string(),
            time,
            pass: true,
            errors: Vec::new(),
            container: None,
            objects: BTreeMap::new(),
        }
    }

    pub fn passed(&self) -> bool {
        self.pass
    }

    /// Text form of the report, with durations measured from `now`.
    pub fn render(&self, now: DateTime<Utc>) -> String {
        let mut s = format!("[{}] {}\n", self.time.format("%Y-%m-%d %H:%M:%S"), self.name);
        for e in &self.errors {
            s.push_str(&format!("!! {e}\n"));
        }
        if let Some(container) = &self.container {
            s.push_str("\nContainer Dispersion Report\n");
            s.push_str(&container.render(now));
        }
        for (policy, report) in &self.objects {
            s.push_str(&format!(
                "\nObject Dispersion Report for Policy: {policy} {}\n",
                report.policy_name
            ));
            s.push_str(&report.render(now));
        }
        s
    }

    fn fail(&mut self, error: impl fmt::Display) {
        self.errors.push(error.to_string());
        self.pass = false;
    }
}

impl fmt::Display for DispersionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(Utc::now()))
    }
}

/// Builds [`DispersionReport`]s from a [`ClusterContext`].
///
/// Query failures never abort the build: each is recorded in
/// [`DispersionReport::errors`] and the remaining rings are still reported.
pub struct ReportBuilder {
    ctx: ClusterContext,
}

impl ReportBuilder {
    pub fn new(ctx: ClusterContext) -> Self {
        Self { ctx }
    }

    /// Build a report stamped with the current time.
    pub fn build(&self) -> DispersionReport {
        self.build_at(Utc::now())
    }

    /// Build a report stamped with `time`.
    pub fn build_at(&self, time: DateTime<Utc>) -> DispersionReport {
        let mut report = DispersionReport::new(time);
        self.container_report(&mut report);
        self.object_reports(&mut report);
        if !report.errors.is_empty() {
            report.pass = false;
        }
        info!(
            pass = report.pass,
            errors = report.errors.len(),
            policies = report.objects.len(),
            "built dispersion report"
        );
        report
    }

    fn container_report(&self, report: &mut DispersionReport) {
        let ring_type = RingType::Container;
        let ring = match self.ctx.rings.ring(ring_type, 0) {
            Ok(ring) => ring,
            Err(e) => {
                warn!(%ring_type, error = %e, "ring unavailable");
                report.fail(e);
                return;
            }
        };

        let mut sub = SubReport::for_ring(ring.as_ref());
        match self.ctx.queue.process_pass(SCAN_LABEL, ring_type, 0) {
            Ok(pass) => sub.apply_pass(pass),
            Err(e) => {
                warn!(%ring_type, error = %e, "scan progress query failed");
                report.fail(e);
            }
        }
        self.error_counts(report, &mut sub, ring_type, 0);
        self.backlog(report, &mut sub, ring.as_ref(), ring_type, 0);
        report.container = Some(sub);
    }

    fn object_reports(&self, report: &mut DispersionReport) {
        let ring_type = RingType::Object;
        let policies = match self.ctx.policies.policies() {
            Ok(policies) => policies,
            Err(e) => {
                warn!(error = %e, "policy registry unavailable");
                report.fail(e);
                return;
            }
        };

        for policy in policies {
            let ring = match self.ctx.rings.ring(ring_type, policy.index) {
                Ok(ring) => ring,
                Err(e) => {
                    warn!(%ring_type, policy = policy.index, error = %e, "ring unavailable");
                    report.fail(e);
                    continue;
                }
            };

            let mut sub = SubReport::for_ring(ring.as_ref());
            match self.ctx.queue.process_pass(SCAN_LABEL, ring_type, policy.index) {
                Ok(pass) => sub.apply_pass(pass),
                Err(e) => {
                    warn!(%ring_type, policy = policy.index, error = %e, "scan progress query failed");
                    report.fail(e);
                    continue;
                }
            }
            sub.policy_name = policy.name;
            self.error_counts(report, &mut sub, ring_type, policy.index);
            self.backlog(report, &mut sub, ring.as_ref(), ring_type, policy.index);
            report.objects.insert(policy.index, sub);
        }
    }

    fn error_counts(
        &self,
        report: &mut DispersionReport,
        sub: &mut SubReport,
        ring_type: RingType,
        policy: u32,
    ) {
        match self.ctx.queue.count_of_services_with_errors(ring_type, policy) {
            Ok(n) => sub.services_with_errors = n,
            Err(e) => {
                warn!(%ring_type, policy, error = %e, "service error count query failed");
                report.fail(e);
            }
        }
        match self.ctx.queue.count_of_devices_with_errors(ring_type, policy) {
            Ok(n) => sub.devices_with_errors = n,
            Err(e) => {
                warn!(%ring_type, policy, error = %e, "device error count query failed");
                report.fail(e);
            }
        }
    }

    fn backlog(
        &self,
        report: &mut DispersionReport,
        sub: &mut SubReport,
        ring: &dyn RingView,
        ring_type: RingType,
        policy: u32,
    ) {
        match self
            .ctx
            .queue
            .queued_replications(ring_type, policy, DISPERSION_TAG)
        {
            Ok(entries) => {
                if !entries.is_empty() {
                    report.pass = false;
                }
                for entry in entries {
                    sub.record_missing(ring, entry);
                }
            }
            Err(e) => {
                warn!(%ring_type, policy, error = %e, "replication queue query failed");
                sub.queue_failed = true;
                report.fail(e);
            }
        }
    }
}

/// Whole-second duration in the `1h2m3s` style.
pub fn format_duration(secs: i64) -> String {
    if secs == 0 {
        return "0s".to_string();
    }
    let sign = if secs < 0 { "-" } else { "" };
    let secs = secs.unsigned_abs();
    let (h, m, s) = (secs / 3600, secs / 60 % 60, secs % 60);
    if h > 0 {
        format!("{sign}{h}h{m}m{s}s")
    } else if m > 0 {
        format!("{sign}{m}m{s}s")
    } else {
        format!("{sign}{s}s")
    }
}

//! Integration test: dispersion audit.
//!
//! Publish real rings, fill the on-disk replication backlog the way a
//! scanner would, and check the report built from them.

use chrono::{Duration, TimeZone, Utc};
use tern_dispersion::{DISPERSION_TAG, NEVER_RUN_SUFFIX, ReportBuilder, SCAN_LABEL};
use tern_integration_tests::TestCluster;
use tern_meta::{MetaStore, ReplicationQueue};
use tern_placement::RingView;
use tern_types::{DeviceId, QueuedReplication, RingType};

fn queue(meta: &MetaStore, ring_type: RingType, policy: u32, partition: u64, device: u32) {
    meta.queue_replication(
        ring_type,
        policy,
        DISPERSION_TAG,
        &QueuedReplication {
            partition,
            to_device: DeviceId::from(device),
            time: Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap(),
        },
    )
    .unwrap();
}

/// Mark a completed scan for every ring in the cluster.
fn complete_scans(c: &TestCluster, policies: &[u32]) {
    let start = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
    let end = start + Duration::minutes(90);
    let mut rings = vec![(RingType::Container, 0)];
    rings.extend(policies.iter().map(|p| (RingType::Object, *p)));
    for (ring_type, policy) in rings {
        c.meta()
            .start_pass(SCAN_LABEL, ring_type, policy, start, "scanning")
            .unwrap();
        c.meta().complete_pass(SCAN_LABEL, ring_type, policy, end).unwrap();
    }
}

#[test]
fn test_healthy_cluster_passes() {
    let c = TestCluster::with_rings(6, 3.0, 3);
    complete_scans(&c, &[0]);

    let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
    let report = ReportBuilder::new(c.context()).build_at(now);
    assert!(report.passed(), "{}", report.render(now));
    assert!(report.errors.is_empty());

    let container = report.container.as_ref().unwrap();
    assert_eq!(container.total_partitions, 64);
    assert_eq!(container.replica_count, 3);

    let text = report.render(now);
    assert!(text.starts_with("[2026-03-01 12:00:00] Dispersion Report\n"));
    assert!(text.contains("\nContainer Dispersion Report\n"));
    assert!(text.contains("\nObject Dispersion Report for Policy: 0 gold\n"));
    assert!(text.contains(
        "Last dispersion scan ran from 2026-03-01 09:00 to 2026-03-01 10:30 (1h30m0s ago for 1h30m0s)."
    ));
    assert!(text.contains("There are 64 partitions configured for 3 copies."));
    assert!(text.contains("All partition copies were in place when last checked."));
}

#[test]
fn test_backlog_fails_report() {
    let c = TestCluster::with_rings(6, 3.0, 3);
    complete_scans(&c, &[0]);
    queue(c.meta(), RingType::Object, 0, 7, 1);
    queue(c.meta(), RingType::Object, 0, 9, 0);
    queue(c.meta(), RingType::Object, 0, 9, 2);
    // Other tags are not part of the audit.
    c.meta()
        .queue_replication(
            RingType::Object,
            0,
            "handoff",
            &QueuedReplication {
                partition: 11,
                to_device: DeviceId::from(0),
                time: Utc::now(),
            },
        )
        .unwrap();

    let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
    let report = ReportBuilder::new(c.context()).build_at(now);
    assert!(!report.passed());
    assert!(report.errors.is_empty());
    assert!(report.container.as_ref().unwrap().passed());

    let gold = &report.objects[&0];
    assert_eq!(gold.partitions.len(), 2);
    assert_eq!(gold.partitions[&9].len(), 2);
    let ring = c.ring_directory().load(RingType::Object, 0).unwrap();
    let dev = ring.all_devices()[1].as_ref().unwrap();
    assert_eq!(gold.partitions[&7][0].service, dev.service_address());
    assert_eq!(gold.partitions[&7][0].device, dev.device);

    let text = report.render(now);
    assert!(text.contains("! 1 partition was missing 1 copy.\n! 1 partition was missing 2 copies.\n"));
}

#[test]
fn test_restored_replica_clears_backlog() {
    let c = TestCluster::with_rings(5, 2.0, 2);
    complete_scans(&c, &[0]);
    queue(c.meta(), RingType::Container, 0, 3, 1);
    assert!(!ReportBuilder::new(c.context()).build().passed());

    c.meta()
        .clear_replication(RingType::Container, 0, DISPERSION_TAG, 3, DeviceId::from(1))
        .unwrap();
    assert!(ReportBuilder::new(c.context()).build().passed());
}

#[test]
fn test_error_counters_are_caveats_only() {
    let c = TestCluster::with_rings(5, 2.0, 2);
    complete_scans(&c, &[0]);
    c.meta()
        .record_service_error(RingType::Object, 0, "10.1.1.1:6200")
        .unwrap();
    c.meta()
        .record_service_error(RingType::Object, 0, "10.1.1.1:6200")
        .unwrap();
    c.meta()
        .record_device_error(RingType::Object, 0, "10.1.1.1:6200/sdb")
        .unwrap();
    c.meta()
        .record_device_error(RingType::Object, 0, "10.1.2.1:6200/sdb")
        .unwrap();

    assert_eq!(c.meta().count_of_services_with_errors(RingType::Object, 0).unwrap(), 1);
    assert_eq!(c.meta().count_of_devices_with_errors(RingType::Object, 0).unwrap(), 2);

    let now = Utc::now();
    let report = ReportBuilder::new(c.context()).build_at(now);
    assert!(report.passed());
    let text = report.render(now);
    assert!(text.contains("!! 1 service has been giving errors which may skew the report.\n"));
    assert!(text.contains("!! 2 devices have been giving errors which may skew the report.\n"));
}

#[test]
fn test_scan_states() {
    let c = TestCluster::with_rings(5, 2.0, 2);
    let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();

    // Nothing recorded yet.
    let text = ReportBuilder::new(c.context()).build_at(now).render(now);
    assert!(text.contains("No known dispersion scan has been run."));

    // The never-run marker counts as no scan.
    let start = now - Duration::minutes(5);
    let marker = format!("scan{NEVER_RUN_SUFFIX}");
    c.meta()
        .start_pass(SCAN_LABEL, RingType::Container, 0, start, &marker)
        .unwrap();
    let report = ReportBuilder::new(c.context()).build_at(now);
    assert!(report.container.as_ref().unwrap().start.is_none());

    // A scan in progress.
    c.meta()
        .update_pass(SCAN_LABEL, RingType::Container, 0, now, "partition 12")
        .unwrap();
    let text = ReportBuilder::new(c.context()).build_at(now).render(now);
    assert!(text.contains("Last dispersion scan started 2026-03-01 11:55 and has yet to complete after 5m0s."));
}

#[test]
fn test_missing_rings_are_reported() {
    let mut c = TestCluster::with_rings(5, 2.0, 2);
    c.add_policy(1, "silver", 5, 2.0, 2);
    c.add_policy_without_ring(2, "bronze");
    complete_scans(&c, &[0, 1, 2]);
    std::fs::remove_file(c.ring_directory().path_for(RingType::Container, 0)).unwrap();

    let now = Utc::now();
    let report = ReportBuilder::new(c.context()).build_at(now);
    assert!(!report.passed());
    assert_eq!(report.errors.len(), 2, "{:?}", report.errors);
    assert!(report.container.is_none());
    assert_eq!(report.objects.keys().copied().collect::<Vec<_>>(), vec![0, 1]);

    let text = report.render(now);
    let gold = text.find("Policy: 0 gold").unwrap();
    let silver = text.find("Policy: 1 silver").unwrap();
    assert!(gold < silver);
    assert!(!text.contains("bronze"));
    assert_eq!(text.matches("\n!! ").count(), 2);
}

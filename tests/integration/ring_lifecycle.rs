//! Integration test: ring lifecycle.
//!
//! Create a builder on disk, grow and shrink its device table across
//! several rebalances, and check every published ring routes consistently.

use std::collections::HashSet;

use tern_dispersion::RingDirectory;
use tern_integration_tests::{TestCluster, device};
use tern_placement::{DeviceFilter, PlacementError, Ring, RingBuilder, RingView};
use tern_types::{DeviceId, RingType};

const HOUR: u64 = 3600;

/// Every partition of `ring` maps to `replicas` distinct live devices.
fn assert_routable(ring: &Ring, replicas: usize) {
    for part in 0..ring.partition_count() {
        let nodes = ring.get_nodes(part).expect("partition in range");
        assert_eq!(nodes.len(), replicas, "partition {part}");
        let ids: HashSet<DeviceId> = nodes.iter().map(|d| d.id).collect();
        assert_eq!(ids.len(), replicas, "partition {part} repeats a device");
    }
    assert!(ring.get_nodes(ring.partition_count()).is_none());
}

#[test]
fn test_grow_then_publish() {
    let c = TestCluster::new();
    let path = c.builder_path(RingType::Object, 0);
    let mut builder = RingBuilder::create(&path, 8, 3.0, 1).unwrap();
    for zone in 1..=3 {
        for host in 1..=2 {
            builder.add_device(device(1, zone, host, 100.0)).unwrap();
        }
    }
    let first = builder.rebalance_at(HOUR).unwrap();
    assert_eq!(first.moved, 256 * 3);
    assert_eq!(first.version, 1);
    builder.save(&path).unwrap();

    let rings = RingDirectory::new(c.rings_dir(), TestCluster::hasher());
    let ring_path = rings.path_for(RingType::Object, 0);
    builder.write_ring(&ring_path).unwrap();
    let ring = rings.load(RingType::Object, 0).unwrap();
    assert_routable(&ring, 3);

    // Each zone holds exactly one replica of every partition.
    for part in 0..ring.partition_count() {
        let zones: HashSet<u32> = ring.get_nodes(part).unwrap().iter().map(|d| d.zone).collect();
        assert_eq!(zones.len(), 3);
    }

    // A second region joins: after enough hours every partition reaches it.
    let mut builder = RingBuilder::load(&path).unwrap();
    builder.add_device(device(2, 1, 1, 300.0)).unwrap();
    let mut now = HOUR;
    for _ in 0..4 {
        now += 2 * HOUR;
        builder.rebalance_at(now).unwrap();
    }
    builder.write_ring(&ring_path).unwrap();
    let ring = Ring::load(&ring_path).unwrap();
    assert_routable(&ring, 3);
    let regions: HashSet<u32> = ring.all_devices().iter().flatten().map(|d| d.region).collect();
    assert_eq!(regions.len(), 2);
}

#[test]
fn test_drain_and_remove_device() {
    let c = TestCluster::new();
    let mut builder = c.build_ring(RingType::Object, 0, 6, 2.0, 4);
    let victim = builder
        .search(&DeviceFilter {
            zone: Some(4),
            ..Default::default()
        })
        .first()
        .map(|d| d.id)
        .unwrap();

    builder.remove_devices(&[victim]).unwrap();
    // A removed device still blocks publishing until the next rebalance.
    assert!(matches!(
        builder.to_ring(),
        Err(PlacementError::NotRebalanced(_))
    ));

    builder.pretend_min_part_hours_passed();
    let summary = builder.rebalance().unwrap();
    assert_eq!(summary.removed, vec![victim]);
    assert!(builder.device(victim).is_none());

    let ring = builder.to_ring().unwrap();
    assert_routable(&ring, 2);
    for part in 0..ring.partition_count() {
        assert!(ring.get_nodes(part).unwrap().iter().all(|d| d.id != victim));
    }

    // The freed slot is reused by the next device.
    let id = builder.add_device(device(1, 5, 1, 100.0)).unwrap();
    assert_eq!(id, victim);
}

#[test]
fn test_fractional_replicas_publish() {
    let c = TestCluster::new();
    let builder = c.build_ring(RingType::Container, 0, 6, 2.5, 3);
    let ring = builder.to_ring().unwrap();
    assert_eq!(ring.replica_count(), 3);

    let full = (0..ring.partition_count())
        .filter(|&p| ring.get_nodes(p).unwrap().len() == 3)
        .count();
    assert_eq!(full, 32, "half the partitions carry a third replica");
    for part in 0..ring.partition_count() {
        assert!(ring.get_nodes(part).unwrap().len() >= 2);
    }
}

#[test]
fn test_too_few_devices_is_rejected() {
    let c = TestCluster::new();
    let path = c.builder_path(RingType::Object, 0);
    let mut builder = RingBuilder::create(&path, 4, 3.0, 0).unwrap();
    builder.add_device(device(1, 1, 1, 1.0)).unwrap();
    builder.add_device(device(1, 2, 1, 1.0)).unwrap();

    assert!(matches!(
        builder.rebalance(),
        Err(PlacementError::InsufficientDevices { needed: 3, available: 2 })
    ));
    assert!(builder.write_ring(c.path().join("object.ring")).is_err());
}

#[test]
fn test_salts_change_routing_not_placement() {
    let c = TestCluster::with_rings(8, 3.0, 3);
    let rings = c.ring_directory();
    let salted = rings.load(RingType::Object, 0).unwrap();
    let plain = Ring::load(rings.path_for(RingType::Object, 0)).unwrap();

    let ids = |ring: &Ring, p: u64| -> Vec<DeviceId> {
        ring.get_nodes(p).unwrap().iter().map(|d| d.id).collect()
    };
    for part in 0..salted.partition_count() {
        assert_eq!(ids(&salted, part), ids(&plain, part));
    }

    let differs = (0..64)
        .map(|i| format!("obj-{i}"))
        .filter(|o| salted.get_partition("AUTH_a", "c", o) != plain.get_partition("AUTH_a", "c", o))
        .count();
    assert!(differs > 0);
}

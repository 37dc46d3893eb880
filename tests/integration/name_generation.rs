//! Integration test: dispersion name generation against published rings.
//!
//! Names must land on the partition they were generated for when hashed by
//! a ring loaded with the cluster's salts, and cancellation must stop the
//! workers promptly.

use std::collections::HashSet;
use std::sync::Arc;

use tern_dispersion::{ADMIN_ACCOUNT, CONTAINER_PREFIX, NameGenerator, object_container};
use tern_integration_tests::TestCluster;
use tern_placement::RingView;
use tern_types::RingType;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[test]
fn test_container_names_cover_every_partition() {
    let c = TestCluster::with_rings(7, 3.0, 3);
    let ring = c.ring_directory().load(RingType::Container, 0).unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let sent = NameGenerator::with_workers(4).generate(
        "",
        CONTAINER_PREFIX,
        &ring,
        tx,
        &CancellationToken::new(),
    );
    assert_eq!(sent, 128);

    let mut partitions = HashSet::new();
    while let Ok(name) = rx.try_recv() {
        assert!(name.starts_with(CONTAINER_PREFIX));
        assert!(partitions.insert(ring.get_partition(ADMIN_ACCOUNT, &name, "")));
    }
    assert_eq!(partitions.len(), 128);
}

#[tokio::test]
#[ntest::timeout(30000)]
async fn test_object_names_stream_to_async_consumer() {
    let mut c = TestCluster::with_rings(6, 2.0, 2);
    c.add_policy(3, "archive", 8, 2.0, 2);
    let ring = Arc::new(c.ring_directory().load(RingType::Object, 3).unwrap());

    let (tx, mut rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();
    let worker = {
        let ring = ring.clone();
        let cancel = cancel.clone();
        tokio::task::spawn_blocking(move || {
            NameGenerator::with_workers(3).generate(&object_container(3), "", &*ring, tx, &cancel)
        })
    };

    let container = object_container(3);
    let mut seen = HashSet::new();
    while let Some(name) = rx.recv().await {
        seen.insert(ring.get_partition(ADMIN_ACCOUNT, &container, &name));
    }
    assert_eq!(worker.await.unwrap(), 256);
    assert_eq!(seen.len(), 256);
}

#[tokio::test]
#[ntest::timeout(30000)]
async fn test_cancel_mid_stream() {
    let c = TestCluster::with_rings(14, 1.0, 1);
    let ring = Arc::new(c.ring_directory().load(RingType::Container, 0).unwrap());

    let (tx, mut rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();
    let worker = {
        let ring = ring.clone();
        let cancel = cancel.clone();
        tokio::task::spawn_blocking(move || {
            NameGenerator::with_workers(2).generate("", CONTAINER_PREFIX, &*ring, tx, &cancel)
        })
    };

    let mut received = 0u64;
    while received < 10 {
        if rx.recv().await.is_none() {
            break;
        }
        received += 1;
    }
    cancel.cancel();

    // Drain whatever was in flight; the channel closes once workers stop.
    while rx.recv().await.is_some() {
        received += 1;
    }
    let sent = worker.await.unwrap();
    assert_eq!(sent, received);
    assert!(sent < ring.partition_count());
}

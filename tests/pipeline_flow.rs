use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use streamtally::{
    Record,
    pipeline::{
        aggregate::{self, AggregatorStatus},
        counts::{CountTable, DeviceCount},
        intake,
    },
};

fn record(device: &str) -> Record {
    Record::new(device, 1_722_000_000_000, b"abcd".to_vec())
}

fn total(snapshot: &[DeviceCount]) -> u64 {
    snapshot.iter().map(|entry| entry.count).sum()
}

#[tokio::test]
async fn drained_counts_match_submissions() {
    let (tx, rx) = intake::channel(16);
    let table = CountTable::default();
    let reader = table.reader();
    let (status_tx, _status_rx) = watch::channel(AggregatorStatus::Running);
    let aggregator = aggregate::spawn(rx, table, status_tx, CancellationToken::new());

    for _ in 0..3 {
        tx.enqueue(record("sensor-1")).await.expect("enqueue");
    }
    for _ in 0..2 {
        tx.enqueue(record("sensor-2")).await.expect("enqueue");
    }
    drop(tx);

    let report = aggregator.await.expect("join").expect("aggregator");
    assert_eq!(report.records_counted, 5);
    assert_eq!(report.records_abandoned, 0);

    let mut snapshot = reader.snapshot();
    snapshot.sort_by(|a, b| a.device_id.cmp(&b.device_id));
    assert_eq!(
        snapshot,
        vec![
            DeviceCount {
                device_id: "sensor-1".to_string(),
                count: 3
            },
            DeviceCount {
                device_id: "sensor-2".to_string(),
                count: 2
            },
        ]
    );
}

#[tokio::test]
async fn concurrent_producers_conserve_totals() {
    let (tx, rx) = intake::channel(64);
    let table = CountTable::default();
    let reader = table.reader();
    let (status_tx, _status_rx) = watch::channel(AggregatorStatus::Running);
    let aggregator = aggregate::spawn(rx, table, status_tx, CancellationToken::new());

    let mut producers = Vec::new();
    for producer in 0..10 {
        let tx = tx.clone();
        producers.push(tokio::spawn(async move {
            for _ in 0..100 {
                tx.enqueue(record(&format!("device-{producer}")))
                    .await
                    .expect("enqueue");
            }
        }));
    }
    for producer in producers {
        producer.await.expect("producer");
    }
    drop(tx);

    let report = aggregator.await.expect("join").expect("aggregator");
    assert_eq!(report.records_counted, 1000);

    let snapshot = reader.snapshot();
    assert_eq!(snapshot.len(), 10);
    assert!(snapshot.iter().all(|entry| entry.count == 100));
    assert_eq!(total(&snapshot), 1000);
}

#[tokio::test]
async fn interleaving_does_not_change_final_counts() {
    // The same multiset of records, submitted in two different orders.
    let batches = [
        ["sensor-1", "sensor-2", "sensor-1", "sensor-3", "sensor-1"],
        ["sensor-3", "sensor-1", "sensor-1", "sensor-2", "sensor-1"],
    ];

    let mut snapshots = Vec::new();
    for batch in batches {
        let (tx, rx) = intake::channel(8);
        let table = CountTable::default();
        let reader = table.reader();
        let (status_tx, _status_rx) = watch::channel(AggregatorStatus::Running);
        let aggregator = aggregate::spawn(rx, table, status_tx, CancellationToken::new());

        for device in batch {
            tx.enqueue(record(device)).await.expect("enqueue");
        }
        drop(tx);
        aggregator.await.expect("join").expect("aggregator");

        let mut snapshot = reader.snapshot();
        snapshot.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        snapshots.push(snapshot);
    }

    assert_eq!(snapshots[0], snapshots[1]);
    assert_eq!(total(&snapshots[0]), 5);
}

#[tokio::test]
async fn snapshots_never_decrease() {
    let (tx, rx) = intake::channel(16);
    let table = CountTable::default();
    let reader = table.reader();
    let (status_tx, _status_rx) = watch::channel(AggregatorStatus::Running);
    let aggregator = aggregate::spawn(rx, table, status_tx, CancellationToken::new());

    for _ in 0..4 {
        tx.enqueue(record("sensor-1")).await.expect("enqueue");
    }
    let first = wait_for_total(&reader, 4).await;

    for _ in 0..3 {
        tx.enqueue(record("sensor-1")).await.expect("enqueue");
    }
    let second = wait_for_total(&reader, 7).await;

    let earlier = first
        .iter()
        .find(|entry| entry.device_id == "sensor-1")
        .expect("sensor-1 counted")
        .count;
    let later = second
        .iter()
        .find(|entry| entry.device_id == "sensor-1")
        .expect("sensor-1 counted")
        .count;
    assert!(later >= earlier);

    drop(tx);
    aggregator.await.expect("join").expect("aggregator");
}

#[tokio::test]
async fn shutdown_abandons_buffered_records() {
    let (tx, rx) = intake::channel(8);
    for _ in 0..5 {
        tx.enqueue(record("sensor-1")).await.expect("enqueue");
    }

    // Cancel before the aggregator starts: the biased shutdown check wins,
    // so nothing buffered is pulled.
    let shutdown = CancellationToken::new();
    shutdown.cancel();

    let table = CountTable::default();
    let reader = table.reader();
    let (status_tx, status_rx) = watch::channel(AggregatorStatus::Running);
    let aggregator = aggregate::spawn(rx, table, status_tx, shutdown);

    let report = aggregator.await.expect("join").expect("aggregator");
    assert_eq!(report.records_counted, 0);
    assert_eq!(report.records_abandoned, 5);
    assert!(reader.snapshot().is_empty());
    assert_eq!(*status_rx.borrow(), AggregatorStatus::Stopped);
}

async fn wait_for_total(
    reader: &streamtally::pipeline::counts::SnapshotReader,
    expected: u64,
) -> Vec<DeviceCount> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let snapshot = reader.snapshot();
        if total(&snapshot) >= expected {
            return snapshot;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "counts did not reach {expected}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

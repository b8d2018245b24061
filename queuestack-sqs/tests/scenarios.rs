//! End-to-end queue scenarios through the registry

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use parking_lot::Mutex;
use queuestack_core::{AwsError, ErrorCode};
use queuestack_sqs::{
    LatencyConfig, MessageAttributeValue, QueueConfig, QueueRegistry, SqsConfig, SqsError,
    VisibilityClock,
};

fn registry() -> QueueRegistry {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    QueueRegistry::default()
}

#[test]
fn fifo_group_delivers_in_order_one_at_a_time() {
    let registry = registry();
    let orders = registry.create("orders.fifo", QueueConfig::fifo()).unwrap();
    let now = Utc::now();

    let (m1, m2) = {
        let mut queue = orders.write();
        let m1 = queue.enqueue_at("m1", vec![], "cust-42", now).unwrap();
        let m2 = queue.enqueue_at("m2", vec![], "cust-42", now).unwrap();
        (m1, m2)
    };
    assert_eq!(m1.sequence_number.as_deref(), Some("1"));
    assert_eq!(m2.sequence_number.as_deref(), Some("2"));

    let mut queue = orders.write();
    let ready = queue.poll_ready(now);
    assert_eq!(ready.len(), 1);
    assert_eq!(ready[0].message_id, m1.message_id);

    let delivered = queue.mark_received(&m1.message_id, now).unwrap();
    assert!(queue.is_group_locked("cust-42"));
    assert!(queue.poll_ready(now).is_empty());
    assert!(queue.poll_ready(now + Duration::seconds(10)).is_empty());

    queue
        .delete_by_receipt_handle(delivered.receipt_handle.as_deref().unwrap(), now)
        .unwrap();
    assert!(!queue.is_group_locked("cust-42"));

    let ready = queue.poll_ready(now);
    assert_eq!(ready.len(), 1);
    assert_eq!(ready[0].message_id, m2.message_id);
}

#[test]
fn fixed_latency_delays_readiness() {
    let registry = QueueRegistry::new(SqsConfig {
        latency_min: Some("100".into()),
        latency_max: Some("100".into()),
        ..SqsConfig::default()
    });
    let queue = registry.create("slow", QueueConfig::default()).unwrap();
    let t0 = Utc::now();

    let mut queue = queue.write();
    queue.enqueue_at("late", vec![], "", t0).unwrap();
    assert!(queue.poll_ready(t0 + Duration::milliseconds(50)).is_empty());
    assert_eq!(queue.poll_ready(t0 + Duration::milliseconds(100)).len(), 1);
}

#[test]
fn malformed_latency_never_blocks_delivery() {
    let clock = Arc::new(VisibilityClock::new(&LatencyConfig {
        min: Some("ten".into()),
        max: Some("20".into()),
    }));
    let registry = QueueRegistry::with_clock(SqsConfig::default(), clock);
    let queue = registry.create("lenient", QueueConfig::default()).unwrap();
    let t0 = Utc::now();

    let mut queue = queue.write();
    queue.enqueue_at("now", vec![], "", t0).unwrap();
    assert_eq!(queue.poll_ready(t0).len(), 1);
}

#[test]
fn stale_receipt_handle_leaves_queue_unchanged() {
    let registry = registry();
    let queue = registry.create("jobs", QueueConfig::default()).unwrap();
    let now = Utc::now();

    let mut queue = queue.write();
    let m = queue.enqueue_at("work", vec![], "", now).unwrap();
    let first = queue.mark_received(&m.message_id, now).unwrap();
    let retry_at = now + Duration::seconds(31);
    let second = queue.mark_received(&m.message_id, retry_at).unwrap();

    let before: Vec<_> = queue.messages().cloned().collect();
    let err = queue
        .delete_by_receipt_handle(first.receipt_handle.as_deref().unwrap(), retry_at)
        .unwrap_err();
    assert!(matches!(err, SqsError::ReceiptHandleInvalid(_)));
    let after: Vec<_> = queue.messages().cloned().collect();
    assert_eq!(before, after);

    let aws: AwsError = err.into();
    assert_eq!(aws.code, ErrorCode::ReceiptHandleInvalid);
    assert_eq!(aws.descriptor().code, "ReceiptHandleIsInvalid");

    queue
        .delete_by_receipt_handle(second.receipt_handle.as_deref().unwrap(), retry_at)
        .unwrap();
    assert!(queue.is_empty());
}

#[test]
fn round_trip_through_handles() {
    let registry = registry();
    let queue = registry.create("events.fifo", QueueConfig::fifo()).unwrap();

    queue
        .send(
            "payload",
            vec![MessageAttributeValue::string("source", "test")],
            "g",
        )
        .unwrap();
    assert_eq!(queue.read().len(), 1);

    let batch = queue
        .receive(10, Some(StdDuration::from_millis(10)), None)
        .unwrap();
    assert_eq!(batch.len(), 1);
    assert!(batch[0].md5_of_message_attributes.is_some());
    assert!(queue.read().is_group_locked("g"));

    queue
        .delete_message(batch[0].receipt_handle.as_deref().unwrap())
        .unwrap();
    assert_eq!(queue.read().len(), 0);
    assert!(!queue.read().is_group_locked("g"));
}

#[test]
fn errors_map_to_table_entries() {
    let registry = registry();
    registry.create("dup", QueueConfig::default()).unwrap();

    let exists: AwsError = registry
        .create("dup", QueueConfig::default())
        .unwrap_err()
        .into();
    assert_eq!(exists.code, ErrorCode::QueueAlreadyExists);

    let missing: AwsError = registry.lookup("ghost").unwrap_err().into();
    assert_eq!(missing.code, ErrorCode::QueueNotFound);
    assert_eq!(missing.http_status(), 400);
}

#[test]
fn concurrent_consumers_never_share_a_fifo_group() {
    let registry = Arc::new(registry());
    let queue = registry.create("work.fifo", QueueConfig::fifo()).unwrap();

    for group in ["a", "b", "c"] {
        for i in 0..10 {
            queue.send(format!("{group}-{i}"), vec![], group).unwrap();
        }
    }

    let in_flight: Arc<Mutex<HashSet<String>>> = Arc::new(Mutex::new(HashSet::new()));
    let delivered: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let registry = Arc::clone(&registry);
            let in_flight = Arc::clone(&in_flight);
            let delivered = Arc::clone(&delivered);
            thread::spawn(move || {
                let queue = registry.lookup("work.fifo").unwrap();
                loop {
                    let batch = queue
                        .receive(1, Some(StdDuration::from_millis(100)), None)
                        .unwrap();
                    let Some(message) = batch.into_iter().next() else {
                        if queue.read().is_empty() {
                            break;
                        }
                        continue;
                    };
                    assert!(
                        in_flight.lock().insert(message.group_id.clone()),
                        "group {} delivered twice concurrently",
                        message.group_id
                    );
                    delivered.lock().push(message.body_str().into_owned());
                    in_flight.lock().remove(&message.group_id);
                    queue
                        .delete_message(message.receipt_handle.as_deref().unwrap())
                        .unwrap();
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }

    let delivered = delivered.lock();
    assert_eq!(delivered.len(), 30);
    for group in ["a", "b", "c"] {
        let order: Vec<&String> = delivered
            .iter()
            .filter(|body| body.starts_with(&format!("{group}-")))
            .collect();
        let expected: Vec<String> = (0..10).map(|i| format!("{group}-{i}")).collect();
        assert_eq!(order, expected.iter().collect::<Vec<_>>());
    }
}

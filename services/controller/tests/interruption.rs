//! Integration tests for the interruption reconciliation flow.
//!
//! These tests drive full reconcile ticks against the memory-backed
//! queue and cluster, verifying classification, fan-out, idempotent
//! claim removal, advisory cache feeding, acknowledgment, and batch
//! error aggregation.

use std::sync::Arc;

use nodeward_controller::cache::MemoryAdvisoryCache;
use nodeward_controller::cluster::{ComputeClaim, MemoryCluster, NodeRecord};
use nodeward_controller::events::{EventKind, MemoryRecorder};
use nodeward_controller::interruption::{
    EntryError, InterruptionController, QueueFactory, ReconcileError, Requeue,
};
use nodeward_controller::metrics::Metrics;
use nodeward_controller::queue::{MemoryQueue, QueueError, QueueTransport, RawEntry};
use nodeward_messages::NotificationKind;

struct Harness {
    queue: Arc<MemoryQueue>,
    cluster: Arc<MemoryCluster>,
    cache: Arc<MemoryAdvisoryCache>,
    recorder: Arc<MemoryRecorder>,
    metrics: Metrics,
    controller: InterruptionController,
}

fn harness() -> Harness {
    let queue = Arc::new(MemoryQueue::new());
    let cluster = Arc::new(MemoryCluster::new());
    let cache = Arc::new(MemoryAdvisoryCache::new());
    let recorder = Arc::new(MemoryRecorder::new());
    let metrics = Metrics::register(&prometheus::Registry::new()).unwrap();

    let controller = InterruptionController::new(
        Arc::clone(&queue) as Arc<dyn QueueTransport>,
        Arc::clone(&cluster) as Arc<dyn nodeward_controller::cluster::ClusterApi>,
        Arc::clone(&cache) as Arc<dyn nodeward_controller::cache::AdvisoryCache>,
        Arc::clone(&recorder) as Arc<dyn nodeward_controller::events::EventRecorder>,
        metrics.clone(),
    );

    Harness {
        queue,
        cluster,
        cache,
        recorder,
        metrics,
        controller,
    }
}

fn spot_claim(name: &str, instance_id: &str) -> ComputeClaim {
    ComputeClaim {
        name: name.to_string(),
        instance_id: instance_id.to_string(),
        zone: Some("us-east-1a".to_string()),
        shape: Some("m5.large".to_string()),
        pool: Some("default".to_string()),
        capacity_market: Some("spot".to_string()),
        deletion_requested: false,
    }
}

fn spot_body(instance_id: &str) -> String {
    serde_json::json!({
        "source": "aws.ec2",
        "detail-type": "EC2 Spot Instance Interruption Warning",
        "time": "2024-05-01T12:00:00Z",
        "detail": { "instance-id": instance_id },
    })
    .to_string()
}

fn rebalance_body(instance_id: &str) -> String {
    serde_json::json!({
        "source": "aws.ec2",
        "detail-type": "EC2 Instance Rebalance Recommendation",
        "time": "2024-05-01T12:00:00Z",
        "detail": { "instance-id": instance_id },
    })
    .to_string()
}

fn terminated_body(instance_id: &str) -> String {
    serde_json::json!({
        "source": "aws.ec2",
        "detail-type": "EC2 Instance State-change Notification",
        "time": "2024-05-01T12:00:00Z",
        "detail": { "instance-id": instance_id, "state": "terminated" },
    })
    .to_string()
}

fn health_body(instance_ids: &[&str]) -> String {
    let entities: Vec<_> = instance_ids
        .iter()
        .map(|id| serde_json::json!({ "entityValue": id }))
        .collect();
    serde_json::json!({
        "source": "aws.health",
        "detail-type": "AWS Health Event",
        "time": "2024-05-01T12:00:00Z",
        "detail": {
            "service": "EC2",
            "eventTypeCategory": "scheduledChange",
            "affectedEntities": entities,
        },
    })
    .to_string()
}

fn unknown_body() -> String {
    serde_json::json!({
        "source": "aws.autoscaling",
        "detail-type": "Lifecycle Hook Fired",
        "time": "2024-05-01T12:00:00Z",
        "detail": {},
    })
    .to_string()
}

#[tokio::test]
async fn test_spot_interruption_full_path() {
    let h = harness();
    h.cluster.add_claim(spot_claim("claim-a", "i-1"));
    h.cluster.add_node(NodeRecord {
        name: "node-a".to_string(),
        instance_id: "i-1".to_string(),
    });
    h.queue.push(RawEntry::new("m-1", spot_body("i-1")));

    let requeue = h.controller.reconcile().await.unwrap();
    assert_eq!(requeue, Requeue::Immediately);

    // One advisory cache entry for the reclaimed offering
    let advisories = h.cache.snapshot();
    assert_eq!(advisories.len(), 1);
    assert_eq!(advisories[0].reason, "spot_interruption");
    assert_eq!(advisories[0].shape, "m5.large");
    assert_eq!(advisories[0].zone, "us-east-1a");
    assert_eq!(advisories[0].market, "spot");

    // One deletion request
    assert_eq!(h.cluster.deleted_claims(), vec!["claim-a"]);

    // Notify-first ordering: the warning precedes the removal event
    let events = h.recorder.recorded();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].kind, EventKind::SpotInterrupted);
    assert_eq!(events[0].node_name.as_deref(), Some("node-a"));
    assert_eq!(events[1].kind, EventKind::TerminatingOnInterruption);

    // One disruption increment, tagged by pool and market
    assert_eq!(
        h.metrics
            .disrupted_count(NotificationKind::SpotInterruption, "default", "spot"),
        1
    );

    // Entry acknowledged, latency observed once
    assert_eq!(h.queue.deleted_ids(), vec!["m-1"]);
    assert_eq!(h.metrics.latency_samples(), 1);
}

#[tokio::test]
async fn test_rebalance_recommendation_is_notify_only() {
    let h = harness();
    h.cluster.add_claim(spot_claim("claim-b", "i-2"));
    h.queue.push(RawEntry::new("m-1", rebalance_body("i-2")));

    h.controller.reconcile().await.unwrap();

    let events = h.recorder.recorded();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, EventKind::RebalanceRecommendation);

    assert!(h.cluster.deleted_claims().is_empty());
    assert!(h.cache.snapshot().is_empty());
    assert_eq!(
        h.metrics
            .disrupted_count(NotificationKind::RebalanceRecommendation, "default", "spot"),
        0
    );
    assert_eq!(h.queue.deleted_ids(), vec!["m-1"]);
}

#[tokio::test]
async fn test_malformed_payload_is_acknowledged_and_surfaced() {
    let h = harness();
    h.queue.push(RawEntry::new("m-1", "{not json"));

    let err = h.controller.reconcile().await.unwrap_err();
    let ReconcileError::Batch(batch) = err else {
        panic!("expected batch error");
    };
    assert_eq!(batch.errors.len(), 1);
    assert!(matches!(batch.errors[0], EntryError::Classify { .. }));

    // No cluster traffic, no events, but the poison entry is gone
    assert!(h.cluster.deleted_claims().is_empty());
    assert!(h.recorder.recorded().is_empty());
    assert_eq!(h.queue.deleted_ids(), vec!["m-1"]);
    assert_eq!(h.metrics.latency_samples(), 0);
}

#[tokio::test]
async fn test_missing_body_is_terminal() {
    let h = harness();
    h.queue.push(RawEntry {
        id: "m-1".to_string(),
        body: None,
    });

    let err = h.controller.reconcile().await.unwrap_err();
    let ReconcileError::Batch(batch) = err else {
        panic!("expected batch error");
    };
    assert!(matches!(batch.errors[0], EntryError::MissingBody { .. }));
    assert_eq!(h.queue.deleted_ids(), vec!["m-1"]);
}

#[tokio::test]
async fn test_no_op_short_circuits() {
    let h = harness();
    h.cluster.add_claim(spot_claim("claim-a", "i-1"));
    h.queue.push(RawEntry::new("m-1", unknown_body()));

    let requeue = h.controller.reconcile().await.unwrap();
    assert_eq!(requeue, Requeue::Immediately);

    // No lookups, no deletion, no event, no cache write, no latency
    assert!(h.cluster.deleted_claims().is_empty());
    assert!(h.recorder.recorded().is_empty());
    assert!(h.cache.snapshot().is_empty());
    assert_eq!(h.metrics.latency_samples(), 0);
    assert_eq!(h.queue.deleted_ids(), vec!["m-1"]);
}

#[tokio::test]
async fn test_zero_matching_claims_is_clean() {
    let h = harness();
    h.queue.push(RawEntry::new("m-1", terminated_body("i-404")));

    let requeue = h.controller.reconcile().await.unwrap();
    assert_eq!(requeue, Requeue::Immediately);

    assert!(h.recorder.recorded().is_empty());
    assert!(h.cluster.deleted_claims().is_empty());
    assert_eq!(h.queue.deleted_ids(), vec!["m-1"]);
    // Latency is still observed for a classified, matched-or-not
    // notification
    assert_eq!(h.metrics.latency_samples(), 1);
}

#[tokio::test]
async fn test_duplicate_delivery_is_idempotent() {
    let h = harness();
    h.cluster.add_claim(spot_claim("claim-a", "i-1"));

    h.queue.push(RawEntry::new("m-1", spot_body("i-1")));
    h.controller.reconcile().await.unwrap();

    // The broker redelivers; the claim now carries its deletion marker
    h.queue.push(RawEntry::new("m-2", spot_body("i-1")));
    h.controller.reconcile().await.unwrap();

    // No second deletion request and no second disruption increment
    assert_eq!(h.cluster.deleted_claims(), vec!["claim-a"]);
    assert_eq!(
        h.metrics
            .disrupted_count(NotificationKind::SpotInterruption, "default", "spot"),
        1
    );
    assert_eq!(h.queue.deleted_ids(), vec!["m-1", "m-2"]);
}

#[tokio::test]
async fn test_deletion_of_missing_claim_is_success() {
    let h = harness();
    // The claim vanishes between listing and deletion; NotFound from
    // the deletion request is treated as success.
    h.cluster.add_claim(spot_claim("claim-a", "i-1"));
    h.cluster.not_found_on_delete("claim-a");
    h.queue.push(RawEntry::new("m-1", terminated_body("i-1")));

    let requeue = h.controller.reconcile().await.unwrap();
    assert_eq!(requeue, Requeue::Immediately);

    // No removal event and no disruption increment for a vanished claim
    let events = h.recorder.recorded();
    assert!(events
        .iter()
        .all(|e| e.kind != EventKind::TerminatingOnInterruption));
    assert_eq!(
        h.metrics
            .disrupted_count(NotificationKind::InstanceTerminated, "default", "spot"),
        0
    );
    assert_eq!(h.queue.deleted_ids(), vec!["m-1"]);
}

#[tokio::test]
async fn test_failure_isolation_across_entries() {
    let h = harness();
    h.cluster.add_claim(spot_claim("claim-a", "i-1"));
    h.cluster.add_claim(spot_claim("claim-b", "i-2"));
    h.cluster.fail_delete_of("claim-a");

    h.queue.push(RawEntry::new("m-1", terminated_body("i-1")));
    h.queue.push(RawEntry::new("m-2", terminated_body("i-2")));

    let err = h.controller.reconcile().await.unwrap_err();
    let ReconcileError::Batch(batch) = err else {
        panic!("expected batch error");
    };

    // Exactly one failure, for claim-a only
    assert_eq!(batch.errors.len(), 1);
    assert!(matches!(
        &batch.errors[0],
        EntryError::DeleteClaim { claim, .. } if claim == "claim-a"
    ));

    // claim-b was handled independently
    assert_eq!(h.cluster.deleted_claims(), vec!["claim-b"]);

    // Both entries acknowledged despite the handling failure
    let mut deleted = h.queue.deleted_ids();
    deleted.sort();
    assert_eq!(deleted, vec!["m-1", "m-2"]);
}

#[tokio::test]
async fn test_acknowledgment_guarantee_across_mixed_batch() {
    let h = harness();
    h.cluster.add_claim(spot_claim("claim-a", "i-1"));

    h.queue.push(RawEntry::new("m-1", "{not json"));
    h.queue.push(RawEntry::new("m-2", spot_body("i-1")));
    h.queue.push(RawEntry::new("m-3", unknown_body()));

    // The malformed entry surfaces an error; all three are deleted
    let _ = h.controller.reconcile().await;

    let mut deleted = h.queue.deleted_ids();
    deleted.sort();
    assert_eq!(deleted, vec!["m-1", "m-2", "m-3"]);
    assert_eq!(h.metrics.deleted_count(), 3);
}

#[tokio::test]
async fn test_scheduled_change_fans_out_across_instances() {
    let h = harness();
    h.cluster.add_claim(spot_claim("claim-a", "i-1"));
    h.cluster.add_claim(spot_claim("claim-b", "i-2"));
    h.queue
        .push(RawEntry::new("m-1", health_body(&["i-1", "i-2"])));

    h.controller.reconcile().await.unwrap();

    let mut deleted = h.cluster.deleted_claims();
    deleted.sort();
    assert_eq!(deleted, vec!["claim-a", "claim-b"]);

    let events = h.recorder.recorded();
    let unhealthy = events
        .iter()
        .filter(|e| e.kind == EventKind::Unhealthy)
        .count();
    let terminating = events
        .iter()
        .filter(|e| e.kind == EventKind::TerminatingOnInterruption)
        .count();
    assert_eq!(unhealthy, 2);
    assert_eq!(terminating, 2);

    // Latency once per notification, not per matched claim
    assert_eq!(h.metrics.latency_samples(), 1);
}

#[tokio::test]
async fn test_spot_without_labels_skips_cache_but_still_removes() {
    let h = harness();
    h.cluster.add_claim(ComputeClaim::new("claim-a", "i-1"));
    h.queue.push(RawEntry::new("m-1", spot_body("i-1")));

    h.controller.reconcile().await.unwrap();

    assert!(h.cache.snapshot().is_empty());
    assert_eq!(h.cluster.deleted_claims(), vec!["claim-a"]);
}

#[tokio::test]
async fn test_claim_lookup_failure_is_recorded_and_acknowledged() {
    let h = harness();
    h.cluster.fail_list_claims(true);
    h.queue.push(RawEntry::new("m-1", terminated_body("i-1")));

    let err = h.controller.reconcile().await.unwrap_err();
    let ReconcileError::Batch(batch) = err else {
        panic!("expected batch error");
    };
    assert!(matches!(batch.errors[0], EntryError::ClaimLookup { .. }));
    assert_eq!(h.queue.deleted_ids(), vec!["m-1"]);
}

#[tokio::test]
async fn test_node_lookup_failure_skips_claim_but_continues() {
    let h = harness();
    h.cluster.add_claim(spot_claim("claim-a", "i-1"));
    h.cluster.fail_list_nodes(true);
    h.queue.push(RawEntry::new("m-1", terminated_body("i-1")));

    let err = h.controller.reconcile().await.unwrap_err();
    let ReconcileError::Batch(batch) = err else {
        panic!("expected batch error");
    };
    assert!(matches!(batch.errors[0], EntryError::NodeLookup { .. }));

    // The claim was skipped, not removed
    assert!(h.cluster.deleted_claims().is_empty());
    assert_eq!(h.queue.deleted_ids(), vec!["m-1"]);
}

#[tokio::test]
async fn test_transport_failure_is_fatal_to_the_tick() {
    let h = harness();
    h.queue.fail_fetch(true);

    let err = h.controller.reconcile().await.unwrap_err();
    assert!(matches!(err, ReconcileError::Transport(_)));
    assert!(h.queue.deleted_ids().is_empty());
}

#[tokio::test]
async fn test_empty_batch_requeues_immediately() {
    let h = harness();
    let requeue = h.controller.reconcile().await.unwrap();
    assert_eq!(requeue, Requeue::Immediately);
}

#[tokio::test]
async fn test_large_batch_all_acknowledged() {
    let h = harness();
    for i in 0..25 {
        let instance = format!("i-{i}");
        h.cluster.add_claim(spot_claim(&format!("claim-{i}"), &instance));
        h.queue
            .push(RawEntry::new(format!("m-{i}"), terminated_body(&instance)));
    }

    h.controller.reconcile().await.unwrap();

    assert_eq!(h.queue.deleted_ids().len(), 25);
    assert_eq!(h.cluster.deleted_claims().len(), 25);
    assert_eq!(h.metrics.latency_samples(), 25);
}

#[tokio::test]
async fn test_queue_factory_is_invoked_once() {
    use std::sync::atomic::{AtomicUsize, Ordering};

    let queue = Arc::new(MemoryQueue::new());
    queue.push(RawEntry::new("m-1", unknown_body()));

    let invocations = Arc::new(AtomicUsize::new(0));
    let factory: QueueFactory = {
        let queue = Arc::clone(&queue);
        let invocations = Arc::clone(&invocations);
        Box::new(move || {
            invocations.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::clone(&queue) as Arc<dyn QueueTransport>)
        })
    };

    let controller = InterruptionController::with_queue_factory(
        factory,
        Arc::new(MemoryCluster::new()),
        Arc::new(MemoryAdvisoryCache::new()),
        Arc::new(MemoryRecorder::new()),
        Metrics::register(&prometheus::Registry::new()).unwrap(),
    );

    controller.reconcile().await.unwrap();
    controller.reconcile().await.unwrap();

    // The transport handle is established once and reused
    assert_eq!(invocations.load(Ordering::SeqCst), 1);
    assert_eq!(queue.deleted_ids(), vec!["m-1"]);
}

#[tokio::test]
async fn test_queue_factory_failure_is_retried_next_tick() {
    use std::sync::atomic::{AtomicUsize, Ordering};

    let queue = Arc::new(MemoryQueue::new());
    let invocations = Arc::new(AtomicUsize::new(0));
    let factory: QueueFactory = {
        let queue = Arc::clone(&queue);
        let invocations = Arc::clone(&invocations);
        Box::new(move || {
            if invocations.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(QueueError::Connect("broker unreachable".to_string()))
            } else {
                Ok(Arc::clone(&queue) as Arc<dyn QueueTransport>)
            }
        })
    };

    let controller = InterruptionController::with_queue_factory(
        factory,
        Arc::new(MemoryCluster::new()),
        Arc::new(MemoryAdvisoryCache::new()),
        Arc::new(MemoryRecorder::new()),
        Metrics::register(&prometheus::Registry::new()).unwrap(),
    );

    let err = controller.reconcile().await.unwrap_err();
    assert!(matches!(err, ReconcileError::Transport(_)));

    // Second tick rebuilds the handle and proceeds
    let requeue = controller.reconcile().await.unwrap();
    assert_eq!(requeue, Requeue::Immediately);
    assert_eq!(invocations.load(Ordering::SeqCst), 2);
}

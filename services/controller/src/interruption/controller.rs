//! The interruption controller.
//!
//! The controller is responsible for:
//! - Fetching one batch of entries from the interruption queue
//! - Classifying each entry into a typed notification
//! - Resolving and applying the lifecycle action for every affected
//!   compute claim, exactly once, idempotently
//! - Feeding spot interruptions into the capacity advisory cache
//! - Acknowledging entries and aggregating per-entry errors
//!
//! Failure isolation: no entry's outcome ever blocks or aborts a
//! sibling entry, instance, or claim. Each per-entry task writes its
//! errors into its own slot of a pre-sized array, so the collector
//! needs no lock.

use std::sync::Arc;

use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use thiserror::Error;
use tracing::{debug, error, info, instrument};

use nodeward_messages::{Classifier, ClassifyError, Notification, NotificationKind};

use crate::cache::{AdvisoryCache, CAPACITY_MARKET_SPOT};
use crate::cluster::{ClusterApi, ClusterError, ComputeClaim, NodeRecord};
use crate::events::{Event, EventKind, EventRecorder};
use crate::metrics::Metrics;
use crate::queue::{QueueError, QueueTransport, RawEntry};

/// Fan-out width for one batch, independent of batch size.
/// Workers never span batches.
const MAX_CONCURRENCY: usize = 10;

/// The lifecycle decision derived from a notification kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Evacuate the workload and remove the claim.
    EvacuateAndRemove,

    /// Take no lifecycle action.
    NoAction,
}

impl Action {
    /// Resolve the action for a notification kind. Pure and total;
    /// anything not explicitly actionable resolves to `NoAction`.
    pub fn for_kind(kind: NotificationKind) -> Self {
        match kind {
            NotificationKind::ScheduledChange
            | NotificationKind::SpotInterruption
            | NotificationKind::InstanceStopped
            | NotificationKind::InstanceTerminated => Self::EvacuateAndRemove,
            NotificationKind::RebalanceRecommendation | NotificationKind::NoOp => Self::NoAction,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::EvacuateAndRemove => "evacuate_and_remove",
            Self::NoAction => "no_action",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Requeue hint surfaced to the scheduling layer.
///
/// The controller never computes its own backoff: empty batches and
/// batches with errors both request an immediate next tick. Polling
/// cadence is governed by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requeue {
    Immediately,
}

/// One failure while processing a single queue entry.
#[derive(Debug, Error)]
pub enum EntryError {
    /// The entry arrived without a body.
    #[error("queue entry {entry_id} has no body")]
    MissingBody { entry_id: String },

    /// The body could not be classified. Locally terminal: the entry
    /// is acknowledged anyway so a poison message never loops.
    #[error("classifying queue entry {entry_id}: {source}")]
    Classify {
        entry_id: String,
        source: ClassifyError,
    },

    /// Listing claims for an instance failed.
    #[error("listing claims for instance {instance_id}: {source}")]
    ClaimLookup {
        instance_id: String,
        source: ClusterError,
    },

    /// Listing nodes for an instance failed.
    #[error("listing nodes for instance {instance_id}: {source}")]
    NodeLookup {
        instance_id: String,
        source: ClusterError,
    },

    /// A claim deletion request failed (not-found excluded).
    #[error("deleting claim {claim}: {source}")]
    DeleteClaim { claim: String, source: ClusterError },

    /// Acknowledging the entry failed.
    #[error(transparent)]
    Acknowledge(#[from] QueueError),
}

/// All errors collected across one batch, combined rather than
/// short-circuited. An empty aggregate is never constructed; a clean
/// batch is `Ok`.
#[derive(Debug, Default)]
pub struct BatchError {
    pub errors: Vec<EntryError>,
}

impl std::fmt::Display for BatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} error(s) processing interruption batch: ",
            self.errors.len()
        )?;
        for (i, err) in self.errors.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for BatchError {}

/// Errors surfaced by one reconcile tick.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The queue fetch failed; fatal to the tick, nothing was
    /// acknowledged.
    #[error("fetching interruption batch: {0}")]
    Transport(#[from] QueueError),

    /// The batch completed with per-entry errors. Every entry was
    /// still acknowledged or had its acknowledgment failure recorded.
    #[error(transparent)]
    Batch(#[from] BatchError),
}

/// Builds a queue transport handle on first use.
pub type QueueFactory =
    Box<dyn Fn() -> Result<Arc<dyn QueueTransport>, QueueError> + Send + Sync>;

/// Interruption controller for one queue.
///
/// Stateless across ticks: everything it needs between polls lives in
/// the queue and the cluster API, apart from the lazily initialized
/// queue-transport handle.
pub struct InterruptionController {
    queue: tokio::sync::OnceCell<Arc<dyn QueueTransport>>,
    queue_factory: Option<QueueFactory>,
    cluster: Arc<dyn ClusterApi>,
    cache: Arc<dyn AdvisoryCache>,
    recorder: Arc<dyn EventRecorder>,
    metrics: Metrics,
    classifier: Classifier,
}

impl InterruptionController {
    /// Create a new controller over injected collaborators.
    pub fn new(
        queue: Arc<dyn QueueTransport>,
        cluster: Arc<dyn ClusterApi>,
        cache: Arc<dyn AdvisoryCache>,
        recorder: Arc<dyn EventRecorder>,
        metrics: Metrics,
    ) -> Self {
        Self {
            queue: tokio::sync::OnceCell::new_with(Some(queue)),
            queue_factory: None,
            cluster,
            cache,
            recorder,
            metrics,
            classifier: Classifier::default(),
        }
    }

    /// Create a controller whose queue transport is established on the
    /// first tick. A factory failure is a transport error for that
    /// tick; the next tick retries.
    pub fn with_queue_factory(
        queue_factory: QueueFactory,
        cluster: Arc<dyn ClusterApi>,
        cache: Arc<dyn AdvisoryCache>,
        recorder: Arc<dyn EventRecorder>,
        metrics: Metrics,
    ) -> Self {
        Self {
            queue: tokio::sync::OnceCell::new(),
            queue_factory: Some(queue_factory),
            cluster,
            cache,
            recorder,
            metrics,
            classifier: Classifier::default(),
        }
    }

    /// The queue transport handle, built on first use.
    async fn queue(&self) -> Result<&Arc<dyn QueueTransport>, QueueError> {
        self.queue
            .get_or_try_init(|| async {
                match &self.queue_factory {
                    Some(factory) => {
                        let queue = factory()?;
                        info!("Initialized queue transport");
                        Ok(queue)
                    }
                    None => Err(QueueError::Connect(
                        "no queue transport configured".to_string(),
                    )),
                }
            })
            .await
    }

    /// Run one reconcile tick.
    #[instrument(skip(self))]
    pub async fn reconcile(&self) -> Result<Requeue, ReconcileError> {
        let queue = self.queue().await?;
        let entries = queue.fetch_batch().await?;
        if entries.is_empty() {
            return Ok(Requeue::Immediately);
        }
        debug!(batch_size = entries.len(), "Fetched interruption batch");

        // One slot per entry, each task owns exactly one index.
        let mut slots: Vec<Vec<EntryError>> = Vec::with_capacity(entries.len());
        slots.resize_with(entries.len(), Vec::new);

        let mut results = stream::iter(
            entries
                .iter()
                .enumerate()
                .map(|(i, entry)| async move { (i, self.process_entry(queue.as_ref(), entry).await) })
                .collect::<Vec<_>>(),
        )
        .buffer_unordered(MAX_CONCURRENCY);

        while let Some((i, errors)) = results.next().await {
            slots[i] = errors;
        }
        drop(results);

        let errors: Vec<EntryError> = slots.into_iter().flatten().collect();
        if errors.is_empty() {
            Ok(Requeue::Immediately)
        } else {
            Err(BatchError { errors }.into())
        }
    }

    /// Process one queue entry end to end, collecting every error it
    /// produced. The entry is acknowledged on every path.
    async fn process_entry(&self, queue: &dyn QueueTransport, entry: &RawEntry) -> Vec<EntryError> {
        let mut errors = Vec::new();

        let Some(body) = entry.body.as_deref() else {
            error!(entry_id = %entry.id, "Queue entry has no body");
            errors.push(EntryError::MissingBody {
                entry_id: entry.id.clone(),
            });
            self.acknowledge(queue, entry, &mut errors).await;
            return errors;
        };

        let notification = match self.classifier.classify(body) {
            Ok(notification) => notification,
            Err(e) => {
                // A permanently malformed message must not be retried
                // forever; acknowledge it and surface the error.
                error!(entry_id = %entry.id, error = %e, "Failed classifying interruption message");
                errors.push(EntryError::Classify {
                    entry_id: entry.id.clone(),
                    source: e,
                });
                self.acknowledge(queue, entry, &mut errors).await;
                return errors;
            }
        };

        self.metrics.record_received(notification.kind);

        if notification.kind != NotificationKind::NoOp {
            self.handle_notification(&notification, &mut errors).await;

            // Once per classified non-NoOp notification, regardless of
            // how many claims matched.
            let elapsed =
                (Utc::now() - notification.origin_time).num_milliseconds() as f64 / 1000.0;
            self.metrics.observe_latency(elapsed.max(0.0));
        }

        self.acknowledge(queue, entry, &mut errors).await;
        errors
    }

    /// Fan out one notification across its affected instances and
    /// claims. Lookup and handling errors are collected, never
    /// propagated: each claim's fate is independent.
    async fn handle_notification(
        &self,
        notification: &Notification,
        errors: &mut Vec<EntryError>,
    ) {
        for instance_id in &notification.instance_ids {
            let claims = match self.cluster.claims_for_instance(instance_id).await {
                Ok(claims) => claims,
                Err(e) => {
                    errors.push(EntryError::ClaimLookup {
                        instance_id: instance_id.clone(),
                        source: e,
                    });
                    continue;
                }
            };
            if claims.is_empty() {
                // Capacity outside this controller's domain.
                continue;
            }
            for claim in &claims {
                let node = match self.cluster.nodes_for_instance(instance_id).await {
                    Ok(nodes) => nodes.into_iter().next(),
                    Err(e) => {
                        errors.push(EntryError::NodeLookup {
                            instance_id: instance_id.clone(),
                            source: e,
                        });
                        continue;
                    }
                };
                if let Err(e) = self.handle_claim(notification, claim, node.as_ref()).await {
                    errors.push(e);
                }
            }
        }
    }

    /// Apply the resolved action to one claim.
    async fn handle_claim(
        &self,
        notification: &Notification,
        claim: &ComputeClaim,
        node: Option<&NodeRecord>,
    ) -> Result<(), EntryError> {
        let action = Action::for_kind(notification.kind);
        debug!(
            claim = %claim.name,
            node = node.map(|n| n.name.as_str()).unwrap_or(""),
            kind = %notification.kind,
            action = %action,
            "Handling interruption for claim"
        );

        // Notify first, act second: operators see why before what.
        if let Some(kind) = event_kind_for(notification.kind) {
            self.recorder.publish(Event {
                kind,
                claim_name: claim.name.clone(),
                node_name: node.map(|n| n.name.clone()),
            });
        }

        // Spot reclamations feed the scheduler's avoidance logic,
        // independent of whether removal proceeds.
        if notification.kind == NotificationKind::SpotInterruption {
            if let (Some(zone), Some(shape)) = (claim.zone.as_deref(), claim.shape.as_deref()) {
                self.cache.mark_unavailable(
                    notification.kind.as_str(),
                    shape,
                    zone,
                    CAPACITY_MARKET_SPOT,
                );
            }
        }

        if action == Action::EvacuateAndRemove {
            return self.evacuate_claim(notification, claim, node).await;
        }
        Ok(())
    }

    /// Request removal of a claim, exactly once.
    async fn evacuate_claim(
        &self,
        notification: &Notification,
        claim: &ComputeClaim,
        node: Option<&NodeRecord>,
    ) -> Result<(), EntryError> {
        // Idempotency gate: another message already triggered removal.
        if claim.deletion_requested {
            return Ok(());
        }
        match self.cluster.delete_claim(claim).await {
            Ok(()) => {}
            // Already gone is success.
            Err(ClusterError::NotFound(_)) => return Ok(()),
            Err(e) => {
                return Err(EntryError::DeleteClaim {
                    claim: claim.name.clone(),
                    source: e,
                })
            }
        }

        info!(
            claim = %claim.name,
            kind = %notification.kind,
            "Initiating claim removal from interruption notification"
        );
        self.recorder.publish(Event {
            kind: EventKind::TerminatingOnInterruption,
            claim_name: claim.name.clone(),
            node_name: node.map(|n| n.name.clone()),
        });
        self.metrics.record_disruption(
            notification.kind,
            claim.pool.as_deref().unwrap_or(""),
            claim.capacity_market.as_deref().unwrap_or(""),
        );
        Ok(())
    }

    /// Delete the underlying queue entry, recording (not propagating)
    /// any failure. Handling errors never suppress acknowledgment.
    async fn acknowledge(
        &self,
        queue: &dyn QueueTransport,
        entry: &RawEntry,
        errors: &mut Vec<EntryError>,
    ) {
        match queue.delete_entry(entry).await {
            Ok(()) => self.metrics.record_deleted(),
            Err(e) => errors.push(EntryError::Acknowledge(e)),
        }
    }
}

/// The operator event announced for a notification kind.
fn event_kind_for(kind: NotificationKind) -> Option<EventKind> {
    match kind {
        NotificationKind::SpotInterruption => Some(EventKind::SpotInterrupted),
        NotificationKind::RebalanceRecommendation => Some(EventKind::RebalanceRecommendation),
        NotificationKind::ScheduledChange => Some(EventKind::Unhealthy),
        NotificationKind::InstanceStopped => Some(EventKind::Stopping),
        NotificationKind::InstanceTerminated => Some(EventKind::Terminating),
        NotificationKind::NoOp => None,
    }
}

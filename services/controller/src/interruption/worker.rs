//! Interruption polling worker.
//!
//! Runs reconcile ticks back to back until shutdown is signaled. The
//! controller itself never backs off; the pause after a transport
//! failure lives here, in the scheduling layer.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, instrument, warn};

use super::controller::{InterruptionController, ReconcileError, Requeue};

/// Worker that drives the interruption controller.
pub struct InterruptionWorker {
    controller: Arc<InterruptionController>,
    error_backoff: Duration,
}

impl InterruptionWorker {
    /// Create a new worker.
    pub fn new(controller: Arc<InterruptionController>, error_backoff: Duration) -> Self {
        Self {
            controller,
            error_backoff,
        }
    }

    /// Run the polling loop until shutdown is signaled.
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            error_backoff_secs = self.error_backoff.as_secs(),
            "Starting interruption worker"
        );

        loop {
            tokio::select! {
                outcome = self.controller.reconcile() => {
                    match outcome {
                        Ok(Requeue::Immediately) => {}
                        Err(ReconcileError::Transport(e)) => {
                            error!(error = %e, "Queue transport failure");
                            tokio::select! {
                                _ = tokio::time::sleep(self.error_backoff) => {}
                                _ = shutdown.changed() => {}
                            }
                        }
                        Err(ReconcileError::Batch(e)) => {
                            // Handling errors do not change requeue timing;
                            // a future notification reattempts removal.
                            warn!(
                                errors = e.errors.len(),
                                error = %e,
                                "Interruption batch completed with errors"
                            );
                        }
                    }
                }
                _ = shutdown.changed() => {}
            }

            if *shutdown.borrow() {
                info!("Interruption worker shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryAdvisoryCache;
    use crate::cluster::MemoryCluster;
    use crate::events::MemoryRecorder;
    use crate::metrics::Metrics;
    use crate::queue::{MemoryQueue, RawEntry};

    fn test_controller(queue: Arc<MemoryQueue>) -> Arc<InterruptionController> {
        let registry = prometheus::Registry::new();
        Arc::new(InterruptionController::new(
            queue,
            Arc::new(MemoryCluster::new()),
            Arc::new(MemoryAdvisoryCache::new()),
            Arc::new(MemoryRecorder::new()),
            Metrics::register(&registry).unwrap(),
        ))
    }

    #[tokio::test]
    async fn test_worker_processes_until_shutdown() {
        let queue = Arc::new(MemoryQueue::new());
        queue.push(RawEntry::new(
            "m-1",
            serde_json::json!({
                "source": "aws.ec2",
                "detail-type": "EC2 Instance Rebalance Recommendation",
                "time": "2024-05-01T12:00:00Z",
                "detail": { "instance-id": "i-1" },
            })
            .to_string(),
        ));

        let worker = InterruptionWorker::new(
            test_controller(Arc::clone(&queue)),
            Duration::from_millis(10),
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move { worker.run(shutdown_rx).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(queue.deleted_ids(), vec!["m-1"]);
    }
}

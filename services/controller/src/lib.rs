//! nodeward Interruption Controller Library
//!
//! The interruption controller polls a durable message queue for
//! infrastructure-health and capacity-interruption notifications (spot
//! reclamation, scheduled maintenance, instance stop/terminate,
//! rebalance hints) and converts them into safe, idempotent lifecycle
//! actions on cluster-managed compute claims.
//!
//! ## Architecture
//!
//! - **Worker**: Polls the controller in a loop until shutdown
//! - **Controller**: One reconcile tick - fetch a batch, classify,
//!   fan out across affected claims, acknowledge, aggregate errors
//! - **Queue / Cluster**: Trait-abstracted external collaborators
//!   (memory-backed implementations are provided for tests and dev)
//! - **Advisory cache**: Records temporarily unavailable capacity for
//!   a scheduler elsewhere in the system
//!
//! ## Modules
//!
//! - `interruption`: The reconciliation core and its polling worker
//! - `queue`: Queue transport interface (fetch/delete semantics)
//! - `cluster`: Cluster API interface (claims, nodes, deletion)
//! - `cache`: Capacity advisory cache, write-only from this crate
//! - `events`: Operator-facing event publication
//! - `metrics`: Prometheus instrumentation

pub mod cache;
pub mod cluster;
pub mod config;
pub mod events;
pub mod interruption;
pub mod metrics;
pub mod queue;

// Re-export commonly used types
pub use cache::{AdvisoryCache, AdvisoryEntry, MemoryAdvisoryCache};
pub use cluster::{ClusterApi, ClusterError, ComputeClaim, MemoryCluster, NodeRecord};
pub use events::{Event, EventKind, EventRecorder, LogRecorder, MemoryRecorder};
pub use interruption::{Action, InterruptionController, InterruptionWorker, Requeue};
pub use metrics::Metrics;
pub use queue::{MemoryQueue, QueueError, QueueTransport, RawEntry};

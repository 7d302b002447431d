//! The interruption reconciliation core.
//!
//! One reconcile tick fetches a batch of queue entries, classifies each
//! into a notification, fans out across the affected compute claims
//! with bounded parallelism, applies the resolved lifecycle action
//! idempotently, and acknowledges every entry whose classification
//! succeeded or terminally failed. Errors are aggregated across the
//! whole batch rather than short-circuiting it.

pub mod controller;
pub mod worker;

pub use controller::{
    Action, BatchError, EntryError, InterruptionController, QueueFactory, ReconcileError, Requeue,
};
pub use worker::InterruptionWorker;

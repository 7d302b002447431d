//! Queue transport interface and memory-backed implementation.
//!
//! The broker is an external collaborator with at-least-once delivery:
//! entries fetched but not deleted will be redelivered, and duplicate
//! deliveries must be tolerated downstream. A memory implementation is
//! provided for testing and development.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;

/// One raw, unclassified queue entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEntry {
    /// Broker-assigned identifier, used to delete the entry.
    pub id: String,

    /// Message body. Absent bodies are terminal at the controller layer.
    pub body: Option<String>,
}

impl RawEntry {
    /// Construct an entry with a body.
    pub fn new(id: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            body: Some(body.into()),
        }
    }
}

/// Errors from the queue transport.
#[derive(Debug, Error, Clone)]
pub enum QueueError {
    /// Establishing the transport handle failed.
    #[error("connecting to queue: {0}")]
    Connect(String),

    /// Fetching a batch from the broker failed.
    #[error("fetching queue batch: {0}")]
    Fetch(String),

    /// Deleting an entry from the broker failed.
    #[error("deleting queue entry {id}: {reason}")]
    Delete { id: String, reason: String },
}

/// Queue transport interface.
#[async_trait]
pub trait QueueTransport: Send + Sync {
    /// Fetch one batch of entries. An empty batch is not an error.
    async fn fetch_batch(&self) -> Result<Vec<RawEntry>, QueueError>;

    /// Delete (acknowledge) one entry.
    async fn delete_entry(&self, entry: &RawEntry) -> Result<(), QueueError>;
}

/// Memory-backed queue for testing and development.
#[derive(Default)]
pub struct MemoryQueue {
    entries: Mutex<VecDeque<RawEntry>>,
    deleted: Mutex<Vec<String>>,
    fail_fetch: Mutex<bool>,
    fail_delete: Mutex<bool>,
}

impl MemoryQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue an entry for the next fetch.
    pub fn push(&self, entry: RawEntry) {
        self.entries.lock().unwrap().push_back(entry);
    }

    /// Make the next fetches fail.
    pub fn fail_fetch(&self, fail: bool) {
        *self.fail_fetch.lock().unwrap() = fail;
    }

    /// Make deletions fail.
    pub fn fail_delete(&self, fail: bool) {
        *self.fail_delete.lock().unwrap() = fail;
    }

    /// IDs of entries deleted so far, in deletion order.
    pub fn deleted_ids(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    /// Number of entries still waiting to be fetched.
    pub fn pending(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

#[async_trait]
impl QueueTransport for MemoryQueue {
    async fn fetch_batch(&self) -> Result<Vec<RawEntry>, QueueError> {
        if *self.fail_fetch.lock().unwrap() {
            return Err(QueueError::Fetch("injected fetch failure".to_string()));
        }
        let batch: Vec<RawEntry> = self.entries.lock().unwrap().drain(..).collect();
        if batch.is_empty() {
            // Simulate broker long-polling so callers don't spin on an
            // empty queue.
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        Ok(batch)
    }

    async fn delete_entry(&self, entry: &RawEntry) -> Result<(), QueueError> {
        if *self.fail_delete.lock().unwrap() {
            return Err(QueueError::Delete {
                id: entry.id.clone(),
                reason: "injected delete failure".to_string(),
            });
        }
        self.deleted.lock().unwrap().push(entry.id.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fetch_drains_pending_entries() {
        let queue = MemoryQueue::new();
        queue.push(RawEntry::new("m-1", "{}"));
        queue.push(RawEntry::new("m-2", "{}"));

        let batch = queue.fetch_batch().await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(queue.pending(), 0);

        let empty = queue.fetch_batch().await.unwrap();
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn test_delete_records_entry_id() {
        let queue = MemoryQueue::new();
        let entry = RawEntry::new("m-1", "{}");

        queue.delete_entry(&entry).await.unwrap();
        assert_eq!(queue.deleted_ids(), vec!["m-1"]);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let queue = MemoryQueue::new();
        queue.fail_fetch(true);
        assert!(queue.fetch_batch().await.is_err());

        queue.fail_delete(true);
        let entry = RawEntry::new("m-1", "{}");
        assert!(queue.delete_entry(&entry).await.is_err());
        assert!(queue.deleted_ids().is_empty());
    }
}

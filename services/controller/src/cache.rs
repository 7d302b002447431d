//! Capacity advisory cache.
//!
//! Records "this compute shape is temporarily unavailable in this zone"
//! for a scheduler elsewhere in the system. This crate only ever writes
//! to the cache, and writes are fire-and-forget: a cache entry must
//! never block or fail a lifecycle action.

use std::sync::RwLock;

use chrono::{DateTime, Utc};

/// Capacity market label for spot capacity.
pub const CAPACITY_MARKET_SPOT: &str = "spot";

/// One unavailability assertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvisoryEntry {
    /// Why the capacity is considered unavailable (notification kind).
    pub reason: String,

    /// Instance shape.
    pub shape: String,

    /// Topology zone.
    pub zone: String,

    /// Capacity market.
    pub market: String,

    /// When this entry was recorded.
    pub recorded_at: DateTime<Utc>,
}

/// Write-side interface to the advisory cache.
///
/// Implementations must be safe for concurrent writers: the fan-out
/// engine's workers write without additional locking.
pub trait AdvisoryCache: Send + Sync {
    /// Assert that a (shape, zone, market) offering is temporarily
    /// unavailable.
    fn mark_unavailable(&self, reason: &str, shape: &str, zone: &str, market: &str);
}

/// Memory-backed advisory cache.
///
/// The read side belongs to the scheduler; it is exposed here only as
/// a snapshot so that tests and the scheduler process can consume it.
#[derive(Debug, Default)]
pub struct MemoryAdvisoryCache {
    entries: RwLock<Vec<AdvisoryEntry>>,
}

impl MemoryAdvisoryCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// All entries recorded so far.
    pub fn snapshot(&self) -> Vec<AdvisoryEntry> {
        self.entries.read().unwrap().clone()
    }
}

impl AdvisoryCache for MemoryAdvisoryCache {
    fn mark_unavailable(&self, reason: &str, shape: &str, zone: &str, market: &str) {
        tracing::debug!(
            reason = reason,
            shape = shape,
            zone = zone,
            market = market,
            "Marking offering unavailable"
        );
        self.entries.write().unwrap().push(AdvisoryEntry {
            reason: reason.to_string(),
            shape: shape.to_string(),
            zone: zone.to_string(),
            market: market.to_string(),
            recorded_at: Utc::now(),
        });
    }
}

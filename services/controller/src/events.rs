//! Operator-facing event publication.
//!
//! The controller notifies before it acts: exactly one event is
//! published per handled claim, chosen by notification kind, so
//! operators see why a machine is going away before it does. The sink
//! must be safe for concurrent publishers.

use std::sync::Mutex;

/// What an event announces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Spot capacity is being reclaimed.
    SpotInterrupted,

    /// The provider recommends rebalancing off the instance.
    RebalanceRecommendation,

    /// Scheduled maintenance marked the machine unhealthy.
    Unhealthy,

    /// The instance is stopping.
    Stopping,

    /// The instance is terminating.
    Terminating,

    /// Claim removal was initiated in response to an interruption.
    TerminatingOnInterruption,
}

impl EventKind {
    /// Human-readable event message.
    pub fn message(&self) -> &'static str {
        match self {
            Self::SpotInterrupted => "spot interruption warning received",
            Self::RebalanceRecommendation => "rebalance recommendation received",
            Self::Unhealthy => "scheduled change health event received",
            Self::Stopping => "instance stop notification received",
            Self::Terminating => "instance termination notification received",
            Self::TerminatingOnInterruption => "initiating removal from interruption notification",
        }
    }
}

/// One published event, tied to a claim and optionally its node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub kind: EventKind,
    pub claim_name: String,
    pub node_name: Option<String>,
}

/// Event publication sink.
pub trait EventRecorder: Send + Sync {
    /// Publish one event. Best-effort; must not fail the caller.
    fn publish(&self, event: Event);
}

/// Recorder that publishes events as structured log lines.
#[derive(Debug, Default)]
pub struct LogRecorder;

impl LogRecorder {
    pub fn new() -> Self {
        Self
    }
}

impl EventRecorder for LogRecorder {
    fn publish(&self, event: Event) {
        tracing::info!(
            claim = %event.claim_name,
            node = event.node_name.as_deref().unwrap_or(""),
            event = ?event.kind,
            "{}",
            event.kind.message()
        );
    }
}

/// Recorder that retains events for inspection in tests.
#[derive(Debug, Default)]
pub struct MemoryRecorder {
    events: Mutex<Vec<Event>>,
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events published so far, in publication order.
    pub fn recorded(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }
}

impl EventRecorder for MemoryRecorder {
    fn publish(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

//! Typed notification produced from one queue message.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The kind of infrastructure event a queue message describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NotificationKind {
    /// Provider-scheduled maintenance affecting the instance.
    ScheduledChange,

    /// Spot capacity is being reclaimed imminently.
    SpotInterruption,

    /// The instance is stopping or has stopped.
    InstanceStopped,

    /// The instance is shutting down or has been terminated.
    InstanceTerminated,

    /// The provider recommends moving off the instance.
    RebalanceRecommendation,

    /// A well-formed event shape this controller takes no action on.
    NoOp,
}

impl NotificationKind {
    /// Stable string form, used as a metric and cache label.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ScheduledChange => "scheduled_change",
            Self::SpotInterruption => "spot_interruption",
            Self::InstanceStopped => "instance_stopped",
            Self::InstanceTerminated => "instance_terminated",
            Self::RebalanceRecommendation => "rebalance_recommendation",
            Self::NoOp => "no_op",
        }
    }
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable, classified representation of one queue message.
///
/// Every kind except [`NotificationKind::NoOp`] logically names at least
/// one instance, though zero matches in the cluster is still a valid
/// (no-op) outcome for the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// What happened.
    pub kind: NotificationKind,

    /// Provider-assigned identifiers of the affected instances.
    pub instance_ids: Vec<String>,

    /// When the provider asserts the event occurred.
    ///
    /// Used for latency observation only, never for ordering decisions.
    pub origin_time: DateTime<Utc>,
}

impl Notification {
    /// A `NoOp` notification carrying only the envelope timestamp.
    pub fn no_op(origin_time: DateTime<Utc>) -> Self {
        Self {
            kind: NotificationKind::NoOp,
            instance_ids: Vec::new(),
            origin_time,
        }
    }
}

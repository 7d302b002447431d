//! Prometheus instrumentation for the interruption controller.
//!
//! Metrics are registered against an injected [`Registry`] rather than
//! process-global statics, so tests and embedders can scope them.
//!
//! # Metrics
//!
//! ## Counters
//! - `nodeward_interruption_received_messages_total` - Messages classified, by kind
//! - `nodeward_interruption_deleted_messages_total` - Queue entries deleted
//! - `nodeward_claims_disrupted_total` - Claim removals initiated, by reason/pool/market
//!
//! ## Histograms
//! - `nodeward_interruption_message_latency_seconds` - Provider event time to handling completion

use prometheus::{
    exponential_buckets, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry,
};

use nodeward_messages::NotificationKind;

/// Controller metrics, scoped to one registry.
#[derive(Clone)]
pub struct Metrics {
    received_messages: IntCounterVec,
    deleted_messages: IntCounter,
    message_latency: Histogram,
    claims_disrupted: IntCounterVec,
}

impl Metrics {
    /// Create the metric family and register it.
    pub fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let received_messages = IntCounterVec::new(
            Opts::new(
                "nodeward_interruption_received_messages_total",
                "Total interruption messages successfully classified",
            ),
            &["message_kind"],
        )?;
        registry.register(Box::new(received_messages.clone()))?;

        let deleted_messages = IntCounter::with_opts(Opts::new(
            "nodeward_interruption_deleted_messages_total",
            "Total interruption queue entries deleted",
        ))?;
        registry.register(Box::new(deleted_messages.clone()))?;

        let message_latency = Histogram::with_opts(
            HistogramOpts::new(
                "nodeward_interruption_message_latency_seconds",
                "Seconds between the provider event time and handling completion",
            )
            .buckets(exponential_buckets(0.1, 2.0, 14)?),
        )?;
        registry.register(Box::new(message_latency.clone()))?;

        let claims_disrupted = IntCounterVec::new(
            Opts::new(
                "nodeward_claims_disrupted_total",
                "Total compute claim removals initiated by interruption handling",
            ),
            &["reason", "pool", "capacity_market"],
        )?;
        registry.register(Box::new(claims_disrupted.clone()))?;

        Ok(Self {
            received_messages,
            deleted_messages,
            message_latency,
            claims_disrupted,
        })
    }

    /// Count one successfully classified message.
    pub fn record_received(&self, kind: NotificationKind) {
        self.received_messages
            .with_label_values(&[kind.as_str()])
            .inc();
    }

    /// Count one deleted queue entry.
    pub fn record_deleted(&self) {
        self.deleted_messages.inc();
    }

    /// Observe end-to-end handling latency for one notification.
    pub fn observe_latency(&self, seconds: f64) {
        self.message_latency.observe(seconds);
    }

    /// Count one initiated claim removal.
    pub fn record_disruption(&self, reason: NotificationKind, pool: &str, market: &str) {
        self.claims_disrupted
            .with_label_values(&[reason.as_str(), pool, market])
            .inc();
    }

    /// Current disruption count for a (reason, pool, market) tuple.
    pub fn disrupted_count(&self, reason: NotificationKind, pool: &str, market: &str) -> u64 {
        self.claims_disrupted
            .with_label_values(&[reason.as_str(), pool, market])
            .get()
    }

    /// Current deleted-entry count.
    pub fn deleted_count(&self) -> u64 {
        self.deleted_messages.get()
    }

    /// Number of latency samples observed.
    pub fn latency_samples(&self) -> u64 {
        self.message_latency.get_sample_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_increment() {
        let registry = Registry::new();
        let metrics = Metrics::register(&registry).unwrap();

        metrics.record_received(NotificationKind::SpotInterruption);
        metrics.record_deleted();
        metrics.observe_latency(1.5);
        metrics.record_disruption(NotificationKind::SpotInterruption, "default", "spot");

        assert_eq!(metrics.deleted_count(), 1);
        assert_eq!(metrics.latency_samples(), 1);
        assert_eq!(
            metrics.disrupted_count(NotificationKind::SpotInterruption, "default", "spot"),
            1
        );
    }

    #[test]
    fn test_double_registration_fails() {
        let registry = Registry::new();
        Metrics::register(&registry).unwrap();
        assert!(Metrics::register(&registry).is_err());
    }
}

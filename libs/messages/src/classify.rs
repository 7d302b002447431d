//! Classification of raw queue payloads into [`Notification`]s.
//!
//! Provider events arrive as a JSON envelope carrying a `source`, a
//! `detail-type`, a timestamp, and a type-specific `detail` section.
//! The classifier routes the envelope to a parser registered for its
//! `(source, detail-type)` pair. Envelopes no parser claims are
//! well-formed but unknown, and classify to `NoOp`.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::ClassifyError;
use crate::notification::{Notification, NotificationKind};

/// The common outer shape of every provider event.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    /// Originating service, e.g. `aws.ec2`.
    pub source: String,

    /// Event shape discriminator within the source.
    #[serde(rename = "detail-type")]
    pub detail_type: String,

    /// When the provider asserts the event occurred.
    pub time: DateTime<Utc>,

    /// Type-specific payload, interpreted by the matching parser.
    #[serde(default)]
    pub detail: serde_json::Value,
}

/// A parser for one `(source, detail-type)` event shape.
pub trait EnvelopeParser: Send + Sync {
    /// The `source` value this parser claims.
    fn source(&self) -> &'static str;

    /// The `detail-type` value this parser claims.
    fn detail_type(&self) -> &'static str;

    /// Interpret the envelope's detail section.
    fn parse(&self, envelope: &Envelope) -> Result<Notification, ClassifyError>;
}

/// Deterministic classifier over a fixed parser registry.
pub struct Classifier {
    parsers: Vec<Box<dyn EnvelopeParser>>,
}

impl Classifier {
    /// Build a classifier from an explicit parser set.
    pub fn new(parsers: Vec<Box<dyn EnvelopeParser>>) -> Self {
        Self { parsers }
    }

    /// Classify one raw message body.
    ///
    /// Malformed payloads fail; well-formed envelopes no parser claims
    /// classify to [`NotificationKind::NoOp`].
    pub fn classify(&self, body: &str) -> Result<Notification, ClassifyError> {
        let value: serde_json::Value = serde_json::from_str(body)
            .map_err(|e| ClassifyError::InvalidJson(e.to_string()))?;
        let envelope: Envelope = serde_json::from_value(value)
            .map_err(|e| ClassifyError::InvalidEnvelope(e.to_string()))?;

        for parser in &self.parsers {
            if parser.source() == envelope.source && parser.detail_type() == envelope.detail_type {
                return parser.parse(&envelope);
            }
        }
        Ok(Notification::no_op(envelope.time))
    }
}

impl Default for Classifier {
    /// The full set of recognized provider event shapes.
    fn default() -> Self {
        Self::new(vec![
            Box::new(SpotInterruptionParser),
            Box::new(RebalanceRecommendationParser),
            Box::new(StateChangeParser),
            Box::new(ScheduledChangeParser),
        ])
    }
}

impl std::fmt::Debug for Classifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Classifier")
            .field("parsers", &self.parsers.len())
            .finish()
    }
}

fn parse_detail<T: serde::de::DeserializeOwned>(envelope: &Envelope) -> Result<T, ClassifyError> {
    serde_json::from_value(envelope.detail.clone()).map_err(|e| ClassifyError::InvalidDetail {
        event_source: envelope.source.clone(),
        detail_type: envelope.detail_type.clone(),
        reason: e.to_string(),
    })
}

#[derive(Debug, Deserialize)]
struct InstanceDetail {
    #[serde(rename = "instance-id")]
    instance_id: String,
}

#[derive(Debug, Deserialize)]
struct StateChangeDetail {
    #[serde(rename = "instance-id")]
    instance_id: String,
    state: String,
}

#[derive(Debug, Deserialize)]
struct HealthDetail {
    service: String,
    #[serde(rename = "eventTypeCategory")]
    event_type_category: String,
    #[serde(rename = "affectedEntities", default)]
    affected_entities: Vec<AffectedEntity>,
}

#[derive(Debug, Deserialize)]
struct AffectedEntity {
    #[serde(rename = "entityValue")]
    entity_value: String,
}

/// Spot capacity reclamation warnings.
struct SpotInterruptionParser;

impl EnvelopeParser for SpotInterruptionParser {
    fn source(&self) -> &'static str {
        "aws.ec2"
    }

    fn detail_type(&self) -> &'static str {
        "EC2 Spot Instance Interruption Warning"
    }

    fn parse(&self, envelope: &Envelope) -> Result<Notification, ClassifyError> {
        let detail: InstanceDetail = parse_detail(envelope)?;
        Ok(Notification {
            kind: NotificationKind::SpotInterruption,
            instance_ids: vec![detail.instance_id],
            origin_time: envelope.time,
        })
    }
}

/// Rebalance recommendations (advisory, no lifecycle action).
struct RebalanceRecommendationParser;

impl EnvelopeParser for RebalanceRecommendationParser {
    fn source(&self) -> &'static str {
        "aws.ec2"
    }

    fn detail_type(&self) -> &'static str {
        "EC2 Instance Rebalance Recommendation"
    }

    fn parse(&self, envelope: &Envelope) -> Result<Notification, ClassifyError> {
        let detail: InstanceDetail = parse_detail(envelope)?;
        Ok(Notification {
            kind: NotificationKind::RebalanceRecommendation,
            instance_ids: vec![detail.instance_id],
            origin_time: envelope.time,
        })
    }
}

/// Instance stop/terminate state transitions.
///
/// Only the stopping and terminating halves of the state machine are
/// actionable; transitions like `pending` or `running` classify to NoOp.
struct StateChangeParser;

impl EnvelopeParser for StateChangeParser {
    fn source(&self) -> &'static str {
        "aws.ec2"
    }

    fn detail_type(&self) -> &'static str {
        "EC2 Instance State-change Notification"
    }

    fn parse(&self, envelope: &Envelope) -> Result<Notification, ClassifyError> {
        let detail: StateChangeDetail = parse_detail(envelope)?;
        let kind = match detail.state.as_str() {
            "stopping" | "stopped" => NotificationKind::InstanceStopped,
            "shutting-down" | "terminated" => NotificationKind::InstanceTerminated,
            _ => return Ok(Notification::no_op(envelope.time)),
        };
        Ok(Notification {
            kind,
            instance_ids: vec![detail.instance_id],
            origin_time: envelope.time,
        })
    }
}

/// Scheduled maintenance events from the provider's health feed.
struct ScheduledChangeParser;

impl EnvelopeParser for ScheduledChangeParser {
    fn source(&self) -> &'static str {
        "aws.health"
    }

    fn detail_type(&self) -> &'static str {
        "AWS Health Event"
    }

    fn parse(&self, envelope: &Envelope) -> Result<Notification, ClassifyError> {
        let detail: HealthDetail = parse_detail(envelope)?;
        if detail.service != "EC2" || detail.event_type_category != "scheduledChange" {
            return Ok(Notification::no_op(envelope.time));
        }
        Ok(Notification {
            kind: NotificationKind::ScheduledChange,
            instance_ids: detail
                .affected_entities
                .into_iter()
                .map(|e| e.entity_value)
                .collect(),
            origin_time: envelope.time,
        })
    }
}

//! Error types for message classification.

use thiserror::Error;

/// Errors that can occur while classifying a raw queue message.
#[derive(Debug, Error, Clone)]
pub enum ClassifyError {
    /// The payload is not valid JSON.
    #[error("invalid json payload: {0}")]
    InvalidJson(String),

    /// The payload is valid JSON but is missing envelope fields.
    #[error("invalid event envelope: {0}")]
    InvalidEnvelope(String),

    /// The envelope was recognized but its detail section is malformed.
    #[error("invalid detail for {event_source}/{detail_type}: {reason}")]
    InvalidDetail {
        event_source: String,
        detail_type: String,
        reason: String,
    },
}

//! # nodeward-messages
//!
//! Notification model and message classification for the nodeward
//! interruption controller.
//!
//! ## Design Principles
//!
//! - A `Notification` is the immutable, typed representation of exactly
//!   one queue message.
//! - Classification is deterministic and side-effect free: the same raw
//!   body always yields the same notification or the same error.
//! - Unrecognized but well-formed event shapes degrade to `NoOp` rather
//!   than failing, so new provider event types never stall the queue.
//! - Structurally invalid payloads are a [`ClassifyError`], which the
//!   controller treats as locally terminal (acknowledge and drop).

mod classify;
mod error;
mod notification;

pub use classify::{Classifier, Envelope, EnvelopeParser};
pub use error::ClassifyError;
pub use notification::{Notification, NotificationKind};

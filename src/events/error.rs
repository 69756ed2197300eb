//! Error types for the event bus.

use super::EventKind;
use crate::upstream::domain::ServerName;
use thiserror::Error;

/// Errors raised while validating events.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EventError {
    /// The payload is malformed or inconsistent with its event kind.
    #[error("invalid {kind} payload for server {server_name}: {reason}")]
    InvalidPayload {
        /// Kind of the rejected event.
        kind: EventKind,
        /// Server the event concerned.
        server_name: ServerName,
        /// Why the payload was rejected.
        reason: String,
    },
}

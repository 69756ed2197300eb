//! Runtime connection state for an upstream server.

use super::ParseConnectionStateError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Connection lifecycle state of an upstream server.
///
/// The machine has no terminal state: it cycles as connections are
/// established, lost and retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No connection and no attempt in progress.
    #[default]
    Disconnected,
    /// Transport connection is being established.
    Connecting,
    /// Connected; authentication is in progress.
    Authenticating,
    /// Authenticated; tool discovery is in progress.
    Discovering,
    /// Connected with tools discovered.
    Ready,
    /// The last attempt failed.
    Error,
}

impl ConnectionState {
    /// Returns the canonical storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Authenticating => "authenticating",
            Self::Discovering => "discovering",
            Self::Ready => "ready",
            Self::Error => "error",
        }
    }

    /// Returns whether this is one of the in-progress connecting phases.
    #[must_use]
    pub const fn is_connecting(self) -> bool {
        matches!(
            self,
            Self::Connecting | Self::Authenticating | Self::Discovering
        )
    }

    /// Returns whether the connection is established.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Ready)
    }

    /// Returns whether the last attempt failed.
    #[must_use]
    pub const fn is_error(self) -> bool {
        matches!(self, Self::Error)
    }

    /// Returns whether a new connection attempt must not be started.
    #[must_use]
    pub const fn is_active(self) -> bool {
        self.is_connecting() || self.is_connected()
    }

    /// Returns whether transition to `target` is part of the expected
    /// lifecycle.
    #[must_use]
    pub const fn can_transition_to(self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Disconnected | Self::Error, Self::Connecting)
                | (
                    Self::Connecting,
                    Self::Authenticating
                        | Self::Discovering
                        | Self::Ready
                        | Self::Error
                        | Self::Disconnected
                )
                | (
                    Self::Authenticating,
                    Self::Connecting
                        | Self::Discovering
                        | Self::Ready
                        | Self::Error
                        | Self::Disconnected
                )
                | (
                    Self::Discovering,
                    Self::Ready | Self::Error | Self::Disconnected
                )
                | (Self::Ready | Self::Error, Self::Disconnected)
                | (Self::Ready, Self::Error)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

impl TryFrom<&str> for ConnectionState {
    type Error = ParseConnectionStateError;

    fn try_from(value: &str) -> Result<Self, ParseConnectionStateError> {
        let normalized = value.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "disconnected" => Ok(Self::Disconnected),
            "connecting" => Ok(Self::Connecting),
            "authenticating" => Ok(Self::Authenticating),
            "discovering" => Ok(Self::Discovering),
            "ready" => Ok(Self::Ready),
            "error" => Ok(Self::Error),
            _ => Err(ParseConnectionStateError(value.to_owned())),
        }
    }
}

/// Runtime connection bookkeeping owned by a server's state machine.
///
/// Never persisted; rebuilt from scratch on every process start.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    /// Current connection state.
    pub state: ConnectionState,
    /// Failures since the last successful connection.
    pub consecutive_failures: u32,
    /// Total failed attempts since the machine was created.
    pub retry_count: u32,
    /// Tools discovered by the last successful connection.
    pub tool_count: usize,
    /// Message of the most recent failure.
    pub last_error: Option<String>,
    /// When the connection last reached `ready`.
    pub last_connected_at: Option<DateTime<Utc>>,
    /// When the first connection attempt was made.
    pub first_attempt_at: Option<DateTime<Utc>>,
}

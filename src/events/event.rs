//! Typed events exchanged between connection producers and their consumers.

use super::EventError;
use crate::upstream::domain::{ConnectionState, ServerName};
use chrono::{DateTime, Utc};
use mockable::Clock;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kinds of event carried by the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A connection state machine changed state.
    StateChange,
    /// A server's persisted configuration changed.
    ConfigChange,
    /// A connection discovered its tools.
    ToolsUpdated,
}

impl EventKind {
    /// Every event kind, in a stable order.
    pub const ALL: [Self; 3] = [Self::StateChange, Self::ConfigChange, Self::ToolsUpdated];

    /// Returns the canonical representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::StateChange => "state_change",
            Self::ConfigChange => "config_change",
            Self::ToolsUpdated => "tools_updated",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Configuration change recorded by a `ConfigChange` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConfigAction {
    /// The server was added.
    Added,
    /// The server was removed.
    Removed,
    /// The server was enabled by a manual action.
    Enabled,
    /// The server was disabled by a manual action.
    Disabled,
    /// The server was disabled by the failure policy.
    AutoDisabled,
    /// The failure policy lifted its own auto-disable after a reconnection.
    Recovered,
    /// The server was quarantined.
    Quarantined,
    /// The server was released from quarantine.
    Unquarantined,
    /// Reconciliation repaired drift for the server.
    Reconciled,
}

impl ConfigAction {
    /// Returns the canonical action descriptor.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Removed => "removed",
            Self::Enabled => "enabled",
            Self::Disabled => "disabled",
            Self::AutoDisabled => "auto-disabled",
            Self::Recovered => "recovered",
            Self::Quarantined => "quarantined",
            Self::Unquarantined => "unquarantined",
            Self::Reconciled => "reconciled",
        }
    }

    /// Returns the manual action matching a requested enabled flag.
    #[must_use]
    pub const fn for_toggle(enabled: bool) -> Self {
        if enabled { Self::Enabled } else { Self::Disabled }
    }
}

impl fmt::Display for ConfigAction {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Kind-specific event payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    /// Old and new connection state.
    StateChange {
        /// State before the transition.
        old: ConnectionState,
        /// State after the transition.
        new: ConnectionState,
    },
    /// Configuration action descriptor.
    ConfigChange {
        /// What changed.
        action: ConfigAction,
    },
    /// Number of tools discovered.
    ToolsUpdated {
        /// Discovered tool count.
        tool_count: usize,
    },
}

impl EventPayload {
    /// Returns the event kind this payload belongs to.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::StateChange { .. } => EventKind::StateChange,
            Self::ConfigChange { .. } => EventKind::ConfigChange,
            Self::ToolsUpdated { .. } => EventKind::ToolsUpdated,
        }
    }
}

/// Event published on the bus for one upstream server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    server_name: ServerName,
    payload: EventPayload,
    timestamp: DateTime<Utc>,
}

impl Event {
    /// Creates an event stamped with the current time.
    #[must_use]
    pub fn new(server_name: ServerName, payload: EventPayload, clock: &impl Clock) -> Self {
        Self::at(server_name, payload, clock.utc())
    }

    /// Creates an event with an explicit timestamp.
    #[must_use]
    pub const fn at(
        server_name: ServerName,
        payload: EventPayload,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            server_name,
            payload,
            timestamp,
        }
    }

    /// Creates a state change event.
    #[must_use]
    pub fn state_change(
        server_name: ServerName,
        old: ConnectionState,
        new: ConnectionState,
        clock: &impl Clock,
    ) -> Self {
        Self::new(server_name, EventPayload::StateChange { old, new }, clock)
    }

    /// Creates a configuration change event.
    #[must_use]
    pub fn config_change(
        server_name: ServerName,
        action: ConfigAction,
        clock: &impl Clock,
    ) -> Self {
        Self::new(server_name, EventPayload::ConfigChange { action }, clock)
    }

    /// Creates a tools updated event.
    #[must_use]
    pub fn tools_updated(server_name: ServerName, tool_count: usize, clock: &impl Clock) -> Self {
        Self::new(server_name, EventPayload::ToolsUpdated { tool_count }, clock)
    }

    /// Returns the server the event concerns.
    #[must_use]
    pub const fn server_name(&self) -> &ServerName {
        &self.server_name
    }

    /// Returns the payload.
    #[must_use]
    pub const fn payload(&self) -> &EventPayload {
        &self.payload
    }

    /// Returns the event kind.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    /// Returns when the event was produced.
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Checks that the payload is meaningful for its kind.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::InvalidPayload`] for a state change whose old
    /// and new states are equal.
    pub fn validate(&self) -> Result<(), EventError> {
        match self.payload {
            EventPayload::StateChange { old, new } if old == new => Err(EventError::InvalidPayload {
                kind: self.kind(),
                server_name: self.server_name.clone(),
                reason: format!("state change from {old} to itself"),
            }),
            _ => Ok(()),
        }
    }
}

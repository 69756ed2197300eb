//! Upstream server aggregate root.

use super::{ConnectionState, ConnectionStatus, GroupName, ServerName};
use serde::{Deserialize, Serialize};

/// Upstream server record shared by the durable store, the configuration
/// file and the runtime registry.
///
/// Only the configuration fields are serialized. The runtime
/// [`ConnectionStatus`] lives alongside them in memory and is rebuilt from
/// scratch on every start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamServer {
    name: ServerName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    group: Option<GroupName>,
    #[serde(default = "default_enabled")]
    enabled: bool,
    #[serde(default)]
    auto_disabled: bool,
    #[serde(default)]
    auto_disable_reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    auto_disable_threshold: Option<u32>,
    #[serde(default)]
    quarantined: bool,
    #[serde(default)]
    revision: u64,
    #[serde(skip)]
    connection: ConnectionStatus,
}

const fn default_enabled() -> bool {
    true
}

/// Result of applying a manual enable or disable request to one server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManualToggle {
    /// The requested `enabled` value was applied.
    Applied,
    /// Enabling was refused because the server is quarantined.
    BlockedByQuarantine,
}

/// Read-only per-server view exposed to status and documentation consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerStatusView {
    /// Server identity.
    pub name: ServerName,
    /// Whether the server is enabled.
    pub enabled: bool,
    /// Whether the server was disabled by the failure policy.
    pub auto_disabled: bool,
    /// Reason recorded by the failure policy, empty when not auto-disabled.
    pub auto_disable_reason: String,
    /// Whether the server is quarantined.
    pub quarantined: bool,
    /// Current connection state.
    pub connection_state: ConnectionState,
    /// Tools discovered by the last successful connection.
    pub tool_count: usize,
}

impl UpstreamServer {
    /// Creates an enabled, non-quarantined server using the default
    /// auto-disable threshold.
    #[must_use]
    pub fn new(name: ServerName) -> Self {
        Self {
            name,
            group: None,
            enabled: true,
            auto_disabled: false,
            auto_disable_reason: String::new(),
            auto_disable_threshold: None,
            quarantined: false,
            revision: 0,
            connection: ConnectionStatus::default(),
        }
    }

    /// Places the server in a group.
    #[must_use]
    pub fn with_group(mut self, group: GroupName) -> Self {
        self.group = Some(group);
        self
    }

    /// Overrides the auto-disable threshold. `0` disables auto-disable.
    #[must_use]
    pub const fn with_auto_disable_threshold(mut self, threshold: u32) -> Self {
        self.auto_disable_threshold = Some(threshold);
        self
    }

    /// Sets the initial enabled flag.
    #[must_use]
    pub const fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Sets the initial quarantine flag.
    ///
    /// A quarantined server is never enabled, so this also clears
    /// `enabled` when set.
    #[must_use]
    pub const fn with_quarantined(mut self, quarantined: bool) -> Self {
        self.quarantined = quarantined;
        if quarantined {
            self.enabled = false;
        }
        self
    }

    /// Returns the server name.
    #[must_use]
    pub const fn name(&self) -> &ServerName {
        &self.name
    }

    /// Returns the group the server belongs to, if any.
    #[must_use]
    pub const fn group(&self) -> Option<&GroupName> {
        self.group.as_ref()
    }

    /// Returns whether the server belongs to `group`.
    #[must_use]
    pub fn is_member_of(&self, group: &GroupName) -> bool {
        self.group.as_ref() == Some(group)
    }

    /// Returns whether the server is enabled.
    #[must_use]
    pub const fn enabled(&self) -> bool {
        self.enabled
    }

    /// Returns whether the server was disabled by the failure policy.
    #[must_use]
    pub const fn auto_disabled(&self) -> bool {
        self.auto_disabled
    }

    /// Returns the recorded auto-disable reason.
    #[must_use]
    pub fn auto_disable_reason(&self) -> &str {
        &self.auto_disable_reason
    }

    /// Returns the per-server threshold override, if configured.
    #[must_use]
    pub const fn auto_disable_threshold(&self) -> Option<u32> {
        self.auto_disable_threshold
    }

    /// Returns the threshold in effect, falling back to `default`.
    #[must_use]
    pub fn effective_threshold(&self, default: u32) -> u32 {
        self.auto_disable_threshold.unwrap_or(default)
    }

    /// Returns whether the server is quarantined.
    #[must_use]
    pub const fn quarantined(&self) -> bool {
        self.quarantined
    }

    /// Returns the revision of the last coordinated write.
    #[must_use]
    pub const fn revision(&self) -> u64 {
        self.revision
    }

    /// Returns the runtime connection status.
    #[must_use]
    pub const fn connection(&self) -> &ConnectionStatus {
        &self.connection
    }

    /// Returns whether a live connection should be held for this server.
    #[must_use]
    pub const fn should_connect(&self) -> bool {
        self.enabled && !self.quarantined
    }

    /// Replaces the runtime connection status.
    pub fn set_connection(&mut self, connection: ConnectionStatus) {
        self.connection = connection;
    }

    /// Applies a manual enable or disable.
    ///
    /// The auto-disable flag and reason are cleared in both directions.
    /// Enabling a quarantined server leaves it disabled.
    pub fn apply_manual_toggle(&mut self, enabled: bool) -> ManualToggle {
        self.auto_disabled = false;
        self.auto_disable_reason.clear();

        if enabled && self.quarantined {
            self.enabled = false;
            return ManualToggle::BlockedByQuarantine;
        }

        self.enabled = enabled;
        ManualToggle::Applied
    }

    /// Disables the server on behalf of the failure policy.
    pub fn mark_auto_disabled(&mut self, reason: impl Into<String>) {
        self.enabled = false;
        self.auto_disabled = true;
        self.auto_disable_reason = reason.into();
    }

    /// Clears automatic protection after a successful reconnection.
    ///
    /// Returns `false` without changing anything when the server is
    /// quarantined or was not auto-disabled.
    pub fn recover_from_auto_disable(&mut self) -> bool {
        if self.quarantined || !self.auto_disabled {
            return false;
        }

        self.enabled = true;
        self.auto_disabled = false;
        self.auto_disable_reason.clear();
        true
    }

    /// Sets or clears the quarantine flag.
    ///
    /// Quarantining disables the server. Lifting quarantine does not enable
    /// it again.
    pub const fn set_quarantined(&mut self, quarantined: bool) {
        self.quarantined = quarantined;
        if quarantined {
            self.enabled = false;
        }
    }

    /// Repairs flag combinations that must never be at rest.
    ///
    /// Returns whether anything was changed.
    pub const fn normalize(&mut self) -> bool {
        if self.enabled && (self.auto_disabled || self.quarantined) {
            self.enabled = false;
            return true;
        }
        false
    }

    /// Returns whether the stored flags satisfy every at-rest invariant.
    #[must_use]
    pub const fn is_consistent(&self) -> bool {
        !(self.enabled && (self.auto_disabled || self.quarantined))
    }

    /// Sets the revision to follow `previous`.
    pub const fn advance_revision(&mut self, previous: u64) {
        self.revision = previous.saturating_add(1);
    }

    /// Returns whether the persisted fields of two records agree.
    ///
    /// Revisions and runtime connection status are ignored.
    #[must_use]
    pub fn same_settings(&self, other: &Self) -> bool {
        self.name == other.name
            && self.group == other.group
            && self.enabled == other.enabled
            && self.auto_disabled == other.auto_disabled
            && self.auto_disable_reason == other.auto_disable_reason
            && self.auto_disable_threshold == other.auto_disable_threshold
            && self.quarantined == other.quarantined
    }

    /// Returns a copy carrying `other`'s configuration with this record's
    /// runtime connection status.
    #[must_use]
    pub fn with_settings_from(&self, other: &Self) -> Self {
        let mut merged = other.clone();
        merged.connection = self.connection.clone();
        merged
    }

    /// Builds the read-only status view.
    #[must_use]
    pub fn status_view(&self) -> ServerStatusView {
        ServerStatusView {
            name: self.name.clone(),
            enabled: self.enabled,
            auto_disabled: self.auto_disabled,
            auto_disable_reason: self.auto_disable_reason.clone(),
            quarantined: self.quarantined,
            connection_state: self.connection.state,
            tool_count: self.connection.tool_count,
        }
    }
}

//! Failure policy: auto-disable, recovery, quarantine and manual toggles.

use super::persistence::{CoordinatorError, Mutation, PersistenceCoordinator, PersistenceFailure};
use crate::config::OrchestratorSettings;
use crate::events::{ConfigAction, Event, EventBus, EventPayload, Subscription};
use crate::upstream::{
    domain::{
        ConnectionState, ConnectionStatus, GroupName, ManualToggle, ServerName, ServerStatusView,
        UpstreamServer, auto_disable_reason,
    },
    ports::{ConfigStore, ConnectionRegistry, ServerStore},
};
use chrono::{DateTime, TimeDelta, Utc};
use mockable::Clock;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Errors returned by the failure policy.
#[derive(Debug, Clone, Error)]
pub enum PolicyError {
    /// The server could not be read or written.
    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),
}

/// Result type for policy operations.
pub type PolicyResult<T> = Result<T, PolicyError>;

/// Outcome of evaluating one server against its failure threshold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDecision {
    /// The server's threshold is `0`.
    AutoDisableOff,
    /// Not enough consecutive failures yet.
    BelowThreshold {
        /// Consecutive failures observed.
        failures: u32,
        /// Threshold in force.
        threshold: u32,
    },
    /// The threshold was reached inside the startup grace period.
    DeferredByGracePeriod {
        /// Consecutive failures observed.
        failures: u32,
        /// Threshold in force.
        threshold: u32,
    },
    /// The server is already auto-disabled.
    AlreadyAutoDisabled,
    /// The server is disabled or quarantined, so there is nothing to protect.
    NotEnabled,
    /// The server was auto-disabled.
    ThresholdExceeded {
        /// Consecutive failures observed.
        failures: u32,
        /// Threshold in force.
        threshold: u32,
        /// Reason recorded on the server.
        reason: String,
    },
}

/// Outcome of a successful-reconnection signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// Auto-disable was lifted and the server enabled again.
    Recovered,
    /// The server is quarantined and stays disabled.
    BlockedByQuarantine,
    /// The server was not auto-disabled.
    NotAutoDisabled,
}

/// Per-server result of a manual enable or disable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToggleOutcome {
    /// Resulting state of the server.
    pub server: ServerStatusView,
    /// Whether an enable was refused because the server is quarantined.
    pub blocked_by_quarantine: bool,
    /// Stores that could not be written.
    pub failures: Vec<PersistenceFailure>,
}

/// Decides whether a server with `status` must be auto-disabled at `now`.
///
/// Within `grace` of the first connection attempt the threshold is doubled.
#[must_use]
pub fn decide(
    server: &UpstreamServer,
    status: &ConnectionStatus,
    default_threshold: u32,
    grace: Option<Duration>,
    now: DateTime<Utc>,
) -> PolicyDecision {
    if server.auto_disabled() {
        return PolicyDecision::AlreadyAutoDisabled;
    }
    if !server.enabled() {
        return PolicyDecision::NotEnabled;
    }

    let threshold = server.effective_threshold(default_threshold);
    let failures = status.consecutive_failures;
    if threshold == 0 {
        return PolicyDecision::AutoDisableOff;
    }
    if failures < threshold {
        return PolicyDecision::BelowThreshold {
            failures,
            threshold,
        };
    }

    let in_grace = match (grace, status.first_attempt_at) {
        (Some(window), Some(first)) => TimeDelta::from_std(window)
            .is_ok_and(|limit| now.signed_duration_since(first) < limit),
        _ => false,
    };
    if in_grace && failures < threshold.saturating_mul(2) {
        return PolicyDecision::DeferredByGracePeriod {
            failures,
            threshold,
        };
    }

    PolicyDecision::ThresholdExceeded {
        failures,
        threshold,
        reason: auto_disable_reason(failures, status.last_error.as_deref()),
    }
}

/// Reacts to connection failures and recoveries, and applies manual
/// enable, disable and quarantine requests.
///
/// Every change goes through the [`PersistenceCoordinator`] and is announced
/// with a `ConfigChange` event. Manual toggles always clear auto-disable.
/// Nothing this policy does on its own ever enables a quarantined server.
pub struct AutoDisablePolicy<D, F, L, C>
where
    D: ServerStore,
    F: ConfigStore,
    L: ConnectionRegistry,
    C: Clock + Send + Sync,
{
    coordinator: Arc<PersistenceCoordinator<D, F, L>>,
    bus: EventBus,
    clock: Arc<C>,
    settings: OrchestratorSettings,
}

impl<D, F, L, C> AutoDisablePolicy<D, F, L, C>
where
    D: ServerStore,
    F: ConfigStore,
    L: ConnectionRegistry,
    C: Clock + Send + Sync,
{
    /// Creates a policy writing through `coordinator`.
    #[must_use]
    pub const fn new(
        coordinator: Arc<PersistenceCoordinator<D, F, L>>,
        bus: EventBus,
        clock: Arc<C>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            coordinator,
            bus,
            clock,
            settings,
        }
    }

    /// Checks a server's failure count and auto-disables it once the
    /// threshold is reached.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::Coordinator`] when the server is unknown or
    /// its record cannot be read.
    pub async fn evaluate(&self, name: &ServerName) -> PolicyResult<PolicyDecision> {
        let status = self
            .coordinator
            .runtime()
            .get(name)
            .map_err(CoordinatorError::from)?
            .map(|live| live.connection().clone())
            .unwrap_or_default();
        let default_threshold = self.settings.default_auto_disable_threshold;
        let grace = self.settings.startup_grace_period();
        let now = self.clock.utc();

        let (report, decision) = self
            .coordinator
            .update(name, |server| {
                let decision = decide(server, &status, default_threshold, grace, now);
                if let PolicyDecision::ThresholdExceeded { reason, .. } = &decision {
                    server.mark_auto_disabled(reason.clone());
                    Mutation::Apply(decision)
                } else {
                    Mutation::Skip(decision)
                }
            })
            .await?;

        if let (Some(written), PolicyDecision::ThresholdExceeded { reason, .. }) =
            (report, &decision)
        {
            tracing::warn!(
                server = %name,
                reason = %reason,
                incomplete = !written.is_complete(),
                "upstream server auto-disabled"
            );
            self.announce(name, ConfigAction::AutoDisabled);
        }
        Ok(decision)
    }

    /// Lifts auto-disable after a successful reconnection, unless the
    /// server is quarantined.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::Coordinator`] when the server is unknown.
    pub async fn on_connection_recovered(
        &self,
        name: &ServerName,
    ) -> PolicyResult<RecoveryOutcome> {
        let (_, outcome) = self
            .coordinator
            .update(name, |server| {
                if !server.auto_disabled() {
                    Mutation::Skip(RecoveryOutcome::NotAutoDisabled)
                } else if server.recover_from_auto_disable() {
                    Mutation::Apply(RecoveryOutcome::Recovered)
                } else {
                    Mutation::Skip(RecoveryOutcome::BlockedByQuarantine)
                }
            })
            .await?;

        match outcome {
            RecoveryOutcome::Recovered => {
                tracing::info!(server = %name, "upstream server recovered from auto-disable");
                self.announce(name, ConfigAction::Recovered);
            }
            RecoveryOutcome::BlockedByQuarantine => {
                tracing::info!(server = %name, "quarantine blocks automatic re-enable");
            }
            RecoveryOutcome::NotAutoDisabled => {}
        }
        Ok(outcome)
    }

    /// Enables or disables one server on behalf of a user.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::Coordinator`] when the server is unknown.
    pub async fn set_enabled(
        &self,
        name: &ServerName,
        enabled: bool,
    ) -> PolicyResult<ToggleOutcome> {
        let (report, toggle) = self
            .coordinator
            .modify(name, |server| server.apply_manual_toggle(enabled))
            .await?;

        let blocked_by_quarantine = toggle == ManualToggle::BlockedByQuarantine;
        if blocked_by_quarantine {
            tracing::info!(server = %name, "quarantine blocks manual enable");
        }
        self.announce(name, ConfigAction::for_toggle(report.server.enabled()));
        Ok(ToggleOutcome {
            server: report.server.status_view(),
            blocked_by_quarantine,
            failures: report.failures,
        })
    }

    /// Enables or disables every member of `group`.
    ///
    /// Members are toggled in name order. A member that disappears while
    /// the group is processed is skipped.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::Coordinator`] when the server list cannot be
    /// read.
    pub async fn toggle_group(
        &self,
        group: &GroupName,
        enabled: bool,
    ) -> PolicyResult<Vec<ToggleOutcome>> {
        let members: Vec<ServerName> = self
            .coordinator
            .list()
            .await?
            .into_iter()
            .filter(|server| server.is_member_of(group))
            .map(|server| server.name().clone())
            .collect();

        let mut outcomes = Vec::with_capacity(members.len());
        for name in &members {
            match self.set_enabled(name, enabled).await {
                Ok(outcome) => outcomes.push(outcome),
                Err(PolicyError::Coordinator(CoordinatorError::NotFound(_))) => {
                    tracing::debug!(server = %name, group = %group, "group member vanished");
                }
                Err(err) => return Err(err),
            }
        }
        tracing::info!(group = %group, enabled, servers = outcomes.len(), "group toggled");
        Ok(outcomes)
    }

    /// Sets or clears quarantine on one server.
    ///
    /// Quarantining disables the server. Lifting quarantine leaves it
    /// disabled until it is enabled explicitly.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::Coordinator`] when the server is unknown.
    pub async fn set_quarantined(
        &self,
        name: &ServerName,
        quarantined: bool,
    ) -> PolicyResult<ServerStatusView> {
        let (report, view) = self
            .coordinator
            .update(name, |server| {
                if server.quarantined() == quarantined {
                    Mutation::Skip(server.status_view())
                } else {
                    server.set_quarantined(quarantined);
                    Mutation::Apply(server.status_view())
                }
            })
            .await?;

        let Some(written) = report else {
            return Ok(self.live_view(name).unwrap_or(view));
        };
        let action = if quarantined {
            tracing::info!(server = %name, "upstream server quarantined");
            ConfigAction::Quarantined
        } else {
            tracing::info!(server = %name, "upstream server released from quarantine");
            ConfigAction::Unquarantined
        };
        self.announce(name, action);
        Ok(written.server.status_view())
    }

    /// Consumes `StateChange` events until `cancel` fires or the bus
    /// closes, evaluating failures and recoveries as they arrive.
    pub async fn run(&self, mut states: Subscription, cancel: CancellationToken) {
        loop {
            let received = tokio::select! {
                () = cancel.cancelled() => break,
                received = states.recv() => received,
            };
            let Some(event) = received else {
                break;
            };
            self.handle(&event).await;
        }
        tracing::debug!("failure policy stopped");
    }

    async fn handle(&self, event: &Event) {
        let EventPayload::StateChange { new, .. } = *event.payload() else {
            return;
        };
        let name = event.server_name();
        let result = match new {
            ConnectionState::Error => self.evaluate(name).await.map(drop),
            ConnectionState::Ready => self.on_connection_recovered(name).await.map(drop),
            _ => Ok(()),
        };
        if let Err(err) = result {
            tracing::warn!(server = %name, error = %err, "failure policy skipped event");
        }
    }

    fn live_view(&self, name: &ServerName) -> Option<ServerStatusView> {
        self.coordinator.runtime().status_view(name).ok().flatten()
    }

    fn announce(&self, name: &ServerName, action: ConfigAction) {
        self.bus
            .publish(Event::config_change(name.clone(), action, &*self.clock));
    }
}

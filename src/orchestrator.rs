//! Facade wiring every orchestration component together.
//!
//! An [`Orchestrator`] owns one event bus, one connection supervisor, one
//! persistence coordinator, the failure policy and the synchronization
//! manager. Nothing is global: every component receives what it needs when
//! the orchestrator is started.

use crate::config::OrchestratorSettings;
use crate::events::{ConfigAction, Event, EventBus, EventKind, Subscription};
use crate::sync::{StatusView, SyncHandle, SyncStats, SynchronizationManager};
use crate::upstream::{
    adapters::memory::RuntimeRegistry,
    domain::{GroupName, ServerName, ServerStatusView, UpstreamServer},
    ports::{ConfigStore, ServerStore, ServerStoreError, UpstreamConnector},
    services::{
        ApplyReport, AutoDisablePolicy, ConnectOutcome, ConnectionSupervisor, CoordinatorError,
        PersistenceCoordinator, PolicyDecision, PolicyError, ReconcileReport, RemovalReport,
        ToggleOutcome,
    },
};
use mockable::Clock;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Errors returned by the orchestrator.
#[derive(Debug, Clone, Error)]
pub enum OrchestratorError {
    /// A coordinated write or lookup failed.
    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),

    /// The failure policy rejected a request.
    #[error(transparent)]
    Policy(#[from] PolicyError),

    /// A store could not be read.
    #[error(transparent)]
    Store(#[from] ServerStoreError),
}

/// Result type for orchestrator operations.
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// Collaborators handed to [`Orchestrator::start`].
pub struct OrchestratorParts<D, F, K, V, C> {
    /// Durable server store.
    pub durable: Arc<D>,
    /// Declarative configuration file.
    pub config: Arc<F>,
    /// Transport used to reach upstream servers.
    pub connector: Arc<K>,
    /// User-facing status view.
    pub view: Arc<V>,
    /// Wall clock used for event and connection timestamps.
    pub clock: Arc<C>,
    /// Settings to use instead of those in the configuration document.
    pub settings: Option<OrchestratorSettings>,
}

type Coordinator<D, F, K, C> = PersistenceCoordinator<D, F, ConnectionSupervisor<K, C>>;
type Policy<D, F, K, C> = AutoDisablePolicy<D, F, ConnectionSupervisor<K, C>, C>;

/// Running upstream orchestration core.
pub struct Orchestrator<D, F, K, C>
where
    D: ServerStore + 'static,
    F: ConfigStore + 'static,
    K: UpstreamConnector + 'static,
    C: Clock + Send + Sync + 'static,
{
    settings: OrchestratorSettings,
    bus: EventBus,
    clock: Arc<C>,
    runtime: RuntimeRegistry,
    supervisor: Arc<ConnectionSupervisor<K, C>>,
    coordinator: Arc<Coordinator<D, F, K, C>>,
    policy: Arc<Policy<D, F, K, C>>,
    policy_task: JoinHandle<()>,
    sync: SyncHandle,
    cancel: CancellationToken,
}

impl<D, F, K, C> Orchestrator<D, F, K, C>
where
    D: ServerStore + 'static,
    F: ConfigStore + 'static,
    K: UpstreamConnector + 'static,
    C: Clock + Send + Sync + 'static,
{
    /// Starts every component, reconciles the stores and connects every
    /// enabled server.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Store`] when settings are not supplied
    /// and the configuration document cannot be read, and
    /// [`OrchestratorError::Coordinator`] when the durable store cannot be
    /// listed.
    pub async fn start<V>(parts: OrchestratorParts<D, F, K, V, C>) -> OrchestratorResult<Self>
    where
        V: StatusView + 'static,
    {
        let OrchestratorParts {
            durable,
            config,
            connector,
            view,
            clock,
            settings: requested,
        } = parts;
        let settings = match requested {
            Some(explicit) => explicit,
            None => config.load().await?.settings,
        };

        let bus = EventBus::new(settings.subscription_capacity);
        let runtime = RuntimeRegistry::new();
        let supervisor = Arc::new(ConnectionSupervisor::new(
            connector,
            bus.clone(),
            runtime.clone(),
            Arc::clone(&clock),
            settings.clone(),
        ));
        let coordinator = Arc::new(PersistenceCoordinator::new(
            durable,
            config,
            runtime.clone(),
            Arc::clone(&supervisor),
        ));
        let policy = Arc::new(AutoDisablePolicy::new(
            Arc::clone(&coordinator),
            bus.clone(),
            Arc::clone(&clock),
            settings.clone(),
        ));

        let sync = SynchronizationManager::new(runtime.clone(), view, &settings).spawn(&bus);
        let cancel = CancellationToken::new();
        let policy_task = {
            let states = bus.subscribe(EventKind::StateChange);
            let running = Arc::clone(&policy);
            let token = cancel.clone();
            tokio::spawn(async move { running.run(states, token).await })
        };

        let orchestrator = Self {
            settings,
            bus,
            clock,
            runtime,
            supervisor,
            coordinator,
            policy,
            policy_task,
            sync,
            cancel,
        };

        let report = orchestrator.coordinator.reconcile().await?;
        for name in &report.servers {
            orchestrator.announce(name, ConfigAction::Reconciled);
        }
        tracing::info!(
            servers = report.servers.len(),
            repaired = report.repaired_anything(),
            "upstream orchestration started"
        );
        Ok(orchestrator)
    }

    /// Returns the settings in force.
    #[must_use]
    pub const fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Returns the event bus shared by every component.
    #[must_use]
    pub const fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Subscribes to one kind of event.
    #[must_use]
    pub fn subscribe(&self, kind: EventKind) -> Subscription {
        self.bus.subscribe(kind)
    }

    /// Returns the synchronization manager's counters.
    #[must_use]
    pub fn sync_stats(&self) -> SyncStats {
        self.sync.stats()
    }

    /// Returns the current status of one server.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Store`] when the runtime registry cannot
    /// be read.
    pub fn status(&self, name: &ServerName) -> OrchestratorResult<Option<ServerStatusView>> {
        Ok(self.runtime.status_view(name)?)
    }

    /// Returns the current status of every server ordered by name.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Store`] when the runtime registry cannot
    /// be read.
    pub fn statuses(&self) -> OrchestratorResult<Vec<ServerStatusView>> {
        Ok(self.runtime.status_views()?)
    }

    /// Returns the authoritative record of one server.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Coordinator`] when the server is
    /// unknown.
    pub async fn server(&self, name: &ServerName) -> OrchestratorResult<UpstreamServer> {
        Ok(self.coordinator.current(name).await?)
    }

    /// Adds a server and connects it when enabled.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Coordinator`] when the server already
    /// exists.
    pub async fn add_server(&self, server: UpstreamServer) -> OrchestratorResult<ApplyReport> {
        let report = self.coordinator.insert(server).await?;
        self.announce(report.server.name(), ConfigAction::Added);
        Ok(report)
    }

    /// Removes a server from every store and stops its connection.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Coordinator`] when the server is
    /// unknown.
    pub async fn remove_server(&self, name: &ServerName) -> OrchestratorResult<RemovalReport> {
        let report = self.coordinator.remove(name).await?;
        self.announce(name, ConfigAction::Removed);
        Ok(report)
    }

    /// Enables or disables one server, clearing any auto-disable.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Policy`] when the server is unknown.
    pub async fn set_enabled(
        &self,
        name: &ServerName,
        enabled: bool,
    ) -> OrchestratorResult<ToggleOutcome> {
        Ok(self.policy.set_enabled(name, enabled).await?)
    }

    /// Enables or disables every member of a group, clearing any
    /// auto-disable.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Policy`] when the servers cannot be
    /// listed.
    pub async fn toggle_group(
        &self,
        group: &GroupName,
        enabled: bool,
    ) -> OrchestratorResult<Vec<ToggleOutcome>> {
        Ok(self.policy.toggle_group(group, enabled).await?)
    }

    /// Sets or clears quarantine on one server.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Policy`] when the server is unknown.
    pub async fn set_quarantined(
        &self,
        name: &ServerName,
        quarantined: bool,
    ) -> OrchestratorResult<ServerStatusView> {
        Ok(self.policy.set_quarantined(name, quarantined).await?)
    }

    /// Runs a connection attempt for a connected server immediately.
    ///
    /// Returns `None` when the server holds no connection.
    pub async fn reconnect(&self, name: &ServerName) -> Option<ConnectOutcome> {
        self.supervisor.reconnect(name).await
    }

    /// Reports a transport failure on a server's live connection and
    /// checks the failure threshold straight away.
    ///
    /// A failure on a connection already in `error` publishes no state
    /// change, so the threshold is evaluated here rather than left to the
    /// event loop. Returns `None` when the server holds no connection.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Policy`] when the server's record cannot
    /// be read or written.
    pub async fn report_failure(
        &self,
        name: &ServerName,
        message: &str,
    ) -> OrchestratorResult<Option<PolicyDecision>> {
        if !self.supervisor.report_failure(name, message).await {
            return Ok(None);
        }
        Ok(Some(self.policy.evaluate(name).await?))
    }

    /// Repairs drift between the stores, treating the durable store as
    /// authoritative.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Coordinator`] when the durable store
    /// cannot be listed.
    pub async fn reconcile(&self) -> OrchestratorResult<ReconcileReport> {
        let report = self.coordinator.reconcile().await?;
        let touched = report
            .adopted
            .iter()
            .chain(&report.restored_to_config)
            .chain(&report.config_repaired)
            .chain(&report.invariant_repaired)
            .chain(&report.runtime_dropped);
        for name in touched {
            self.announce(name, ConfigAction::Reconciled);
        }
        Ok(report)
    }

    /// Stops every component.
    ///
    /// The failure policy stops first, connections are then disconnected,
    /// the status view gets one final flush and the bus is closed.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(err) = self.policy_task.await {
            tracing::error!(error = %err, "failure policy task ended abnormally");
        }
        self.supervisor.shutdown().await;
        self.sync.shutdown().await;
        self.bus.close();
        tracing::info!("upstream orchestration stopped");
    }

    fn announce(&self, name: &ServerName, action: ConfigAction) {
        self.bus
            .publish(Event::config_change(name.clone(), action, &*self.clock));
    }
}

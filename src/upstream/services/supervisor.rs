//! Live connection registry running one retry task per enabled server.

use super::{ConnectOutcome, ConnectionStateMachine};
use crate::config::OrchestratorSettings;
use crate::events::EventBus;
use crate::upstream::{
    adapters::memory::RuntimeRegistry,
    domain::{ServerName, UpstreamServer},
    ports::{
        ConnectionRegistry, ConnectionRegistryError, ConnectionRegistryResult, UpstreamConnector,
    },
};
use async_trait::async_trait;
use mockable::Clock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct ManagedConnection<K, C>
where
    K: UpstreamConnector,
    C: Clock + Send + Sync,
{
    machine: Arc<ConnectionStateMachine<K, C>>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Owns the connection state machines of every registered server and the
/// tasks that drive them.
///
/// Each registered server gets an independent task that connects, waits
/// for failures and retries with exponential backoff. With automatic
/// reconnection turned off the task connects once and further attempts
/// need [`reconnect`](Self::reconnect). Deregistering cancels the task,
/// which disconnects before it ends.
pub struct ConnectionSupervisor<K, C>
where
    K: UpstreamConnector + 'static,
    C: Clock + Send + Sync + 'static,
{
    connector: Arc<K>,
    bus: EventBus,
    runtime: RuntimeRegistry,
    clock: Arc<C>,
    settings: OrchestratorSettings,
    connections: Mutex<HashMap<ServerName, ManagedConnection<K, C>>>,
    shutdown: CancellationToken,
}

impl<K, C> ConnectionSupervisor<K, C>
where
    K: UpstreamConnector + 'static,
    C: Clock + Send + Sync + 'static,
{
    /// Creates a supervisor with no registered connections.
    #[must_use]
    pub fn new(
        connector: Arc<K>,
        bus: EventBus,
        runtime: RuntimeRegistry,
        clock: Arc<C>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            connector,
            bus,
            runtime,
            clock,
            settings,
            connections: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Returns the state machine of a registered server.
    pub async fn machine(&self, name: &ServerName) -> Option<Arc<ConnectionStateMachine<K, C>>> {
        self.connections
            .lock()
            .await
            .get(name)
            .map(|managed| Arc::clone(&managed.machine))
    }

    /// Returns the names of every registered server, sorted.
    pub async fn registered(&self) -> Vec<ServerName> {
        let mut names: Vec<_> = self.connections.lock().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Runs a connection attempt for a registered server immediately.
    ///
    /// Returns `None` when the server is not registered.
    pub async fn reconnect(&self, name: &ServerName) -> Option<ConnectOutcome> {
        let machine = self.machine(name).await?;
        Some(machine.connect().await)
    }

    /// Reports a transport failure on a registered server's connection.
    ///
    /// Returns whether the server was registered.
    pub async fn report_failure(&self, name: &ServerName, message: &str) -> bool {
        let Some(machine) = self.machine(name).await else {
            return false;
        };
        machine.record_error(message);
        true
    }

    /// Stops every connection and refuses further registrations.
    ///
    /// Each connection task is asked to disconnect and awaited.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let drained: Vec<_> = self.connections.lock().await.drain().collect();
        for (name, managed) in drained {
            stop_connection(&name, managed).await;
        }
    }
}

async fn stop_connection<K, C>(name: &ServerName, managed: ManagedConnection<K, C>)
where
    K: UpstreamConnector,
    C: Clock + Send + Sync,
{
    managed.cancel.cancel();
    if let Err(err) = managed.task.await {
        tracing::error!(server = %name, error = %err, "connection task ended abnormally");
        managed.machine.disconnect().await;
    }
}

async fn run_connection<K, C>(
    machine: Arc<ConnectionStateMachine<K, C>>,
    settings: OrchestratorSettings,
    cancel: CancellationToken,
) where
    K: UpstreamConnector,
    C: Clock + Send + Sync,
{
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = machine.connect() => {}
        }

        if !settings.auto_reconnect {
            cancel.cancelled().await;
            break;
        }

        if machine.state().is_error() {
            let delay = settings.retry_delay(machine.consecutive_failures());
            tracing::debug!(
                server = %machine.name(),
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "scheduling reconnection"
            );
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        } else {
            tokio::select! {
                () = cancel.cancelled() => break,
                () = machine.failure_reported() => {}
            }
        }
    }

    machine.disconnect().await;
}

#[async_trait]
impl<K, C> ConnectionRegistry for ConnectionSupervisor<K, C>
where
    K: UpstreamConnector + 'static,
    C: Clock + Send + Sync + 'static,
{
    async fn register(&self, server: &UpstreamServer) -> ConnectionRegistryResult<()> {
        let mut connections = self.connections.lock().await;
        if self.shutdown.is_cancelled() {
            return Err(ConnectionRegistryError::ShutDown);
        }
        if connections.contains_key(server.name()) {
            return Ok(());
        }

        let machine = Arc::new(ConnectionStateMachine::new(
            server.name().clone(),
            Arc::clone(&self.connector),
            self.bus.clone(),
            self.runtime.clone(),
            Arc::clone(&self.clock),
        ));
        let cancel = self.shutdown.child_token();
        let task = tokio::spawn(run_connection(
            Arc::clone(&machine),
            self.settings.clone(),
            cancel.clone(),
        ));
        tracing::debug!(server = %server.name(), "connection registered");
        connections.insert(
            server.name().clone(),
            ManagedConnection {
                machine,
                cancel,
                task,
            },
        );
        Ok(())
    }

    async fn deregister(&self, name: &ServerName) -> ConnectionRegistryResult<()> {
        let removed = self.connections.lock().await.remove(name);
        if let Some(managed) = removed {
            stop_connection(name, managed).await;
            tracing::debug!(server = %name, "connection deregistered");
        }
        Ok(())
    }
}

//! Per-server connection state machine.

use crate::events::{Event, EventBus};
use crate::upstream::{
    adapters::memory::RuntimeRegistry,
    domain::{ConnectionState, ConnectionStatus, ServerName},
    ports::{ConnectorError, UpstreamConnector},
};
use mockable::Clock;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

/// Result of one [`ConnectionStateMachine::connect`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// The connection reached `ready`.
    Ready {
        /// Tools discovered.
        tool_count: usize,
    },
    /// The attempt failed and the machine is in `error`.
    Failed(ConnectorError),
    /// Another attempt is in progress or the connection is already ready.
    AlreadyActive,
    /// The machine was disconnected while the attempt was running.
    Superseded,
}

#[derive(Debug, Default)]
struct MachineState {
    status: ConnectionStatus,
    generation: u64,
}

/// Owns the connection lifecycle of one upstream server.
///
/// Every change of state publishes exactly one `StateChange` event and is
/// mirrored into the runtime registry. Only one connection attempt runs at
/// a time; a [`disconnect`](Self::disconnect) abandons the running attempt.
pub struct ConnectionStateMachine<K, C>
where
    K: UpstreamConnector,
    C: Clock + Send + Sync,
{
    name: ServerName,
    connector: Arc<K>,
    bus: EventBus,
    runtime: RuntimeRegistry,
    clock: Arc<C>,
    state: Mutex<MachineState>,
    failures: Notify,
}

impl<K, C> ConnectionStateMachine<K, C>
where
    K: UpstreamConnector,
    C: Clock + Send + Sync,
{
    /// Creates a disconnected machine for `name`.
    #[must_use]
    pub fn new(
        name: ServerName,
        connector: Arc<K>,
        bus: EventBus,
        runtime: RuntimeRegistry,
        clock: Arc<C>,
    ) -> Self {
        Self {
            name,
            connector,
            bus,
            runtime,
            clock,
            state: Mutex::new(MachineState::default()),
            failures: Notify::new(),
        }
    }

    /// Returns the server this machine connects to.
    #[must_use]
    pub const fn name(&self) -> &ServerName {
        &self.name
    }

    /// Returns a snapshot of the connection status.
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.lock().status.clone()
    }

    /// Returns the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.lock().status.state
    }

    /// Returns failures since the last successful connection.
    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        self.lock().status.consecutive_failures
    }

    /// Runs one connection attempt through every stage.
    ///
    /// Calling this while an attempt is running or the connection is ready
    /// does nothing and returns [`ConnectOutcome::AlreadyActive`].
    pub async fn connect(&self) -> ConnectOutcome {
        let Some(generation) = self.begin_attempt() else {
            return ConnectOutcome::AlreadyActive;
        };

        match self.drive_attempt(generation).await {
            Ok(tool_count) => {
                if self.complete_attempt(generation, tool_count) {
                    ConnectOutcome::Ready { tool_count }
                } else {
                    ConnectOutcome::Superseded
                }
            }
            Err(err) => {
                let mut state = self.lock();
                if state.generation != generation {
                    return ConnectOutcome::Superseded;
                }
                self.record_failure(&mut state, &err.to_string());
                drop(state);
                ConnectOutcome::Failed(err)
            }
        }
    }

    /// Records a failure reported outside a connection attempt, such as a
    /// transport dropping a ready connection.
    pub fn record_error(&self, message: &str) {
        let mut state = self.lock();
        self.record_failure(&mut state, message);
        drop(state);
        self.failures.notify_one();
    }

    /// Moves to `disconnected`, abandoning any running attempt, and closes
    /// the transport connection.
    pub async fn disconnect(&self) {
        {
            let mut state = self.lock();
            state.generation = state.generation.wrapping_add(1);
            self.transition(&mut state, ConnectionState::Disconnected);
        }

        if let Err(err) = self.connector.disconnect(&self.name).await {
            tracing::warn!(server = %self.name, error = %err, "upstream disconnect failed");
        }
    }

    /// Waits until [`record_error`](Self::record_error) reports a failure.
    pub async fn failure_reported(&self) {
        self.failures.notified().await;
    }

    fn begin_attempt(&self) -> Option<u64> {
        let mut state = self.lock();
        if state.status.state.is_active() {
            return None;
        }

        let now = self.clock.utc();
        state.status.first_attempt_at.get_or_insert(now);
        self.transition(&mut state, ConnectionState::Connecting);
        Some(state.generation)
    }

    async fn drive_attempt(&self, generation: u64) -> Result<usize, ConnectorError> {
        self.connector.connect(&self.name).await?;
        self.advance(generation, ConnectionState::Authenticating)?;
        self.connector.authenticate(&self.name).await?;
        self.advance(generation, ConnectionState::Discovering)?;
        self.connector.discover_tools(&self.name).await
    }

    fn advance(&self, generation: u64, target: ConnectionState) -> Result<(), ConnectorError> {
        let mut state = self.lock();
        if state.generation != generation {
            return Err(ConnectorError::Cancelled);
        }
        self.transition(&mut state, target);
        Ok(())
    }

    fn complete_attempt(&self, generation: u64, tool_count: usize) -> bool {
        let mut state = self.lock();
        if state.generation != generation {
            return false;
        }

        state.status.consecutive_failures = 0;
        state.status.tool_count = tool_count;
        state.status.last_error = None;
        state.status.last_connected_at = Some(self.clock.utc());
        self.transition(&mut state, ConnectionState::Ready);
        self.bus
            .publish(Event::tools_updated(self.name.clone(), tool_count, &*self.clock));
        tracing::info!(server = %self.name, tool_count, "upstream connection ready");
        true
    }

    fn record_failure(&self, state: &mut MachineState, message: &str) {
        state.status.consecutive_failures = state.status.consecutive_failures.saturating_add(1);
        state.status.retry_count = state.status.retry_count.saturating_add(1);
        state.status.last_error = Some(message.to_owned());
        tracing::warn!(
            server = %self.name,
            consecutive_failures = state.status.consecutive_failures,
            error = message,
            "upstream connection failed"
        );
        if !self.transition(state, ConnectionState::Error) {
            self.mirror(state);
        }
    }

    /// Applies a state change, publishing and mirroring it. Returns whether
    /// the state actually changed.
    fn transition(&self, state: &mut MachineState, target: ConnectionState) -> bool {
        let previous = state.status.state;
        if previous == target {
            return false;
        }
        if !previous.can_transition_to(target) {
            tracing::warn!(
                server = %self.name,
                from = %previous,
                to = %target,
                "unexpected connection state transition"
            );
        }

        state.status.state = target;
        self.mirror(state);
        self.bus.publish(Event::state_change(
            self.name.clone(),
            previous,
            target,
            &*self.clock,
        ));
        true
    }

    fn mirror(&self, state: &MachineState) {
        if let Err(err) = self
            .runtime
            .update_connection(&self.name, state.status.clone())
        {
            tracing::error!(server = %self.name, error = %err, "runtime registry update failed");
        }
    }

    fn lock(&self) -> MutexGuard<'_, MachineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

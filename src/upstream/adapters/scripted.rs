//! In-memory connector with scripted per-server outcomes.

use crate::upstream::{
    domain::ServerName,
    ports::{ConnectorError, ConnectorResult, UpstreamConnector},
};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Outcome of one scripted connection attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedAttempt {
    /// Every stage succeeds and `tool_count` tools are discovered.
    Succeed {
        /// Tools reported by discovery.
        tool_count: usize,
    },
    /// Like `Succeed`, but the connect stage first waits for `delay`.
    SucceedAfter {
        /// Time spent in the connect stage.
        delay: Duration,
        /// Tools reported by discovery.
        tool_count: usize,
    },
    /// The connect stage fails with the message.
    FailConnect(String),
    /// The authenticate stage fails with the message.
    FailAuthenticate(String),
    /// The discovery stage fails with the message.
    FailDiscover(String),
}

/// Connector adapter that replays scripted outcomes without any network
/// access.
///
/// Servers with no remaining script succeed with the default tool count.
#[derive(Debug, Clone, Default)]
pub struct ScriptedConnector {
    state: Arc<RwLock<ScriptedState>>,
}

#[derive(Debug, Default)]
struct ScriptedState {
    default_tool_count: usize,
    scripts: HashMap<ServerName, VecDeque<ScriptedAttempt>>,
    in_flight: HashMap<ServerName, ScriptedAttempt>,
    connect_calls: HashMap<ServerName, usize>,
    disconnect_calls: HashMap<ServerName, usize>,
}

fn unavailable(err: impl std::fmt::Display) -> ConnectorError {
    ConnectorError::Connect(format!("scripted connector state unavailable: {err}"))
}

impl ScriptedConnector {
    /// Creates a connector whose unscripted attempts succeed with no tools.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a connector whose unscripted attempts discover
    /// `tool_count` tools.
    #[must_use]
    pub fn with_default_tool_count(tool_count: usize) -> Self {
        Self {
            state: Arc::new(RwLock::new(ScriptedState {
                default_tool_count: tool_count,
                ..ScriptedState::default()
            })),
        }
    }

    /// Appends attempts to the script for `server`.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::Connect`] when the internal lock is
    /// poisoned.
    pub fn script(
        &self,
        server: &ServerName,
        attempts: impl IntoIterator<Item = ScriptedAttempt>,
    ) -> ConnectorResult<()> {
        let mut state = self.state.write().map_err(unavailable)?;
        state
            .scripts
            .entry(server.clone())
            .or_default()
            .extend(attempts);
        Ok(())
    }

    /// Returns how many connection attempts were started for `server`.
    #[must_use]
    pub fn connect_calls(&self, server: &ServerName) -> usize {
        self.state
            .read()
            .map_or(0, |state| state.connect_calls.get(server).copied().unwrap_or(0))
    }

    /// Returns how many times `server` was disconnected.
    #[must_use]
    pub fn disconnect_calls(&self, server: &ServerName) -> usize {
        self.state
            .read()
            .map_or(0, |state| state.disconnect_calls.get(server).copied().unwrap_or(0))
    }

    fn current_attempt(&self, server: &ServerName) -> ConnectorResult<ScriptedAttempt> {
        let state = self.state.read().map_err(unavailable)?;
        state
            .in_flight
            .get(server)
            .cloned()
            .ok_or_else(|| ConnectorError::Connect(format!("{server} is not connected")))
    }
}

#[async_trait]
impl UpstreamConnector for ScriptedConnector {
    async fn connect(&self, server: &ServerName) -> ConnectorResult<()> {
        let attempt = {
            let mut state = self.state.write().map_err(unavailable)?;
            *state.connect_calls.entry(server.clone()).or_default() += 1;
            let default_tool_count = state.default_tool_count;
            let next = state
                .scripts
                .get_mut(server)
                .and_then(VecDeque::pop_front)
                .unwrap_or(ScriptedAttempt::Succeed {
                    tool_count: default_tool_count,
                });
            state.in_flight.insert(server.clone(), next.clone());
            next
        };

        match attempt {
            ScriptedAttempt::SucceedAfter { delay, .. } => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
            ScriptedAttempt::FailConnect(message) => Err(ConnectorError::Connect(message)),
            _ => Ok(()),
        }
    }

    async fn authenticate(&self, server: &ServerName) -> ConnectorResult<()> {
        match self.current_attempt(server)? {
            ScriptedAttempt::FailAuthenticate(message) => {
                Err(ConnectorError::Authenticate(message))
            }
            _ => Ok(()),
        }
    }

    async fn discover_tools(&self, server: &ServerName) -> ConnectorResult<usize> {
        match self.current_attempt(server)? {
            ScriptedAttempt::Succeed { tool_count }
            | ScriptedAttempt::SucceedAfter { tool_count, .. } => Ok(tool_count),
            ScriptedAttempt::FailDiscover(message) => Err(ConnectorError::Discover(message)),
            ScriptedAttempt::FailConnect(message) | ScriptedAttempt::FailAuthenticate(message) => {
                Err(ConnectorError::Discover(message))
            }
        }
    }

    async fn disconnect(&self, server: &ServerName) -> ConnectorResult<()> {
        let mut state = self.state.write().map_err(unavailable)?;
        state.in_flight.remove(server);
        *state.disconnect_calls.entry(server.clone()).or_default() += 1;
        Ok(())
    }
}

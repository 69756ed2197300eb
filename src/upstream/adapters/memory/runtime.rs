//! In-memory runtime registry of server records and connection status.

use crate::upstream::{
    domain::{ConnectionStatus, ServerName, ServerStatusView, UpstreamServer},
    ports::{ServerStoreError, ServerStoreResult},
};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

/// Process-local view of every server, combining persisted settings with
/// live connection status.
///
/// Cloning yields another handle to the same registry.
#[derive(Debug, Clone, Default)]
pub struct RuntimeRegistry {
    state: Arc<RwLock<BTreeMap<ServerName, UpstreamServer>>>,
}

impl RuntimeRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `server`'s settings, keeping any connection status already
    /// recorded for it.
    ///
    /// # Errors
    ///
    /// Returns [`ServerStoreError::Persistence`] when the lock is poisoned.
    pub fn upsert_settings(&self, server: &UpstreamServer) -> ServerStoreResult<()> {
        let mut state = self.state.write().map_err(|err| {
            ServerStoreError::persistence(std::io::Error::other(err.to_string()))
        })?;
        let merged = state
            .get(server.name())
            .map_or_else(|| server.clone(), |current| current.with_settings_from(server));
        state.insert(server.name().clone(), merged);
        Ok(())
    }

    /// Replaces the whole registry with `servers`, keeping connection
    /// status for servers that remain.
    ///
    /// # Errors
    ///
    /// Returns [`ServerStoreError::Persistence`] when the lock is poisoned.
    pub fn replace_all(&self, servers: &[UpstreamServer]) -> ServerStoreResult<()> {
        let mut state = self.state.write().map_err(|err| {
            ServerStoreError::persistence(std::io::Error::other(err.to_string()))
        })?;
        let rebuilt = servers
            .iter()
            .map(|server| {
                let merged = state
                    .get(server.name())
                    .map_or_else(|| server.clone(), |current| current.with_settings_from(server));
                (server.name().clone(), merged)
            })
            .collect();
        *state = rebuilt;
        Ok(())
    }

    /// Records the connection status of a registered server.
    ///
    /// Returns `false` when the server is unknown.
    ///
    /// # Errors
    ///
    /// Returns [`ServerStoreError::Persistence`] when the lock is poisoned.
    pub fn update_connection(
        &self,
        name: &ServerName,
        connection: ConnectionStatus,
    ) -> ServerStoreResult<bool> {
        let mut state = self.state.write().map_err(|err| {
            ServerStoreError::persistence(std::io::Error::other(err.to_string()))
        })?;
        let Some(server) = state.get_mut(name) else {
            return Ok(false);
        };
        server.set_connection(connection);
        Ok(true)
    }

    /// Returns a copy of one server.
    ///
    /// # Errors
    ///
    /// Returns [`ServerStoreError::Persistence`] when the lock is poisoned.
    pub fn get(&self, name: &ServerName) -> ServerStoreResult<Option<UpstreamServer>> {
        let state = self.state.read().map_err(|err| {
            ServerStoreError::persistence(std::io::Error::other(err.to_string()))
        })?;
        Ok(state.get(name).cloned())
    }

    /// Returns copies of every server ordered by name.
    ///
    /// # Errors
    ///
    /// Returns [`ServerStoreError::Persistence`] when the lock is poisoned.
    pub fn list(&self) -> ServerStoreResult<Vec<UpstreamServer>> {
        let state = self.state.read().map_err(|err| {
            ServerStoreError::persistence(std::io::Error::other(err.to_string()))
        })?;
        Ok(state.values().cloned().collect())
    }

    /// Forgets a server, returning whether it was present.
    ///
    /// # Errors
    ///
    /// Returns [`ServerStoreError::Persistence`] when the lock is poisoned.
    pub fn remove(&self, name: &ServerName) -> ServerStoreResult<bool> {
        let mut state = self.state.write().map_err(|err| {
            ServerStoreError::persistence(std::io::Error::other(err.to_string()))
        })?;
        Ok(state.remove(name).is_some())
    }

    /// Returns the status view of one server.
    ///
    /// # Errors
    ///
    /// Returns [`ServerStoreError::Persistence`] when the lock is poisoned.
    pub fn status_view(&self, name: &ServerName) -> ServerStoreResult<Option<ServerStatusView>> {
        Ok(self.get(name)?.map(|server| server.status_view()))
    }

    /// Returns the status views of every server ordered by name.
    ///
    /// # Errors
    ///
    /// Returns [`ServerStoreError::Persistence`] when the lock is poisoned.
    pub fn status_views(&self) -> ServerStoreResult<Vec<ServerStatusView>> {
        Ok(self
            .list()?
            .iter()
            .map(UpstreamServer::status_view)
            .collect())
    }
}

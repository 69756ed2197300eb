//! Store ports for the durable server store and the declarative
//! configuration file.

use crate::config::OrchestratorSettings;
use crate::upstream::domain::{ServerName, UpstreamServer};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Result type for server store operations.
pub type ServerStoreResult<T> = Result<T, ServerStoreError>;

/// Durable keyed store of server records. Authoritative during
/// reconciliation.
#[async_trait]
pub trait ServerStore: Send + Sync {
    /// Finds a server record by name.
    async fn get(&self, name: &ServerName) -> ServerStoreResult<Option<UpstreamServer>>;

    /// Inserts or replaces a server record.
    async fn put(&self, server: &UpstreamServer) -> ServerStoreResult<()>;

    /// Deletes a server record, returning whether it existed.
    async fn remove(&self, name: &ServerName) -> ServerStoreResult<bool>;

    /// Returns every stored record.
    async fn list(&self) -> ServerStoreResult<Vec<UpstreamServer>>;
}

/// Declarative configuration document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigDocument {
    /// Orchestration tunables.
    pub settings: OrchestratorSettings,
    /// Server entries.
    pub servers: Vec<UpstreamServer>,
}

/// Declarative configuration file holding settings and server entries.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Reads the whole document. A missing file yields the default
    /// document.
    async fn load(&self) -> ServerStoreResult<ConfigDocument>;

    /// Inserts or replaces one server entry, keeping the others.
    async fn upsert_server(&self, server: &UpstreamServer) -> ServerStoreResult<()>;

    /// Removes one server entry, returning whether it existed.
    async fn remove_server(&self, name: &ServerName) -> ServerStoreResult<bool>;
}

/// Errors returned by store implementations.
#[derive(Debug, Clone, Error)]
pub enum ServerStoreError {
    /// The server was not found.
    #[error("upstream server not found: {0}")]
    NotFound(ServerName),

    /// Persisted data could not be reconstructed into domain types.
    #[error("invalid persisted upstream server data: {0}")]
    InvalidPersistedData(Arc<dyn std::error::Error + Send + Sync>),

    /// Persistence-layer failure.
    #[error("persistence error: {0}")]
    Persistence(Arc<dyn std::error::Error + Send + Sync>),
}

impl ServerStoreError {
    /// Wraps persisted-data decoding or validation failures.
    pub fn invalid_persisted_data(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::InvalidPersistedData(Arc::new(err))
    }

    /// Wraps a persistence-layer failure.
    pub fn persistence(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Persistence(Arc::new(err))
    }
}

//! Live connection registry port.

use crate::upstream::domain::{ServerName, UpstreamServer};
use async_trait::async_trait;
use thiserror::Error;

/// Result type for connection registry operations.
pub type ConnectionRegistryResult<T> = Result<T, ConnectionRegistryError>;

/// Holds the live connections of enabled servers.
#[async_trait]
pub trait ConnectionRegistry: Send + Sync {
    /// Ensures a connection is held for `server`. Registering a server that
    /// already has a connection keeps it.
    async fn register(&self, server: &UpstreamServer) -> ConnectionRegistryResult<()>;

    /// Stops and forgets the connection for `name`, if any.
    async fn deregister(&self, name: &ServerName) -> ConnectionRegistryResult<()>;
}

/// Errors returned by connection registries.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectionRegistryError {
    /// The registry is shutting down and accepts no new connections.
    #[error("connection registry is shut down")]
    ShutDown,
}

//! Connector port for the transport-level connection to an upstream.

use crate::upstream::domain::ServerName;
use async_trait::async_trait;
use thiserror::Error;

/// Result type for upstream connector operations.
pub type ConnectorResult<T> = Result<T, ConnectorError>;

/// Transport capability that connects to an upstream, authenticates and
/// lists its tools.
///
/// Implementations own their timeouts; every call must eventually return.
#[async_trait]
pub trait UpstreamConnector: Send + Sync {
    /// Establishes the transport connection.
    async fn connect(&self, server: &ServerName) -> ConnectorResult<()>;

    /// Authenticates an established connection.
    async fn authenticate(&self, server: &ServerName) -> ConnectorResult<()>;

    /// Lists the tools exposed by the upstream and returns their count.
    async fn discover_tools(&self, server: &ServerName) -> ConnectorResult<usize>;

    /// Closes the connection. Must succeed for a server that is not
    /// connected.
    async fn disconnect(&self, server: &ServerName) -> ConnectorResult<()>;
}

/// Connection failures reported by connector adapters.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectorError {
    /// The transport connection could not be established.
    #[error("connection failed: {0}")]
    Connect(String),

    /// The upstream rejected authentication.
    #[error("authentication failed: {0}")]
    Authenticate(String),

    /// Tool discovery failed.
    #[error("tool discovery failed: {0}")]
    Discover(String),

    /// The operation exceeded the connector's timeout.
    #[error("timeout during {0}")]
    Timeout(String),

    /// The attempt was abandoned because the connection was stopped.
    #[error("connection attempt cancelled")]
    Cancelled,
}

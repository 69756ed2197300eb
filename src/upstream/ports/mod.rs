//! Port contracts for upstream connection orchestration.

mod connector;
mod registry;
mod store;

pub use connector::{ConnectorError, ConnectorResult, UpstreamConnector};
pub use registry::{ConnectionRegistry, ConnectionRegistryError, ConnectionRegistryResult};
pub use store::{
    ConfigDocument, ConfigStore, ServerStore, ServerStoreError, ServerStoreResult,
};

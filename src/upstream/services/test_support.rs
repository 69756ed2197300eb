//! Shared fixtures for service tests.

use crate::upstream::{
    domain::{ServerName, UpstreamServer},
    ports::{ConnectionRegistry, ConnectionRegistryResult},
};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::{Mutex, PoisonError};

/// Connection registry that only remembers which servers are registered.
#[derive(Debug, Default)]
pub(crate) struct RecordingRegistry {
    live: Mutex<BTreeSet<ServerName>>,
}

impl RecordingRegistry {
    pub(crate) fn live(&self) -> Vec<ServerName> {
        self.live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ConnectionRegistry for RecordingRegistry {
    async fn register(&self, server: &UpstreamServer) -> ConnectionRegistryResult<()> {
        self.live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(server.name().clone());
        Ok(())
    }

    async fn deregister(&self, name: &ServerName) -> ConnectionRegistryResult<()> {
        self.live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
        Ok(())
    }
}

pub(crate) fn name(raw: &str) -> ServerName {
    ServerName::new(raw).expect("valid server name")
}

pub(crate) fn server(raw: &str) -> UpstreamServer {
    UpstreamServer::new(name(raw))
}

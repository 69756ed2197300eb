//! In-memory server and configuration stores.

use crate::upstream::{
    domain::{ServerName, UpstreamServer},
    ports::{ConfigDocument, ConfigStore, ServerStore, ServerStoreError, ServerStoreResult},
};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

/// Thread-safe in-memory durable server store.
#[derive(Debug, Clone, Default)]
pub struct InMemoryServerStore {
    state: Arc<RwLock<BTreeMap<ServerName, UpstreamServer>>>,
}

impl InMemoryServerStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with `servers`.
    #[must_use]
    pub fn with_servers(servers: impl IntoIterator<Item = UpstreamServer>) -> Self {
        let records = servers
            .into_iter()
            .map(|server| (server.name().clone(), server))
            .collect();
        Self {
            state: Arc::new(RwLock::new(records)),
        }
    }
}

#[async_trait]
impl ServerStore for InMemoryServerStore {
    async fn get(&self, name: &ServerName) -> ServerStoreResult<Option<UpstreamServer>> {
        let state = self.state.read().map_err(|err| {
            ServerStoreError::persistence(std::io::Error::other(err.to_string()))
        })?;
        Ok(state.get(name).cloned())
    }

    async fn put(&self, server: &UpstreamServer) -> ServerStoreResult<()> {
        let mut state = self.state.write().map_err(|err| {
            ServerStoreError::persistence(std::io::Error::other(err.to_string()))
        })?;
        state.insert(server.name().clone(), server.clone());
        Ok(())
    }

    async fn remove(&self, name: &ServerName) -> ServerStoreResult<bool> {
        let mut state = self.state.write().map_err(|err| {
            ServerStoreError::persistence(std::io::Error::other(err.to_string()))
        })?;
        Ok(state.remove(name).is_some())
    }

    async fn list(&self) -> ServerStoreResult<Vec<UpstreamServer>> {
        let state = self.state.read().map_err(|err| {
            ServerStoreError::persistence(std::io::Error::other(err.to_string()))
        })?;
        Ok(state.values().cloned().collect())
    }
}

/// Thread-safe in-memory configuration document.
#[derive(Debug, Clone, Default)]
pub struct InMemoryConfigStore {
    document: Arc<RwLock<ConfigDocument>>,
}

impl InMemoryConfigStore {
    /// Creates a store holding `document`.
    #[must_use]
    pub fn new(document: ConfigDocument) -> Self {
        Self {
            document: Arc::new(RwLock::new(document)),
        }
    }
}

#[async_trait]
impl ConfigStore for InMemoryConfigStore {
    async fn load(&self) -> ServerStoreResult<ConfigDocument> {
        let document = self.document.read().map_err(|err| {
            ServerStoreError::persistence(std::io::Error::other(err.to_string()))
        })?;
        Ok(document.clone())
    }

    async fn upsert_server(&self, server: &UpstreamServer) -> ServerStoreResult<()> {
        let mut document = self.document.write().map_err(|err| {
            ServerStoreError::persistence(std::io::Error::other(err.to_string()))
        })?;
        upsert_entry(&mut document.servers, server);
        Ok(())
    }

    async fn remove_server(&self, name: &ServerName) -> ServerStoreResult<bool> {
        let mut document = self.document.write().map_err(|err| {
            ServerStoreError::persistence(std::io::Error::other(err.to_string()))
        })?;
        Ok(remove_entry(&mut document.servers, name))
    }
}

/// Replaces the entry named like `server`, or appends it.
pub(crate) fn upsert_entry(servers: &mut Vec<UpstreamServer>, server: &UpstreamServer) {
    match servers
        .iter_mut()
        .find(|entry| entry.name() == server.name())
    {
        Some(entry) => entry.clone_from(server),
        None => servers.push(server.clone()),
    }
}

/// Removes the entry named `name`, returning whether one existed.
pub(crate) fn remove_entry(servers: &mut Vec<UpstreamServer>, name: &ServerName) -> bool {
    let before = servers.len();
    servers.retain(|entry| entry.name() != name);
    servers.len() != before
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(raw: &str) -> UpstreamServer {
        UpstreamServer::new(ServerName::new(raw).expect("valid server name"))
    }

    #[tokio::test]
    async fn server_store_round_trips_records() {
        let store = InMemoryServerStore::new();
        let record = server("github").with_auto_disable_threshold(3);

        store.put(&record).await.expect("put succeeds");

        let loaded = store
            .get(record.name())
            .await
            .expect("get succeeds")
            .expect("record exists");
        assert_eq!(loaded, record);
        assert!(store.remove(record.name()).await.expect("remove succeeds"));
        assert!(store.list().await.expect("list succeeds").is_empty());
    }

    #[tokio::test]
    async fn config_upsert_replaces_entry_in_place() {
        let store = InMemoryConfigStore::new(ConfigDocument {
            servers: vec![server("a"), server("b")],
            ..ConfigDocument::default()
        });

        store
            .upsert_server(&server("a").with_enabled(false))
            .await
            .expect("upsert succeeds");

        let document = store.load().await.expect("load succeeds");
        let names: Vec<_> = document
            .servers
            .iter()
            .map(|entry| (entry.name().as_str().to_owned(), entry.enabled()))
            .collect();
        assert_eq!(
            names,
            vec![("a".to_owned(), false), ("b".to_owned(), true)]
        );
    }
}

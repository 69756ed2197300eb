//! Best-effort coordination of writes across every server store.
//!
//! A server record is written in a fixed order: the durable store, the
//! runtime registry, the configuration file and finally the live
//! connection registry. A failing store is logged and reported without
//! undoing the stores already written; [`PersistenceCoordinator::reconcile`]
//! repairs what was left behind, treating the durable store as
//! authoritative.

use crate::upstream::{
    adapters::memory::RuntimeRegistry,
    domain::{ServerName, UpstreamServer},
    ports::{ConfigStore, ConnectionRegistry, ServerStore, ServerStoreError},
};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

/// Store written by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreKind {
    /// Durable keyed store.
    Durable,
    /// In-memory runtime registry.
    Runtime,
    /// Declarative configuration file.
    Config,
    /// Live connection registry.
    Connections,
}

impl StoreKind {
    /// Returns the canonical representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Durable => "durable",
            Self::Runtime => "runtime",
            Self::Config => "config",
            Self::Connections => "connections",
        }
    }
}

impl fmt::Display for StoreKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// One store write that failed and was skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistenceFailure {
    /// Server whose write failed.
    pub server: ServerName,
    /// Store that rejected the write.
    pub store: StoreKind,
    /// Error text reported by the store.
    pub message: String,
}

/// Result of writing one server record to every store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyReport {
    /// The record as written, with its new revision.
    pub server: UpstreamServer,
    /// Stores that could not be written.
    pub failures: Vec<PersistenceFailure>,
}

impl ApplyReport {
    /// Returns whether every store accepted the write.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Result of removing one server from every store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovalReport {
    /// Removed server.
    pub server: ServerName,
    /// Stores that could not be updated.
    pub failures: Vec<PersistenceFailure>,
}

/// Repairs made by one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Servers known to the durable store after the pass.
    pub servers: Vec<ServerName>,
    /// Servers found only in the configuration file and adopted.
    pub adopted: Vec<ServerName>,
    /// Servers missing from the configuration file and written back.
    pub restored_to_config: Vec<ServerName>,
    /// Servers whose configuration entry disagreed with the durable store.
    pub config_repaired: Vec<ServerName>,
    /// Servers whose stored flags violated an invariant.
    pub invariant_repaired: Vec<ServerName>,
    /// Servers present only in the runtime registry and dropped.
    pub runtime_dropped: Vec<ServerName>,
    /// Store writes that failed during the pass.
    pub failures: Vec<PersistenceFailure>,
}

impl ReconcileReport {
    /// Returns whether the pass changed anything.
    #[must_use]
    pub fn repaired_anything(&self) -> bool {
        !(self.adopted.is_empty()
            && self.restored_to_config.is_empty()
            && self.config_repaired.is_empty()
            && self.invariant_repaired.is_empty()
            && self.runtime_dropped.is_empty())
    }
}

/// Errors returned by the persistence coordinator.
#[derive(Debug, Clone, Error)]
pub enum CoordinatorError {
    /// No store knows the server.
    #[error("upstream server not found: {0}")]
    NotFound(ServerName),

    /// The server already exists.
    #[error("upstream server already exists: {0}")]
    AlreadyExists(ServerName),

    /// The record was derived from an older revision than the stored one.
    #[error("stale write for upstream server {server}: revision {attempted} is older than {current}")]
    StaleRevision {
        /// Server being written.
        server: ServerName,
        /// Revision the caller based its record on.
        attempted: u64,
        /// Revision held by the durable store.
        current: u64,
    },

    /// The authoritative store could not be read.
    #[error(transparent)]
    Store(#[from] ServerStoreError),
}

/// Decision returned by a [`PersistenceCoordinator::update`] closure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation<T> {
    /// Write the modified record to every store.
    Apply(T),
    /// Leave every store untouched.
    Skip(T),
}

/// Result type for coordinator operations.
pub type CoordinatorResult<T> = Result<T, CoordinatorError>;

/// Applies server records to the durable store, the runtime registry, the
/// configuration file and the connection registry.
///
/// Writes for one server are serialized; writes for different servers run
/// in parallel.
pub struct PersistenceCoordinator<D, F, L>
where
    D: ServerStore,
    F: ConfigStore,
    L: ConnectionRegistry,
{
    durable: Arc<D>,
    config: Arc<F>,
    runtime: RuntimeRegistry,
    connections: Arc<L>,
    guards: GuardMap,
}

impl<D, F, L> PersistenceCoordinator<D, F, L>
where
    D: ServerStore,
    F: ConfigStore,
    L: ConnectionRegistry,
{
    /// Creates a coordinator over the given stores.
    #[must_use]
    pub fn new(
        durable: Arc<D>,
        config: Arc<F>,
        runtime: RuntimeRegistry,
        connections: Arc<L>,
    ) -> Self {
        Self {
            durable,
            config,
            runtime,
            connections,
            guards: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the runtime registry written by this coordinator.
    #[must_use]
    pub const fn runtime(&self) -> &RuntimeRegistry {
        &self.runtime
    }

    /// Returns the authoritative record for `name`.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::NotFound`] when neither the durable store
    /// nor the runtime registry knows the server.
    pub async fn current(&self, name: &ServerName) -> CoordinatorResult<UpstreamServer> {
        self.load_current(name).await
    }

    /// Applies a complete server record built from a previously read one.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::StaleRevision`] when the durable store
    /// holds a newer revision than the one `server` was derived from.
    pub async fn apply(&self, mut server: UpstreamServer) -> CoordinatorResult<ApplyReport> {
        let _held = self.lock_server(server.name()).await;

        let current = match self.durable.get(server.name()).await {
            Ok(stored) => stored.map_or(0, |record| record.revision()),
            Err(err) => {
                tracing::warn!(
                    server = %server.name(),
                    error = %err,
                    "durable store unreadable, applying without revision check"
                );
                server.revision()
            }
        };
        if current > server.revision() {
            return Err(CoordinatorError::StaleRevision {
                server: server.name().clone(),
                attempted: server.revision(),
                current,
            });
        }

        server.advance_revision(current);
        Ok(self.write_all(server).await)
    }

    /// Reads the current record and lets `change` modify it, all under the
    /// server's write guard. The record is written to every store only when
    /// `change` returns [`Mutation::Apply`].
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::NotFound`] when no store knows the
    /// server.
    pub async fn update<T, M>(
        &self,
        name: &ServerName,
        change: M,
    ) -> CoordinatorResult<(Option<ApplyReport>, T)>
    where
        M: FnOnce(&mut UpstreamServer) -> Mutation<T> + Send,
        T: Send,
    {
        let _held = self.lock_server(name).await;

        let mut server = self.load_current(name).await?;
        match change(&mut server) {
            Mutation::Skip(outcome) => Ok((None, outcome)),
            Mutation::Apply(outcome) => {
                let previous = server.revision();
                server.advance_revision(previous);
                Ok((Some(self.write_all(server).await), outcome))
            }
        }
    }

    /// Like [`update`](Self::update), but always writes the modified record.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::NotFound`] when no store knows the
    /// server.
    pub async fn modify<T, M>(
        &self,
        name: &ServerName,
        change: M,
    ) -> CoordinatorResult<(ApplyReport, T)>
    where
        M: FnOnce(&mut UpstreamServer) -> T + Send,
        T: Send,
    {
        let _held = self.lock_server(name).await;

        let mut server = self.load_current(name).await?;
        let outcome = change(&mut server);
        let previous = server.revision();
        server.advance_revision(previous);
        Ok((self.write_all(server).await, outcome))
    }

    /// Returns every server known to the durable store, falling back to the
    /// runtime registry when it cannot be read.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::Store`] when neither can be read.
    pub async fn list(&self) -> CoordinatorResult<Vec<UpstreamServer>> {
        match self.durable.list().await {
            Ok(servers) => Ok(servers),
            Err(err) => {
                tracing::warn!(error = %err, "durable store unreadable, listing runtime registry");
                Ok(self.runtime.list()?)
            }
        }
    }

    /// Adds a new server to every store.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::AlreadyExists`] when the durable store
    /// already holds the server.
    pub async fn insert(&self, mut server: UpstreamServer) -> CoordinatorResult<ApplyReport> {
        let _held = self.lock_server(server.name()).await;

        if self.durable.get(server.name()).await?.is_some() {
            return Err(CoordinatorError::AlreadyExists(server.name().clone()));
        }

        server.advance_revision(0);
        Ok(self.write_all(server).await)
    }

    /// Removes a server from every store and stops its connection.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::NotFound`] when no store held the server.
    pub async fn remove(&self, name: &ServerName) -> CoordinatorResult<RemovalReport> {
        let _held = self.lock_server(name).await;

        let mut failures = Vec::new();
        let mut existed = false;

        match self.durable.remove(name).await {
            Ok(removed) => existed |= removed,
            Err(err) => failures.push(failure(name, StoreKind::Durable, &err)),
        }
        match self.runtime.remove(name) {
            Ok(removed) => existed |= removed,
            Err(err) => failures.push(failure(name, StoreKind::Runtime, &err)),
        }
        match self.config.remove_server(name).await {
            Ok(removed) => existed |= removed,
            Err(err) => failures.push(failure(name, StoreKind::Config, &err)),
        }
        if let Err(err) = self.connections.deregister(name).await {
            failures.push(failure(name, StoreKind::Connections, &err));
        }

        if !existed && failures.is_empty() {
            return Err(CoordinatorError::NotFound(name.clone()));
        }
        Ok(RemovalReport {
            server: name.clone(),
            failures,
        })
    }

    /// Rebuilds the runtime registry from the durable store and repairs
    /// drift in the configuration file and the connection registry.
    ///
    /// Servers present only in the configuration file are adopted into the
    /// durable store. Stored flags that violate an invariant are repaired.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::Store`] when the durable store cannot be
    /// listed.
    pub async fn reconcile(&self) -> CoordinatorResult<ReconcileReport> {
        let durable_names: BTreeSet<ServerName> = self
            .durable
            .list()
            .await?
            .into_iter()
            .map(|server| server.name().clone())
            .collect();

        let mut report = ReconcileReport::default();
        let config_entries: BTreeMap<ServerName, UpstreamServer> = match self.config.load().await {
            Ok(document) => document
                .servers
                .into_iter()
                .map(|server| (server.name().clone(), server))
                .collect(),
            Err(err) => {
                tracing::error!(
                    error = %err,
                    "configuration file unreadable during reconciliation"
                );
                BTreeMap::new()
            }
        };

        let names: BTreeSet<ServerName> = durable_names
            .iter()
            .chain(config_entries.keys())
            .cloned()
            .collect();

        let mut reconciled = Vec::with_capacity(names.len());
        for name in &names {
            if let Some(server) = self
                .reconcile_server(name, config_entries.get(name), &mut report)
                .await?
            {
                reconciled.push(server);
            }
        }

        self.rebuild_runtime(&reconciled, &mut report).await;
        report.servers = reconciled.iter().map(|server| server.name().clone()).collect();

        if report.repaired_anything() {
            tracing::info!(
                adopted = report.adopted.len(),
                restored_to_config = report.restored_to_config.len(),
                config_repaired = report.config_repaired.len(),
                invariant_repaired = report.invariant_repaired.len(),
                runtime_dropped = report.runtime_dropped.len(),
                "reconciliation repaired drift"
            );
        }
        Ok(report)
    }

    async fn reconcile_server(
        &self,
        name: &ServerName,
        config_entry: Option<&UpstreamServer>,
        report: &mut ReconcileReport,
    ) -> CoordinatorResult<Option<UpstreamServer>> {
        let _held = self.lock_server(name).await;

        let stored = self.durable.get(name).await?;
        let (mut server, mut write_durable) = match (stored, config_entry) {
            (Some(record), _) => (record, false),
            (None, Some(entry)) => {
                report.adopted.push(name.clone());
                (entry.clone(), true)
            }
            (None, None) => return Ok(None),
        };

        if server.normalize() {
            report.invariant_repaired.push(name.clone());
            write_durable = true;
        }
        if write_durable {
            let previous = server.revision();
            server.advance_revision(previous);
            if let Err(err) = self.durable.put(&server).await {
                report.failures.push(failure(name, StoreKind::Durable, &err));
            }
        }

        let config_matches = match config_entry {
            None => {
                report.restored_to_config.push(name.clone());
                false
            }
            Some(entry) if !entry.same_settings(&server) => {
                report.config_repaired.push(name.clone());
                false
            }
            Some(_) => true,
        };
        if (!config_matches || write_durable)
            && let Err(err) = self.config.upsert_server(&server).await
        {
            report.failures.push(failure(name, StoreKind::Config, &err));
        }

        Ok(Some(server))
    }

    async fn rebuild_runtime(&self, servers: &[UpstreamServer], report: &mut ReconcileReport) {
        let known: BTreeSet<&ServerName> = servers.iter().map(UpstreamServer::name).collect();
        match self.runtime.list() {
            Ok(existing) => {
                report.runtime_dropped = existing
                    .iter()
                    .map(UpstreamServer::name)
                    .filter(|name| !known.contains(name))
                    .cloned()
                    .collect();
            }
            Err(err) => {
                tracing::error!(error = %err, "runtime registry unreadable during reconciliation");
            }
        }

        if let Err(err) = self.runtime.replace_all(servers) {
            tracing::error!(error = %err, "runtime registry rebuild failed");
            for server in servers {
                report
                    .failures
                    .push(failure(server.name(), StoreKind::Runtime, &err));
            }
        }

        for name in &report.runtime_dropped {
            if let Err(err) = self.connections.deregister(name).await {
                report
                    .failures
                    .push(failure(name, StoreKind::Connections, &err));
            }
        }
        for server in servers {
            if let Some(err) = self.sync_connection(server).await {
                report.failures.push(err);
            }
        }
    }

    async fn load_current(&self, name: &ServerName) -> CoordinatorResult<UpstreamServer> {
        match self.durable.get(name).await {
            Ok(Some(server)) => return Ok(server),
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(
                    server = %name,
                    error = %err,
                    "durable store unreadable, falling back to runtime registry"
                );
            }
        }

        self.runtime
            .get(name)
            .ok()
            .flatten()
            .ok_or_else(|| CoordinatorError::NotFound(name.clone()))
    }

    async fn write_all(&self, mut server: UpstreamServer) -> ApplyReport {
        if server.normalize() {
            tracing::warn!(
                server = %server.name(),
                "record would enable a disabled server, keeping it disabled"
            );
        }

        let name = server.name().clone();
        let mut failures = Vec::new();

        if let Err(err) = self.durable.put(&server).await {
            failures.push(failure(&name, StoreKind::Durable, &err));
        }
        if let Err(err) = self.runtime.upsert_settings(&server) {
            failures.push(failure(&name, StoreKind::Runtime, &err));
        }
        if let Err(err) = self.config.upsert_server(&server).await {
            failures.push(failure(&name, StoreKind::Config, &err));
        }
        if let Some(err) = self.sync_connection(&server).await {
            failures.push(err);
        }

        if let Ok(Some(live)) = self.runtime.get(&name) {
            server.set_connection(live.connection().clone());
        }
        ApplyReport { server, failures }
    }

    async fn sync_connection(&self, server: &UpstreamServer) -> Option<PersistenceFailure> {
        let result = if server.should_connect() {
            self.connections.register(server).await
        } else {
            self.connections.deregister(server.name()).await
        };
        result
            .err()
            .map(|err| failure(server.name(), StoreKind::Connections, &err))
    }

    async fn lock_server(&self, name: &ServerName) -> ServerGuard<'_> {
        let entry = {
            let mut guards = lock_guards(&self.guards);
            Arc::clone(guards.entry(name.clone()).or_default())
        };
        let held = entry.lock_owned().await;
        ServerGuard {
            guards: &self.guards,
            name: name.clone(),
            held: Some(held),
        }
    }

    #[cfg(test)]
    pub(crate) fn tracked_guards(&self) -> usize {
        lock_guards(&self.guards).len()
    }
}

type ServerLocks = HashMap<ServerName, Arc<tokio::sync::Mutex<()>>>;
type GuardMap = Mutex<ServerLocks>;

/// Exclusive write access to one server. The server's entry leaves the
/// guard map once no other writer holds or awaits it.
struct ServerGuard<'a> {
    guards: &'a GuardMap,
    name: ServerName,
    held: Option<tokio::sync::OwnedMutexGuard<()>>,
}

impl Drop for ServerGuard<'_> {
    fn drop(&mut self) {
        drop(self.held.take());
        let mut guards = lock_guards(self.guards);
        if guards
            .get(&self.name)
            .is_some_and(|entry| Arc::strong_count(entry) == 1)
        {
            guards.remove(&self.name);
        }
    }
}

fn lock_guards(guards: &GuardMap) -> MutexGuard<'_, ServerLocks> {
    guards.lock().unwrap_or_else(PoisonError::into_inner)
}

fn failure(server: &ServerName, store: StoreKind, err: &impl fmt::Display) -> PersistenceFailure {
    tracing::error!(server = %server, store = %store, error = %err, "store write failed");
    PersistenceFailure {
        server: server.clone(),
        store,
        message: err.to_string(),
    }
}

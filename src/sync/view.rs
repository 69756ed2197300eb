//! Status view port and an in-memory implementation.

use crate::upstream::domain::{ServerName, ServerStatusView};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

/// Result type for status view operations.
pub type StatusViewResult<T> = Result<T, StatusViewError>;

/// User-facing status view kept current by the synchronization manager.
#[async_trait]
pub trait StatusView: Send + Sync {
    /// Replaces the whole view with `servers`.
    async fn full_resync(&self, servers: &[ServerStatusView]) -> StatusViewResult<()>;

    /// Refreshes one server's entry.
    async fn apply_update(&self, server: &ServerStatusView) -> StatusViewResult<()>;

    /// Drops the entry of a server that no longer exists.
    async fn remove(&self, name: &ServerName) -> StatusViewResult<()>;
}

/// Errors returned by status views.
#[derive(Debug, Clone, Error)]
pub enum StatusViewError {
    /// The view could not be updated.
    #[error("status view unavailable: {0}")]
    Unavailable(Arc<dyn std::error::Error + Send + Sync>),
}

impl StatusViewError {
    /// Wraps a view-side failure.
    pub fn unavailable(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Unavailable(Arc::new(err))
    }
}

/// Counts of the operations a view has received.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ViewActivity {
    /// Full resynchronizations.
    pub full_resyncs: usize,
    /// Single-server updates.
    pub updates: usize,
    /// Removed entries.
    pub removals: usize,
}

#[derive(Debug, Default)]
struct ViewState {
    entries: BTreeMap<ServerName, ServerStatusView>,
    activity: ViewActivity,
}

/// Status view held in memory.
///
/// Keeps the latest entry per server and counts every operation, so
/// callers can inspect both the rendered state and how it was produced.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStatusView {
    state: Arc<Mutex<ViewState>>,
}

impl InMemoryStatusView {
    /// Creates an empty view.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current entry for `name`.
    #[must_use]
    pub fn entry(&self, name: &ServerName) -> Option<ServerStatusView> {
        self.lock().entries.get(name).cloned()
    }

    /// Returns every entry ordered by name.
    #[must_use]
    pub fn entries(&self) -> Vec<ServerStatusView> {
        self.lock().entries.values().cloned().collect()
    }

    /// Returns the operation counters.
    #[must_use]
    pub fn activity(&self) -> ViewActivity {
        self.lock().activity
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ViewState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl StatusView for InMemoryStatusView {
    async fn full_resync(&self, servers: &[ServerStatusView]) -> StatusViewResult<()> {
        let mut state = self.lock();
        state.entries = servers
            .iter()
            .map(|server| (server.name.clone(), server.clone()))
            .collect();
        state.activity.full_resyncs += 1;
        Ok(())
    }

    async fn apply_update(&self, server: &ServerStatusView) -> StatusViewResult<()> {
        let mut state = self.lock();
        state.entries.insert(server.name.clone(), server.clone());
        state.activity.updates += 1;
        Ok(())
    }

    async fn remove(&self, name: &ServerName) -> StatusViewResult<()> {
        let mut state = self.lock();
        state.entries.remove(name);
        state.activity.removals += 1;
        Ok(())
    }
}

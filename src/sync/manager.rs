//! Actor that turns event bursts into bounded status view work.

use super::{DebounceBuffer, FlushPlan, StatusView, is_significant};
use crate::config::OrchestratorSettings;
use crate::events::{Event, EventBus, EventKind, Subscription};
use crate::upstream::{adapters::memory::RuntimeRegistry, domain::ServerName};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Counters kept by a running synchronization manager.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Events that marked a server as pending.
    pub significant_events: u64,
    /// Events filtered out as invisible to users.
    pub ignored_events: u64,
    /// Flushes of the pending set.
    pub flushes: u64,
    /// Flushes that rebuilt the whole view.
    pub full_resyncs: u64,
    /// Single-server refreshes, including removals.
    pub targeted_updates: u64,
    /// View operations that failed.
    pub view_failures: u64,
}

/// Keeps a [`StatusView`] current from the event stream.
///
/// Significant events mark their server as pending and restart the
/// debounce window. When the window passes quietly the pending servers are
/// refreshed one by one, or the whole view is rebuilt when too many are
/// pending. The pending set is owned by a single task.
pub struct SynchronizationManager<V>
where
    V: StatusView,
{
    runtime: RuntimeRegistry,
    view: Arc<V>,
    buffer: DebounceBuffer,
    stats: Arc<Mutex<SyncStats>>,
}

/// Handle to a running [`SynchronizationManager`].
#[derive(Debug)]
pub struct SyncHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
    stats: Arc<Mutex<SyncStats>>,
}

impl SyncHandle {
    /// Returns a snapshot of the manager's counters.
    #[must_use]
    pub fn stats(&self) -> SyncStats {
        *lock_stats(&self.stats)
    }

    /// Stops the manager after one final flush of pending updates.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(err) = self.task.await {
            tracing::error!(error = %err, "synchronization task ended abnormally");
        }
    }
}

impl<V> SynchronizationManager<V>
where
    V: StatusView + 'static,
{
    /// Creates a manager reading snapshots from `runtime`.
    #[must_use]
    pub fn new(runtime: RuntimeRegistry, view: Arc<V>, settings: &OrchestratorSettings) -> Self {
        Self {
            runtime,
            view,
            buffer: DebounceBuffer::new(settings.debounce(), settings.full_resync_threshold),
            stats: Arc::new(Mutex::new(SyncStats::default())),
        }
    }

    /// Subscribes to every event kind on `bus` and starts the actor.
    ///
    /// Subscriptions are taken before this returns, so no event published
    /// afterwards is missed.
    #[must_use]
    pub fn spawn(self, bus: &EventBus) -> SyncHandle {
        let subscriptions = EventKind::ALL.map(|kind| bus.subscribe(kind));
        let cancel = CancellationToken::new();
        let stats = Arc::clone(&self.stats);
        let task = tokio::spawn(self.run(subscriptions, cancel.clone()));
        SyncHandle {
            cancel,
            task,
            stats,
        }
    }

    async fn run(mut self, subscriptions: [Subscription; 3], cancel: CancellationToken) {
        let [mut states, mut configs, mut tools] = subscriptions;
        let (mut states_open, mut configs_open, mut tools_open) = (true, true, true);

        loop {
            let deadline = self.buffer.deadline();
            tokio::select! {
                () = cancel.cancelled() => break,
                received = states.recv(), if states_open => states_open = self.receive(received),
                received = configs.recv(), if configs_open => configs_open = self.receive(received),
                received = tools.recv(), if tools_open => tools_open = self.receive(received),
                () = wait_until(deadline) => self.flush_due().await,
            }
            if !(states_open || configs_open || tools_open) {
                break;
            }
        }

        for subscription in [&mut states, &mut configs, &mut tools] {
            while let Some(event) = subscription.try_recv() {
                self.observe(&event);
            }
        }
        if let Some(plan) = self.buffer.drain() {
            self.execute(plan).await;
        }
        tracing::debug!("synchronization manager stopped");
    }

    fn receive(&mut self, received: Option<Event>) -> bool {
        let Some(event) = received else {
            return false;
        };
        self.observe(&event);
        true
    }

    fn observe(&mut self, event: &Event) {
        if is_significant(event) {
            self.buffer
                .record(event.server_name().clone(), Instant::now());
            self.update_stats(|stats| stats.significant_events += 1);
        } else {
            self.update_stats(|stats| stats.ignored_events += 1);
        }
    }

    async fn flush_due(&mut self) {
        if let Some(plan) = self.buffer.take_due(Instant::now()) {
            self.execute(plan).await;
        }
    }

    async fn execute(&self, plan: FlushPlan) {
        match plan {
            FlushPlan::Full { changed } => {
                tracing::debug!(changed, "rebuilding status view");
                self.resync_all().await;
            }
            FlushPlan::Targeted(names) => {
                tracing::debug!(servers = names.len(), "refreshing status view entries");
                for name in &names {
                    self.refresh(name).await;
                }
            }
        }
        self.update_stats(|stats| stats.flushes += 1);
    }

    async fn resync_all(&self) {
        let result = match self.runtime.status_views() {
            Ok(views) => self.view.full_resync(&views).await.map_err(|err| err.to_string()),
            Err(err) => Err(err.to_string()),
        };
        match result {
            Ok(()) => self.update_stats(|stats| stats.full_resyncs += 1),
            Err(err) => {
                tracing::error!(error = %err, "status view resynchronization failed");
                self.update_stats(|stats| stats.view_failures += 1);
            }
        }
    }

    async fn refresh(&self, name: &ServerName) {
        let result = match self.runtime.status_view(name) {
            Ok(Some(snapshot)) => self
                .view
                .apply_update(&snapshot)
                .await
                .map_err(|err| err.to_string()),
            Ok(None) => self.view.remove(name).await.map_err(|err| err.to_string()),
            Err(err) => Err(err.to_string()),
        };
        match result {
            Ok(()) => self.update_stats(|stats| stats.targeted_updates += 1),
            Err(err) => {
                tracing::error!(server = %name, error = %err, "status view update failed");
                self.update_stats(|stats| stats.view_failures += 1);
            }
        }
    }

    fn update_stats(&self, change: impl FnOnce(&mut SyncStats)) {
        change(&mut *lock_stats(&self.stats));
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

fn lock_stats(stats: &Mutex<SyncStats>) -> MutexGuard<'_, SyncStats> {
    stats.lock().unwrap_or_else(PoisonError::into_inner)
}

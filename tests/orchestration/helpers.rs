//! Shared helpers for orchestration integration tests.

use mockable::DefaultClock;
use std::sync::Arc;
use std::time::Duration;
use switchboard::config::OrchestratorSettings;
use switchboard::events::{ConfigAction, EventPayload, Subscription};
use switchboard::orchestrator::{Orchestrator, OrchestratorParts};
use switchboard::sync::InMemoryStatusView;
use switchboard::upstream::{
    adapters::{
        ScriptedConnector,
        memory::{InMemoryConfigStore, InMemoryServerStore},
    },
    domain::{ConnectionState, GroupName, ServerName, UpstreamServer},
    ports::ConfigDocument,
};

/// Orchestrator over in-memory stores and a scripted connector.
pub type TestOrchestrator =
    Orchestrator<InMemoryServerStore, InMemoryConfigStore, ScriptedConnector, DefaultClock>;

/// A running orchestrator and the collaborators tests inspect.
pub struct Fixture {
    pub orchestrator: TestOrchestrator,
    pub connector: Arc<ScriptedConnector>,
    pub view: Arc<InMemoryStatusView>,
}

/// Starts an orchestrator whose configuration file lists `servers`.
///
/// Script `connector` before calling: enabled servers connect while the
/// orchestrator starts.
pub async fn start(
    servers: Vec<UpstreamServer>,
    settings: OrchestratorSettings,
    connector: ScriptedConnector,
) -> Fixture {
    let connector = Arc::new(connector);
    let view = Arc::new(InMemoryStatusView::new());
    let document = ConfigDocument { settings, servers };
    let orchestrator = Orchestrator::start(OrchestratorParts {
        durable: Arc::new(InMemoryServerStore::new()),
        config: Arc::new(InMemoryConfigStore::new(document)),
        connector: Arc::clone(&connector),
        view: Arc::clone(&view),
        clock: Arc::new(DefaultClock),
        settings: None,
    })
    .await
    .expect("orchestrator starts");
    Fixture {
        orchestrator,
        connector,
        view,
    }
}

pub fn name(raw: &str) -> ServerName {
    ServerName::new(raw).expect("valid server name")
}

pub fn group(raw: &str) -> GroupName {
    GroupName::new(raw).expect("valid group name")
}

pub fn server(raw: &str) -> UpstreamServer {
    UpstreamServer::new(name(raw))
}

/// Lets every spawned task run until it waits on time or I/O.
pub async fn settle(millis: u64) {
    tokio::time::sleep(Duration::from_millis(millis)).await;
}

/// Waits for a `ConfigChange` with `action` for `target`.
pub async fn wait_for_action(
    changes: &mut Subscription,
    target: &ServerName,
    action: ConfigAction,
) {
    let wait = async {
        loop {
            let event = changes.recv().await.expect("bus open");
            if event.server_name() == target
                && *event.payload() == (EventPayload::ConfigChange { action })
            {
                return;
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(600), wait)
        .await
        .expect("config change observed");
}

/// Waits until `target` enters `state`.
pub async fn wait_for_state(
    states: &mut Subscription,
    target: &ServerName,
    state: ConnectionState,
) {
    let wait = async {
        loop {
            let event = states.recv().await.expect("bus open");
            if event.server_name() != target {
                continue;
            }
            if let EventPayload::StateChange { new, .. } = *event.payload()
                && new == state
            {
                return;
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(600), wait)
        .await
        .expect("state change observed");
}

/// Polls the authoritative record of `target` until it is auto-disabled.
pub async fn wait_until_auto_disabled(orchestrator: &TestOrchestrator, target: &ServerName) {
    let wait = async {
        loop {
            let stored = orchestrator.server(target).await.expect("server known");
            if stored.auto_disabled() {
                return;
            }
            settle(10).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(600), wait)
        .await
        .expect("server auto-disabled");
}

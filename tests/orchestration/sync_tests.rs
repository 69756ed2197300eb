//! Debounced status view synchronization through the orchestrator.

use super::helpers::{name, server, settle, start, wait_until_auto_disabled};
use rstest::rstest;
use switchboard::config::OrchestratorSettings;
use switchboard::sync::ViewActivity;
use switchboard::upstream::{
    adapters::{ScriptedAttempt, ScriptedConnector},
    domain::{ConnectionState, UpstreamServer},
};

fn fleet(count: usize) -> Vec<UpstreamServer> {
    (0..count).map(|index| server(&format!("server-{index}"))).collect()
}

#[rstest]
#[case(4, ViewActivity { full_resyncs: 0, updates: 4, removals: 0 })]
#[case(5, ViewActivity { full_resyncs: 0, updates: 5, removals: 0 })]
#[case(6, ViewActivity { full_resyncs: 1, updates: 0, removals: 0 })]
#[tokio::test(start_paused = true)]
async fn startup_burst_is_flushed_once(#[case] servers: usize, #[case] expected: ViewActivity) {
    let fixture = start(
        fleet(servers),
        OrchestratorSettings::default(),
        ScriptedConnector::with_default_tool_count(2),
    )
    .await;

    settle(500).await;

    assert_eq!(fixture.view.activity(), expected);
    assert_eq!(fixture.orchestrator.sync_stats().flushes, 1);
    let entries = fixture.view.entries();
    assert_eq!(entries.len(), servers);
    assert!(entries.iter().all(|entry| {
        entry.connection_state == ConnectionState::Ready && entry.tool_count == 2
    }));
    fixture.orchestrator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn status_view_shows_auto_disable() {
    let connector = ScriptedConnector::new();
    connector
        .script(
            &name("flaky"),
            [ScriptedAttempt::FailDiscover("Error: Cannot find module 'server'".to_owned())],
        )
        .expect("script accepted");
    let fixture = start(
        vec![server("flaky").with_auto_disable_threshold(1)],
        OrchestratorSettings::default(),
        connector,
    )
    .await;
    wait_until_auto_disabled(&fixture.orchestrator, &name("flaky")).await;

    settle(500).await;

    let entry = fixture.view.entry(&name("flaky")).expect("entry rendered");
    assert!(!entry.enabled);
    assert!(entry.auto_disabled);
    assert!(entry.auto_disable_reason.contains("(missing_package)"));
    assert_eq!(entry.connection_state, ConnectionState::Disconnected);
    fixture.orchestrator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn removed_server_leaves_the_view() {
    let fixture = start(
        vec![server("alpha"), server("beta")],
        OrchestratorSettings::default(),
        ScriptedConnector::new(),
    )
    .await;
    settle(500).await;

    fixture
        .orchestrator
        .remove_server(&name("alpha"))
        .await
        .expect("server removed");
    settle(500).await;

    assert_eq!(fixture.view.entry(&name("alpha")), None);
    assert!(fixture.view.entry(&name("beta")).is_some());
    assert_eq!(fixture.view.activity().removals, 1);
    fixture.orchestrator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn shutdown_renders_final_state() {
    let fixture = start(
        vec![server("alpha")],
        OrchestratorSettings::default(),
        ScriptedConnector::new(),
    )
    .await;
    settle(500).await;
    let view = std::sync::Arc::clone(&fixture.view);

    fixture.orchestrator.shutdown().await;

    let entry = view.entry(&name("alpha")).expect("entry rendered");
    assert_eq!(entry.connection_state, ConnectionState::Disconnected);
}

//! Manual group enable and disable through the orchestrator.

use super::helpers::{
    group, name, server, settle, start, wait_for_action, wait_for_state, wait_until_auto_disabled,
};
use rstest::rstest;
use switchboard::config::OrchestratorSettings;
use switchboard::events::{ConfigAction, EventKind};
use switchboard::upstream::{
    adapters::{ScriptedAttempt, ScriptedConnector},
    domain::ConnectionState,
};

#[tokio::test(start_paused = true)]
async fn group_enable_restores_auto_disabled_server() {
    let connector = ScriptedConnector::with_default_tool_count(5);
    connector
        .script(
            &name("flaky"),
            (0..3).map(|_| ScriptedAttempt::FailConnect("dial tcp: i/o refused".to_owned())),
        )
        .expect("script accepted");
    let fixture = start(
        vec![
            server("flaky")
                .with_group(group("dev"))
                .with_auto_disable_threshold(3),
            server("steady").with_group(group("dev")),
        ],
        OrchestratorSettings::default(),
        connector,
    )
    .await;
    let orchestrator = &fixture.orchestrator;
    wait_until_auto_disabled(orchestrator, &name("flaky")).await;
    let disabled = orchestrator.server(&name("flaky")).await.expect("server known");
    assert!(!disabled.enabled());
    assert!(!disabled.auto_disable_reason().is_empty());

    let mut changes = orchestrator.subscribe(EventKind::ConfigChange);
    let mut states = orchestrator.subscribe(EventKind::StateChange);
    let outcomes = orchestrator
        .toggle_group(&group("dev"), true)
        .await
        .expect("group toggled");

    assert_eq!(outcomes.len(), 2);
    let restored = orchestrator.server(&name("flaky")).await.expect("server known");
    assert!(restored.enabled());
    assert!(!restored.auto_disabled());
    assert!(restored.auto_disable_reason().is_empty());
    wait_for_action(&mut changes, &name("flaky"), ConfigAction::Enabled).await;
    wait_for_state(&mut states, &name("flaky"), ConnectionState::Ready).await;
    fixture.orchestrator.shutdown().await;
}

#[rstest]
#[case(true)]
#[case(false)]
#[tokio::test(start_paused = true)]
async fn group_toggle_clears_auto_disable_in_both_directions(#[case] enabled: bool) {
    let connector = ScriptedConnector::new();
    connector
        .script(
            &name("flaky"),
            [ScriptedAttempt::FailAuthenticate("401 Unauthorized".to_owned())],
        )
        .expect("script accepted");
    let fixture = start(
        vec![
            server("flaky")
                .with_group(group("dev"))
                .with_auto_disable_threshold(1),
            server("other").with_group(group("ops")),
        ],
        OrchestratorSettings::default(),
        connector,
    )
    .await;
    let orchestrator = &fixture.orchestrator;
    wait_until_auto_disabled(orchestrator, &name("flaky")).await;

    let outcomes = orchestrator
        .toggle_group(&group("dev"), enabled)
        .await
        .expect("group toggled");

    let [outcome] = outcomes.as_slice() else {
        panic!("expected one outcome, got {outcomes:?}");
    };
    assert_eq!(outcome.server.name, name("flaky"));
    assert_eq!(outcome.server.enabled, enabled);
    assert!(!outcome.server.auto_disabled);
    assert!(outcome.server.auto_disable_reason.is_empty());
    assert!(outcome.failures.is_empty());
    let other = orchestrator.server(&name("other")).await.expect("server known");
    assert!(other.enabled());
    fixture.orchestrator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn group_enable_skips_quarantined_members() {
    let fixture = start(
        vec![
            server("clean").with_group(group("dev")).with_enabled(false),
            server("suspect").with_group(group("dev")).with_quarantined(true),
        ],
        OrchestratorSettings::default(),
        ScriptedConnector::new(),
    )
    .await;
    let orchestrator = &fixture.orchestrator;

    let outcomes = orchestrator
        .toggle_group(&group("dev"), true)
        .await
        .expect("group toggled");
    settle(50).await;

    let blocked: Vec<_> = outcomes
        .iter()
        .filter(|outcome| outcome.blocked_by_quarantine)
        .map(|outcome| outcome.server.name.clone())
        .collect();
    assert_eq!(blocked, vec![name("suspect")]);
    let suspect = orchestrator.server(&name("suspect")).await.expect("server known");
    assert!(!suspect.enabled());
    assert!(suspect.quarantined());
    assert!(orchestrator.server(&name("clean")).await.expect("server known").enabled());
    let status = orchestrator
        .status(&name("clean"))
        .expect("runtime readable")
        .expect("status known");
    assert_eq!(status.connection_state, ConnectionState::Ready);
    fixture.orchestrator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn unknown_group_changes_nothing() {
    let fixture = start(
        vec![server("steady").with_group(group("dev"))],
        OrchestratorSettings::default(),
        ScriptedConnector::new(),
    )
    .await;

    let outcomes = fixture
        .orchestrator
        .toggle_group(&group("missing"), false)
        .await
        .expect("group toggled");

    assert!(outcomes.is_empty());
    fixture.orchestrator.shutdown().await;
}

//! Failure thresholds, recovery and quarantine through the orchestrator.

use super::helpers::{
    name, server, settle, start, wait_for_action, wait_for_state, wait_until_auto_disabled,
};
use mockable::DefaultClock;
use switchboard::config::OrchestratorSettings;
use switchboard::events::{ConfigAction, Event, EventKind};
use switchboard::upstream::{
    adapters::{ScriptedAttempt, ScriptedConnector},
    domain::ConnectionState,
    services::{ConnectOutcome, PolicyDecision},
};

fn refused(count: usize) -> Vec<ScriptedAttempt> {
    (0..count)
        .map(|_| ScriptedAttempt::FailConnect("connect ECONNREFUSED connection refused".to_owned()))
        .collect()
}

#[tokio::test(start_paused = true)]
async fn third_consecutive_failure_auto_disables() {
    let connector = ScriptedConnector::with_default_tool_count(4);
    connector
        .script(&name("flaky"), refused(3))
        .expect("script accepted");
    let fixture = start(
        vec![server("flaky").with_auto_disable_threshold(3)],
        OrchestratorSettings::default(),
        connector,
    )
    .await;
    let mut changes = fixture.orchestrator.subscribe(EventKind::ConfigChange);

    wait_for_action(&mut changes, &name("flaky"), ConfigAction::AutoDisabled).await;

    let stored = fixture
        .orchestrator
        .server(&name("flaky"))
        .await
        .expect("server known");
    assert!(!stored.enabled());
    assert!(stored.auto_disabled());
    assert!(stored.auto_disable_reason().contains("3 consecutive failures (network)"));
    assert_eq!(fixture.connector.connect_calls(&name("flaky")), 3);

    settle(60_000).await;
    assert_eq!(fixture.connector.connect_calls(&name("flaky")), 3);
    fixture.orchestrator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn success_restarts_the_failure_count() {
    let connector = ScriptedConnector::with_default_tool_count(1);
    connector
        .script(
            &name("flaky"),
            [
                refused(2),
                vec![ScriptedAttempt::Succeed { tool_count: 1 }],
                refused(2),
            ]
            .concat(),
        )
        .expect("script accepted");
    let fixture = start(
        vec![server("flaky").with_auto_disable_threshold(3)],
        OrchestratorSettings::manual_reconnect(),
        connector,
    )
    .await;
    let orchestrator = &fixture.orchestrator;
    settle(50).await;

    assert!(matches!(
        orchestrator.reconnect(&name("flaky")).await,
        Some(ConnectOutcome::Failed(_))
    ));
    assert_eq!(
        orchestrator.reconnect(&name("flaky")).await,
        Some(ConnectOutcome::Ready { tool_count: 1 })
    );
    assert!(matches!(
        orchestrator
            .report_failure(&name("flaky"), "connection refused")
            .await,
        Ok(Some(PolicyDecision::BelowThreshold { failures: 1, .. }))
    ));
    assert!(matches!(
        orchestrator.reconnect(&name("flaky")).await,
        Some(ConnectOutcome::Failed(_))
    ));
    settle(50).await;

    let stored = orchestrator.server(&name("flaky")).await.expect("server known");
    assert!(stored.enabled());
    assert!(!stored.auto_disabled());

    let mut changes = orchestrator.subscribe(EventKind::ConfigChange);
    assert!(matches!(
        orchestrator.reconnect(&name("flaky")).await,
        Some(ConnectOutcome::Failed(_))
    ));
    wait_for_action(&mut changes, &name("flaky"), ConfigAction::AutoDisabled).await;
    fixture.orchestrator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn failures_reported_while_in_error_reach_the_threshold() {
    let connector = ScriptedConnector::new();
    connector
        .script(&name("flaky"), refused(1))
        .expect("script accepted");
    let fixture = start(
        vec![server("flaky").with_auto_disable_threshold(3)],
        OrchestratorSettings::manual_reconnect(),
        connector,
    )
    .await;
    let orchestrator = &fixture.orchestrator;
    settle(50).await;
    let live = orchestrator
        .status(&name("flaky"))
        .expect("runtime readable")
        .expect("flaky tracked");
    assert_eq!(live.connection_state, ConnectionState::Error);

    let second = orchestrator
        .report_failure(&name("flaky"), "connection reset by peer")
        .await
        .expect("failure evaluated");
    let third = orchestrator
        .report_failure(&name("flaky"), "connection reset by peer")
        .await
        .expect("failure evaluated");

    assert!(matches!(
        second,
        Some(PolicyDecision::BelowThreshold { failures: 2, threshold: 3 })
    ));
    assert!(matches!(
        third,
        Some(PolicyDecision::ThresholdExceeded { failures: 3, threshold: 3, .. })
    ));
    let stored = orchestrator.server(&name("flaky")).await.expect("server known");
    assert!(stored.auto_disabled());
    assert!(!stored.enabled());
    assert_eq!(
        orchestrator
            .report_failure(&name("flaky"), "connection reset by peer")
            .await
            .expect("evaluation succeeds"),
        None
    );
    fixture.orchestrator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn threshold_zero_never_auto_disables() {
    let connector = ScriptedConnector::new();
    connector
        .script(&name("noisy"), refused(12))
        .expect("script accepted");
    let fixture = start(
        vec![server("noisy").with_auto_disable_threshold(0)],
        OrchestratorSettings {
            retry_base_delay_ms: 10,
            retry_max_delay_ms: 100,
            ..OrchestratorSettings::default()
        },
        connector,
    )
    .await;
    let mut states = fixture.orchestrator.subscribe(EventKind::StateChange);

    wait_for_state(&mut states, &name("noisy"), ConnectionState::Ready).await;

    let stored = fixture
        .orchestrator
        .server(&name("noisy"))
        .await
        .expect("server known");
    assert!(stored.enabled());
    assert!(!stored.auto_disabled());
    fixture.orchestrator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn quarantined_server_is_not_re_enabled_by_recovery() {
    let connector = ScriptedConnector::new();
    connector
        .script(&name("suspect"), refused(1))
        .expect("script accepted");
    let fixture = start(
        vec![server("suspect").with_auto_disable_threshold(1)],
        OrchestratorSettings::default(),
        connector,
    )
    .await;
    let orchestrator = &fixture.orchestrator;
    wait_until_auto_disabled(orchestrator, &name("suspect")).await;
    orchestrator
        .set_quarantined(&name("suspect"), true)
        .await
        .expect("quarantined");

    orchestrator.bus().publish(Event::state_change(
        name("suspect"),
        ConnectionState::Discovering,
        ConnectionState::Ready,
        &DefaultClock,
    ));
    settle(50).await;

    let stored = orchestrator.server(&name("suspect")).await.expect("server known");
    assert!(!stored.enabled());
    assert!(stored.auto_disabled());
    assert!(stored.quarantined());
    assert!(orchestrator.reconnect(&name("suspect")).await.is_none());
    fixture.orchestrator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn recovery_signal_lifts_auto_disable() {
    let connector = ScriptedConnector::new();
    connector
        .script(&name("flaky"), refused(1))
        .expect("script accepted");
    let fixture = start(
        vec![server("flaky").with_auto_disable_threshold(1)],
        OrchestratorSettings::default(),
        connector,
    )
    .await;
    let orchestrator = &fixture.orchestrator;
    wait_until_auto_disabled(orchestrator, &name("flaky")).await;
    let mut changes = orchestrator.subscribe(EventKind::ConfigChange);

    orchestrator.bus().publish(Event::state_change(
        name("flaky"),
        ConnectionState::Discovering,
        ConnectionState::Ready,
        &DefaultClock,
    ));
    wait_for_action(&mut changes, &name("flaky"), ConfigAction::Recovered).await;

    let stored = orchestrator.server(&name("flaky")).await.expect("server known");
    assert!(stored.enabled());
    assert!(!stored.auto_disabled());
    assert!(stored.auto_disable_reason().is_empty());
    fixture.orchestrator.shutdown().await;
}

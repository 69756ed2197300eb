//! File-backed stores, restarts and reconciliation.

use super::helpers::{group, name, server};
use camino::{Utf8Path, Utf8PathBuf};
use mockable::DefaultClock;
use std::sync::Arc;
use switchboard::config::OrchestratorSettings;
use switchboard::orchestrator::{Orchestrator, OrchestratorParts};
use switchboard::sync::InMemoryStatusView;
use switchboard::upstream::{
    adapters::{
        ScriptedConnector,
        file::{JsonConfigFile, JsonFileServerStore},
    },
    domain::UpstreamServer,
    ports::{ConfigDocument, ConfigStore, ServerStore},
};
use tempfile::TempDir;

type FileOrchestrator =
    Orchestrator<JsonFileServerStore, JsonConfigFile, ScriptedConnector, DefaultClock>;

struct Paths {
    _temp: TempDir,
    servers: Utf8PathBuf,
    config: Utf8PathBuf,
}

fn paths() -> Paths {
    let temp = TempDir::new().expect("temp dir");
    let root = Utf8Path::from_path(temp.path())
        .expect("temp path should be UTF-8")
        .to_owned();
    Paths {
        servers: root.join("servers"),
        config: root.join("config").join("switchboard.json"),
        _temp: temp,
    }
}

async fn write_config(paths: &Paths, servers: Vec<UpstreamServer>) {
    let document = ConfigDocument {
        settings: OrchestratorSettings::manual_reconnect(),
        servers,
    };
    JsonConfigFile::open(&paths.config)
        .expect("config opens")
        .save(&document)
        .await
        .expect("config written");
}

async fn start(paths: &Paths) -> FileOrchestrator {
    Orchestrator::start(OrchestratorParts {
        durable: Arc::new(JsonFileServerStore::open(&paths.servers).expect("store opens")),
        config: Arc::new(JsonConfigFile::open(&paths.config).expect("config opens")),
        connector: Arc::new(ScriptedConnector::new()),
        view: Arc::new(InMemoryStatusView::new()),
        clock: Arc::new(DefaultClock),
        settings: None,
    })
    .await
    .expect("orchestrator starts")
}

async fn config_entry(paths: &Paths, raw: &str) -> Option<UpstreamServer> {
    JsonConfigFile::open(&paths.config)
        .expect("config opens")
        .load()
        .await
        .expect("config readable")
        .servers
        .into_iter()
        .find(|entry| entry.name().as_str() == raw)
}

#[tokio::test(flavor = "multi_thread")]
async fn configured_servers_are_adopted_on_start() {
    let paths = paths();
    write_config(&paths, vec![server("alpha").with_group(group("dev"))]).await;

    let orchestrator = start(&paths).await;

    assert!(!orchestrator.settings().auto_reconnect);
    let stored = JsonFileServerStore::open(&paths.servers)
        .expect("store opens")
        .get(&name("alpha"))
        .await
        .expect("store readable")
        .expect("alpha adopted");
    assert_eq!(stored.revision(), 1);
    assert_eq!(stored.group(), Some(&group("dev")));
    orchestrator.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn manual_changes_survive_restart() {
    let paths = paths();
    write_config(&paths, vec![server("alpha"), server("beta")]).await;
    let first = start(&paths).await;
    first
        .set_enabled(&name("beta"), false)
        .await
        .expect("beta disabled");
    first
        .set_quarantined(&name("alpha"), true)
        .await
        .expect("alpha quarantined");
    first.shutdown().await;

    let second = start(&paths).await;

    let beta = second.server(&name("beta")).await.expect("beta known");
    let alpha = second.server(&name("alpha")).await.expect("alpha known");
    assert!(!beta.enabled());
    assert!(alpha.quarantined());
    assert!(!alpha.enabled());
    let beta_entry = config_entry(&paths, "beta").await.expect("beta configured");
    assert!(beta_entry.same_settings(&beta));
    second.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn reconcile_restores_entries_dropped_from_config_file() {
    let paths = paths();
    write_config(&paths, vec![server("alpha"), server("beta")]).await;
    let orchestrator = start(&paths).await;
    write_config(&paths, vec![server("beta")]).await;

    let report = orchestrator.reconcile().await.expect("reconcile runs");

    assert_eq!(report.restored_to_config, vec![name("alpha")]);
    assert!(report.failures.is_empty());
    assert!(config_entry(&paths, "alpha").await.is_some());
    orchestrator.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn reconcile_overrides_hand_edited_flags() {
    let paths = paths();
    write_config(&paths, vec![server("alpha")]).await;
    let orchestrator = start(&paths).await;
    orchestrator
        .set_enabled(&name("alpha"), false)
        .await
        .expect("alpha disabled");
    write_config(&paths, vec![server("alpha")]).await;

    let report = orchestrator.reconcile().await.expect("reconcile runs");

    assert_eq!(report.config_repaired, vec![name("alpha")]);
    let entry = config_entry(&paths, "alpha").await.expect("alpha configured");
    assert!(!entry.enabled());
    orchestrator.shutdown().await;
}

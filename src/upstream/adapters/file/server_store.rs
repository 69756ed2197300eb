//! Durable server store keeping one JSON document per server.

use super::{open_dir_all, run_blocking, write_atomically};
use crate::upstream::{
    domain::{ServerName, UpstreamServer},
    ports::{ServerStore, ServerStoreError, ServerStoreResult},
};
use async_trait::async_trait;
use camino::Utf8Path;
use cap_std::fs_utf8::Dir;
use std::io::ErrorKind;
use std::sync::Arc;

const RECORD_EXTENSION: &str = ".json";

/// Durable server store backed by a directory of `<name>.json` files.
#[derive(Debug, Clone)]
pub struct JsonFileServerStore {
    dir: Arc<Dir>,
}

impl JsonFileServerStore {
    /// Opens the store rooted at `path`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns [`ServerStoreError::Persistence`] when the directory cannot be
    /// created or opened.
    pub fn open(path: &Utf8Path) -> ServerStoreResult<Self> {
        Ok(Self {
            dir: Arc::new(open_dir_all(path)?),
        })
    }
}

fn record_file_name(name: &ServerName) -> String {
    format!("{name}{RECORD_EXTENSION}")
}

fn read_record(dir: &Dir, file_name: &str) -> ServerStoreResult<Option<UpstreamServer>> {
    let contents = match dir.read_to_string(file_name) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(ServerStoreError::persistence(err)),
    };
    serde_json::from_str(&contents)
        .map(Some)
        .map_err(ServerStoreError::invalid_persisted_data)
}

#[async_trait]
impl ServerStore for JsonFileServerStore {
    async fn get(&self, name: &ServerName) -> ServerStoreResult<Option<UpstreamServer>> {
        let dir = Arc::clone(&self.dir);
        let file_name = record_file_name(name);
        run_blocking(move || read_record(&dir, &file_name)).await
    }

    async fn put(&self, server: &UpstreamServer) -> ServerStoreResult<()> {
        let dir = Arc::clone(&self.dir);
        let file_name = record_file_name(server.name());
        let contents =
            serde_json::to_string_pretty(server).map_err(ServerStoreError::persistence)?;
        run_blocking(move || write_atomically(&dir, &file_name, &contents)).await
    }

    async fn remove(&self, name: &ServerName) -> ServerStoreResult<bool> {
        let dir = Arc::clone(&self.dir);
        let file_name = record_file_name(name);
        run_blocking(move || match dir.remove_file(&file_name) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(ServerStoreError::persistence(err)),
        })
        .await
    }

    async fn list(&self) -> ServerStoreResult<Vec<UpstreamServer>> {
        let dir = Arc::clone(&self.dir);
        run_blocking(move || {
            let mut records = Vec::new();
            for entry in dir.entries().map_err(ServerStoreError::persistence)? {
                let file_name = entry
                    .map_err(ServerStoreError::persistence)?
                    .file_name()
                    .map_err(ServerStoreError::persistence)?;
                if file_name.starts_with('.') || !file_name.ends_with(RECORD_EXTENSION) {
                    continue;
                }
                if let Some(record) = read_record(&dir, &file_name)? {
                    records.push(record);
                }
            }
            records.sort_by(|left, right| left.name().cmp(right.name()));
            Ok(records)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::domain::GroupName;
    use camino::Utf8PathBuf;
    use tempfile::TempDir;

    fn open_store(temp: &TempDir) -> JsonFileServerStore {
        let path = Utf8PathBuf::from_path_buf(temp.path().join("servers"))
            .expect("temp path should be UTF-8");
        JsonFileServerStore::open(&path).expect("store should open")
    }

    fn server(raw: &str) -> UpstreamServer {
        UpstreamServer::new(ServerName::new(raw).expect("valid server name"))
    }

    #[tokio::test]
    async fn records_survive_reopening() {
        let temp = TempDir::new().expect("temp dir");
        let mut record = server("github")
            .with_group(GroupName::new("dev").expect("valid group name"))
            .with_auto_disable_threshold(3);
        record.mark_auto_disabled("auto-disabled after 3 consecutive failures (network)");
        open_store(&temp).put(&record).await.expect("put succeeds");

        let loaded = open_store(&temp)
            .get(record.name())
            .await
            .expect("get succeeds")
            .expect("record exists");

        assert!(loaded.same_settings(&record));
    }

    #[tokio::test]
    async fn list_returns_sorted_records_and_skips_temporaries() {
        let temp = TempDir::new().expect("temp dir");
        let store = open_store(&temp);
        store.put(&server("zeta")).await.expect("put succeeds");
        store.put(&server("alpha")).await.expect("put succeeds");

        let names: Vec<_> = store
            .list()
            .await
            .expect("list succeeds")
            .iter()
            .map(|record| record.name().as_str().to_owned())
            .collect();

        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[tokio::test]
    async fn remove_reports_missing_records() {
        let temp = TempDir::new().expect("temp dir");
        let store = open_store(&temp);
        let record = server("github");
        store.put(&record).await.expect("put succeeds");

        assert!(store.remove(record.name()).await.expect("remove succeeds"));
        assert!(!store.remove(record.name()).await.expect("remove succeeds"));
    }

    #[tokio::test]
    async fn corrupt_record_is_reported_as_invalid_data() {
        let temp = TempDir::new().expect("temp dir");
        let store = open_store(&temp);
        std::fs::write(temp.path().join("servers").join("broken.json"), "{not json")
            .expect("write corrupt record");

        let result = store.list().await;

        assert!(matches!(
            result,
            Err(ServerStoreError::InvalidPersistedData(_))
        ));
    }
}

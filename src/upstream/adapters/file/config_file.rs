//! Declarative JSON configuration file.

use super::{open_dir_all, run_blocking, write_atomically};
use crate::upstream::{
    adapters::memory::{remove_entry, upsert_entry},
    domain::{ServerName, UpstreamServer},
    ports::{ConfigDocument, ConfigStore, ServerStoreError, ServerStoreResult},
};
use async_trait::async_trait;
use camino::Utf8Path;
use cap_std::fs_utf8::Dir;
use std::io::ErrorKind;
use std::sync::{Arc, Mutex};

/// Configuration file holding `{"settings": {...}, "servers": [...]}`.
///
/// Server updates rewrite the whole file. Concurrent updates through the
/// same handle are serialized.
#[derive(Debug, Clone)]
pub struct JsonConfigFile {
    dir: Arc<Dir>,
    file_name: Arc<str>,
    write_guard: Arc<Mutex<()>>,
}

impl JsonConfigFile {
    /// Opens the configuration file at `path`. The file itself may be
    /// missing; its parent directory is created if needed.
    ///
    /// # Errors
    ///
    /// Returns [`ServerStoreError::Persistence`] when `path` has no file name
    /// or its directory cannot be opened.
    pub fn open(path: &Utf8Path) -> ServerStoreResult<Self> {
        let file_name = path.file_name().ok_or_else(|| {
            ServerStoreError::persistence(std::io::Error::other(
                "configuration path must include a file name",
            ))
        })?;
        let parent = path
            .parent()
            .filter(|parent| !parent.as_str().is_empty())
            .unwrap_or_else(|| Utf8Path::new("."));
        Ok(Self {
            dir: Arc::new(open_dir_all(parent)?),
            file_name: Arc::from(file_name),
            write_guard: Arc::new(Mutex::new(())),
        })
    }

    /// Writes a whole document, replacing the file.
    ///
    /// # Errors
    ///
    /// Returns [`ServerStoreError::Persistence`] when the file cannot be
    /// written.
    pub async fn save(&self, document: &ConfigDocument) -> ServerStoreResult<()> {
        let contents =
            serde_json::to_string_pretty(document).map_err(ServerStoreError::persistence)?;
        let (dir, file_name, guard) = self.handles();
        run_blocking(move || {
            let _held = guard.lock().map_err(guard_poisoned)?;
            write_atomically(&dir, &file_name, &contents)
        })
        .await
    }

    fn handles(&self) -> (Arc<Dir>, Arc<str>, Arc<Mutex<()>>) {
        (
            Arc::clone(&self.dir),
            Arc::clone(&self.file_name),
            Arc::clone(&self.write_guard),
        )
    }

    async fn modify<F, T>(&self, change: F) -> ServerStoreResult<T>
    where
        F: FnOnce(&mut ConfigDocument) -> T + Send + 'static,
        T: Send + 'static,
    {
        let (dir, file_name, guard) = self.handles();
        run_blocking(move || {
            let _held = guard.lock().map_err(guard_poisoned)?;
            let mut document = read_document(&dir, &file_name)?;
            let outcome = change(&mut document);
            let contents =
                serde_json::to_string_pretty(&document).map_err(ServerStoreError::persistence)?;
            write_atomically(&dir, &file_name, &contents)?;
            Ok(outcome)
        })
        .await
    }
}

fn guard_poisoned(err: impl std::fmt::Display) -> ServerStoreError {
    ServerStoreError::persistence(std::io::Error::other(err.to_string()))
}

fn read_document(dir: &Dir, file_name: &str) -> ServerStoreResult<ConfigDocument> {
    let contents = match dir.read_to_string(file_name) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(ConfigDocument::default()),
        Err(err) => return Err(ServerStoreError::persistence(err)),
    };
    serde_json::from_str(&contents).map_err(ServerStoreError::invalid_persisted_data)
}

#[async_trait]
impl ConfigStore for JsonConfigFile {
    async fn load(&self) -> ServerStoreResult<ConfigDocument> {
        let (dir, file_name, _) = self.handles();
        run_blocking(move || read_document(&dir, &file_name)).await
    }

    async fn upsert_server(&self, server: &UpstreamServer) -> ServerStoreResult<()> {
        let server_entry = server.clone();
        self.modify(move |document| upsert_entry(&mut document.servers, &server_entry))
            .await
    }

    async fn remove_server(&self, name: &ServerName) -> ServerStoreResult<bool> {
        let server_name = name.clone();
        self.modify(move |document| remove_entry(&mut document.servers, &server_name))
            .await
    }
}

//! JSON file adapters for the durable store and the configuration file.
//!
//! Filesystem access goes through capability handles opened once at
//! construction. Every operation runs on the blocking thread pool.

mod config_file;
mod server_store;

pub use config_file::JsonConfigFile;
pub use server_store::JsonFileServerStore;

use crate::upstream::ports::{ServerStoreError, ServerStoreResult};
use camino::Utf8Path;
use cap_std::ambient_authority;
use cap_std::fs_utf8::Dir;

/// Runs a blocking filesystem operation off the async executor.
async fn run_blocking<F, T>(operation: F) -> ServerStoreResult<T>
where
    F: FnOnce() -> ServerStoreResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(operation)
        .await
        .map_err(ServerStoreError::persistence)?
}

/// Creates `path` if needed and opens it as a capability handle.
fn open_dir_all(path: &Utf8Path) -> ServerStoreResult<Dir> {
    Dir::create_ambient_dir_all(path, ambient_authority()).map_err(ServerStoreError::persistence)?;
    Dir::open_ambient_dir(path, ambient_authority()).map_err(ServerStoreError::persistence)
}

/// Writes `contents` to `file_name` through a temporary sibling and a
/// rename, so readers never observe a partial file.
fn write_atomically(dir: &Dir, file_name: &str, contents: &str) -> ServerStoreResult<()> {
    let temporary = format!(".{file_name}.tmp");
    dir.write(&temporary, contents)
        .map_err(ServerStoreError::persistence)?;
    dir.rename(&temporary, dir, file_name)
        .map_err(ServerStoreError::persistence)
}

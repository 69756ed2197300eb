//! In-memory adapters for stores and the runtime registry.

mod runtime;
mod store;

pub use runtime::RuntimeRegistry;
pub use store::{InMemoryConfigStore, InMemoryServerStore};
pub(crate) use store::{remove_entry, upsert_entry};

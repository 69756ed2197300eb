//! Adapter implementations for upstream stores, the runtime registry and
//! the connector.

pub mod file;
pub mod memory;

mod scripted;

pub use scripted::{ScriptedAttempt, ScriptedConnector};

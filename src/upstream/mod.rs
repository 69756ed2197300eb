//! Upstream server orchestration.
//!
//! Follows the same layering as the rest of the crate:
//!
//! - [`domain`]: server records, connection states and failure categories
//! - [`ports`]: connector, store and connection registry traits
//! - [`adapters`]: in-memory and JSON file stores, a scripted connector
//! - [`services`]: connection state machines, the failure policy and the
//!   persistence coordinator

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod services;

//! Domain model for upstream servers and their connections.
//!
//! The upstream domain models server identity, the configuration flags
//! shared by every store, runtime connection state and failure
//! classification. Infrastructure concerns remain outside this boundary.

mod connection;
mod error;
mod failure;
mod ids;
mod server;

pub use connection::{ConnectionState, ConnectionStatus};
pub use error::{ParseConnectionStateError, ParseFailureCategoryError, UpstreamDomainError};
pub use failure::{FailureCategory, auto_disable_reason};
pub use ids::{GroupName, ServerName};
pub use server::{ManualToggle, ServerStatusView, UpstreamServer};

//! Error types for upstream server domain validation and parsing.

use thiserror::Error;

/// Errors returned while constructing upstream domain values.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UpstreamDomainError {
    /// The server name is empty after trimming.
    #[error("upstream server name must not be empty")]
    EmptyServerName,

    /// The server name contains characters outside `[A-Za-z0-9_.-]`.
    #[error(
        "upstream server name '{0}' contains invalid characters (only alphanumerics, '-', '_' and '.' allowed)"
    )]
    InvalidServerName(String),

    /// The server name exceeds the 100-character storage limit.
    #[error("upstream server name exceeds 100 character limit: {0}")]
    ServerNameTooLong(String),

    /// The group name is empty after trimming.
    #[error("server group name must not be empty")]
    EmptyGroupName,

    /// The group name contains control characters.
    #[error("server group name '{0}' contains control characters")]
    InvalidGroupName(String),

    /// The group name exceeds the 100-character storage limit.
    #[error("server group name exceeds 100 character limit: {0}")]
    GroupNameTooLong(String),
}

/// Error returned while parsing a connection state from its string form.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown upstream connection state: {0}")]
pub struct ParseConnectionStateError(pub String);

/// Error returned while parsing a failure category from its string form.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown failure category: {0}")]
pub struct ParseFailureCategoryError(pub String);

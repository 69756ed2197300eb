//! Validated name types for upstream servers and server groups.

use super::UpstreamDomainError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum length for a server or group name.
const MAX_NAME_LENGTH: usize = 100;

/// Validated upstream server name; the identity of an upstream server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ServerName(String);

impl ServerName {
    /// Creates a validated server name.
    ///
    /// The input is trimmed. Only characters in `[A-Za-z0-9_.-]` are
    /// accepted.
    ///
    /// # Errors
    ///
    /// Returns [`UpstreamDomainError`] when validation fails.
    pub fn new(value: impl Into<String>) -> Result<Self, UpstreamDomainError> {
        let normalized = value.into().trim().to_owned();

        if normalized.is_empty() {
            return Err(UpstreamDomainError::EmptyServerName);
        }

        let is_valid = normalized.chars().all(|character| {
            character.is_ascii_alphanumeric() || matches!(character, '-' | '_' | '.')
        });
        if !is_valid {
            return Err(UpstreamDomainError::InvalidServerName(normalized));
        }

        if normalized.len() > MAX_NAME_LENGTH {
            return Err(UpstreamDomainError::ServerNameTooLong(normalized));
        }

        Ok(Self(normalized))
    }

    /// Returns the server name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ServerName {
    type Error = UpstreamDomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ServerName> for String {
    fn from(value: ServerName) -> Self {
        value.0
    }
}

impl AsRef<str> for ServerName {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for ServerName {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Validated name of a server group used for bulk enable/disable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GroupName(String);

impl GroupName {
    /// Creates a validated group name.
    ///
    /// Group names are free-form display labels; they are trimmed and must
    /// not contain control characters.
    ///
    /// # Errors
    ///
    /// Returns [`UpstreamDomainError`] when validation fails.
    pub fn new(value: impl Into<String>) -> Result<Self, UpstreamDomainError> {
        let normalized = value.into().trim().to_owned();

        if normalized.is_empty() {
            return Err(UpstreamDomainError::EmptyGroupName);
        }

        if normalized.chars().any(char::is_control) {
            return Err(UpstreamDomainError::InvalidGroupName(normalized));
        }

        if normalized.chars().count() > MAX_NAME_LENGTH {
            return Err(UpstreamDomainError::GroupNameTooLong(normalized));
        }

        Ok(Self(normalized))
    }

    /// Returns the group name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for GroupName {
    type Error = UpstreamDomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<GroupName> for String {
    fn from(value: GroupName) -> Self {
        value.0
    }
}

impl fmt::Display for GroupName {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("github-mcp")]
    #[case("  workspace_tools ")]
    #[case("search.v2")]
    fn server_name_accepts_common_forms(#[case] raw: &str) {
        let name = ServerName::new(raw).expect("valid server name");
        assert_eq!(name.as_str(), raw.trim());
    }

    #[rstest]
    #[case("", UpstreamDomainError::EmptyServerName)]
    #[case("   ", UpstreamDomainError::EmptyServerName)]
    #[case("bad name", UpstreamDomainError::InvalidServerName("bad name".to_owned()))]
    fn server_name_rejects_invalid_input(
        #[case] raw: &str,
        #[case] expected: UpstreamDomainError,
    ) {
        assert_eq!(ServerName::new(raw), Err(expected));
    }

    #[test]
    fn server_name_rejects_overlong_input() {
        let raw = "a".repeat(101);
        assert!(matches!(
            ServerName::new(raw),
            Err(UpstreamDomainError::ServerNameTooLong(_))
        ));
    }

    #[test]
    fn server_name_deserialization_validates() {
        let parsed: Result<ServerName, _> = serde_json::from_str("\"has space\"");
        assert!(parsed.is_err());
    }

    #[test]
    fn group_name_allows_spaces_but_not_control_characters() {
        assert!(GroupName::new("Dev Tools").is_ok());
        assert!(matches!(
            GroupName::new("dev\ttools"),
            Err(UpstreamDomainError::InvalidGroupName(_))
        ));
    }
}

//! Classification of connection failures into operator-facing categories.

use super::ParseFailureCategoryError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Broad cause of a connection failure, derived from its message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    /// The attempt timed out.
    Timeout,
    /// The server command or one of its packages could not be found.
    MissingPackage,
    /// Authentication or authorisation was rejected.
    OAuth,
    /// The server configuration is invalid or incomplete.
    Config,
    /// The endpoint could not be reached.
    Network,
    /// The process lacked filesystem or execution permissions.
    Permission,
    /// No known pattern matched.
    Unknown,
}

const TIMEOUT_MARKERS: &[&str] = &["timeout", "timed out", "deadline exceeded"];
const MISSING_PACKAGE_MARKERS: &[&str] = &[
    "cannot find module",
    "modulenotfounderror",
    "command not found",
    "no such file",
    "enoent",
];
const OAUTH_MARKERS: &[&str] = &["oauth", "unauthorized", "401", "authentication"];
const CONFIG_MARKERS: &[&str] = &["config", "invalid", "missing required", "env"];
const NETWORK_MARKERS: &[&str] = &[
    "connection refused",
    "network",
    "dial tcp",
    "no route to host",
];
const PERMISSION_MARKERS: &[&str] = &["permission denied", "access denied"];

impl FailureCategory {
    /// Classifies a failure message.
    ///
    /// Patterns are checked in a fixed priority order so that, for example,
    /// an authentication timeout is reported as a timeout.
    #[must_use]
    pub fn classify(message: &str) -> Self {
        let lowered = message.to_ascii_lowercase();
        let matches_any = |markers: &[&str]| markers.iter().any(|marker| lowered.contains(marker));

        if lowered.trim().is_empty() {
            Self::Unknown
        } else if matches_any(TIMEOUT_MARKERS) {
            Self::Timeout
        } else if matches_any(MISSING_PACKAGE_MARKERS) {
            Self::MissingPackage
        } else if matches_any(OAUTH_MARKERS) {
            Self::OAuth
        } else if matches_any(CONFIG_MARKERS) {
            Self::Config
        } else if matches_any(NETWORK_MARKERS) {
            Self::Network
        } else if matches_any(PERMISSION_MARKERS) {
            Self::Permission
        } else {
            Self::Unknown
        }
    }

    /// Returns the canonical storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::MissingPackage => "missing_package",
            Self::OAuth => "oauth",
            Self::Config => "config",
            Self::Network => "network",
            Self::Permission => "permission",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

impl TryFrom<&str> for FailureCategory {
    type Error = ParseFailureCategoryError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let normalized = value.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "timeout" => Ok(Self::Timeout),
            "missing_package" => Ok(Self::MissingPackage),
            "oauth" => Ok(Self::OAuth),
            "config" => Ok(Self::Config),
            "network" => Ok(Self::Network),
            "permission" => Ok(Self::Permission),
            "unknown" => Ok(Self::Unknown),
            _ => Err(ParseFailureCategoryError(value.to_owned())),
        }
    }
}

/// Builds the human-readable reason stored on an auto-disabled server.
#[must_use]
pub fn auto_disable_reason(consecutive_failures: u32, last_error: Option<&str>) -> String {
    let message = last_error.map_or("", str::trim);
    let category = FailureCategory::classify(message);
    if message.is_empty() {
        format!("auto-disabled after {consecutive_failures} consecutive failures ({category})")
    } else {
        format!(
            "auto-disabled after {consecutive_failures} consecutive failures ({category}): {message}"
        )
    }
}

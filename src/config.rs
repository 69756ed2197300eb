//! Orchestration tunables.
//!
//! Settings are plain data with defaults for every field, so a partial
//! `settings` object in the configuration document is enough.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Failures tolerated before a server is auto-disabled, unless overridden
/// per server.
pub const DEFAULT_AUTO_DISABLE_THRESHOLD: u32 = 7;

/// Tunables shared by every orchestration component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorSettings {
    /// Threshold applied to servers without their own override.
    pub default_auto_disable_threshold: u32,
    /// Quiet period before pending status updates are flushed.
    pub debounce_ms: u64,
    /// Pending servers above which a flush rebuilds the whole status view.
    pub full_resync_threshold: usize,
    /// Queue capacity of each event bus subscription.
    pub subscription_capacity: usize,
    /// Whether failed connections are retried automatically.
    pub auto_reconnect: bool,
    /// First retry delay after a failed connection.
    pub retry_base_delay_ms: u64,
    /// Upper bound for the retry delay.
    pub retry_max_delay_ms: u64,
    /// Window after the first connection attempt during which auto-disable
    /// needs twice the usual failures. `0` turns the window off.
    pub startup_grace_period_ms: u64,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            default_auto_disable_threshold: DEFAULT_AUTO_DISABLE_THRESHOLD,
            debounce_ms: 100,
            full_resync_threshold: 5,
            subscription_capacity: 100,
            auto_reconnect: true,
            retry_base_delay_ms: 1_000,
            retry_max_delay_ms: 300_000, // 5 minutes
            startup_grace_period_ms: 0,
        }
    }
}

impl OrchestratorSettings {
    /// Creates settings where failed connections are only retried on
    /// explicit request.
    ///
    /// Useful for tests that drive every connection attempt themselves.
    #[must_use]
    pub fn manual_reconnect() -> Self {
        Self {
            auto_reconnect: false,
            ..Self::default()
        }
    }

    /// Returns the debounce window.
    #[must_use]
    pub const fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Returns the startup grace period, if enabled.
    #[must_use]
    pub const fn startup_grace_period(&self) -> Option<Duration> {
        if self.startup_grace_period_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.startup_grace_period_ms))
        }
    }

    /// Returns the delay before retrying after `consecutive_failures`.
    ///
    /// The delay doubles with every failure, starting from the base delay,
    /// and never exceeds the configured maximum.
    #[must_use]
    pub fn retry_delay(&self, consecutive_failures: u32) -> Duration {
        let exponent = consecutive_failures.saturating_sub(1);
        let factor = 1_u64.checked_shl(exponent).unwrap_or(u64::MAX);
        let millis = self
            .retry_base_delay_ms
            .saturating_mul(factor)
            .min(self.retry_max_delay_ms);
        Duration::from_millis(millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, 1_000)]
    #[case(1, 1_000)]
    #[case(2, 2_000)]
    #[case(4, 8_000)]
    #[case(9, 256_000)]
    #[case(10, 300_000)]
    #[case(200, 300_000)]
    fn retry_delay_doubles_up_to_cap(#[case] failures: u32, #[case] expected_ms: u64) {
        let settings = OrchestratorSettings::default();
        assert_eq!(
            settings.retry_delay(failures),
            Duration::from_millis(expected_ms)
        );
    }

    #[test]
    fn partial_settings_fill_in_defaults() {
        let settings: OrchestratorSettings =
            serde_json::from_str(r#"{"debounce_ms": 250}"#).expect("settings deserialize");
        assert_eq!(settings.debounce(), Duration::from_millis(250));
        assert_eq!(
            settings.default_auto_disable_threshold,
            DEFAULT_AUTO_DISABLE_THRESHOLD
        );
        assert_eq!(settings.startup_grace_period(), None);
    }
}

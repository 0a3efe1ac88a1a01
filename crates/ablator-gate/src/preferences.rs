//! Where the gate reads its timing from.

use std::time::Duration;

use ablator_config::{
    Config, DEFAULT_ABORT_POLL_MS, DEFAULT_FORCE_STOP_COUNTDOWN_SECS, DEFAULT_TOOL_TIMEOUT_SECS,
};

/// Bound used when the tool timeout is unlimited (`-1`): 30 days
pub const UNLIMITED_TIMEOUT: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Preferences consulted on every tool call, so a changed timeout applies to
/// the next call without rebuilding the gate.
pub trait GatePreferences: Send + Sync {
    /// Per-call timeout in seconds; `-1` means no practical limit.
    fn tool_timeout_secs(&self) -> i64;
}

impl GatePreferences for Config {
    fn tool_timeout_secs(&self) -> i64 {
        Config::tool_timeout_secs(self)
    }
}

/// Fixed preferences for embedding and tests
#[derive(Debug, Clone, Copy)]
pub struct StaticPreferences {
    pub tool_timeout_secs: i64,
}

impl Default for StaticPreferences {
    fn default() -> Self {
        Self {
            tool_timeout_secs: DEFAULT_TOOL_TIMEOUT_SECS,
        }
    }
}

impl GatePreferences for StaticPreferences {
    fn tool_timeout_secs(&self) -> i64 {
        self.tool_timeout_secs
    }
}

/// Turn a configured timeout into a concrete bound.
///
/// Non-positive values (the documented one is `-1`) map to [`UNLIMITED_TIMEOUT`],
/// never to a truly infinite wait.
#[must_use]
pub fn effective_timeout(secs: i64) -> Duration {
    match u64::try_from(secs) {
        Ok(secs) if secs > 0 => Duration::from_secs(secs),
        _ => UNLIMITED_TIMEOUT,
    }
}

/// Poll cadence and countdown of the abort machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateOptions {
    pub abort_poll_interval: Duration,
    pub force_stop_countdown: Duration,
}

impl Default for GateOptions {
    fn default() -> Self {
        Self {
            abort_poll_interval: Duration::from_millis(DEFAULT_ABORT_POLL_MS),
            force_stop_countdown: Duration::from_secs(DEFAULT_FORCE_STOP_COUNTDOWN_SECS),
        }
    }
}

impl GateOptions {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            abort_poll_interval: config.abort_poll_interval(),
            force_stop_countdown: config.force_stop_countdown(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_timeout() {
        assert_eq!(effective_timeout(30), Duration::from_secs(30));
        assert_eq!(effective_timeout(-1), UNLIMITED_TIMEOUT);
        assert_eq!(effective_timeout(0), UNLIMITED_TIMEOUT);
    }

    #[test]
    fn test_config_preferences() {
        let config = Config::builder()
            .home("/tmp/ablator-test")
            .tool_timeout_secs(-1)
            .build()
            .unwrap();
        let prefs: &dyn GatePreferences = &config;
        assert_eq!(effective_timeout(prefs.tool_timeout_secs()), UNLIMITED_TIMEOUT);
        assert_eq!(GateOptions::from_config(&config), GateOptions::default());
    }
}

//! Probe scheduling and hysteresis parameters.

use std::time::Duration;

use crate::error::{ConfigError, ConfigResult};

/// Default per-probe timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default delay between probes.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);
/// Default consecutive successes needed to promote a subject.
pub const DEFAULT_SUCCESS_THRESHOLD: u32 = 1;
/// Default consecutive failures needed to demote a subject.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

/// Timing and threshold configuration for one subject's probe.
///
/// `with_*` methods return modified copies; a config is never shared
/// mutably between subjects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckConfig {
    /// Upper bound on one probe attempt.
    pub timeout: Duration,
    /// Pause between probe attempts.
    pub interval: Duration,
    /// Consecutive successes needed to promote to `Ready`.
    pub success_threshold: u32,
    /// Consecutive failures needed to demote to `Listening`.
    pub failure_threshold: u32,
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            interval: DEFAULT_INTERVAL,
            success_threshold: DEFAULT_SUCCESS_THRESHOLD,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
        }
    }
}

impl CheckConfig {
    /// Create a config populated with the defaults.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        Self { timeout, ..self }
    }

    pub fn with_interval(self, interval: Duration) -> Self {
        Self { interval, ..self }
    }

    pub fn with_success_threshold(self, success_threshold: u32) -> Self {
        Self {
            success_threshold,
            ..self
        }
    }

    pub fn with_failure_threshold(self, failure_threshold: u32) -> Self {
        Self {
            failure_threshold,
            ..self
        }
    }

    /// Reject any non-positive field. Values are never silently defaulted.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout);
        }
        if self.interval.is_zero() {
            return Err(ConfigError::InvalidInterval);
        }
        if self.success_threshold == 0 {
            return Err(ConfigError::InvalidSuccessThreshold);
        }
        if self.failure_threshold == 0 {
            return Err(ConfigError::InvalidFailureThreshold);
        }
        Ok(())
    }
}

/// Parse a duration string like "5s", "500ms", "2m", or bare seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.trim().parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.trim().parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.trim()
            .parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

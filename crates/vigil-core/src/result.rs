//! Probe outcomes and the reporting values derived from them.

use std::fmt;
use std::time::{Duration, SystemTime};

use serde::Serialize;

use crate::error::ProbeError;

/// Externally visible health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    #[default]
    Unknown,
    Healthy,
    Degraded,
    Unhealthy,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Unknown => "unknown",
            Status::Healthy => "healthy",
            Status::Degraded => "degraded",
            Status::Unhealthy => "unhealthy",
        };
        f.write_str(s)
    }
}

/// Outcome of a single probe attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckResult {
    /// Whether the probe passed.
    pub success: bool,
    /// Time from probe start to outcome.
    pub latency: Duration,
    /// Human-readable detail, or captured command output for exec probes.
    pub output: String,
    /// Set exactly when `success` is false.
    pub error: Option<ProbeError>,
}

impl CheckResult {
    pub fn success(latency: Duration, output: impl Into<String>) -> Self {
        Self {
            success: true,
            latency,
            output: output.into(),
            error: None,
        }
    }

    pub fn failure(latency: Duration, output: impl Into<String>, error: ProbeError) -> Self {
        Self {
            success: false,
            latency,
            output: output.into(),
            error: Some(error),
        }
    }
}

/// A health report for one check, suitable for audit output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthResult {
    /// `Healthy` or `Unhealthy` for probe-derived results.
    pub status: Status,
    /// Detail copied from the probe output.
    pub message: String,
    /// Probe latency.
    pub duration: Duration,
    /// When the result was recorded.
    pub timestamp: SystemTime,
    /// Underlying error for unhealthy results.
    pub error: Option<ProbeError>,
}

impl HealthResult {
    pub fn healthy(message: impl Into<String>, duration: Duration) -> Self {
        Self::healthy_at(message, duration, SystemTime::now())
    }

    /// Healthy result with an explicit timestamp, for replay and tests.
    pub fn healthy_at(message: impl Into<String>, duration: Duration, timestamp: SystemTime) -> Self {
        Self {
            status: Status::Healthy,
            message: message.into(),
            duration,
            timestamp,
            error: None,
        }
    }

    pub fn unhealthy(
        message: impl Into<String>,
        duration: Duration,
        error: Option<ProbeError>,
    ) -> Self {
        Self::unhealthy_at(message, duration, error, SystemTime::now())
    }

    pub fn unhealthy_at(
        message: impl Into<String>,
        duration: Duration,
        error: Option<ProbeError>,
        timestamp: SystemTime,
    ) -> Self {
        Self {
            status: Status::Unhealthy,
            message: message.into(),
            duration,
            timestamp,
            error,
        }
    }

    /// Report a probe outcome, stamped now.
    pub fn from_check(result: &CheckResult) -> Self {
        if result.success {
            Self::healthy(result.output.clone(), result.latency)
        } else {
            Self::unhealthy(result.output.clone(), result.latency, result.error.clone())
        }
    }
}

/// A status change emitted for a named checker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Event {
    pub checker: String,
    pub status: Status,
    pub result: HealthResult,
    pub timestamp: SystemTime,
}

impl Event {
    pub fn new(checker: impl Into<String>, status: Status, result: HealthResult) -> Self {
        Self::new_at(checker, status, result, SystemTime::now())
    }

    pub fn new_at(
        checker: impl Into<String>,
        status: Status,
        result: HealthResult,
        timestamp: SystemTime,
    ) -> Self {
        Self {
            checker: checker.into(),
            status,
            result,
            timestamp,
        }
    }
}

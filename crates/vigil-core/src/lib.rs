//! vigil-core — health-supervision core for the Vigil daemon.
//!
//! Turns noisy probe outcomes into a stable, actionable status.
//!
//! # Architecture
//!
//! ```text
//! CheckResult (one probe attempt)
//!   └── SubjectStatus::evaluate_probe_result() → ProbeEvaluation
//!         └── transition::settle()
//!               ├── StateAuthority::accept() ── owner confirms or vetoes
//!               ├── apply_probe_evaluation()  ── on accept
//!               └── reset_counters()          ── on veto
//!
//! AggregatedHealth
//!   ├── ProcessState (running or not)
//!   ├── Vec<SubjectStatus>
//!   └── custom_status override → Status
//! ```
//!
//! # Hysteresis
//!
//! A subject is promoted to `Ready` only after `success_threshold`
//! consecutive successes and demoted to `Listening` only after
//! `failure_threshold` consecutive failures. Closed, stopped, and failed
//! states are reported by the subject's owner, never inferred from probes.

pub mod aggregation;
pub mod config;
pub mod error;
pub mod result;
pub mod subject;
pub mod target;
pub mod transition;

pub use aggregation::{AggregatedHealth, ProcessState, CUSTOM_STATUS_HEALTHY};
pub use config::{
    parse_duration, CheckConfig, DEFAULT_FAILURE_THRESHOLD, DEFAULT_INTERVAL,
    DEFAULT_SUCCESS_THRESHOLD, DEFAULT_TIMEOUT,
};
pub use error::{ConfigError, ConfigResult, ProbeError};
pub use result::{CheckResult, Event, HealthResult, Status};
pub use subject::{
    ProbeEvaluation, Proposal, SubjectKind, SubjectSnapshot, SubjectSource, SubjectState,
    SubjectStatus,
};
pub use target::Target;
pub use transition::{settle, Settlement, StateAuthority};

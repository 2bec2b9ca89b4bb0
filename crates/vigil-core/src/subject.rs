//! Subject states and the threshold hysteresis machine.
//!
//! A subject is anything supervised by name: a network listener or a
//! managed process. Its authoritative state lives elsewhere; this module
//! only sees it through a [`SubjectSnapshot`] and proposes changes through
//! [`ProbeEvaluation`] values that the owner may accept or veto.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::CheckConfig;
use crate::result::HealthResult;

/// Health-facing projection of a subject's lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectState {
    #[default]
    Unknown,
    Ready,
    Listening,
    Closed,
    Running,
    Stopped,
    Failed,
}

impl SubjectState {
    /// All variants, in declaration order.
    pub const ALL: [SubjectState; 7] = [
        SubjectState::Unknown,
        SubjectState::Ready,
        SubjectState::Listening,
        SubjectState::Closed,
        SubjectState::Running,
        SubjectState::Stopped,
        SubjectState::Failed,
    ];

    /// Ready to serve traffic.
    pub fn is_ready(self) -> bool {
        matches!(self, SubjectState::Ready | SubjectState::Running)
    }

    /// Accepting connections. `Ready` counts as listening.
    pub fn is_listening(self) -> bool {
        matches!(self, SubjectState::Listening | SubjectState::Ready)
    }

    pub fn is_closed(self) -> bool {
        matches!(
            self,
            SubjectState::Closed | SubjectState::Stopped | SubjectState::Failed
        )
    }
}

impl fmt::Display for SubjectState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SubjectState::Unknown => "unknown",
            SubjectState::Ready => "ready",
            SubjectState::Listening => "listening",
            SubjectState::Closed => "closed",
            SubjectState::Running => "running",
            SubjectState::Stopped => "stopped",
            SubjectState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// What kind of unit a subject is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectKind {
    #[default]
    Listener,
    Process,
}

/// A subject's state as projected by its owning subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectSnapshot {
    pub name: String,
    pub kind: SubjectKind,
    pub state: SubjectState,
}

impl SubjectSnapshot {
    pub fn new(name: impl Into<String>, kind: SubjectKind, state: SubjectState) -> Self {
        Self {
            name: name.into(),
            kind,
            state,
        }
    }
}

/// Translation boundary for external subject types.
///
/// Listener registries and process tables implement this to map their own
/// concrete state onto [`SubjectState`]; the core never names their types.
pub trait SubjectSource {
    fn snapshot(&self) -> SubjectSnapshot;
}

/// A proposed state and counter update. Pure data; discarding it is safe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeEvaluation {
    /// Whether a threshold was reached and `target_state` should be taken.
    pub should_transition: bool,
    /// Proposed state; the current one when no threshold was reached.
    pub target_state: SubjectState,
    /// Consecutive successes after this outcome.
    pub new_success_count: u32,
    /// Consecutive failures after this outcome.
    pub new_failure_count: u32,
}

/// Mutable health record for one monitored subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubjectStatus {
    /// Unique subject name.
    pub name: String,
    /// Last state accepted by the subject's owner.
    pub state: SubjectState,
    /// Most recent probe outcome, if any probe has run.
    pub last_probe_result: Option<HealthResult>,
    /// Successes since the last failure. Zero whenever failures is non-zero.
    pub consecutive_successes: u32,
    /// Failures since the last success. Zero whenever successes is non-zero.
    pub consecutive_failures: u32,
}

impl SubjectStatus {
    pub fn new(name: impl Into<String>, state: SubjectState) -> Self {
        Self {
            name: name.into(),
            state,
            last_probe_result: None,
            consecutive_successes: 0,
            consecutive_failures: 0,
        }
    }

    pub fn from_snapshot(snapshot: &SubjectSnapshot) -> Self {
        Self::new(snapshot.name.clone(), snapshot.state)
    }

    pub fn set_last_probe_result(&mut self, result: HealthResult) {
        self.last_probe_result = Some(result);
    }

    pub fn set_state(&mut self, state: SubjectState) {
        self.state = state;
    }

    pub fn is_ready(&self) -> bool {
        self.state.is_ready()
    }

    pub fn is_listening(&self) -> bool {
        self.state.is_listening()
    }

    /// Compute the counter and state update for one probe outcome.
    ///
    /// Does not mutate `self`. Successes propose `Ready` once the count
    /// reaches `success_threshold`; failures propose `Listening` once it
    /// reaches `failure_threshold`. A probe can never propose a closed
    /// state: only the subject's owner reports those.
    pub fn evaluate_probe_result(
        &self,
        success: bool,
        success_threshold: u32,
        failure_threshold: u32,
    ) -> ProbeEvaluation {
        if success {
            let successes = self.consecutive_successes.saturating_add(1);
            let reached = successes >= success_threshold;
            return ProbeEvaluation {
                should_transition: reached,
                target_state: if reached { SubjectState::Ready } else { self.state },
                new_success_count: successes,
                new_failure_count: 0,
            };
        }

        let failures = self.consecutive_failures.saturating_add(1);
        let reached = failures >= failure_threshold;
        ProbeEvaluation {
            should_transition: reached,
            target_state: if reached { SubjectState::Listening } else { self.state },
            new_success_count: 0,
            new_failure_count: failures,
        }
    }

    /// Commit an evaluation. The state changes only if it proposes a transition.
    pub fn apply_probe_evaluation(&mut self, eval: ProbeEvaluation) {
        self.consecutive_successes = eval.new_success_count;
        self.consecutive_failures = eval.new_failure_count;
        if eval.should_transition {
            self.state = eval.target_state;
        }
    }

    /// Zero both counters, leaving the state alone.
    pub fn reset_counters(&mut self) {
        self.consecutive_successes = 0;
        self.consecutive_failures = 0;
    }

    /// Evaluate a probe outcome against `config` thresholds and hold the
    /// result as an uncommitted [`Proposal`].
    pub fn propose(&mut self, success: bool, config: &CheckConfig) -> Proposal<'_> {
        let evaluation =
            self.evaluate_probe_result(success, config.success_threshold, config.failure_threshold);
        Proposal {
            status: self,
            evaluation,
        }
    }
}

/// An evaluation bound to the status it would update.
///
/// Consume it with [`commit`](Proposal::commit) once the subject's owner
/// has accepted the change, or [`rollback`](Proposal::rollback) when it
/// vetoes.
#[must_use = "a proposal does nothing until committed or rolled back"]
#[derive(Debug)]
pub struct Proposal<'a> {
    status: &'a mut SubjectStatus,
    evaluation: ProbeEvaluation,
}

impl Proposal<'_> {
    pub fn evaluation(&self) -> &ProbeEvaluation {
        &self.evaluation
    }

    pub fn subject(&self) -> &str {
        &self.status.name
    }

    pub fn commit(self) {
        self.status.apply_probe_evaluation(self.evaluation);
    }

    /// Record that a probe happened without taking its proposed state.
    pub fn rollback(self) {
        self.status.reset_counters();
    }
}

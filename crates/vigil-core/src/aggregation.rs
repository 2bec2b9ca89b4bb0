//! Aggregation of process liveness, subject states, and operator override
//! into one externally visible [`Status`].

use std::fmt;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use crate::result::Status;
use crate::subject::{SubjectState, SubjectStatus};

/// Custom status value that means "no override".
pub const CUSTOM_STATUS_HEALTHY: &str = "HEALTHY";

/// Lifecycle state of the supervised process, as reported by its owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
    Failed,
}

impl ProcessState {
    pub fn is_running(self) -> bool {
        self == ProcessState::Running
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProcessState::Stopped => "stopped",
            ProcessState::Starting => "starting",
            ProcessState::Running => "running",
            ProcessState::Stopping => "stopping",
            ProcessState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Combined health of one supervised service.
///
/// Single writer: the supervising loop owns it mutably. Any number of
/// readers may call [`status`](Self::status) on a shared reference.
#[derive(Debug, Clone, Serialize)]
pub struct AggregatedHealth {
    pub process_state: ProcessState,
    pub subjects: Vec<SubjectStatus>,
    /// Operator override such as `"DRAINING"` or `"MAINTENANCE"`. Empty or
    /// `"HEALTHY"` means normal operation.
    pub custom_status: String,
    pub last_check: SystemTime,
    /// Latest probe latency.
    pub latency: Duration,
}

impl AggregatedHealth {
    pub fn new(process_state: ProcessState) -> Self {
        Self {
            process_state,
            subjects: Vec::new(),
            custom_status: String::new(),
            last_check: SystemTime::now(),
            latency: Duration::ZERO,
        }
    }

    pub fn add_subject(&mut self, name: impl Into<String>, state: SubjectState) {
        self.subjects.push(SubjectStatus::new(name, state));
    }

    /// Insert `status`, replacing any existing subject with the same name.
    pub fn upsert_subject(&mut self, status: SubjectStatus) {
        match self.subject_mut(&status.name) {
            Some(existing) => *existing = status,
            None => self.subjects.push(status),
        }
    }

    pub fn subject(&self, name: &str) -> Option<&SubjectStatus> {
        self.subjects.iter().find(|s| s.name == name)
    }

    pub fn subject_mut(&mut self, name: &str) -> Option<&mut SubjectStatus> {
        self.subjects.iter_mut().find(|s| s.name == name)
    }

    pub fn set_custom_status(&mut self, status: impl Into<String>) {
        self.custom_status = status.into();
        self.last_check = SystemTime::now();
    }

    pub fn set_latency(&mut self, latency: Duration) {
        self.latency = latency;
    }

    pub fn set_process_state(&mut self, state: ProcessState) {
        self.process_state = state;
    }

    /// Overall status. First match wins:
    ///
    /// 1. process not running → `Unhealthy`
    /// 2. subjects not all ready → `Degraded` if any is listening, else
    ///    `Unhealthy`
    /// 3. custom override set → `Degraded`
    /// 4. `Healthy`
    pub fn status(&self) -> Status {
        if !self.process_state.is_running() {
            return Status::Unhealthy;
        }

        let subjects = self.subject_status();
        if subjects != Status::Healthy {
            return subjects;
        }

        if !self.custom_status.is_empty() && self.custom_status != CUSTOM_STATUS_HEALTHY {
            return Status::Degraded;
        }

        Status::Healthy
    }

    fn subject_status(&self) -> Status {
        if self.all_listeners_ready() {
            Status::Healthy
        } else if self.subjects.iter().any(SubjectStatus::is_listening) {
            Status::Degraded
        } else {
            Status::Unhealthy
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status() == Status::Healthy
    }

    pub fn is_degraded(&self) -> bool {
        self.status() == Status::Degraded
    }

    pub fn is_unhealthy(&self) -> bool {
        self.status() == Status::Unhealthy
    }

    /// True when every subject is ready, including when there are none.
    pub fn all_listeners_ready(&self) -> bool {
        self.subjects.iter().all(SubjectStatus::is_ready)
    }

    pub fn ready_listener_count(&self) -> usize {
        self.subjects.iter().filter(|s| s.is_ready()).count()
    }

    pub fn total_listener_count(&self) -> usize {
        self.subjects.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running_with(subjects: &[(&str, SubjectState)]) -> AggregatedHealth {
        let mut h = AggregatedHealth::new(ProcessState::Running);
        for (name, state) in subjects {
            h.add_subject(*name, *state);
        }
        h
    }

    #[test]
    fn new_health_is_empty() {
        let h = AggregatedHealth::new(ProcessState::Running);
        assert!(h.subjects.is_empty());
        assert!(h.custom_status.is_empty());
        assert_eq!(h.latency, Duration::ZERO);
    }

    #[test]
    fn ready_subject_is_healthy() {
        let h = running_with(&[("http", SubjectState::Ready)]);
        assert_eq!(h.status(), Status::Healthy);
        assert!(h.is_healthy());
    }

    #[test]
    fn draining_override_degrades() {
        let mut h = running_with(&[("http", SubjectState::Ready)]);
        h.set_custom_status("DRAINING");
        assert_eq!(h.status(), Status::Degraded);

        h.set_custom_status(CUSTOM_STATUS_HEALTHY);
        assert_eq!(h.status(), Status::Healthy);
    }

    #[test]
    fn listening_subject_degrades() {
        let h = running_with(&[("grpc", SubjectState::Listening)]);
        assert_eq!(h.status(), Status::Degraded);
        assert!(h.is_degraded());
    }

    #[test]
    fn closed_subjects_are_unhealthy() {
        let h = running_with(&[("a", SubjectState::Closed), ("b", SubjectState::Failed)]);
        assert_eq!(h.status(), Status::Unhealthy);
    }

    #[test]
    fn stopped_process_wins_over_everything() {
        for state in SubjectState::ALL {
            let mut h = running_with(&[("http", state)]);
            h.set_custom_status("");
            h.set_process_state(ProcessState::Stopped);
            assert_eq!(h.status(), Status::Unhealthy);
            assert!(h.is_unhealthy());
        }
    }

    #[test]
    fn no_subjects_defers_to_custom_status() {
        let mut h = AggregatedHealth::new(ProcessState::Running);
        assert_eq!(h.status(), Status::Healthy);
        h.set_custom_status("MAINTENANCE");
        assert_eq!(h.status(), Status::Degraded);
    }

    #[test]
    fn subject_failure_beats_custom_status() {
        let mut h = running_with(&[("a", SubjectState::Stopped)]);
        h.set_custom_status("DRAINING");
        assert_eq!(h.status(), Status::Unhealthy);
    }

    #[test]
    fn counts() {
        let h = running_with(&[
            ("a", SubjectState::Ready),
            ("b", SubjectState::Running),
            ("c", SubjectState::Listening),
        ]);
        assert!(!h.all_listeners_ready());
        assert_eq!(h.ready_listener_count(), 2);
        assert_eq!(h.total_listener_count(), 3);
    }

    #[test]
    fn upsert_replaces_by_name() {
        let mut h = running_with(&[("a", SubjectState::Listening)]);
        h.upsert_subject(SubjectStatus::new("a", SubjectState::Ready));
        h.upsert_subject(SubjectStatus::new("b", SubjectState::Ready));
        assert_eq!(h.total_listener_count(), 2);
        assert_eq!(h.subject("a").map(|s| s.state), Some(SubjectState::Ready));
    }
}

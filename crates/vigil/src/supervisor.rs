//! Probe rounds: run every subject's probe concurrently, then settle each
//! outcome through the hysteresis machine and the state owner.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use vigil_core::{
    settle, AggregatedHealth, CheckConfig, CheckResult, Event, HealthResult, ProbeError,
    ProcessState, Settlement, StateAuthority, SubjectKind, SubjectSnapshot, SubjectSource,
    SubjectState, SubjectStatus, Target,
};
use vigil_probe::{Factory, ProbeContext, Prober};

use crate::config::VigilConfig;

/// Owner of declared subject states for a standalone run.
///
/// Listener subjects accept any probe-driven transition unless declared
/// closed. Process subjects veto: their state comes from the process table,
/// never from probes.
#[derive(Debug, Default)]
pub struct StaticAuthority {
    declared: HashMap<String, SubjectSnapshot>,
}

impl StaticAuthority {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subject as its source projects it.
    pub fn declare(&mut self, snapshot: SubjectSnapshot) {
        self.declared.insert(snapshot.name.clone(), snapshot);
    }
}

impl StateAuthority for StaticAuthority {
    fn accept(&mut self, subject: &str, target: SubjectState) -> bool {
        match self.declared.get_mut(subject) {
            Some(snapshot) if snapshot.kind == SubjectKind::Listener && !snapshot.state.is_closed() => {
                snapshot.state = target;
                true
            }
            _ => false,
        }
    }

    fn current(&self, subject: &str) -> SubjectState {
        self.declared
            .get(subject)
            .map(|snapshot| snapshot.state)
            .unwrap_or_default()
    }
}

struct Supervised {
    name: String,
    target: Target,
    check: CheckConfig,
    prober: Arc<Prober>,
}

pub struct Supervisor {
    subjects: Vec<Supervised>,
    health: AggregatedHealth,
    authority: StaticAuthority,
}

impl Supervisor {
    /// Validate `config` and build one prober per subject.
    pub fn from_config(config: &VigilConfig, process_state: ProcessState) -> anyhow::Result<Self> {
        config.validate()?;
        let default_timeout = config.default_timeout()?;
        let factory = Factory::new(default_timeout);

        let mut health = AggregatedHealth::new(process_state);
        let mut authority = StaticAuthority::new();
        let mut subjects = Vec::with_capacity(config.subjects.len());

        for subject in &config.subjects {
            let prober = subject.build_prober(&factory)?;
            info!(
                subject = %subject.name,
                probe = %prober.kind(),
                timeout = ?prober.timeout(),
                "subject registered"
            );
            let snapshot = subject.snapshot();
            health.upsert_subject(SubjectStatus::from_snapshot(&snapshot));
            authority.declare(snapshot);
            subjects.push(Supervised {
                name: subject.name.clone(),
                target: subject.target(),
                check: subject.check_config(default_timeout)?,
                prober: Arc::new(prober),
            });
        }

        if !config.custom_status.is_empty() {
            health.set_custom_status(config.custom_status.clone());
        }

        Ok(Self {
            subjects,
            health,
            authority,
        })
    }

    pub fn health(&self) -> &AggregatedHealth {
        &self.health
    }

    pub fn set_custom_status(&mut self, status: impl Into<String>) {
        self.health.set_custom_status(status);
    }

    /// Shortest probe interval across subjects.
    pub fn min_interval(&self) -> Option<Duration> {
        self.subjects.iter().map(|s| s.check.interval).min()
    }

    /// Probe every subject once and settle the outcomes.
    pub async fn run_round(&mut self, cancel: &CancellationToken) -> Vec<Event> {
        let mut tasks = JoinSet::new();
        for (idx, subject) in self.subjects.iter().enumerate() {
            let prober = Arc::clone(&subject.prober);
            let target = subject.target.clone();
            let ctx = ProbeContext::new().with_cancellation(cancel.child_token());
            tasks.spawn(async move { (idx, prober.probe(&ctx, &target).await) });
        }

        let mut results: Vec<(usize, CheckResult)> = Vec::with_capacity(self.subjects.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => warn!(error = %e, "probe task failed"),
            }
        }
        results.sort_by_key(|(idx, _)| *idx);

        let mut events = Vec::with_capacity(results.len());
        let mut slowest = Duration::ZERO;
        for (idx, result) in results {
            let subject = &self.subjects[idx];
            slowest = slowest.max(result.latency);

            // Interrupted probes say nothing about the subject.
            if matches!(result.error, Some(ProbeError::Cancelled)) {
                debug!(subject = %subject.name, "probe cancelled, state kept");
                continue;
            }

            let Some(status) = self.health.subject_mut(&subject.name) else {
                continue;
            };
            let health_result = HealthResult::from_check(&result);
            status.set_last_probe_result(health_result.clone());

            let evaluation = status.evaluate_probe_result(
                result.success,
                subject.check.success_threshold,
                subject.check.failure_threshold,
            );
            match settle(status, evaluation, &mut self.authority) {
                Settlement::Unchanged => debug!(
                    subject = %subject.name,
                    success = result.success,
                    successes = status.consecutive_successes,
                    failures = status.consecutive_failures,
                    "probe recorded"
                ),
                Settlement::Committed(_) | Settlement::Vetoed(_) => {}
            }

            events.push(Event::new(
                subject.name.clone(),
                health_result.status,
                health_result,
            ));
        }

        self.health.set_latency(slowest);
        self.health.last_check = SystemTime::now();
        events
    }

    /// Run `rounds` probe rounds, pausing for the shortest interval between
    /// them. Stops early if `cancel` fires.
    pub async fn run(&mut self, rounds: u32, cancel: CancellationToken) {
        let pause = self.min_interval().unwrap_or(vigil_core::DEFAULT_INTERVAL);

        for round in 0..rounds {
            if round > 0 {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!(round, "probe rounds cancelled");
                        return;
                    }
                    _ = tokio::time::sleep(pause) => {}
                }
            }

            let events = self.run_round(&cancel).await;
            for event in &events {
                debug!(
                    subject = %event.checker,
                    status = %event.status,
                    message = %event.result.message,
                    "probe event"
                );
            }
            info!(
                round = round + 1,
                status = %self.health.status(),
                ready = self.health.ready_listener_count(),
                total = self.health.total_listener_count(),
                "probe round complete"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SubjectConfig;
    use vigil_core::Status;

    fn tcp_subject(name: &str, address: String, state: SubjectState) -> SubjectConfig {
        SubjectConfig {
            name: name.to_string(),
            kind: SubjectKind::Listener,
            state,
            probe: "tcp".to_string(),
            network: None,
            address,
            path: String::new(),
            service: String::new(),
            command: String::new(),
            args: Vec::new(),
            method: String::new(),
            status_code: 0,
            interval: Some("10ms".to_string()),
            timeout: Some("1s".to_string()),
            success_threshold: Some(1),
            failure_threshold: Some(1),
            icmp_mode: None,
            icmp_port: None,
            udp_payload: None,
            tls: false,
        }
    }

    fn closed_port() -> String {
        let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        l.local_addr().unwrap().to_string()
    }

    #[test]
    fn static_authority_rules() {
        let mut authority = StaticAuthority::new();
        authority.declare(SubjectSnapshot::new("web", SubjectKind::Listener, SubjectState::Listening));
        authority.declare(SubjectSnapshot::new("gone", SubjectKind::Listener, SubjectState::Closed));
        authority.declare(SubjectSnapshot::new("worker", SubjectKind::Process, SubjectState::Running));

        assert!(authority.accept("web", SubjectState::Ready));
        assert_eq!(authority.current("web"), SubjectState::Ready);
        assert!(!authority.accept("gone", SubjectState::Ready));
        assert!(!authority.accept("worker", SubjectState::Listening));
        assert_eq!(authority.current("worker"), SubjectState::Running);
        assert!(!authority.accept("nobody", SubjectState::Ready));
        assert_eq!(authority.current("nobody"), SubjectState::Unknown);
    }

    #[tokio::test]
    async fn reachable_listener_is_promoted() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let config = VigilConfig {
            subjects: vec![tcp_subject("web", addr, SubjectState::Listening)],
            ..Default::default()
        };

        let mut supervisor = Supervisor::from_config(&config, ProcessState::Running).unwrap();
        assert_eq!(supervisor.health().status(), Status::Degraded);

        let events = supervisor.run_round(&CancellationToken::new()).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].status, Status::Healthy);

        let web = supervisor.health().subject("web").unwrap();
        assert_eq!(web.state, SubjectState::Ready);
        assert!(web.last_probe_result.is_some());
        assert_eq!(supervisor.health().status(), Status::Healthy);
    }

    #[tokio::test]
    async fn unreachable_ready_listener_is_demoted() {
        let config = VigilConfig {
            subjects: vec![tcp_subject("db", closed_port(), SubjectState::Ready)],
            ..Default::default()
        };

        let mut supervisor = Supervisor::from_config(&config, ProcessState::Running).unwrap();
        supervisor.run_round(&CancellationToken::new()).await;

        let db = supervisor.health().subject("db").unwrap();
        assert_eq!(db.state, SubjectState::Listening);
        assert_eq!(db.consecutive_failures, 1);
        assert_eq!(supervisor.health().status(), Status::Degraded);
    }

    #[tokio::test]
    async fn process_subject_keeps_owner_state() {
        let mut worker = tcp_subject("worker", closed_port(), SubjectState::Running);
        worker.kind = SubjectKind::Process;
        let config = VigilConfig {
            subjects: vec![worker],
            ..Default::default()
        };

        let mut supervisor = Supervisor::from_config(&config, ProcessState::Running).unwrap();
        supervisor.run_round(&CancellationToken::new()).await;

        let status = supervisor.health().subject("worker").unwrap();
        assert_eq!(status.state, SubjectState::Running);
        assert_eq!(status.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn stopped_process_is_unhealthy_and_override_degrades() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let config = VigilConfig {
            custom_status: "DRAINING".to_string(),
            subjects: vec![tcp_subject("web", addr, SubjectState::Listening)],
            ..Default::default()
        };

        let mut supervisor = Supervisor::from_config(&config, ProcessState::Running).unwrap();
        supervisor.run(2, CancellationToken::new()).await;
        assert_eq!(supervisor.health().status(), Status::Degraded);

        supervisor.set_custom_status("HEALTHY");
        assert_eq!(supervisor.health().status(), Status::Healthy);

        let stopped = Supervisor::from_config(&config, ProcessState::Stopped).unwrap();
        assert_eq!(stopped.health().status(), Status::Unhealthy);
    }

    #[tokio::test]
    async fn cancelled_run_stops_between_rounds() {
        let config = VigilConfig {
            subjects: vec![tcp_subject("db", closed_port(), SubjectState::Listening)],
            ..Default::default()
        };
        let mut supervisor = Supervisor::from_config(&config, ProcessState::Running).unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        supervisor.run(5, cancel).await;
        let db = supervisor.health().subject("db").unwrap();
        assert_eq!(db.state, SubjectState::Listening);
        assert!(db.last_probe_result.is_none());
    }

    #[tokio::test]
    async fn cancelled_round_keeps_ready_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let config = VigilConfig {
            subjects: vec![tcp_subject("web", addr, SubjectState::Ready)],
            ..Default::default()
        };
        let mut supervisor = Supervisor::from_config(&config, ProcessState::Running).unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let events = supervisor.run_round(&cancel).await;
        assert!(events.is_empty());

        let web = supervisor.health().subject("web").unwrap();
        assert_eq!(web.state, SubjectState::Ready);
        assert_eq!(web.consecutive_failures, 0);
        assert_eq!(supervisor.health().status(), Status::Healthy);
    }

    #[test]
    fn statuses_come_from_subject_snapshots() {
        let mut worker = tcp_subject("worker", "127.0.0.1:1".to_string(), SubjectState::Running);
        worker.kind = SubjectKind::Process;
        worker.timeout = None;
        let config = VigilConfig {
            default_timeout: Some("3s".to_string()),
            subjects: vec![worker],
            ..Default::default()
        };

        let supervisor = Supervisor::from_config(&config, ProcessState::Running).unwrap();
        let status = supervisor.health().subject("worker").unwrap();
        assert_eq!(status.state, SubjectState::Running);
        assert_eq!(supervisor.authority.current("worker"), SubjectState::Running);

        let supervised = &supervisor.subjects[0];
        assert_eq!(supervised.check.timeout, Duration::from_secs(3));
        assert_eq!(supervised.prober.timeout(), supervised.check.timeout);
    }
}

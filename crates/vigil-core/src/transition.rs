//! Evaluate → confirm → apply-or-reset.
//!
//! A subject's true state is owned by another subsystem (the bound socket,
//! the process table) which may refuse a promotion, for example when the
//! listener closed between probe start and evaluation. [`settle`] asks that
//! owner before committing, so the health record never claims a state the
//! owner does not hold.

use tracing::{debug, info, warn};

use crate::subject::{ProbeEvaluation, SubjectState, SubjectStatus};

/// The owner of a subject's authoritative state.
pub trait StateAuthority {
    /// Try to move `subject` to `target`. Returns `false` to veto.
    fn accept(&mut self, subject: &str, target: SubjectState) -> bool;

    /// The owner's current state for `subject`.
    fn current(&self, subject: &str) -> SubjectState;
}

/// How an evaluation was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// No transition was proposed; counters advanced.
    Unchanged,
    /// The owner accepted; the subject is now in this state.
    Committed(SubjectState),
    /// The owner refused; counters were reset and the subject holds the
    /// owner's observed state.
    Vetoed(SubjectState),
}

/// Settle `evaluation` against `status`, consulting `authority` for any
/// proposed transition.
pub fn settle<A>(status: &mut SubjectStatus, evaluation: ProbeEvaluation, authority: &mut A) -> Settlement
where
    A: StateAuthority + ?Sized,
{
    if !evaluation.should_transition {
        status.apply_probe_evaluation(evaluation);
        return Settlement::Unchanged;
    }

    let from = status.state;
    let to = evaluation.target_state;

    if authority.accept(&status.name, to) {
        status.apply_probe_evaluation(evaluation);
        if from != to {
            if to.is_ready() {
                info!(subject = %status.name, %from, %to, "subject promoted");
            } else {
                warn!(
                    subject = %status.name,
                    %from,
                    %to,
                    failures = status.consecutive_failures,
                    "subject demoted"
                );
            }
        } else {
            debug!(subject = %status.name, state = %to, "subject state confirmed");
        }
        return Settlement::Committed(to);
    }

    let observed = authority.current(&status.name);
    status.reset_counters();
    status.set_state(observed);
    warn!(
        subject = %status.name,
        proposed = %to,
        %observed,
        "state transition vetoed by owner"
    );
    Settlement::Vetoed(observed)
}

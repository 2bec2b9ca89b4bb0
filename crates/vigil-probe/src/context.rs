//! Caller-supplied deadline and cancellation for a probe.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use vigil_core::ProbeError;

/// Bounds one probe call.
///
/// Every adapter finishes by the earlier of its own timeout and
/// [`deadline`](Self::deadline), and returns promptly once the token is
/// cancelled. Cloning shares the token.
#[derive(Debug, Clone, Default)]
pub struct ProbeContext {
    deadline: Option<Instant>,
    cancel: CancellationToken,
}

impl ProbeContext {
    /// A context with no deadline and a fresh token.
    pub fn new() -> Self {
        Self::default()
    }

    /// A context that expires `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new().deadline_at(Instant::now() + timeout)
    }

    /// Set an absolute deadline.
    pub fn deadline_at(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Tie this context to an existing cancellation token.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Earlier of `now + timeout` and the context deadline.
    ///
    /// A zero `timeout` means the prober has none of its own.
    pub fn effective_deadline(&self, timeout: Duration) -> Instant {
        let own = (!timeout.is_zero()).then(|| Instant::now() + timeout);
        match (own, self.deadline) {
            (Some(own), Some(ctx)) => own.min(ctx),
            (Some(own), None) => own,
            (None, Some(ctx)) => ctx,
            (None, None) => Instant::now() + vigil_core::DEFAULT_TIMEOUT,
        }
    }

    /// Run `fut` until it completes, the token fires, or `deadline` passes.
    pub async fn run_until<F>(&self, deadline: Instant, fut: F) -> Result<F::Output, ProbeError>
    where
        F: Future,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ProbeError::Cancelled),
            res = tokio::time::timeout_at(deadline, fut) => res.map_err(|_| ProbeError::Timeout),
        }
    }

    /// [`run_until`](Self::run_until) with the effective deadline for `timeout`.
    pub async fn run<F>(&self, timeout: Duration, fut: F) -> Result<F::Output, ProbeError>
    where
        F: Future,
    {
        let deadline = self.effective_deadline(timeout);
        self.run_until(deadline, fut).await
    }
}

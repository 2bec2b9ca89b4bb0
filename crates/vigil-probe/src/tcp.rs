//! TCP connect probe.

use std::time::{Duration, Instant};

use tokio::net::TcpStream;
use tracing::debug;

use vigil_core::{CheckResult, ProbeError, Target};

use crate::context::ProbeContext;
use crate::net;

/// Succeeds when a TCP connection is established before the deadline.
/// No data is exchanged.
#[derive(Debug, Clone)]
pub struct TcpProber {
    timeout: Duration,
}

impl TcpProber {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn probe(&self, ctx: &ProbeContext, target: &Target) -> CheckResult {
        let start = Instant::now();
        let network = if target.network.is_empty() { "tcp" } else { target.network.as_str() };

        let dialed = ctx
            .run(self.timeout, async {
                let addr = net::resolve(network, &target.address).await?;
                TcpStream::connect(addr)
                    .await
                    .map_err(|e| ProbeError::Connect(e.to_string()))
            })
            .await
            .and_then(|inner| inner);
        let latency = start.elapsed();

        match dialed {
            Ok(_stream) => CheckResult::success(
                latency,
                format!("connected to {} in {latency:?}", target.address),
            ),
            Err(e) => {
                debug!(error = %e, address = %target.address, "tcp probe failed");
                CheckResult::failure(latency, format!("connection failed: {e}"), e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connects_to_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let prober = TcpProber::new(Duration::from_secs(1));
        let result = prober
            .probe(&ProbeContext::new(), &Target::tcp(addr.to_string()))
            .await;
        assert!(result.success, "{result:?}");
    }

    #[tokio::test]
    async fn closed_port_fails() {
        // Bind then drop to get a port nobody is listening on.
        let addr = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap()
        };

        let prober = TcpProber::new(Duration::from_millis(500));
        let result = prober
            .probe(&ProbeContext::new(), &Target::tcp(addr.to_string()))
            .await;
        assert!(!result.success);
        assert!(result.output.starts_with("connection failed"));
    }

    #[tokio::test]
    async fn cancelled_context_fails() {
        let ctx = ProbeContext::new();
        ctx.cancel();
        let result = TcpProber::new(Duration::from_secs(1))
            .probe(&ctx, &Target::tcp("127.0.0.1:9"))
            .await;
        assert_eq!(result.error, Some(ProbeError::Cancelled));
    }
}

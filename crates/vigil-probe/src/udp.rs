//! UDP send/receive probe.
//!
//! UDP has no handshake, so silence is not evidence of failure: a read
//! that times out after a successful send counts as success. Only send
//! errors and non-timeout read errors (e.g. ICMP port unreachable surfaced
//! as `ConnectionRefused`) fail the probe.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tokio::net::UdpSocket;
use tracing::debug;

use vigil_core::{CheckResult, ProbeError, Target};

use crate::context::ProbeContext;
use crate::net;

/// Payload sent when none is configured.
pub const DEFAULT_UDP_PAYLOAD: &[u8] = b"PING";

const UDP_BUFFER_SIZE: usize = 1024;

/// Sends one datagram and waits briefly for any reply.
#[derive(Debug, Clone)]
pub struct UdpProber {
    timeout: Duration,
    payload: Vec<u8>,
}

impl UdpProber {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            payload: DEFAULT_UDP_PAYLOAD.to_vec(),
        }
    }

    /// Prober that sends `payload` (copied) instead of the default.
    pub fn with_payload(timeout: Duration, payload: &[u8]) -> Self {
        Self {
            timeout,
            payload: payload.to_vec(),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub async fn probe(&self, ctx: &ProbeContext, target: &Target) -> CheckResult {
        let start = Instant::now();

        if ctx.is_cancelled() {
            return CheckResult::failure(
                start.elapsed(),
                "context cancelled before probe",
                ProbeError::Cancelled,
            );
        }

        let deadline = ctx.effective_deadline(self.timeout);
        let socket = match ctx.run_until(deadline, self.dial(target)).await.and_then(|r| r) {
            Ok(socket) => socket,
            Err(e) => {
                debug!(error = %e, address = %target.address, "udp dial failed");
                return CheckResult::failure(start.elapsed(), format!("failed to dial: {e}"), e);
            }
        };

        if let Err(e) = socket.send(&self.payload).await {
            let err = ProbeError::Io(e.to_string());
            debug!(error = %err, address = %target.address, "udp send failed");
            return CheckResult::failure(start.elapsed(), format!("failed to write: {e}"), err);
        }

        let mut buffer = [0u8; UDP_BUFFER_SIZE];
        let read = ctx.run_until(deadline, socket.recv(&mut buffer)).await;
        let latency = start.elapsed();

        match read {
            Ok(Ok(n)) => CheckResult::success(
                latency,
                format!("received {n} bytes from {}", target.address),
            ),
            Err(ProbeError::Timeout) => CheckResult::success(
                latency,
                format!("sent to {} (no response within timeout)", target.address),
            ),
            Err(e) => CheckResult::failure(latency, format!("failed to read response: {e}"), e),
            Ok(Err(e)) => {
                debug!(error = %e, address = %target.address, "udp read failed");
                CheckResult::failure(
                    latency,
                    format!("failed to read response: {e}"),
                    ProbeError::Io(e.to_string()),
                )
            }
        }
    }

    async fn dial(&self, target: &Target) -> Result<UdpSocket, ProbeError> {
        let network = if target.network.is_empty() { "udp" } else { target.network.as_str() };
        let addr = net::resolve(network, &target.address).await?;

        let local: SocketAddr = if addr.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(local)
            .await
            .map_err(|e| ProbeError::Io(e.to_string()))?;
        socket
            .connect(addr)
            .await
            .map_err(|e| ProbeError::Connect(e.to_string()))?;
        Ok(socket)
    }
}

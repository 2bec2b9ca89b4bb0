//! gRPC health probe (`grpc.health.v1.Health/Check`).
//!
//! A fresh channel is dialed for every probe and dropped afterwards, so one
//! probe never inherits another's connection state or timeout.

use std::time::{Duration, Instant};

use tonic::transport::{Channel, ClientTlsConfig, Endpoint};
use tonic::Code;
use tonic_health::pb::health_check_response::ServingStatus;
use tonic_health::pb::health_client::HealthClient;
use tonic_health::pb::HealthCheckRequest;
use tracing::debug;

use vigil_core::{CheckResult, ProbeError, Target};

use crate::context::ProbeContext;

/// Queries the standard gRPC health service on a fresh channel.
#[derive(Debug, Clone)]
pub struct GrpcProber {
    timeout: Duration,
    secure: bool,
}

impl GrpcProber {
    /// Plaintext prober, for intra-host checks.
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            secure: false,
        }
    }

    /// TLS prober verifying the server against the webpki roots.
    pub fn secure(timeout: Duration) -> Self {
        Self {
            timeout,
            secure: true,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    pub async fn probe(&self, ctx: &ProbeContext, target: &Target) -> CheckResult {
        let start = Instant::now();
        let deadline = ctx.effective_deadline(self.timeout);

        let channel = match ctx.run_until(deadline, self.connect(&target.address)).await.and_then(|r| r) {
            Ok(channel) => channel,
            Err(e) => {
                debug!(error = %e, address = %target.address, "grpc connect failed");
                return CheckResult::failure(
                    start.elapsed(),
                    format!("gRPC connection failed: {e}"),
                    e,
                );
            }
        };

        let request = HealthCheckRequest {
            service: target.service.clone(),
        };
        let mut client = HealthClient::new(channel);
        let reply = ctx.run_until(deadline, client.check(request)).await;
        let latency = start.elapsed();

        match reply {
            Err(e) => CheckResult::failure(latency, format!("gRPC health check failed: {e}"), e),
            Ok(Err(status)) => rpc_failure(&status, latency, &target.service),
            Ok(Ok(resp)) => serving_result(resp.into_inner().status, latency, target),
        }
    }

    async fn connect(&self, address: &str) -> Result<Channel, ProbeError> {
        let scheme = if self.secure { "https" } else { "http" };
        let uri = if address.contains("://") {
            address.to_string()
        } else {
            format!("{scheme}://{address}")
        };

        let mut endpoint = Endpoint::from_shared(uri)
            .map_err(|e| ProbeError::InvalidTarget(e.to_string()))?
            .connect_timeout(self.timeout)
            .timeout(self.timeout);

        if self.secure {
            endpoint = endpoint
                .tls_config(ClientTlsConfig::new().with_webpki_roots())
                .map_err(|e| ProbeError::InvalidTarget(e.to_string()))?;
        }

        endpoint
            .connect()
            .await
            .map_err(|e| ProbeError::Connect(e.to_string()))
    }
}

fn rpc_failure(status: &tonic::Status, latency: Duration, service: &str) -> CheckResult {
    match status.code() {
        Code::NotFound => CheckResult::failure(
            latency,
            format!("gRPC service {service:?} unknown"),
            ProbeError::ServiceUnknown,
        ),
        Code::DeadlineExceeded => CheckResult::failure(
            latency,
            "gRPC health check timeout",
            ProbeError::Timeout,
        ),
        _ => CheckResult::failure(
            latency,
            format!("gRPC health check failed: {}", status.message()),
            ProbeError::Rpc(format!("{:?}: {}", status.code(), status.message())),
        ),
    }
}

fn serving_result(status: i32, latency: Duration, target: &Target) -> CheckResult {
    let service = &target.service;
    match ServingStatus::try_from(status) {
        Ok(ServingStatus::Serving) => {
            let name = if service.is_empty() { "(server)" } else { service.as_str() };
            CheckResult::success(
                latency,
                format!("gRPC {name} serving at {}", target.address),
            )
        }
        Ok(ServingStatus::NotServing) => CheckResult::failure(
            latency,
            format!("gRPC service {service:?} not serving"),
            ProbeError::NotServing,
        ),
        Ok(ServingStatus::ServiceUnknown) => CheckResult::failure(
            latency,
            format!("gRPC service {service:?} unknown"),
            ProbeError::ServiceUnknown,
        ),
        _ => CheckResult::failure(
            latency,
            format!("gRPC service {service:?} status unknown: {status}"),
            ProbeError::UnknownStatus,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(service: &str) -> Target {
        Target::grpc("127.0.0.1:50051", service)
    }

    #[test]
    fn serving_names_the_service() {
        let r = serving_result(ServingStatus::Serving as i32, Duration::ZERO, &target("users"));
        assert!(r.success);
        assert!(r.output.contains("users"));

        let r = serving_result(ServingStatus::Serving as i32, Duration::ZERO, &target(""));
        assert!(r.output.contains("(server)"));
    }

    #[test]
    fn status_mapping() {
        let t = target("users");
        assert_eq!(
            serving_result(ServingStatus::NotServing as i32, Duration::ZERO, &t).error,
            Some(ProbeError::NotServing)
        );
        assert_eq!(
            serving_result(ServingStatus::ServiceUnknown as i32, Duration::ZERO, &t).error,
            Some(ProbeError::ServiceUnknown)
        );
        assert_eq!(
            serving_result(ServingStatus::Unknown as i32, Duration::ZERO, &t).error,
            Some(ProbeError::UnknownStatus)
        );
        assert_eq!(
            serving_result(42, Duration::ZERO, &t).error,
            Some(ProbeError::UnknownStatus)
        );
    }

    #[test]
    fn rpc_error_mapping() {
        let r = rpc_failure(&tonic::Status::not_found("nope"), Duration::ZERO, "x");
        assert_eq!(r.error, Some(ProbeError::ServiceUnknown));

        let r = rpc_failure(&tonic::Status::deadline_exceeded("slow"), Duration::ZERO, "x");
        assert_eq!(r.output, "gRPC health check timeout");

        let r = rpc_failure(&tonic::Status::unavailable("down"), Duration::ZERO, "x");
        assert!(r.output.contains("down"));
        assert!(matches!(r.error, Some(ProbeError::Rpc(_))));
    }

    #[test]
    fn constructors() {
        assert!(!GrpcProber::new(Duration::from_secs(1)).is_secure());
        assert!(GrpcProber::secure(Duration::from_secs(1)).is_secure());
    }

    #[tokio::test]
    async fn unreachable_server_fails_to_connect() {
        let addr = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap()
        };
        let r = GrpcProber::new(Duration::from_millis(500))
            .probe(&ProbeContext::new(), &Target::grpc(addr.to_string(), ""))
            .await;
        assert!(!r.success);
        assert!(r.output.starts_with("gRPC connection failed"));
    }
}

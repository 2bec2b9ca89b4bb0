//! vigil-probe — network and process probe adapters for Vigil.
//!
//! Each adapter runs one bounded attempt against a [`Target`](vigil_core::Target)
//! and reports a [`CheckResult`](vigil_core::CheckResult). Failures are data,
//! never panics or `Err`s, so callers can feed every outcome straight into
//! the hysteresis machinery in `vigil-core`.
//!
//! # Architecture
//!
//! ```text
//! Factory::create("http", timeout) → Prober
//!   └── Prober::probe(&ProbeContext, &Target) → CheckResult
//!         ├── TcpProber   connect only
//!         ├── UdpProber   send, silence counts as success
//!         ├── HttpProber  status code match (pooled client, rustls for https)
//!         ├── GrpcProber  grpc.health.v1 Check
//!         ├── ExecProber  exit code 0, output capped
//!         └── IcmpProber  raw echo or TCP fallback
//! ```
//!
//! A [`ProbeContext`] carries the caller's deadline and cancellation token.
//! Adapters stop at whichever of their own timeout and the context fires
//! first.

pub mod context;
pub mod error;
pub mod exec;
pub mod factory;
pub mod grpc;
pub mod http;
pub mod icmp;
mod net;
pub mod tcp;
pub mod udp;

pub use context::ProbeContext;
pub use error::FactoryError;
pub use exec::{ExecProber, MAX_OUTPUT_BYTES};
pub use factory::{Factory, Prober, ProberKind};
pub use grpc::GrpcProber;
pub use http::{resolve_url, HttpProber, DEFAULT_HTTP_METHOD, DEFAULT_HTTP_STATUS};
pub use icmp::{IcmpMode, IcmpProber, DEFAULT_TCP_FALLBACK_PORT};
pub use tcp::TcpProber;
pub use udp::{UdpProber, DEFAULT_UDP_PAYLOAD};

//! Prober construction by name.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use vigil_core::{CheckResult, Target, DEFAULT_TIMEOUT};

use crate::context::ProbeContext;
use crate::error::FactoryError;
use crate::exec::ExecProber;
use crate::grpc::GrpcProber;
use crate::http::HttpProber;
use crate::icmp::{IcmpMode, IcmpProber};
use crate::tcp::TcpProber;
use crate::udp::UdpProber;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProberKind {
    Tcp,
    Udp,
    Http,
    Grpc,
    Exec,
    Icmp,
}

impl ProberKind {
    pub const ALL: [ProberKind; 6] = [
        ProberKind::Tcp,
        ProberKind::Udp,
        ProberKind::Http,
        ProberKind::Grpc,
        ProberKind::Exec,
        ProberKind::Icmp,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProberKind::Tcp => "tcp",
            ProberKind::Udp => "udp",
            ProberKind::Http => "http",
            ProberKind::Grpc => "grpc",
            ProberKind::Exec => "exec",
            ProberKind::Icmp => "icmp",
        }
    }
}

impl fmt::Display for ProberKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProberKind {
    type Err = FactoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProberKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| FactoryError::UnknownProberType(s.to_string()))
    }
}

/// One of the six probe adapters.
#[derive(Debug)]
pub enum Prober {
    Tcp(TcpProber),
    Udp(UdpProber),
    Http(HttpProber),
    Grpc(GrpcProber),
    Exec(ExecProber),
    Icmp(IcmpProber),
}

impl Prober {
    /// Run one probe against `target`.
    pub async fn probe(&self, ctx: &ProbeContext, target: &Target) -> CheckResult {
        match self {
            Prober::Tcp(p) => p.probe(ctx, target).await,
            Prober::Udp(p) => p.probe(ctx, target).await,
            Prober::Http(p) => p.probe(ctx, target).await,
            Prober::Grpc(p) => p.probe(ctx, target).await,
            Prober::Exec(p) => p.probe(ctx, target).await,
            Prober::Icmp(p) => p.probe(ctx, target).await,
        }
    }

    pub fn kind(&self) -> ProberKind {
        match self {
            Prober::Tcp(_) => ProberKind::Tcp,
            Prober::Udp(_) => ProberKind::Udp,
            Prober::Http(_) => ProberKind::Http,
            Prober::Grpc(_) => ProberKind::Grpc,
            Prober::Exec(_) => ProberKind::Exec,
            Prober::Icmp(_) => ProberKind::Icmp,
        }
    }

    pub fn timeout(&self) -> Duration {
        match self {
            Prober::Tcp(p) => p.timeout(),
            Prober::Udp(p) => p.timeout(),
            Prober::Http(p) => p.timeout(),
            Prober::Grpc(p) => p.timeout(),
            Prober::Exec(p) => p.timeout(),
            Prober::Icmp(p) => p.timeout(),
        }
    }
}

/// Builds probers, substituting `default_timeout` for a zero timeout.
#[derive(Debug, Clone, Copy)]
pub struct Factory {
    default_timeout: Duration,
}

impl Default for Factory {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl Factory {
    pub fn new(default_timeout: Duration) -> Self {
        let default_timeout = if default_timeout.is_zero() {
            DEFAULT_TIMEOUT
        } else {
            default_timeout
        };
        Self { default_timeout }
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Create a prober by type name.
    pub fn create(&self, name: &str, timeout: Duration) -> Result<Prober, FactoryError> {
        let kind: ProberKind = name.parse()?;
        Ok(self.create_kind(kind, timeout))
    }

    pub fn create_kind(&self, kind: ProberKind, timeout: Duration) -> Prober {
        match kind {
            ProberKind::Tcp => Prober::Tcp(self.create_tcp(timeout)),
            ProberKind::Udp => Prober::Udp(self.create_udp(timeout)),
            ProberKind::Http => Prober::Http(self.create_http(timeout)),
            ProberKind::Grpc => Prober::Grpc(self.create_grpc(timeout)),
            ProberKind::Exec => Prober::Exec(self.create_exec(timeout)),
            ProberKind::Icmp => Prober::Icmp(self.create_icmp(timeout)),
        }
    }

    pub fn create_tcp(&self, timeout: Duration) -> TcpProber {
        TcpProber::new(self.normalize(timeout))
    }

    pub fn create_udp(&self, timeout: Duration) -> UdpProber {
        UdpProber::new(self.normalize(timeout))
    }

    pub fn create_udp_with_payload(&self, timeout: Duration, payload: &[u8]) -> UdpProber {
        UdpProber::with_payload(self.normalize(timeout), payload)
    }

    pub fn create_http(&self, timeout: Duration) -> HttpProber {
        HttpProber::new(self.normalize(timeout))
    }

    pub fn create_grpc(&self, timeout: Duration) -> GrpcProber {
        GrpcProber::new(self.normalize(timeout))
    }

    pub fn create_secure_grpc(&self, timeout: Duration) -> GrpcProber {
        GrpcProber::secure(self.normalize(timeout))
    }

    pub fn create_exec(&self, timeout: Duration) -> ExecProber {
        ExecProber::new(self.normalize(timeout))
    }

    pub fn create_icmp(&self, timeout: Duration) -> IcmpProber {
        IcmpProber::new(self.normalize(timeout))
    }

    pub fn create_icmp_with(&self, timeout: Duration, mode: IcmpMode, tcp_port: u16) -> IcmpProber {
        let timeout = self.normalize(timeout);
        match mode {
            IcmpMode::Fallback => IcmpProber::with_tcp_fallback(timeout, tcp_port),
            mode => IcmpProber::with_mode(timeout, mode).fallback_port(tcp_port),
        }
    }

    fn normalize(&self, timeout: Duration) -> Duration {
        if timeout.is_zero() {
            self.default_timeout
        } else {
            timeout
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trips_through_name() {
        for kind in ProberKind::ALL {
            assert_eq!(kind.to_string().parse::<ProberKind>().unwrap(), kind);
        }
    }

    #[test]
    fn unknown_type_is_rejected() {
        let err = Factory::default()
            .create("smtp", Duration::from_secs(1))
            .unwrap_err();
        assert_eq!(err, FactoryError::UnknownProberType("smtp".to_string()));
        assert_eq!(err.to_string(), "unknown prober type: smtp");
    }

    #[test]
    fn create_reports_kind() {
        let factory = Factory::default();
        for kind in ProberKind::ALL {
            let prober = factory.create(kind.as_str(), Duration::from_secs(2)).unwrap();
            assert_eq!(prober.kind(), kind);
            assert_eq!(prober.timeout(), Duration::from_secs(2));
        }
    }

    #[test]
    fn zero_timeout_uses_factory_default() {
        let factory = Factory::new(Duration::from_secs(7));
        let prober = factory.create("tcp", Duration::ZERO).unwrap();
        assert_eq!(prober.timeout(), Duration::from_secs(7));
        assert_eq!(factory.create_exec(Duration::ZERO).timeout(), Duration::from_secs(7));
        assert_eq!(factory.create_grpc(Duration::ZERO).timeout(), Duration::from_secs(7));
    }

    #[test]
    fn zero_default_falls_back_to_builtin() {
        assert_eq!(Factory::new(Duration::ZERO).default_timeout(), DEFAULT_TIMEOUT);
        assert_eq!(Factory::default().default_timeout(), DEFAULT_TIMEOUT);
    }

    #[test]
    fn icmp_fallback_keeps_port() {
        let p = Factory::default().create_icmp_with(Duration::ZERO, IcmpMode::Fallback, 8443);
        assert_eq!(p.mode(), IcmpMode::Fallback);
        assert_eq!(p.tcp_port(), 8443);
        assert_eq!(p.timeout(), DEFAULT_TIMEOUT);
    }
}

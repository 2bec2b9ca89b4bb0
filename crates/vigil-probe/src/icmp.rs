//! ICMP echo probe with TCP fallback.
//!
//! Native mode sends a raw ICMP echo request, which needs `CAP_NET_RAW` or
//! root. Fallback mode measures a TCP connect to a fixed port instead. Auto
//! mode picks native if a raw socket could be opened when the prober was
//! built. Windows always uses the fallback.

use std::fmt;
use std::io::{ErrorKind, Read};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::time::{Duration, Instant};

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tokio::net::TcpStream;
use tracing::debug;

use vigil_core::{CheckResult, ProbeError, Target};

use crate::context::ProbeContext;
use crate::error::FactoryError;
use crate::net;

/// Port dialed in fallback mode when none is configured.
pub const DEFAULT_TCP_FALLBACK_PORT: u16 = 80;

const ICMP_ECHO_REQUEST: u8 = 8;
const ICMP_ECHO_REPLY: u8 = 0;
const ICMP_HEADER_LEN: usize = 8;
const ICMP_ECHO_DATA_LEN: usize = 32;
const ICMP_MAX_PACKET: usize = 1500;
const IPV4_MIN_HEADER_LEN: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IcmpMode {
    Native,
    Fallback,
    #[default]
    Auto,
}

impl FromStr for IcmpMode {
    type Err = FactoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "native" => Ok(IcmpMode::Native),
            "fallback" => Ok(IcmpMode::Fallback),
            "auto" | "" => Ok(IcmpMode::Auto),
            other => Err(FactoryError::UnknownIcmpMode(other.to_string())),
        }
    }
}

impl fmt::Display for IcmpMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            IcmpMode::Native => "native",
            IcmpMode::Fallback => "fallback",
            IcmpMode::Auto => "auto",
        })
    }
}

#[derive(Debug, Clone)]
pub struct IcmpProber {
    timeout: Duration,
    mode: IcmpMode,
    has_native_capability: bool,
    tcp_port: u16,
}

impl IcmpProber {
    /// Auto-mode prober; raw socket capability is detected now.
    pub fn new(timeout: Duration) -> Self {
        Self::with_mode(timeout, IcmpMode::Auto)
    }

    /// Prober that always uses a TCP connect to `tcp_port`.
    pub fn with_tcp_fallback(timeout: Duration, tcp_port: u16) -> Self {
        Self {
            timeout,
            mode: IcmpMode::Fallback,
            has_native_capability: false,
            tcp_port,
        }
    }

    pub fn with_mode(timeout: Duration, mode: IcmpMode) -> Self {
        let has_native_capability = detect_icmp_capability();
        debug!(%mode, native = has_native_capability, "icmp capability detected");
        Self {
            timeout,
            mode,
            has_native_capability,
            tcp_port: DEFAULT_TCP_FALLBACK_PORT,
        }
    }

    /// Return a copy that falls back to `tcp_port`.
    pub fn fallback_port(mut self, tcp_port: u16) -> Self {
        self.tcp_port = tcp_port;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn mode(&self) -> IcmpMode {
        self.mode
    }

    pub fn has_native_capability(&self) -> bool {
        self.has_native_capability
    }

    pub fn tcp_port(&self) -> u16 {
        self.tcp_port
    }

    pub async fn probe(&self, ctx: &ProbeContext, target: &Target) -> CheckResult {
        let start = Instant::now();
        let host = net::host_part(&target.address);

        if cfg!(windows) {
            return self.tcp_ping(ctx, host, start).await;
        }

        match self.mode {
            IcmpMode::Native => self.native_ping(ctx, host, start).await,
            IcmpMode::Fallback => self.tcp_ping(ctx, host, start).await,
            IcmpMode::Auto if self.has_native_capability => self.native_ping(ctx, host, start).await,
            IcmpMode::Auto => self.tcp_ping(ctx, host, start).await,
        }
    }

    async fn tcp_ping(&self, ctx: &ProbeContext, host: &str, start: Instant) -> CheckResult {
        let port = if self.tcp_port == 0 {
            DEFAULT_TCP_FALLBACK_PORT
        } else {
            self.tcp_port
        };
        let address = if host.contains(':') {
            format!("[{host}]:{port}")
        } else {
            format!("{host}:{port}")
        };

        let dialed = ctx
            .run(self.timeout, TcpStream::connect(address.as_str()))
            .await
            .and_then(|r| r.map_err(|e| ProbeError::Connect(e.to_string())));
        let latency = start.elapsed();

        match dialed {
            Ok(_stream) => CheckResult::success(
                latency,
                format!("ping {host}: latency={latency:?} (tcp fallback)"),
            ),
            Err(e) => {
                debug!(error = %e, %address, "tcp ping failed");
                CheckResult::failure(latency, format!("ping failed: {e}"), e)
            }
        }
    }

    async fn native_ping(&self, ctx: &ProbeContext, host: &str, start: Instant) -> CheckResult {
        let deadline = ctx.effective_deadline(self.timeout);

        let ip = match ctx.run_until(deadline, resolve_ipv4(host)).await.and_then(|r| r) {
            Ok(ip) => ip,
            Err(ProbeError::Cancelled) => {
                return CheckResult::failure(start.elapsed(), "context cancelled", ProbeError::Cancelled);
            }
            Err(e) => {
                return CheckResult::failure(start.elapsed(), format!("resolve failed: {host}"), e);
            }
        };

        let socket = match open_raw_socket() {
            Ok(socket) => socket,
            Err(e) => {
                debug!(error = %e, %host, "raw icmp socket unavailable, using tcp");
                return self.tcp_ping(ctx, host, start).await;
            }
        };

        let budget = deadline.saturating_duration_since(tokio::time::Instant::now());
        let exchange = tokio::task::spawn_blocking(move || echo(&socket, ip, budget));

        let outcome = match ctx.run_until(deadline, exchange).await {
            Ok(Ok(inner)) => inner,
            Ok(Err(join)) => Err(ProbeError::Icmp(join.to_string())),
            Err(e) => Err(e),
        };
        let latency = start.elapsed();

        match outcome {
            Ok(()) => CheckResult::success(
                latency,
                format!("ping {ip}: latency={latency:?} (native icmp)"),
            ),
            Err(e) => {
                debug!(error = %e, %ip, "icmp echo failed");
                CheckResult::failure(latency, e.to_string(), e)
            }
        }
    }
}

async fn resolve_ipv4(host: &str) -> Result<Ipv4Addr, ProbeError> {
    if let Ok(ip) = host.parse::<Ipv4Addr>() {
        return Ok(ip);
    }
    tokio::net::lookup_host((host, 0))
        .await
        .map_err(|e| ProbeError::Resolve(format!("resolving {host}: {e}")))?
        .find_map(|addr| match addr.ip() {
            IpAddr::V4(v4) => Some(v4),
            IpAddr::V6(_) => None,
        })
        .ok_or_else(|| ProbeError::Resolve(format!("resolving {host}: no ipv4 address")))
}

fn open_raw_socket() -> std::io::Result<Socket> {
    Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4))
}

/// Probe once for raw ICMP socket support.
#[cfg(not(windows))]
fn detect_icmp_capability() -> bool {
    open_raw_socket().is_ok()
}

#[cfg(windows)]
fn detect_icmp_capability() -> bool {
    false
}

/// Send one echo request and wait up to `budget` for the matching reply.
fn echo(socket: &Socket, ip: Ipv4Addr, budget: Duration) -> Result<(), ProbeError> {
    let id = (std::process::id() & 0xffff) as u16;
    let request = echo_request(id, 1);
    let dest = SockAddr::from(SocketAddr::new(IpAddr::V4(ip), 0));

    if budget.is_zero() {
        return Err(ProbeError::Timeout);
    }
    socket
        .set_write_timeout(Some(budget))
        .map_err(|e| ProbeError::Icmp(format!("deadline failed: {e}")))?;
    socket
        .send_to(&request, &dest)
        .map_err(|e| ProbeError::Icmp(format!("send failed: {e}")))?;

    let deadline = Instant::now() + budget;
    let mut buf = [0u8; ICMP_MAX_PACKET];
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(ProbeError::Timeout);
        }
        socket
            .set_read_timeout(Some(remaining))
            .map_err(|e| ProbeError::Icmp(format!("deadline failed: {e}")))?;

        let mut reader = socket;
        let n = match reader.read(&mut buf) {
            Ok(n) => n,
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                return Err(ProbeError::Timeout);
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(ProbeError::Icmp(format!("receive failed: {e}"))),
        };

        // Raw sockets see every ICMP packet; skip anything that is not the
        // reply from this host to this process.
        if echo_reply(&buf[..n]) == Some((ip, id)) {
            return Ok(());
        }
    }
}

/// Build an ICMPv4 echo request with a 32-byte counting payload.
fn echo_request(id: u16, seq: u16) -> Vec<u8> {
    let mut packet = vec![0u8; ICMP_HEADER_LEN + ICMP_ECHO_DATA_LEN];
    packet[0] = ICMP_ECHO_REQUEST;
    packet[1] = 0;
    packet[4..6].copy_from_slice(&id.to_be_bytes());
    packet[6..8].copy_from_slice(&seq.to_be_bytes());
    for (i, b) in packet[ICMP_HEADER_LEN..].iter_mut().enumerate() {
        *b = (i & 0xff) as u8;
    }
    let sum = checksum(&packet);
    packet[2..4].copy_from_slice(&sum.to_be_bytes());
    packet
}

/// Source address and identifier of an echo reply inside a raw IPv4
/// datagram.
fn echo_reply(datagram: &[u8]) -> Option<(Ipv4Addr, u16)> {
    let ihl = usize::from(datagram.first()? & 0x0f) * 4;
    if ihl < IPV4_MIN_HEADER_LEN {
        return None;
    }
    let source: [u8; 4] = datagram.get(12..16)?.try_into().ok()?;
    let icmp = datagram.get(ihl..)?;
    if icmp.len() < ICMP_HEADER_LEN || icmp[0] != ICMP_ECHO_REPLY {
        return None;
    }
    Some((Ipv4Addr::from(source), u16::from_be_bytes([icmp[4], icmp[5]])))
}

/// RFC 1071 internet checksum.
fn checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = data
        .chunks(2)
        .map(|c| u32::from(u16::from_be_bytes([c[0], *c.get(1).unwrap_or(&0)])))
        .sum();
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply_from(source: [u8; 4], id: u16) -> Vec<u8> {
        let mut datagram = vec![0u8; IPV4_MIN_HEADER_LEN];
        datagram[0] = 0x45;
        datagram[12..16].copy_from_slice(&source);
        let mut reply = echo_request(id, 1);
        reply[0] = ICMP_ECHO_REPLY;
        datagram.extend_from_slice(&reply);
        datagram
    }

    #[test]
    fn mode_parsing() {
        assert_eq!("native".parse::<IcmpMode>().unwrap(), IcmpMode::Native);
        assert_eq!("fallback".parse::<IcmpMode>().unwrap(), IcmpMode::Fallback);
        assert_eq!("auto".parse::<IcmpMode>().unwrap(), IcmpMode::Auto);
        assert!(matches!(
            "sonar".parse::<IcmpMode>(),
            Err(FactoryError::UnknownIcmpMode(_))
        ));
    }

    #[test]
    fn echo_request_checksums_to_zero() {
        let packet = echo_request(0x1234, 1);
        assert_eq!(packet.len(), 40);
        assert_eq!(packet[0], ICMP_ECHO_REQUEST);
        assert_eq!(checksum(&packet), 0);
    }

    #[test]
    fn reply_id_skips_ip_header() {
        let datagram = reply_from([10, 0, 0, 7], 0xbeef);
        assert_eq!(echo_reply(&datagram), Some((Ipv4Addr::new(10, 0, 0, 7), 0xbeef)));

        // Our own request looped back is not a reply.
        let mut request = datagram.clone();
        request[20] = ICMP_ECHO_REQUEST;
        assert_eq!(echo_reply(&request), None);
        assert_eq!(echo_reply(&[]), None);
        assert_eq!(echo_reply(&[0x41, 0, 0]), None);
    }

    #[test]
    fn reply_from_other_host_is_not_ours() {
        let ours = Ipv4Addr::new(10, 0, 0, 7);
        let id = 0x1234;
        let other = reply_from([10, 0, 0, 8], id);
        assert_ne!(echo_reply(&other), Some((ours, id)));
        assert_eq!(echo_reply(&reply_from([10, 0, 0, 7], id)), Some((ours, id)));
    }

    #[test]
    fn fallback_constructor_disables_native() {
        let p = IcmpProber::with_tcp_fallback(Duration::from_secs(1), 443);
        assert_eq!(p.mode(), IcmpMode::Fallback);
        assert!(!p.has_native_capability());
        assert_eq!(p.tcp_port(), 443);
    }

    #[tokio::test]
    async fn fallback_pings_open_port() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let p = IcmpProber::with_tcp_fallback(Duration::from_secs(1), port);
        let r = p
            .probe(&ProbeContext::new(), &Target::icmp("127.0.0.1"))
            .await;
        assert!(r.success, "{r:?}");
        assert!(r.output.contains("tcp fallback"));
    }

    #[tokio::test]
    async fn fallback_strips_target_port() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let p = IcmpProber::with_tcp_fallback(Duration::from_secs(1), port);
        let r = p
            .probe(&ProbeContext::new(), &Target::icmp("127.0.0.1:9"))
            .await;
        assert!(r.success, "{r:?}");
    }

    #[tokio::test]
    async fn native_unresolvable_host_reports_resolve_failure() {
        let p = IcmpProber::with_mode(Duration::from_secs(2), IcmpMode::Native);
        let r = p
            .probe(&ProbeContext::new(), &Target::icmp("host.invalid"))
            .await;
        if cfg!(windows) {
            return;
        }
        assert!(!r.success);
        assert_eq!(r.output, "resolve failed: host.invalid");
        assert!(matches!(r.error, Some(ProbeError::Resolve(_))));
    }
}

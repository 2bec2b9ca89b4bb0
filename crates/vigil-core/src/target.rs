//! Protocol-agnostic probe targets.

use serde::{Deserialize, Serialize};

/// Describes what a probe should contact.
///
/// Only the fields relevant to the chosen protocol are read; adapters
/// ignore the rest. Build one with the per-protocol constructors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Target {
    /// Network family (`tcp`, `tcp4`, `tcp6`, `udp`, `udp4`, `udp6`, `icmp`).
    pub network: String,
    /// `host:port`, a bare host (ICMP), or a URL (HTTP).
    pub address: String,
    /// HTTP request path.
    pub path: String,
    /// gRPC service name; empty checks the whole server.
    pub service: String,
    /// Executable for exec probes.
    pub command: String,
    /// Arguments for exec probes.
    pub args: Vec<String>,
    /// HTTP method; empty means `GET`.
    pub method: String,
    /// Expected HTTP status code; `0` means 200.
    pub status_code: u16,
}

impl Target {
    pub fn new(network: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            network: network.into(),
            address: address.into(),
            ..Self::default()
        }
    }

    pub fn tcp(address: impl Into<String>) -> Self {
        Self::new("tcp", address)
    }

    pub fn udp(address: impl Into<String>) -> Self {
        Self::new("udp", address)
    }

    /// HTTP target. `address` may be a full URL or `host:port`.
    pub fn http(address: impl Into<String>, method: impl Into<String>, status_code: u16) -> Self {
        Self {
            method: method.into(),
            status_code,
            ..Self::new("tcp", address)
        }
    }

    pub fn grpc(address: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            ..Self::new("tcp", address)
        }
    }

    /// Exec target. The command must come from trusted configuration.
    pub fn exec<I, S>(command: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.into(),
            args: args.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn icmp(address: impl Into<String>) -> Self {
        Self::new("icmp", address)
    }

    /// Return a copy with the HTTP path replaced.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generic_target_keeps_network() {
        let t = Target::new("tcp6", "[::1]:8080");
        assert_eq!(t.network, "tcp6");
        assert_eq!(t.address, "[::1]:8080");
    }

    #[test]
    fn per_protocol_networks() {
        assert_eq!(Target::tcp("localhost:80").network, "tcp");
        assert_eq!(Target::udp("localhost:5353").network, "udp");
        assert_eq!(Target::icmp("192.168.1.1").network, "icmp");
        assert_eq!(Target::grpc("localhost:50051", "").network, "tcp");
    }

    #[test]
    fn http_target_fields() {
        let t = Target::http("http://localhost:9090/ready", "HEAD", 204).with_path("/live");
        assert_eq!(t.method, "HEAD");
        assert_eq!(t.status_code, 204);
        assert_eq!(t.path, "/live");
        assert_eq!(t.address, "http://localhost:9090/ready");
    }

    #[test]
    fn exec_target_args() {
        let t = Target::exec("/bin/sh", ["-c", "echo ok"]);
        assert_eq!(t.command, "/bin/sh");
        assert_eq!(t.args, vec!["-c".to_string(), "echo ok".to_string()]);

        let bare = Target::exec("/app/health.sh", Vec::<String>::new());
        assert!(bare.args.is_empty());
    }

    #[test]
    fn grpc_target_service() {
        let t = Target::grpc("localhost:50051", "api.v1.Users");
        assert_eq!(t.service, "api.v1.Users");
    }
}

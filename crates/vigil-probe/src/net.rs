//! Address resolution shared by the socket-based probes.

use std::net::SocketAddr;

use vigil_core::ProbeError;

/// Address family requested by a target's `network` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Family {
    Any,
    V4,
    V6,
}

impl Family {
    /// `tcp4`/`udp4` → V4, `tcp6`/`udp6` → V6, anything else → Any.
    pub(crate) fn from_network(network: &str) -> Self {
        if network.ends_with('4') {
            Family::V4
        } else if network.ends_with('6') {
            Family::V6
        } else {
            Family::Any
        }
    }

    fn admits(self, addr: &SocketAddr) -> bool {
        match self {
            Family::Any => true,
            Family::V4 => addr.is_ipv4(),
            Family::V6 => addr.is_ipv6(),
        }
    }
}

/// Resolve `host:port` to the first address of the requested family.
pub(crate) async fn resolve(network: &str, address: &str) -> Result<SocketAddr, ProbeError> {
    let family = Family::from_network(network);
    let addrs = tokio::net::lookup_host(address)
        .await
        .map_err(|e| ProbeError::Resolve(format!("{address}: {e}")))?;

    addrs
        .into_iter()
        .find(|a| family.admits(a))
        .ok_or_else(|| ProbeError::Resolve(format!("{address}: no {network} address")))
}

/// Strip an optional `:port` from `address`, keeping IPv6 brackets out.
pub(crate) fn host_part(address: &str) -> &str {
    if let Some(rest) = address.strip_prefix('[') {
        if let Some((host, _)) = rest.split_once(']') {
            return host;
        }
    }
    match address.rsplit_once(':') {
        // A single colon separates host and port; more means a bare IPv6.
        Some((host, port)) if !host.contains(':') && port.parse::<u16>().is_ok() => host,
        _ => address,
    }
}

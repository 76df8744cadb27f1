//! Host name resolution for the OBS endpoint

use std::net::IpAddr;
use tokio::net::lookup_host;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Resolves the configured OBS host, preferring IPv4 over IPv6
#[derive(Debug, Clone, Copy, Default)]
pub struct HostResolver;

impl HostResolver {
    pub fn new() -> Self {
        Self
    }

    /// Resolve `host` to an address.
    ///
    /// Literal addresses are returned as-is without a lookup. Lookup failures,
    /// empty results and cancellation all yield `None`.
    pub async fn resolve(&self, host: &str, cancel: &CancellationToken) -> Option<IpAddr> {
        let host = host.trim();
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Some(ip);
        }

        if cancel.is_cancelled() {
            return None;
        }

        let lookup = tokio::select! {
            _ = cancel.cancelled() => return None,
            res = lookup_host((host, 0)) => res,
        };

        let addresses: Vec<IpAddr> = match lookup {
            Ok(addrs) => addrs.map(|a| a.ip()).collect(),
            Err(e) => {
                warn!("Failed to resolve '{}' - {}", host, e);
                return None;
            },
        };

        let chosen = pick_preferred(&addresses);
        match chosen {
            Some(ip) => debug!("Resolved '{}' to {}", host, ip),
            None => warn!("DNS resolution for '{}' returned no addresses", host),
        }
        chosen
    }
}

/// First IPv4 address, else first IPv6, else nothing
fn pick_preferred(addresses: &[IpAddr]) -> Option<IpAddr> {
    addresses
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| addresses.iter().find(|a| a.is_ipv6()))
        .or_else(|| addresses.first())
        .copied()
}

/// Render an address for a URI authority, bracketing IPv6
pub fn format_for_uri(address: IpAddr) -> String {
    match address {
        IpAddr::V4(v4) => v4.to_string(),
        IpAddr::V6(v6) => format!("[{}]", v6),
    }
}

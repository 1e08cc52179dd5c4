//! STUN server name resolution.

use crate::error::StunError;
use std::net::{SocketAddr, SocketAddrV4};
use tokio::net::lookup_host;

/// Resolve `host:port` to all of its IPv4 endpoints, in resolver order
///
/// Duplicates are removed. The TCP classifier uses the second entry as the
/// secondary endpoint when the server does not advertise one.
///
/// # Errors
///
/// Returns `StunError::Resolve` if the lookup fails or yields no IPv4 address.
pub async fn resolve_ipv4(host_port: &str) -> Result<Vec<SocketAddrV4>, StunError> {
    let resolved = lookup_host(host_port)
        .await
        .map_err(|e| StunError::Resolve {
            host: host_port.to_string(),
            reason: e.to_string(),
        })?;

    let mut addrs: Vec<SocketAddrV4> = Vec::new();
    for addr in resolved {
        match addr {
            SocketAddr::V4(v4) if !addrs.contains(&v4) => addrs.push(v4),
            _ => {}
        }
    }

    if addrs.is_empty() {
        return Err(StunError::Resolve {
            host: host_port.to_string(),
            reason: "no IPv4 address".to_string(),
        });
    }
    Ok(addrs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolve_literal() {
        let addrs = resolve_ipv4("127.0.0.1:3478").await.unwrap();
        assert_eq!(addrs, vec!["127.0.0.1:3478".parse().unwrap()]);
    }

    #[tokio::test]
    async fn test_resolve_ipv6_only_fails() {
        let result = resolve_ipv4("[::1]:3478").await;
        assert!(matches!(result, Err(StunError::Resolve { .. })));
    }

    #[tokio::test]
    async fn test_resolve_missing_port_fails() {
        assert!(resolve_ipv4("127.0.0.1").await.is_err());
    }
}

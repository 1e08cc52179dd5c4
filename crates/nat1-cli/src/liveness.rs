//! Liveness probe for the served port.

use std::io;
use std::net::{SocketAddr, SocketAddrV4};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

/// Default budget for one liveness check
pub const QUERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Check whether something accepts TCP connections at `addr`
///
/// Returns `(online, message)`; the message is suitable for logging either
/// way.
pub async fn tcp_query(addr: SocketAddrV4, wait: Duration) -> (bool, String) {
    match timeout(wait, TcpStream::connect(SocketAddr::V4(addr))).await {
        Ok(Ok(_)) => (true, "port available".to_string()),
        Ok(Err(e)) if e.kind() == io::ErrorKind::ConnectionRefused => {
            debug!(%addr, error = %e, "liveness connect refused");
            (false, "connect refused".to_string())
        }
        Ok(Err(e)) => {
            debug!(%addr, error = %e, "liveness connect failed");
            (false, e.to_string())
        }
        Err(_) => {
            debug!(%addr, "liveness connect timed out");
            (false, "timeout".to_string())
        }
    }
}

//! TCP classification steps
//!
//! The secondary endpoint is the server's advertised other address or, for
//! servers that advertise none, a second IP the server name resolves to. The
//! inbound test is a loopback self-connect through the public mapping.

use super::NatProber;
use crate::error::StunError;
use crate::probe::{ProbeResult, StunProbe, Transport};
use crate::resolve::resolve_ipv4;
use crate::socket;
use async_trait::async_trait;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

/// Budget for the loopback self-connect
const LOOPBACK_TIMEOUT: Duration = Duration::from_secs(2);

/// Budget for the mapping warm-up connect
const WARMUP_TIMEOUT: Duration = Duration::from_secs(1);

/// Size of the loopback token
const TOKEN_LEN: usize = 16;

/// TCP implementation of [`NatProber`]
#[derive(Debug, Clone)]
pub struct TcpNatProber {
    local: SocketAddrV4,
    primary: SocketAddrV4,
    alternate: Option<SocketAddrV4>,
    probe: StunProbe,
}

impl TcpNatProber {
    /// Resolve `server` (`host:port`) and prepare to probe from `local`
    ///
    /// # Errors
    ///
    /// Returns `StunError::Resolve` if the server name has no IPv4 address.
    pub async fn new(server: &str, local: SocketAddrV4, probe: StunProbe) -> Result<Self, StunError> {
        let addrs = resolve_ipv4(server).await?;
        let (&primary, rest) = addrs.split_first().ok_or_else(|| StunError::Resolve {
            host: server.to_string(),
            reason: "no IPv4 address".to_string(),
        })?;
        Ok(Self::with_endpoints(local, primary, rest.first().copied(), probe))
    }

    /// Prober with explicit endpoints
    #[must_use]
    pub const fn with_endpoints(
        local: SocketAddrV4,
        primary: SocketAddrV4,
        alternate: Option<SocketAddrV4>,
        probe: StunProbe,
    ) -> Self {
        Self {
            local,
            primary,
            alternate,
            probe,
        }
    }
}

#[async_trait]
impl NatProber for TcpNatProber {
    fn transport(&self) -> Transport {
        Transport::Tcp
    }

    async fn probe_primary(&mut self) -> Result<ProbeResult, StunError> {
        self.probe.probe_tcp(self.local, self.primary).await
    }

    fn secondary_endpoint(&self, first: &ProbeResult) -> Option<SocketAddrV4> {
        match first.other_addr {
            Some(other) if other.ip() != first.peer_addr.ip() => Some(other),
            // Other address on the contacted IP: server cannot tell cones apart
            Some(_) => None,
            None => self
                .alternate
                .filter(|alternate| alternate.ip() != first.peer_addr.ip()),
        }
    }

    async fn probe_secondary(
        &mut self,
        first: &ProbeResult,
        secondary: SocketAddrV4,
    ) -> Result<ProbeResult, StunError> {
        self.probe.probe_tcp(first.source_addr, secondary).await
    }

    async fn inbound_reachable(&mut self, first: &ProbeResult) -> Result<bool, StunError> {
        let mapped = first.mapped_addr.ok_or(StunError::MissingMappedAddress)?;
        loopback_test(first.source_addr, mapped, LOOPBACK_TIMEOUT).await
    }

    async fn inbound_reachable_after_warmup(
        &mut self,
        first: &ProbeResult,
    ) -> Result<bool, StunError> {
        let mapped = first.mapped_addr.ok_or(StunError::MissingMappedAddress)?;
        warm_up(first.source_addr, mapped).await;
        loopback_test(first.source_addr, mapped, LOOPBACK_TIMEOUT).await
    }

    async fn probe_fresh_port(&mut self, ip: Ipv4Addr) -> Result<ProbeResult, StunError> {
        self.probe
            .probe_tcp(SocketAddrV4::new(ip, 0), self.primary)
            .await
    }
}

/// Listen on `local` and check that a token sent to `mapped` arrives
///
/// A throwaway dialer connects to the public mapping and writes a random
/// token. Any accept, read or dial failure within `wait` counts as
/// unreachable; only a failure to bind `local` is an error.
pub async fn loopback_test(
    local: SocketAddrV4,
    mapped: SocketAddrV4,
    wait: Duration,
) -> Result<bool, StunError> {
    let listener =
        socket::bind_tcp_listener(local).map_err(|source| StunError::Bind { addr: local, source })?;
    let token: [u8; TOKEN_LEN] = rand::random();

    let dialer = tokio::spawn(async move {
        let dial = async {
            let mut stream = TcpStream::connect(SocketAddr::V4(mapped)).await?;
            stream.set_nodelay(true)?;
            stream.write_all(&token).await
        };
        match timeout(wait, dial).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(%mapped, error = %e, "loopback dial failed"),
            Err(_) => debug!(%mapped, "loopback dial timed out"),
        }
    });

    let received = timeout(wait, async {
        let (mut stream, from) = listener.accept().await?;
        debug!(%from, "loopback connection accepted");
        let mut buf = [0u8; TOKEN_LEN];
        stream.read_exact(&mut buf).await?;
        Ok::<_, io::Error>(buf)
    })
    .await;
    dialer.abort();

    match received {
        Ok(Ok(buf)) => Ok(buf == token),
        Ok(Err(e)) => {
            debug!(%local, error = %e, "loopback accept failed");
            Ok(false)
        }
        Err(_) => Ok(false),
    }
}

/// One outbound connect from `local` to `mapped`, result ignored
async fn warm_up(local: SocketAddrV4, mapped: SocketAddrV4) {
    let Ok(socket) = socket::bind_tcp_socket(local) else {
        debug!(%local, "warm-up bind failed");
        return;
    };
    match timeout(WARMUP_TIMEOUT, socket.connect(SocketAddr::V4(mapped))).await {
        Ok(Ok(_)) => debug!(%mapped, "warm-up connect succeeded"),
        Ok(Err(e)) => debug!(%mapped, error = %e, "warm-up connect failed"),
        Err(_) => debug!(%mapped, "warm-up connect timed out"),
    }
}

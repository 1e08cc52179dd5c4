//! One STUN binding exchange over TCP or UDP.

use crate::error::{ProtocolError, StunError, ipv4};
use crate::message::{BIND_RESPONSE, ChangeRequest, HEADER_SIZE, StunMessage, StunMessageClass};
use crate::socket;
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::str::FromStr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::{Instant, timeout, timeout_at};
use tracing::debug;

/// Default STUN timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

/// Default number of UDP retransmissions after the first request
pub const DEFAULT_RETRIES: u32 = 2;

/// Largest datagram we expect from a STUN server
const MTU: usize = 1500;

/// Transport used for probing and forwarding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    /// TCP
    Tcp,
    /// UDP
    Udp,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => write!(f, "tcp"),
            Self::Udp => write!(f, "udp"),
        }
    }
}

impl FromStr for Transport {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Self::Tcp),
            "udp" => Ok(Self::Udp),
            other => Err(format!("unknown transport: {other}")),
        }
    }
}

/// Outcome of a single binding exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeResult {
    /// Local address the request left from
    pub source_addr: SocketAddrV4,
    /// STUN endpoint contacted
    pub peer_addr: SocketAddrV4,
    /// Address the server observed us as
    pub mapped_addr: Option<SocketAddrV4>,
    /// Server's secondary endpoint, if advertised
    pub other_addr: Option<SocketAddrV4>,
}

impl ProbeResult {
    fn from_response(
        source_addr: SocketAddrV4,
        peer_addr: SocketAddrV4,
        response: &StunMessage,
    ) -> Result<Self, StunError> {
        let result = Self {
            source_addr,
            peer_addr,
            mapped_addr: response.mapped_address()?,
            other_addr: response.other_address()?,
        };
        debug!(
            source = %result.source_addr,
            peer = %result.peer_addr,
            mapped = ?result.mapped_addr,
            other = ?result.other_addr,
            "STUN binding response"
        );
        Ok(result)
    }
}

/// Check that `response` answers `request` with a binding success
fn check_response(request: &StunMessage, response: &StunMessage) -> Result<(), ProtocolError> {
    if response.transaction_id != request.transaction_id {
        return Err(ProtocolError::TransactionMismatch);
    }
    if response.class() == StunMessageClass::ErrorResponse {
        return Err(ProtocolError::ErrorResponse(response.msg_type));
    }
    if response.msg_type != BIND_RESPONSE {
        return Err(ProtocolError::UnexpectedMessageType(response.msg_type));
    }
    Ok(())
}

/// STUN binding probe settings
#[derive(Debug, Clone, Copy)]
pub struct StunProbe {
    timeout: Duration,
    retries: u32,
}

impl Default for StunProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl StunProbe {
    /// Probe with default timeout (3s) and retries (2)
    #[must_use]
    pub const fn new() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            retries: DEFAULT_RETRIES,
        }
    }

    /// Set the per-exchange timeout
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the number of UDP retransmissions
    #[must_use]
    pub const fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Per-exchange timeout
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Perform one binding exchange from `local` to `server`
    ///
    /// `change` is only honoured over UDP; TCP has no CHANGE-REQUEST semantics.
    ///
    /// # Errors
    ///
    /// - `StunError::Bind` if `local` cannot be bound
    /// - `StunError::Connect` if the TCP handshake fails
    /// - `StunError::Timeout` if no valid reply arrives in time
    /// - `StunError::Protocol` for malformed or mismatched replies
    pub async fn probe(
        &self,
        transport: Transport,
        local: SocketAddrV4,
        server: SocketAddrV4,
        change: ChangeRequest,
    ) -> Result<ProbeResult, StunError> {
        match transport {
            Transport::Tcp => {
                if !change.is_empty() {
                    debug!(?change, "CHANGE-REQUEST ignored over TCP");
                }
                self.probe_tcp(local, server).await
            }
            Transport::Udp => {
                UdpStunSocket::bind(local)?
                    .request(server, change, self)
                    .await
            }
        }
    }

    /// Binding exchange over a fresh TCP connection bound to `local`
    ///
    /// # Errors
    ///
    /// See [`StunProbe::probe`].
    pub async fn probe_tcp(
        &self,
        local: SocketAddrV4,
        server: SocketAddrV4,
    ) -> Result<ProbeResult, StunError> {
        let socket =
            socket::bind_tcp_socket(local).map_err(|source| StunError::Bind { addr: local, source })?;

        let mut stream = match timeout(self.timeout, socket.connect(SocketAddr::V4(server))).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                return Err(StunError::Connect {
                    addr: server,
                    source,
                });
            }
            Err(_) => return Err(StunError::Timeout { addr: server }),
        };
        stream.set_nodelay(true)?;

        let request = StunMessage::binding_request(ChangeRequest::NONE);
        let response = timeout(self.timeout, exchange_tcp(&mut stream, &request))
            .await
            .map_err(|_| StunError::Timeout { addr: server })??;
        check_response(&request, &response)?;

        let source_addr = ipv4(stream.local_addr()?)?;
        let peer_addr = ipv4(stream.peer_addr()?)?;
        ProbeResult::from_response(source_addr, peer_addr, &response)
    }
}

/// Send `request` and read exactly one framed response
async fn exchange_tcp(
    stream: &mut TcpStream,
    request: &StunMessage,
) -> Result<StunMessage, StunError> {
    stream.write_all(&request.encode()).await?;

    let mut frame = vec![0u8; HEADER_SIZE];
    stream.read_exact(&mut frame).await?;

    let payload_len = StunMessage::payload_len(&frame)?;
    frame.resize(HEADER_SIZE + payload_len, 0);
    stream.read_exact(&mut frame[HEADER_SIZE..]).await?;

    Ok(StunMessage::decode(&frame)?)
}

/// UDP socket that can run several binding exchanges from one local port
///
/// Keeping the socket open between exchanges keeps the NAT mapping the same,
/// which the UDP classifier relies on.
pub struct UdpStunSocket {
    socket: UdpSocket,
    local: SocketAddrV4,
}

impl UdpStunSocket {
    /// Bind to `local` with address/port reuse
    ///
    /// # Errors
    ///
    /// Returns `StunError::Bind` if the address is unavailable.
    pub fn bind(local: SocketAddrV4) -> Result<Self, StunError> {
        let socket =
            socket::bind_udp_socket(local).map_err(|source| StunError::Bind { addr: local, source })?;
        let local = ipv4(socket.local_addr()?)?;
        Ok(Self { socket, local })
    }

    /// Locally bound address
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddrV4 {
        self.local
    }

    /// Source address as the server sees it before NAT
    ///
    /// A wildcard bind is resolved to the interface address the OS would route
    /// `server` through.
    async fn source_towards(&self, server: SocketAddrV4) -> Result<SocketAddrV4, StunError> {
        if !self.local.ip().is_unspecified() {
            return Ok(self.local);
        }
        let route = UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0)).await?;
        route.connect(SocketAddr::V4(server)).await?;
        let routed = ipv4(route.local_addr()?)?;
        Ok(SocketAddrV4::new(*routed.ip(), self.local.port()))
    }

    /// Send a binding request to `server` and wait for the matching reply
    ///
    /// Replies with a foreign transaction ID, or from an endpoint other than
    /// the one `change` asks for, are discarded. The request is retransmitted
    /// up to `probe.retries` times, each attempt waiting `probe.timeout`.
    ///
    /// # Errors
    ///
    /// - `StunError::Timeout` if no acceptable reply arrives
    /// - `StunError::Protocol` for an error response to our transaction
    pub async fn request(
        &self,
        server: SocketAddrV4,
        change: ChangeRequest,
        probe: &StunProbe,
    ) -> Result<ProbeResult, StunError> {
        let request = StunMessage::binding_request(change);
        let bytes = request.encode();
        let mut buf = [0u8; MTU];

        for attempt in 0..=probe.retries {
            self.socket.send_to(&bytes, SocketAddr::V4(server)).await?;
            let deadline = Instant::now() + probe.timeout;

            loop {
                let (len, from) = match timeout_at(deadline, self.socket.recv_from(&mut buf)).await {
                    Ok(Ok(received)) => received,
                    Ok(Err(e)) => {
                        debug!(%server, error = %e, "STUN receive failed");
                        break;
                    }
                    Err(_) => break,
                };

                let SocketAddr::V4(from) = from else {
                    continue;
                };
                let response = match StunMessage::decode(&buf[..len]) {
                    Ok(response) => response,
                    Err(e) => {
                        debug!(%from, error = %e, "discarding corrupt STUN datagram");
                        continue;
                    }
                };
                if response.transaction_id != request.transaction_id {
                    debug!(%from, "discarding foreign STUN transaction");
                    continue;
                }
                if !change.accepts(server, from) {
                    debug!(%from, %server, ?change, "discarding reply from unexpected endpoint");
                    continue;
                }

                check_response(&request, &response)?;
                let source_addr = self.source_towards(server).await?;
                return ProbeResult::from_response(source_addr, server, &response);
            }

            debug!(%server, attempt, "no STUN reply");
        }

        Err(StunError::Timeout { addr: server })
    }
}

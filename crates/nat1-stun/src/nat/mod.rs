//! NAT Type Classification
//!
//! One decision procedure, shared by TCP and UDP:
//!
//! 1. Probe the primary STUN endpoint. `source == mapped` means no NAT.
//! 2. Without a secondary endpoint the server cannot classify (`Unsupported`).
//! 3. Probe the secondary endpoint from the same source. A different mapping
//!    means a Symmetric NAT.
//! 4. Check whether unsolicited inbound traffic reaches the mapping. If it
//!    does, the NAT is Full Cone, unless the ports match and three fresh
//!    probes show the host is in fact directly routable.
//! 5. Otherwise retry once after warming the mapping: success means
//!    Restricted Cone, failure means Port Restricted Cone.
//!
//! The transport-specific mechanics live behind [`NatProber`]: TCP uses a
//! second server IP and a loopback self-connect, UDP uses CHANGE-REQUEST on
//! one long-lived socket.

mod tcp;
mod types;
mod udp;

pub use tcp::TcpNatProber;
pub use types::{Classification, NatType};
pub use udp::UdpNatProber;

use crate::error::StunError;
use crate::probe::{ProbeResult, StunProbe, Transport};
use async_trait::async_trait;
use std::net::{Ipv4Addr, SocketAddrV4};
use tracing::{debug, error, info};

/// Fresh-port probes used to tell a public host from a coincidental mapping
pub const FRESH_PORT_PROBES: usize = 3;

/// Transport-specific steps of the classification procedure
#[async_trait]
pub trait NatProber: Send {
    /// Transport being classified
    fn transport(&self) -> Transport;

    /// Step 1: binding exchange with the primary endpoint
    async fn probe_primary(&mut self) -> Result<ProbeResult, StunError>;

    /// Step 2: endpoint for the Symmetric check, if any
    fn secondary_endpoint(&self, first: &ProbeResult) -> Option<SocketAddrV4>;

    /// Step 3: binding exchange with `secondary` from `first.source_addr`
    async fn probe_secondary(
        &mut self,
        first: &ProbeResult,
        secondary: SocketAddrV4,
    ) -> Result<ProbeResult, StunError>;

    /// Step 4: does unsolicited traffic reach `first.mapped_addr`?
    async fn inbound_reachable(&mut self, first: &ProbeResult) -> Result<bool, StunError>;

    /// Step 6: the same question after warming the mapping
    async fn inbound_reachable_after_warmup(
        &mut self,
        first: &ProbeResult,
    ) -> Result<bool, StunError>;

    /// Step 5: binding exchange with the primary endpoint from `(ip, 0)`
    async fn probe_fresh_port(&mut self, ip: Ipv4Addr) -> Result<ProbeResult, StunError>;
}

/// Whether every fresh-port probe kept its port and all ports differ
///
/// Each entry is `(local port, mapped port)`.
#[must_use]
pub fn ports_preserved(probes: &[(u16, Option<u16>)]) -> bool {
    let all_match = probes
        .iter()
        .all(|&(local, mapped)| mapped == Some(local));
    let all_distinct = probes
        .iter()
        .enumerate()
        .all(|(i, (port, _))| probes[..i].iter().all(|(other, _)| other != port));
    probes.len() == FRESH_PORT_PROBES && all_match && all_distinct
}

/// Run the decision procedure
///
/// Never fails: probe errors become an `Unsupported` verdict with the error
/// attached.
pub async fn classify<P: NatProber + ?Sized>(prober: &mut P) -> Classification {
    let transport = prober.transport();
    match decide(prober).await {
        Ok((nat_type, mapped_addr)) => {
            if nat_type == NatType::Unsupported {
                error!(%transport, "UnsupportedServer: STUN server offers no secondary endpoint");
            } else {
                info!(%transport, mapped = ?mapped_addr, "{}", nat_type.verdict());
            }
            Classification::new(transport, nat_type, mapped_addr)
        }
        Err(e) => {
            error!(%transport, kind = ?e.kind(), "NAT classification failed: {e}");
            debug!(%transport, error = ?e, "probe failure detail");
            Classification::failed(transport, e)
        }
    }
}

async fn decide<P: NatProber + ?Sized>(
    prober: &mut P,
) -> Result<(NatType, Option<SocketAddrV4>), StunError> {
    let first = prober.probe_primary().await?;
    let mapped = first.mapped_addr.ok_or(StunError::MissingMappedAddress)?;
    if first.source_addr == mapped {
        return Ok((NatType::OpenInternet, Some(mapped)));
    }

    let Some(secondary) = prober.secondary_endpoint(&first) else {
        return Ok((NatType::Unsupported, Some(mapped)));
    };

    let second = prober.probe_secondary(&first, secondary).await?;
    debug!(first = %mapped, second = ?second.mapped_addr, "comparing mappings");
    if second.mapped_addr != Some(mapped) {
        return Ok((NatType::Symmetric, Some(mapped)));
    }

    if prober.inbound_reachable(&first).await? {
        if mapped.port() != first.source_addr.port() {
            return Ok((NatType::FullCone, Some(mapped)));
        }
        let mut ports = Vec::with_capacity(FRESH_PORT_PROBES);
        for _ in 0..FRESH_PORT_PROBES {
            let probe = prober.probe_fresh_port(*first.source_addr.ip()).await?;
            ports.push((
                probe.source_addr.port(),
                probe.mapped_addr.map(|m| m.port()),
            ));
        }
        debug!(?ports, "fresh-port probes");
        let nat_type = if ports_preserved(&ports) {
            NatType::OpenInternet
        } else {
            NatType::FullCone
        };
        return Ok((nat_type, Some(mapped)));
    }

    let nat_type = if prober.inbound_reachable_after_warmup(&first).await? {
        NatType::RestrictedCone
    } else {
        NatType::PortRestrictedCone
    };
    Ok((nat_type, Some(mapped)))
}

/// NAT classifier against configured STUN servers
#[derive(Debug, Clone)]
pub struct NatClassifier {
    tcp_server: String,
    udp_server: String,
    probe: StunProbe,
}

impl NatClassifier {
    /// Create a classifier; servers are `host:port` strings
    #[must_use]
    pub fn new(tcp_server: impl Into<String>, udp_server: impl Into<String>, probe: StunProbe) -> Self {
        Self {
            tcp_server: tcp_server.into(),
            udp_server: udp_server.into(),
            probe,
        }
    }

    /// Classify TCP behaviour for `local`
    pub async fn classify_tcp(&self, local: SocketAddrV4) -> Classification {
        match TcpNatProber::new(&self.tcp_server, local, self.probe).await {
            Ok(mut prober) => classify(&mut prober).await,
            Err(e) => {
                error!(server = %self.tcp_server, "NAT classification failed: {e}");
                Classification::failed(Transport::Tcp, e)
            }
        }
    }

    /// Classify UDP behaviour for `local`
    pub async fn classify_udp(&self, local: SocketAddrV4) -> Classification {
        match UdpNatProber::new(&self.udp_server, local, self.probe).await {
            Ok(mut prober) => classify(&mut prober).await,
            Err(e) => {
                error!(server = %self.udp_server, "NAT classification failed: {e}");
                Classification::failed(Transport::Udp, e)
            }
        }
    }

    /// Classify with the given transport
    pub async fn classify(&self, transport: Transport, local: SocketAddrV4) -> Classification {
        match transport {
            Transport::Tcp => self.classify_tcp(local).await,
            Transport::Udp => self.classify_udp(local).await,
        }
    }
}

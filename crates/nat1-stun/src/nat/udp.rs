//! UDP classification steps
//!
//! Every exchange except the fresh-port probes goes through one socket, so
//! the NAT mapping stays the same throughout. The inbound test asks the server
//! to answer from its other address with CHANGE-REQUEST.
//!
//! Sending to the secondary endpoint opens the NAT filter for replies from
//! it, and the CHANGE-IP+PORT reply comes from that same endpoint. Both
//! filtering exchanges therefore run before the secondary probe and their
//! outcomes are kept for the inbound steps.

use super::NatProber;
use crate::error::StunError;
use crate::message::ChangeRequest;
use crate::probe::{ProbeResult, StunProbe, Transport, UdpStunSocket};
use crate::resolve::resolve_ipv4;
use async_trait::async_trait;
use std::net::{Ipv4Addr, SocketAddrV4};
use tracing::debug;

/// UDP implementation of [`NatProber`]
pub struct UdpNatProber {
    socket: UdpStunSocket,
    primary: SocketAddrV4,
    probe: StunProbe,
    filtering: Option<Filtering>,
}

/// Outcome of the CHANGE-REQUEST exchanges
#[derive(Debug, Clone, Copy)]
struct Filtering {
    ip_and_port: bool,
    /// Not measured when the IP+port reply already got through
    port: Option<bool>,
}

impl UdpNatProber {
    /// Resolve `server` (`host:port`) and bind `local`
    ///
    /// # Errors
    ///
    /// - `StunError::Resolve` if the server name has no IPv4 address
    /// - `StunError::Bind` if `local` is unavailable
    pub async fn new(server: &str, local: SocketAddrV4, probe: StunProbe) -> Result<Self, StunError> {
        let addrs = resolve_ipv4(server).await?;
        let primary = addrs.first().copied().ok_or_else(|| StunError::Resolve {
            host: server.to_string(),
            reason: "no IPv4 address".to_string(),
        })?;
        Self::with_endpoint(local, primary, probe)
    }

    /// Prober against an explicit primary endpoint
    ///
    /// # Errors
    ///
    /// Returns `StunError::Bind` if `local` is unavailable.
    pub fn with_endpoint(
        local: SocketAddrV4,
        primary: SocketAddrV4,
        probe: StunProbe,
    ) -> Result<Self, StunError> {
        Ok(Self {
            socket: UdpStunSocket::bind(local)?,
            primary,
            probe,
            filtering: None,
        })
    }

    /// Binding exchange asking for a reply from a changed endpoint
    ///
    /// A timeout means the changed reply never made it through the NAT.
    async fn changed_reply(&self, change: ChangeRequest) -> Result<bool, StunError> {
        match self.socket.request(self.primary, change, &self.probe).await {
            Ok(_) => Ok(true),
            Err(StunError::Timeout { .. }) => {
                debug!(?change, "no reply from changed endpoint");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Run the filtering exchanges while only the primary has been contacted
    async fn measure_filtering(&mut self) -> Result<(), StunError> {
        let ip_and_port = self.changed_reply(ChangeRequest::IP_AND_PORT).await?;
        let port = if ip_and_port {
            None
        } else {
            Some(self.changed_reply(ChangeRequest::PORT).await?)
        };
        let filtering = Filtering { ip_and_port, port };
        debug!(?filtering, "filtering measured");
        self.filtering = Some(filtering);
        Ok(())
    }
}

#[async_trait]
impl NatProber for UdpNatProber {
    fn transport(&self) -> Transport {
        Transport::Udp
    }

    async fn probe_primary(&mut self) -> Result<ProbeResult, StunError> {
        self.socket
            .request(self.primary, ChangeRequest::NONE, &self.probe)
            .await
    }

    fn secondary_endpoint(&self, first: &ProbeResult) -> Option<SocketAddrV4> {
        first
            .other_addr
            .filter(|other| other.ip() != first.peer_addr.ip())
    }

    async fn probe_secondary(
        &mut self,
        _first: &ProbeResult,
        secondary: SocketAddrV4,
    ) -> Result<ProbeResult, StunError> {
        if self.filtering.is_none() {
            self.measure_filtering().await?;
        }
        self.socket
            .request(secondary, ChangeRequest::NONE, &self.probe)
            .await
    }

    async fn inbound_reachable(&mut self, _first: &ProbeResult) -> Result<bool, StunError> {
        match self.filtering {
            Some(filtering) => Ok(filtering.ip_and_port),
            None => self.changed_reply(ChangeRequest::IP_AND_PORT).await,
        }
    }

    async fn inbound_reachable_after_warmup(
        &mut self,
        _first: &ProbeResult,
    ) -> Result<bool, StunError> {
        match self.filtering.and_then(|f| f.port) {
            Some(port) => Ok(port),
            None => self.changed_reply(ChangeRequest::PORT).await,
        }
    }

    async fn probe_fresh_port(&mut self, ip: Ipv4Addr) -> Result<ProbeResult, StunError> {
        UdpStunSocket::bind(SocketAddrV4::new(ip, 0))?
            .request(self.primary, ChangeRequest::NONE, &self.probe)
            .await
    }
}

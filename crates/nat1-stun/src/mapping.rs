//! Public mapping discovery for a bound local address.

use crate::error::StunError;
use crate::message::ChangeRequest;
use crate::probe::{StunProbe, Transport};
use crate::resolve::resolve_ipv4;
use std::net::SocketAddrV4;
use tracing::{debug, info};

/// Asks a STUN server which public address `local` maps to
///
/// The probe socket is bound with address/port reuse, so `local` may already
/// be held by a forwarder.
#[derive(Debug, Clone)]
pub struct MappingResolver {
    transport: Transport,
    server: String,
    probe: StunProbe,
}

impl MappingResolver {
    /// Resolver against `server` (`host:port`)
    #[must_use]
    pub fn new(transport: Transport, server: impl Into<String>, probe: StunProbe) -> Self {
        Self {
            transport,
            server: server.into(),
            probe,
        }
    }

    /// Transport the mapping is resolved for
    #[must_use]
    pub const fn transport(&self) -> Transport {
        self.transport
    }

    /// STUN server as configured
    #[must_use]
    pub fn server(&self) -> &str {
        &self.server
    }

    /// Current public mapping of `local`
    ///
    /// The server name is resolved on every call so DNS changes are picked up
    /// between forwarding runs.
    ///
    /// # Errors
    ///
    /// Any probe failure, or `StunError::MissingMappedAddress` if the server
    /// answered without a usable address.
    pub async fn resolve(&self, local: SocketAddrV4) -> Result<SocketAddrV4, StunError> {
        let server = resolve_ipv4(&self.server)
            .await?
            .first()
            .copied()
            .ok_or_else(|| StunError::Resolve {
                host: self.server.clone(),
                reason: "no IPv4 address".to_string(),
            })?;
        debug!(transport = %self.transport, %local, %server, "resolving public mapping");

        let result = self
            .probe
            .probe(self.transport, local, server, ChangeRequest::NONE)
            .await?;
        let mapped = result.mapped_addr.ok_or(StunError::MissingMappedAddress)?;
        info!(transport = %self.transport, %local, %mapped, "public mapping");
        Ok(mapped)
    }
}

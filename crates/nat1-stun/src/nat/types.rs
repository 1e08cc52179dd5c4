//! NAT verdict types

use crate::error::StunError;
use crate::probe::Transport;
use std::net::SocketAddrV4;

/// NAT type classification
///
/// From most to least permissive:
/// - Open Internet: no NAT, the host address is public
/// - Full Cone: any external host can reach the mapped port
/// - Restricted Cone: only previously contacted IPs can reach it
/// - Port Restricted Cone: only previously contacted IP:port pairs can reach it
/// - Symmetric: a different mapping per destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NatType {
    /// No NAT detected, public IP address
    OpenInternet,
    /// Full Cone NAT
    FullCone,
    /// Restricted Cone NAT
    RestrictedCone,
    /// Port Restricted Cone NAT
    PortRestrictedCone,
    /// Symmetric NAT
    Symmetric,
    /// Server cannot classify, or a probe failed
    Unsupported,
}

impl NatType {
    /// Numeric code reported on the command line (`NAT<code>`)
    #[must_use]
    pub const fn code(self) -> i8 {
        match self {
            Self::OpenInternet => 0,
            Self::FullCone => 1,
            Self::RestrictedCone => 2,
            Self::PortRestrictedCone => 3,
            Self::Symmetric => 4,
            Self::Unsupported => -1,
        }
    }

    /// Whether unsolicited inbound traffic reaches the mapped port
    #[must_use]
    pub const fn is_directly_reachable(self) -> bool {
        matches!(self, Self::OpenInternet | Self::FullCone)
    }

    /// Upper-case verdict used in log lines
    #[must_use]
    pub const fn verdict(self) -> &'static str {
        match self {
            Self::OpenInternet => "OPEN INTERNET",
            Self::FullCone => "FULL CONE",
            Self::RestrictedCone => "RESTRICTED CONE",
            Self::PortRestrictedCone => "PORT RESTRICTED CONE",
            Self::Symmetric => "SYMMETRIC",
            Self::Unsupported => "UNSUPPORTED",
        }
    }
}

impl std::fmt::Display for NatType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OpenInternet => write!(f, "Open Internet (No NAT)"),
            Self::FullCone => write!(f, "Full Cone NAT"),
            Self::RestrictedCone => write!(f, "Restricted Cone NAT"),
            Self::PortRestrictedCone => write!(f, "Port Restricted Cone NAT"),
            Self::Symmetric => write!(f, "Symmetric NAT"),
            Self::Unsupported => write!(f, "Unsupported"),
        }
    }
}

/// Result of one classification run
///
/// Always produced, even when probing fails: the failure is kept in `error`
/// and the verdict is [`NatType::Unsupported`].
#[derive(Debug)]
pub struct Classification {
    /// Transport the run probed with
    pub transport: Transport,
    /// Verdict
    pub nat_type: NatType,
    /// Mapping observed in the first probe, if it got that far
    pub mapped_addr: Option<SocketAddrV4>,
    /// Probe failure behind an `Unsupported` verdict
    pub error: Option<StunError>,
}

impl Classification {
    /// Successful verdict
    #[must_use]
    pub const fn new(
        transport: Transport,
        nat_type: NatType,
        mapped_addr: Option<SocketAddrV4>,
    ) -> Self {
        Self {
            transport,
            nat_type,
            mapped_addr,
            error: None,
        }
    }

    /// `Unsupported` verdict carrying the probe failure
    #[must_use]
    pub fn failed(transport: Transport, error: StunError) -> Self {
        Self {
            transport,
            nat_type: NatType::Unsupported,
            mapped_addr: None,
            error: Some(error),
        }
    }

    /// Whether unsolicited inbound traffic reaches the mapped port
    #[must_use]
    pub const fn is_directly_reachable(&self) -> bool {
        self.nat_type.is_directly_reachable()
    }
}

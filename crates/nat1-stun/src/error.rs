//! Error types for STUN probing and NAT classification.

use std::io;
use std::net::{SocketAddr, SocketAddrV4};
use thiserror::Error;

/// Malformed or mismatched STUN message
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Fewer bytes than a STUN header
    #[error("STUN message too short: {len} bytes")]
    MessageTooShort {
        /// Bytes available
        len: usize,
    },

    /// Declared payload length disagrees with the bytes received
    #[error("STUN length mismatch: header declares {declared}, {available} available")]
    LengthMismatch {
        /// Length from the header
        declared: usize,
        /// Bytes actually following the header
        available: usize,
    },

    /// Leftover bytes too short for an attribute header
    #[error("malformed STUN attributes: {remaining} trailing bytes")]
    MalformedAttributes {
        /// Bytes left over
        remaining: usize,
    },

    /// Attribute value shorter than its declared or required length
    #[error("truncated STUN attribute 0x{attr_type:04X}")]
    TruncatedAttribute {
        /// Attribute type code
        attr_type: u16,
    },

    /// Response transaction ID differs from the request's
    #[error("STUN transaction ID mismatch")]
    TransactionMismatch,

    /// Server answered with an error response
    #[error("STUN error response (type 0x{0:04X})")]
    ErrorResponse(u16),

    /// Not a binding success response
    #[error("unexpected STUN message type 0x{0:04X}")]
    UnexpectedMessageType(u16),
}

/// STUN probe errors
#[derive(Debug, Error)]
pub enum StunError {
    /// Local address could not be bound
    #[error("cannot bind {addr}: {source}")]
    Bind {
        /// Address we tried to bind
        addr: SocketAddrV4,
        /// Underlying OS error
        source: io::Error,
    },

    /// Transport-level connect to the STUN server failed
    #[error("cannot connect to STUN server {addr}: {source}")]
    Connect {
        /// STUN server address
        addr: SocketAddrV4,
        /// Underlying OS error
        source: io::Error,
    },

    /// No valid reply within the time budget
    #[error("no valid reply from STUN server {addr}")]
    Timeout {
        /// STUN server address
        addr: SocketAddrV4,
    },

    /// Malformed or mismatched message
    #[error("STUN protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Valid response without a usable mapped address
    #[error("STUN response carries no IPv4 mapped address")]
    MissingMappedAddress,

    /// STUN host name could not be resolved to an IPv4 address
    #[error("cannot resolve STUN server {host}: {reason}")]
    Resolve {
        /// Host name as configured
        host: String,
        /// Resolver failure description
        reason: String,
    },

    /// Only IPv4 is classified
    #[error("unsupported address family: {0}")]
    UnsupportedAddress(SocketAddr),

    /// I/O error during the exchange
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Error taxonomy shared by probe and classifier diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StunErrorKind {
    /// Address unavailable
    Bind,
    /// Server unreachable
    Connect,
    /// No reply within budget
    Timeout,
    /// Malformed or mismatched message
    Protocol,
}

impl StunError {
    /// Taxonomy entry for this error
    #[must_use]
    pub fn kind(&self) -> StunErrorKind {
        match self {
            Self::Bind { .. } => StunErrorKind::Bind,
            Self::Connect { .. } | Self::Resolve { .. } => StunErrorKind::Connect,
            Self::Timeout { .. } => StunErrorKind::Timeout,
            Self::Io(e) if e.kind() == io::ErrorKind::TimedOut => StunErrorKind::Timeout,
            Self::Io(_) => StunErrorKind::Connect,
            Self::Protocol(_) | Self::MissingMappedAddress | Self::UnsupportedAddress(_) => {
                StunErrorKind::Protocol
            }
        }
    }
}

/// Narrow an OS-reported address to IPv4
pub(crate) fn ipv4(addr: SocketAddr) -> Result<SocketAddrV4, StunError> {
    match addr {
        SocketAddr::V4(v4) => Ok(v4),
        SocketAddr::V6(_) => Err(StunError::UnsupportedAddress(addr)),
    }
}

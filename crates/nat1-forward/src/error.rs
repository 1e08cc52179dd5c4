//! Forward engine errors.

use std::io;
use std::net::SocketAddrV4;
use thiserror::Error;

/// Forward engine errors
#[derive(Debug, Error)]
pub enum ForwardError {
    /// Public-facing socket could not be bound
    #[error("cannot bind {addr}: {source}")]
    Bind {
        /// Address we tried to bind
        addr: SocketAddrV4,
        /// Underlying OS error
        source: io::Error,
    },

    /// Keepalive failed: the public mapping no longer routes to us
    #[error("public mapping lost: {0}")]
    MappingLost(String),

    /// I/O error outside a single client connection
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ForwardError {
    /// Keepalive failure with context
    pub(crate) fn lost(context: &str, cause: impl std::fmt::Display) -> Self {
        Self::MappingLost(format!("{context}: {cause}"))
    }

    /// Whether the engine stopped because the mapping went away
    #[must_use]
    pub const fn is_mapping_lost(&self) -> bool {
        matches!(self, Self::MappingLost(_))
    }
}

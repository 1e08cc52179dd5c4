//! # NAT1 STUN
//!
//! STUN client side of NAT1 Traversal.
//!
//! This crate provides:
//! - A STUN binding message codec (XOR-MAPPED / MAPPED / OTHER-ADDRESS)
//! - Single binding exchanges over TCP or UDP, with CHANGE-REQUEST on UDP
//! - NAT type classification shared by both transports
//! - Public mapping discovery for a bound local address
//! - Socket helpers with address/port reuse, shared with the forwarders
//!
//! ## Example
//!
//! ```rust,no_run
//! use nat1_stun::{MappingResolver, NatClassifier, StunProbe, Transport};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let local = "0.0.0.0:25565".parse()?;
//!
//! let classifier = NatClassifier::new(
//!     "turn.cloud-rtc.com:80",
//!     "stun.douyucdn.cn:18000",
//!     StunProbe::new(),
//! );
//! let verdict = classifier.classify_udp(local).await;
//! println!("NAT{} {}", verdict.nat_type.code(), verdict.nat_type);
//!
//! let resolver = MappingResolver::new(Transport::Tcp, "turn.cloud-rtc.com:80", StunProbe::new());
//! let mapped = resolver.resolve(local).await?;
//! println!("reachable at {mapped}");
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod mapping;
pub mod message;
pub mod nat;
pub mod probe;
pub mod resolve;
pub mod socket;

pub use error::{ProtocolError, StunError, StunErrorKind};
pub use mapping::MappingResolver;
pub use message::{ChangeRequest, StunAttribute, StunMessage, StunMessageClass, TransactionId};
pub use nat::{Classification, NatClassifier, NatProber, NatType, classify};
pub use probe::{ProbeResult, StunProbe, Transport, UdpStunSocket};

//! # NAT1 Forward
//!
//! Port forwarding engines that keep a discovered NAT mapping alive.
//!
//! Each engine owns the local socket for its whole lifetime, relays client
//! traffic to a forward target, and runs a ping/pong keepalive through its own
//! public mapping. When the keepalive fails the engine returns
//! [`ForwardError::MappingLost`]; the caller rediscovers the mapping and
//! starts a new engine.
//!
//! ## Example
//!
//! ```rust,no_run
//! use nat1_forward::TcpForwarder;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let local = "0.0.0.0:25565".parse()?;
//! let target = "127.0.0.1:25566".parse()?;
//! let mapped = "203.0.113.5:41000".parse()?;
//!
//! let forwarder = TcpForwarder::bind(local, target)?;
//! if let Err(e) = forwarder.run(mapped).await {
//!     eprintln!("forwarding stopped: {e}");
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod keepalive;
pub mod session;
pub mod tcp;
pub mod udp;

pub use error::ForwardError;
pub use keepalive::{PingState, Route, Router};
pub use session::{Session, SessionTable};
pub use tcp::TcpForwarder;
pub use udp::UdpForwarder;

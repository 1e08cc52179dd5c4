//! Keepalive sub-protocol shared by both engines.
//!
//! Session #0 is reserved for keepalive: the first connection (TCP) or the
//! first source address (UDP) an engine sees is wired to an internal pong
//! responder instead of the forward target. The engine's own ping prober
//! dials the public mapping right at startup, so that first session is the
//! prober's traffic coming back in through the NAT. While pongs keep
//! arriving the mapping is known to be alive.

use crate::error::ForwardError;
use std::time::Duration;

/// Ping token
pub const PING: &[u8; 4] = b"ping";

/// Pong token
pub const PONG: &[u8; 4] = b"pong";

/// Delay between pings
pub const PING_INTERVAL: Duration = Duration::from_secs(1);

/// Consecutive unanswered UDP pings that end the engine
pub const MAX_MISSED_PONGS: u32 = 5;

/// Pings sent back to back when a UDP engine starts
pub const WARMUP_PINGS: usize = 3;

/// Where an accepted connection or new UDP source is wired
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Internal pong responder
    Keepalive,
    /// Real forward target
    Target,
}

/// Assigns routes in arrival order: the first is keepalive, the rest target
#[derive(Debug, Default)]
pub struct Router {
    assigned: u64,
}

impl Router {
    /// Fresh router for a new engine instance
    #[must_use]
    pub const fn new() -> Self {
        Self { assigned: 0 }
    }

    /// Route for the next connection or session
    pub fn next_route(&mut self) -> Route {
        let route = if self.assigned == 0 {
            Route::Keepalive
        } else {
            Route::Target
        };
        self.assigned += 1;
        route
    }

    /// Number of routes handed out so far
    #[must_use]
    pub const fn assigned(&self) -> u64 {
        self.assigned
    }
}

/// Consecutive unanswered pings
#[derive(Debug)]
pub struct PingState {
    missed: u32,
    max_missed: u32,
}

impl Default for PingState {
    fn default() -> Self {
        Self::new(MAX_MISSED_PONGS)
    }
}

impl PingState {
    /// Tracker failing on the `max_missed`th unanswered ping
    #[must_use]
    pub const fn new(max_missed: u32) -> Self {
        Self {
            missed: 0,
            max_missed,
        }
    }

    /// Count a scheduled ping
    ///
    /// # Errors
    ///
    /// Returns `ForwardError::MappingLost` once `max_missed` pings in a row
    /// went unanswered; the ping should not be sent then.
    pub fn on_ping(&mut self) -> Result<(), ForwardError> {
        self.missed += 1;
        if self.missed >= self.max_missed {
            return Err(ForwardError::MappingLost(format!(
                "{} consecutive pings unanswered",
                self.missed
            )));
        }
        Ok(())
    }

    /// A pong arrived
    pub fn on_pong(&mut self) {
        self.missed = 0;
    }

    /// Pings without a pong since the last reset
    #[must_use]
    pub const fn missed(&self) -> u32 {
        self.missed
    }
}

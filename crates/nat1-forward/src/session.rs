//! UDP session table
//!
//! One entry per client source address, owning the private socket that talks
//! to the forward target (or, for session #0, to the pong responder). Expiry
//! is checked against explicit `Instant`s so the clock can be simulated.

use crate::keepalive::{Route, Router};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Idle time after which a session is evicted
pub const SESSION_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// One client flow
#[derive(Debug)]
pub struct Session<S> {
    /// Private socket for this client
    pub socket: S,
    /// Keepalive or target
    pub route: Route,
    /// Last datagram in either direction
    pub last_activity: Instant,
}

impl<S> Session<S> {
    /// Whether the session has been idle longer than the timeout at `now`
    #[must_use]
    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_activity) > SESSION_IDLE_TIMEOUT
    }
}

/// Sessions keyed by client source address
#[derive(Debug)]
pub struct SessionTable<S> {
    sessions: HashMap<SocketAddr, Session<S>>,
    router: Router,
}

impl<S> Default for SessionTable<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> SessionTable<S> {
    /// Empty table for a new engine instance
    #[must_use]
    pub fn new() -> Self {
        Self {
            sessions: HashMap::new(),
            router: Router::new(),
        }
    }

    /// Route the next new session will get
    ///
    /// Only the very first session of the table is ever keepalive, even if it
    /// has since been evicted.
    #[must_use]
    pub fn next_route(&self) -> Route {
        if self.router.assigned() == 0 {
            Route::Keepalive
        } else {
            Route::Target
        }
    }

    /// Insert a session for `source`, taking the next route
    pub fn insert(&mut self, source: SocketAddr, socket: S, now: Instant) -> &mut Session<S> {
        let route = self.router.next_route();
        let session = Session {
            socket,
            route,
            last_activity: now,
        };
        self.sessions.entry(source).insert_entry(session).into_mut()
    }

    /// Session for `source`
    #[must_use]
    pub fn get(&self, source: &SocketAddr) -> Option<&Session<S>> {
        self.sessions.get(source)
    }

    /// Refresh `source`'s activity and return its session
    pub fn touch(&mut self, source: &SocketAddr, now: Instant) -> Option<&Session<S>> {
        let session = self.sessions.get_mut(source)?;
        session.last_activity = now;
        Some(session)
    }

    /// Drop every session idle for longer than the timeout at `now`
    ///
    /// Dropping a session closes its socket. Returns the evicted sources.
    pub fn sweep(&mut self, now: Instant) -> Vec<SocketAddr> {
        let expired: Vec<SocketAddr> = self
            .sessions
            .iter()
            .filter(|(_, session)| session.is_expired(now))
            .map(|(source, _)| *source)
            .collect();
        for source in &expired {
            self.sessions.remove(source);
        }
        expired
    }

    /// All sessions
    pub fn iter(&self) -> impl Iterator<Item = (&SocketAddr, &Session<S>)> {
        self.sessions.iter()
    }

    /// Number of live sessions
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// No live sessions
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

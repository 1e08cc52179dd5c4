//! TCP forward engine
//!
//! Accepts on the local address and splices every connection to the target,
//! except connection #0, which is the engine's own ping prober coming back in
//! through the public mapping and is answered by the pong responder.

use crate::error::ForwardError;
use crate::keepalive::{PING, PING_INTERVAL, PONG, Route, Router};
use nat1_stun::socket;
use std::net::{SocketAddr, SocketAddrV4};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

/// Ping prober connect timeout
const PING_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Ping prober wait for a pong
const PING_READ_TIMEOUT: Duration = Duration::from_secs(3);

/// Pong responder wait for the next ping
const PONG_READ_TIMEOUT: Duration = Duration::from_secs(15);

/// Connect timeout towards the forward target
const TARGET_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Keepalive read buffer
const KEEPALIVE_BUF: usize = 4096;

/// Pause after a failed accept, e.g. when out of file descriptors
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// TCP port forwarder bound to a local address
pub struct TcpForwarder {
    listener: TcpListener,
    local: SocketAddrV4,
    target: SocketAddrV4,
}

impl TcpForwarder {
    /// Bind `local` (with address/port reuse) and prepare to forward to `target`
    ///
    /// # Errors
    ///
    /// Returns `ForwardError::Bind` if the address is unavailable.
    pub fn bind(local: SocketAddrV4, target: SocketAddrV4) -> Result<Self, ForwardError> {
        let listener = socket::bind_tcp_listener(local)
            .map_err(|source| ForwardError::Bind { addr: local, source })?;
        let local = match listener.local_addr()? {
            SocketAddr::V4(addr) => addr,
            SocketAddr::V6(_) => local,
        };
        Ok(Self {
            listener,
            local,
            target,
        })
    }

    /// Bound local address
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddrV4 {
        self.local
    }

    /// Forward until the keepalive fails
    ///
    /// `mapped` is the public address of the local port. Per-connection
    /// failures are logged and isolated; the engine only returns when the
    /// ping prober or pong responder fails, and every connection still open
    /// is dropped with it.
    ///
    /// # Errors
    ///
    /// Returns `ForwardError::MappingLost` when the keepalive breaks.
    pub async fn run(self, mapped: SocketAddrV4) -> Result<(), ForwardError> {
        info!(
            local = %self.local,
            %mapped,
            target = %self.target,
            "TCP port forwarding started"
        );

        let mut keepalive: JoinSet<Result<(), ForwardError>> = JoinSet::new();
        let mut connections: JoinSet<()> = JoinSet::new();
        let mut router = Router::new();

        keepalive.spawn(ping_prober(mapped));

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => match router.next_route() {
                        Route::Keepalive => {
                            keepalive.spawn(pong_responder(stream, peer));
                        }
                        Route::Target => {
                            connections.spawn(splice(stream, peer, self.target));
                        }
                    },
                    Err(e) => accept_backoff(self.local, &e).await,
                },
                Some(finished) = keepalive.join_next() => {
                    let err = match finished {
                        Ok(Err(e)) => e,
                        Ok(Ok(())) => ForwardError::MappingLost("keepalive task ended".to_string()),
                        Err(e) => ForwardError::lost("keepalive task aborted", e),
                    };
                    error!(local = %self.local, %mapped, "{err}");
                    return Err(err);
                }
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }
    }
}

/// Log a failed accept and pause before the next one
async fn accept_backoff(local: SocketAddrV4, e: &std::io::Error) {
    warn!(%local, error = %e, "accept failed");
    sleep(ACCEPT_RETRY_DELAY).await;
}

/// Answer every chunk read from the keepalive connection with "pong"
///
/// Runs until the connection fails, closes, or stays silent for 15s.
async fn pong_responder(mut stream: TcpStream, peer: SocketAddr) -> Result<(), ForwardError> {
    info!(%peer, "pong responder started");
    stream.set_nodelay(true)?;
    let mut buf = [0u8; KEEPALIVE_BUF];

    loop {
        let n = match timeout(PONG_READ_TIMEOUT, stream.read(&mut buf)).await {
            Ok(Ok(0)) => return Err(ForwardError::lost("pong responder", "ping connection closed")),
            Ok(Ok(n)) => n,
            Ok(Err(e)) => return Err(ForwardError::lost("pong responder", e)),
            Err(_) => return Err(ForwardError::lost("pong responder", "no ping within 15s")),
        };
        debug!(%peer, bytes = n, "ping received");
        stream
            .write_all(PONG)
            .await
            .map_err(|e| ForwardError::lost("pong responder", e))?;
    }
}

/// Dial the public mapping and exchange ping/pong once per second
///
/// Any dial, write, read or timeout failure ends the prober.
async fn ping_prober(mapped: SocketAddrV4) -> Result<(), ForwardError> {
    info!(%mapped, "ping prober started");
    let mut stream = match timeout(PING_CONNECT_TIMEOUT, TcpStream::connect(SocketAddr::V4(mapped))).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => return Err(ForwardError::lost("ping prober cannot reach mapping", e)),
        Err(_) => {
            return Err(ForwardError::lost(
                "ping prober cannot reach mapping",
                "connect timed out",
            ));
        }
    };
    stream.set_nodelay(true)?;
    let mut buf = [0u8; KEEPALIVE_BUF];

    loop {
        stream
            .write_all(PING)
            .await
            .map_err(|e| ForwardError::lost("ping prober", e))?;
        // Reply is drained, not checked
        match timeout(PING_READ_TIMEOUT, stream.read(&mut buf)).await {
            Ok(Ok(0)) => return Err(ForwardError::lost("ping prober", "pong connection closed")),
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(ForwardError::lost("ping prober", e)),
            Err(_) => return Err(ForwardError::lost("ping prober", "no pong within 3s")),
        }
        sleep(PING_INTERVAL).await;
    }
}

/// Connect to `target` and copy bytes both ways until either side finishes
async fn splice(mut inbound: TcpStream, peer: SocketAddr, target: SocketAddrV4) {
    info!(%peer, %target, "new client");
    if let Err(e) = inbound.set_nodelay(true) {
        debug!(%peer, error = %e, "set_nodelay failed");
    }

    let mut outbound =
        match timeout(TARGET_CONNECT_TIMEOUT, TcpStream::connect(SocketAddr::V4(target))).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                error!(%peer, %target, error = %e, "cannot connect client to target");
                return;
            }
            Err(_) => {
                error!(%peer, %target, "connect to target timed out");
                return;
            }
        };
    if let Err(e) = outbound.set_nodelay(true) {
        debug!(%target, error = %e, "set_nodelay failed");
    }
    if let Ok(via) = outbound.local_addr() {
        info!(%peer, %via, "client connected");
    }

    let (mut client_read, mut client_write) = inbound.split();
    let (mut target_read, mut target_write) = outbound.split();

    tokio::select! {
        result = tokio::io::copy(&mut client_read, &mut target_write) => {
            if let Err(e) = result {
                warn!(%peer, error = %e, "client -> target copy failed");
            }
        }
        result = tokio::io::copy(&mut target_read, &mut client_write) => {
            if let Err(e) = result {
                warn!(%peer, error = %e, "target -> client copy failed");
            }
        }
    }
    info!(%peer, "client disconnected");
}

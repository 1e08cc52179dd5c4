//! UDP forward engine
//!
//! One task multiplexes the public socket, the pong responder, the ping
//! prober and every session's private socket. The session table is only
//! touched from that task, so it needs no locking. Session #0 is the ping
//! prober's own traffic and is wired to the pong responder.

use crate::error::ForwardError;
use crate::keepalive::{PING, PING_INTERVAL, PONG, PingState, Route, WARMUP_PINGS};
use crate::session::SessionTable;
use nat1_stun::socket;
use std::future::{Future, poll_fn};
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::task::Poll;
use std::time::{Duration, Instant};
use tokio::io::ReadBuf;
use tokio::net::UdpSocket;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, warn};

/// Housekeeping tick
const TICK: Duration = Duration::from_millis(100);

/// Interval between idle-session sweeps
const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Largest datagram relayed
const MAX_DATAGRAM: usize = 65_535;

/// Wakes up every `period`, checked against explicit instants
#[derive(Debug, Clone, Copy)]
struct Periodic {
    period: Duration,
    next: Instant,
}

impl Periodic {
    fn new(period: Duration, now: Instant) -> Self {
        Self {
            period,
            next: now + period,
        }
    }

    /// Whether the period elapsed at `now`; reschedules if so
    fn fire(&mut self, now: Instant) -> bool {
        if now < self.next {
            return false;
        }
        self.next = now + self.period;
        true
    }
}

/// Something one of the sockets produced
enum Event {
    Public(io::Result<(usize, SocketAddr)>),
    Session(SocketAddr, io::Result<usize>),
    Pong(io::Result<(usize, SocketAddr)>),
    Ping(io::Result<usize>),
    Tick,
}

/// UDP port forwarder bound to a local address
pub struct UdpForwarder {
    public: UdpSocket,
    pong: UdpSocket,
    local: SocketAddrV4,
    target: SocketAddrV4,
    sessions: SessionTable<UdpSocket>,
}

impl UdpForwarder {
    /// Bind `local` (with address/port reuse) and the loopback pong responder
    ///
    /// # Errors
    ///
    /// Returns `ForwardError::Bind` if `local` is unavailable.
    pub async fn bind(local: SocketAddrV4, target: SocketAddrV4) -> Result<Self, ForwardError> {
        let public = socket::bind_udp_socket(local)
            .map_err(|source| ForwardError::Bind { addr: local, source })?;
        let local = match public.local_addr()? {
            SocketAddr::V4(addr) => addr,
            SocketAddr::V6(_) => local,
        };
        let pong = UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0)).await?;
        Ok(Self {
            public,
            pong,
            local,
            target,
            sessions: SessionTable::new(),
        })
    }

    /// Bound local address
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddrV4 {
        self.local
    }

    /// Forward until `MAX_MISSED_PONGS` pings in a row go unanswered
    ///
    /// `mapped` is the public address of the local port. Send failures
    /// towards clients or the target are logged and never end the engine.
    ///
    /// # Errors
    ///
    /// Returns `ForwardError::MappingLost` when the keepalive breaks, or an
    /// I/O error if the ping prober socket cannot be set up.
    ///
    /// [`MAX_MISSED_PONGS`]: crate::keepalive::MAX_MISSED_PONGS
    pub async fn run(mut self, mapped: SocketAddrV4) -> Result<(), ForwardError> {
        let ping = UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0)).await?;
        ping.connect(SocketAddr::V4(mapped)).await?;

        info!(
            local = %self.local,
            %mapped,
            target = %self.target,
            "UDP port forwarding started"
        );

        for _ in 0..WARMUP_PINGS {
            if let Err(e) = ping.send(PING).await {
                debug!(%mapped, error = %e, "warm-up ping failed");
            }
        }

        let mut ping_state = PingState::default();
        let now = Instant::now();
        let mut ping_timer = Periodic::new(PING_INTERVAL, now);
        let mut sweep_timer = Periodic::new(SWEEP_INTERVAL, now);
        let mut tick = interval(TICK);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut public_buf = vec![0u8; MAX_DATAGRAM];
        let mut session_buf = vec![0u8; MAX_DATAGRAM];
        let mut pong_buf = [0u8; 64];
        let mut ping_buf = [0u8; 64];
        let mut session_cursor = 0;

        loop {
            let event = tokio::select! {
                received = self.public.recv_from(&mut public_buf) => Event::Public(received),
                (source, received) = recv_any_session(&self.sessions, &mut session_buf, &mut session_cursor) => {
                    Event::Session(source, received)
                }
                received = self.pong.recv_from(&mut pong_buf) => Event::Pong(received),
                received = ping.recv(&mut ping_buf) => Event::Ping(received),
                _ = tick.tick() => Event::Tick,
            };

            match event {
                Event::Public(Ok((len, source))) => {
                    self.on_public_datagram(source, &public_buf[..len]).await;
                }
                Event::Public(Err(e)) => debug!(local = %self.local, error = %e, "public receive failed"),
                Event::Session(source, Ok(len)) => {
                    self.on_session_datagram(source, &session_buf[..len]).await;
                }
                Event::Session(source, Err(e)) => {
                    warn!(client = %source, target = %self.target, error = %e, "forwarding error, target unreachable");
                }
                Event::Pong(Ok((len, from))) => {
                    if &pong_buf[..len] == PING {
                        if let Err(e) = self.pong.send_to(PONG, from).await {
                            debug!(%from, error = %e, "pong send failed");
                        }
                    }
                }
                Event::Pong(Err(e)) => debug!(error = %e, "pong receive failed"),
                Event::Ping(Ok(len)) => {
                    if &ping_buf[..len] == PONG {
                        ping_state.on_pong();
                    }
                }
                Event::Ping(Err(e)) => debug!(%mapped, error = %e, "ping receive failed"),
                Event::Tick => {}
            }

            let now = Instant::now();
            if sweep_timer.fire(now) {
                for source in self.sessions.sweep(now) {
                    info!(client = %source, "client idle, session closed");
                }
            }
            if ping_timer.fire(now) {
                if let Err(e) = ping_state.on_ping() {
                    error!(local = %self.local, %mapped, "{e}");
                    return Err(e);
                }
                if let Err(e) = ping.send(PING).await {
                    debug!(%mapped, error = %e, "ping send failed");
                }
            }
        }
    }

    /// Datagram from a client: find or open its session and pass it on
    async fn on_public_datagram(&mut self, source: SocketAddr, payload: &[u8]) {
        let now = Instant::now();
        if self.sessions.get(&source).is_none() {
            let route = self.sessions.next_route();
            let destination = match route {
                Route::Keepalive => match self.pong.local_addr() {
                    Ok(addr) => addr,
                    Err(e) => {
                        error!(error = %e, "pong responder address unavailable");
                        return;
                    }
                },
                Route::Target => SocketAddr::V4(self.target),
            };
            let socket = match open_session_socket(destination).await {
                Ok(socket) => socket,
                Err(e) => {
                    error!(client = %source, %destination, error = %e, "cannot open session socket");
                    return;
                }
            };
            match (route, socket.local_addr()) {
                (Route::Keepalive, _) => info!(client = %source, "keepalive session opened"),
                (Route::Target, Ok(via)) => info!(client = %source, %via, "new client"),
                (Route::Target, Err(_)) => info!(client = %source, "new client"),
            }
            self.sessions.insert(source, socket, now);
        }

        let Some(session) = self.sessions.touch(&source, now) else {
            return;
        };
        if let Err(e) = session.socket.send(payload).await {
            warn!(client = %source, target = %self.target, error = %e, "forwarding error, target unreachable");
        }
    }

    /// Reply on a session socket: send it back to the client
    async fn on_session_datagram(&mut self, source: SocketAddr, payload: &[u8]) {
        self.sessions.touch(&source, Instant::now());
        if let Err(e) = self.public.send_to(payload, source).await {
            warn!(client = %source, error = %e, "reply to client failed");
        }
    }
}

/// Ephemeral socket connected to `destination`
async fn open_session_socket(destination: SocketAddr) -> io::Result<UdpSocket> {
    let socket = UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0)).await?;
    socket.connect(destination).await?;
    Ok(socket)
}

/// Wait for a datagram on any session socket
///
/// Polling starts at `cursor` and the cursor moves past the session that
/// was ready, so sessions take turns. Pending forever while there are no
/// sessions.
fn recv_any_session<'a>(
    sessions: &'a SessionTable<UdpSocket>,
    buf: &'a mut [u8],
    cursor: &'a mut usize,
) -> impl Future<Output = (SocketAddr, io::Result<usize>)> + 'a {
    poll_fn(move |cx| {
        let count = sessions.len();
        if count == 0 {
            return Poll::Pending;
        }
        let start = *cursor % count;
        let rotated = sessions.iter().skip(start).chain(sessions.iter().take(start));
        for (offset, (source, session)) in rotated.enumerate() {
            let mut read = ReadBuf::new(&mut *buf);
            if let Poll::Ready(result) = session.socket.poll_recv(cx, &mut read) {
                *cursor = start + offset + 1;
                let len = read.filled().len();
                return Poll::Ready((*source, result.map(|()| len)));
            }
        }
        Poll::Pending
    })
}

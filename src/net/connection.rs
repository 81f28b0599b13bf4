//! TLS connection lifecycle and record I/O.
//!
//! # Responsibilities
//! - Establish client connections (direct and via resolution)
//! - Drive the TLS handshake across non-blocking retries, bounded by the
//!   configured timeout
//! - Read/write application data, transparently re-entering the handshake
//!   when the peer renegotiates mid-stream
//! - Exchange close-notify on shutdown and commit the resumption snapshot
//!   only after a fully clean close
//!
//! A `Connection` exclusively owns its descriptor and TLS session. It is
//! either fully established or it does not exist: every construction
//! failure unwinds the partially built value, and `close` consumes the
//! value, so use-after-close is a compile error.

use std::io::{self, Read as _, Write as _};
use std::net::{IpAddr, SocketAddr, SocketAddrV6};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use mio::net::TcpStream;
use rustls::client::ClientConnection;
use rustls::pki_types::ServerName;
use rustls::server::ServerConnection;
use rustls::{AlertDescription, HandshakeKind};
use socket2::{Domain, Socket, Type};
use tracing::{debug, trace, warn};

use crate::config::credentials::{with_session_bridge, ClientContext, ServerContext};
use crate::error::{Error, Result};
use crate::net::readiness::{Direction, Readiness, Wait};
use crate::net::resolver;
use crate::net::verify;
use crate::session::cache::SessionBridge;
use crate::session::{CachedSession, ClientSessionCache};

/// Pause before releasing the descriptor, so in-flight alert records can
/// drain on the wire.
const CLOSE_LINGER: Duration = Duration::from_millis(200);

/// Global atomic counter for connection IDs. Relaxed ordering is enough:
/// only uniqueness matters.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection, used in log fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Which end of the connection this is. Fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// Outcome of a graceful close. Close never hard-errors, but whether the
/// close-notify exchange completed and whether a resumption entry was
/// cached are observable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloseSummary {
    /// Both directions exchanged close-notify within the timeout.
    pub clean: bool,
    /// A resumption entry was handed to the client cache.
    pub session_cached: bool,
}

/// Why a bounded retry loop stopped making progress.
enum Stall {
    TimedOut,
    Interrupted,
    Failed(io::Error),
}

impl Stall {
    fn into_error(self, hard: fn(String) -> Error) -> Error {
        match self {
            Stall::TimedOut => Error::Timeout,
            Stall::Interrupted => Error::Interrupted,
            Stall::Failed(err) => hard(err.to_string()),
        }
    }
}

/// One TLS-secured IPv6 stream endpoint.
pub struct Connection {
    id: ConnectionId,
    role: Role,
    stream: TcpStream,
    peer_addr: SocketAddrV6,
    session: rustls::Connection,
    readiness: Readiness,
    timeout: Duration,
    peer_closed: bool,
    verify_name: Option<ServerName<'static>>,
    bridge: Option<Arc<SessionBridge>>,
    cache: Option<Arc<dyn ClientSessionCache>>,
}

impl Connection {
    /// Connect to `addr` and complete the handshake/verification
    /// pipeline. `verify_name` is the hostname the server certificate
    /// must match; without one the peer address stands in as the
    /// expected identity and no separate hostname check runs.
    pub fn connect(
        ctx: &ClientContext,
        addr: SocketAddrV6,
        verify_name: Option<&str>,
        timeout: Duration,
    ) -> Result<Self> {
        let socket = Socket::new(Domain::IPV6, Type::STREAM, None).map_err(Error::Open)?;
        // OS-level blocking connect; non-blocking mode is applied after.
        socket
            .connect(&SocketAddr::V6(addr).into())
            .map_err(Error::Connect)?;
        Self::establish_client(ctx, socket, addr, verify_name, timeout)
    }

    /// Resolve `host:port` and try each IPv6 candidate in order. Stops at
    /// the first success, or at the first failure that is not a plain
    /// connect error; if every candidate fails to connect, the last
    /// connect error is returned.
    pub fn resolve_and_connect(
        ctx: &ClientContext,
        host: &str,
        port: u16,
        verify_name: Option<&str>,
        timeout: Duration,
    ) -> Result<Self> {
        let mut last_connect_err = None;
        for addr in resolver::resolve(host, port)? {
            match Self::connect(ctx, addr, verify_name, timeout) {
                Ok(conn) => return Ok(conn),
                Err(err @ Error::Connect(_)) => {
                    debug!(%addr, %err, "candidate failed to connect");
                    last_connect_err = Some(err);
                }
                Err(err) => return Err(err),
            }
        }
        Err(last_connect_err
            .unwrap_or_else(|| Error::Address(format!("no usable candidate for {host}:{port}"))))
    }

    fn establish_client(
        ctx: &ClientContext,
        socket: Socket,
        addr: SocketAddrV6,
        verify_name: Option<&str>,
        timeout: Duration,
    ) -> Result<Self> {
        socket.set_nonblocking(true).map_err(Error::config)?;
        let mut stream = TcpStream::from_std(socket.into());

        let name: ServerName<'static> = match verify_name {
            Some(host) => ServerName::try_from(host.to_owned())
                .map_err(|_| Error::Argument("invalid verification hostname"))?,
            None => ServerName::from(IpAddr::V6(*addr.ip())),
        };

        // Resumption lookup happens before the handshake starts. A cached
        // entry issued for some other peer name cannot be applied; that is
        // a visible cache fault, not something to skip silently.
        let seeded = match ctx.cache.get(&addr) {
            Some(entry) if !entry.is_empty() => {
                if entry.server_name() != &name {
                    return Err(Error::Cache(format!(
                        "entry for {addr} was issued for {:?}, not {name:?}",
                        entry.server_name()
                    )));
                }
                trace!(peer = %addr, "seeding session from cache");
                entry
            }
            _ => CachedSession::new(name.clone()),
        };
        let bridge = Arc::new(SessionBridge::new(name.clone(), seeded));

        let config = with_session_bridge(&ctx.base, bridge.clone());
        let session = ClientConnection::new(config, name.clone()).map_err(Error::config)?;

        let mut readiness = Readiness::new().map_err(Error::config)?;
        readiness.register(&mut stream).map_err(Error::config)?;

        let mut conn = Self {
            id: ConnectionId::next(),
            role: Role::Client,
            stream,
            peer_addr: addr,
            session: rustls::Connection::Client(session),
            readiness,
            timeout,
            peer_closed: false,
            verify_name: verify_name.map(|_| name),
            bridge: Some(bridge),
            cache: Some(ctx.cache.clone()),
        };
        conn.complete_handshake()?;
        conn.verify_peer()?;
        debug!(id = %conn.id, peer = %conn.peer_addr, resumed = conn.is_resumed(), "client connection established");
        Ok(conn)
    }

    /// Wrap a freshly accepted stream in the server-role pipeline:
    /// handshake, then client verification when the context demands it.
    pub(crate) fn establish_server(
        ctx: &ServerContext,
        mut stream: TcpStream,
        peer_addr: SocketAddrV6,
        timeout: Duration,
    ) -> Result<Self> {
        let session = ServerConnection::new(ctx.config.clone()).map_err(Error::config)?;
        let mut readiness = Readiness::new().map_err(Error::config)?;
        readiness.register(&mut stream).map_err(Error::config)?;

        let mut conn = Self {
            id: ConnectionId::next(),
            role: Role::Server,
            stream,
            peer_addr,
            session: rustls::Connection::Server(session),
            readiness,
            timeout,
            peer_closed: false,
            verify_name: None,
            bridge: None,
            cache: None,
        };
        conn.complete_handshake()?;
        if ctx.requires_client_auth() {
            conn.verify_peer()?;
        }
        debug!(id = %conn.id, peer = %conn.peer_addr, resumed = conn.is_resumed(), "server connection established");
        Ok(conn)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn peer_addr(&self) -> SocketAddrV6 {
        self.peer_addr
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Whether the handshake resumed a cached session instead of running
    /// a full exchange.
    pub fn is_resumed(&self) -> bool {
        matches!(self.session.handshake_kind(), Some(HandshakeKind::Resumed))
    }

    /// Drive the handshake to completion. Also re-entered mid-stream when
    /// the peer renegotiates.
    fn complete_handshake(&mut self) -> Result<()> {
        let deadline = Instant::now() + self.timeout;
        loop {
            self.drain_outgoing(deadline)
                .map_err(|stall| stall.into_error(Error::Handshake))?;
            if !self.session.is_handshaking() {
                return Ok(());
            }
            match self.session.read_tls(&mut self.stream) {
                Ok(0) => {
                    return Err(Error::Handshake("peer closed during handshake".into()));
                }
                Ok(_) => {
                    if let Err(err) = self.process_packets() {
                        // Push any queued alert out before reporting.
                        while self.session.wants_write() {
                            if self.session.write_tls(&mut self.stream).is_err() {
                                break;
                            }
                        }
                        return Err(classify_engine_error(err));
                    }
                }
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => {
                    self.await_ready(Direction::Read, deadline)
                        .map_err(|stall| stall.into_error(Error::Handshake))?;
                }
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => {
                    return Err(Error::Interrupted);
                }
                Err(err) => return Err(Error::Handshake(err.to_string())),
            }
        }
    }

    fn verify_peer(&self) -> Result<()> {
        let chain = self.session.peer_certificates().unwrap_or(&[]);
        verify::verify_peer(chain, self.verify_name.as_ref())
    }

    /// Request a new handshake on an established connection. Only the
    /// server side may initiate one; a client call fails before any
    /// network I/O happens.
    pub fn rehandshake(&mut self) -> Result<()> {
        let session = match (self.role, &mut self.session) {
            (Role::Server, rustls::Connection::Server(session)) => session,
            _ => {
                return Err(Error::Handshake(
                    "only the server side may request a rehandshake".into(),
                ));
            }
        };
        session.refresh_traffic_keys().map_err(classify_engine_error)?;

        let deadline = Instant::now() + self.timeout;
        self.drain_outgoing(deadline)
            .map_err(|stall| stall.into_error(Error::Handshake))?;
        if self.session.is_handshaking() {
            self.complete_handshake()?;
        }
        debug!(id = %self.id, peer = %self.peer_addr, "rehandshake completed");
        Ok(())
    }

    /// Receive application data.
    ///
    /// Returns the number of bytes read; `Ok(0)` means the peer performed
    /// an orderly shutdown. A rehandshake requested by the peer is
    /// completed in place before the receive is retried, so a single call
    /// may span a full handshake round-trip.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let deadline = Instant::now() + self.timeout;
        loop {
            match self.session.reader().read(buf) {
                Ok(n) => return Ok(n),
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => {
                    // Nothing decrypted yet; pull more records below.
                }
                Err(ref err) if err.kind() == io::ErrorKind::UnexpectedEof => {
                    return Err(Error::Read("peer closed without close-notify".into()));
                }
                Err(err) => return Err(Error::Read(err.to_string())),
            }

            // The engine flips back into handshaking when the peer asks
            // for a renegotiation; finish it, then retry the receive.
            if self.session.is_handshaking() {
                trace!(id = %self.id, "peer requested rehandshake during read");
                self.complete_handshake()?;
                continue;
            }

            match self.session.read_tls(&mut self.stream) {
                Ok(0) => {
                    // TCP EOF. Whether this is orderly depends on the
                    // engine having seen close-notify.
                    if let Err(err) = self.process_packets() {
                        return Err(Error::Read(err.to_string()));
                    }
                    return match self.session.reader().read(buf) {
                        Ok(n) => Ok(n),
                        Err(ref err)
                            if err.kind() == io::ErrorKind::UnexpectedEof
                                || err.kind() == io::ErrorKind::WouldBlock =>
                        {
                            Err(Error::Read("connection lost before close-notify".into()))
                        }
                        Err(err) => Err(Error::Read(err.to_string())),
                    };
                }
                Ok(_) => {
                    if let Err(err) = self.process_packets() {
                        return Err(Error::Read(err.to_string()));
                    }
                    // Responses the engine queued (key updates, alerts)
                    // go out before the next receive attempt.
                    self.drain_outgoing(deadline)
                        .map_err(|stall| stall.into_error(Error::Read))?;
                }
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => {
                    self.await_ready(Direction::Read, deadline)
                        .map_err(|stall| stall.into_error(Error::Read))?;
                }
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => {
                    return Err(Error::Interrupted);
                }
                Err(err) => return Err(Error::Read(err.to_string())),
            }
        }
    }

    /// Receive exactly `buf.len()` bytes. Any intermediate non-positive
    /// outcome returns immediately: `Ok(0)` when the peer closed first,
    /// never a partial count.
    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.read(&mut buf[filled..])?;
            if n == 0 {
                return Ok(0);
            }
            filled += n;
        }
        Ok(filled)
    }

    /// Send application data, waiting on write-readiness as needed.
    /// Unlike `read`, the send path never observes rehandshake requests;
    /// the engine only surfaces those on receive.
    pub fn write(&mut self, buf: &[u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let deadline = Instant::now() + self.timeout;
        let written = self
            .session
            .writer()
            .write(buf)
            .map_err(|err| Error::Write(err.to_string()))?;
        self.drain_outgoing(deadline)
            .map_err(|stall| stall.into_error(Error::Write))?;
        Ok(written)
    }

    /// Send the whole buffer.
    pub fn write_exact(&mut self, buf: &[u8]) -> Result<usize> {
        let mut sent = 0;
        while sent < buf.len() {
            let n = self.write(&buf[sent..])?;
            if n == 0 {
                return Ok(0);
            }
            sent += n;
        }
        Ok(sent)
    }

    /// Exchange close-notify with the peer and release the connection.
    ///
    /// Best-effort by design: timeout, interruption or any failure ends
    /// the exchange without error. The resumption snapshot is committed
    /// to the client cache only when both directions completed.
    pub fn close(mut self) -> CloseSummary {
        let deadline = Instant::now() + self.timeout;
        self.session.send_close_notify();

        let mut sent = false;
        let mut received = self.peer_closed;
        loop {
            match self.drain_outgoing(deadline) {
                Ok(()) => sent = true,
                Err(_) => break,
            }
            if received {
                break;
            }
            match self.session.read_tls(&mut self.stream) {
                Ok(0) => break, // EOF without the peer's close-notify
                Ok(_) => {
                    if self.process_packets().is_err() {
                        break;
                    }
                    if self.peer_closed {
                        received = true;
                    }
                }
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => {
                    match self.await_ready(Direction::Read, deadline) {
                        Ok(()) => {}
                        Err(_) => break,
                    }
                }
                Err(_) => break,
            }
        }
        let clean = sent && received;

        // Tickets keep arriving until the very end; take the snapshot
        // after the exchange so a clean close caches everything issued.
        let mut session_cached = false;
        if clean {
            if let (Some(bridge), Some(cache)) = (&self.bridge, &self.cache) {
                let snapshot = bridge.take_fresh();
                if !snapshot.is_empty() {
                    cache.set(self.peer_addr, snapshot);
                    session_cached = true;
                }
            }
        }

        debug!(id = %self.id, peer = %self.peer_addr, clean, session_cached, "connection closed");
        std::thread::sleep(CLOSE_LINGER);
        CloseSummary {
            clean,
            session_cached,
        }
        // Dropping self releases the session and closes the descriptor,
        // exactly once.
    }

    /// Decrypt buffered records and track the peer's close-notify.
    fn process_packets(&mut self) -> std::result::Result<(), rustls::Error> {
        let state = self.session.process_new_packets()?;
        if state.peer_has_closed() {
            self.peer_closed = true;
        }
        Ok(())
    }

    /// Flush everything the engine has queued for the wire.
    fn drain_outgoing(&mut self, deadline: Instant) -> std::result::Result<(), Stall> {
        while self.session.wants_write() {
            match self.session.write_tls(&mut self.stream) {
                Ok(_) => {}
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => {
                    self.await_ready(Direction::Write, deadline)?;
                }
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => {
                    return Err(Stall::Interrupted);
                }
                Err(err) => return Err(Stall::Failed(err)),
            }
        }
        Ok(())
    }

    /// One bounded readiness wait against the operation deadline.
    fn await_ready(
        &mut self,
        direction: Direction,
        deadline: Instant,
    ) -> std::result::Result<(), Stall> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match self.readiness.wait(direction, remaining) {
            Ok(Wait::Ready) => Ok(()),
            Ok(Wait::TimedOut) => Err(Stall::TimedOut),
            Ok(Wait::Interrupted) => Err(Stall::Interrupted),
            Err(err) => Err(Stall::Failed(err)),
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("peer_addr", &self.peer_addr)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Map an engine-reported failure onto the transport taxonomy. The engine
/// does not expose alert levels, so every surfaced alert takes the
/// warning-alert branch; a `no_renegotiation` alert is the peer
/// respectfully declining a rehandshake.
fn classify_engine_error(err: rustls::Error) -> Error {
    match err {
        rustls::Error::AlertReceived(AlertDescription::NoRenegotiation) => {
            Error::RehandshakeRefused
        }
        rustls::Error::AlertReceived(alert) => {
            warn!(?alert, "peer sent alert");
            Error::WarningAlert(format!("{alert:?}"))
        }
        rustls::Error::InvalidCertificate(reason) => {
            warn!(?reason, "engine rejected peer certificate");
            Error::PeerCertVerify(format!("{reason:?}"))
        }
        other => Error::Handshake(other.to_string()),
    }
}

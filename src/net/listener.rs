//! Listening socket for server-role connections.
//!
//! # Responsibilities
//! - Open, configure, bind and listen with a distinct error per step
//! - Accept pending connections within the configured wait bound
//! - Run every accepted stream through the handshake/verify pipeline
//!   before handing it to the caller

use std::net::{Ipv6Addr, SocketAddr, SocketAddrV6};
use std::time::{Duration, Instant};

use mio::net::TcpListener;
use socket2::{Domain, Socket, Type};
use tracing::{debug, warn};

use crate::config::credentials::ServerContext;
use crate::error::{Error, Result};
use crate::net::connection::Connection;
use crate::net::readiness::{Direction, Readiness, Wait};

/// A bound, listening IPv6 server socket. Its lifecycle is independent of
/// any connection it produces.
pub struct Listener {
    inner: TcpListener,
    local_addr: SocketAddrV6,
    timeout: Duration,
    backlog: u32,
    readiness: Readiness,
}

impl Listener {
    /// Bind the IPv6 wildcard address on `port` and start listening.
    /// Port 0 asks the OS for an ephemeral port; see [`Listener::local_addr`].
    pub fn open(port: u16, timeout: Duration, backlog: u32) -> Result<Self> {
        let socket = Socket::new(Domain::IPV6, Type::STREAM, None).map_err(Error::Open)?;
        socket.set_reuse_address(true).map_err(Error::config)?;
        let bind_addr = SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, port, 0, 0);
        socket
            .bind(&SocketAddr::V6(bind_addr).into())
            .map_err(Error::Bind)?;
        socket.listen(backlog as i32).map_err(Error::Listen)?;
        socket.set_nonblocking(true).map_err(Error::config)?;

        let mut inner = TcpListener::from_std(socket.into());
        let local_addr = match inner.local_addr().map_err(Error::config)? {
            SocketAddr::V6(addr) => addr,
            SocketAddr::V4(addr) => {
                return Err(Error::Config(format!(
                    "listener bound to a non-IPv6 address: {addr}"
                )));
            }
        };
        let mut readiness = Readiness::new().map_err(Error::config)?;
        readiness.register_readable(&mut inner).map_err(Error::config)?;

        debug!(%local_addr, backlog, "listener bound");
        Ok(Self {
            inner,
            local_addr,
            timeout,
            backlog,
            readiness,
        })
    }

    /// The bound address; useful when the listener was opened on port 0.
    pub fn local_addr(&self) -> SocketAddrV6 {
        self.local_addr
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn backlog(&self) -> u32 {
        self.backlog
    }

    /// Wait for one pending connection, accept it, and run the full
    /// server-role handshake/verification pipeline before returning.
    ///
    /// Expiry of the wait bound is `Timeout`; a signal is `Interrupted`.
    /// The two are distinct, so the caller can choose to retry or shut down.
    pub fn accept(&mut self, ctx: &ServerContext) -> Result<Connection> {
        let deadline = Instant::now() + self.timeout;
        let (stream, peer_addr) = loop {
            match self.inner.accept() {
                Ok((stream, SocketAddr::V6(peer))) => break (stream, peer),
                Ok((_, SocketAddr::V4(peer))) => {
                    // Cannot happen on an IPv6-bound socket (v4-mapped
                    // peers arrive as V6); drop it and keep waiting.
                    warn!(%peer, "dropping non-IPv6 peer");
                }
                Err(ref err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    match self.readiness.wait(Direction::Read, remaining) {
                        Ok(Wait::Ready) => {}
                        Ok(Wait::TimedOut) => return Err(Error::Timeout),
                        Ok(Wait::Interrupted) => return Err(Error::Interrupted),
                        Err(err) => return Err(Error::Accept(err)),
                    }
                }
                Err(ref err) if err.kind() == std::io::ErrorKind::Interrupted => {
                    return Err(Error::Interrupted);
                }
                Err(err) => return Err(Error::Accept(err)),
            }
        };

        debug!(peer = %peer_addr, "accepted connection");
        Connection::establish_server(ctx, stream, peer_addr, self.timeout)
    }

    /// Release the listening socket.
    pub fn close(self) {
        debug!(local_addr = %self.local_addr, "listener closed");
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("local_addr", &self.local_addr)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

//! Host/port resolution, filtered to IPv6 stream endpoints.
//!
//! Thin wrapper over the OS resolver; candidates come back in resolver
//! order and `Connection::resolve_and_connect` tries them in that order.

use std::net::{SocketAddr, SocketAddrV6, ToSocketAddrs};

use crate::error::{Error, Result};

/// Resolve `host:port` to its IPv6 stream candidates.
pub fn resolve(host: &str, port: u16) -> Result<Vec<SocketAddrV6>> {
    if host.is_empty() {
        return Err(Error::Argument("host must not be empty"));
    }
    let candidates: Vec<SocketAddrV6> = (host, port)
        .to_socket_addrs()
        .map_err(|err| Error::Address(format!("{host}:{port}: {err}")))?
        .filter_map(|addr| match addr {
            SocketAddr::V6(v6) => Some(v6),
            SocketAddr::V4(_) => None,
        })
        .collect();
    if candidates.is_empty() {
        return Err(Error::Address(format!(
            "no IPv6 stream endpoint for {host}:{port}"
        )));
    }
    Ok(candidates)
}

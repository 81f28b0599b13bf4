//! TLS-over-IPv6 stream transport.
//!
//! One [`Connection`] per secured stream: connect or accept, authenticated
//! handshake, timeout-bounded reads and writes, session resumption,
//! server-initiated rehandshake, and a graceful close-notify exchange.
//! Every blocking point is bounded by the connection's configured timeout,
//! and `Timeout` / `Interrupted` are distinct, retryable outcomes.
//!
//! Connections are synchronous and single-threaded by contract; run one
//! per thread (or drive several from your own dispatch layer). The only
//! state shared between connections is the session cache, which is safe
//! for concurrent use.

pub mod config;
pub mod error;
pub mod net;
pub mod session;

pub use config::{ClientContext, ServerContext, TransportConfig};
pub use error::{Error, Result};
pub use net::{CloseSummary, Connection, Listener, Role};
pub use session::{
    CachedSession, ClientSessionCache, MemoryClientCache, MemoryServerCache, ServerSessionCache,
};

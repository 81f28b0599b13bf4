//! Session-resumption cache boundary.
//!
//! # Responsibilities
//! - Define the external cache interfaces (client keyed by peer address,
//!   server keyed by opaque session id)
//! - Provide mutex-guarded in-memory implementations safe for use from
//!   many connections concurrently
//! - Bridge both interfaces onto the TLS engine's storage callbacks
//!
//! Client-side entries are committed only when a connection closes with a
//! completed close-notify exchange; tickets issued mid-connection are
//! quarantined in the per-connection bridge until then.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::net::SocketAddrV6;
use std::sync::{Arc, Mutex};

use rustls::client::{ClientSessionStore, Tls12ClientSessionValue, Tls13ClientSessionValue};
use rustls::pki_types::ServerName;
use rustls::server::StoresServerSessions;
use rustls::NamedGroup;
use tracing::trace;

/// Tickets kept per peer. The server controls how many it issues; anything
/// beyond this bound is discarded oldest-first.
const TICKETS_PER_PEER: usize = 8;

/// Client-side resumption cache, keyed by peer address.
///
/// The backing store is external to the transport; implementations must be
/// safe to call from multiple connections concurrently. Entries are
/// consumed by retrieval: TLS 1.3 tickets are single-use, and a clean
/// close of the resumed connection stores a fresh entry.
pub trait ClientSessionCache: Send + Sync {
    /// Remove and return the session stored for `peer`, if any.
    fn get(&self, peer: &SocketAddrV6) -> Option<CachedSession>;

    /// Store `session` for `peer`, replacing any existing entry.
    fn set(&self, peer: SocketAddrV6, session: CachedSession);
}

/// Server-side resumption cache, keyed by an opaque session id.
///
/// The TLS engine drives these callbacks during the handshake; they may be
/// invoked from whatever thread each connection runs on.
pub trait ServerSessionCache: Send + Sync {
    /// Store `data` under `id`, replacing any existing value.
    /// Returns false if the entry was not stored.
    fn store(&self, id: Vec<u8>, data: Vec<u8>) -> bool;

    /// Look up the value stored under `id`.
    fn retrieve(&self, id: &[u8]) -> Option<Vec<u8>>;

    /// Remove and return the value stored under `id`.
    fn remove(&self, id: &[u8]) -> Option<Vec<u8>>;
}

/// Opaque resumption state for one peer: the engine-issued session values
/// together with the peer name they were issued for.
pub struct CachedSession {
    name: ServerName<'static>,
    kx_hint: Option<NamedGroup>,
    tls12: Option<Tls12ClientSessionValue>,
    tickets: VecDeque<Tls13ClientSessionValue>,
}

impl CachedSession {
    pub(crate) fn new(name: ServerName<'static>) -> Self {
        Self {
            name,
            kx_hint: None,
            tls12: None,
            tickets: VecDeque::new(),
        }
    }

    /// The peer name the contained session data was issued for.
    pub fn server_name(&self) -> &ServerName<'static> {
        &self.name
    }

    /// True when there is nothing to resume from.
    pub fn is_empty(&self) -> bool {
        self.tls12.is_none() && self.tickets.is_empty()
    }
}

impl fmt::Debug for CachedSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedSession")
            .field("server_name", &self.name)
            .field("tls12", &self.tls12.is_some())
            .field("tickets", &self.tickets.len())
            .finish()
    }
}

/// In-memory [`ClientSessionCache`].
#[derive(Default)]
pub struct MemoryClientCache {
    entries: Mutex<HashMap<SocketAddrV6, CachedSession>>,
}

impl MemoryClientCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a resumable entry is currently stored for `peer`.
    pub fn contains(&self, peer: &SocketAddrV6) -> bool {
        self.entries
            .lock()
            .expect("client cache poisoned")
            .get(peer)
            .is_some_and(|entry| !entry.is_empty())
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("client cache poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ClientSessionCache for MemoryClientCache {
    fn get(&self, peer: &SocketAddrV6) -> Option<CachedSession> {
        self.entries
            .lock()
            .expect("client cache poisoned")
            .remove(peer)
    }

    fn set(&self, peer: SocketAddrV6, session: CachedSession) {
        trace!(%peer, ?session, "storing client session");
        self.entries
            .lock()
            .expect("client cache poisoned")
            .insert(peer, session);
    }
}

/// In-memory [`ServerSessionCache`] with a fixed capacity. A full cache
/// refuses new entries rather than evicting live ones.
pub struct MemoryServerCache {
    capacity: usize,
    entries: Mutex<HashMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryServerCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl ServerSessionCache for MemoryServerCache {
    fn store(&self, id: Vec<u8>, data: Vec<u8>) -> bool {
        let mut entries = self.entries.lock().expect("server cache poisoned");
        if entries.len() >= self.capacity && !entries.contains_key(&id) {
            return false;
        }
        entries.insert(id, data);
        true
    }

    fn retrieve(&self, id: &[u8]) -> Option<Vec<u8>> {
        self.entries
            .lock()
            .expect("server cache poisoned")
            .get(id)
            .cloned()
    }

    fn remove(&self, id: &[u8]) -> Option<Vec<u8>> {
        self.entries
            .lock()
            .expect("server cache poisoned")
            .remove(id)
    }
}

/// Per-connection bridge between the engine's client session store and the
/// external cache.
///
/// Resumption data found in the external cache at connection setup is
/// served to the engine from `seeded`; values the engine stores during the
/// connection accumulate in `fresh` and are only handed to the external
/// cache if the connection closes cleanly.
pub(crate) struct SessionBridge {
    name: ServerName<'static>,
    seeded: Mutex<CachedSession>,
    fresh: Mutex<CachedSession>,
}

impl SessionBridge {
    pub(crate) fn new(name: ServerName<'static>, seeded: CachedSession) -> Self {
        let fresh = CachedSession::new(name.clone());
        Self {
            name,
            seeded: Mutex::new(seeded),
            fresh: Mutex::new(fresh),
        }
    }

    /// Take everything the engine stored on this connection, leaving the
    /// bridge empty. Called once, at close time.
    pub(crate) fn take_fresh(&self) -> CachedSession {
        let mut fresh = self.fresh.lock().expect("session bridge poisoned");
        std::mem::replace(&mut *fresh, CachedSession::new(self.name.clone()))
    }
}

impl fmt::Debug for SessionBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionBridge")
            .field("server_name", &self.name)
            .finish_non_exhaustive()
    }
}

impl ClientSessionStore for SessionBridge {
    fn set_kx_hint(&self, _server_name: ServerName<'static>, group: NamedGroup) {
        self.fresh.lock().expect("session bridge poisoned").kx_hint = Some(group);
    }

    fn kx_hint(&self, _server_name: &ServerName<'_>) -> Option<NamedGroup> {
        let fresh = self.fresh.lock().expect("session bridge poisoned");
        if let Some(group) = fresh.kx_hint {
            return Some(group);
        }
        self.seeded.lock().expect("session bridge poisoned").kx_hint
    }

    fn set_tls12_session(
        &self,
        _server_name: ServerName<'static>,
        value: Tls12ClientSessionValue,
    ) {
        self.fresh.lock().expect("session bridge poisoned").tls12 = Some(value);
    }

    fn tls12_session(&self, _server_name: &ServerName<'_>) -> Option<Tls12ClientSessionValue> {
        self.seeded
            .lock()
            .expect("session bridge poisoned")
            .tls12
            .take()
    }

    fn remove_tls12_session(&self, _server_name: &ServerName<'static>) {
        self.seeded.lock().expect("session bridge poisoned").tls12 = None;
        self.fresh.lock().expect("session bridge poisoned").tls12 = None;
    }

    fn insert_tls13_ticket(
        &self,
        _server_name: ServerName<'static>,
        value: Tls13ClientSessionValue,
    ) {
        let mut fresh = self.fresh.lock().expect("session bridge poisoned");
        if fresh.tickets.len() >= TICKETS_PER_PEER {
            fresh.tickets.pop_front();
        }
        fresh.tickets.push_back(value);
    }

    fn take_tls13_ticket(
        &self,
        _server_name: &ServerName<'static>,
    ) -> Option<Tls13ClientSessionValue> {
        self.seeded
            .lock()
            .expect("session bridge poisoned")
            .tickets
            .pop_front()
    }
}

/// Adapter presenting an external [`ServerSessionCache`] to the engine.
pub(crate) struct CacheBridge {
    cache: Arc<dyn ServerSessionCache>,
}

impl CacheBridge {
    pub(crate) fn new(cache: Arc<dyn ServerSessionCache>) -> Self {
        Self { cache }
    }
}

impl fmt::Debug for CacheBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheBridge").finish_non_exhaustive()
    }
}

impl StoresServerSessions for CacheBridge {
    fn put(&self, key: Vec<u8>, value: Vec<u8>) -> bool {
        self.cache.store(key, value)
    }

    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.cache.retrieve(key)
    }

    fn take(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.cache.remove(key)
    }

    fn can_cache(&self) -> bool {
        true
    }
}

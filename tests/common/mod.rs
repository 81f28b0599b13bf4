//! Shared helpers for the integration tests: a throwaway PKI and spawned
//! TLS peers on the IPv6 loopback.

#![allow(dead_code)]

use std::net::{Ipv6Addr, SocketAddrV6};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rcgen::{BasicConstraints, Certificate, CertificateParams, IsCa, SanType};
use tls6::{
    ClientContext, Connection, Listener, MemoryClientCache, MemoryServerCache, ServerContext,
};

pub const TIMEOUT: Duration = Duration::from_secs(10);

pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// A CA plus leaf certificates for both roles, all in PEM.
pub struct TestPki {
    pub ca_pem: String,
    pub server_cert_pem: String,
    pub server_key_pem: String,
    pub client_cert_pem: String,
    pub client_key_pem: String,
}

pub fn test_pki() -> TestPki {
    let mut ca_params = CertificateParams::new(Vec::<String>::new());
    ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    let ca = Certificate::from_params(ca_params).expect("generate CA");

    // The server certificate must cover both the DNS name clients verify
    // and the loopback address used when connecting by address.
    let mut server_params = CertificateParams::new(vec!["localhost".to_string()]);
    server_params
        .subject_alt_names
        .push(SanType::IpAddress(Ipv6Addr::LOCALHOST.into()));
    let server = Certificate::from_params(server_params).expect("generate server cert");

    let client_params = CertificateParams::new(vec!["proxy-client".to_string()]);
    let client = Certificate::from_params(client_params).expect("generate client cert");

    TestPki {
        server_cert_pem: server.serialize_pem_with_signer(&ca).expect("sign server"),
        server_key_pem: server.serialize_private_key_pem(),
        client_cert_pem: client.serialize_pem_with_signer(&ca).expect("sign client"),
        client_key_pem: client.serialize_private_key_pem(),
        ca_pem: ca.serialize_pem().expect("CA pem"),
    }
}

pub fn client_context(pki: &TestPki, cache: Arc<MemoryClientCache>) -> ClientContext {
    ClientContext::from_pem(pki.ca_pem.as_bytes(), None, cache).expect("client context")
}

pub fn server_context(pki: &TestPki, cache: Arc<MemoryServerCache>) -> ServerContext {
    ServerContext::from_pem(
        pki.server_cert_pem.as_bytes(),
        pki.server_key_pem.as_bytes(),
        None,
        cache,
    )
    .expect("server context")
}

/// Spawn a server that accepts `accepts` connections in sequence and runs
/// `handler` on each. Returns the loopback address to connect to.
pub fn spawn_server_n<F>(
    ctx: ServerContext,
    accepts: usize,
    handler: F,
) -> (SocketAddrV6, JoinHandle<()>)
where
    F: Fn(usize, Connection) + Send + 'static,
{
    let mut listener = Listener::open(0, TIMEOUT, 8).expect("open listener");
    let port = listener.local_addr().port();
    let handle = thread::spawn(move || {
        for i in 0..accepts {
            let conn = listener.accept(&ctx).expect("accept");
            handler(i, conn);
        }
    });
    (SocketAddrV6::new(Ipv6Addr::LOCALHOST, port, 0, 0), handle)
}

/// Spawn a server for a single connection.
pub fn spawn_server<F>(ctx: ServerContext, handler: F) -> (SocketAddrV6, JoinHandle<()>)
where
    F: FnOnce(Connection) + Send + 'static,
{
    let mut listener = Listener::open(0, TIMEOUT, 8).expect("open listener");
    let port = listener.local_addr().port();
    let handle = thread::spawn(move || {
        let conn = listener.accept(&ctx).expect("accept");
        handler(conn);
    });
    (SocketAddrV6::new(Ipv6Addr::LOCALHOST, port, 0, 0), handle)
}

/// Spawn a server whose accept is expected to fail (bad client CA,
/// hostname mismatch and similar); the outcome is ignored.
pub fn spawn_rejecting_server(ctx: ServerContext) -> (SocketAddrV6, JoinHandle<()>) {
    let mut listener = Listener::open(0, TIMEOUT, 8).expect("open listener");
    let port = listener.local_addr().port();
    let handle = thread::spawn(move || {
        let _ = listener.accept(&ctx);
    });
    (SocketAddrV6::new(Ipv6Addr::LOCALHOST, port, 0, 0), handle)
}

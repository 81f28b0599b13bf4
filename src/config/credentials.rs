//! Credential loading and per-role TLS contexts.
//!
//! # Responsibilities
//! - Load certificate chains, private keys and trust anchors from PEM
//! - Build the role-specific engine configuration (cipher policy included)
//! - Wire the external session caches into the engine
//!
//! Contexts are explicit values passed into connect/accept, so a process
//! can hold several independent trust domains at once.

use std::fmt;
use std::fs;
use std::sync::Arc;

use rustls::client::Resumption;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{ClientConfig, RootCertStore, ServerConfig};

use crate::config::schema::{ClientTlsConfig, ServerTlsConfig};
use crate::error::{Error, Result};
use crate::session::cache::CacheBridge;
use crate::session::{ClientSessionCache, ServerSessionCache};

/// Everything a client-role connection needs: trust anchors, an optional
/// client identity, and the resumption cache.
#[derive(Clone)]
pub struct ClientContext {
    pub(crate) base: Arc<ClientConfig>,
    pub(crate) cache: Arc<dyn ClientSessionCache>,
}

impl ClientContext {
    /// Build a context from in-memory PEM data. `identity` is an optional
    /// `(certificate chain, private key)` pair for mutual TLS.
    pub fn from_pem(
        ca_pem: &[u8],
        identity: Option<(&[u8], &[u8])>,
        cache: Arc<dyn ClientSessionCache>,
    ) -> Result<Self> {
        let roots = read_roots(ca_pem)?;
        let builder = ClientConfig::builder().with_root_certificates(roots);
        let base = match identity {
            Some((cert_pem, key_pem)) => builder
                .with_client_auth_cert(read_certs(cert_pem)?, read_key(key_pem)?)
                .map_err(Error::config)?,
            None => builder.with_no_client_auth(),
        };
        Ok(Self {
            base: Arc::new(base),
            cache,
        })
    }

    /// Build a context from the files named in the configuration schema.
    pub fn from_files(config: &ClientTlsConfig, cache: Arc<dyn ClientSessionCache>) -> Result<Self> {
        let identity = match (&config.cert_file, &config.key_file) {
            (Some(cert), Some(key)) => Some((cert, key)),
            (None, None) => None,
            _ => {
                return Err(Error::Argument(
                    "client cert_file and key_file must be configured together",
                ));
            }
        };
        let ca_pem = read_file(&config.ca_file)?;
        match identity {
            Some((cert, key)) => {
                let cert_pem = read_file(cert)?;
                let key_pem = read_file(key)?;
                Self::from_pem(&ca_pem, Some((&cert_pem, &key_pem)), cache)
            }
            None => Self::from_pem(&ca_pem, None, cache),
        }
    }

    /// The resumption cache connections established from this context use.
    pub fn cache(&self) -> &Arc<dyn ClientSessionCache> {
        &self.cache
    }
}

impl fmt::Debug for ClientContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientContext").finish_non_exhaustive()
    }
}

/// Everything a server-role connection needs: certificate chain, key,
/// optional client-authentication trust anchors, and the session store
/// the engine consults during handshakes.
#[derive(Clone)]
pub struct ServerContext {
    pub(crate) config: Arc<ServerConfig>,
    pub(crate) client_auth: bool,
}

impl ServerContext {
    /// Build a context from in-memory PEM data. Supplying `client_ca_pem`
    /// enables mutual TLS: clients must present a certificate, and the
    /// accepted connection verifies it after the handshake.
    pub fn from_pem(
        cert_pem: &[u8],
        key_pem: &[u8],
        client_ca_pem: Option<&[u8]>,
        cache: Arc<dyn ServerSessionCache>,
    ) -> Result<Self> {
        let builder = ServerConfig::builder();
        let builder = match client_ca_pem {
            Some(ca_pem) => {
                let verifier = WebPkiClientVerifier::builder(Arc::new(read_roots(ca_pem)?))
                    .build()
                    .map_err(Error::config)?;
                builder.with_client_cert_verifier(verifier)
            }
            None => builder.with_no_client_auth(),
        };
        let mut config = builder
            .with_single_cert(read_certs(cert_pem)?, read_key(key_pem)?)
            .map_err(Error::config)?;
        config.session_storage = Arc::new(CacheBridge::new(cache));
        Ok(Self {
            config: Arc::new(config),
            client_auth: client_ca_pem.is_some(),
        })
    }

    /// Build a context from the files named in the configuration schema.
    pub fn from_files(config: &ServerTlsConfig, cache: Arc<dyn ServerSessionCache>) -> Result<Self> {
        let cert_pem = read_file(&config.cert_file)?;
        let key_pem = read_file(&config.key_file)?;
        match &config.client_ca_file {
            Some(ca) => {
                let ca_pem = read_file(ca)?;
                Self::from_pem(&cert_pem, &key_pem, Some(&ca_pem), cache)
            }
            None => Self::from_pem(&cert_pem, &key_pem, None, cache),
        }
    }

    /// Whether accepted connections authenticate the client's certificate.
    pub fn requires_client_auth(&self) -> bool {
        self.client_auth
    }
}

impl fmt::Debug for ServerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerContext")
            .field("client_auth", &self.client_auth)
            .finish_non_exhaustive()
    }
}

/// Disable engine-internal client ticket storage in favour of the
/// per-connection bridge. Applied when a connection is established; kept
/// here so both construction paths share it.
pub(crate) fn with_session_bridge(
    base: &ClientConfig,
    bridge: Arc<crate::session::cache::SessionBridge>,
) -> Arc<ClientConfig> {
    let mut config = base.clone();
    config.resumption = Resumption::store(bridge);
    Arc::new(config)
}

fn read_file(path: &str) -> Result<Vec<u8>> {
    if path.is_empty() {
        return Err(Error::Argument("credential file path must not be empty"));
    }
    fs::read(path).map_err(|err| Error::Config(format!("cannot read {path}: {err}")))
}

fn read_certs(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>> {
    let certs = rustls_pemfile::certs(&mut &pem[..])
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|err| Error::Config(format!("invalid certificate PEM: {err}")))?;
    if certs.is_empty() {
        return Err(Error::Config("no certificate found in PEM input".into()));
    }
    Ok(certs)
}

fn read_key(pem: &[u8]) -> Result<PrivateKeyDer<'static>> {
    rustls_pemfile::private_key(&mut &pem[..])
        .map_err(|err| Error::Config(format!("invalid private key PEM: {err}")))?
        .ok_or_else(|| Error::Config("no private key found in PEM input".into()))
}

fn read_roots(pem: &[u8]) -> Result<RootCertStore> {
    let mut roots = RootCertStore::empty();
    for cert in read_certs(pem)? {
        roots.add(cert).map_err(Error::config)?;
    }
    Ok(roots)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_pem_without_certificates() {
        let err = read_certs(b"not a pem").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn rejects_half_configured_client_identity() {
        let config = ClientTlsConfig {
            ca_file: "ca.pem".into(),
            cert_file: Some("client.pem".into()),
            key_file: None,
        };
        let cache = Arc::new(crate::session::MemoryClientCache::new());
        let err = ClientContext::from_files(&config, cache).unwrap_err();
        assert!(matches!(err, Error::Argument(_)));
    }

    #[test]
    fn rejects_empty_paths_before_touching_the_filesystem() {
        let err = read_file("").unwrap_err();
        assert!(matches!(err, Error::Argument(_)));
    }
}

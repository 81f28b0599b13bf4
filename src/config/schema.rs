//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from config files.
//! Every field has a default so minimal configs work.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Transport configuration: timeouts, listener backlog and credential
/// file locations for both roles.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Bound applied to every blocking wait (handshake, read, write,
    /// accept, close), in seconds.
    pub timeout_secs: u64,

    /// Listen backlog for server sockets.
    pub backlog: u32,

    /// Client-role credentials.
    pub client: ClientTlsConfig,

    /// Server-role credentials.
    pub server: ServerTlsConfig,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            backlog: 16,
            client: ClientTlsConfig::default(),
            server: ServerTlsConfig::default(),
        }
    }
}

impl TransportConfig {
    /// The configured wait bound as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Client-side TLS credentials.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientTlsConfig {
    /// Trust anchors for authenticating servers (PEM).
    pub ca_file: String,

    /// Optional client identity for mutual TLS (PEM chain).
    pub cert_file: Option<String>,

    /// Private key matching `cert_file` (PEM).
    pub key_file: Option<String>,
}

/// Server-side TLS credentials.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerTlsConfig {
    /// Server certificate chain (PEM).
    pub cert_file: String,

    /// Private key matching `cert_file` (PEM).
    pub key_file: String,

    /// Trust anchors for authenticating clients (PEM). Setting this
    /// enables mutual TLS: clients must present a certificate and it is
    /// verified after the handshake.
    pub client_ca_file: Option<String>,
}

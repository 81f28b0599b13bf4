//! Configuration subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → TransportConfig (immutable)
//!     → credentials.rs (PEM loading, rustls config construction)
//!     → ClientContext / ServerContext, passed explicitly into
//!       connect/accept; no process-wide credential state
//! ```

pub mod credentials;
pub mod loader;
pub mod schema;

pub use credentials::{ClientContext, ServerContext};
pub use loader::load_config;
pub use schema::{ClientTlsConfig, ServerTlsConfig, TransportConfig};

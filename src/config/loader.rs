//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use crate::config::schema::TransportConfig;
use crate::error::{Error, Result};

/// Load transport configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<TransportConfig> {
    let content = fs::read_to_string(path)
        .map_err(|err| Error::Config(format!("cannot read {}: {err}", path.display())))?;
    toml::from_str(&content)
        .map_err(|err| Error::Config(format!("cannot parse {}: {err}", path.display())))
}

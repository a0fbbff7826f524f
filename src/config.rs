//! Service configuration file
//!
//! A TOML file with one table per component. Every key is optional; missing
//! keys keep their defaults. Durations are written in milliseconds with an
//! `_ms` suffix.
//!
//! ```toml
//! [server]
//! bind_addr = "0.0.0.0:8091"
//!
//! [registry]
//! jpeg_quality = 60
//! reconnect_cooldown_ms = 5000
//! ```

use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::registry::RegistryConfig;
use crate::server::ServerConfig;

/// Complete service configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceConfig {
    pub server: ServerConfig,
    pub registry: RegistryConfig,
}

impl ServiceConfig {
    /// Parse and validate a TOML document
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text).map_err(|e| match e {
            Error::Config(message) => Error::Config(format!("{}: {}", path.display(), message)),
            other => other,
        })
    }

    /// Reject values the builder setters would have clamped
    pub fn validate(&self) -> Result<()> {
        self.server.validate()?;
        self.registry.validate()
    }
}

/// Serde adapter reading a `Duration` from integer milliseconds
pub mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

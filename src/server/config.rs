//! Server configuration

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use serde::Deserialize;

use crate::config::duration_ms;
use crate::error::{Error, Result};

/// Default HTTP port
pub const DEFAULT_PORT: u16 = 8091;

/// HTTP server configuration options
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,

    /// Frame rate cap of multipart (MJPEG) responses
    pub mjpeg_max_fps: u32,

    /// How long a push session waits for a frame before sending a heartbeat
    #[serde(with = "duration_ms", rename = "push_timeout_ms")]
    pub push_timeout: Duration,

    /// How often an MJPEG response repeats the last part while the camera
    /// delivers no new frame
    #[serde(with = "duration_ms", rename = "mjpeg_keepalive_ms")]
    pub mjpeg_keepalive: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT)),
            mjpeg_max_fps: 30,
            push_timeout: Duration::from_secs(1),
            mjpeg_keepalive: Duration::from_secs(1),
        }
    }
}

impl ServerConfig {
    /// Create a new config with custom bind address
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            bind_addr: addr,
            ..Default::default()
        }
    }

    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set the MJPEG frame rate cap (minimum 1)
    pub fn mjpeg_max_fps(mut self, fps: u32) -> Self {
        self.mjpeg_max_fps = fps.max(1);
        self
    }

    /// Set the push heartbeat timeout
    pub fn push_timeout(mut self, timeout: Duration) -> Self {
        self.push_timeout = timeout;
        self
    }

    /// Set the MJPEG keepalive interval
    pub fn mjpeg_keepalive(mut self, keepalive: Duration) -> Self {
        self.mjpeg_keepalive = keepalive;
        self
    }

    /// Check values that bypassed the setters (configuration files)
    pub fn validate(&self) -> Result<()> {
        if self.mjpeg_max_fps == 0 {
            return Err(Error::Config("server.mjpeg_max_fps must be at least 1".into()));
        }
        if self.push_timeout.is_zero() {
            return Err(Error::Config("server.push_timeout_ms must be positive".into()));
        }
        Ok(())
    }

    /// Spacing between MJPEG parts
    pub fn mjpeg_interval(&self) -> Duration {
        Duration::from_secs(1) / self.mjpeg_max_fps.max(1)
    }
}

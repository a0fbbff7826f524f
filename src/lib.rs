//! Multi-camera ingestion and frame distribution
//!
//! `cctv-relay` pulls live video from networked cameras, keeps the latest
//! decoded frame of every camera available to many concurrent readers and
//! redistributes it as snapshots, MJPEG streams and WebSocket pushes. Each
//! camera gets its own ingestion thread with an independent reconnect state
//! machine, so a dead camera never stalls the others.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use cctv_relay::{HttpServer, RegistryConfig, ServerConfig, StreamRegistry};
//!
//! # async fn run() -> cctv_relay::Result<()> {
//! let registry = Arc::new(StreamRegistry::with_config(RegistryConfig::default()));
//! registry
//!     .add("front_door", "rtsp://admin:pw@192.168.1.20:554/h264Preview_01_sub", false)
//!     .await?;
//!
//! let server = HttpServer::with_registry(ServerConfig::default(), registry);
//! server.run_until(async {
//!     let _ = tokio::signal::ctrl_c().await;
//! }).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Sources
//!
//! `stub://` sources produce synthetic frames and are always available.
//! RTSP, RTMP and HTTP sources are decoded through GStreamer when the crate is
//! built with the `rtsp-gstreamer` feature.

pub mod capture;
pub mod config;
pub mod delivery;
pub mod discovery;
pub mod error;
pub mod ingest;
pub mod observer;
pub mod registry;
pub mod server;

pub use capture::{CaptureError, CaptureSession, DefaultOpener, Frame, SourceOpener};
pub use config::ServiceConfig;
pub use error::{Error, Result};
pub use observer::{ChannelObserver, FrameObserver};
pub use registry::{RegistryConfig, StreamInfo, StreamRegistry, StreamState};
pub use server::{HttpServer, ServerConfig};

//! HTTP server
//!
//! axum application exposing stream management, snapshots, MJPEG and the
//! WebSocket push endpoint.

pub mod config;
pub mod listener;
pub mod routes;

pub use config::ServerConfig;
pub use listener::HttpServer;
pub use routes::{router, AppState};

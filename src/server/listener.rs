//! HTTP server listener
//!
//! Binds the TCP listener and serves the router until shutdown. On shutdown
//! the registry is torn down first, which ends every open push session and
//! MJPEG body, so the graceful drain does not wait on long-lived responses.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;

use crate::error::Result;
use crate::registry::{RegistryConfig, StreamRegistry};
use crate::server::config::ServerConfig;
use crate::server::routes;

/// HTTP server
pub struct HttpServer {
    config: ServerConfig,
    registry: Arc<StreamRegistry>,
}

impl HttpServer {
    /// Create a new server with a fresh registry
    pub fn new(config: ServerConfig) -> Self {
        Self::with_registry_config(config, RegistryConfig::default())
    }

    /// Create a new server with custom registry configuration
    pub fn with_registry_config(config: ServerConfig, registry_config: RegistryConfig) -> Self {
        Self::with_registry(config, Arc::new(StreamRegistry::with_config(registry_config)))
    }

    /// Create a server around an existing registry
    pub fn with_registry(config: ServerConfig, registry: Arc<StreamRegistry>) -> Self {
        Self { config, registry }
    }

    /// Get a reference to the stream registry
    pub fn registry(&self) -> &Arc<StreamRegistry> {
        &self.registry
    }

    /// Get the bind address
    pub fn bind_addr(&self) -> SocketAddr {
        self.config.bind_addr
    }

    /// Build the router served by this server
    pub fn router(&self) -> axum::Router {
        routes::router(Arc::clone(&self.registry), self.config.clone())
    }

    /// Run the server
    ///
    /// This method blocks until the server fails.
    pub async fn run(&self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Run the server with graceful shutdown
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener until `shutdown` resolves
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        tracing::info!(addr = %addr, "HTTP server listening");

        // Spawn stats task for stream registry
        let stats_handle = self.registry.spawn_stats_task();

        let registry = Arc::clone(&self.registry);
        let signal = async move {
            shutdown.await;
            tracing::info!("Shutdown signal received");
            registry.shutdown().await;
        };

        let app = self
            .router()
            .into_make_service_with_connect_info::<SocketAddr>();
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(signal)
            .await;

        // Stop stats task on shutdown
        stats_handle.abort();

        // Covers the error path, where the signal never ran
        self.registry.shutdown().await;

        tracing::info!("HTTP server stopped");
        result.map_err(Into::into)
    }
}

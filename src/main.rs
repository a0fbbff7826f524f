//! cctv-relay service binary
//!
//! Run with: cctv-relay [--config FILE] [--bind ADDR] [--stream ID=URI]...
//!
//! Examples:
//!   cctv-relay                                       # binds to 127.0.0.1:8091
//!   cctv-relay --bind 0.0.0.0                        # binds to 0.0.0.0:8091
//!   cctv-relay --stream demo=stub://demo?fps=10      # with a synthetic camera
//!
//! Log verbosity follows `RUST_LOG` (default `info`).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cctv_relay::server::config::DEFAULT_PORT;
use cctv_relay::{HttpServer, ServiceConfig, StreamRegistry};

#[derive(Parser, Debug)]
#[command(author, version, about = "Multi-camera ingestion and frame distribution service")]
struct Args {
    /// TOML configuration file
    #[arg(long, env = "CCTV_RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Address to bind to (IP:PORT, IP or 'localhost')
    #[arg(long, env = "CCTV_RELAY_BIND", value_parser = parse_bind_addr)]
    bind: Option<SocketAddr>,

    /// Default JPEG quality (1-100)
    #[arg(long, env = "CCTV_RELAY_JPEG_QUALITY", value_parser = clap::value_parser!(u8).range(1..=100))]
    jpeg_quality: Option<u8>,

    /// Stream to register at startup, as ID=URI (repeatable)
    #[arg(long = "stream", value_parser = parse_stream_arg)]
    streams: Vec<(String, String)>,
}

/// Parse a bind address from a string
///
/// Accepts formats:
/// - "localhost" -> 127.0.0.1:8091
/// - "localhost:9000" -> 127.0.0.1:9000
/// - "0.0.0.0" -> 0.0.0.0:8091
/// - "0.0.0.0:9000" -> 0.0.0.0:9000
fn parse_bind_addr(arg: &str) -> Result<SocketAddr, String> {
    let normalized = arg.replace("localhost", "127.0.0.1");

    if let Ok(addr) = normalized.parse::<SocketAddr>() {
        return Ok(addr);
    }
    if let Ok(ip) = normalized.parse::<std::net::IpAddr>() {
        return Ok(SocketAddr::new(ip, DEFAULT_PORT));
    }

    Err(format!(
        "invalid bind address '{}', expected IP:PORT, IP or 'localhost'",
        arg
    ))
}

fn parse_stream_arg(arg: &str) -> Result<(String, String), String> {
    match arg.split_once('=') {
        Some((id, uri)) if !id.is_empty() && !uri.is_empty() => {
            Ok((id.to_string(), uri.to_string()))
        }
        _ => Err(format!("expected ID=URI, got '{}'", arg)),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut config = match &args.config {
        Some(path) => ServiceConfig::load(path)?,
        None => ServiceConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.server = config.server.bind(bind);
    }
    if let Some(quality) = args.jpeg_quality {
        config.registry = config.registry.jpeg_quality(quality);
    }

    let registry = Arc::new(StreamRegistry::with_config(config.registry.clone()));
    for (id, uri) in &args.streams {
        // A camera that is down at startup should not keep the service from starting
        if let Err(e) = registry.add(id, uri, false).await {
            tracing::error!(stream = %id, error = %e, "Failed to add startup stream");
        }
    }

    let server = HttpServer::with_registry(config.server, registry);
    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
        })
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bind_addr() {
        assert_eq!(
            parse_bind_addr("localhost").unwrap(),
            "127.0.0.1:8091".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(parse_bind_addr("0.0.0.0:9000").unwrap().port(), 9000);
        assert!(parse_bind_addr("nope").is_err());
    }

    #[test]
    fn test_parse_stream_arg() {
        assert_eq!(
            parse_stream_arg("cam1=stub://cam1?fps=5").unwrap(),
            ("cam1".to_string(), "stub://cam1?fps=5".to_string())
        );
        assert!(parse_stream_arg("cam1").is_err());
        assert!(parse_stream_arg("=stub://x").is_err());
    }

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from([
            "cctv-relay",
            "--bind",
            "localhost:9000",
            "--jpeg-quality",
            "70",
            "--stream",
            "a=stub://a",
            "--stream",
            "b=stub://b",
        ])
        .unwrap();

        assert_eq!(args.bind.unwrap().port(), 9000);
        assert_eq!(args.jpeg_quality, Some(70));
        assert_eq!(args.streams.len(), 2);
    }
}

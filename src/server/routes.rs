//! HTTP routes
//!
//! Maps the registry and delivery adapters onto HTTP and WebSocket
//! endpoints. Errors are returned as `{"detail": "..."}` with 404 for
//! unknown streams or missing frames and 400 for rejected input.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::SystemTime;

use axum::body::Body;
use axum::extract::connect_info::ConnectInfo;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;

use crate::capture::redact_uri;
use crate::delivery::{self, mjpeg, PushMessage, PushSession};
use crate::discovery;
use crate::error::{Error, Result};
use crate::ingest::telemetry::unix_millis;
use crate::registry::StreamRegistry;

use super::config::ServerConfig;

/// Shared state of every handler
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<StreamRegistry>,
    pub config: Arc<ServerConfig>,
}

/// Build the application router
pub fn router(registry: Arc<StreamRegistry>, config: ServerConfig) -> Router {
    let state = AppState {
        registry,
        config: Arc::new(config),
    };

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/discover", get(discover))
        .route("/add_stream", post(add_stream))
        .route("/remove_stream/:stream_id", delete(remove_stream))
        .route("/streams", get(list_streams))
        .route("/set_quality", get(set_quality).post(set_quality))
        .route("/toggle_ai", post(toggle_ai))
        .route("/stream/:stream_id/info", get(stream_info))
        .route("/stream/:stream_id/frame", get(stream_frame))
        .route("/stream/:stream_id/mjpeg", get(stream_mjpeg))
        .route("/ws/stream/:stream_id", get(stream_ws))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = if self.is_not_found() {
            StatusCode::NOT_FOUND
        } else if self.is_bad_request() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };

        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}

fn now_ms() -> u64 {
    unix_millis(SystemTime::now())
}

async fn root() -> Json<Value> {
    Json(json!({
        "service": "cctv-relay",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
        "timestamp": now_ms(),
    }))
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "active_streams": state.registry.stream_count().await,
        "uptime_secs": state.registry.uptime().as_secs(),
        "timestamp": now_ms(),
    }))
}

#[derive(Debug, Deserialize)]
struct DiscoverParams {
    ip: String,
    #[serde(default = "default_user")]
    user: String,
    #[serde(default, alias = "pass")]
    password: String,
    #[serde(default)]
    brand: String,
}

fn default_user() -> String {
    "admin".to_string()
}

async fn discover(Query(params): Query<DiscoverParams>) -> Result<Json<Value>> {
    let candidates =
        discovery::candidate_urls(&params.ip, &params.user, &params.password, &params.brand)?;
    Ok(Json(json!({ "success": true, "candidates": candidates })))
}

#[derive(Debug, Deserialize)]
struct AddStreamParams {
    stream_id: String,
    rtsp_url: String,
    #[serde(default = "default_enable_ai")]
    enable_ai: bool,
}

fn default_enable_ai() -> bool {
    true
}

async fn add_stream(
    State(state): State<AppState>,
    Query(params): Query<AddStreamParams>,
) -> Result<Json<Value>> {
    let info = state
        .registry
        .add(&params.stream_id, &params.rtsp_url, params.enable_ai)
        .await?;

    Ok(Json(json!({
        "success": true,
        "message": "Stream added successfully",
        "stream_id": info.stream_id,
        "rtsp_url": redact_uri(&params.rtsp_url),
        "enable_ai": info.enable_ai,
    })))
}

async fn remove_stream(
    State(state): State<AppState>,
    Path(stream_id): Path<String>,
) -> Result<Json<Value>> {
    state.registry.remove(&stream_id).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Stream removed successfully",
    })))
}

async fn list_streams(State(state): State<AppState>) -> Json<Value> {
    let streams = state.registry.list().await;
    Json(json!({
        "count": streams.len(),
        "streams": streams,
    }))
}

async fn stream_info(
    State(state): State<AppState>,
    Path(stream_id): Path<String>,
) -> Result<Response> {
    let info = state
        .registry
        .get(&stream_id)
        .await
        .ok_or(Error::StreamNotFound(stream_id))?;
    Ok(Json(info).into_response())
}

#[derive(Debug, Deserialize)]
struct QualityParams {
    stream_id: String,
    quality: i64,
}

async fn set_quality(
    State(state): State<AppState>,
    Query(params): Query<QualityParams>,
) -> Result<Json<Value>> {
    let quality = state
        .registry
        .set_quality(&params.stream_id, params.quality)
        .await?;

    Ok(Json(json!({
        "success": true,
        "stream_id": params.stream_id,
        "quality": quality,
    })))
}

#[derive(Debug, Deserialize)]
struct ToggleAiParams {
    enabled: bool,
    stream_id: Option<String>,
}

async fn toggle_ai(
    State(state): State<AppState>,
    Query(params): Query<ToggleAiParams>,
) -> Result<Json<Value>> {
    let word = if params.enabled { "enabled" } else { "disabled" };

    match params.stream_id {
        Some(stream_id) => {
            state.registry.set_ai(&stream_id, params.enabled).await?;
            Ok(Json(json!({
                "success": true,
                "stream_id": stream_id,
                "ai_enabled": params.enabled,
                "message": format!("AI {} for stream {}", word, stream_id),
            })))
        }
        None => {
            let streams = state.registry.set_ai_all(params.enabled).await;
            Ok(Json(json!({
                "success": true,
                "ai_enabled": params.enabled,
                "streams": streams,
                "message": format!("AI {} for all streams", word),
            })))
        }
    }
}

#[derive(Debug, Deserialize)]
struct FrameParams {
    quality: Option<i64>,
}

async fn stream_frame(
    State(state): State<AppState>,
    Path(stream_id): Path<String>,
    Query(params): Query<FrameParams>,
) -> Result<Response> {
    let jpeg = delivery::snapshot(&state.registry, &stream_id, params.quality).await?;

    Ok((
        [
            (header::CONTENT_TYPE, "image/jpeg"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        jpeg,
    )
        .into_response())
}

async fn stream_mjpeg(
    State(state): State<AppState>,
    Path(stream_id): Path<String>,
) -> Result<Response> {
    let entry = state.registry.entry(&stream_id).await?;
    let body = mjpeg::stream(
        entry,
        state.config.mjpeg_interval(),
        state.config.mjpeg_keepalive,
    );

    Ok((
        [
            (header::CONTENT_TYPE, mjpeg::CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(body),
    )
        .into_response())
}

async fn stream_ws(
    State(state): State<AppState>,
    Path(stream_id): Path<String>,
    peer: Option<ConnectInfo<SocketAddr>>,
    ws: WebSocketUpgrade,
) -> Response {
    let peer = peer.map_or_else(|| "unknown".to_string(), |ConnectInfo(addr)| addr.to_string());
    ws.on_upgrade(move |socket| push_loop(socket, state, stream_id, peer))
}

async fn push_loop(mut socket: WebSocket, state: AppState, stream_id: String, peer: String) {
    let timeout = state.config.push_timeout;
    let mut session = match PushSession::open(&state.registry, &stream_id, peer, timeout).await {
        Ok(session) => session,
        Err(e) => {
            tracing::debug!(stream = %stream_id, error = %e, "Push consumer rejected");
            let _ = socket
                .send(Message::Text(format!("Error: Stream {} not found", stream_id)))
                .await;
            let _ = socket.close().await;
            return;
        }
    };

    loop {
        tokio::select! {
            message = session.next() => {
                let Some(message) = message else { break };
                let closing = matches!(message, PushMessage::Closed(_));

                let outbound = match message {
                    PushMessage::Frame(jpeg) => Message::Binary(jpeg.to_vec()),
                    PushMessage::Closed(reason) => Message::Text(reason.to_string()),
                    control => match control.to_json() {
                        Some(text) => Message::Text(text),
                        None => continue,
                    },
                };

                if socket.send(outbound).await.is_err() {
                    break;
                }
                if closing {
                    let _ = socket.close().await;
                    break;
                }
            }
            incoming = socket.recv() => match incoming {
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => break,
                Some(Ok(_)) => {}
            },
        }
    }

    tracing::debug!(
        stream = %session.stream_id(),
        consumer = session.consumer_id(),
        "Push loop finished"
    );
}

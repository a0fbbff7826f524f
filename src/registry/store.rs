//! Stream registry implementation
//!
//! The central registry that maps stream ids to their entries and serializes
//! add/remove against the ingestion workers.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use crate::capture::{
    redact_uri, validate_source, CaptureError, CaptureSession, DefaultOpener, SourceOpener,
    StopSignal,
};
use crate::error::{Error, Result};
use crate::ingest::worker;
use crate::observer::FrameObserver;

use super::config::RegistryConfig;
use super::entry::{StreamEntry, StreamInfo};

/// Longest accepted stream id
const MAX_STREAM_ID_LEN: usize = 128;

/// Central registry for all camera streams
///
/// Thread-safe via `RwLock`. Info and delivery lookups take the read lock
/// briefly; add and remove take the write lock only to check and mutate the
/// map, never while opening a source or joining a worker.
pub struct StreamRegistry {
    /// Map of stream id to stream entry
    streams: RwLock<HashMap<String, Arc<StreamEntry>>>,

    /// Ids whose initial open is in flight
    pending: Mutex<HashSet<String>>,

    next_registration: AtomicU64,

    /// Opens capture sessions (initial open and worker reconnects)
    opener: Arc<dyn SourceOpener>,

    /// Receives frames of AI-enabled streams
    observer: Option<Arc<dyn FrameObserver>>,

    /// Configuration
    config: RegistryConfig,

    started_at: Instant,
}

impl StreamRegistry {
    /// Create a new stream registry with default configuration
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Create a new stream registry with custom configuration
    pub fn with_config(config: RegistryConfig) -> Self {
        Self::with_opener(config, Arc::new(DefaultOpener))
    }

    /// Create a registry that opens sources through `opener`
    pub fn with_opener(config: RegistryConfig, opener: Arc<dyn SourceOpener>) -> Self {
        Self {
            streams: RwLock::new(HashMap::new()),
            pending: Mutex::new(HashSet::new()),
            next_registration: AtomicU64::new(1),
            opener,
            observer: None,
            config,
            started_at: Instant::now(),
        }
    }

    /// Hand frames of AI-enabled streams to `observer`
    pub fn observer(mut self, observer: Arc<dyn FrameObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Get the registry configuration
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Time since the registry was created
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Register a camera stream
    ///
    /// Opens the source (bounded by the open timeout), then registers the
    /// stream in state Connecting and starts its ingestion worker with the
    /// open session. Fails if the id is taken, including by an `add` that is
    /// still opening.
    pub async fn add(&self, id: &str, uri: &str, enable_ai: bool) -> Result<StreamInfo> {
        validate_stream_id(id)?;
        validate_source(uri)?;

        let _reservation = self.reserve(id).await?;
        let stop = Arc::new(StopSignal::new());
        let session = self.open_initial(id, uri, &stop).await?;

        let mut streams = self.streams.write().await;
        let registration = self.next_registration.fetch_add(1, Ordering::Relaxed);
        let entry = Arc::new(StreamEntry::new(
            id,
            uri,
            enable_ai,
            registration,
            &self.config,
        ));

        let handle = worker::spawn(
            Arc::clone(&entry),
            session,
            stop,
            Arc::clone(&self.opener),
            self.observer.clone(),
            self.config.clone(),
        )?;
        entry.attach_worker(handle);
        streams.insert(id.to_string(), Arc::clone(&entry));
        drop(streams);

        tracing::info!(
            stream = %id,
            source = %redact_uri(uri),
            enable_ai = enable_ai,
            "Stream added"
        );

        Ok(entry.info())
    }

    /// Claim `id` for an in-flight `add`
    async fn reserve(&self, id: &str) -> Result<PendingGuard<'_>> {
        let streams = self.streams.read().await;
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());

        if streams.contains_key(id) || !pending.insert(id.to_string()) {
            return Err(Error::StreamExists(id.to_string()));
        }

        Ok(PendingGuard {
            pending: &self.pending,
            id: id.to_string(),
        })
    }

    async fn open_initial(
        &self,
        id: &str,
        uri: &str,
        stop: &Arc<StopSignal>,
    ) -> Result<Box<dyn CaptureSession>> {
        let opener = Arc::clone(&self.opener);
        let timeout = self.config.open_timeout;
        let open_uri = uri.to_string();
        let open_stop = Arc::clone(stop);

        let open =
            tokio::task::spawn_blocking(move || opener.open(&open_uri, timeout, &open_stop));

        match tokio::time::timeout(timeout, open).await {
            Ok(Ok(Ok(session))) => Ok(session),
            Ok(Ok(Err(e))) => {
                tracing::warn!(stream = %id, source = %redact_uri(uri), error = %e, "Open failed");
                Err(Error::OpenFailure {
                    id: id.to_string(),
                    source: e,
                })
            }
            Ok(Err(e)) => Err(Error::OpenFailure {
                id: id.to_string(),
                source: CaptureError::Open(e.to_string()),
            }),
            Err(_) => {
                // Cut the abandoned open short; a session it still returns is dropped (and closed)
                stop.stop();
                tracing::warn!(stream = %id, source = %redact_uri(uri), timeout = ?timeout, "Open timed out");
                Err(Error::OpenTimeout {
                    id: id.to_string(),
                    timeout,
                })
            }
        }
    }

    /// Remove a stream
    ///
    /// The entry leaves the map first, so `get` reports it absent
    /// immediately. The worker is then stopped and joined, the queue closed
    /// and push consumers signalled.
    pub async fn remove(&self, id: &str) -> Result<()> {
        let entry = self
            .streams
            .write()
            .await
            .remove(id)
            .ok_or_else(|| Error::StreamNotFound(id.to_string()))?;

        teardown(entry).await;
        Ok(())
    }

    /// Change the JPEG quality of one stream
    ///
    /// The value is clamped to 1..=100 and applies to queued frames, MJPEG
    /// parts and snapshots that do not request a quality. Returns the
    /// quality in effect.
    pub async fn set_quality(&self, id: &str, quality: i64) -> Result<u8> {
        let entry = self.entry(id).await?;
        let quality = entry.set_jpeg_quality(quality);
        tracing::info!(stream = %id, quality = quality, "Stream quality changed");
        Ok(quality)
    }

    /// Turn frame observation on or off for one stream
    pub async fn set_ai(&self, id: &str, enabled: bool) -> Result<()> {
        let entry = self.entry(id).await?;
        entry.set_enable_ai(enabled);
        tracing::info!(stream = %id, enable_ai = enabled, "Stream AI toggled");
        Ok(())
    }

    /// Turn frame observation on or off for every stream
    ///
    /// Returns the number of streams changed.
    pub async fn set_ai_all(&self, enabled: bool) -> usize {
        let streams = self.streams.read().await;
        for entry in streams.values() {
            entry.set_enable_ai(enabled);
        }
        tracing::info!(streams = streams.len(), enable_ai = enabled, "AI toggled for all streams");
        streams.len()
    }

    /// Remove every stream
    pub async fn shutdown(&self) {
        let entries: Vec<_> = self.streams.write().await.drain().map(|(_, e)| e).collect();
        if entries.is_empty() {
            return;
        }

        tracing::info!(streams = entries.len(), "Stopping all streams");

        // Signal all first so the workers wind down in parallel
        for entry in &entries {
            entry.signal_stop();
        }
        for entry in entries {
            teardown(entry).await;
        }
    }

    /// Snapshot of one stream
    pub async fn get(&self, id: &str) -> Option<StreamInfo> {
        self.streams.read().await.get(id).map(|entry| entry.info())
    }

    /// Shared handle to a stream's entry, for delivery adapters
    pub async fn entry(&self, id: &str) -> Result<Arc<StreamEntry>> {
        self.streams
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| Error::StreamNotFound(id.to_string()))
    }

    /// Snapshots of all streams in registration order
    pub async fn list(&self) -> Vec<StreamInfo> {
        let mut entries: Vec<_> = self.streams.read().await.values().cloned().collect();
        entries.sort_by_key(|e| e.registration);
        entries.iter().map(|e| e.info()).collect()
    }

    /// Get total number of streams
    pub async fn stream_count(&self) -> usize {
        self.streams.read().await.len()
    }

    /// Log per-stream telemetry once
    pub async fn log_stats(&self) {
        for info in self.list().await {
            tracing::info!(
                stream = %info.stream_id,
                state = %info.state,
                fps = info.fps,
                failures = info.consecutive_failures,
                frames = info.total_frames,
                dropped = info.dropped_frames,
                reconnects = info.reconnect_attempts,
                consumers = info.active_consumers,
                "Stream stats"
            );
        }
    }

    /// Spawn background stats task
    ///
    /// Returns a handle that can be used to abort the task.
    pub fn spawn_stats_task(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(self);
        let interval = registry.config.stats_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // First tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                registry.log_stats().await;
            }
        })
    }
}

impl Default for StreamRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for StreamRegistry {
    fn drop(&mut self) {
        // Workers hold their entry, so stop them explicitly
        for entry in self.streams.get_mut().values() {
            entry.mark_removed();
            entry.signal_stop();
            entry.queue.close();
            entry.consumers.close_all();
        }
    }
}

/// Releases an id reserved by `add` once the add completes or fails
struct PendingGuard<'a> {
    pending: &'a Mutex<HashSet<String>>,
    id: String,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.id);
    }
}

fn validate_stream_id(id: &str) -> Result<()> {
    let usable = !id.is_empty()
        && id.len() <= MAX_STREAM_ID_LEN
        && !id.chars().any(|c| c == '/' || c.is_whitespace() || c.is_control());

    if usable {
        Ok(())
    } else {
        Err(Error::InvalidStreamId(id.to_string()))
    }
}

async fn teardown(entry: Arc<StreamEntry>) {
    entry.mark_removed();

    if let Some(handle) = entry.take_worker() {
        handle.stop();
        if let Err(e) = tokio::task::spawn_blocking(move || handle.join()).await {
            tracing::error!(stream = %entry.id, error = %e, "Failed to join ingestion worker");
        }
    }

    entry.queue.close();
    let consumers = entry.consumers.close_all();
    entry.cache.clear();

    tracing::info!(stream = %entry.id, consumers = consumers, "Stream removed");
}

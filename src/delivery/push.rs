//! Push session
//!
//! Transport-neutral loop behind the WebSocket endpoint. A session first
//! yields the stream's info, then frames popped from the distribution queue,
//! with a heartbeat whenever no frame arrives within the pop timeout. It ends
//! with a closing message once the stream is removed.
//!
//! The distribution queue is shared by every push consumer of a stream, so
//! concurrent consumers split the frames between them rather than each
//! receiving all of them.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;

use crate::error::Result;
use crate::registry::{ConsumerGuard, Popped, StreamEntry, StreamInfo, StreamRegistry};

/// Reason sent when the stream goes away
pub const STREAM_ENDED: &str = "Stream ended";

/// One message for a push consumer
#[derive(Debug, Clone)]
pub enum PushMessage {
    /// Stream description, sent once on connect
    Info(Box<StreamInfo>),
    /// Encoded JPEG
    Frame(Bytes),
    /// No frame within the pop timeout
    Heartbeat,
    /// Stream removed; the session is over
    Closed(&'static str),
}

#[derive(Serialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
enum Control<'a> {
    Info(&'a StreamInfo),
    Heartbeat,
}

impl PushMessage {
    /// JSON text for control messages; `None` for frames and close reasons
    pub fn to_json(&self) -> Option<String> {
        let control = match self {
            PushMessage::Info(info) => Control::Info(info),
            PushMessage::Heartbeat => Control::Heartbeat,
            PushMessage::Frame(_) | PushMessage::Closed(_) => return None,
        };
        serde_json::to_string(&control).ok()
    }
}

/// A push consumer attached to one stream
#[derive(Debug)]
pub struct PushSession {
    entry: Arc<StreamEntry>,
    guard: ConsumerGuard,
    pop_timeout: Duration,
    info_sent: bool,
    finished: bool,
}

impl PushSession {
    /// Attach a consumer to `id`
    ///
    /// The consumer stays registered until the session is dropped.
    pub async fn open(
        registry: &StreamRegistry,
        id: &str,
        peer: impl Into<String>,
        pop_timeout: Duration,
    ) -> Result<Self> {
        let entry = registry.entry(id).await?;
        let guard = entry.consumers.register(peer);

        tracing::info!(
            stream = %id,
            consumer = guard.id(),
            consumers = entry.consumers.len(),
            "Push consumer attached"
        );

        Ok(Self {
            entry,
            guard,
            pop_timeout,
            info_sent: false,
            finished: false,
        })
    }

    /// Consumer id within the stream
    pub fn consumer_id(&self) -> u64 {
        self.guard.id()
    }

    /// Stream id
    pub fn stream_id(&self) -> &str {
        &self.entry.id
    }

    /// Next message, or `None` once the closing message has been yielded
    pub async fn next(&mut self) -> Option<PushMessage> {
        if self.finished {
            return None;
        }

        if !self.info_sent {
            self.info_sent = true;
            return Some(PushMessage::Info(Box::new(self.entry.info())));
        }

        if self.entry.is_removed() || self.guard.is_closed() {
            return Some(self.finish());
        }

        let popped = tokio::select! {
            popped = self.entry.queue.pop(self.pop_timeout) => popped,
            _ = self.guard.closed() => Popped::Closed,
        };

        match popped {
            Popped::Frame(jpeg) => Some(PushMessage::Frame(jpeg)),
            Popped::Timeout => Some(PushMessage::Heartbeat),
            Popped::Closed => Some(self.finish()),
        }
    }

    fn finish(&mut self) -> PushMessage {
        self.finished = true;
        PushMessage::Closed(STREAM_ENDED)
    }
}

impl Drop for PushSession {
    fn drop(&mut self) {
        tracing::info!(
            stream = %self.entry.id,
            consumer = self.guard.id(),
            "Push consumer detached"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{ReadStep, ScriptedSource};
    use crate::error::Error;
    use crate::registry::RegistryConfig;

    fn registry(source: &ScriptedSource) -> StreamRegistry {
        let config = RegistryConfig::default()
            .max_fps(20)
            .read_timeout(Duration::from_millis(20))
            .failure_backoff(Duration::from_millis(1));
        StreamRegistry::with_opener(config, Arc::new(source.clone()))
    }

    const POP: Duration = Duration::from_millis(50);

    #[tokio::test]
    async fn test_unknown_stream() {
        let source = ScriptedSource::new(8, 8);
        let registry = registry(&source);

        let result = PushSession::open(&registry, "missing", "peer", POP).await;
        assert!(matches!(result, Err(Error::StreamNotFound(_))));
    }

    #[tokio::test]
    async fn test_info_then_frames() {
        let source = ScriptedSource::new(16, 16);
        let registry = registry(&source);
        registry.add("cam1", "stub://cam1", false).await.unwrap();

        let mut session = PushSession::open(&registry, "cam1", "peer", POP).await.unwrap();
        assert_eq!(registry.get("cam1").await.unwrap().active_consumers, 1);

        let info = session.next().await.unwrap();
        let json = info.to_json().unwrap();
        assert!(json.starts_with(r#"{"type":"info","data":{"#));
        assert!(json.contains(r#""stream_id":"cam1""#));

        let mut got_frame = false;
        for _ in 0..20 {
            if let Some(PushMessage::Frame(jpeg)) = session.next().await {
                assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
                got_frame = true;
                break;
            }
        }
        assert!(got_frame);

        drop(session);
        assert_eq!(registry.get("cam1").await.unwrap().active_consumers, 0);
        registry.shutdown().await;
    }

    #[tokio::test]
    async fn test_heartbeat_when_idle() {
        let source = ScriptedSource::new(8, 8);
        source.set_default_read(ReadStep::Stall);
        let registry = registry(&source);
        registry.add("cam1", "stub://cam1", false).await.unwrap();

        let mut session = PushSession::open(&registry, "cam1", "peer", POP).await.unwrap();
        assert!(matches!(session.next().await, Some(PushMessage::Info(_))));

        let heartbeat = session.next().await.unwrap();
        assert!(matches!(heartbeat, PushMessage::Heartbeat));
        assert_eq!(heartbeat.to_json().unwrap(), r#"{"type":"heartbeat"}"#);

        registry.shutdown().await;
    }

    #[tokio::test]
    async fn test_ends_on_remove() {
        let source = ScriptedSource::new(8, 8);
        source.set_default_read(ReadStep::Stall);
        let registry = Arc::new(registry(&source));
        registry.add("cam1", "stub://cam1", false).await.unwrap();

        let mut session = PushSession::open(&registry, "cam1", "peer", Duration::from_secs(30))
            .await
            .unwrap();
        session.next().await.unwrap();

        let remover = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                registry.remove("cam1").await
            })
        };

        let closing = tokio::time::timeout(Duration::from_secs(5), session.next())
            .await
            .unwrap();
        assert!(matches!(closing, Some(PushMessage::Closed(STREAM_ENDED))));
        assert!(session.next().await.is_none());

        remover.await.unwrap().unwrap();
    }
}

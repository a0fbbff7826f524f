//! On-demand snapshot

use bytes::Bytes;

use crate::error::{Error, Result};
use crate::ingest::encode::encode_jpeg;
use crate::registry::StreamRegistry;

use super::resolve_quality;

/// Latest frame of `id` as JPEG
///
/// Encodes at full resolution with the requested quality, or the stream's
/// current quality. Fails with `StreamNotFound` for an unknown id and `NoFrame` if
/// the stream has not produced a frame yet.
pub async fn snapshot(registry: &StreamRegistry, id: &str, quality: Option<i64>) -> Result<Bytes> {
    let entry = registry.entry(id).await?;
    let frame = entry
        .cache
        .latest()
        .ok_or_else(|| Error::NoFrame(id.to_string()))?;
    let quality = resolve_quality(quality, entry.jpeg_quality());

    tokio::task::spawn_blocking(move || encode_jpeg(&frame, quality))
        .await
        .map_err(|e| Error::Encode(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::capture::{ReadStep, ScriptedSource};
    use crate::registry::RegistryConfig;

    fn registry(source: &ScriptedSource) -> StreamRegistry {
        let config = RegistryConfig::default()
            .read_timeout(Duration::from_millis(20))
            .failure_backoff(Duration::from_millis(1));
        StreamRegistry::with_opener(config, Arc::new(source.clone()))
    }

    #[tokio::test]
    async fn test_unknown_stream() {
        let source = ScriptedSource::new(8, 8);
        let registry = registry(&source);

        let result = snapshot(&registry, "missing", None).await;
        assert!(matches!(result, Err(Error::StreamNotFound(_))));
    }

    #[tokio::test]
    async fn test_no_frame_yet_is_not_found() {
        let source = ScriptedSource::new(8, 8);
        source.set_default_read(ReadStep::Stall);
        let registry = registry(&source);
        registry.add("cam1", "stub://cam1", false).await.unwrap();

        let err = snapshot(&registry, "cam1", None).await.unwrap_err();
        assert!(matches!(err, Error::NoFrame(_)));
        assert!(err.is_not_found());

        registry.shutdown().await;
    }

    #[tokio::test]
    async fn test_snapshot_quality() {
        let source = ScriptedSource::new(64, 64);
        let registry = registry(&source);
        registry.add("cam1", "stub://cam1", false).await.unwrap();

        let entry = registry.entry("cam1").await.unwrap();
        while !entry.cache.has_frame() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let low = snapshot(&registry, "cam1", Some(5)).await.unwrap();
        let high = snapshot(&registry, "cam1", Some(100)).await.unwrap();
        assert_eq!(&low[..2], &[0xFF, 0xD8]);
        assert!(high.len() >= low.len());

        // Out-of-range quality is clamped, not rejected
        assert!(snapshot(&registry, "cam1", Some(500)).await.is_ok());

        // Without a request the stream's quality applies
        registry.set_quality("cam1", 5).await.unwrap();
        let default = snapshot(&registry, "cam1", None).await.unwrap();
        assert_eq!(default.len(), low.len());

        registry.shutdown().await;
    }
}

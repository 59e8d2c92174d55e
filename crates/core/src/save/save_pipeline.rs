//! Write strategy for one promoted operation.
//!
//! Decides between a single writer call and a chunked sequence based on the
//! sanitized payload's size, and performs the single chunk-to-full fallback.

use chrono::Utc;
use log::{debug, info, warn};

use super::save_config::SaveConfig;
use super::save_model::SaveResult;
use crate::events::{SaveEvent, SaveEventSink};
use crate::payload::{analyze, chunk, optimize_patch, sanitize, ChunkKind, Patch, WritePatch};
use crate::writer::{DurableWriter, WriteOutcome};

/// A chunk write that did not succeed.
struct ChunkFailure {
    kind: ChunkKind,
    outcome: WriteOutcome,
}

/// Writes one operation's patch, once or in chunks.
pub(crate) async fn perform_save(
    writer: &dyn DurableWriter,
    config: &SaveConfig,
    events: &dyn SaveEventSink,
    resource_id: &str,
    patch: &Patch,
    source: &str,
) -> SaveResult {
    let clean = sanitize(patch);
    if clean.is_empty() {
        debug!("Nothing to save for {} from '{}'", resource_id, source);
        events.emit(SaveEvent::skipped(resource_id, "empty patch"));
        return SaveResult::skipped();
    }

    let info = analyze(&clean);
    debug!(
        "Payload for {}: {} bytes ({})",
        resource_id,
        info.size_bytes,
        info.category.as_str()
    );

    if info.should_chunk && info.size_bytes > config.chunk_min_bytes {
        return perform_chunked_save(writer, config, events, resource_id, patch, source).await;
    }

    let optimized = optimize_patch(&clean, &config.schema);
    writer
        .write(resource_id, optimized, info.recommended_timeout())
        .await
        .into()
}

/// Writes core, media and metadata chunks in order.
///
/// Any chunk failure triggers exactly one full write of the optimized patch,
/// whose result is returned instead of the chunk error.
pub(crate) async fn perform_chunked_save(
    writer: &dyn DurableWriter,
    config: &SaveConfig,
    events: &dyn SaveEventSink,
    resource_id: &str,
    patch: &Patch,
    source: &str,
) -> SaveResult {
    let clean = sanitize(patch);
    let chunked = chunk(&clean, &config.schema, Utc::now());

    info!(
        "Saving {} from '{}' in {} chunk(s)",
        resource_id,
        source,
        chunked.chunk_count()
    );
    events.emit(SaveEvent::Chunked {
        resource_id: resource_id.to_string(),
        category: analyze(&clean).category,
        chunks: chunked.chunk_count(),
    });

    match write_chunks(writer, config, resource_id, chunked.into_ordered()).await {
        Ok(outcome) => outcome.into(),
        Err(failure) => {
            warn!(
                "{} chunk for {} failed ({}); retrying as a single write",
                failure.kind.as_str(),
                resource_id,
                failure.outcome.error.as_deref().unwrap_or("unknown error")
            );
            events.emit(SaveEvent::ChunkFallback {
                resource_id: resource_id.to_string(),
                chunk: failure.kind.as_str().to_string(),
            });

            let full = optimize_patch(&clean, &config.schema);
            let timeout = analyze(&full).recommended_timeout();
            writer.write(resource_id, full, timeout).await.into()
        }
    }
}

async fn write_chunks(
    writer: &dyn DurableWriter,
    config: &SaveConfig,
    resource_id: &str,
    chunks: Vec<(ChunkKind, WritePatch)>,
) -> Result<WriteOutcome, ChunkFailure> {
    let mut last = WriteOutcome::success();

    for (kind, chunk_patch) in chunks {
        let mut sub_patch = sanitize(&Patch::from(chunk_patch));
        if kind == ChunkKind::Media {
            sub_patch = optimize_patch(&sub_patch, &config.schema);
        }

        let info = analyze(&sub_patch);
        debug!(
            "Writing {} chunk for {} ({} bytes)",
            kind.as_str(),
            resource_id,
            info.size_bytes
        );

        let outcome = writer
            .write(resource_id, sub_patch, info.recommended_timeout())
            .await;
        if !outcome.ok {
            return Err(ChunkFailure { kind, outcome });
        }
        last = outcome;
    }

    Ok(last)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MockSaveEventSink;
    use crate::writer::{MemoryWriter, WriteBehavior};
    use serde_json::{json, Value};
    use std::time::Duration;

    /// A listing patch whose serialized size is exactly `size` bytes, most of
    /// it in the heavy `content` field.
    fn listing_of_size(size: usize) -> Patch {
        let base = Patch::new()
            .with("title", "Kitchen remodel")
            .with("content", json!({"body": ""}));
        let framing = serde_json::to_vec(&base).unwrap().len();
        Patch::new()
            .with("title", "Kitchen remodel")
            .with("content", json!({"body": "x".repeat(size - framing)}))
    }

    async fn run(writer: &MemoryWriter, patch: &Patch) -> SaveResult {
        let config = SaveConfig::default();
        perform_save(writer, &config, &MockSaveEventSink::new(), "svc-1", patch, "editor").await
    }

    #[tokio::test]
    async fn test_empty_patch_is_skipped_without_writer_call() {
        let writer = MemoryWriter::new();
        let result = run(&writer, &Patch::new().with_absent("title")).await;

        assert_eq!(result, SaveResult::skipped());
        assert_eq!(writer.call_count(), 0);
    }

    #[tokio::test]
    async fn test_small_patch_is_written_once_with_category_timeout() {
        let writer = MemoryWriter::new();
        let result = run(&writer, &Patch::new().with("title", "A").with("desc", "")).await;

        assert!(result.ok);
        let calls = writer.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].timeout, Duration::from_millis(8_000));
        assert_eq!(calls[0].patch.get("desc"), Some(&Value::Null));
    }

    #[tokio::test]
    async fn test_writer_failure_is_returned_verbatim() {
        let writer = MemoryWriter::new().with_script([WriteBehavior::Fail {
            error: "permission denied".to_string(),
            code: Some("42501".to_string()),
        }]);
        let result = run(&writer, &Patch::new().with("title", "A")).await;

        assert!(!result.ok);
        assert_eq!(result.error.as_deref(), Some("permission denied"));
        assert_eq!(result.code.as_deref(), Some("42501"));
    }

    #[tokio::test]
    async fn test_single_write_optimizes_heavy_field() {
        let writer = MemoryWriter::new();
        let patch = Patch::new().with(
            "content",
            json!({"media": [{"url": "u", "type": "image", "localPreview": "data:..."}]}),
        );
        run(&writer, &patch).await;

        let calls = writer.calls();
        assert_eq!(
            calls[0].patch.get("content"),
            Some(&json!({"media": [{"url": "u", "type": "image"}]}))
        );
    }

    #[tokio::test]
    async fn test_exactly_15000_bytes_is_not_chunked() {
        let writer = MemoryWriter::new();
        let patch = listing_of_size(15_000);
        assert_eq!(analyze(&sanitize(&patch)).size_bytes, 15_000);

        run(&writer, &patch).await;
        assert_eq!(writer.call_count(), 1);
    }

    #[tokio::test]
    async fn test_15001_bytes_with_heavy_field_is_chunked() {
        let writer = MemoryWriter::new();
        let patch = listing_of_size(15_001);
        assert_eq!(analyze(&sanitize(&patch)).size_bytes, 15_001);

        let result = run(&writer, &patch).await;
        assert!(result.ok);

        let calls = writer.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].patch.contains_key("title"));
        assert!(calls[0].patch.contains_key("updated_at"));
        assert!(!calls[0].patch.contains_key("content"));
        assert_eq!(calls[1].patch.len(), 1);
        assert!(calls[1].patch.contains_key("content"));
        assert!(calls[1].started_at >= calls[0].started_at);
    }

    #[tokio::test]
    async fn test_chunks_written_in_order_with_metadata() {
        let writer = MemoryWriter::new();
        let patch = listing_of_size(20_000).with("tiers", json!([{"name": "basic", "price": 100}]));

        let result = run(&writer, &patch).await;
        assert!(result.ok);

        let calls = writer.calls();
        assert_eq!(calls.len(), 3);
        assert!(calls[1].patch.contains_key("content"));
        assert!(calls[2].patch.contains_key("tiers"));
        // The last chunk's settlement is reported.
        assert!(result.trace_id.is_some());
    }

    #[tokio::test]
    async fn test_media_chunk_failure_falls_back_to_one_full_write() {
        let writer = MemoryWriter::new().with_script([
            WriteBehavior::Succeed,
            WriteBehavior::fail("payload too large"),
            WriteBehavior::Succeed,
        ]);
        let events = MockSaveEventSink::new();
        let patch = listing_of_size(16_000).with("tiers", json!([{"name": "basic"}]));

        let result = perform_save(
            &writer,
            &SaveConfig::default(),
            &events,
            "svc-1",
            &patch,
            "editor",
        )
        .await;

        assert!(result.ok);
        assert!(result.error.is_none());

        let calls = writer.calls();
        assert_eq!(calls.len(), 3);
        // The fallback carries the whole patch, without a chunk timestamp.
        assert!(calls[2].patch.contains_key("title"));
        assert!(calls[2].patch.contains_key("content"));
        assert!(calls[2].patch.contains_key("tiers"));
        assert!(!calls[2].patch.contains_key("updated_at"));

        assert!(events.events().iter().any(|e| matches!(
            e,
            SaveEvent::ChunkFallback { chunk, .. } if chunk == "media"
        )));
    }

    #[tokio::test]
    async fn test_failed_fallback_reports_fallback_error() {
        let writer = MemoryWriter::new().with_script([
            WriteBehavior::fail("core rejected"),
            WriteBehavior::fail("full write rejected"),
        ]);
        let result = run(&writer, &listing_of_size(16_000)).await;

        assert!(!result.ok);
        assert_eq!(result.error.as_deref(), Some("full write rejected"));
        assert_eq!(writer.call_count(), 2);
    }
}

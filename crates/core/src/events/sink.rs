//! Save event sink trait and implementations.

use std::sync::{Arc, Mutex};

use super::SaveEvent;

/// Trait for receiving save events.
///
/// # Design Rules
///
/// - `emit()` must be fast and non-blocking: the coordinator calls it
///   inline on the save path
/// - Implementations should queue events for async processing
/// - Failure to emit must not affect saves (best-effort)
pub trait SaveEventSink: Send + Sync {
    /// Emit a single save event.
    fn emit(&self, event: SaveEvent);
}

/// No-op implementation for contexts that don't need events.
#[derive(Clone, Default)]
pub struct NoOpSaveEventSink;

impl SaveEventSink for NoOpSaveEventSink {
    fn emit(&self, _event: SaveEvent) {}
}

/// Mock sink for testing - collects emitted events.
#[derive(Clone, Default)]
pub struct MockSaveEventSink {
    events: Arc<Mutex<Vec<SaveEvent>>>,
}

impl MockSaveEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events.
    pub fn events(&self) -> Vec<SaveEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Returns collected events for one resource.
    pub fn events_for(&self, resource_id: &str) -> Vec<SaveEvent> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.resource_id() == resource_id)
            .cloned()
            .collect()
    }

    /// Clears collected events.
    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }

    /// Returns the number of collected events.
    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    /// Returns true if no events have been collected.
    pub fn is_empty(&self) -> bool {
        self.events.lock().unwrap().is_empty()
    }
}

impl SaveEventSink for MockSaveEventSink {
    fn emit(&self, event: SaveEvent) {
        self.events.lock().unwrap().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noop_sink_does_not_panic() {
        let sink = NoOpSaveEventSink;
        sink.emit(SaveEvent::skipped("svc-1", "empty patch"));
    }

    #[test]
    fn test_mock_sink_collects_events() {
        let sink = MockSaveEventSink::new();
        assert!(sink.is_empty());

        sink.emit(SaveEvent::queued("svc-1", "editor", false));
        sink.emit(SaveEvent::queued("svc-2", "editor", false));
        sink.emit(SaveEvent::queued("svc-1", "autosave", true));
        assert_eq!(sink.len(), 3);
        assert_eq!(sink.events_for("svc-1").len(), 2);

        sink.clear();
        assert!(sink.is_empty());
    }
}

//! In-process writer that records calls and applies patches to memory.
//!
//! Useful for tests and for running an application without a backend. Each
//! call consumes the next scripted [`WriteBehavior`]; once the script is
//! exhausted every call succeeds.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use tokio::time::Instant;
use uuid::Uuid;

use super::writer_traits::{DurableWriter, WriteOutcome};
use crate::payload::WritePatch;

/// How the next writer call settles.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteBehavior {
    Succeed,
    Fail { error: String, code: Option<String> },
    /// Never settles, ignoring the call's timeout.
    Hang,
    /// Succeeds after this long, ignoring the call's timeout.
    Delay(Duration),
}

impl WriteBehavior {
    pub fn fail(error: impl Into<String>) -> Self {
        WriteBehavior::Fail {
            error: error.into(),
            code: None,
        }
    }
}

/// A recorded writer invocation.
#[derive(Debug, Clone)]
pub struct WriteCall {
    pub resource_id: String,
    pub patch: WritePatch,
    pub timeout: Duration,
    pub started_at: Instant,
}

#[derive(Default)]
struct InFlight {
    current: HashMap<String, usize>,
    peak: HashMap<String, usize>,
}

/// Recording, scriptable [`DurableWriter`].
#[derive(Clone, Default)]
pub struct MemoryWriter {
    latency: Duration,
    calls: Arc<Mutex<Vec<WriteCall>>>,
    script: Arc<Mutex<VecDeque<WriteBehavior>>>,
    documents: Arc<Mutex<HashMap<String, WritePatch>>>,
    in_flight: Arc<Mutex<InFlight>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call takes this long, bounded by the call's own timeout.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Appends behaviors for upcoming calls, in order.
    pub fn with_script(self, behaviors: impl IntoIterator<Item = WriteBehavior>) -> Self {
        lock(&self.script).extend(behaviors);
        self
    }

    pub fn push_behavior(&self, behavior: WriteBehavior) {
        lock(&self.script).push_back(behavior);
    }

    /// Returns all recorded calls in start order.
    pub fn calls(&self) -> Vec<WriteCall> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }

    /// Calls recorded for one resource.
    pub fn calls_for(&self, resource_id: &str) -> Vec<WriteCall> {
        lock(&self.calls)
            .iter()
            .filter(|c| c.resource_id == resource_id)
            .cloned()
            .collect()
    }

    /// Current stored state of a resource, built from successful writes.
    pub fn document(&self, resource_id: &str) -> Option<WritePatch> {
        lock(&self.documents).get(resource_id).cloned()
    }

    /// Highest number of simultaneous calls ever observed for a resource.
    pub fn max_concurrent_writes(&self, resource_id: &str) -> usize {
        lock(&self.in_flight)
            .peak
            .get(resource_id)
            .copied()
            .unwrap_or(0)
    }

    fn enter(&self, resource_id: &str) {
        let mut in_flight = lock(&self.in_flight);
        let current = in_flight.current.entry(resource_id.to_string()).or_insert(0);
        *current += 1;
        let current = *current;
        let peak = in_flight.peak.entry(resource_id.to_string()).or_insert(0);
        *peak = (*peak).max(current);
    }

    fn leave(&self, resource_id: &str) {
        let mut in_flight = lock(&self.in_flight);
        if let Some(current) = in_flight.current.get_mut(resource_id) {
            *current = current.saturating_sub(1);
        }
    }

    fn apply(&self, resource_id: &str, patch: WritePatch) {
        let mut documents = lock(&self.documents);
        let document = documents.entry(resource_id.to_string()).or_default();
        for (field, value) in patch {
            document.insert(field, value);
        }
    }
}

#[async_trait]
impl DurableWriter for MemoryWriter {
    async fn write(&self, resource_id: &str, patch: WritePatch, timeout: Duration) -> WriteOutcome {
        let behavior = lock(&self.script)
            .pop_front()
            .unwrap_or(WriteBehavior::Succeed);

        lock(&self.calls).push(WriteCall {
            resource_id: resource_id.to_string(),
            patch: patch.clone(),
            timeout,
            started_at: Instant::now(),
        });
        debug!(
            "Memory write for {} ({} fields, {:?})",
            resource_id,
            patch.len(),
            behavior
        );

        self.enter(resource_id);

        match behavior {
            WriteBehavior::Hang => return futures::future::pending::<WriteOutcome>().await,
            WriteBehavior::Delay(delay) => {
                tokio::time::sleep(delay).await;
                self.apply(resource_id, patch);
                self.leave(resource_id);
                return WriteOutcome::success().with_trace_id(Uuid::new_v4().to_string());
            }
            _ => {}
        }

        if !self.latency.is_zero()
            && tokio::time::timeout(timeout, tokio::time::sleep(self.latency))
                .await
                .is_err()
        {
            self.leave(resource_id);
            return WriteOutcome::timed_out(format!(
                "Write to {} exceeded {}ms",
                resource_id,
                timeout.as_millis()
            ));
        }

        let outcome = match behavior {
            WriteBehavior::Fail { error, code } => WriteOutcome::failure(error, code.as_deref()),
            _ => {
                self.apply(resource_id, patch);
                WriteOutcome::success().with_trace_id(Uuid::new_v4().to_string())
            }
        };

        self.leave(resource_id);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::TIMEOUT_CODE;
    use serde_json::json;

    fn write_patch(value: serde_json::Value) -> WritePatch {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_successful_writes_are_applied() {
        let writer = MemoryWriter::new();
        let outcome = writer
            .write("svc-1", write_patch(json!({"title": "A"})), Duration::from_secs(1))
            .await;
        assert!(outcome.ok);
        assert!(outcome.trace_id.is_some());

        writer
            .write("svc-1", write_patch(json!({"price": 20})), Duration::from_secs(1))
            .await;
        assert_eq!(
            writer.document("svc-1"),
            Some(write_patch(json!({"title": "A", "price": 20})))
        );
        assert_eq!(writer.call_count(), 2);
    }

    #[tokio::test]
    async fn test_scripted_failure_is_not_applied() {
        let writer = MemoryWriter::new().with_script([WriteBehavior::Fail {
            error: "row locked".to_string(),
            code: Some("LOCKED".to_string()),
        }]);

        let outcome = writer
            .write("svc-1", write_patch(json!({"title": "A"})), Duration::from_secs(1))
            .await;
        assert!(!outcome.ok);
        assert_eq!(outcome.error.as_deref(), Some("row locked"));
        assert_eq!(outcome.code.as_deref(), Some("LOCKED"));
        assert!(writer.document("svc-1").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_write_lands_past_its_timeout() {
        let writer =
            MemoryWriter::new().with_script([WriteBehavior::Delay(Duration::from_secs(25))]);
        let started = Instant::now();

        let outcome = writer
            .write("svc-1", write_patch(json!({"title": "A"})), Duration::from_secs(8))
            .await;
        assert!(outcome.ok);
        assert!(started.elapsed() >= Duration::from_secs(25));
        assert_eq!(writer.document("svc-1"), Some(write_patch(json!({"title": "A"}))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_beyond_timeout_reports_timeout() {
        let writer = MemoryWriter::new().with_latency(Duration::from_secs(10));

        let outcome = writer
            .write("svc-1", write_patch(json!({"title": "A"})), Duration::from_secs(8))
            .await;
        assert!(!outcome.ok);
        assert_eq!(outcome.code.as_deref(), Some(TIMEOUT_CODE));
        assert_eq!(writer.max_concurrent_writes("svc-1"), 1);
    }
}

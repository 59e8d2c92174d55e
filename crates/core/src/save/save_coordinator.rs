//! Save coordinator: per-resource write coalescing with a liveness watchdog.
//!
//! Each resource id owns one record in a concurrent map. The first caller
//! for an idle resource spawns a driver task that owns the resource until
//! its pending slot is empty: it waits out the debounce spacing, promotes
//! the pending operation to the single in-flight write, and races that write
//! against the watchdog. Callers arriving in between are merged into the
//! pending slot and share its settlement.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use log::{debug, error, info, warn};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use super::save_config::SaveConfig;
use super::save_errors::SaveError;
use super::save_model::{SaveRequest, SaveResult, SaveStatus};
use super::save_pipeline::perform_save;
use super::save_state::{Promotion, QueuedOperation, ResourceSaveState};
use crate::events::{NoOpSaveEventSink, SaveEvent, SaveEventSink};
use crate::payload::{Patch, WritePatch};
use crate::writer::DurableWriter;

struct CoordinatorInner {
    writer: Arc<dyn DurableWriter>,
    config: SaveConfig,
    events: Arc<dyn SaveEventSink>,
    states: DashMap<String, ResourceSaveState>,
    shut_down: AtomicBool,
}

/// Coordinates saves so each resource has at most one write in flight.
///
/// Cheap to clone; clones share the same state. Must be used from within a
/// tokio runtime.
#[derive(Clone)]
pub struct SaveCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl SaveCoordinator {
    /// Creates a coordinator with default configuration.
    pub fn new(writer: Arc<dyn DurableWriter>) -> Self {
        Self::with_config(writer, SaveConfig::default())
    }

    /// Creates a coordinator with custom configuration.
    pub fn with_config(writer: Arc<dyn DurableWriter>, config: SaveConfig) -> Self {
        Self::with_events(writer, config, Arc::new(NoOpSaveEventSink))
    }

    /// Creates a coordinator that reports lifecycle events to `events`.
    pub fn with_events(
        writer: Arc<dyn DurableWriter>,
        config: SaveConfig,
        events: Arc<dyn SaveEventSink>,
    ) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                writer,
                config,
                events,
                states: DashMap::new(),
                shut_down: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &SaveConfig {
        &self.inner.config
    }

    /// Saves `patch` to `resource_id`.
    ///
    /// Resolves with the settlement of the write this submission ended up in,
    /// which may be shared with other callers. Writer failures and watchdog
    /// timeouts are reported inside the [`SaveResult`]; `Err` means the
    /// operation was cancelled or never ran.
    pub async fn save(
        &self,
        resource_id: &str,
        patch: Patch,
        source: &str,
    ) -> Result<SaveResult, SaveError> {
        self.submit(SaveRequest::new(resource_id, patch, source)).await
    }

    /// Same as [`save`](Self::save) for a prepared request.
    pub async fn submit(&self, request: SaveRequest) -> Result<SaveResult, SaveError> {
        let resource_id = request.resource_id.clone();
        let source = request.source.clone();
        let (tx, rx) = oneshot::channel();

        let enqueued = {
            let mut state = self.inner.states.entry(resource_id.clone()).or_default();
            // Checked under the entry guard so shutdown cannot miss this caller.
            if self.inner.shut_down.load(Ordering::SeqCst) {
                return Err(SaveError::ShutDown);
            }
            state.enqueue(request, tx)
        };

        if enqueued.merged {
            debug!(
                "Merged save from '{}' into pending operation for {}",
                source, resource_id
            );
        }
        self.inner
            .events
            .emit(SaveEvent::queued(&resource_id, &source, enqueued.merged));

        if enqueued.start_driver {
            tokio::spawn(drive(
                Arc::clone(&self.inner),
                resource_id.clone(),
                enqueued.generation,
            ));
        }

        rx.await.unwrap_or_else(|_| Err(SaveError::dropped(resource_id)))
    }

    /// True while a writer call is tracked for `resource_id`.
    pub fn is_saving(&self, resource_id: &str) -> bool {
        self.inner
            .states
            .get(resource_id)
            .is_some_and(|state| state.active.is_some())
    }

    pub fn status(&self, resource_id: &str) -> SaveStatus {
        self.inner
            .states
            .get(resource_id)
            .map(|state| state.status())
            .unwrap_or_default()
    }

    /// Rejects the pending operation for `resource_id` and forgets any
    /// in-flight write.
    ///
    /// The writer call itself is not aborted; its callers still receive its
    /// settlement, but the resource's bookkeeping no longer waits for it.
    pub fn cancel_pending(&self, resource_id: &str) {
        let pending = self
            .inner
            .states
            .get_mut(resource_id)
            .and_then(|mut state| state.cancel());

        let rejected = pending.map(QueuedOperation::reject_cancelled).unwrap_or(0);
        info!(
            "Cancelled pending save for {} ({} caller(s) rejected)",
            resource_id, rejected
        );
        self.inner.events.emit(SaveEvent::Cancelled {
            resource_id: resource_id.to_string(),
            rejected_waiters: rejected,
        });
    }

    /// Rejects all pending operations and refuses further saves.
    ///
    /// In-flight writer calls run to completion and still settle their own
    /// callers.
    pub fn shutdown(&self) {
        if self.inner.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }

        let pending: Vec<QueuedOperation> = self
            .inner
            .states
            .iter_mut()
            .filter_map(|mut entry| entry.cancel())
            .collect();

        let rejected: usize = pending
            .into_iter()
            .map(|op| op.reject(SaveError::ShutDown))
            .sum();
        info!(
            "Save coordinator shut down ({} pending caller(s) rejected)",
            rejected
        );
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::SeqCst)
    }

    /// Number of resource records currently held.
    pub fn tracked_resources(&self) -> usize {
        self.inner.states.len()
    }
}

/// Owns one resource until its pending slot is empty.
async fn drive(inner: Arc<CoordinatorInner>, resource_id: String, generation: u64) {
    debug!("Save driver started for {}", resource_id);

    loop {
        let Some(wait) = inner.next_wait(&resource_id, generation) else {
            break;
        };
        if !wait.is_zero() {
            debug!("Debouncing save for {} by {}ms", resource_id, wait.as_millis());
            tokio::time::sleep(wait).await;
        }

        match inner.promote(&resource_id, generation) {
            Promotion::Stop => break,
            Promotion::Redundant(op) => {
                debug!(
                    "Pending save for {} is already applied; skipping write",
                    resource_id
                );
                inner
                    .events
                    .emit(SaveEvent::skipped(&resource_id, "already applied"));
                op.resolve(&SaveResult::skipped());
            }
            Promotion::Write {
                op,
                write_id,
                clean,
            } => {
                inner
                    .execute(&resource_id, generation, write_id, op, clean)
                    .await
            }
        }
    }

    debug!("Save driver stopped for {}", resource_id);
    inner.release_when_idle(&resource_id).await;
}

impl CoordinatorInner {
    fn next_wait(&self, resource_id: &str, generation: u64) -> Option<Duration> {
        let mut state = self.states.get_mut(resource_id)?;
        state.next_wait(generation, self.config.debounce, Instant::now())
    }

    fn promote(&self, resource_id: &str, generation: u64) -> Promotion {
        match self.states.get_mut(resource_id) {
            Some(mut state) => state.promote(
                generation,
                Instant::now(),
                self.config.skip_redundant_writes,
            ),
            None => Promotion::Stop,
        }
    }

    fn abandon_write(
        &self,
        resource_id: &str,
        generation: u64,
        write_id: Uuid,
        result: &SaveResult,
    ) {
        if let Some(mut state) = self.states.get_mut(resource_id) {
            state.abandon_write(generation, write_id, result);
        }
    }

    fn finish_write(
        &self,
        resource_id: &str,
        generation: u64,
        write_id: Uuid,
        result: &SaveResult,
        clean: WritePatch,
    ) -> bool {
        self.states
            .get_mut(resource_id)
            .is_some_and(|mut state| state.finish_write(generation, write_id, result, clean))
    }

    /// Marks one detached write of `resource_id` as settled.
    fn settle_detached(&self, resource_id: &str) {
        if let Some(mut state) = self.states.get_mut(resource_id) {
            state.settle_detached();
        }
    }

    /// Drops the record once its debounce window has passed with nothing
    /// pending, so idle resources do not pin their last applied fields.
    async fn release_when_idle(&self, resource_id: &str) {
        let remaining = match self.states.get(resource_id) {
            Some(state) => match state.last_write_started {
                Some(start) => self
                    .config
                    .debounce
                    .saturating_sub(Instant::now().saturating_duration_since(start.at)),
                None => Duration::ZERO,
            },
            None => return,
        };
        if !remaining.is_zero() {
            tokio::time::sleep(remaining).await;
        }

        let debounce = self.config.debounce;
        let now = Instant::now();
        if self
            .states
            .remove_if(resource_id, |_, state| state.is_releasable(debounce, now))
            .is_some()
        {
            debug!("Released idle save record for {}", resource_id);
        }
    }

    /// Runs the promoted write, racing it against the watchdog.
    async fn execute(
        self: &Arc<Self>,
        resource_id: &str,
        generation: u64,
        write_id: Uuid,
        op: QueuedOperation,
        clean: WritePatch,
    ) {
        let queued_for = Utc::now() - op.enqueued_at;
        info!(
            "Saving {} (write {}, source '{}', {} caller(s), queued {}ms)",
            resource_id,
            write_id,
            op.source,
            op.waiter_count(),
            queued_for.num_milliseconds()
        );
        self.events.emit(SaveEvent::write_started(
            resource_id,
            write_id,
            &op.source,
            op.waiter_count(),
        ));

        // Spawned so the write keeps going if the watchdog gives up on it.
        let mut task: JoinHandle<SaveResult> = {
            let inner = Arc::clone(self);
            let resource_id = resource_id.to_string();
            let patch = op.patch.clone();
            let source = op.source.clone();
            tokio::spawn(async move {
                perform_save(
                    inner.writer.as_ref(),
                    &inner.config,
                    inner.events.as_ref(),
                    &resource_id,
                    &patch,
                    &source,
                )
                .await
            })
        };

        let settled = tokio::select! {
            joined = &mut task => Some(joined),
            _ = tokio::time::sleep(self.config.save_timeout) => None,
        };

        let result = match settled {
            Some(joined) => {
                let result = joined.unwrap_or_else(|e| {
                    error!("Save task for {} (write {}) failed: {}", resource_id, write_id, e);
                    SaveResult::internal(format!("Save task failed: {}", e))
                });
                self.events.emit(SaveEvent::Completed {
                    resource_id: resource_id.to_string(),
                    write_id,
                    ok: result.ok,
                    code: result.code.clone(),
                });
                if !self.finish_write(resource_id, generation, write_id, &result, clean) {
                    debug!(
                        "Write {} for {} settled after its bookkeeping was cleared",
                        write_id, resource_id
                    );
                    self.settle_detached(resource_id);
                }
                result
            }
            None => {
                warn!(
                    "Save for {} (write {}) did not settle within {}ms; outcome unknown",
                    resource_id,
                    write_id,
                    self.config.save_timeout.as_millis()
                );
                self.events.emit(SaveEvent::TimedOut {
                    resource_id: resource_id.to_string(),
                    write_id,
                });
                let result = SaveResult::timed_out(self.config.save_timeout.as_millis());
                // Counted before the observer can see the write settle.
                self.abandon_write(resource_id, generation, write_id, &result);
                self.observe_late_settlement(resource_id, write_id, task);
                result
            }
        };

        if result.is_failure() {
            warn!(
                "Save for {} failed: {}",
                resource_id,
                result.error.as_deref().unwrap_or("unknown error")
            );
        }
        op.resolve(&result);
    }

    /// Tracks a write the watchdog gave up on until it settles.
    fn observe_late_settlement(
        self: &Arc<Self>,
        resource_id: &str,
        write_id: Uuid,
        task: JoinHandle<SaveResult>,
    ) {
        let inner = Arc::clone(self);
        let resource_id = resource_id.to_string();
        tokio::spawn(async move {
            let ok = match task.await {
                Ok(result) => result.ok,
                Err(e) => {
                    error!("Detached write {} for {} failed: {}", write_id, resource_id, e);
                    false
                }
            };
            warn!(
                "Write {} for {} settled after its watchdog fired (ok: {})",
                write_id, resource_id, ok
            );
            inner.settle_detached(&resource_id);
            inner.events.emit(SaveEvent::LateSettlement {
                resource_id: resource_id.clone(),
                write_id,
                ok,
            });
            inner.release_when_idle(&resource_id).await;
        });
    }
}

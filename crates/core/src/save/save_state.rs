//! Per-resource coordination state and its transitions.
//!
//! Every method here runs under the coordinator's per-key map guard and
//! never suspends. A `generation` counter detaches in-flight work from the
//! record when pending operations are cancelled: a driver whose generation no
//! longer matches must not touch the record again.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use tokio::time::Instant;
use uuid::Uuid;

use super::save_errors::SaveError;
use super::save_model::{SavePhase, SaveRequest, SaveResult, SaveStatus};
use crate::payload::{sanitize, Patch, WritePatch};

pub(crate) type Waiter = oneshot::Sender<Result<SaveResult, SaveError>>;

/// The single pending operation of a resource, with everyone waiting on it.
pub(crate) struct QueuedOperation {
    pub resource_id: String,
    pub patch: Patch,
    pub source: String,
    pub enqueued_at: DateTime<Utc>,
    waiters: Vec<Waiter>,
}

impl QueuedOperation {
    fn new(request: SaveRequest, waiter: Waiter) -> Self {
        Self {
            resource_id: request.resource_id,
            patch: request.patch,
            source: request.source,
            enqueued_at: request.submitted_at,
            waiters: vec![waiter],
        }
    }

    /// Folds a later submission in; its fields win and it shares our fate.
    fn merge(&mut self, request: SaveRequest, waiter: Waiter) {
        self.patch.merge(request.patch);
        self.source = request.source;
        self.waiters.push(waiter);
    }

    pub fn waiter_count(&self) -> usize {
        self.waiters.len()
    }

    /// Hands the same settlement to every waiter.
    pub fn resolve(self, result: &SaveResult) {
        for waiter in self.waiters {
            // The caller may have stopped listening.
            let _ = waiter.send(Ok(result.clone()));
        }
    }

    /// Rejects every waiter with a cancellation of this resource.
    pub fn reject_cancelled(self) -> usize {
        let error = SaveError::cancelled(self.resource_id.clone());
        self.reject(error)
    }

    /// Rejects every waiter, returning how many there were.
    pub fn reject(self, error: SaveError) -> usize {
        let count = self.waiters.len();
        for waiter in self.waiters {
            let _ = waiter.send(Err(error.clone()));
        }
        count
    }
}

#[derive(Clone, Copy)]
pub(crate) struct WriteStart {
    pub at: Instant,
    pub wall: DateTime<Utc>,
}

pub(crate) struct Enqueued {
    pub merged: bool,
    /// No driver owns this resource yet; the caller must spawn one.
    pub start_driver: bool,
    pub generation: u64,
}

pub(crate) enum Promotion {
    Write {
        op: QueuedOperation,
        write_id: Uuid,
        clean: WritePatch,
    },
    /// Every field is already stored; no writer call needed.
    Redundant(QueuedOperation),
    Stop,
}

/// Coordination record for one resource id.
///
/// `phase` is `Idle` exactly when no driver owns the resource.
#[derive(Default)]
pub(crate) struct ResourceSaveState {
    pub generation: u64,
    pub phase: SavePhase,
    /// Id of the write currently in flight.
    pub active: Option<Uuid>,
    pub queued: Option<QueuedOperation>,
    pub last_write_started: Option<WriteStart>,
    /// Union of patches known to be stored by successful writes.
    pub last_applied: Option<WritePatch>,
    /// Writes released by the watchdog or a cancel that have not settled yet.
    pub detached_writes: usize,
}

impl ResourceSaveState {
    /// Merges into the pending slot or creates it.
    pub fn enqueue(&mut self, request: SaveRequest, waiter: Waiter) -> Enqueued {
        let merged = match self.queued.as_mut() {
            Some(queued) => {
                queued.merge(request, waiter);
                true
            }
            None => {
                self.queued = Some(QueuedOperation::new(request, waiter));
                false
            }
        };

        let start_driver = self.phase == SavePhase::Idle;
        if start_driver {
            self.phase = SavePhase::Debouncing;
        }

        Enqueued {
            merged,
            start_driver,
            generation: self.generation,
        }
    }

    /// How long the driver must wait before promoting, or `None` when it
    /// should stop (detached, or nothing left to do).
    pub fn next_wait(
        &mut self,
        generation: u64,
        debounce: Duration,
        now: Instant,
    ) -> Option<Duration> {
        if self.generation != generation {
            return None;
        }
        if self.queued.is_none() {
            self.phase = SavePhase::Idle;
            return None;
        }

        self.phase = SavePhase::Debouncing;
        let wait = match self.last_write_started {
            Some(start) => debounce.saturating_sub(now.saturating_duration_since(start.at)),
            None => Duration::ZERO,
        };
        Some(wait)
    }

    /// Takes the pending operation and marks it as the active write.
    pub fn promote(
        &mut self,
        generation: u64,
        now: Instant,
        skip_redundant: bool,
    ) -> Promotion {
        if self.generation != generation {
            return Promotion::Stop;
        }
        let Some(op) = self.queued.take() else {
            self.phase = SavePhase::Idle;
            return Promotion::Stop;
        };

        let clean = sanitize(&op.patch);
        if skip_redundant && !clean.is_empty() && self.is_already_applied(&clean) {
            return Promotion::Redundant(op);
        }

        let write_id = Uuid::new_v4();
        let wall = Utc::now();
        self.active = Some(write_id);
        self.last_write_started = Some(WriteStart { at: now, wall });
        self.phase = SavePhase::Writing;

        Promotion::Write {
            op,
            write_id,
            clean,
        }
    }

    /// Clears the active write once it settled.
    ///
    /// Returns false when the write was detached from this record.
    pub fn finish_write(
        &mut self,
        generation: u64,
        write_id: Uuid,
        result: &SaveResult,
        clean: WritePatch,
    ) -> bool {
        if self.generation != generation || self.active != Some(write_id) {
            return false;
        }

        self.active = None;
        // The driver still owns the resource until it finds the queue empty.
        self.phase = SavePhase::Debouncing;

        if !result.ok {
            self.last_applied = None;
        } else if !result.skipped {
            let applied = self.last_applied.get_or_insert_with(WritePatch::new);
            applied.extend(clean);
        }
        true
    }

    /// Releases the active write after its watchdog fired.
    ///
    /// The writer call keeps running and is counted as detached until
    /// [`settle_detached`](Self::settle_detached) is called for it.
    pub fn abandon_write(&mut self, generation: u64, write_id: Uuid, result: &SaveResult) -> bool {
        if !self.finish_write(generation, write_id, result, WritePatch::new()) {
            return false;
        }
        self.detached_writes += 1;
        true
    }

    /// Records that a detached write settled.
    ///
    /// Whatever it stored may have replaced newer fields, so nothing is
    /// known to be applied any more.
    pub fn settle_detached(&mut self) {
        self.detached_writes = self.detached_writes.saturating_sub(1);
        self.last_applied = None;
    }

    /// Detaches in-flight work and hands back the pending operation.
    pub fn cancel(&mut self) -> Option<QueuedOperation> {
        self.generation += 1;
        if self.active.take().is_some() {
            self.detached_writes += 1;
        }
        self.phase = SavePhase::Idle;
        // A detached write may still land; what is stored is unknown.
        self.last_applied = None;
        self.queued.take()
    }

    pub fn status(&self) -> SaveStatus {
        SaveStatus {
            is_saving: self.active.is_some(),
            queue_length: usize::from(self.queued.is_some()),
            last_write_started_at: self.last_write_started.map(|s| s.wall),
            phase: self.phase,
        }
    }

    /// True when nothing is owed to this record and its debounce window has
    /// passed, so dropping it loses no spacing or bookkeeping.
    pub fn is_releasable(&self, debounce: Duration, now: Instant) -> bool {
        self.phase == SavePhase::Idle
            && self.queued.is_none()
            && self.active.is_none()
            && self.detached_writes == 0
            && self
                .last_write_started
                .map_or(true, |start| now.saturating_duration_since(start.at) >= debounce)
    }

    fn is_already_applied(&self, clean: &WritePatch) -> bool {
        if self.detached_writes > 0 {
            return false;
        }
        self.last_applied.as_ref().is_some_and(|applied| {
            clean
                .iter()
                .all(|(field, value)| applied.get(field) == Some(value))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(patch: Patch) -> SaveRequest {
        SaveRequest::new("svc-1", patch, "editor")
    }

    fn enqueue(
        state: &mut ResourceSaveState,
        patch: Patch,
    ) -> (Enqueued, oneshot::Receiver<Result<SaveResult, SaveError>>) {
        let (tx, rx) = oneshot::channel();
        (state.enqueue(request(patch), tx), rx)
    }

    fn promote(state: &mut ResourceSaveState, now: Instant) -> Promotion {
        state.promote(state.generation, now, true)
    }

    #[tokio::test]
    async fn test_second_submission_merges_and_shares_fate() {
        let mut state = ResourceSaveState::default();
        let (first, rx1) = enqueue(&mut state, Patch::new().with("price", 10));
        let (second, rx2) = enqueue(&mut state, Patch::new().with("price", 20).with("desc", "x"));

        assert!(first.start_driver && !first.merged);
        assert!(!second.start_driver && second.merged);
        assert_eq!(state.status().queue_length, 1);

        let op = state.queued.take().unwrap();
        assert_eq!(op.waiter_count(), 2);
        assert_eq!(op.patch, Patch::new().with("price", 20).with("desc", "x"));

        op.resolve(&SaveResult::success());
        assert_eq!(rx1.await.unwrap(), Ok(SaveResult::success()));
        assert_eq!(rx2.await.unwrap(), Ok(SaveResult::success()));
    }

    #[test]
    fn test_next_wait_covers_remaining_debounce() {
        let mut state = ResourceSaveState::default();
        let start = Instant::now();
        let debounce = Duration::from_millis(1_000);

        let _ = enqueue(&mut state, Patch::new().with("title", "A"));
        assert_eq!(state.next_wait(0, debounce, start), Some(Duration::ZERO));
        assert!(matches!(promote(&mut state, start), Promotion::Write { .. }));
        assert!(state.status().is_saving);
        assert_eq!(state.phase, SavePhase::Writing);

        let _ = enqueue(&mut state, Patch::new().with("title", "B"));
        let wait = state.next_wait(0, debounce, start + Duration::from_millis(200));
        assert_eq!(wait, Some(Duration::from_millis(800)));

        let wait = state.next_wait(0, debounce, start + Duration::from_millis(1_500));
        assert_eq!(wait, Some(Duration::ZERO));
    }

    #[test]
    fn test_driver_stops_when_queue_is_empty() {
        let mut state = ResourceSaveState::default();
        let _ = enqueue(&mut state, Patch::new().with("title", "A"));
        let Promotion::Write { write_id, clean, .. } = promote(&mut state, Instant::now()) else {
            panic!("expected a write");
        };

        assert!(state.finish_write(0, write_id, &SaveResult::success(), clean));
        assert_eq!(state.phase, SavePhase::Debouncing);
        assert!(state.active.is_none());

        assert_eq!(state.next_wait(0, Duration::from_secs(1), Instant::now()), None);
        assert_eq!(state.phase, SavePhase::Idle);
    }

    #[test]
    fn test_already_applied_patch_is_redundant() {
        let mut state = ResourceSaveState::default();
        let patch = Patch::new().with("title", "A").with("price", 10);

        let _ = enqueue(&mut state, patch.clone());
        let Promotion::Write { write_id, clean, .. } = promote(&mut state, Instant::now()) else {
            panic!("expected a write");
        };
        state.finish_write(0, write_id, &SaveResult::success(), clean);

        let _ = enqueue(&mut state, Patch::new().with("price", 10));
        assert!(matches!(promote(&mut state, Instant::now()), Promotion::Redundant(_)));

        let _ = enqueue(&mut state, Patch::new().with("price", 11));
        assert!(matches!(promote(&mut state, Instant::now()), Promotion::Write { .. }));
    }

    #[test]
    fn test_failed_write_forgets_applied_fields() {
        let mut state = ResourceSaveState::default();
        state.last_applied = Some(sanitize(&Patch::new().with("title", "A")));

        let _ = enqueue(&mut state, Patch::new().with("price", 1));
        let Promotion::Write { write_id, clean, .. } = promote(&mut state, Instant::now()) else {
            panic!("expected a write");
        };
        state.finish_write(0, write_id, &SaveResult::timed_out(20_000), clean);
        assert!(state.last_applied.is_none());
    }

    #[tokio::test]
    async fn test_cancel_detaches_active_write() {
        let mut state = ResourceSaveState::default();
        let _ = enqueue(&mut state, Patch::new().with("title", "A"));
        let Promotion::Write { write_id, clean, .. } = promote(&mut state, Instant::now()) else {
            panic!("expected a write");
        };
        let (_, rx) = enqueue(&mut state, Patch::new().with("title", "B"));

        let op = state.cancel().unwrap();
        assert_eq!(op.reject_cancelled(), 1);
        assert_eq!(rx.await.unwrap(), Err(SaveError::cancelled("svc-1")));

        assert!(!state.status().is_saving);
        assert_eq!(state.phase, SavePhase::Idle);
        // The old driver's settlement no longer applies.
        assert!(!state.finish_write(0, write_id, &SaveResult::success(), clean));
        assert!(matches!(
            state.promote(0, Instant::now(), true),
            Promotion::Stop
        ));
    }

    #[test]
    fn test_detached_write_blocks_skip_until_it_settles() {
        let mut state = ResourceSaveState::default();
        let now = Instant::now();
        let patch = Patch::new().with("title", "B");

        let _ = enqueue(&mut state, Patch::new().with("title", "A"));
        let Promotion::Write { write_id, .. } = promote(&mut state, now) else {
            panic!("expected a write");
        };
        assert!(state.abandon_write(0, write_id, &SaveResult::timed_out(20_000)));
        assert_eq!(state.detached_writes, 1);

        let _ = enqueue(&mut state, patch.clone());
        let Promotion::Write { write_id, clean, .. } = promote(&mut state, now) else {
            panic!("expected a write");
        };
        state.finish_write(0, write_id, &SaveResult::success(), clean);

        // The abandoned write may still overwrite what was just stored.
        let _ = enqueue(&mut state, patch.clone());
        let Promotion::Write { write_id, clean, .. } = promote(&mut state, now) else {
            panic!("expected a write while a detached write is outstanding");
        };
        state.finish_write(0, write_id, &SaveResult::success(), clean);

        state.settle_detached();
        assert_eq!(state.detached_writes, 0);
        assert!(state.last_applied.is_none());

        let _ = enqueue(&mut state, patch);
        assert!(matches!(promote(&mut state, now), Promotion::Write { .. }));
    }

    #[test]
    fn test_cancel_counts_active_write_as_detached() {
        let mut state = ResourceSaveState::default();
        let _ = enqueue(&mut state, Patch::new().with("title", "A"));
        let _ = promote(&mut state, Instant::now());

        state.cancel();
        assert_eq!(state.detached_writes, 1);

        state.cancel();
        assert_eq!(state.detached_writes, 1);
    }

    #[test]
    fn test_record_is_releasable_after_debounce_window() {
        let mut state = ResourceSaveState::default();
        let start = Instant::now();
        let debounce = Duration::from_millis(1_000);
        assert!(state.is_releasable(debounce, start));

        let _ = enqueue(&mut state, Patch::new().with("title", "A"));
        assert!(!state.is_releasable(debounce, start));
        let Promotion::Write { write_id, clean, .. } = promote(&mut state, start) else {
            panic!("expected a write");
        };
        state.finish_write(0, write_id, &SaveResult::success(), clean);
        assert_eq!(state.next_wait(0, debounce, start), None);

        assert!(!state.is_releasable(debounce, start + Duration::from_millis(400)));
        assert!(state.is_releasable(debounce, start + Duration::from_millis(1_000)));

        state.detached_writes = 1;
        assert!(!state.is_releasable(debounce, start + Duration::from_secs(5)));
    }
}

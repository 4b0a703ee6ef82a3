//! Pending render jobs
//!
//! Jobs are ordered by priority class, then by submission order. There is at
//! most one live job per [`CacheKey`] across the queue and the workers, so a
//! page requested twice is rendered once.
//!
//! Workers are woken through a `flume` channel: every queued job sends one
//! [`WorkerSignal::JobReady`]. A signal whose job was cancelled in the
//! meantime finds nothing to pop and is simply dropped by the worker.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use flume::{Receiver, Sender};
use serde::{Deserialize, Serialize};

use crate::types::{CacheKey, RenderTarget, SurfaceId};

/// Priority class of a job, most urgent first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPriority {
    /// Page shown right now on a main surface
    Current,
    /// Look-ahead and prerender pages
    Lookahead,
    /// Overview and thumbnail pages
    Thumbnail,
}

impl JobPriority {
    /// The next less urgent class
    #[must_use]
    pub fn demoted(self) -> Self {
        match self {
            JobPriority::Current => JobPriority::Lookahead,
            JobPriority::Lookahead | JobPriority::Thumbnail => JobPriority::Thumbnail,
        }
    }

    /// The less urgent of the two classes
    #[must_use]
    pub fn at_most(self, other: Self) -> Self {
        self.max(other)
    }
}

/// Cooperative cancellation flag shared between the queue and a worker
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent; every clone observes it
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Unique, monotonically increasing job identifier (doubles as FIFO order)
pub type JobId = u64;

/// A request to render one page for one surface
#[derive(Clone, Debug)]
pub struct RenderJob {
    pub id: JobId,
    pub key: CacheKey,
    pub target: RenderTarget,
    pub priority: JobPriority,
    pub cancel: CancellationToken,
}

/// What [`JobQueue::submit`] did with a request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// A new job was queued
    Queued(JobId),
    /// An equal job was already queued; it was moved to a more urgent class
    Reprioritized(JobId),
    /// An equal job is already queued or rendering
    AlreadyPending(JobId),
    /// A job for the same key but another target was cancelled and a new one queued
    Replaced(JobId),
    /// The queue is shutting down
    Closed,
}

/// How a popped job ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Failed,
    Discarded,
}

/// Messages sent to render workers
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerSignal {
    /// A job was queued
    JobReady,
    /// Stop the worker
    Shutdown,
}

/// Queue statistics
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub submitted: u64,
    pub deduplicated: u64,
    pub reprioritized: u64,
    pub cancelled: u64,
    pub completed: u64,
    pub failed: u64,
    pub discarded: u64,
}

#[derive(Default)]
struct QueueState {
    order: BTreeMap<(JobPriority, JobId), CacheKey>,
    queued: HashMap<CacheKey, RenderJob>,
    in_flight: HashMap<JobId, RenderJob>,
    next_id: JobId,
    closed: bool,
    stats: QueueStats,
}

impl QueueState {
    fn enqueue(&mut self, key: CacheKey, target: RenderTarget, priority: JobPriority) -> JobId {
        let id = self.next_id;
        self.next_id += 1;
        self.order.insert((priority, id), key.clone());
        self.queued.insert(
            key.clone(),
            RenderJob {
                id,
                key,
                target,
                priority,
                cancel: CancellationToken::new(),
            },
        );
        self.stats.submitted += 1;
        id
    }

    fn remove_queued(&mut self, key: &CacheKey) -> Option<RenderJob> {
        let job = self.queued.remove(key)?;
        self.order.remove(&(job.priority, job.id));
        Some(job)
    }

    fn set_priority(&mut self, key: &CacheKey, priority: JobPriority) {
        if let Some(job) = self.queued.get_mut(key) {
            if let Some(k) = self.order.remove(&(job.priority, job.id)) {
                self.order.insert((priority, job.id), k);
            }
            job.priority = priority;
        }
    }

    /// The newest request of a surface wins: older urgent jobs step back.
    fn demote_current(&mut self, surface: &SurfaceId, except: &CacheKey) {
        let stale: Vec<CacheKey> = self
            .queued
            .values()
            .filter(|job| {
                job.priority == JobPriority::Current
                    && job.key.surface == *surface
                    && job.key != *except
            })
            .map(|job| job.key.clone())
            .collect();

        for key in stale {
            self.set_priority(&key, JobPriority::Current.demoted());
        }
    }
}

/// Thread-safe priority queue of render jobs with dedup and cancellation
pub struct JobQueue {
    state: Mutex<QueueState>,
    signals: Sender<WorkerSignal>,
    receiver: Receiver<WorkerSignal>,
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl JobQueue {
    #[must_use]
    pub fn new() -> Self {
        // MPMC: every worker pulls wake-ups from the same receiver.
        let (signals, receiver) = flume::unbounded();
        Self {
            state: Mutex::new(QueueState::default()),
            signals,
            receiver,
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Receiver end of the worker wake-up channel
    #[must_use]
    pub fn signals(&self) -> Receiver<WorkerSignal> {
        self.receiver.clone()
    }

    /// Queue a render, merging it with an equal pending job if there is one.
    pub fn submit(
        &self,
        key: CacheKey,
        target: RenderTarget,
        priority: JobPriority,
    ) -> SubmitOutcome {
        let mut guard = self.lock();
        let state = &mut *guard;

        if state.closed {
            return SubmitOutcome::Closed;
        }

        if priority == JobPriority::Current {
            state.demote_current(&key.surface, &key);
        }

        let mut replaced = false;

        if let Some(job) = state
            .in_flight
            .values()
            .find(|job| job.key == key && !job.cancel.is_cancelled())
        {
            if job.target == target {
                state.stats.deduplicated += 1;
                return SubmitOutcome::AlreadyPending(job.id);
            }
            log::debug!("Cancelling in-flight render of {key} at {}", job.target);
            job.cancel.cancel();
            state.stats.cancelled += 1;
            replaced = true;
        }

        if let Some(existing) = state.queued.get(&key) {
            let id = existing.id;
            if existing.target == target {
                if priority < existing.priority {
                    state.set_priority(&key, priority);
                    state.stats.reprioritized += 1;
                    return SubmitOutcome::Reprioritized(id);
                }
                state.stats.deduplicated += 1;
                return SubmitOutcome::AlreadyPending(id);
            }

            if let Some(old) = state.remove_queued(&key) {
                old.cancel.cancel();
                state.stats.cancelled += 1;
                replaced = true;
            }
        }

        let id = state.enqueue(key, target, priority);
        drop(guard);

        let _ = self.signals.send(WorkerSignal::JobReady);

        if replaced {
            SubmitOutcome::Replaced(id)
        } else {
            SubmitOutcome::Queued(id)
        }
    }

    /// Take the most urgent job and mark it in flight
    pub fn pop(&self) -> Option<RenderJob> {
        let mut guard = self.lock();
        let state = &mut *guard;

        while let Some((_, key)) = state.order.pop_first() {
            let Some(job) = state.queued.remove(&key) else {
                continue;
            };
            if job.cancel.is_cancelled() {
                continue;
            }
            state.in_flight.insert(job.id, job.clone());
            return Some(job);
        }
        None
    }

    /// Release a popped job
    pub fn finish(&self, id: JobId, outcome: JobOutcome) {
        let mut state = self.lock();
        if state.in_flight.remove(&id).is_none() {
            return;
        }
        match outcome {
            JobOutcome::Completed => state.stats.completed += 1,
            JobOutcome::Failed => state.stats.failed += 1,
            JobOutcome::Discarded => state.stats.discarded += 1,
        }
    }

    /// Cancel every queued or in-flight job matching `predicate`.
    ///
    /// Queued jobs are removed; in-flight jobs only get their flag set and
    /// their result is dropped when it arrives. Returns the number of jobs hit.
    pub fn cancel_if<F>(&self, predicate: F) -> usize
    where
        F: Fn(&RenderJob) -> bool,
    {
        let mut guard = self.lock();
        let state = &mut *guard;

        let doomed: Vec<CacheKey> = state
            .queued
            .values()
            .filter(|job| predicate(job))
            .map(|job| job.key.clone())
            .collect();

        let mut cancelled = 0;
        for key in doomed {
            if let Some(job) = state.remove_queued(&key) {
                job.cancel.cancel();
                cancelled += 1;
            }
        }

        for job in state.in_flight.values() {
            if !job.cancel.is_cancelled() && predicate(job) {
                job.cancel.cancel();
                cancelled += 1;
            }
        }

        state.stats.cancelled += cancelled as u64;
        cancelled
    }

    /// True if a live job exists for `key`
    #[must_use]
    pub fn is_pending(&self, key: &CacheKey) -> bool {
        let state = self.lock();
        state.queued.contains_key(key)
            || state
                .in_flight
                .values()
                .any(|job| job.key == *key && !job.cancel.is_cancelled())
    }

    /// Priority of the queued job for `key`, if any
    #[must_use]
    pub fn queued_priority(&self, key: &CacheKey) -> Option<JobPriority> {
        self.lock().queued.get(key).map(|job| job.priority)
    }

    #[must_use]
    pub fn queued_len(&self) -> usize {
        self.lock().queued.len()
    }

    #[must_use]
    pub fn in_flight_len(&self) -> usize {
        self.lock().in_flight.len()
    }

    /// Stop accepting jobs, cancel everything and wake `workers` workers to exit
    pub fn close(&self, workers: usize) {
        {
            let mut state = self.lock();
            if state.closed {
                return;
            }
            state.closed = true;
        }
        let cancelled = self.cancel_if(|_| true);
        log::debug!("Job queue closed, {cancelled} jobs cancelled");

        for _ in 0..workers {
            let _ = self.signals.send(WorkerSignal::Shutdown);
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    #[must_use]
    pub fn stats(&self) -> QueueStats {
        self.lock().stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Geometry, PageKind};

    fn key(surface: &str, page: usize) -> CacheKey {
        CacheKey::new(SurfaceId::from(surface), page)
    }

    fn target(width: u32, height: u32) -> RenderTarget {
        RenderTarget::new(Geometry::new(width, height), PageKind::Regular)
    }

    #[test]
    fn pops_by_priority_then_fifo() {
        let queue = JobQueue::new();
        queue.submit(key("thumbs", 0), target(10, 10), JobPriority::Thumbnail);
        queue.submit(key("next", 1), target(10, 10), JobPriority::Lookahead);
        queue.submit(key("next", 2), target(10, 10), JobPriority::Lookahead);
        queue.submit(key("current", 0), target(10, 10), JobPriority::Current);

        let order: Vec<CacheKey> = std::iter::from_fn(|| queue.pop()).map(|j| j.key).collect();
        assert_eq!(
            order,
            vec![
                key("current", 0),
                key("next", 1),
                key("next", 2),
                key("thumbs", 0)
            ]
        );
    }

    #[test]
    fn duplicate_submit_is_merged() {
        let queue = JobQueue::new();
        let first = queue.submit(key("current", 3), target(800, 600), JobPriority::Lookahead);
        let second = queue.submit(key("current", 3), target(800, 600), JobPriority::Lookahead);

        let SubmitOutcome::Queued(id) = first else {
            panic!("expected a queued job, got {first:?}");
        };
        assert_eq!(second, SubmitOutcome::AlreadyPending(id));
        assert_eq!(queue.queued_len(), 1);
        assert_eq!(queue.stats().deduplicated, 1);
    }

    #[test]
    fn duplicate_of_in_flight_job_is_merged() {
        let queue = JobQueue::new();
        queue.submit(key("current", 3), target(800, 600), JobPriority::Current);
        let job = queue.pop().unwrap();

        let again = queue.submit(key("current", 3), target(800, 600), JobPriority::Current);
        assert_eq!(again, SubmitOutcome::AlreadyPending(job.id));
        assert!(queue.pop().is_none());

        queue.finish(job.id, JobOutcome::Completed);
        assert!(!queue.is_pending(&key("current", 3)));
        assert_eq!(queue.stats().completed, 1);
    }

    #[test]
    fn more_urgent_resubmit_reprioritizes() {
        let queue = JobQueue::new();
        queue.submit(key("next", 5), target(10, 10), JobPriority::Thumbnail);
        queue.submit(key("next", 6), target(10, 10), JobPriority::Lookahead);

        let outcome = queue.submit(key("next", 5), target(10, 10), JobPriority::Lookahead);
        assert!(matches!(outcome, SubmitOutcome::Reprioritized(_)));
        assert_eq!(
            queue.queued_priority(&key("next", 5)),
            Some(JobPriority::Lookahead)
        );
        // Same class now, original submission order wins
        assert_eq!(queue.pop().unwrap().key, key("next", 5));
    }

    #[test]
    fn new_target_replaces_queued_job() {
        let queue = JobQueue::new();
        queue.submit(key("current", 3), target(800, 600), JobPriority::Current);
        let outcome = queue.submit(key("current", 3), target(640, 480), JobPriority::Current);

        assert!(matches!(outcome, SubmitOutcome::Replaced(_)));
        assert_eq!(queue.queued_len(), 1);
        let job = queue.pop().unwrap();
        assert_eq!(job.target, target(640, 480));
        assert!(queue.pop().is_none());
    }

    #[test]
    fn new_target_cancels_in_flight_job() {
        let queue = JobQueue::new();
        queue.submit(key("current", 3), target(800, 600), JobPriority::Current);
        let old = queue.pop().unwrap();

        let outcome = queue.submit(key("current", 3), target(640, 480), JobPriority::Current);
        assert!(matches!(outcome, SubmitOutcome::Replaced(_)));
        assert!(old.cancel.is_cancelled());
        assert_eq!(queue.pop().unwrap().target, target(640, 480));
    }

    #[test]
    fn latest_current_request_of_a_surface_wins() {
        let queue = JobQueue::new();
        queue.submit(key("current", 1), target(10, 10), JobPriority::Current);
        queue.submit(key("current", 2), target(10, 10), JobPriority::Current);
        queue.submit(key("other", 9), target(10, 10), JobPriority::Current);

        assert_eq!(
            queue.queued_priority(&key("current", 1)),
            Some(JobPriority::Lookahead)
        );
        let order: Vec<CacheKey> = std::iter::from_fn(|| queue.pop()).map(|j| j.key).collect();
        assert_eq!(
            order,
            vec![key("current", 2), key("other", 9), key("current", 1)]
        );
    }

    #[test]
    fn cancel_if_removes_queued_and_flags_in_flight() {
        let queue = JobQueue::new();
        queue.submit(key("current", 0), target(10, 10), JobPriority::Current);
        let running = queue.pop().unwrap();
        queue.submit(key("current", 1), target(10, 10), JobPriority::Lookahead);
        queue.submit(key("notes", 1), target(10, 10), JobPriority::Lookahead);

        let hit = queue.cancel_if(|job| job.key.surface.as_str() == "current");
        assert_eq!(hit, 2);
        assert!(running.cancel.is_cancelled());
        assert!(!queue.is_pending(&key("current", 0)));
        assert_eq!(queue.pop().unwrap().key, key("notes", 1));

        // A cancelled key can be submitted again
        let again = queue.submit(key("current", 0), target(10, 10), JobPriority::Current);
        assert!(matches!(again, SubmitOutcome::Queued(_)));
    }

    #[test]
    fn every_queued_job_signals_a_worker() {
        let queue = JobQueue::new();
        let signals = queue.signals();
        queue.submit(key("current", 0), target(10, 10), JobPriority::Current);
        queue.submit(key("current", 0), target(10, 10), JobPriority::Current);
        queue.submit(key("current", 1), target(10, 10), JobPriority::Lookahead);

        assert_eq!(signals.try_iter().count(), 2);
    }

    #[test]
    fn close_rejects_and_sends_shutdown() {
        let queue = JobQueue::new();
        let signals = queue.signals();
        queue.submit(key("current", 0), target(10, 10), JobPriority::Current);
        queue.close(2);

        assert!(queue.is_closed());
        assert!(queue.pop().is_none());
        assert_eq!(
            queue.submit(key("current", 1), target(10, 10), JobPriority::Current),
            SubmitOutcome::Closed
        );
        let received: Vec<WorkerSignal> = signals.try_iter().collect();
        assert_eq!(
            received,
            vec![
                WorkerSignal::JobReady,
                WorkerSignal::Shutdown,
                WorkerSignal::Shutdown
            ]
        );
    }

    #[test]
    fn priority_classes_order() {
        assert!(JobPriority::Current < JobPriority::Lookahead);
        assert!(JobPriority::Lookahead < JobPriority::Thumbnail);
        assert_eq!(
            JobPriority::Current.at_most(JobPriority::Lookahead),
            JobPriority::Lookahead
        );
        assert_eq!(JobPriority::Thumbnail.demoted(), JobPriority::Thumbnail);
    }
}

//! Render workers - run in separate threads

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, PoisonError};
use std::thread::{self, JoinHandle};

use flume::Receiver;

use crate::backend::BackendHandle;
use crate::cache::StoreOutcome;
use crate::delivery::Delivery;
use crate::error::{CacheError, RenderError};
use crate::queue::{JobOutcome, JobQueue, RenderJob, WorkerSignal};

/// Fixed set of background threads draining the [`JobQueue`]
pub struct WorkerPool {
    queue: Arc<JobQueue>,
    threads: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `workers` threads. Worker *i* renders through `backends[i % n]`.
    pub(crate) fn spawn(
        workers: usize,
        queue: Arc<JobQueue>,
        backends: &[BackendHandle],
        delivery: &Delivery,
    ) -> Result<Self, CacheError> {
        if backends.is_empty() {
            return Err(CacheError::NoBackend);
        }

        let mut pool = Self {
            queue: queue.clone(),
            threads: Vec::with_capacity(workers.max(1)),
        };

        for index in 0..workers.max(1) {
            let signals = queue.signals();
            let queue = queue.clone();
            let backend = backends[index % backends.len()].clone();
            let delivery = delivery.clone();

            let handle = thread::Builder::new()
                .name(format!("slidecache-render-{index}"))
                .spawn(move || render_worker(index, &signals, &queue, &backend, &delivery))
                .map_err(CacheError::Spawn)?;
            pool.threads.push(handle);
        }

        log::debug!(
            "Started {} render workers over {} backend handles",
            pool.threads.len(),
            backends.len()
        );
        Ok(pool)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.threads.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    /// Cancel outstanding jobs and ask every worker to exit
    pub fn close(&self) {
        self.queue.close(self.threads.len());
    }

    /// Close and wait for the workers to finish their current render
    pub fn join(mut self) {
        self.close();
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                log::error!("Render worker panicked");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.close();
    }
}

/// Main worker loop: one wake-up signal, at most one job
fn render_worker(
    index: usize,
    signals: &Receiver<WorkerSignal>,
    queue: &JobQueue,
    backend: &BackendHandle,
    delivery: &Delivery,
) {
    for signal in signals.iter() {
        match signal {
            WorkerSignal::JobReady => {
                if let Some(job) = queue.pop() {
                    handle_job(&job, queue, backend, delivery);
                }
            }
            WorkerSignal::Shutdown => break,
        }
    }
    log::trace!("Render worker {index} exiting");
}

/// Render one job and release it. Successful results are stored before the
/// job leaves the queue, failures are reported after, so a request racing
/// with either sees the page cached or free to retry.
fn handle_job(job: &RenderJob, queue: &JobQueue, backend: &BackendHandle, delivery: &Delivery) {
    if job.cancel.is_cancelled() {
        queue.finish(job.id, JobOutcome::Discarded);
        return;
    }

    if delivery.is_cached(&job.key, job.target) {
        log::trace!("{} already cached at {}", job.key, job.target);
        queue.finish(job.id, JobOutcome::Completed);
        return;
    }

    let result = {
        let mut backend = backend.lock().unwrap_or_else(PoisonError::into_inner);
        // A panicking backend counts as a failed render; the job must still be finished.
        panic::catch_unwind(AssertUnwindSafe(|| {
            backend.render(job.key.page, job.target.kind, job.target.geometry)
        }))
        .unwrap_or_else(|payload| Err(RenderError::backend(panic_message(payload.as_ref()))))
    };

    if job.cancel.is_cancelled() {
        log::debug!("Discarding render of {} at {}: cancelled", job.key, job.target);
        queue.finish(job.id, JobOutcome::Discarded);
        return;
    }

    match result {
        Ok(bitmap) => {
            let outcome = match delivery.on_job_complete(&job.key, job.target, bitmap, &job.cancel)
            {
                StoreOutcome::Stored => JobOutcome::Completed,
                StoreOutcome::Stale | StoreOutcome::UnknownSurface => JobOutcome::Discarded,
            };
            queue.finish(job.id, outcome);
        }
        Err(error) => {
            log::warn!("Rendering {} at {} failed: {error}", job.key, job.target);
            queue.finish(job.id, JobOutcome::Failed);
            delivery.failed(job.key.clone(), error);
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic");
    format!("backend panicked: {detail}")
}

//! Cache coordinator - the public face of the prerender cache
//!
//! The UI thread owns one [`Coordinator`] per open document. It asks for
//! pages with [`Coordinator::request`], which answers from the cache right
//! away or queues a render and reports [`PageRequest::Pending`]. Finished
//! renders show up as [`RenderEvent`]s from [`Coordinator::poll_events`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use flume::Receiver;

use crate::backend::{RenderBackend, into_handles};
use crate::cache::{CacheStats, StoreOutcome, SurfaceCache, SurfaceInfo};
use crate::config::CacheConfig;
use crate::deck::{Command, DeckState, Effect};
use crate::delivery::{self, Delivery, RenderEvent};
use crate::error::{CacheError, InvalidRequest};
use crate::queue::{JobPriority, JobQueue, QueueStats, SubmitOutcome};
use crate::types::{Bitmap, CacheKey, Geometry, PageKind, RenderTarget, SurfaceId};
use crate::worker::WorkerPool;

/// Answer to [`Coordinator::request`]
#[derive(Clone, Debug)]
pub enum PageRequest {
    /// The page is cached at the requested size
    Ready(Bitmap),
    /// A render is queued or running; a [`RenderEvent::PageReady`] follows
    Pending,
}

impl PageRequest {
    #[must_use]
    pub fn bitmap(&self) -> Option<&Bitmap> {
        match self {
            PageRequest::Ready(bitmap) => Some(bitmap),
            PageRequest::Pending => None,
        }
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self, PageRequest::Pending)
    }
}

/// Registration parameters for a display surface
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SurfaceSpec {
    pub id: SurfaceId,
    /// Initial size; may stay empty until the first layout
    pub geometry: Geometry,
    /// Priority class of the surface's own requests
    pub priority: JobPriority,
    /// Page part shown outside notes mode
    pub kind: PageKind,
    /// Page part shown in notes mode
    pub notes_kind: PageKind,
}

impl SurfaceSpec {
    #[must_use]
    pub fn new(id: impl Into<SurfaceId>, priority: JobPriority) -> Self {
        Self {
            id: id.into(),
            geometry: Geometry::default(),
            priority,
            kind: PageKind::Regular,
            notes_kind: PageKind::Regular,
        }
    }

    #[must_use]
    pub fn with_geometry(mut self, width: u32, height: u32) -> Self {
        self.geometry = Geometry::new(width, height);
        self
    }

    #[must_use]
    pub fn with_kind(mut self, kind: PageKind) -> Self {
        self.kind = kind;
        self
    }

    #[must_use]
    pub fn with_notes_kind(mut self, notes_kind: PageKind) -> Self {
        self.notes_kind = notes_kind;
        self
    }

    fn kind_for(&self, notes_mode: bool) -> PageKind {
        if notes_mode { self.notes_kind } else { self.kind }
    }
}

/// Owns the surface cache, the job queue and the render workers of one document
pub struct Coordinator {
    config: CacheConfig,
    deck: DeckState,
    surfaces: HashMap<SurfaceId, SurfaceSpec>,
    cache: Arc<Mutex<SurfaceCache>>,
    queue: Arc<JobQueue>,
    delivery: Delivery,
    events: Receiver<RenderEvent>,
    pool: WorkerPool,
}

impl Coordinator {
    /// Start a coordinator over a single backend handle; renders are serialized on it
    pub fn new(
        config: CacheConfig,
        page_count: usize,
        backend: impl RenderBackend + 'static,
    ) -> Result<Self, CacheError> {
        let backends: Vec<Box<dyn RenderBackend>> = vec![Box::new(backend)];
        Self::with_backends(config, page_count, backends)
    }

    /// Start a coordinator over independent backend handles, one lock per handle
    pub fn with_backends(
        config: CacheConfig,
        page_count: usize,
        backends: Vec<Box<dyn RenderBackend>>,
    ) -> Result<Self, CacheError> {
        let config = config.normalized();
        let cache = Arc::new(Mutex::new(SurfaceCache::from_config(&config)));
        let queue = Arc::new(JobQueue::new());
        let (delivery, events) = delivery::channel(cache.clone(), config.delivery_capacity);
        let handles = into_handles(backends);
        let pool = WorkerPool::spawn(config.workers, queue.clone(), &handles, &delivery)?;

        log::info!(
            "Prerender cache ready: {page_count} pages, budget {} x {}, {} workers",
            config.max_pages,
            config.reference(),
            pool.len()
        );

        Ok(Self {
            config,
            deck: DeckState::new(page_count),
            surfaces: HashMap::new(),
            cache,
            queue,
            delivery,
            events,
            pool,
        })
    }

    fn lock_cache(&self) -> MutexGuard<'_, SurfaceCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a display surface
    pub fn register_surface(&mut self, spec: SurfaceSpec) -> Result<(), CacheError> {
        if self.surfaces.contains_key(&spec.id) {
            return Err(CacheError::DuplicateSurface(spec.id));
        }

        {
            let mut cache = self.lock_cache();
            cache.register(spec.id.clone(), spec.geometry, spec.priority)?;
            cache.set_kind(&spec.id, spec.kind_for(self.deck.notes_mode))?;
        }
        self.surfaces.insert(spec.id.clone(), spec);
        Ok(())
    }

    /// Get `page` for `surface` at `width`x`height`, queueing a render on a miss.
    ///
    /// A size different from the surface's current one is a resize: the
    /// surface's pages are dropped and its outdated jobs cancelled first.
    pub fn request(
        &self,
        surface: &SurfaceId,
        page: usize,
        width: u32,
        height: u32,
    ) -> Result<PageRequest, CacheError> {
        let geometry = Geometry::new(width, height);
        self.validate(page, geometry)?;

        let (target, priority) = {
            let mut cache = self.lock_cache();
            let current = cache
                .target(surface)
                .ok_or_else(|| CacheError::UnknownSurface(surface.clone()))?;

            if current.geometry == geometry {
                if let Some(bitmap) = cache.lookup(surface, page) {
                    return Ok(PageRequest::Ready(bitmap));
                }
            } else {
                cache.invalidate(surface, geometry)?;
            }

            let priority = cache.priority(surface).unwrap_or(JobPriority::Lookahead);
            (RenderTarget::new(geometry, current.kind), priority)
        };

        self.cancel_stale(surface, target);
        self.queue
            .submit(CacheKey::new(surface.clone(), page), target, priority);
        Ok(PageRequest::Pending)
    }

    fn validate(&self, page: usize, geometry: Geometry) -> Result<(), InvalidRequest> {
        if geometry.is_empty() {
            return Err(InvalidRequest::EmptyGeometry {
                width: geometry.width,
                height: geometry.height,
            });
        }
        if page >= self.deck.page_count {
            return Err(InvalidRequest::PageOutOfRange {
                page,
                page_count: self.deck.page_count,
            });
        }
        Ok(())
    }

    /// Cancel the surface's jobs that no longer match its target
    fn cancel_stale(&self, surface: &SurfaceId, target: RenderTarget) -> usize {
        let cancelled = self
            .queue
            .cancel_if(|job| job.key.surface == *surface && job.target != target);
        if cancelled > 0 {
            log::debug!("Cancelled {cancelled} outdated renders for {surface}");
        }
        cancelled
    }

    /// The surface was resized by the UI without asking for a page yet
    pub fn resize(&self, surface: &SurfaceId, width: u32, height: u32) -> Result<(), CacheError> {
        let geometry = Geometry::new(width, height);
        let target = {
            let mut cache = self.lock_cache();
            let current = cache
                .target(surface)
                .ok_or_else(|| CacheError::UnknownSurface(surface.clone()))?;
            if current.geometry == geometry {
                return Ok(());
            }
            cache.invalidate(surface, geometry)?;
            RenderTarget::new(geometry, current.kind)
        };
        self.cancel_stale(surface, target);
        Ok(())
    }

    /// Change the page part a surface shows
    pub fn set_surface_kind(&self, surface: &SurfaceId, kind: PageKind) -> Result<(), CacheError> {
        let target = {
            let mut cache = self.lock_cache();
            if !cache.set_kind(surface, kind)? {
                return Ok(());
            }
            cache.target(surface)
        };
        if let Some(target) = target {
            self.cancel_stale(surface, target);
        }
        Ok(())
    }

    /// Store a finished render and notify the UI; stale results are dropped.
    ///
    /// Never blocks. When the event channel is full the notification is
    /// dropped; the page is cached regardless.
    pub fn on_job_complete(
        &self,
        key: &CacheKey,
        target: RenderTarget,
        bitmap: Bitmap,
    ) -> StoreOutcome {
        self.delivery.try_on_job_complete(key, target, bitmap)
    }

    /// The document was reloaded: keep surfaces, drop pages, cancel renders
    pub fn notify_document_changed(&mut self, page_count: usize) -> Result<(), CacheError> {
        self.apply(Command::Reload { page_count })
    }

    fn reset_document(&self) {
        let cancelled = self.queue.cancel_if(|_| true);
        self.lock_cache().invalidate_all();
        log::info!(
            "Document changed: {} pages, {cancelled} renders cancelled",
            self.deck.page_count
        );
    }

    /// Queue `page` for every laid-out surface that does not hold it yet.
    ///
    /// Returns the number of renders queued.
    pub fn prerender(&self, page: usize) -> usize {
        if page >= self.deck.page_count {
            return 0;
        }

        let wanted: Vec<(SurfaceId, RenderTarget, JobPriority)> = {
            let cache = self.lock_cache();
            cache
                .surfaces()
                .filter(|surface| !cache.contains(surface, page))
                .filter_map(|surface| {
                    let target = cache.target(surface)?;
                    let priority = cache.priority(surface)?;
                    (!target.geometry.is_empty()).then(|| {
                        (
                            surface.clone(),
                            target,
                            priority.at_most(JobPriority::Lookahead),
                        )
                    })
                })
                .collect()
        };

        wanted
            .into_iter()
            .filter(|(surface, target, priority)| {
                let key = CacheKey::new(surface.clone(), page);
                matches!(
                    self.queue.submit(key, *target, *priority),
                    SubmitOutcome::Queued(_) | SubmitOutcome::Replaced(_)
                )
            })
            .count()
    }

    /// Prerender the configured window of pages around `page`
    pub fn prerender_around(&self, page: usize) -> usize {
        self.deck
            .prerender_window(page, self.config.prerender_ahead, self.config.prerender_behind)
            .into_iter()
            .map(|p| self.prerender(p))
            .sum()
    }

    /// Apply a navigation command and run its effects
    pub fn apply(&mut self, cmd: Command) -> Result<(), CacheError> {
        let effects = self.deck.apply(cmd);
        self.execute_effects(effects)
    }

    fn execute_effects(&mut self, effects: Vec<Effect>) -> Result<(), CacheError> {
        for effect in effects {
            match effect {
                Effect::Prerender { around } => {
                    let queued = self.prerender_around(around);
                    log::trace!("Prerendering around page {around}: {queued} renders queued");
                }

                Effect::SetNotesMode(enabled) => {
                    let kinds: Vec<(SurfaceId, PageKind)> = self
                        .surfaces
                        .values()
                        .map(|spec| (spec.id.clone(), spec.kind_for(enabled)))
                        .collect();
                    for (surface, kind) in kinds {
                        self.set_surface_kind(&surface, kind)?;
                    }
                }

                Effect::DocumentChanged => self.reset_document(),
            }
        }
        Ok(())
    }

    /// Drain completion events without blocking
    pub fn poll_events(&self) -> Vec<RenderEvent> {
        self.events.try_iter().collect()
    }

    /// Get the event receiver for callers that want to block or select on it
    #[must_use]
    pub fn event_receiver(&self) -> &Receiver<RenderEvent> {
        &self.events
    }

    /// True if a render of `page` for `surface` is queued or running
    #[must_use]
    pub fn is_pending(&self, surface: &SurfaceId, page: usize) -> bool {
        self.queue
            .is_pending(&CacheKey::new(surface.clone(), page))
    }

    /// Check the cache without touching recency or statistics
    #[must_use]
    pub fn is_cached(&self, surface: &SurfaceId, page: usize) -> bool {
        self.lock_cache().contains(surface, page)
    }

    #[must_use]
    pub fn surface_info(&self, surface: &SurfaceId) -> Option<SurfaceInfo> {
        self.lock_cache().surface_info(surface)
    }

    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.lock_cache().stats()
    }

    #[must_use]
    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }

    #[must_use]
    pub fn resident_bytes(&self) -> usize {
        self.lock_cache().resident_bytes()
    }

    #[must_use]
    pub fn deck(&self) -> &DeckState {
        &self.deck
    }

    #[must_use]
    pub fn page_count(&self) -> usize {
        self.deck.page_count
    }

    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    #[must_use]
    pub fn workers(&self) -> usize {
        self.pool.len()
    }

    /// Cancel everything and wait for the workers to exit
    pub fn shutdown(self) {
        let Self { pool, events, .. } = self;
        pool.close();
        // Workers blocked on a full event channel give up once it disconnects.
        drop(events);
        pool.join();
    }
}

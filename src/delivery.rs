//! Handoff of finished renders from the workers to the UI thread
//!
//! A worker stores the bitmap in the surface cache itself and then posts a
//! [`RenderEvent`] on a bounded channel. The UI thread drains that channel
//! with `try_recv` once per frame and repaints whatever became available, so
//! it never waits on a worker. When the UI falls behind, workers wait on the
//! full channel instead.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use flume::{Receiver, Sender};

use crate::cache::{StoreOutcome, SurfaceCache};
use crate::error::{CacheError, RenderError};
use crate::queue::CancellationToken;
use crate::types::{Bitmap, CacheKey, RenderTarget};

/// Notification for the UI thread
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RenderEvent {
    /// The page is now cached for the surface and can be repainted
    PageReady { key: CacheKey },
    /// The backend could not render the page; a later request retries it
    Failed { key: CacheKey, error: RenderError },
}

impl RenderEvent {
    #[must_use]
    pub fn key(&self) -> &CacheKey {
        match self {
            RenderEvent::PageReady { key } | RenderEvent::Failed { key, .. } => key,
        }
    }

    /// The failure as a [`CacheError`], or `None` for a ready page
    #[must_use]
    pub fn into_error(self) -> Option<CacheError> {
        match self {
            RenderEvent::PageReady { .. } => None,
            RenderEvent::Failed { key, error } => {
                Some(CacheError::RenderFailed { key, source: error })
            }
        }
    }
}

/// Worker side of the handoff
#[derive(Clone)]
pub(crate) struct Delivery {
    cache: Arc<Mutex<SurfaceCache>>,
    events: Sender<RenderEvent>,
}

pub(crate) fn channel(
    cache: Arc<Mutex<SurfaceCache>>,
    capacity: usize,
) -> (Delivery, Receiver<RenderEvent>) {
    let (events, receiver) = flume::bounded(capacity.max(1));
    (Delivery { cache, events }, receiver)
}

impl Delivery {
    fn lock_cache(&self) -> MutexGuard<'_, SurfaceCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// True if the surface already holds `key` rendered for `target`
    pub(crate) fn is_cached(&self, key: &CacheKey, target: RenderTarget) -> bool {
        let cache = self.lock_cache();
        cache.target(&key.surface) == Some(target) && cache.contains(&key.surface, key.page)
    }

    /// Store a finished render. The cancellation flag is read under the cache
    /// lock. Document changes cancel jobs first and clear the cache second, so
    /// a render of the old document is never stored after the clear.
    fn store(
        &self,
        key: &CacheKey,
        target: RenderTarget,
        bitmap: Bitmap,
        cancel: &CancellationToken,
    ) -> StoreOutcome {
        let mut cache = self.lock_cache();
        if cancel.is_cancelled() {
            StoreOutcome::Stale
        } else {
            cache.store(&key.surface, key.page, target, bitmap)
        }
    }

    /// Store a finished render and tell the UI about it, waiting for room in
    /// the channel. Worker threads only.
    pub(crate) fn on_job_complete(
        &self,
        key: &CacheKey,
        target: RenderTarget,
        bitmap: Bitmap,
        cancel: &CancellationToken,
    ) -> StoreOutcome {
        let outcome = self.store(key, target, bitmap, cancel);
        if outcome == StoreOutcome::Stored {
            let _ = self
                .events
                .send(RenderEvent::PageReady { key: key.clone() });
        }
        outcome
    }

    /// Same as [`Delivery::on_job_complete`] but never waits: on the UI thread
    /// a full channel would never drain. A dropped event loses no page, the
    /// bitmap is cached either way.
    pub(crate) fn try_on_job_complete(
        &self,
        key: &CacheKey,
        target: RenderTarget,
        bitmap: Bitmap,
    ) -> StoreOutcome {
        let outcome = self.store(key, target, bitmap, &CancellationToken::new());
        if outcome == StoreOutcome::Stored {
            if let Err(err) = self
                .events
                .try_send(RenderEvent::PageReady { key: key.clone() })
            {
                log::debug!("Dropped ready event for {key}: {err}");
            }
        }
        outcome
    }

    pub(crate) fn failed(&self, key: CacheKey, error: RenderError) {
        let _ = self.events.send(RenderEvent::Failed { key, error });
    }
}

#[cfg(test)]
mod tests {
    use image::RgbaImage;

    use super::*;
    use crate::queue::JobPriority;
    use crate::types::{Geometry, PageKind, SurfaceId};

    const SIZE: Geometry = Geometry::new(8, 8);

    fn setup() -> (Delivery, Receiver<RenderEvent>, SurfaceId) {
        let mut cache = SurfaceCache::new(4, SIZE);
        let surface = SurfaceId::from("current");
        cache
            .register(surface.clone(), SIZE, JobPriority::Current)
            .unwrap();
        let (delivery, events) = channel(Arc::new(Mutex::new(cache)), 4);
        (delivery, events, surface)
    }

    fn bitmap() -> Bitmap {
        Arc::new(RgbaImage::new(SIZE.width, SIZE.height))
    }

    #[test]
    fn stored_result_is_announced() {
        let (delivery, events, surface) = setup();
        let key = CacheKey::new(surface, 1);
        let target = RenderTarget::new(SIZE, PageKind::Regular);

        let outcome = delivery.on_job_complete(&key, target, bitmap(), &CancellationToken::new());
        assert_eq!(outcome, StoreOutcome::Stored);
        assert!(delivery.is_cached(&key, target));
        assert_eq!(events.try_recv().unwrap(), RenderEvent::PageReady { key });
    }

    #[test]
    fn full_channel_does_not_block_ui_completion() {
        let mut cache = SurfaceCache::new(4, SIZE);
        let surface = SurfaceId::from("current");
        cache
            .register(surface.clone(), SIZE, JobPriority::Current)
            .unwrap();
        let (delivery, events) = channel(Arc::new(Mutex::new(cache)), 1);
        let target = RenderTarget::new(SIZE, PageKind::Regular);

        for page in 0..3 {
            let key = CacheKey::new(surface.clone(), page);
            assert_eq!(
                delivery.try_on_job_complete(&key, target, bitmap()),
                StoreOutcome::Stored
            );
            assert!(delivery.is_cached(&key, target));
        }
        assert_eq!(events.try_iter().count(), 1);
    }

    #[test]
    fn cancelled_result_is_dropped_silently() {
        let (delivery, events, surface) = setup();
        let key = CacheKey::new(surface, 1);
        let target = RenderTarget::new(SIZE, PageKind::Regular);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = delivery.on_job_complete(&key, target, bitmap(), &cancel);
        assert_eq!(outcome, StoreOutcome::Stale);
        assert!(!delivery.is_cached(&key, target));
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn stale_target_is_not_announced() {
        let (delivery, events, surface) = setup();
        let key = CacheKey::new(surface, 1);
        let old = RenderTarget::new(Geometry::new(4, 4), PageKind::Regular);

        let outcome = delivery.on_job_complete(&key, old, bitmap(), &CancellationToken::new());
        assert_eq!(outcome, StoreOutcome::Stale);
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn failures_are_forwarded() {
        let (delivery, events, surface) = setup();
        let key = CacheKey::new(surface, 2);
        delivery.failed(key.clone(), RenderError::DocumentClosed);

        let event = events.try_recv().unwrap();
        assert_eq!(event.key(), &key);
        assert!(matches!(
            event.into_error(),
            Some(CacheError::RenderFailed {
                source: RenderError::DocumentClosed,
                ..
            })
        ));
    }
}

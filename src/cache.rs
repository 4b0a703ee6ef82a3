//! Per-surface LRU store of rendered pages
//!
//! Every surface owns its own `LruCache` keyed by page index. The capacity of
//! each one is the surface's slot budget (see [`crate::budget`]), so a push
//! into a full surface evicts that surface's least recently looked-up page.
//!
//! `SurfaceCache` does no locking of its own; the coordinator keeps it behind
//! a single mutex and only holds that lock for these O(1) operations.

use std::collections::HashMap;
use std::num::NonZeroUsize;

use lru::LruCache;

use crate::budget::slots_for;
use crate::config::CacheConfig;
use crate::error::CacheError;
use crate::queue::JobPriority;
use crate::types::{Bitmap, Geometry, PageKind, RenderTarget, SurfaceId};

/// Result of [`SurfaceCache::store`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreOutcome {
    /// The bitmap is now cached
    Stored,
    /// The bitmap was rendered for a size or page kind the surface no longer has
    Stale,
    /// Nobody registered the surface
    UnknownSurface,
}

/// Counters for observability
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub stores: u64,
    pub stale_drops: u64,
    pub evictions: u64,
}

/// Snapshot of one surface's cache state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SurfaceInfo {
    pub geometry: Geometry,
    pub kind: PageKind,
    pub priority: JobPriority,
    pub slots: usize,
    pub entries: usize,
}

struct SurfaceSlot {
    geometry: Geometry,
    kind: PageKind,
    priority: JobPriority,
    pages: LruCache<usize, Bitmap>,
}

impl SurfaceSlot {
    fn target(&self) -> RenderTarget {
        RenderTarget::new(self.geometry, self.kind)
    }
}

/// Bounded bitmap stores, one per registered surface
pub struct SurfaceCache {
    max_pages: usize,
    reference: Geometry,
    surfaces: HashMap<SurfaceId, SurfaceSlot>,
    stats: CacheStats,
}

fn capacity(slots: usize) -> NonZeroUsize {
    NonZeroUsize::new(slots).unwrap_or(NonZeroUsize::MIN)
}

impl SurfaceCache {
    /// Create an empty cache with a budget of `max_pages` pages of `reference` size
    #[must_use]
    pub fn new(max_pages: usize, reference: Geometry) -> Self {
        Self {
            max_pages: max_pages.max(1),
            reference,
            surfaces: HashMap::new(),
            stats: CacheStats::default(),
        }
    }

    #[must_use]
    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.max_pages, config.reference())
    }

    /// Add a surface with no cached pages
    pub fn register(
        &mut self,
        surface: SurfaceId,
        geometry: Geometry,
        priority: JobPriority,
    ) -> Result<(), CacheError> {
        if self.surfaces.contains_key(&surface) {
            return Err(CacheError::DuplicateSurface(surface));
        }

        let slots = slots_for(self.max_pages, self.reference, geometry);
        log::debug!("Registered surface {surface} at {geometry} with {slots} slots");
        self.surfaces.insert(
            surface,
            SurfaceSlot {
                geometry,
                kind: PageKind::Regular,
                priority,
                pages: LruCache::new(capacity(slots)),
            },
        );
        Ok(())
    }

    #[must_use]
    pub fn is_registered(&self, surface: &SurfaceId) -> bool {
        self.surfaces.contains_key(surface)
    }

    /// Registered surface names, in no particular order
    pub fn surfaces(&self) -> impl Iterator<Item = &SurfaceId> {
        self.surfaces.keys()
    }

    /// Get a cached page, promoting it to most recently used
    pub fn lookup(&mut self, surface: &SurfaceId, page: usize) -> Option<Bitmap> {
        let hit = self
            .surfaces
            .get_mut(surface)
            .and_then(|slot| slot.pages.get(&page).cloned());

        if hit.is_some() {
            self.stats.hits += 1;
        } else {
            self.stats.misses += 1;
        }
        hit
    }

    /// Check for a page without touching its recency
    #[must_use]
    pub fn contains(&self, surface: &SurfaceId, page: usize) -> bool {
        self.surfaces
            .get(surface)
            .is_some_and(|slot| slot.pages.contains(&page))
    }

    /// Insert a rendered page, unless it was rendered for an outdated target.
    ///
    /// Evicts the surface's least recently used pages to stay within its slots.
    pub fn store(
        &mut self,
        surface: &SurfaceId,
        page: usize,
        target: RenderTarget,
        bitmap: Bitmap,
    ) -> StoreOutcome {
        let Some(slot) = self.surfaces.get_mut(surface) else {
            return StoreOutcome::UnknownSurface;
        };

        if slot.target() != target {
            log::debug!(
                "Dropping stale render of {surface}#{page} at {target}, surface is at {}",
                slot.target()
            );
            self.stats.stale_drops += 1;
            return StoreOutcome::Stale;
        }

        if let Some((evicted, _)) = slot.pages.push(page, bitmap) {
            if evicted != page {
                log::trace!("Evicted {surface}#{evicted}");
                self.stats.evictions += 1;
            }
        }
        self.stats.stores += 1;
        StoreOutcome::Stored
    }

    /// Drop every page of a surface and record its new size.
    ///
    /// Slot budgets of all surfaces are recomputed afterwards.
    pub fn invalidate(
        &mut self,
        surface: &SurfaceId,
        geometry: Geometry,
    ) -> Result<(), CacheError> {
        let slot = self
            .surfaces
            .get_mut(surface)
            .ok_or_else(|| CacheError::UnknownSurface(surface.clone()))?;

        log::debug!(
            "Invalidating {} pages of {surface}: {} -> {geometry}",
            slot.pages.len(),
            slot.geometry
        );
        slot.pages.clear();
        slot.geometry = geometry;
        self.rebalance();
        Ok(())
    }

    /// Drop every cached page; registrations, sizes and kinds are kept
    pub fn invalidate_all(&mut self) {
        for slot in self.surfaces.values_mut() {
            slot.pages.clear();
        }
    }

    /// Switch the part of the page a surface shows, dropping its pages on change.
    ///
    /// Returns whether the kind actually changed.
    pub fn set_kind(&mut self, surface: &SurfaceId, kind: PageKind) -> Result<bool, CacheError> {
        let slot = self
            .surfaces
            .get_mut(surface)
            .ok_or_else(|| CacheError::UnknownSurface(surface.clone()))?;

        if slot.kind == kind {
            return Ok(false);
        }
        slot.kind = kind;
        slot.pages.clear();
        Ok(true)
    }

    fn rebalance(&mut self) {
        for (surface, slot) in &mut self.surfaces {
            let slots = slots_for(self.max_pages, self.reference, slot.geometry);
            while slot.pages.len() > slots {
                if let Some((evicted, _)) = slot.pages.pop_lru() {
                    log::trace!("Evicted {surface}#{evicted} while shrinking to {slots} slots");
                    self.stats.evictions += 1;
                }
            }
            slot.pages.resize(capacity(slots));
        }
    }

    #[must_use]
    pub fn geometry(&self, surface: &SurfaceId) -> Option<Geometry> {
        self.surfaces.get(surface).map(|slot| slot.geometry)
    }

    #[must_use]
    pub fn kind(&self, surface: &SurfaceId) -> Option<PageKind> {
        self.surfaces.get(surface).map(|slot| slot.kind)
    }

    #[must_use]
    pub fn target(&self, surface: &SurfaceId) -> Option<RenderTarget> {
        self.surfaces.get(surface).map(SurfaceSlot::target)
    }

    #[must_use]
    pub fn priority(&self, surface: &SurfaceId) -> Option<JobPriority> {
        self.surfaces.get(surface).map(|slot| slot.priority)
    }

    /// Current slot budget, 0 for unknown surfaces
    #[must_use]
    pub fn slots(&self, surface: &SurfaceId) -> usize {
        self.surfaces
            .get(surface)
            .map_or(0, |slot| slot.pages.cap().get())
    }

    #[must_use]
    pub fn entry_count(&self, surface: &SurfaceId) -> usize {
        self.surfaces.get(surface).map_or(0, |slot| slot.pages.len())
    }

    #[must_use]
    pub fn surface_info(&self, surface: &SurfaceId) -> Option<SurfaceInfo> {
        self.surfaces.get(surface).map(|slot| SurfaceInfo {
            geometry: slot.geometry,
            kind: slot.kind,
            priority: slot.priority,
            slots: slot.pages.cap().get(),
            entries: slot.pages.len(),
        })
    }

    /// Bytes held by cached bitmaps across all surfaces
    #[must_use]
    pub fn resident_bytes(&self) -> usize {
        self.surfaces
            .values()
            .flat_map(|slot| slot.pages.iter())
            .map(|(_, bitmap)| bitmap.as_raw().len())
            .sum()
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.stats
    }
}

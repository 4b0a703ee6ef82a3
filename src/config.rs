//! Tunables for the prerender cache

use serde::{Deserialize, Serialize};

use crate::error::CacheError;
use crate::types::Geometry;

pub const DEFAULT_MAX_PAGES: usize = 200;
pub const DEFAULT_REFERENCE_WIDTH: u32 = 1920;
pub const DEFAULT_REFERENCE_HEIGHT: u32 = 1080;
pub const DEFAULT_DELIVERY_CAPACITY: usize = 64;
pub const DEFAULT_PRERENDER_AHEAD: usize = 4;
pub const DEFAULT_PRERENDER_BEHIND: usize = 2;
const MAX_DEFAULT_WORKERS: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Total memory budget, in full-size reference pages
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,

    #[serde(default = "default_reference_width")]
    pub reference_width: u32,

    #[serde(default = "default_reference_height")]
    pub reference_height: u32,

    /// Background render threads
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Completed renders the UI may lag behind before workers wait
    #[serde(default = "default_delivery_capacity")]
    pub delivery_capacity: usize,

    #[serde(default = "default_prerender_ahead")]
    pub prerender_ahead: usize,

    #[serde(default = "default_prerender_behind")]
    pub prerender_behind: usize,
}

fn default_max_pages() -> usize {
    DEFAULT_MAX_PAGES
}

fn default_reference_width() -> u32 {
    DEFAULT_REFERENCE_WIDTH
}

fn default_reference_height() -> u32 {
    DEFAULT_REFERENCE_HEIGHT
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .clamp(1, MAX_DEFAULT_WORKERS)
}

fn default_delivery_capacity() -> usize {
    DEFAULT_DELIVERY_CAPACITY
}

fn default_prerender_ahead() -> usize {
    DEFAULT_PRERENDER_AHEAD
}

fn default_prerender_behind() -> usize {
    DEFAULT_PRERENDER_BEHIND
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_pages: default_max_pages(),
            reference_width: default_reference_width(),
            reference_height: default_reference_height(),
            workers: default_workers(),
            delivery_capacity: default_delivery_capacity(),
            prerender_ahead: default_prerender_ahead(),
            prerender_behind: default_prerender_behind(),
        }
    }
}

impl CacheConfig {
    /// Parse a flat TOML table; missing keys fall back to defaults
    pub fn from_toml_str(text: &str) -> Result<Self, CacheError> {
        let config: CacheConfig = toml::from_str(text)?;
        Ok(config.normalized())
    }

    /// The page size the budget is expressed in
    #[must_use]
    pub fn reference(&self) -> Geometry {
        Geometry::new(self.reference_width, self.reference_height)
    }

    /// Clamp values that would leave the cache unusable
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.max_pages = self.max_pages.max(1);
        self.workers = self.workers.max(1);
        self.delivery_capacity = self.delivery_capacity.max(1);
        if self.reference().is_empty() {
            self.reference_width = DEFAULT_REFERENCE_WIDTH;
            self.reference_height = DEFAULT_REFERENCE_HEIGHT;
        }
        self
    }

    #[must_use]
    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages;
        self
    }

    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    #[must_use]
    pub fn with_reference(mut self, reference: Geometry) -> Self {
        self.reference_width = reference.width;
        self.reference_height = reference.height;
        self
    }
}

//! Background page prerendering for dual-screen presentation viewers
//!
//! Every display surface (presenter view, audience view, next-slide preview)
//! owns a small LRU cache of rendered pages. Its size is derived from one
//! global page budget scaled by the surface's pixel area. A fixed pool of
//! worker threads renders pages through a [`RenderBackend`] so the UI thread
//! only ever reads cached bitmaps or queues work.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use image::RgbaImage;
//! use slidecache::{
//!     Bitmap, CacheConfig, Coordinator, Geometry, JobPriority, PageKind, PageRequest,
//!     RenderError, SurfaceId, SurfaceSpec,
//! };
//!
//! let backend = |_page: usize, _kind: PageKind, g: Geometry| -> Result<Bitmap, RenderError> {
//!     Ok(Arc::new(RgbaImage::new(g.width, g.height)))
//! };
//! let mut coord = Coordinator::new(CacheConfig::default(), 12, backend)?;
//! coord.register_surface(SurfaceSpec::new("audience", JobPriority::Current))?;
//!
//! let audience = SurfaceId::from("audience");
//! if let PageRequest::Ready(bitmap) = coord.request(&audience, 0, 1920, 1080)? {
//!     println!("{}x{}", bitmap.width(), bitmap.height());
//! }
//! for event in coord.poll_events() {
//!     println!("{} is ready", event.key());
//! }
//! # Ok::<(), slidecache::CacheError>(())
//! ```

pub mod backend;
pub mod budget;
pub mod cache;
pub mod config;
pub mod coordinator;
pub mod deck;
pub mod delivery;
pub mod error;
pub mod queue;
pub mod types;
pub mod worker;

#[cfg(feature = "test-utils")]
pub mod test_utils;

pub use backend::RenderBackend;
pub use cache::{CacheStats, StoreOutcome, SurfaceCache, SurfaceInfo};
pub use config::CacheConfig;
pub use coordinator::{Coordinator, PageRequest, SurfaceSpec};
pub use deck::{Command, DeckState, Effect};
pub use delivery::RenderEvent;
pub use error::{CacheError, InvalidRequest, RenderError};
pub use queue::{CancellationToken, JobPriority, JobQueue, QueueStats, SubmitOutcome};
pub use types::{Bitmap, CacheKey, Geometry, PageKind, RenderTarget, SurfaceId};

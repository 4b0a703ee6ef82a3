//! Core types shared by the cache, the job queue and the coordinator

use std::fmt;
use std::sync::Arc;

use image::RgbaImage;
use serde::{Deserialize, Serialize};

/// Rendered page pixels.
///
/// Bitmaps are never mutated once a backend hands them over, so the cache and
/// the UI share them through a cheap `Arc` clone.
pub type Bitmap = Arc<RgbaImage>;

/// Opaque name of a display region ("current", "next", "notes", "thumb-3", ...)
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceId(Arc<str>);

impl SurfaceId {
    #[must_use]
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SurfaceId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for SurfaceId {
    fn from(name: String) -> Self {
        Self(Arc::from(name))
    }
}

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Pixel size a surface currently renders at
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Geometry {
    pub width: u32,
    pub height: u32,
}

impl Geometry {
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Number of pixels covered
    #[must_use]
    pub const fn area(self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// True until the surface has been laid out
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl fmt::Display for Geometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Addressable unit of caching: one page on one surface
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub surface: SurfaceId,
    pub page: usize,
}

impl CacheKey {
    #[must_use]
    pub fn new(surface: SurfaceId, page: usize) -> Self {
        Self { surface, page }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.surface, self.page)
    }
}

/// Which part of a page a surface shows.
///
/// Slides exported with embedded notes are twice as wide as the slide: the
/// left half is the content shown to the audience and the right half holds
/// the speaker notes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageKind {
    /// The whole page
    #[default]
    Regular,
    /// Left half of the page
    Content,
    /// Right half of the page
    Notes,
}

impl PageKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            PageKind::Regular => "regular",
            PageKind::Content => "content",
            PageKind::Notes => "notes",
        }
    }
}

/// What a render produces: the size and the part of the page
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct RenderTarget {
    pub geometry: Geometry,
    pub kind: PageKind,
}

impl RenderTarget {
    #[must_use]
    pub const fn new(geometry: Geometry, kind: PageKind) -> Self {
        Self { geometry, kind }
    }
}

impl fmt::Display for RenderTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.geometry, self.kind.as_str())
    }
}

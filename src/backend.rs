//! Page rasterizer interface
//!
//! The cache never parses documents itself. It drives a [`RenderBackend`]
//! that turns "page N at W×H" into pixels. A backend handle is not assumed to
//! be safe for concurrent calls, so every handle sits behind its own mutex and
//! workers take turns on it.

use std::sync::{Arc, Mutex};

use crate::error::RenderError;
use crate::types::{Bitmap, Geometry, PageKind};

/// Synchronous page rasterizer for one open document
pub trait RenderBackend: Send {
    /// Render `page` (0-based) scaled to fit `geometry`, showing the `kind` part of it
    fn render(
        &mut self,
        page: usize,
        kind: PageKind,
        geometry: Geometry,
    ) -> Result<Bitmap, RenderError>;
}

impl<F> RenderBackend for F
where
    F: FnMut(usize, PageKind, Geometry) -> Result<Bitmap, RenderError> + Send,
{
    fn render(
        &mut self,
        page: usize,
        kind: PageKind,
        geometry: Geometry,
    ) -> Result<Bitmap, RenderError> {
        self(page, kind, geometry)
    }
}

/// A backend plus the lock that serializes calls into it
pub(crate) type BackendHandle = Arc<Mutex<Box<dyn RenderBackend>>>;

pub(crate) fn into_handles(backends: Vec<Box<dyn RenderBackend>>) -> Vec<BackendHandle> {
    backends
        .into_iter()
        .map(|backend| Arc::new(Mutex::new(backend)))
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use image::RgbaImage;

    use super::*;

    #[test]
    fn closures_are_backends() {
        let mut calls = 0;
        let mut backend = |page: usize, _kind: PageKind, geometry: Geometry| {
            calls += 1;
            if page > 1 {
                return Err(RenderError::PageOutOfRange {
                    page,
                    page_count: 2,
                });
            }
            Ok(Arc::new(RgbaImage::new(geometry.width, geometry.height)))
        };

        let bitmap = backend
            .render(0, PageKind::Regular, Geometry::new(4, 3))
            .unwrap();
        assert_eq!(bitmap.dimensions(), (4, 3));
        assert!(backend
            .render(5, PageKind::Regular, Geometry::new(4, 3))
            .is_err());
        drop(backend);
        assert_eq!(calls, 2);
    }
}

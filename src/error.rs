//! Error types for render backends and the cache

use crate::types::{CacheKey, SurfaceId};

/// Errors reported by a [`RenderBackend`](crate::RenderBackend)
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    #[error("page {page} is out of range (document has {page_count} pages)")]
    PageOutOfRange { page: usize, page_count: usize },

    #[error("cannot render at {width}x{height}")]
    InvalidSize { width: u32, height: u32 },

    #[error("document is closed")]
    DocumentClosed,

    #[error("{detail}")]
    Backend { detail: String },
}

impl RenderError {
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend { detail: msg.into() }
    }
}

/// Reason a request was rejected before anything was queued
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum InvalidRequest {
    #[error("target size {width}x{height} must be positive")]
    EmptyGeometry { width: u32, height: u32 },

    #[error("page {page} is out of range (document has {page_count} pages)")]
    PageOutOfRange { page: usize, page_count: usize },
}

/// Errors surfaced by the cache coordinator
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("invalid request: {0}")]
    InvalidRequest(#[from] InvalidRequest),

    #[error("surface `{0}` is not registered")]
    UnknownSurface(SurfaceId),

    #[error("surface `{0}` is already registered")]
    DuplicateSurface(SurfaceId),

    #[error("rendering {key} failed: {source}")]
    RenderFailed {
        key: CacheKey,
        #[source]
        source: RenderError,
    },

    #[error("invalid cache configuration: {0}")]
    Config(#[from] toml::de::Error),

    #[error("at least one render backend is required")]
    NoBackend,

    #[error("failed to spawn render worker: {0}")]
    Spawn(#[source] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_failed_mentions_key_and_cause() {
        let err = CacheError::RenderFailed {
            key: CacheKey::new(SurfaceId::from("notes"), 7),
            source: RenderError::backend("corrupt content stream"),
        };
        assert_eq!(
            err.to_string(),
            "rendering notes#7 failed: corrupt content stream"
        );
    }

    #[test]
    fn invalid_request_converts() {
        let err: CacheError = InvalidRequest::EmptyGeometry {
            width: 0,
            height: 10,
        }
        .into();
        assert!(matches!(err, CacheError::InvalidRequest(_)));
    }
}

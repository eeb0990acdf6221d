//! High-level image operations.
//!
//! These functions combine calculations with backend execution.
//! They take the request geometry, compute parameters, and call the backend.

use super::backend::{BackendError, ImageBackend};
use super::calculations::calculate_target_dimensions;
use super::format::MediaType;
use super::params::{Quality, ResizeParams};
use std::path::Path;

/// Result type for image operations.
pub type Result<T> = std::result::Result<T, BackendError>;

/// What the caller asked for, before the source dimensions are known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThumbnailRequest {
    /// Requested width; `0` means "derive it".
    pub width: u32,
    /// Requested height; `0` means "derive it".
    pub height: u32,
    pub max_width: u32,
    pub max_height: u32,
    pub quality: Quality,
}

/// An encoded thumbnail ready to be cached and served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thumbnail {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Plan a resize without executing it.
///
/// Useful for testing parameter generation.
pub fn plan_resize(
    source: &Path,
    format: MediaType,
    original: (u32, u32),
    request: &ThumbnailRequest,
) -> ResizeParams {
    let (width, height) = calculate_target_dimensions(
        original,
        (request.width, request.height),
        (request.max_width, request.max_height),
    );

    ResizeParams {
        source: source.to_path_buf(),
        format,
        width,
        height,
        quality: request.quality,
    }
}

/// Create a thumbnail: identify the source, compute the geometry, resize.
pub fn create_thumbnail(
    backend: &dyn ImageBackend,
    source: &Path,
    format: MediaType,
    request: &ThumbnailRequest,
) -> Result<Thumbnail> {
    let dims = backend.identify(source, format)?;
    let params = plan_resize(source, format, (dims.width, dims.height), request);
    let bytes = backend.resize(&params)?;

    Ok(Thumbnail {
        bytes,
        width: params.width,
        height: params.height,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::backend::tests::{MockBackend, RecordedOp};

    fn request(width: u32, height: u32) -> ThumbnailRequest {
        ThumbnailRequest {
            width,
            height,
            max_width: 1500,
            max_height: 1500,
            quality: Quality::new(90),
        }
    }

    #[test]
    fn plan_resize_derives_missing_height() {
        let params = plan_resize(Path::new("/img/cat.png"), MediaType::Png, (400, 300), &request(200, 0));
        assert_eq!(params.width, 200);
        assert_eq!(params.height, 150);
        assert_eq!(params.format, MediaType::Png);
    }

    #[test]
    fn plan_resize_uses_default_when_nothing_requested() {
        let params = plan_resize(Path::new("/a.jpg"), MediaType::Jpeg, (1000, 10), &request(0, 0));
        assert_eq!((params.width, params.height), (100, 100));
    }

    #[test]
    fn create_thumbnail_identifies_then_resizes() {
        let backend = MockBackend::with_dimensions(400, 300);
        let thumb = create_thumbnail(&backend, Path::new("/img/cat.png"), MediaType::Png, &request(200, 0))
            .unwrap();

        assert_eq!((thumb.width, thumb.height), (200, 150));
        assert_eq!(thumb.bytes, b"200x150");

        let ops = backend.get_operations();
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0], RecordedOp::Identify("/img/cat.png".into()));
        assert_eq!(
            ops[1],
            RecordedOp::Resize {
                source: "/img/cat.png".into(),
                format: MediaType::Png,
                width: 200,
                height: 150,
                quality: 90,
            }
        );
    }

    #[test]
    fn create_thumbnail_stops_on_decode_failure() {
        let backend = MockBackend::failing_decode();
        let result = create_thumbnail(&backend, Path::new("/x.gif"), MediaType::Gif, &request(10, 10));
        assert!(matches!(result, Err(BackendError::Decode(_))));
        // No resize attempted after identify failed
        assert_eq!(backend.get_operations().len(), 1);
    }
}

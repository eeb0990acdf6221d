//! Image processing backend trait and shared types.
//!
//! The [`ImageBackend`] trait defines the two operations every backend must
//! support: identify and resize. Pixel resampling is an external capability
//! as far as the rest of the crate is concerned; everything above this trait
//! only deals in paths, formats, and dimensions.
//!
//! The production implementation is
//! [`RustBackend`](super::rust_backend::RustBackend), pure Rust and built on the
//! `image` crate.

use super::format::MediaType;
use super::params::ResizeParams;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// The source bytes could not be decoded as the detected format.
    #[error("Decode failed: {0}")]
    Decode(String),
    #[error("Encode failed: {0}")]
    Encode(String),
}

/// Result of an identify operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

/// Trait for image processing backends.
///
/// `Send + Sync` so a single backend can be shared by every in-flight request.
pub trait ImageBackend: Send + Sync {
    /// Get image dimensions (header only where the format allows it).
    fn identify(&self, path: &Path, format: MediaType) -> Result<Dimensions, BackendError>;

    /// Decode, resize to exactly `width`x`height`, and re-encode in the
    /// source format. Returns the encoded bytes.
    fn resize(&self, params: &ResizeParams) -> Result<Vec<u8>, BackendError>;
}

//! Image processing in pure Rust, no system libraries.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | **Detect** | `image::guess_format` on magic bytes |
//! | **Identify** | `ImageReader::into_dimensions` |
//! | **Resize** | Lanczos3 `resize_exact` |
//! | **Encode** | JPEG / PNG / GIF encoders from the `image` crate |
//!
//! The module is split into:
//! - **Format**: [`MediaType`], the closed set of accepted formats
//! - **Calculations**: Pure functions for dimension math (unit testable)
//! - **Parameters**: Data structures describing image operations
//! - **Backend**: [`ImageBackend`] trait + [`RustBackend`]
//! - **Operations**: High-level functions combining calculations + backend

pub mod backend;
mod calculations;
pub mod format;
pub mod operations;
mod params;
pub mod rust_backend;

pub use backend::{BackendError, Dimensions, ImageBackend};
pub use calculations::{DEFAULT_DIMENSIONS, calculate_target_dimensions};
pub use format::MediaType;
pub use operations::{Thumbnail, ThumbnailRequest, create_thumbnail, plan_resize};
pub use params::{Quality, ResizeParams};
pub use rust_backend::RustBackend;

//! Shared test utilities for the thumbserve test suite.
//!
//! Provides synthetic image fixtures and an isolated directory layout with a
//! matching [`ServiceConfig`].
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let dirs = TestDirs::new();
//! write_test_png(&dirs.docroot().join("img/cat.png"), 400, 300);
//! let pipeline = Pipeline::new(dirs.config()).unwrap();
//! ```

use image::{DynamicImage, ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use crate::config::ServiceConfig;

// =========================================================================
// Image fixtures
// =========================================================================

/// RGBA image whose left half is fully transparent and right half opaque red.
fn half_transparent(width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_fn(width, height, |x, _| {
        if x < width / 2 {
            Rgba([0, 0, 0, 0])
        } else {
            Rgba([200, 40, 40, 255])
        }
    })
}

/// Encoded PNG bytes of [`half_transparent`].
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(half_transparent(width, height))
        .write_to(&mut buf, ImageFormat::Png)
        .unwrap();
    buf.into_inner()
}

fn ensure_parent(path: &Path) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
}

pub fn write_test_png(path: &Path, width: u32, height: u32) {
    ensure_parent(path);
    std::fs::write(path, png_bytes(width, height)).unwrap();
}

/// Opaque gradient, so JPEG has something to compress.
pub fn write_test_jpeg(path: &Path, width: u32, height: u32) {
    ensure_parent(path);
    let img = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x * 255 / width) as u8, (y * 255 / height) as u8, 128])
    });
    img.save_with_format(path, ImageFormat::Jpeg).unwrap();
}

pub fn write_test_gif(path: &Path, width: u32, height: u32) {
    ensure_parent(path);
    half_transparent(width, height)
        .save_with_format(path, ImageFormat::Gif)
        .unwrap();
}

// =========================================================================
// Directory layout
// =========================================================================

/// A temp directory laid out as `docroot/`, `base/`, `cache/`, `scratch/`.
///
/// `docroot`, `base` and `scratch` exist up front. `cache` is left for the
/// store to create.
pub struct TestDirs {
    tmp: TempDir,
}

impl TestDirs {
    pub fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        for dir in ["docroot", "base", "scratch"] {
            std::fs::create_dir_all(tmp.path().join(dir)).unwrap();
        }
        Self { tmp }
    }

    pub fn root(&self) -> &Path {
        self.tmp.path()
    }

    pub fn docroot(&self) -> PathBuf {
        self.root().join("docroot")
    }

    pub fn base(&self) -> PathBuf {
        self.root().join("base")
    }

    pub fn cache(&self) -> PathBuf {
        self.root().join("cache")
    }

    pub fn scratch(&self) -> PathBuf {
        self.root().join("scratch")
    }

    /// Stock config pointed at this layout, remote fetching disabled.
    pub fn config(&self) -> ServiceConfig {
        let mut config = ServiceConfig::default();
        config.server.document_root = self.docroot();
        config.server.base_dir = self.base();
        config.cache.dir = self.cache();
        config.cache.salt = "test-salt".to_string();
        config.remote.scratch_dir = Some(self.scratch());
        config
    }
}

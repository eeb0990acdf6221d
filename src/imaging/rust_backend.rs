//! Pure Rust image processing backend.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Identify | `image::ImageReader::into_dimensions` (header only) |
//! | Decode (JPEG, PNG, GIF) | `image` crate decoders, format forced from sniffed bytes |
//! | Resize | `DynamicImage::resize_exact` with `Lanczos3` |
//! | Encode → JPEG | `JpegEncoder` at the requested quality |
//! | Encode → PNG | `PngEncoder`, compression picked from the quality band |
//! | Encode → GIF | `GifEncoder` (alpha 0 pixels become the transparent index) |
//!
//! PNG and GIF sources are resampled on an RGBA canvas. Resampling writes
//! every output pixel directly with no compositing, so transparent source
//! regions stay transparent.

use super::backend::{BackendError, Dimensions, ImageBackend};
use super::format::MediaType;
use super::params::{Quality, ResizeParams};
use image::codecs::gif::GifEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, PngEncoder};
use image::imageops::FilterType;
use image::{DynamicImage, ImageReader};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Pure Rust backend using the `image` crate ecosystem.
///
/// See the [module docs](self) for the crate-to-operation mapping.
pub struct RustBackend;

impl RustBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RustBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn open_reader(path: &Path, format: MediaType) -> Result<ImageReader<BufReader<File>>, BackendError> {
    let mut reader = ImageReader::open(path).map_err(BackendError::Io)?;
    reader.set_format(format.image_format());
    Ok(reader)
}

/// Load and decode an image from disk.
fn load_image(path: &Path, format: MediaType) -> Result<DynamicImage, BackendError> {
    open_reader(path, format)?
        .decode()
        .map_err(|e| BackendError::Decode(format!("{} source: {}", format, e)))
}

fn png_compression(quality: Quality) -> CompressionType {
    match quality.png_level() {
        0..=3 => CompressionType::Fast,
        4..=6 => CompressionType::Default,
        _ => CompressionType::Best,
    }
}

/// Encode into the source format.
fn encode(img: &DynamicImage, format: MediaType, quality: Quality) -> Result<Vec<u8>, BackendError> {
    let mut buf = Vec::new();
    let result = match format {
        MediaType::Jpeg => img.write_with_encoder(JpegEncoder::new_with_quality(
            &mut buf,
            quality.value() as u8,
        )),
        MediaType::Png => img.write_with_encoder(PngEncoder::new_with_quality(
            &mut buf,
            png_compression(quality),
            image::codecs::png::FilterType::Adaptive,
        )),
        MediaType::Gif => {
            let mut encoder = GifEncoder::new(&mut buf);
            encoder.encode_frame(image::Frame::new(img.to_rgba8()))
        }
    };
    result.map_err(|e| BackendError::Encode(format!("{}: {}", format, e)))?;
    Ok(buf)
}

impl ImageBackend for RustBackend {
    fn identify(&self, path: &Path, format: MediaType) -> Result<Dimensions, BackendError> {
        let (width, height) = open_reader(path, format)?
            .into_dimensions()
            .map_err(|e| BackendError::Decode(format!("{} header: {}", format, e)))?;
        Ok(Dimensions { width, height })
    }

    fn resize(&self, params: &ResizeParams) -> Result<Vec<u8>, BackendError> {
        let img = load_image(&params.source, params.format)?;

        let canvas = if params.format.has_alpha() {
            DynamicImage::ImageRgba8(img.to_rgba8())
        } else {
            DynamicImage::ImageRgb8(img.to_rgb8())
        };
        let resized = canvas.resize_exact(params.width, params.height, FilterType::Lanczos3);

        encode(&resized, params.format, params.quality)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{write_test_gif, write_test_jpeg, write_test_png};

    fn resize(source: &Path, format: MediaType, width: u32, height: u32) -> Vec<u8> {
        RustBackend::new()
            .resize(&ResizeParams {
                source: source.to_path_buf(),
                format,
                width,
                height,
                quality: Quality::new(85),
            })
            .unwrap()
    }

    #[test]
    fn identify_synthetic_png() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("cat.png");
        write_test_png(&path, 400, 300);

        let dims = RustBackend::new().identify(&path, MediaType::Png).unwrap();
        assert_eq!(dims, Dimensions { width: 400, height: 300 });
    }

    #[test]
    fn identify_nonexistent_file_is_io_error() {
        let result = RustBackend::new().identify(Path::new("/nonexistent/image.jpg"), MediaType::Jpeg);
        assert!(matches!(result, Err(BackendError::Io(_))));
    }

    #[test]
    fn identify_truncated_file_is_decode_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("broken.png");
        std::fs::write(&path, b"\x89PNG\r\n\x1a\nnot really").unwrap();

        let result = RustBackend::new().identify(&path, MediaType::Png);
        assert!(matches!(result, Err(BackendError::Decode(_))));
    }

    #[test]
    fn resize_png_preserves_transparency() {
        let tmp = tempfile::TempDir::new().unwrap();
        let source = tmp.path().join("cat.png");
        write_test_png(&source, 400, 300);

        let bytes = resize(&source, MediaType::Png, 200, 150);
        assert_eq!(MediaType::detect(&bytes), Some(MediaType::Png));

        let out = image::load_from_memory(&bytes).unwrap();
        assert_eq!((out.width(), out.height()), (200, 150));
        assert!(out.color().has_alpha());
        let rgba = out.to_rgba8();
        // Left half of the fixture is fully transparent.
        assert_eq!(rgba.get_pixel(10, 75)[3], 0);
        assert_eq!(rgba.get_pixel(190, 75)[3], 255);
    }

    #[test]
    fn resize_jpeg_stays_jpeg() {
        let tmp = tempfile::TempDir::new().unwrap();
        let source = tmp.path().join("photo.jpg");
        write_test_jpeg(&source, 320, 240);

        let bytes = resize(&source, MediaType::Jpeg, 160, 120);
        assert_eq!(MediaType::detect(&bytes), Some(MediaType::Jpeg));
        let out = image::load_from_memory(&bytes).unwrap();
        assert_eq!((out.width(), out.height()), (160, 120));
    }

    #[test]
    fn resize_gif_stays_gif() {
        let tmp = tempfile::TempDir::new().unwrap();
        let source = tmp.path().join("anim.gif");
        write_test_gif(&source, 64, 64);

        let bytes = resize(&source, MediaType::Gif, 32, 16);
        assert_eq!(MediaType::detect(&bytes), Some(MediaType::Gif));
        let out = image::load_from_memory(&bytes).unwrap();
        assert_eq!((out.width(), out.height()), (32, 16));
    }

    #[test]
    fn resize_stretches_when_both_sides_given() {
        let tmp = tempfile::TempDir::new().unwrap();
        let source = tmp.path().join("cat.png");
        write_test_png(&source, 400, 300);

        let bytes = resize(&source, MediaType::Png, 50, 50);
        let out = image::load_from_memory(&bytes).unwrap();
        assert_eq!((out.width(), out.height()), (50, 50));
    }

    #[test]
    fn png_compression_follows_quality_band() {
        assert!(matches!(png_compression(Quality::new(20)), CompressionType::Fast));
        assert!(matches!(png_compression(Quality::new(50)), CompressionType::Default));
        assert!(matches!(png_compression(Quality::new(90)), CompressionType::Best));
    }
}

//! The closed set of image formats the service accepts and emits.
//!
//! Every decode, encode, and file-extension site matches on [`MediaType`]
//! exhaustively, so supporting a new format is a compile-time-checked change.
//! Detection always looks at magic bytes; filename extensions and
//! server-supplied `Content-Type` headers are never consulted.

use image::ImageFormat;
use std::fmt;
use std::io::Read;
use std::path::Path;

/// Number of leading bytes needed to recognise every supported signature.
pub const SNIFF_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaType {
    Jpeg,
    Png,
    Gif,
}

impl MediaType {
    /// Identify a supported format from the leading bytes of a payload.
    ///
    /// Returns `None` for anything that is not JPEG, PNG, or GIF, including
    /// formats the `image` crate recognises but this service does not serve.
    pub fn detect(bytes: &[u8]) -> Option<Self> {
        match image::guess_format(bytes).ok()? {
            ImageFormat::Jpeg => Some(Self::Jpeg),
            ImageFormat::Png => Some(Self::Png),
            ImageFormat::Gif => Some(Self::Gif),
            _ => None,
        }
    }

    /// Read the head of a file and identify its format.
    pub fn detect_file(path: &Path) -> std::io::Result<Option<Self>> {
        let mut head = Vec::with_capacity(SNIFF_LEN);
        std::fs::File::open(path)?
            .take(SNIFF_LEN as u64)
            .read_to_end(&mut head)?;
        Ok(Self::detect(&head))
    }

    pub fn mime(self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Gif => "image/gif",
        }
    }

    /// File extension used for cache artefacts.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
            Self::Gif => "gif",
        }
    }

    pub fn image_format(self) -> ImageFormat {
        match self {
            Self::Jpeg => ImageFormat::Jpeg,
            Self::Png => ImageFormat::Png,
            Self::Gif => ImageFormat::Gif,
        }
    }

    /// Whether the output canvas must carry per-pixel transparency.
    pub fn has_alpha(self) -> bool {
        match self {
            Self::Jpeg => false,
            Self::Png | Self::Gif => true,
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mime())
    }
}

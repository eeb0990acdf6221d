//! # Thumbserve
//!
//! An HTTP service that resizes JPEG, PNG and GIF images on demand and keeps
//! the results in a disk cache. A request names a source image (a path below
//! the document root or, when enabled, an http(s) URL) and target dimensions;
//! the response is the resized image with standard freshness headers.
//!
//! # Architecture: One Request, One Pipeline
//!
//! ```text
//! 1. Resolve   source=…   →  trusted file + sniffed format   (or a rejection)
//! 2. Key       params     →  <sha256(source)>_<sha256(params ‖ salt)>.<ext>
//! 3. Lookup    key        →  fresh hit, or miss (expired entries deleted)
//! 4. Render    miss       →  identify → resize → encode → atomic write
//! 5. Respond   artefact   →  200 with ETag/Last-Modified, or 304
//! ```
//!
//! Every step before rendering is a security boundary: path traversal, SSRF,
//! and cache poisoning are all decided in stages 1 and 2. Rendering only ever
//! sees files that passed them.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`source`] | Sanitises, classifies and resolves source references; downloads remote images |
//! | [`cache`] | Cache key derivation and the flat on-disk artefact store with TTL expiry |
//! | [`respond`] | Conditional-HTTP responses: `ETag`, `Last-Modified`, `Cache-Control`, 304 |
//! | [`pipeline`] | Orchestrates one request end to end; maps failures to HTTP status codes |
//! | [`server`] | axum router, `/health`, graceful shutdown |
//! | [`params`] | Ordered query parameters and the resize-relevant subset |
//! | [`config`] | Layered `thumbserve.toml` + `THUMBSERVE_*` configuration and validation |
//! | [`imaging`] | Pure-Rust image operations: detect, identify, resize, encode |
//! | [`output`] | CLI output formatting for `check` and `prune` |
//!
//! # Design Decisions
//!
//! ## Content Decides the Format
//!
//! The media type comes from magic bytes, for local files and downloads alike.
//! File extensions and `Content-Type` headers are ignored. A PHP file renamed
//! to `.png` is rejected before any decoder sees it.
//!
//! ## Containment by Canonical Path
//!
//! Local references are rejected outright if they contain `..` or `./`, and
//! whatever survives is canonicalised and must still live below the root it
//! was joined to. Symlinks pointing outside the root therefore resolve to
//! "not found", not to the file they point at.
//!
//! ## Everything in the Query Is in the Key
//!
//! Unknown parameters are hashed too. Two URLs that differ in any byte of the
//! query produce two cache entries; none can be made to serve the other's
//! artefact. Rotating the salt invalidates every key at once.
//!
//! ## The Filesystem Is the Index
//!
//! There is no manifest. A cache entry is a file; its mtime is its age. Writes
//! go through a temp file and `rename`, so readers never see partial output.
//!
//! ## Pure-Rust Imaging
//!
//! The [`imaging`] module uses the `image` crate with Lanczos3 resampling. No
//! system libraries, so the binary is self-contained.

pub mod cache;
pub mod config;
pub mod imaging;
pub mod output;
pub mod params;
pub mod pipeline;
pub mod respond;
pub mod server;
pub mod source;

#[cfg(test)]
pub(crate) mod test_helpers;

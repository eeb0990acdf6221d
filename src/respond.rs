//! HTTP responses for cached artefacts, with conditional-request support.
//!
//! Every image response carries the same four headers:
//!
//! | Header | Value |
//! |---|---|
//! | `Content-Type` | From the artefact's media type |
//! | `Cache-Control` | `public, max-age=<cache ttl>` |
//! | `Last-Modified` | Artefact mtime, IMF-fixdate |
//! | `ETag` | Quoted SHA-256 of (path, mtime seconds) |
//!
//! A request whose `If-None-Match` lists the current ETag (or `*`) gets an
//! empty `304 Not Modified` carrying the same four headers.

use crate::cache::CacheEntry;
use crate::imaging::MediaType;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::io;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Entity tag for an artefact at `path` last modified at `modified`.
pub fn etag_for(path: &Path, modified: SystemTime) -> String {
    let secs = modified
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let mut hasher = Sha256::new();
    hasher.update(path.as_os_str().as_encoded_bytes());
    hasher.update(b"\0");
    hasher.update(secs.to_le_bytes());
    format!("\"{:x}\"", hasher.finalize())
}

/// `Sun, 06 Nov 1994 08:49:37 GMT`
pub fn http_date(time: SystemTime) -> String {
    DateTime::<Utc>::from(time)
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}

/// Whether an `If-None-Match` value selects `etag`.
///
/// Entries are comma-separated and compared after trimming whitespace, the
/// weak prefix, and quotes.
pub fn etag_matches(if_none_match: &str, etag: &str) -> bool {
    let bare = |tag: &str| tag.trim().trim_start_matches("W/").trim_matches('"').to_string();
    let wanted = bare(etag);
    if_none_match
        .split(',')
        .map(str::trim)
        .any(|candidate| candidate == "*" || (!candidate.is_empty() && bare(candidate) == wanted))
}

/// Serves artefacts with caching headers.
#[derive(Debug, Clone)]
pub struct ResponseServer {
    max_age: Duration,
}

impl ResponseServer {
    pub fn new(max_age: Duration) -> Self {
        Self { max_age }
    }

    /// Serve a cached artefact, or `304` if the client already has it.
    pub fn serve(&self, entry: &CacheEntry, request_headers: &HeaderMap) -> io::Result<Response> {
        let etag = etag_for(&entry.path, entry.modified);
        let client_has_it = request_headers
            .get(header::IF_NONE_MATCH)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| etag_matches(v, &etag));

        if client_has_it {
            return Ok(self.not_modified(entry.media_type(), &etag, entry.modified));
        }
        let bytes = entry.read()?;
        Ok(self.ok(bytes, entry.media_type(), &etag, entry.modified))
    }

    /// Serve bytes that were just written to `entry`, without reading them back.
    pub fn serve_written(&self, entry: &CacheEntry, bytes: Vec<u8>) -> Response {
        let etag = etag_for(&entry.path, entry.modified);
        self.ok(bytes, entry.media_type(), &etag, entry.modified)
    }

    /// Serve freshly encoded bytes that never made it into the cache.
    ///
    /// Validators are computed as if the write at `intended_path` had
    /// succeeded just now.
    pub fn serve_uncached(&self, bytes: Vec<u8>, media_type: MediaType, intended_path: &Path) -> Response {
        let now = SystemTime::now();
        let etag = etag_for(intended_path, now);
        self.ok(bytes, media_type, &etag, now)
    }

    fn ok(&self, bytes: Vec<u8>, media_type: MediaType, etag: &str, modified: SystemTime) -> Response {
        (StatusCode::OK, self.headers(media_type, etag, modified), bytes).into_response()
    }

    fn not_modified(&self, media_type: MediaType, etag: &str, modified: SystemTime) -> Response {
        (StatusCode::NOT_MODIFIED, self.headers(media_type, etag, modified)).into_response()
    }

    fn headers(
        &self,
        media_type: MediaType,
        etag: &str,
        modified: SystemTime,
    ) -> [(header::HeaderName, String); 4] {
        [
            (header::CONTENT_TYPE, media_type.mime().to_string()),
            (
                header::CACHE_CONTROL,
                format!("public, max-age={}", self.max_age.as_secs()),
            ),
            (header::LAST_MODIFIED, http_date(modified)),
            (header::ETAG, etag.to_string()),
        ]
    }
}

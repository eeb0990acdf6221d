//! Source resolution: untrusted reference in, trusted byte source out.
//!
//! A caller-supplied reference is sanitised, classified, and then either
//! resolved to a canonical file below a configured root or downloaded over
//! HTTP(S) into a private temporary file. Both paths end with the format
//! sniffed from magic bytes; file names and `Content-Type` headers are never
//! trusted.
//!
//! ## Local sources
//!
//! ```text
//! "/img/cat.png" ──► reject ".." / "./" ──► <document_root>/img/cat.png
//!                                             └─ canonicalize, must stay below the root
//!                                        else <base_dir>/img/cat.png (same rule)
//!                                        else NotFound
//! ```
//!
//! ## Remote sources
//!
//! Only when `remote.enabled`. The host must match the allow-list (when one
//! is configured), TLS certificates are always verified, redirects are capped
//! at [`MAX_REDIRECTS`] and re-checked against the scheme and host rules at
//! every hop, and the whole exchange is bounded by `remote.timeout_secs`.
//! The body is size-limited while streaming, sniffed, and only then written
//! to a [`TempDownload`], which deletes itself when dropped.

use crate::config::ServiceConfig;
use crate::imaging::MediaType;
use reqwest::{StatusCode, redirect};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

/// Most redirects a single download may follow.
pub const MAX_REDIRECTS: usize = 3;

/// Scheme prefixes removed from every reference before classification.
const DANGEROUS_SCHEMES: &[&str] = &["javascript:", "vbscript:", "data:"];

/// Why a reference could not be turned into a byte source.
///
/// `Display` strings never contain the reference itself.
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("invalid image source")]
    InvalidSource,
    #[error("image not found or access denied")]
    NotFound,
    #[error("external images are disabled")]
    ExternalDisabled,
    #[error("external host is not allowed")]
    HostNotAllowed,
    /// Transport failure or non-200 status. The detail is for logs only.
    #[error("download failed: {0}")]
    Download(String),
    #[error("unsupported media type")]
    UnsupportedMediaType,
    #[error("image source exceeds {limit} bytes")]
    TooLarge { limit: u64 },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP client setup failed: {0}")]
    ClientSetup(reqwest::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Local,
    Remote,
}

/// A sanitised, classified reference.
///
/// Construction guarantees a `Local` reference holds no `..` or `./`
/// sequence and a `Remote` one starts with `http://` or `https://`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceReference {
    raw: String,
    kind: SourceKind,
}

impl SourceReference {
    pub fn parse(input: &str) -> Result<Self, ResolveError> {
        let raw = sanitize(input);
        if raw.trim().is_empty() {
            return Err(ResolveError::InvalidSource);
        }
        let kind = if has_http_scheme(&raw) {
            SourceKind::Remote
        } else {
            SourceKind::Local
        };
        if kind == SourceKind::Local && (raw.contains("..") || raw.contains("./")) {
            return Err(ResolveError::InvalidSource);
        }
        Ok(Self { raw, kind })
    }

    /// The sanitised reference string. This is what the cache key hashes.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }
}

fn has_http_scheme(s: &str) -> bool {
    let bytes = s.as_bytes();
    bytes.get(..7).is_some_and(|p| p.eq_ignore_ascii_case(b"http://"))
        || bytes.get(..8).is_some_and(|p| p.eq_ignore_ascii_case(b"https://"))
}

/// Strip markup, NUL bytes, and dangerous scheme prefixes.
///
/// Scheme removal is case-insensitive and repeats until nothing changes, so
/// `javajavascript:script:` cannot collapse back into `javascript:`.
pub fn sanitize(input: &str) -> String {
    let mut out = strip_tags(input);
    out.retain(|c| c != '\0');
    loop {
        let before = out.len();
        for scheme in DANGEROUS_SCHEMES {
            out = remove_ascii_case_insensitive(&out, scheme);
        }
        if out.len() == before {
            return out;
        }
    }
}

/// Drop `<...>` spans. An unterminated `<` drops the rest of the input.
fn strip_tags(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut in_tag = false;
    for c in input.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => result.push(c),
            _ => {}
        }
    }
    result
}

/// `needle` must be ASCII: lowercasing ASCII keeps byte offsets stable.
fn remove_ascii_case_insensitive(haystack: &str, needle: &str) -> String {
    let lower = haystack.to_ascii_lowercase();
    let mut out = String::with_capacity(haystack.len());
    let mut last = 0;
    for (idx, _) in lower.match_indices(needle) {
        out.push_str(&haystack[last..idx]);
        last = idx + needle.len();
    }
    out.push_str(&haystack[last..]);
    out
}

/// Whether `host` equals, or is a subdomain of, an allow-listed entry.
///
/// An empty allow-list allows every host.
pub fn host_allowed(allowed: &[String], host: &str) -> bool {
    if allowed.is_empty() {
        return true;
    }
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    allowed.iter().any(|entry| {
        let site = entry
            .trim()
            .trim_start_matches('.')
            .trim_end_matches('.')
            .to_ascii_lowercase();
        !site.is_empty()
            && (host == site
                || host
                    .strip_suffix(site.as_str())
                    .is_some_and(|rest| rest.ends_with('.')))
    })
}

/// A downloaded payload on disk. Removed when dropped; removal failures are
/// logged.
#[derive(Debug)]
pub struct TempDownload {
    file: Option<NamedTempFile>,
}

impl TempDownload {
    fn write(dir: &Path, bytes: &[u8]) -> std::io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let mut file = tempfile::Builder::new()
            .prefix("thumbserve-")
            .suffix(".download")
            .tempfile_in(dir)?;
        file.write_all(bytes)?;
        file.flush()?;
        Ok(Self { file: Some(file) })
    }

    pub fn path(&self) -> &Path {
        self.file
            .as_ref()
            .map_or(Path::new(""), NamedTempFile::path)
    }
}

impl Drop for TempDownload {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            let path = file.path().to_path_buf();
            match file.close() {
                Ok(()) => debug!(path = %path.display(), "removed temporary download"),
                Err(e) => warn!(path = %path.display(), error = %e, "failed to remove temporary download"),
            }
        }
    }
}

#[derive(Debug)]
pub enum SourceLocation {
    Local(PathBuf),
    Downloaded(TempDownload),
}

/// A reference that passed every check, with its verified format.
#[derive(Debug)]
pub struct ResolvedSource {
    pub reference: SourceReference,
    pub media_type: MediaType,
    pub location: SourceLocation,
}

impl ResolvedSource {
    pub fn path(&self) -> &Path {
        match &self.location {
            SourceLocation::Local(path) => path,
            SourceLocation::Downloaded(download) => download.path(),
        }
    }

    /// True only for downloaded payloads, which are deleted on drop.
    pub fn is_temporary(&self) -> bool {
        matches!(self.location, SourceLocation::Downloaded(_))
    }
}

/// Turns raw references into [`ResolvedSource`]s.
#[derive(Clone)]
pub struct SourceResolver {
    config: Arc<ServiceConfig>,
    client: reqwest::Client,
}

impl SourceResolver {
    pub fn new(config: Arc<ServiceConfig>) -> Result<Self, ResolveError> {
        let client = build_client(&config).map_err(ResolveError::ClientSetup)?;
        Ok(Self { config, client })
    }

    pub async fn resolve(&self, raw: &str) -> Result<ResolvedSource, ResolveError> {
        let reference = SourceReference::parse(raw)?;
        match reference.kind() {
            SourceKind::Local => {
                let path = self.resolve_local(&reference)?;
                let media_type = self.check_local(&path)?;
                debug!(path = %path.display(), %media_type, "resolved local source");
                Ok(ResolvedSource {
                    reference,
                    media_type,
                    location: SourceLocation::Local(path),
                })
            }
            SourceKind::Remote => {
                let (download, media_type) = self.fetch_remote(&reference).await?;
                debug!(path = %download.path().display(), %media_type, "downloaded remote source");
                Ok(ResolvedSource {
                    reference,
                    media_type,
                    location: SourceLocation::Downloaded(download),
                })
            }
        }
    }

    /// Find the canonical file below the document root, then below the base
    /// directory.
    fn resolve_local(&self, reference: &SourceReference) -> Result<PathBuf, ResolveError> {
        let relative = reference.raw().trim_start_matches('/');
        let server = &self.config.server;
        [&server.document_root, &server.base_dir]
            .into_iter()
            .find_map(|root| contained_file(root, relative))
            .ok_or(ResolveError::NotFound)
    }

    fn check_local(&self, path: &Path) -> Result<MediaType, ResolveError> {
        let limit = self.config.images.max_file_size;
        if std::fs::metadata(path)?.len() > limit {
            return Err(ResolveError::TooLarge { limit });
        }
        MediaType::detect_file(path)?.ok_or(ResolveError::UnsupportedMediaType)
    }

    async fn fetch_remote(
        &self,
        reference: &SourceReference,
    ) -> Result<(TempDownload, MediaType), ResolveError> {
        let remote = &self.config.remote;
        if !remote.enabled {
            return Err(ResolveError::ExternalDisabled);
        }

        let url = Url::parse(reference.raw()).map_err(|_| ResolveError::InvalidSource)?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ResolveError::InvalidSource);
        }
        let host = url.host_str().ok_or(ResolveError::InvalidSource)?;
        if !host_allowed(&remote.allowed_hosts, host) {
            return Err(ResolveError::HostNotAllowed);
        }

        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ResolveError::Download(e.to_string()))?;
        if response.status() != StatusCode::OK {
            return Err(ResolveError::Download(format!("HTTP {}", response.status())));
        }

        let limit = self.config.images.max_file_size;
        if response.content_length().is_some_and(|len| len > limit) {
            return Err(ResolveError::TooLarge { limit });
        }
        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| ResolveError::Download(e.to_string()))?
        {
            if (body.len() + chunk.len()) as u64 > limit {
                return Err(ResolveError::TooLarge { limit });
            }
            body.extend_from_slice(&chunk);
        }

        let media_type = MediaType::detect(&body).ok_or(ResolveError::UnsupportedMediaType)?;
        let download = TempDownload::write(&self.config.scratch_dir(), &body)?;
        Ok((download, media_type))
    }
}

/// Canonical `root/relative`, if it is a regular file still below `root`.
fn contained_file(root: &Path, relative: &str) -> Option<PathBuf> {
    let root = root.canonicalize().ok()?;
    let candidate = root.join(relative).canonicalize().ok()?;
    (candidate.starts_with(&root) && candidate.is_file()).then_some(candidate)
}

fn build_client(config: &ServiceConfig) -> reqwest::Result<reqwest::Client> {
    let allowed = config.remote.allowed_hosts.clone();
    let policy = redirect::Policy::custom(move |attempt| {
        // `previous()` includes the original request URL
        if attempt.previous().len() > MAX_REDIRECTS {
            attempt.error("too many redirects")
        } else if !matches!(attempt.url().scheme(), "http" | "https") {
            attempt.error("redirect to a non-HTTP scheme")
        } else if !attempt
            .url()
            .host_str()
            .is_some_and(|host| host_allowed(&allowed, host))
        {
            attempt.error("redirect to a host outside the allow-list")
        } else {
            attempt.follow()
        }
    });

    reqwest::Client::builder()
        .timeout(config.remote_timeout())
        .connect_timeout(config.remote_timeout())
        .redirect(policy)
        .no_proxy()
        .user_agent(concat!("thumbserve/", env!("CARGO_PKG_VERSION")))
        .build()
}

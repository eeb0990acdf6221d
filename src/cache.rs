//! Disk cache for encoded thumbnails.
//!
//! Every artefact is a single file in one flat directory. Nothing else is
//! stored: the file name is the key, the file's modification time is its age,
//! and its extension is its media type.
//!
//! ## Cache keys
//!
//! ```text
//! <sha256(source)>_<sha256(params ‖ salt)>.<ext>
//! ```
//!
//! - **source digest**: the sanitised source reference. Kept as its own
//!   component so every variant of one source shares a prefix.
//! - **params digest**: every query pair in arrival order, recognised or not,
//!   followed by the configured salt. Each string is length-prefixed before
//!   hashing so `a=bc` and `ab=c` can never collide. Changing the salt
//!   invalidates the whole cache.
//! - **ext**: from the sniffed source format, never from the request.
//!
//! ## Expiry
//!
//! An entry whose age reaches the TTL is deleted the moment a lookup sees it
//! and reported as a miss. `thumbserve prune` sweeps the rest.
//!
//! ## Writes
//!
//! Bytes land in a temporary file inside the cache directory and are renamed
//! into place, so a concurrent reader sees either no file or a complete one.
//! Two requests racing on the same key both encode; the last rename wins and
//! both files were identical anyway.

use crate::imaging::MediaType;
use crate::params::QueryParams;
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, warn};
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("failed to write cache entry {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
}

/// The file name of one cached artefact.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    name: String,
    media_type: MediaType,
}

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.name
    }

    pub fn media_type(&self) -> MediaType {
        self.media_type
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Derive the cache key for a request.
///
/// Deterministic for identical inputs; any change to the source, any query
/// pair, pair order, the salt, or the media type yields a different key.
pub fn derive_key(source: &str, params: &QueryParams, salt: &str, media_type: MediaType) -> CacheKey {
    let source_digest = Sha256::digest(source.as_bytes());

    let mut hasher = Sha256::new();
    for (name, value) in params.pairs() {
        update_framed(&mut hasher, name);
        update_framed(&mut hasher, value);
    }
    hasher.update(b"salt\0");
    update_framed(&mut hasher, salt);

    CacheKey {
        name: format!(
            "{:x}_{:x}.{}",
            source_digest,
            hasher.finalize(),
            media_type.extension()
        ),
        media_type,
    }
}

fn update_framed(hasher: &mut Sha256, s: &str) {
    hasher.update((s.len() as u64).to_le_bytes());
    hasher.update(s.as_bytes());
}

/// A fresh artefact on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub path: PathBuf,
    pub modified: SystemTime,
}

impl CacheEntry {
    pub fn media_type(&self) -> MediaType {
        self.key.media_type()
    }

    pub fn read(&self) -> io::Result<Vec<u8>> {
        std::fs::read(&self.path)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Hit(CacheEntry),
    Miss,
}

/// Outcome of a [`CacheStore::prune`] sweep.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PruneStats {
    pub kept: u32,
    pub removed: u32,
    pub failed: u32,
}

impl PruneStats {
    pub fn total(&self) -> u32 {
        self.kept + self.removed + self.failed
    }
}

impl fmt::Display for PruneStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.failed > 0 {
            write!(
                f,
                "{} removed, {} kept, {} failed ({} total)",
                self.removed,
                self.kept,
                self.failed,
                self.total()
            )
        } else {
            write!(
                f,
                "{} removed, {} kept ({} total)",
                self.removed,
                self.kept,
                self.total()
            )
        }
    }
}

/// The cache directory plus its TTL.
#[derive(Debug, Clone)]
pub struct CacheStore {
    dir: PathBuf,
    ttl: Duration,
}

impl CacheStore {
    pub fn new(dir: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            dir: dir.into(),
            ttl,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn ensure_dir(&self) -> io::Result<()> {
        std::fs::create_dir_all(&self.dir)
    }

    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(key.as_str())
    }

    /// Find a fresh entry. Expired entries are deleted on sight.
    pub fn lookup(&self, key: &CacheKey) -> Lookup {
        let path = self.path_for(key);
        let modified = match std::fs::metadata(&path).and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(e) => {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %e, "unreadable cache entry");
                }
                return Lookup::Miss;
            }
        };

        if self.is_expired(modified, SystemTime::now()) {
            debug!(key = %key, "cache entry expired");
            self.delete(&path);
            return Lookup::Miss;
        }

        Lookup::Hit(CacheEntry {
            key: key.clone(),
            path,
            modified,
        })
    }

    /// Store `bytes` under `key`, replacing any previous entry atomically.
    pub fn write(&self, key: &CacheKey, bytes: &[u8]) -> Result<CacheEntry, CacheError> {
        let path = self.path_for(key);
        let wrap = |source: io::Error| CacheError::Write {
            path: path.clone(),
            source,
        };

        self.ensure_dir().map_err(wrap)?;
        let mut tmp = NamedTempFile::new_in(&self.dir).map_err(wrap)?;
        tmp.write_all(bytes).map_err(wrap)?;
        tmp.flush().map_err(wrap)?;
        let file = tmp.persist(&path).map_err(|e| wrap(e.error))?;
        let modified = file.metadata().and_then(|m| m.modified()).map_err(wrap)?;

        debug!(key = %key, bytes = bytes.len(), "cached thumbnail");
        Ok(CacheEntry {
            key: key.clone(),
            path,
            modified,
        })
    }

    /// Delete every expired artefact in the cache directory, plus any file
    /// whose name is not a cache key (leftovers from interrupted writes).
    pub fn prune(&self) -> io::Result<PruneStats> {
        let mut stats = PruneStats::default();
        if !self.dir.exists() {
            return Ok(stats);
        }

        let now = SystemTime::now();
        for entry in WalkDir::new(&self.dir).min_depth(1).max_depth(1) {
            let entry = entry.map_err(io::Error::other)?;
            if !entry.file_type().is_file() {
                continue;
            }
            let modified = entry
                .metadata()
                .map_err(io::Error::other)?
                .modified()?;
            let is_key = entry.file_name().to_str().is_some_and(is_key_name);
            if is_key && !self.is_expired(modified, now) {
                stats.kept += 1;
                continue;
            }
            match std::fs::remove_file(entry.path()) {
                Ok(()) => stats.removed += 1,
                Err(e) => {
                    warn!(path = %entry.path().display(), error = %e, "failed to prune cache entry");
                    stats.failed += 1;
                }
            }
        }
        Ok(stats)
    }

    /// Mtimes in the future count as age zero.
    fn is_expired(&self, modified: SystemTime, now: SystemTime) -> bool {
        now.duration_since(modified).unwrap_or(Duration::ZERO) >= self.ttl
    }

    fn delete(&self, path: &Path) {
        match std::fs::remove_file(path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => {
                warn!(path = %path.display(), error = %e, "failed to delete expired cache entry");
            }
            _ => {}
        }
    }
}

/// `<64 hex>_<64 hex>.<ext>`, as produced by [`derive_key`].
fn is_key_name(name: &str) -> bool {
    let is_digest = |s: &str| s.len() == 64 && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
    let Some((digests, ext)) = name.rsplit_once('.') else {
        return false;
    };
    let Some((source, params)) = digests.split_once('_') else {
        return false;
    };
    is_digest(source)
        && is_digest(params)
        && [MediaType::Jpeg, MediaType::Png, MediaType::Gif]
            .iter()
            .any(|m| m.extension() == ext)
}

//! Request parameters.
//!
//! [`QueryParams`] is the ordered, string-keyed mapping the HTTP layer hands to
//! the pipeline. Order matters: the cache key is computed over the pairs
//! exactly as they arrived, and every pair participates, recognised or not.
//!
//! | Canonical | Alias | Meaning |
//! |---|---|---|
//! | `source` | `src` | Image reference (path below the document root, or URL) |
//! | `width` | `w` | Target width, `0`/absent = derive |
//! | `height` | `h` | Target height, `0`/absent = derive |
//! | `quality` | `q` | Encoding quality 1–100 |

use crate::config::ImagesConfig;
use crate::imaging::{Quality, ThumbnailRequest};

/// Ordered query-string pairs, already percent-decoded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams(Vec<(String, String)>);

impl QueryParams {
    /// Decode a raw query string (`a=1&b=2`), preserving pair order.
    pub fn parse(query: &str) -> Self {
        Self(
            url::form_urlencoded::parse(query.as_bytes())
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect(),
        )
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.0
    }

    /// Value of the last pair named `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Canonical name first, then its short alias.
    fn lookup(&self, canonical: &str, alias: &str) -> Option<&str> {
        self.get(canonical).or_else(|| self.get(alias))
    }

    /// The source reference, if present and non-empty.
    pub fn source(&self) -> Option<&str> {
        self.lookup("source", "src").filter(|s| !s.trim().is_empty())
    }

    /// An integer parameter; anything unparseable counts as absent.
    fn uint(&self, canonical: &str, alias: &str) -> Option<u32> {
        self.lookup(canonical, alias)
            .and_then(|v| v.trim().parse::<u32>().ok())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for QueryParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// The subset of parameters the resize logic acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestParameters {
    pub width: u32,
    pub height: u32,
    pub quality: Quality,
}

impl RequestParameters {
    pub fn from_query(query: &QueryParams, images: &ImagesConfig) -> Self {
        Self {
            width: query.uint("width", "w").unwrap_or(0),
            height: query.uint("height", "h").unwrap_or(0),
            quality: Quality::new(
                query
                    .uint("quality", "q")
                    .unwrap_or(images.default_quality),
            ),
        }
    }

    pub fn thumbnail_request(&self, images: &ImagesConfig) -> ThumbnailRequest {
        ThumbnailRequest {
            width: self.width,
            height: self.height,
            max_width: images.max_width,
            max_height: images.max_height,
            quality: self.quality,
        }
    }
}

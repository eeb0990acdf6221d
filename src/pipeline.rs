//! Request orchestration.
//!
//! ```text
//! query ──► source present? ──► SourceResolver ──► derive_key ──► CacheStore::lookup
//!                                                                   │
//!                        ┌──────────── Hit ─────────────────────────┤
//!                        ▼                                          ▼ Miss
//!                ResponseServer::serve              identify ─► resize ─► CacheStore::write
//!                                                                          │
//!                                          ResponseServer::serve_written ◄─┘
//!                                          (serve_uncached if the write failed)
//! ```
//!
//! Decoding and encoding are CPU-bound and run on the blocking pool. The
//! [`ResolvedSource`] is moved into that task and dropped when it ends, which
//! deletes any downloaded payload no matter how the request finished.

use crate::cache::{CacheKey, CacheStore, Lookup, derive_key};
use crate::config::ServiceConfig;
use crate::imaging::{BackendError, ImageBackend, RustBackend, ThumbnailRequest, create_thumbnail};
use crate::params::{QueryParams, RequestParameters};
use crate::respond::ResponseServer;
use crate::source::{ResolveError, ResolvedSource, SourceResolver};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use std::io;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Terminal failure of one request.
///
/// `Display` is for logs. Clients only ever see [`public_message`](Self::public_message).
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("no image source specified")]
    MissingSource,
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error("decode failed: {0}")]
    Decode(String),
    #[error("encode failed: {0}")]
    Encode(String),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("render task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl From<BackendError> for PipelineError {
    fn from(e: BackendError) -> Self {
        match e {
            BackendError::Io(e) => Self::Io(e),
            BackendError::Decode(msg) => Self::Decode(msg),
            BackendError::Encode(msg) => Self::Encode(msg),
        }
    }
}

impl PipelineError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingSource | Self::Decode(_) => StatusCode::BAD_REQUEST,
            Self::Resolve(e) => match e {
                ResolveError::NotFound => StatusCode::NOT_FOUND,
                ResolveError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
                ResolveError::Io(_) | ResolveError::ClientSetup(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
                ResolveError::InvalidSource
                | ResolveError::ExternalDisabled
                | ResolveError::HostNotAllowed
                | ResolveError::Download(_)
                | ResolveError::UnsupportedMediaType => StatusCode::BAD_REQUEST,
            },
            Self::Encode(_) | Self::Io(_) | Self::Join(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Fixed text per failure kind. Never contains request input.
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::MissingSource => "no image specified",
            Self::Resolve(e) => match e {
                ResolveError::InvalidSource => "invalid image source",
                ResolveError::NotFound => "image not found",
                ResolveError::ExternalDisabled => "external images are not allowed",
                ResolveError::HostNotAllowed => "external image host is not allowed",
                ResolveError::Download(_) => "could not download external image",
                ResolveError::UnsupportedMediaType => "unsupported image type",
                ResolveError::TooLarge { .. } => "image is too large",
                ResolveError::Io(_) | ResolveError::ClientSetup(_) => "internal server error",
            },
            Self::Decode(_) => "image could not be decoded",
            Self::Encode(_) | Self::Io(_) | Self::Join(_) => "internal server error",
        }
    }
}

impl IntoResponse for PipelineError {
    fn into_response(self) -> Response {
        (
            self.status(),
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            self.public_message(),
        )
            .into_response()
    }
}

/// The whole request path, shareable across handlers.
#[derive(Clone)]
pub struct Pipeline {
    config: Arc<ServiceConfig>,
    resolver: SourceResolver,
    store: CacheStore,
    responder: ResponseServer,
    backend: Arc<dyn ImageBackend>,
}

impl Pipeline {
    pub fn new(config: ServiceConfig) -> Result<Self, PipelineError> {
        Self::with_backend(config, Arc::new(RustBackend::new()))
    }

    pub fn with_backend(
        config: ServiceConfig,
        backend: Arc<dyn ImageBackend>,
    ) -> Result<Self, PipelineError> {
        let config = Arc::new(config);
        let resolver = SourceResolver::new(Arc::clone(&config))?;
        let store = CacheStore::new(&config.cache.dir, config.cache_ttl());
        let responder = ResponseServer::new(config.cache_ttl());
        Ok(Self {
            config,
            resolver,
            store,
            responder,
            backend,
        })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    /// Turn one request into a response, or a typed failure.
    pub async fn handle(
        &self,
        query: &QueryParams,
        headers: &HeaderMap,
    ) -> Result<Response, PipelineError> {
        let raw = query.source().ok_or(PipelineError::MissingSource)?;
        let source = self.resolver.resolve(raw).await?;

        let key = derive_key(
            source.reference.raw(),
            query,
            &self.config.cache.salt,
            source.media_type,
        );
        let images = &self.config.images;
        let request = RequestParameters::from_query(query, images).thumbnail_request(images);

        let pipeline = self.clone();
        let headers = headers.clone();
        tokio::task::spawn_blocking(move || pipeline.render(source, &key, &request, &headers))
            .await?
    }

    /// Serve from cache, or produce, persist, and serve. Consumes `source`
    /// so its temporary file goes away when this returns.
    fn render(
        &self,
        source: ResolvedSource,
        key: &CacheKey,
        request: &ThumbnailRequest,
        headers: &HeaderMap,
    ) -> Result<Response, PipelineError> {
        if let Lookup::Hit(entry) = self.store.lookup(key) {
            debug!(key = %key, "cache hit");
            return Ok(self.responder.serve(&entry, headers)?);
        }

        debug!(key = %key, width = request.width, height = request.height, "cache miss");
        let thumbnail = create_thumbnail(
            self.backend.as_ref(),
            source.path(),
            source.media_type,
            request,
        )?;

        match self.store.write(key, &thumbnail.bytes) {
            Ok(entry) => Ok(self.responder.serve_written(&entry, thumbnail.bytes)),
            Err(e) => {
                warn!(error = %e, "serving thumbnail without caching it");
                Ok(self.responder.serve_uncached(
                    thumbnail.bytes,
                    source.media_type,
                    &self.store.path_for(key),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::backend::tests::{MockBackend, RecordedOp};
    use crate::test_helpers::{TestDirs, png_bytes, write_test_png};
    use axum::http::HeaderValue;
    use std::time::{Duration, SystemTime};
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn query(s: &str) -> QueryParams {
        QueryParams::parse(s)
    }

    fn cache_files(dirs: &TestDirs) -> Vec<std::path::PathBuf> {
        std::fs::read_dir(dirs.cache())
            .map(|entries| entries.map(|e| e.unwrap().path()).collect())
            .unwrap_or_default()
    }

    async fn body(response: Response) -> Vec<u8> {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec()
    }

    fn with_cat(dirs: &TestDirs) {
        write_test_png(&dirs.docroot().join("img/cat.png"), 400, 300);
    }

    // =========================================================================
    // Miss, hit, conditional
    // =========================================================================

    #[tokio::test]
    async fn miss_renders_and_caches() {
        let dirs = TestDirs::new();
        with_cat(&dirs);
        let backend = Arc::new(MockBackend::with_dimensions(400, 300));
        let pipeline = Pipeline::with_backend(dirs.config(), backend.clone()).unwrap();

        let response = pipeline
            .handle(&query("source=/img/cat.png&width=200&height=0"), &HeaderMap::new())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
        assert_eq!(body(response).await, b"200x150");

        let files = cache_files(&dirs);
        assert_eq!(files.len(), 1);
        assert!(files[0].to_string_lossy().ends_with(".png"));

        let ops = backend.get_operations();
        assert!(matches!(ops[1], RecordedOp::Resize { width: 200, height: 150, .. }));
    }

    #[tokio::test]
    async fn second_request_is_served_from_cache() {
        let dirs = TestDirs::new();
        with_cat(&dirs);
        let backend = Arc::new(MockBackend::with_dimensions(400, 300));
        let pipeline = Pipeline::with_backend(dirs.config(), backend.clone()).unwrap();
        let q = query("source=/img/cat.png&width=200");

        pipeline.handle(&q, &HeaderMap::new()).await.unwrap();
        let response = pipeline.handle(&q, &HeaderMap::new()).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body(response).await, b"200x150");
        // identify + resize from the first request only
        assert_eq!(backend.get_operations().len(), 2);
    }

    #[tokio::test]
    async fn matching_etag_gets_not_modified() {
        let dirs = TestDirs::new();
        with_cat(&dirs);
        let pipeline =
            Pipeline::with_backend(dirs.config(), Arc::new(MockBackend::with_dimensions(400, 300)))
                .unwrap();
        let q = query("source=/img/cat.png&width=200");

        let first = pipeline.handle(&q, &HeaderMap::new()).await.unwrap();
        let etag = first.headers()[header::ETAG].clone();

        let mut headers = HeaderMap::new();
        headers.insert(header::IF_NONE_MATCH, etag.clone());
        let second = pipeline.handle(&q, &headers).await.unwrap();
        assert_eq!(second.status(), StatusCode::NOT_MODIFIED);
        assert_eq!(second.headers()[header::ETAG], etag);
        assert!(body(second).await.is_empty());

        headers.insert(header::IF_NONE_MATCH, HeaderValue::from_static("\"other\""));
        let third = pipeline.handle(&q, &headers).await.unwrap();
        assert_eq!(third.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn extra_parameters_get_their_own_entry() {
        let dirs = TestDirs::new();
        with_cat(&dirs);
        let pipeline =
            Pipeline::with_backend(dirs.config(), Arc::new(MockBackend::with_dimensions(400, 300)))
                .unwrap();

        pipeline
            .handle(&query("source=/img/cat.png&width=200"), &HeaderMap::new())
            .await
            .unwrap();
        pipeline
            .handle(&query("source=/img/cat.png&width=200&v=2"), &HeaderMap::new())
            .await
            .unwrap();
        assert_eq!(cache_files(&dirs).len(), 2);
    }

    #[tokio::test]
    async fn expired_entry_is_rendered_again() {
        let dirs = TestDirs::new();
        with_cat(&dirs);
        let backend = Arc::new(MockBackend::with_dimensions(400, 300));
        let pipeline = Pipeline::with_backend(dirs.config(), backend.clone()).unwrap();
        let q = query("source=/img/cat.png&width=200");

        pipeline.handle(&q, &HeaderMap::new()).await.unwrap();
        let path = cache_files(&dirs).remove(0);
        let file = std::fs::File::options().write(true).open(&path).unwrap();
        file.set_modified(SystemTime::now() - Duration::from_secs(2 * 86_400))
            .unwrap();

        pipeline.handle(&q, &HeaderMap::new()).await.unwrap();
        assert_eq!(backend.get_operations().len(), 4);
        assert_eq!(cache_files(&dirs).len(), 1);
    }

    #[tokio::test]
    async fn cache_write_failure_still_serves() {
        let dirs = TestDirs::new();
        with_cat(&dirs);
        let mut config = dirs.config();
        let blocker = dirs.root().join("blocker");
        std::fs::write(&blocker, b"file").unwrap();
        config.cache.dir = blocker.join("cache");
        let pipeline =
            Pipeline::with_backend(config, Arc::new(MockBackend::with_dimensions(400, 300))).unwrap();

        let response = pipeline
            .handle(&query("source=/img/cat.png&width=40"), &HeaderMap::new())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(header::ETAG));
        assert_eq!(body(response).await, b"40x30");
    }

    // =========================================================================
    // Failures
    // =========================================================================

    #[tokio::test]
    async fn missing_source_is_bad_request() {
        let dirs = TestDirs::new();
        let pipeline = Pipeline::with_backend(dirs.config(), Arc::new(MockBackend::default())).unwrap();

        for q in ["", "width=10", "source="] {
            let err = pipeline.handle(&query(q), &HeaderMap::new()).await.unwrap_err();
            assert!(matches!(err, PipelineError::MissingSource), "{q}");
            assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        }
    }

    #[tokio::test]
    async fn decode_failure_is_bad_request_and_not_cached() {
        let dirs = TestDirs::new();
        with_cat(&dirs);
        let pipeline =
            Pipeline::with_backend(dirs.config(), Arc::new(MockBackend::failing_decode())).unwrap();

        let err = pipeline
            .handle(&query("source=/img/cat.png"), &HeaderMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Decode(_)));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert!(cache_files(&dirs).is_empty());
    }

    #[tokio::test]
    async fn downloaded_payload_removed_after_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(png_bytes(8, 8)))
            .mount(&server)
            .await;

        let dirs = TestDirs::new();
        let mut config = dirs.config();
        config.remote.enabled = true;
        let pipeline =
            Pipeline::with_backend(config, Arc::new(MockBackend::failing_decode())).unwrap();

        let q: QueryParams = [("source", format!("{}/x.png", server.uri()))].into_iter().collect();
        let err = pipeline.handle(&q, &HeaderMap::new()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Decode(_)));
        assert_eq!(std::fs::read_dir(dirs.scratch()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn downloaded_payload_removed_after_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(png_bytes(8, 8)))
            .mount(&server)
            .await;

        let dirs = TestDirs::new();
        let mut config = dirs.config();
        config.remote.enabled = true;
        let pipeline =
            Pipeline::with_backend(config, Arc::new(MockBackend::with_dimensions(8, 8))).unwrap();

        let q: QueryParams = [("source", format!("{}/x.png", server.uri()))].into_iter().collect();
        let response = pipeline.handle(&q, &HeaderMap::new()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(std::fs::read_dir(dirs.scratch()).unwrap().count(), 0);
    }

    #[test]
    fn status_mapping() {
        let cases = [
            (PipelineError::MissingSource, 400),
            (ResolveError::InvalidSource.into(), 400),
            (ResolveError::NotFound.into(), 404),
            (ResolveError::ExternalDisabled.into(), 400),
            (ResolveError::HostNotAllowed.into(), 400),
            (ResolveError::Download("HTTP 500".into()).into(), 400),
            (ResolveError::UnsupportedMediaType.into(), 400),
            (ResolveError::TooLarge { limit: 1 }.into(), 413),
            (PipelineError::Decode("bad".into()), 400),
            (PipelineError::Encode("bad".into()), 500),
            (PipelineError::Io(io::Error::other("disk")), 500),
        ];
        for (err, status) in cases {
            assert_eq!(err.status().as_u16(), status, "{err}");
        }
    }

    #[tokio::test]
    async fn error_body_never_echoes_input() {
        let dirs = TestDirs::new();
        let pipeline = Pipeline::with_backend(dirs.config(), Arc::new(MockBackend::default())).unwrap();
        let q: QueryParams = [("source", "../<script>alert(1)</script>")].into_iter().collect();

        let err = pipeline.handle(&q, &HeaderMap::new()).await.unwrap_err();
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/plain; charset=utf-8"
        );
        let text = String::from_utf8(body(response).await).unwrap();
        assert!(!text.contains("script"));
        assert!(!text.contains(".."));
    }
}

//! HTTP surface.
//!
//! | Route | Handler |
//! |---|---|
//! | `GET /` | Thumbnail: query parameters go straight into the [`Pipeline`] |
//! | `GET /health` | Liveness: `{"status":"healthy","version":"…"}` |

use crate::pipeline::Pipeline;
use crate::params::QueryParams;
use axum::extract::{RawQuery, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use std::io;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Build the router around an already-constructed pipeline.
pub fn build_app(pipeline: Pipeline) -> Router {
    Router::new()
        .route("/", get(thumbnail))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(pipeline)
}

async fn thumbnail(
    State(pipeline): State<Pipeline>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Response {
    let query = QueryParams::parse(query.as_deref().unwrap_or(""));
    match pipeline.handle(&query, &headers).await {
        Ok(response) => response,
        Err(e) => {
            let status = e.status();
            if status.is_server_error() {
                error!(error = %e, "thumbnail request failed");
            } else {
                warn!(error = %e, %status, "thumbnail request rejected");
            }
            e.into_response()
        }
    }
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Bind, then serve until Ctrl-C or SIGTERM.
pub async fn serve(pipeline: Pipeline) -> io::Result<()> {
    pipeline.store().ensure_dir()?;
    let listener = TcpListener::bind(pipeline.config().server.listen.as_str()).await?;
    info!(
        addr = %listener.local_addr()?,
        cache = %pipeline.store().dir().display(),
        remote = pipeline.config().remote.enabled,
        "listening"
    );

    axum::serve(listener, build_app(pipeline))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}

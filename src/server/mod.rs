//! HTTP surface: stream, control endpoints and the viewer page

pub mod identity;

use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{middleware, Extension, Json, Router};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::pipeline::encode::STREAM_CONTENT_TYPE;
use crate::pipeline::LatestFrameBuffer;
use crate::session::StreamSession;
use crate::settings::{SettingsStore, ViewerId, ZoomDirection};
use crate::StreamConfig;

const INDEX_HTML: &str = include_str!("../../assets/index.html");

/// Web server state
#[derive(Clone)]
pub struct AppState {
    pub buffer: Arc<LatestFrameBuffer>,
    pub settings: Arc<SettingsStore>,
    pub stream: StreamConfig,
    /// Flips to `true` when the server is stopping; open streams end on it
    pub shutdown: watch::Receiver<bool>,
}

/// Build the router with viewer identity and request tracing applied
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/stream", get(stream_handler))
        .route("/filter", get(filter_handler))
        .route("/zoom", get(zoom_handler))
        .route("/health", get(health_handler))
        .layer(middleware::from_fn(identity::assign_viewer))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until `signal` resolves, then stop accepting and wait for open
/// connections to finish.
///
/// Stream responses only finish once their sessions see
/// [`AppState::shutdown`], so callers flip it as part of `signal`.
pub async fn serve<F>(listener: TcpListener, state: AppState, signal: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    info!("Starting web server on http://{}", listener.local_addr()?);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(signal)
        .await
}

async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// One session per connection; the response body is the session's output
async fn stream_handler(
    State(state): State<AppState>,
    Extension(viewer): Extension<ViewerId>,
) -> Response {
    let session = StreamSession::new(
        viewer,
        &state.buffer,
        Arc::clone(&state.settings),
        &state.stream,
    )
    .with_shutdown(state.shutdown.clone());
    let (parts, _session) = session.spawn();
    let body = Body::from_stream(parts.into_stream().map(Ok::<_, Infallible>));

    (
        [(CONTENT_TYPE, STREAM_CONTENT_TYPE), (CACHE_CONTROL, "no-cache")],
        body,
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
struct FilterParams {
    #[serde(rename = "type")]
    kind: Option<String>,
}

async fn filter_handler(
    State(state): State<AppState>,
    Extension(viewer): Extension<ViewerId>,
    Query(params): Query<FilterParams>,
) -> String {
    let name = params.kind.as_deref().unwrap_or("none");
    let filter = state.settings.set_filter(&viewer, name);
    format!("Filter applied: {filter}")
}

#[derive(Debug, Deserialize)]
struct ZoomParams {
    direction: Option<String>,
}

async fn zoom_handler(
    State(state): State<AppState>,
    Extension(viewer): Extension<ViewerId>,
    Query(params): Query<ZoomParams>,
) -> String {
    let direction = params.direction.as_deref().unwrap_or("in");
    let settings = match ZoomDirection::parse(direction) {
        Some(direction) => state.settings.adjust_zoom(&viewer, direction),
        None => state.settings.get_or_default(&viewer),
    };
    format!("Zoom level: {:.1}", settings.zoom())
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub frames_published: u64,
    pub frames_overwritten: u64,
    pub viewers: usize,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let stats = state.buffer.stats();
    Json(HealthResponse {
        status: "ok".into(),
        version: env!("CARGO_PKG_VERSION").into(),
        frames_published: stats.frames_published,
        frames_overwritten: stats.frames_overwritten,
        viewers: state.settings.len(),
    })
}

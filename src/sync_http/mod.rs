mod routes;
mod types;

use crate::engine::Tracker;
use crate::error::TrackerError;
use crate::protocol::Envelope;
use crate::AppState;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

/// HTTP status for each error kind. The body is the same envelope either way.
fn status_for(err: &TrackerError) -> StatusCode {
    match err {
        _ if err.is_retryable() => StatusCode::SERVICE_UNAVAILABLE,
        TrackerError::InvalidAction(_) | TrackerError::Parse(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub(crate) fn success_response(data: serde_json::Value) -> Response {
    (StatusCode::OK, Json(Envelope::success(data))).into_response()
}

pub(crate) fn error_response(err: &TrackerError) -> Response {
    (status_for(err), Json(Envelope::error(err.kind(), err.to_string()))).into_response()
}

/// Run a tracker call on the blocking pool. Engines wait on the store lock
/// and do synchronous I/O, which must not stall the async workers.
pub(crate) async fn run_blocking<T, F>(state: &Arc<AppState>, f: F) -> Result<T, TrackerError>
where
    F: FnOnce(&Tracker) -> Result<T, TrackerError> + Send + 'static,
    T: Send + 'static,
{
    let tracker = state.tracker.clone();
    tokio::task::spawn_blocking(move || f(&tracker))
        .await
        .map_err(|e| TrackerError::Internal(format!("Task failed: {e}")))?
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origin = if allowed_origins.is_empty() {
        AllowOrigin::any()
    } else {
        let parsed: Vec<HeaderValue> = allowed_origins
            .iter()
            .filter_map(|o| match o.parse::<HeaderValue>() {
                Ok(v) => Some(v),
                Err(e) => {
                    tracing::warn!(origin = %o, "ignoring invalid CORS origin: {e}");
                    None
                }
            })
            .collect();
        AllowOrigin::list(parsed)
    };
    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
}

/// Build the router (exposed for testing).
///
/// The whole protocol lives on one endpoint with an `action` discriminator;
/// `/exec` is an alias matching the URL shape of script-hosted deployments.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config.allowed_origins);
    // OPTIONS never reaches the handlers: the CORS layer answers it.
    let endpoint = || get(routes::dispatch_get).post(routes::dispatch_post);

    Router::new()
        .route("/", endpoint())
        .route("/exec", endpoint())
        .route("/health", get(routes::health))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Start the HTTP server on the configured address and serve until
/// [`AppState::shutdown`] is called or the process receives Ctrl-C.
pub async fn start_server(state: Arc<AppState>) -> std::io::Result<()> {
    let bind_addr = state.config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    let addr = listener.local_addr()?;
    tracing::info!("tracker API listening on {addr}");
    serve(listener, state).await
}

/// Serve on an already-bound listener (tests bind to port 0).
pub async fn serve(listener: tokio::net::TcpListener, state: Arc<AppState>) -> std::io::Result<()> {
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    *state.server_shutdown.lock() = Some(shutdown_tx);

    let app = build_router(state);
    let result = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::select! {
                _ = shutdown_rx => {}
                _ = tokio::signal::ctrl_c() => {}
            }
        })
        .await;

    tracing::info!("tracker API stopped");
    result
}

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use crate::codec;
use crate::engine::InitOutcome;
use crate::error::TrackerError;
use crate::protocol::*;
use crate::AppState;

use super::types::*;
use super::{error_response, run_blocking, success_response};

pub(super) async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse { ok: true, requests: state.metrics.snapshot() })
}

/// GET dispatch: read-only actions.
pub(super) async fn dispatch_get(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ActionQuery>,
) -> Response {
    state.metrics.reads.fetch_add(1, Ordering::Relaxed);
    let action = q.action.unwrap_or_default();
    let result = match action.as_str() {
        ACTION_PING => Ok(serde_json::json!(PING_REPLY)),
        ACTION_LAST_MODIFIED => run_blocking(&state, |t| t.last_modified())
            .await
            .and_then(|last_modified| to_value(&LastModifiedResponse { last_modified })),
        _ => Err(TrackerError::InvalidAction(action.clone())),
    };
    respond(&state, &action, result)
}

/// POST dispatch: mutating actions. The body is read raw so that clients
/// posting JSON as `text/plain` are accepted and malformed bodies produce a
/// `parse_error` envelope instead of an extractor rejection.
pub(super) async fn dispatch_post(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    state.metrics.writes.fetch_add(1, Ordering::Relaxed);

    let value: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => return respond(&state, "", Err(TrackerError::Parse(e.to_string()))),
    };
    let action = match serde_json::from_value::<ActionEnvelope>(value.clone()) {
        Ok(env) => env.action,
        Err(e) => return respond(&state, "", Err(TrackerError::Parse(e.to_string()))),
    };

    let result = match action.as_str() {
        ACTION_BATCH_UPDATE => batch_update(&state, value).await,
        ACTION_BATCH_NOTES => batch_notes(&state, value).await,
        ACTION_SYNC => return sync(&state, value).await,
        ACTION_INITIALIZE => initialize(&state, value).await,
        _ => Err(TrackerError::InvalidAction(action.clone())),
    };
    respond(&state, &action, result)
}

async fn batch_update(state: &Arc<AppState>, body: serde_json::Value) -> Result<serde_json::Value, TrackerError> {
    let req: BatchUpdateRequest = parse_body(body)?;
    let summary = run_blocking(state, move |t| t.batch_update(&req.operations)).await?;
    to_value(&summary)
}

async fn batch_notes(state: &Arc<AppState>, body: serde_json::Value) -> Result<serde_json::Value, TrackerError> {
    let req: BatchNotesRequest = parse_body(body)?;
    let updated = run_blocking(state, move |t| t.batch_notes(&req.note_updates)).await?;
    to_value(&NotesResponse { success: true, updated })
}

async fn sync(state: &Arc<AppState>, body: serde_json::Value) -> Response {
    let req: SyncRequest = match parse_body(body) {
        Ok(req) => req,
        Err(e) => return respond(state, ACTION_SYNC, Err(e)),
    };
    let compress = req.compress;
    let result = run_blocking(state, move |t| {
        let result = t.sync(&req.queue)?;
        let compressed = compress && t.compression_enabled()?;
        Ok((result, compressed))
    })
    .await;

    match result {
        Ok((result, true)) => {
            let packed = serde_json::to_string(&result)
                .map_err(TrackerError::from)
                .and_then(|json| codec::compress_text(&json).map_err(TrackerError::from));
            match packed {
                Ok(encoded) => (StatusCode::OK, Json(Envelope::compressed(encoded))).into_response(),
                Err(e) => respond(state, ACTION_SYNC, Err(e)),
            }
        }
        Ok((result, false)) => respond(state, ACTION_SYNC, to_value(&result)),
        Err(e) => respond(state, ACTION_SYNC, Err(e)),
    }
}

async fn initialize(state: &Arc<AppState>, body: serde_json::Value) -> Result<serde_json::Value, TrackerError> {
    let req: InitializeRequest = parse_body(body)?;
    let outcome = run_blocking(state, move |t| t.initialize(&req.init_data)).await?;
    let message = match outcome {
        InitOutcome::Initialized { keys, notes } => {
            format!("Initialized with {keys} entries and {notes} notes")
        }
        InitOutcome::AlreadyInitialized => ALREADY_INITIALIZED.to_string(),
    };
    to_value(&MessageResponse { message })
}

fn parse_body<T: DeserializeOwned>(body: serde_json::Value) -> Result<T, TrackerError> {
    serde_json::from_value(body).map_err(|e| TrackerError::Parse(e.to_string()))
}

fn to_value<T: serde::Serialize>(value: &T) -> Result<serde_json::Value, TrackerError> {
    serde_json::to_value(value).map_err(TrackerError::from)
}

fn respond(state: &AppState, action: &str, result: Result<serde_json::Value, TrackerError>) -> Response {
    match result {
        Ok(data) => success_response(data),
        Err(e) => {
            state.metrics.errors.fetch_add(1, Ordering::Relaxed);
            match e.kind() {
                "generic_internal" => tracing::error!(action, "request failed: {e}"),
                _ => tracing::warn!(action, kind = e.kind(), "request rejected: {e}"),
            }
            error_response(&e)
        }
    }
}

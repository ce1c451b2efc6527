//! Wire types shared by the tracker server and its clients.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::notes::{NoteUpdate, NotesMap};
use crate::tags::Operation;

pub const ACTION_PING: &str = "ping";
pub const ACTION_LAST_MODIFIED: &str = "get_last_modified";
pub const ACTION_BATCH_UPDATE: &str = "batch_update";
pub const ACTION_BATCH_NOTES: &str = "batch_notes";
pub const ACTION_SYNC: &str = "sync";
pub const ACTION_INITIALIZE: &str = "initialize";

pub const PING_REPLY: &str = "Connection established!";
pub const ALREADY_INITIALIZED: &str = "Already initialized";

/// Key inside `initData` that carries the client's notes map.
pub const INIT_NOTES_KEY: &str = "FT_userNotes";

/// Edits accumulated client-side and flushed as one `sync` request.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncQueue {
    #[serde(default)]
    pub operations: Vec<Operation>,
    #[serde(default)]
    pub notes: Vec<NoteUpdate>,
}

impl SyncQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_operation(&mut self, op: Operation) {
        self.operations.push(op);
    }

    pub fn push_note(&mut self, update: NoteUpdate) {
        self.notes.push(update);
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty() && self.notes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.operations.len() + self.notes.len()
    }

    /// Move everything out, leaving the queue empty.
    pub fn take(&mut self) -> SyncQueue {
        std::mem::take(self)
    }

    /// Put a failed flush back in front of anything queued since.
    pub fn restore(&mut self, mut failed: SyncQueue) {
        failed.operations.append(&mut self.operations);
        failed.notes.append(&mut self.notes);
        *self = failed;
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateSummary {
    pub updated: usize,
    pub operations_processed: usize,
}

/// Full state returned by `sync`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResult {
    pub success: bool,
    pub update_results: UpdateSummary,
    #[serde(default)]
    pub notes_updated: usize,
    pub status_data: BTreeMap<String, String>,
    pub notes: NotesMap,
}

// --- Requests ---

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BatchUpdateRequest {
    pub operations: Vec<Operation>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BatchNotesRequest {
    #[serde(rename = "noteUpdates")]
    pub note_updates: Vec<NoteUpdate>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SyncRequest {
    pub queue: SyncQueue,
    /// Ask for a gzip+base64 payload; honoured only when compression is enabled server-side.
    #[serde(default)]
    pub compress: bool,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct InitializeRequest {
    #[serde(rename = "initData", default)]
    pub init_data: Map<String, Value>,
}

/// Wrap a request body with its `action` discriminator.
pub fn with_action<T: Serialize>(action: &str, body: &T) -> Result<Value, serde_json::Error> {
    let mut value = serde_json::to_value(body)?;
    if let Value::Object(map) = &mut value {
        map.insert("action".to_string(), Value::String(action.to_string()));
    }
    Ok(value)
}

// --- Responses ---

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Error,
}

/// Uniform response body for every action.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub status: ResponseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// `data` is a gzip+base64 string of the JSON payload.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub compressed: bool,
    pub timestamp: String,
}

impl Envelope {
    pub fn success(data: Value) -> Self {
        Self {
            status: ResponseStatus::Success,
            data: Some(data),
            message: None,
            kind: None,
            compressed: false,
            timestamp: now_timestamp(),
        }
    }

    pub fn compressed(encoded: String) -> Self {
        Self { compressed: true, ..Self::success(Value::String(encoded)) }
    }

    pub fn error(kind: &str, message: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Error,
            data: None,
            message: Some(message.into()),
            kind: Some(kind.to_string()),
            compressed: false,
            timestamp: now_timestamp(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }
}

pub(crate) fn now_timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

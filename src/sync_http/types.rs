use serde::{Deserialize, Serialize};

// --- Request/Response types ---

#[derive(Serialize)]
pub(super) struct HealthResponse {
    pub ok: bool,
    pub requests: serde_json::Value,
}

#[derive(Deserialize)]
pub(super) struct ActionQuery {
    #[serde(default)]
    pub action: Option<String>,
}

/// Only the discriminator; the rest of the body is parsed per action.
#[derive(Deserialize)]
pub(super) struct ActionEnvelope {
    pub action: String,
}

#[derive(Serialize)]
pub(super) struct LastModifiedResponse {
    pub last_modified: Option<String>,
}

#[derive(Serialize)]
pub(super) struct NotesResponse {
    pub success: bool,
    pub updated: usize,
}

#[derive(Serialize)]
pub(super) struct MessageResponse {
    pub message: String,
}

use std::collections::BTreeMap;

use crate::notes::{self, NoteUpdate, NotesMap};
use crate::protocol::SyncResult;
use crate::tags::{Operation, TagSet};

/// Client-side copy of the server state.
///
/// Local edits are applied optimistically; a sync result replaces the whole
/// snapshot since the server is authoritative.
#[derive(Clone, Debug, Default)]
pub struct LocalMirror {
    status: BTreeMap<String, String>,
    notes: NotesMap,
    last_modified: Option<String>,
}

impl LocalMirror {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_modified(&self) -> Option<&str> {
        self.last_modified.as_deref()
    }

    pub fn tags(&self, key: &str) -> Vec<String> {
        self.status
            .get(key)
            .map(|joined| TagSet::parse(joined).iter().map(str::to_string).collect())
            .unwrap_or_default()
    }

    pub fn status(&self) -> &BTreeMap<String, String> {
        &self.status
    }

    pub fn notes(&self) -> &NotesMap {
        &self.notes
    }

    /// Apply an edit locally before it reaches the server.
    pub fn apply_operation(&mut self, op: &Operation) {
        let mut current = self.status.get(&op.key).map(|j| TagSet::parse(j)).unwrap_or_default();
        if !op.apply(&mut current) {
            return;
        }
        if current.is_empty() {
            self.status.remove(&op.key);
        } else {
            self.status.insert(op.key.clone(), current.to_joined());
        }
    }

    pub fn apply_note(&mut self, update: &NoteUpdate) {
        notes::apply_updates(&mut self.notes, std::slice::from_ref(update));
    }

    /// Replace the snapshot with server state.
    pub fn reconcile(&mut self, result: SyncResult, last_modified: Option<String>) {
        let dropped = self
            .status
            .keys()
            .filter(|k| !result.status_data.contains_key(*k))
            .count();
        if dropped > 0 {
            tracing::debug!(dropped, "reconcile discarded local-only entries");
        }
        self.status = result.status_data;
        self.notes = result.notes;
        self.last_modified = last_modified;
    }
}

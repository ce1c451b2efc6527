//! Per-fanfic notes and their chunked JSON storage.
//!
//! The whole notes map is rewritten on every batch: all chunks are merged,
//! updates applied, and the map re-split into rows no larger than the chunk
//! limit. Cost is O(total notes) per write, which is fine for a personal
//! tracker but would need incremental storage for large volumes.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

use crate::error::Result;

/// Maximum serialized size of one notes chunk row, in bytes of JSON.
/// Stays under the 50k per-cell ceiling of spreadsheet backends.
pub const DEFAULT_MAX_CHUNK_BYTES: usize = 45_000;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub text: String,
    #[serde(default)]
    pub date: String,
}

/// Notes keyed by fanfic id. Sorted so chunk boundaries are deterministic.
pub type NotesMap = BTreeMap<String, Note>;

/// Client-side note edit. Missing or empty `text` deletes the note.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteUpdate {
    #[serde(deserialize_with = "string_or_number")]
    pub fanfic_id: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
}

impl NoteUpdate {
    pub fn upsert(fanfic_id: impl Into<String>, text: impl Into<String>, date: impl Into<String>) -> Self {
        Self {
            fanfic_id: fanfic_id.into(),
            text: Some(text.into()),
            date: Some(date.into()),
        }
    }

    pub fn delete(fanfic_id: impl Into<String>) -> Self {
        Self { fanfic_id: fanfic_id.into(), text: None, date: None }
    }

    fn is_delete(&self) -> bool {
        self.text.as_deref().is_none_or(|t| t.trim().is_empty())
    }
}

/// Ids arrive as strings from most clients but as bare numbers from some.
fn string_or_number<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Str(String),
        Num(serde_json::Number),
    }
    Ok(match Id::deserialize(d)? {
        Id::Str(s) => s,
        Id::Num(n) => n.to_string(),
    })
}

/// Merge stored chunks into one map. Later chunks win on duplicate ids;
/// unreadable chunks are skipped with a warning rather than failing the read.
pub fn merge_chunks(chunks: &[String]) -> NotesMap {
    let mut map = NotesMap::new();
    for (i, chunk) in chunks.iter().enumerate() {
        if chunk.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<NotesMap>(chunk) {
            Ok(part) => map.extend(part),
            Err(e) => tracing::warn!(chunk = i, "notes: skipping unreadable chunk: {e}"),
        }
    }
    map
}

/// Apply updates in order. Returns how many entries changed.
pub fn apply_updates(map: &mut NotesMap, updates: &[NoteUpdate]) -> usize {
    let mut changed = 0;
    for update in updates {
        if update.fanfic_id.trim().is_empty() {
            tracing::warn!("notes: skipping update without fanficId");
            continue;
        }
        if update.is_delete() {
            if map.remove(&update.fanfic_id).is_some() {
                changed += 1;
            }
            continue;
        }
        let note = Note {
            text: update.text.clone().unwrap_or_default(),
            date: update.date.clone().unwrap_or_default(),
        };
        if map.get(&update.fanfic_id) != Some(&note) {
            map.insert(update.fanfic_id.clone(), note);
            changed += 1;
        }
    }
    changed
}

/// Split the map into JSON object strings each at most `max_bytes` long.
/// A single note larger than the limit gets a chunk of its own.
pub fn split_into_chunks(map: &NotesMap, max_bytes: usize) -> Result<Vec<String>> {
    let mut chunks = Vec::new();
    let mut current = NotesMap::new();
    // "{}" plus entries and separating commas
    let mut current_len = 2;

    for (id, note) in map {
        let entry_len = serde_json::to_string(id)?.len() + 1 + serde_json::to_string(note)?.len();
        let added = entry_len + usize::from(!current.is_empty());

        if !current.is_empty() && current_len + added > max_bytes {
            chunks.push(serde_json::to_string(&current)?);
            current.clear();
            current_len = 2;
        }
        if current.is_empty() && entry_len + 2 > max_bytes {
            tracing::warn!(fanfic_id = %id, bytes = entry_len, "notes: single note exceeds chunk limit");
        }

        current_len += entry_len + usize::from(!current.is_empty());
        current.insert(id.clone(), note.clone());
    }
    if !current.is_empty() {
        chunks.push(serde_json::to_string(&current)?);
    }
    Ok(chunks)
}

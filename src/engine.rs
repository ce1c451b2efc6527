//! Batch engines for the tracker store.
//!
//! Every mutating entry point follows the same discipline: take the store
//! lock with a bounded wait, fold the batch over a working copy, write the
//! result, flush, bump `last_modified`, invalidate the read caches and only
//! then let the guard drop. Reads go through the TTL cache and never take the
//! lock.

use chrono::{DateTime, Duration as ChronoDuration, SecondsFormat, Utc};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{SETTINGS_KEY, SETTINGS_TTL, STATUS_TABLE_KEY, STATUS_TABLE_TTL, TtlCache};
use crate::codec;
use crate::error::{Result, TrackerError};
use crate::lock::{DEFAULT_LOCK_WAIT, StoreLock, StoreLockGuard};
use crate::notes::{self, DEFAULT_MAX_CHUNK_BYTES, Note, NoteUpdate, NotesMap};
use crate::protocol::{INIT_NOTES_KEY, SyncQueue, SyncResult, UpdateSummary};
use crate::store::{
    SETTING_COMPRESSION, SETTING_CONNECTED, SETTING_LAST_MODIFIED, StatusRow, TrackerStore,
};
use crate::tags::{Operation, OperationAction, OperationValue, TagSet};

#[derive(Clone, Debug)]
pub struct TrackerOptions {
    pub lock_wait: Duration,
    pub note_chunk_max: usize,
    pub status_ttl: Duration,
    pub settings_ttl: Duration,
}

impl Default for TrackerOptions {
    fn default() -> Self {
        Self {
            lock_wait: DEFAULT_LOCK_WAIT,
            note_chunk_max: DEFAULT_MAX_CHUNK_BYTES,
            status_ttl: STATUS_TABLE_TTL,
            settings_ttl: SETTINGS_TTL,
        }
    }
}

/// Result of an `initialize` call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InitOutcome {
    Initialized { keys: usize, notes: usize },
    AlreadyInitialized,
}

pub struct Tracker {
    store: Arc<dyn TrackerStore>,
    lock: StoreLock,
    cache: TtlCache,
    /// Bumped on every invalidation; a read that raced a commit is not cached.
    generation: Mutex<u64>,
    options: TrackerOptions,
}

/// Serialized writes of one batch. Built completely before the store is
/// touched so a codec or JSON failure aborts with nothing written.
#[derive(Default)]
struct PendingWrites {
    updates: Vec<(usize, String)>,
    appends: Vec<(String, String)>,
    note_chunks: Option<Vec<String>>,
    settings: Vec<(&'static str, &'static str)>,
}

impl PendingWrites {
    fn status_rows_written(&self) -> usize {
        self.updates.len() + self.appends.len()
    }

    fn is_empty(&self) -> bool {
        self.status_rows_written() == 0 && self.note_chunks.is_none() && self.settings.is_empty()
    }
}

/// Drops the read caches on every exit from a write sequence that did not
/// reach the commit, including unwinding.
struct DirtyScope<'t, 'g, 'l> {
    tracker: &'t Tracker,
    guard: &'g StoreLockGuard<'l>,
    committed: bool,
}

impl Drop for DirtyScope<'_, '_, '_> {
    fn drop(&mut self) {
        if !self.committed {
            tracing::warn!("batch write failed; dropping cached snapshots");
            self.tracker.invalidate_caches(self.guard);
        }
    }
}

impl Tracker {
    pub fn new(store: Arc<dyn TrackerStore>, options: TrackerOptions) -> Self {
        Self {
            store,
            lock: StoreLock::new(),
            cache: TtlCache::new(options.status_ttl),
            generation: Mutex::new(0),
            options,
        }
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    fn cached_read<T, F>(&self, key: &str, ttl: Duration, load: F) -> Result<T>
    where
        T: serde::Serialize + serde::de::DeserializeOwned,
        F: FnOnce() -> Result<T>,
    {
        if let Some(cached) = self.cache.get(key) {
            return Ok(cached);
        }
        let started_at = *self.generation.lock();
        let value = load()?;
        let generation = self.generation.lock();
        if *generation == started_at {
            self.cache.set(key, &value, Some(ttl));
        }
        Ok(value)
    }

    /// Settings map, cached.
    pub fn settings(&self) -> Result<HashMap<String, String>> {
        self.cached_read(SETTINGS_KEY, self.options.settings_ttl, || self.store.read_settings())
    }

    pub fn last_modified(&self) -> Result<Option<String>> {
        Ok(self
            .settings()?
            .remove(SETTING_LAST_MODIFIED)
            .filter(|v| !v.trim().is_empty()))
    }

    pub fn compression_enabled(&self) -> Result<bool> {
        Ok(self.settings()?.get(SETTING_COMPRESSION).is_some_and(|v| is_truthy(v)))
    }

    /// Full status table, cached.
    fn status_rows(&self) -> Result<Vec<StatusRow>> {
        self.cached_read(STATUS_TABLE_KEY, self.options.status_ttl, || {
            self.store.read_status_rows()
        })
    }

    /// Decoded key → comma-joined tags. Blank rows are omitted.
    pub fn status_map(&self) -> Result<BTreeMap<String, String>> {
        let mut map = BTreeMap::new();
        for row in self.status_rows()? {
            let joined = TagSet::parse(&decode_stored(&row.value)).to_joined();
            if !joined.is_empty() {
                map.entry(row.key).or_insert(joined);
            }
        }
        Ok(map)
    }

    pub fn tags_for(&self, key: &str) -> Result<TagSet> {
        Ok(self
            .status_map()?
            .get(key)
            .map(|joined| TagSet::parse(joined))
            .unwrap_or_default())
    }

    pub fn notes(&self) -> Result<NotesMap> {
        Ok(notes::merge_chunks(&self.store.read_note_chunks()?))
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    pub fn batch_update(&self, operations: &[Operation]) -> Result<UpdateSummary> {
        let guard = self.lock.acquire(self.options.lock_wait)?;
        let mut pending = PendingWrites::default();
        let processed = self.plan_operations(&guard, operations, &mut pending)?;
        let summary = UpdateSummary {
            updated: pending.status_rows_written(),
            operations_processed: processed,
        };
        if !pending.is_empty() {
            self.write_and_commit(&guard, &pending)?;
        }
        tracing::info!(
            updated = summary.updated,
            processed = summary.operations_processed,
            "batch_update applied"
        );
        Ok(summary)
    }

    pub fn batch_notes(&self, updates: &[NoteUpdate]) -> Result<usize> {
        let guard = self.lock.acquire(self.options.lock_wait)?;
        let mut pending = PendingWrites::default();
        let changed = self.plan_notes(&guard, updates, &mut pending)?;
        self.write_and_commit(&guard, &pending)?;
        tracing::info!(updates = updates.len(), changed, "batch_notes applied");
        Ok(changed)
    }

    /// Apply a client queue under one lock acquisition and return the full
    /// resulting state. Tags and notes are written together or the whole
    /// queue fails.
    pub fn sync(&self, queue: &SyncQueue) -> Result<SyncResult> {
        let mut update_results = UpdateSummary::default();
        let mut notes_updated = 0;

        if !queue.is_empty() {
            let guard = self.lock.acquire(self.options.lock_wait)?;
            let mut pending = PendingWrites::default();
            if !queue.operations.is_empty() {
                update_results.operations_processed =
                    self.plan_operations(&guard, &queue.operations, &mut pending)?;
                update_results.updated = pending.status_rows_written();
            }
            if !queue.notes.is_empty() {
                notes_updated = self.plan_notes(&guard, &queue.notes, &mut pending)?;
            }
            if !pending.is_empty() {
                self.write_and_commit(&guard, &pending)?;
            }
        }

        tracing::info!(
            operations = queue.operations.len(),
            notes = queue.notes.len(),
            "sync applied"
        );
        Ok(SyncResult {
            success: true,
            update_results,
            notes_updated,
            status_data: self.status_map()?,
            notes: self.notes()?,
        })
    }

    /// One-shot seeding of the store. A store that already has a
    /// last-modified stamp or the connected flag is left untouched.
    pub fn initialize(&self, init_data: &Map<String, Value>) -> Result<InitOutcome> {
        let guard = self.lock.acquire(self.options.lock_wait)?;

        let settings = self.store.read_settings()?;
        let stamped = settings
            .get(SETTING_LAST_MODIFIED)
            .is_some_and(|v| !v.trim().is_empty());
        let connected = settings.get(SETTING_CONNECTED).is_some_and(|v| is_truthy(v));
        if stamped || connected {
            tracing::info!("initialize skipped: store already initialized");
            return Ok(InitOutcome::AlreadyInitialized);
        }

        let mut operations = Vec::new();
        let mut seeded_notes = NotesMap::new();
        for (key, value) in init_data {
            if key == INIT_NOTES_KEY {
                seeded_notes = parse_init_notes(value)?;
                continue;
            }
            match init_value_tags(value) {
                Some(tags) => operations.push(Operation::set(key.clone(), OperationValue::Many(tags))),
                None => tracing::warn!(key = %key, "initialize: ignoring non-tag value"),
            }
        }

        let mut pending = PendingWrites::default();
        self.plan_operations(&guard, &operations, &mut pending)?;
        if !seeded_notes.is_empty() {
            pending.note_chunks =
                Some(notes::split_into_chunks(&seeded_notes, self.options.note_chunk_max)?);
        }
        pending.settings.push((SETTING_CONNECTED, "true"));
        let keys = pending.status_rows_written();
        self.write_and_commit(&guard, &pending)?;

        tracing::info!(keys, notes = seeded_notes.len(), "store initialized");
        Ok(InitOutcome::Initialized { keys, notes: seeded_notes.len() })
    }

    pub fn set_compression(&self, enabled: bool) -> Result<()> {
        let guard = self.lock.acquire(self.options.lock_wait)?;
        let result = self
            .store
            .write_setting(SETTING_COMPRESSION, if enabled { "true" } else { "false" })
            .and_then(|()| self.store.flush());
        self.invalidate_caches(&guard);
        result
    }

    // -----------------------------------------------------------------------
    // Locked internals
    // -----------------------------------------------------------------------

    /// Fold `operations` over the cached table and queue the serialized rows.
    /// Returns how many operations were applied.
    fn plan_operations(
        &self,
        _guard: &StoreLockGuard<'_>,
        operations: &[Operation],
        pending: &mut PendingWrites,
    ) -> Result<usize> {
        let rows = self.status_rows()?;
        let mut existing: HashMap<&str, &StatusRow> = HashMap::new();
        for row in &rows {
            existing.entry(row.key.as_str()).or_insert(row);
        }

        // Working copy, in first-touch order so appends are deterministic.
        let mut touched: Vec<String> = Vec::new();
        let mut working: HashMap<String, TagSet> = HashMap::new();
        let mut processed = 0;

        for op in operations {
            if op.key.trim().is_empty() {
                tracing::warn!("batch_update: skipping operation without key");
                continue;
            }
            if op.action == OperationAction::Unknown {
                tracing::warn!(key = %op.key, "batch_update: skipping unknown action");
                continue;
            }
            let current = working.entry(op.key.clone()).or_insert_with(|| {
                touched.push(op.key.clone());
                existing
                    .get(op.key.as_str())
                    .map(|row| TagSet::parse(&decode_stored(&row.value)))
                    .unwrap_or_default()
            });
            op.apply(current);
            processed += 1;
        }

        let compress = self.compression_enabled()?;
        for key in &touched {
            let joined = working[key].to_joined();
            let stored = if compress && !joined.is_empty() {
                codec::compress_tags(&joined)?
            } else {
                joined
            };
            match existing.get(key.as_str()) {
                Some(row) => pending.updates.push((row.row, stored)),
                None if !stored.is_empty() => pending.appends.push((key.clone(), stored)),
                None => {}
            }
        }
        Ok(processed)
    }

    /// Merge `updates` into the stored notes and queue the re-chunked map.
    /// Returns how many notes changed.
    fn plan_notes(
        &self,
        _guard: &StoreLockGuard<'_>,
        updates: &[NoteUpdate],
        pending: &mut PendingWrites,
    ) -> Result<usize> {
        let mut map = notes::merge_chunks(&self.store.read_note_chunks()?);
        let changed = notes::apply_updates(&mut map, updates);
        pending.note_chunks = Some(notes::split_into_chunks(&map, self.options.note_chunk_max)?);
        Ok(changed)
    }

    /// Write everything queued, then flush, stamp and invalidate. If any step
    /// fails after the first write the read caches are dropped anyway, so the
    /// next batch plans against what the store really holds.
    fn write_and_commit(&self, guard: &StoreLockGuard<'_>, pending: &PendingWrites) -> Result<()> {
        let mut scope = DirtyScope { tracker: self, guard, committed: false };

        if !pending.updates.is_empty() {
            self.store.update_status_rows(&pending.updates)?;
        }
        if !pending.appends.is_empty() {
            self.store.append_status_rows(&pending.appends)?;
        }
        if let Some(chunks) = &pending.note_chunks {
            self.store.replace_note_chunks(chunks)?;
        }
        for (key, value) in &pending.settings {
            self.store.write_setting(key, value)?;
        }

        self.store.flush()?;
        let previous = self.store.read_settings()?.remove(SETTING_LAST_MODIFIED);
        let stamp = next_timestamp(previous.as_deref(), Utc::now());
        self.store.write_setting(SETTING_LAST_MODIFIED, &stamp)?;
        self.store.flush()?;

        self.invalidate_caches(guard);
        scope.committed = true;
        Ok(())
    }

    fn invalidate_caches(&self, _guard: &StoreLockGuard<'_>) {
        let mut generation = self.generation.lock();
        *generation += 1;
        self.cache.invalidate(STATUS_TABLE_KEY);
        self.cache.invalidate(SETTINGS_KEY);
    }

    #[cfg(test)]
    pub(crate) fn lock(&self) -> &StoreLock {
        &self.lock
    }
}

/// Stored values may be compressed; anything that does not decode is taken
/// literally.
fn decode_stored(value: &str) -> String {
    codec::decompress_tags(value).unwrap_or_else(|_| value.to_string())
}

fn is_truthy(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes")
}

/// Strictly increasing RFC 3339 stamp: `max(now, previous + 1ms)`.
fn next_timestamp(previous: Option<&str>, now: DateTime<Utc>) -> String {
    let floor = previous
        .and_then(|p| DateTime::parse_from_rfc3339(p).ok())
        .map(|p| p.with_timezone(&Utc) + ChronoDuration::milliseconds(1));
    let stamp = match floor {
        Some(floor) if floor > now => floor,
        _ => now,
    };
    stamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn init_value_tags(value: &Value) -> Option<Vec<String>> {
    match value {
        Value::String(s) => Some(vec![s.clone()]),
        Value::Number(n) => Some(vec![n.to_string()]),
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(|item| match item {
                    Value::String(s) => Some(s.clone()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .collect(),
        ),
        _ => None,
    }
}

/// `FT_userNotes` arrives either as an object or as its JSON string form;
/// entries may be full notes or bare text.
fn parse_init_notes(value: &Value) -> Result<NotesMap> {
    let parsed;
    let object = match value {
        Value::Object(map) => map,
        Value::String(s) if s.trim().is_empty() => return Ok(NotesMap::new()),
        Value::String(s) => {
            parsed = serde_json::from_str::<Value>(s)
                .map_err(|e| TrackerError::Parse(format!("{INIT_NOTES_KEY}: {e}")))?;
            match &parsed {
                Value::Object(map) => map,
                _ => return Err(TrackerError::Parse(format!("{INIT_NOTES_KEY} must be an object"))),
            }
        }
        Value::Null => return Ok(NotesMap::new()),
        _ => return Err(TrackerError::Parse(format!("{INIT_NOTES_KEY} must be an object"))),
    };

    let mut map = NotesMap::new();
    for (id, entry) in object {
        let note = match entry {
            Value::String(text) => Note { text: text.clone(), date: String::new() },
            other => serde_json::from_value::<Note>(other.clone())
                .map_err(|e| TrackerError::Parse(format!("{INIT_NOTES_KEY}.{id}: {e}")))?,
        };
        if !note.text.trim().is_empty() {
            map.insert(id.clone(), note);
        }
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, SqliteStore};
    use serde_json::json;

    fn tracker() -> Tracker {
        Tracker::new(Arc::new(MemoryStore::new()), TrackerOptions::default())
    }

    fn init(t: &Tracker, data: Value) -> InitOutcome {
        t.initialize(data.as_object().unwrap()).unwrap()
    }

    #[test]
    fn initialize_then_add_appends_tag() {
        let t = tracker();
        init(&t, json!({"work_123": "1,2,3"}));
        let summary = t.batch_update(&[Operation::add("work_123", "4")]).unwrap();
        assert_eq!(summary, UpdateSummary { updated: 1, operations_processed: 1 });
        assert_eq!(t.status_map().unwrap()["work_123"], "1,2,3,4");
    }

    #[test]
    fn operations_on_same_key_fold_in_order() {
        let t = tracker();
        t.batch_update(&[
            Operation::set("w", "1,2"),
            Operation::add("w", "3"),
            Operation::remove("w", "1"),
            Operation::add("w", "1"),
        ])
        .unwrap();
        assert_eq!(t.status_map().unwrap()["w"], "2,3,1");
    }

    #[test]
    fn set_on_empty_store_matches_adds() {
        let a = tracker();
        a.batch_update(&[Operation::set("k", vec!["3".to_string(), "1".to_string()])]).unwrap();
        let b = tracker();
        b.batch_update(&[Operation::add("k", "3"), Operation::add("k", "1")]).unwrap();
        assert_eq!(a.status_map().unwrap(), b.status_map().unwrap());
    }

    #[test]
    fn add_then_remove_leaves_no_entry() {
        let t = tracker();
        let summary = t
            .batch_update(&[Operation::add("w", "5"), Operation::remove("w", "5")])
            .unwrap();
        assert_eq!(summary.updated, 0);
        assert!(t.status_map().unwrap().is_empty());
        assert!(t.store.read_status_rows().unwrap().is_empty());
    }

    #[test]
    fn emptied_existing_key_disappears_from_reads() {
        let t = tracker();
        t.batch_update(&[Operation::set("w", "1")]).unwrap();
        t.batch_update(&[Operation::remove("w", "1")]).unwrap();
        assert!(!t.status_map().unwrap().contains_key("w"));
    }

    #[test]
    fn unknown_actions_and_empty_keys_are_skipped() {
        let t = tracker();
        let ops: Vec<Operation> = serde_json::from_value(json!([
            {"action": "explode", "key": "w", "value": "1"},
            {"action": "add", "key": "", "value": "1"},
            {"action": "add", "key": "w", "value": "2"}
        ]))
        .unwrap();
        let summary = t.batch_update(&ops).unwrap();
        assert_eq!(summary.operations_processed, 1);
        assert_eq!(t.status_map().unwrap()["w"], "2");
    }

    #[test]
    fn existing_keys_update_in_place_new_keys_append() {
        let t = tracker();
        t.batch_update(&[Operation::set("a", "1"), Operation::set("b", "2")]).unwrap();
        t.batch_update(&[Operation::add("b", "3"), Operation::set("c", "4")]).unwrap();
        let rows = t.store.read_status_rows().unwrap();
        let keys: Vec<_> = rows.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
        assert_eq!(rows[1].value, "2,3");
    }

    #[test]
    fn last_modified_strictly_increases() {
        let t = tracker();
        assert_eq!(t.last_modified().unwrap(), None);
        t.batch_update(&[Operation::add("w", "1")]).unwrap();
        let first = t.last_modified().unwrap().unwrap();
        t.batch_update(&[Operation::add("w", "2")]).unwrap();
        let second = t.last_modified().unwrap().unwrap();
        t.batch_notes(&[NoteUpdate::upsert("1", "n", "d")]).unwrap();
        let third = t.last_modified().unwrap().unwrap();
        assert!(second > first, "{second} <= {first}");
        assert!(third > second, "{third} <= {second}");
    }

    #[test]
    fn next_timestamp_never_goes_backwards() {
        let now = Utc::now();
        let future = (now + ChronoDuration::seconds(10)).to_rfc3339_opts(SecondsFormat::Millis, true);
        let next = next_timestamp(Some(&future), now);
        assert!(next > future);
        assert_eq!(
            next_timestamp(None, now),
            now.to_rfc3339_opts(SecondsFormat::Millis, true)
        );
        // garbage previous value falls back to now
        assert_eq!(
            next_timestamp(Some("yesterday"), now),
            now.to_rfc3339_opts(SecondsFormat::Millis, true)
        );
    }

    #[test]
    fn notes_upsert_then_delete() {
        let t = tracker();
        t.batch_notes(&[NoteUpdate::upsert("55", "great fic", "2024-01-01")]).unwrap();
        assert_eq!(t.notes().unwrap()["55"].text, "great fic");
        t.batch_notes(&[NoteUpdate::upsert("55", "", "2024-01-02")]).unwrap();
        assert!(!t.notes().unwrap().contains_key("55"));
    }

    #[test]
    fn notes_are_rechunked_under_limit() {
        let options = TrackerOptions { note_chunk_max: 200, ..TrackerOptions::default() };
        let t = Tracker::new(Arc::new(MemoryStore::new()), options);
        let updates: Vec<_> = (0..20)
            .map(|i| NoteUpdate::upsert(i.to_string(), "some note text", "2024-01-01"))
            .collect();
        t.batch_notes(&updates).unwrap();
        let chunks = t.store.read_note_chunks().unwrap();
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.len() <= 200));
        assert_eq!(t.notes().unwrap().len(), 20);
    }

    #[test]
    fn initialize_twice_reports_already_initialized() {
        let t = tracker();
        assert_eq!(
            init(&t, json!({"work_1": "1"})),
            InitOutcome::Initialized { keys: 1, notes: 0 }
        );
        let stamp = t.last_modified().unwrap();
        assert!(stamp.is_some());

        assert_eq!(init(&t, json!({"work_2": "2"})), InitOutcome::AlreadyInitialized);
        assert_eq!(t.last_modified().unwrap(), stamp);
        assert!(!t.status_map().unwrap().contains_key("work_2"));
    }

    #[test]
    fn initialize_skipped_when_connected_flag_set() {
        let t = tracker();
        t.store.write_setting(SETTING_CONNECTED, "true").unwrap();
        assert_eq!(init(&t, json!({"w": "1"})), InitOutcome::AlreadyInitialized);
        assert_eq!(t.last_modified().unwrap(), None);
    }

    #[test]
    fn initialize_seeds_notes_from_string_or_object() {
        let t = tracker();
        init(
            &t,
            json!({
                "work_1": ["1", 2],
                "FT_userNotes": "{\"9\":{\"text\":\"loved it\",\"date\":\"2024-02-02\"},\"10\":\"bare\"}"
            }),
        );
        assert_eq!(t.status_map().unwrap()["work_1"], "1,2");
        let notes = t.notes().unwrap();
        assert_eq!(notes["9"].date, "2024-02-02");
        assert_eq!(notes["10"].text, "bare");
        assert_eq!(t.settings().unwrap()[SETTING_CONNECTED], "true");
    }

    #[test]
    fn initialize_rejects_malformed_notes() {
        let t = tracker();
        let err = t
            .initialize(json!({"FT_userNotes": "{not json"}).as_object().unwrap())
            .unwrap_err();
        assert_eq!(err.kind(), "parse_error");
        assert_eq!(t.last_modified().unwrap(), None);
    }

    #[test]
    fn compressed_storage_round_trips() {
        let t = tracker();
        t.set_compression(true).unwrap();
        t.batch_update(&[Operation::set("w", "10,20,30")]).unwrap();
        let raw = &t.store.read_status_rows().unwrap()[0].value;
        assert_ne!(raw, "10,20,30");
        assert_eq!(codec::decompress_tags(raw).unwrap(), "10,20,30");
        assert_eq!(t.status_map().unwrap()["w"], "10,20,30");

        t.batch_update(&[Operation::add("w", "40")]).unwrap();
        assert_eq!(t.tags_for("w").unwrap().to_joined(), "10,20,30,40");
    }

    #[test]
    fn compression_rejects_non_numeric_batch_without_writing() {
        let t = tracker();
        t.set_compression(true).unwrap();
        t.batch_update(&[Operation::set("w", "1")]).unwrap();
        let before = t.last_modified().unwrap();

        let err = t
            .batch_update(&[Operation::add("w", "2"), Operation::add("x", "favorite")])
            .unwrap_err();
        assert!(matches!(err, TrackerError::Codec(_)));
        assert_eq!(t.status_map().unwrap()["w"], "1");
        assert_eq!(t.last_modified().unwrap(), before);
        assert!(!t.lock().is_locked());
    }

    #[test]
    fn plain_rows_still_read_with_compression_on() {
        let t = tracker();
        t.batch_update(&[Operation::set("w", "1,2")]).unwrap();
        t.set_compression(true).unwrap();
        assert_eq!(t.status_map().unwrap()["w"], "1,2");
    }

    #[test]
    fn contended_batch_fails_fast_with_lock_error() {
        let options = TrackerOptions { lock_wait: Duration::from_millis(20), ..TrackerOptions::default() };
        let t = Tracker::new(Arc::new(MemoryStore::new()), options);
        let _held = t.lock().acquire(Duration::from_millis(10)).unwrap();
        let err = t.batch_update(&[Operation::add("w", "1")]).unwrap_err();
        assert_eq!(err.kind(), "lock_unavailable");
        assert!(t.status_map().unwrap().is_empty());
    }

    #[test]
    fn concurrent_batches_are_serialized() {
        let t = Arc::new(tracker());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let t = t.clone();
                std::thread::spawn(move || {
                    t.batch_update(&[Operation::add("shared", i.to_string())]).unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        // No lost updates: every thread's tag survived the read-modify-write.
        assert_eq!(t.tags_for("shared").unwrap().len(), 8);
    }

    #[test]
    fn sync_applies_queue_and_returns_state() {
        let t = tracker();
        let mut queue = SyncQueue::new();
        queue.push_operation(Operation::add("w", "1"));
        queue.push_note(NoteUpdate::upsert("w", "note", "2024-03-03"));
        let result = t.sync(&queue).unwrap();
        assert!(result.success);
        assert_eq!(result.update_results.updated, 1);
        assert_eq!(result.notes_updated, 1);
        assert_eq!(result.status_data["w"], "1");
        assert_eq!(result.notes["w"].text, "note");
    }

    /// Memory store whose note rewrite always fails.
    struct NotesDiskFull {
        inner: MemoryStore,
    }

    impl TrackerStore for NotesDiskFull {
        fn read_status_rows(&self) -> Result<Vec<StatusRow>> {
            self.inner.read_status_rows()
        }
        fn update_status_rows(&self, updates: &[(usize, String)]) -> Result<()> {
            self.inner.update_status_rows(updates)
        }
        fn append_status_rows(&self, rows: &[(String, String)]) -> Result<()> {
            self.inner.append_status_rows(rows)
        }
        fn read_settings(&self) -> Result<HashMap<String, String>> {
            self.inner.read_settings()
        }
        fn write_setting(&self, key: &str, value: &str) -> Result<()> {
            self.inner.write_setting(key, value)
        }
        fn read_note_chunks(&self) -> Result<Vec<String>> {
            self.inner.read_note_chunks()
        }
        fn replace_note_chunks(&self, _chunks: &[String]) -> Result<()> {
            Err(TrackerError::Store("disk full".into()))
        }
        fn flush(&self) -> Result<()> {
            self.inner.flush()
        }
    }

    #[test]
    fn failed_sync_does_not_leave_stale_table_cache() {
        let store = Arc::new(NotesDiskFull { inner: MemoryStore::new() });
        let t = Tracker::new(store.clone(), TrackerOptions::default());

        let mut queue = SyncQueue::new();
        queue.push_operation(Operation::add("w", "1"));
        queue.push_note(NoteUpdate::upsert("w", "note", "2024-03-03"));
        let err = t.sync(&queue).unwrap_err();
        assert_eq!(err.kind(), "generic_internal");
        assert!(!t.lock().is_locked());

        // Reads reflect what actually reached the store.
        let rows = store.read_status_rows().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(t.status_map().unwrap()["w"], "1");

        // The next batch updates that row in place instead of appending a twin.
        t.batch_update(&[Operation::add("w", "2")]).unwrap();
        let rows = store.read_status_rows().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(t.status_map().unwrap()["w"], "1,2");
        assert!(t.last_modified().unwrap().is_some());
    }

    #[test]
    fn empty_sync_does_not_touch_last_modified() {
        let t = tracker();
        t.batch_update(&[Operation::add("w", "1")]).unwrap();
        let before = t.last_modified().unwrap();
        let result = t.sync(&SyncQueue::new()).unwrap();
        assert_eq!(result.status_data["w"], "1");
        assert_eq!(t.last_modified().unwrap(), before);
    }

    #[test]
    fn works_against_sqlite_store() {
        let t = Tracker::new(Arc::new(SqliteStore::open_in_memory().unwrap()), TrackerOptions::default());
        init(&t, json!({"work_123": "1,2,3"}));
        t.batch_update(&[Operation::add("work_123", "4"), Operation::set("work_9", "9")]).unwrap();
        let map = t.status_map().unwrap();
        assert_eq!(map["work_123"], "1,2,3,4");
        assert_eq!(map["work_9"], "9");
    }
}

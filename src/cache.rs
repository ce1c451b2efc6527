use dashmap::DashMap;
use serde::{Serialize, de::DeserializeOwned};
use std::time::{Duration, Instant};

/// TTL for the full status-table read: 5 minutes
pub const STATUS_TABLE_TTL: Duration = Duration::from_secs(300);

/// TTL for the derived settings map: 10 minutes
pub const SETTINGS_TTL: Duration = Duration::from_secs(600);

pub const STATUS_TABLE_KEY: &str = "status_table";
pub const SETTINGS_KEY: &str = "settings_map";

struct CacheEntry {
    json: String,
    stored_at: Instant,
    ttl: Duration,
}

/// String-valued TTL cache. Values are stored serialized and parsed on read,
/// so a hit always hands back a fresh owned copy.
pub struct TtlCache {
    entries: DashMap<String, CacheEntry>,
    default_ttl: Duration,
}

impl TtlCache {
    pub fn new(default_ttl: Duration) -> Self {
        Self { entries: DashMap::new(), default_ttl }
    }

    /// Look up a cached value if it exists, hasn't expired and still parses.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let parsed = self.entries.get(key).and_then(|entry| {
            if entry.stored_at.elapsed() < entry.ttl {
                serde_json::from_str(&entry.json).ok()
            } else {
                None
            }
        });
        if parsed.is_none() {
            self.entries.remove_if(key, |_, e| e.stored_at.elapsed() >= e.ttl);
        }
        parsed
    }

    /// Store a value. `ttl` of `None` uses the cache default.
    pub fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Option<Duration>) {
        match serde_json::to_string(value) {
            Ok(json) => {
                self.entries.insert(
                    key.to_string(),
                    CacheEntry {
                        json,
                        stored_at: Instant::now(),
                        ttl: ttl.unwrap_or(self.default_ttl),
                    },
                );
            }
            Err(e) => tracing::warn!(key, "cache: could not serialize value: {e}"),
        }
    }

    pub fn invalidate(&self, key: &str) {
        self.entries.remove(key);
    }
}

impl Default for TtlCache {
    fn default() -> Self {
        Self::new(STATUS_TABLE_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_cache_hit_within_ttl() {
        let cache = TtlCache::default();
        let mut map = HashMap::new();
        map.insert("work_1".to_string(), "1,2".to_string());
        cache.set(STATUS_TABLE_KEY, &map, None);
        let hit: HashMap<String, String> = cache.get(STATUS_TABLE_KEY).unwrap();
        assert_eq!(hit, map);
    }

    #[test]
    fn test_cache_miss_nonexistent_key() {
        let cache = TtlCache::default();
        assert!(cache.get::<String>("nope").is_none());
    }

    #[test]
    fn test_cache_miss_expired_ttl() {
        let cache = TtlCache::default();
        cache.set("k", &"v", Some(Duration::from_millis(0)));
        assert!(cache.get::<String>("k").is_none());
    }

    #[test]
    fn test_invalidate_forces_miss() {
        let cache = TtlCache::default();
        cache.set(STATUS_TABLE_KEY, &1u32, None);
        cache.set(SETTINGS_KEY, &2u32, None);
        cache.invalidate(STATUS_TABLE_KEY);
        assert!(cache.get::<u32>(STATUS_TABLE_KEY).is_none());
        assert_eq!(cache.get::<u32>(SETTINGS_KEY), Some(2));
    }

    #[test]
    fn test_cache_overwrite_replaces_value() {
        let cache = TtlCache::default();
        cache.set("k", &"old", None);
        cache.set("k", &"new", None);
        assert_eq!(cache.get::<String>("k").as_deref(), Some("new"));
    }

    #[test]
    fn test_type_mismatch_is_a_miss() {
        let cache = TtlCache::default();
        cache.set("k", &"text", None);
        assert!(cache.get::<u32>("k").is_none());
    }
}

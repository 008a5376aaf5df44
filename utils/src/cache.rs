use std::time::{Duration, Instant};

use moka::{sync::Cache, Expiry};

/// Upper bound on entries held by one cache.
const MAX_ENTRIES: u64 = 10_000;

#[derive(Clone)]
struct Entry<V> {
    value: V,
    ttl: Duration,
}

/// Expires every entry after the ttl it was stored with.
struct PerEntryTtl;

impl<V> Expiry<String, Entry<V>> for PerEntryTtl {
    fn expire_after_create(&self, _key: &String, entry: &Entry<V>, _created_at: Instant) -> Option<Duration> {
        Some(entry.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        entry: &Entry<V>,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(entry.ttl)
    }
}

/// In-memory key/value cache where every entry carries its own time to live.
///
/// Handed to the components that need it instead of living in a static, so
/// separate pipelines (and tests) never share entries by accident.
pub struct TtlCache<V> {
    entries: Cache<String, Entry<V>>,
}

impl<V: Clone + Send + Sync + 'static> Default for TtlCache<V> {
    fn default() -> Self {
        Self {
            entries: Cache::builder()
                .max_capacity(MAX_ENTRIES)
                .expire_after(PerEntryTtl)
                .build(),
        }
    }
}

impl<V: Clone + Send + Sync + 'static> TtlCache<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<V> {
        self.entries.get(key).map(|entry| entry.value)
    }

    pub fn set(&self, key: impl Into<String>, value: V, ttl: Duration) {
        self.entries.insert(key.into(), Entry { value, ttl });
    }
}

//! In-process TTL cache for derived read models.
//!
//! Read handlers use it cache-aside: try the cache, compute on a miss,
//! store the result. The scheduler calls `invalidate_all` after every
//! persisted scan pass so readers never see a view older than the data
//! underneath it. Entries also expire on their own after the TTL, which
//! bounds staleness if a pass fails to complete.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

struct Entry<T> {
    value: T,
    inserted: Instant,
}

pub struct TtlCache<T> {
    ttl: Duration,
    entries: Mutex<HashMap<String, Entry<T>>>,
    last_refresh: Mutex<Option<DateTime<Utc>>>,
}

impl<T: Clone> TtlCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
            last_refresh: Mutex::new(None),
        }
    }

    /// Fetch a live entry. Expired entries are removed on access.
    pub fn get(&self, key: &str) -> Option<T> {
        let mut entries = lock(&self.entries);
        match entries.get(key) {
            Some(entry) if entry.inserted.elapsed() < self.ttl => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn put(&self, key: String, value: T) {
        let mut entries = lock(&self.entries);
        entries.insert(
            key,
            Entry {
                value,
                inserted: Instant::now(),
            },
        );
    }

    /// Drop every cached entry and stamp the refresh time. Called after
    /// each persisted scan pass.
    pub fn invalidate_all(&self) {
        let mut entries = lock(&self.entries);
        let dropped = entries.len();
        entries.clear();
        *lock(&self.last_refresh) = Some(Utc::now());
        debug!(dropped, "Cache invalidated");
    }

    /// When the underlying data was last refreshed, if ever.
    pub fn last_refresh(&self) -> Option<DateTime<Utc>> {
        *lock(&self.last_refresh)
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.entries).is_empty()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Deterministic cache key for a query shape: stable field order, one
/// short hash so keys stay bounded regardless of search-string length.
pub fn query_key(namespace: &str, parts: &[(&str, &str)]) -> String {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    for (name, value) in parts {
        name.hash(&mut hasher);
        value.hash(&mut hasher);
    }
    format!("{namespace}:{:016x}", hasher.finish())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

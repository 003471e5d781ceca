use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Memoizes values computed from a store snapshot, keyed by the store's data
/// version. An entry is only returned while the version it was computed at is
/// still current; the first put at a newer version drops everything older.
#[derive(Clone)]
pub struct VersionedCache<K, V> {
    inner: Arc<Mutex<Entries<K, V>>>,
}

struct Entries<K, V> {
    version: u64,
    values: HashMap<K, V>,
}

impl<K, V> VersionedCache<K, V>
where
    K: Eq + Hash + Send + Sync + std::fmt::Debug,
    V: Clone + Send + Sync,
{
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Entries {
                version: 0,
                values: HashMap::new(),
            })),
        }
    }

    pub fn get(&self, key: &K, version: u64) -> Option<V> {
        let entries = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if entries.version != version {
            debug!(
                "Cache STALE for key: {:?} (cached v{}, current v{})",
                key, entries.version, version
            );
            return None;
        }
        let value = entries.values.get(key).cloned();
        if value.is_some() {
            debug!("Cache HIT for key: {:?}", key);
        } else {
            debug!("Cache MISS for key: {:?}", key);
        }
        value
    }

    pub fn put(&self, key: K, version: u64, value: V) {
        let mut entries = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if version < entries.version {
            // Computed from an older snapshot than what is cached already
            return;
        }
        if version > entries.version {
            entries.values.clear();
            entries.version = version;
        }
        debug!("Cache PUT for key: {:?}", key);
        entries.values.insert(key, value);
    }
}

impl<K, V> Default for VersionedCache<K, V>
where
    K: Eq + Hash + Send + Sync + std::fmt::Debug,
    V: Clone + Send + Sync,
{
    fn default() -> Self {
        Self::new()
    }
}

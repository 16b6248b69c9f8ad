use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    inserted: Instant,
}

/// Map whose entries expire `ttl` after insertion. A zero ttl disables caching.
#[derive(Debug)]
pub struct TimedCache<K, V> {
    ttl: Duration,
    map: RwLock<HashMap<K, CacheEntry<V>>>,
}

impl<K, V> TimedCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            map: RwLock::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn get(&self, key: &K) -> Option<V> {
        let map = self.map.read().await;
        map.get(key).and_then(|entry| {
            if entry.inserted.elapsed() <= self.ttl {
                Some(entry.value.clone())
            } else {
                None
            }
        })
    }

    /// Insert `value`, evicting expired entries first.
    pub async fn set(&self, key: K, value: V) {
        if self.ttl.is_zero() {
            return;
        }
        let mut map = self.map.write().await;
        let ttl = self.ttl;
        map.retain(|_, entry| entry.inserted.elapsed() <= ttl);
        map.insert(
            key,
            CacheEntry {
                value,
                inserted: Instant::now(),
            },
        );
    }

    pub async fn len(&self) -> usize {
        self.map.read().await.len()
    }

    pub async fn clear(&self) {
        self.map.write().await.clear();
    }
}

//! Bounded LRU cache for position values.
//!
//! Entries live in a slab (`Vec`) linked into a recency list by index, so
//! lookups, inserts and evictions are O(1) without per-entry allocation
//! after warm-up. `ShardedCache` splits the key space over independently
//! locked shards to cut contention between dispatch threads.

use std::borrow::Borrow;
use std::hash::{Hash, Hasher};

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHasher};
use serde::{Deserialize, Serialize};

const NIL: usize = usize::MAX;

#[derive(Clone, Debug)]
struct Entry<K, V> {
    key: K,
    value: V,
    prev: usize,
    next: usize,
}

/// Counters reported by a cache.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheInfo {
    pub size: usize,
    pub max_size: usize,
    pub hits: u64,
    pub misses: u64,
}

impl CacheInfo {
    /// Total lookups.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.hits + self.misses
    }

    /// Fraction of capacity in use.
    #[must_use]
    pub fn usage(&self) -> f64 {
        if self.max_size == 0 {
            0.0
        } else {
            self.size as f64 / self.max_size as f64
        }
    }

    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

impl std::ops::AddAssign for CacheInfo {
    fn add_assign(&mut self, other: Self) {
        self.size += other.size;
        self.max_size += other.max_size;
        self.hits += other.hits;
        self.misses += other.misses;
    }
}

/// Least-recently-used cache with a fixed capacity.
#[derive(Clone, Debug)]
pub struct LruCache<K, V> {
    map: FxHashMap<K, usize>,
    entries: Vec<Entry<K, V>>,
    head: usize, // most recent
    tail: usize, // least recent
    capacity: usize,
    hits: u64,
    misses: u64,
}

impl<K: Hash + Eq + Clone, V: Clone> LruCache<K, V> {
    /// Create a cache holding at most `capacity` entries. Zero disables it.
    pub fn new(capacity: usize) -> Self {
        Self {
            map: FxHashMap::default(),
            entries: Vec::new(),
            head: NIL,
            tail: NIL,
            capacity,
            hits: 0,
            misses: 0,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Look up `key`, marking it most recently used. Counts a hit or miss.
    pub fn get<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        match self.map.get(key).copied() {
            Some(idx) => {
                self.hits += 1;
                self.move_to_front(idx);
                Some(self.entries[idx].value.clone())
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Check for `key` without touching recency or counters.
    #[must_use]
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.map.contains_key(key)
    }

    /// Insert or overwrite `key`, evicting the least recently used entry
    /// when full.
    pub fn insert(&mut self, key: K, value: V) {
        if self.capacity == 0 {
            return;
        }

        if let Some(&idx) = self.map.get(&key) {
            self.entries[idx].value = value;
            self.move_to_front(idx);
            return;
        }

        let idx = if self.entries.len() < self.capacity {
            self.entries.push(Entry {
                key: key.clone(),
                value,
                prev: NIL,
                next: NIL,
            });
            self.entries.len() - 1
        } else {
            // Reuse the tail slot.
            let idx = self.tail;
            self.unlink(idx);
            let old_key = std::mem::replace(&mut self.entries[idx].key, key.clone());
            self.map.remove(&old_key);
            self.entries[idx].value = value;
            idx
        };

        self.push_front(idx);
        self.map.insert(key, idx);
    }

    /// Drop every entry. Counters are kept.
    pub fn clear(&mut self) {
        self.map.clear();
        self.entries.clear();
        self.head = NIL;
        self.tail = NIL;
    }

    /// Current counters.
    #[must_use]
    pub fn info(&self) -> CacheInfo {
        CacheInfo {
            size: self.len(),
            max_size: self.capacity,
            hits: self.hits,
            misses: self.misses,
        }
    }

    /// Keys from most to least recently used.
    pub fn keys_by_recency(&self) -> Vec<K> {
        let mut keys = Vec::with_capacity(self.len());
        let mut idx = self.head;
        while idx != NIL {
            keys.push(self.entries[idx].key.clone());
            idx = self.entries[idx].next;
        }
        keys
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = (self.entries[idx].prev, self.entries[idx].next);
        if prev == NIL {
            self.head = next;
        } else {
            self.entries[prev].next = next;
        }
        if next == NIL {
            self.tail = prev;
        } else {
            self.entries[next].prev = prev;
        }
        self.entries[idx].prev = NIL;
        self.entries[idx].next = NIL;
    }

    fn push_front(&mut self, idx: usize) {
        self.entries[idx].prev = NIL;
        self.entries[idx].next = self.head;
        if self.head != NIL {
            self.entries[self.head].prev = idx;
        }
        self.head = idx;
        if self.tail == NIL {
            self.tail = idx;
        }
    }

    fn move_to_front(&mut self, idx: usize) {
        if self.head != idx {
            self.unlink(idx);
            self.push_front(idx);
        }
    }
}

/// LRU cache split over independently locked shards.
///
/// Each shard holds `capacity / shards` entries, rounded up so a non-zero
/// capacity never yields empty shards. A key always maps to the same shard,
/// and eviction is least-recently-used within that shard only.
#[derive(Debug)]
pub struct ShardedCache<V> {
    shards: Vec<Mutex<LruCache<String, V>>>,
}

impl<V: Clone> ShardedCache<V> {
    pub fn new(capacity: usize, shards: usize) -> Self {
        let shards = shards.max(1);
        let per_shard = capacity.div_ceil(shards);
        Self {
            shards: (0..shards)
                .map(|_| Mutex::new(LruCache::new(per_shard)))
                .collect(),
        }
    }

    fn shard(&self, key: &str) -> &Mutex<LruCache<String, V>> {
        let mut hasher = FxHasher::default();
        key.hash(&mut hasher);
        &self.shards[hasher.finish() as usize % self.shards.len()]
    }

    pub fn get(&self, key: &str) -> Option<V> {
        self.shard(key).lock().get(key)
    }

    pub fn insert(&self, key: String, value: V) {
        self.shard(&key).lock().insert(key, value);
    }

    pub fn clear(&self) {
        for shard in &self.shards {
            shard.lock().clear();
        }
    }

    #[must_use]
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Counters summed over every shard.
    #[must_use]
    pub fn info(&self) -> CacheInfo {
        let mut info = CacheInfo::default();
        for shard in &self.shards {
            info += shard.lock().info();
        }
        info
    }
}

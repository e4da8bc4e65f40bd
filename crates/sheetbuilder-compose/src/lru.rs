//! Bounded LRU cache of page form-object handles.
//!
//! Keyed by source page index; values are reusable handles to a page already
//! copied into the output document. Bounding capacity caps memory for very
//! large inputs while still de-duplicating identical page re-uses within a
//! sheet build. Tie-break for equal recency is unspecified upstream and is
//! resolved here as "oldest insertion order wins" (first-in, first-evicted
//! among equally-stale entries).

use std::collections::HashMap;
use std::collections::VecDeque;
use std::hash::Hash;

/// A bounded least-recently-used cache with an eviction release hook.
pub struct LruCache<K, V, R> {
    capacity: usize,
    map: HashMap<K, V>,
    order: VecDeque<K>,
    hits: u64,
    misses: u64,
    on_evict: R,
}

impl<K, V, R> LruCache<K, V, R>
where
    K: Eq + Hash + Clone,
    R: FnMut(V),
{
    /// Creates a cache bounded at `capacity` entries. `on_evict` is called
    /// with the evicted value whenever an insertion overflows the capacity,
    /// giving the caller a chance to release any resources the value holds.
    pub fn new(capacity: usize, on_evict: R) -> Self {
        Self {
            capacity: capacity.max(1),
            map: HashMap::new(),
            order: VecDeque::new(),
            hits: 0,
            misses: 0,
            on_evict,
        }
    }

    /// Returns the cached value for `key`, computing and inserting it via
    /// `compute` on a miss.
    pub fn get_or_insert_with(&mut self, key: K, compute: impl FnOnce() -> V) -> &V {
        if self.map.contains_key(&key) {
            self.hits += 1;
            self.touch(&key);
        } else {
            self.misses += 1;
            let value = compute();
            self.insert(key.clone(), value);
        }
        self.map.get(&key).expect("just inserted or already present")
    }

    /// Like [`Self::get_or_insert_with`], but `compute` may fail. A failed
    /// compute leaves the cache untouched and is not counted as a miss
    /// against `hits`/`misses` bookkeeping beyond the attempt itself, so a
    /// caller that retries the same key after fixing the underlying error
    /// sees a clean miss rather than a phantom cached failure.
    pub fn get_or_try_insert_with<E>(&mut self, key: K, compute: impl FnOnce() -> Result<V, E>) -> Result<&V, E> {
        if self.map.contains_key(&key) {
            self.hits += 1;
            self.touch(&key);
        } else {
            self.misses += 1;
            let value = compute()?;
            self.insert(key.clone(), value);
        }
        Ok(self.map.get(&key).expect("just inserted or already present"))
    }

    fn insert(&mut self, key: K, value: V) {
        if self.map.len() >= self.capacity && !self.map.contains_key(&key) {
            self.evict_one();
        }
        self.map.insert(key.clone(), value);
        self.order.push_back(key);
    }

    fn touch(&mut self, key: &K) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            let k = self.order.remove(pos).expect("position is valid");
            self.order.push_back(k);
        }
    }

    fn evict_one(&mut self) {
        while let Some(candidate) = self.order.pop_front() {
            if let Some(value) = self.map.remove(&candidate) {
                (self.on_evict)(value);
                return;
            }
            // `candidate` was already removed via a prior touch/evict race;
            // keep scanning for the real least-recently-used entry.
        }
    }

    /// Number of entries currently cached.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    /// Cache hit ratio in `[0, 1]`; `0.0` before any lookups.
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

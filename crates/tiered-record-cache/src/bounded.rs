//! Single LRU pool with hit/miss accounting

use crate::stats::TierStats;
use lru::LruCache;
use parking_lot::Mutex;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};

/// A fixed-capacity map that evicts its least recently used entry when full.
///
/// All operations take `&self`; the map is guarded by a mutex that is never held
/// while calling back into user code other than the predicates of
/// [`keys_where`](Self::keys_where) and [`remove_where`](Self::remove_where).
pub struct BoundedPool<K: Hash + Eq, V> {
   entries: Mutex<LruCache<K, V>>,
   capacity: usize,
   hits: AtomicU64,
   misses: AtomicU64,
}

impl<K: Hash + Eq + Clone, V: Clone> BoundedPool<K, V> {
   pub fn new(capacity: usize) -> Self {
      let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
      Self {
         entries: Mutex::new(LruCache::new(capacity)),
         capacity: capacity.get(),
         hits: AtomicU64::new(0),
         misses: AtomicU64::new(0),
      }
   }

   /// Look up `key`, marking it most recently used and counting a hit or miss.
   pub fn get(&self, key: &K) -> Option<V> {
      let found = self.entries.lock().get(key).cloned();
      let counter = if found.is_some() { &self.hits } else { &self.misses };
      counter.fetch_add(1, Ordering::Relaxed);
      found
   }

   /// Look up `key` without touching recency or counters.
   pub fn peek(&self, key: &K) -> Option<V> {
      self.entries.lock().peek(key).cloned()
   }

   pub fn contains(&self, key: &K) -> bool {
      self.entries.lock().contains(key)
   }

   /// Insert or replace `key`.
   ///
   /// Returns the entry evicted to make room, if any. Replacing an existing key
   /// evicts nothing.
   pub fn put(&self, key: K, value: V) -> Option<(K, V)> {
      let mut entries = self.entries.lock();
      let replacing = entries.contains(&key);
      let displaced = entries.push(key, value);
      if replacing { None } else { displaced }
   }

   pub fn remove(&self, key: &K) -> Option<V> {
      self.entries.lock().pop(key)
   }

   /// Keys matching `pred`, most recently used first.
   pub fn keys_where(&self, pred: impl Fn(&K, &V) -> bool) -> Vec<K> {
      self
         .entries
         .lock()
         .iter()
         .filter(|&(k, v)| pred(k, v))
         .map(|(k, _)| k.clone())
         .collect()
   }

   /// Remove every entry matching `pred`, returning how many were removed.
   pub fn remove_where(&self, pred: impl Fn(&K, &V) -> bool) -> usize {
      let mut entries = self.entries.lock();
      let doomed: Vec<K> = entries
         .iter()
         .filter(|&(k, v)| pred(k, v))
         .map(|(k, _)| k.clone())
         .collect();
      for key in &doomed {
         entries.pop(key);
      }
      doomed.len()
   }

   /// Remove every entry. Counters are kept.
   pub fn evict_all(&self) -> usize {
      let mut entries = self.entries.lock();
      let count = entries.len();
      entries.clear();
      count
   }

   pub fn len(&self) -> usize {
      self.entries.lock().len()
   }

   pub fn is_empty(&self) -> bool {
      self.entries.lock().is_empty()
   }

   pub fn capacity(&self) -> usize {
      self.capacity
   }

   pub fn stats(&self) -> TierStats {
      TierStats {
         hits: self.hits.load(Ordering::Relaxed),
         misses: self.misses.load(Ordering::Relaxed),
         size: self.len(),
         capacity: self.capacity,
      }
   }
}

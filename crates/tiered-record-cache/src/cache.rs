//! Parent, settings and child-collection pools behind one façade

use crate::bounded::BoundedPool;
use crate::config::CacheConfig;
use crate::stats::{CacheStats, CacheUsage};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};

/// Key of one page of a large parent's children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkKey {
   pub parent_id: i64,
   pub index: usize,
}

impl ChunkKey {
   pub fn new(parent_id: i64, index: usize) -> Self {
      Self { parent_id, index }
   }
}

/// Reading of the cache's invalidation clock
///
/// Take one with [`TieredCache::generation`] before reading from the backing
/// store and hand it to the `put_*_if` fill. The fill is dropped when the entry
/// was invalidated or overwritten after the reading was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Generation(u64);

/// Most entries the clock stamps individually before it moves its floor instead
const MAX_STAMPS: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Stamp {
   Parent(i64),
   Settings(String),
}

/// Invalidation clock. Every invalidation or writer put ticks it and stamps the
/// entry it touched; `floor` covers everything invalidated at once.
#[derive(Default)]
struct Clock {
   now: u64,
   floor: u64,
   stamps: HashMap<Stamp, u64>,
}

impl Clock {
   fn tick(&mut self) -> u64 {
      self.now += 1;
      self.now
   }

   fn stamp(&mut self, entry: Stamp) {
      let now = self.tick();
      if self.stamps.len() >= MAX_STAMPS && !self.stamps.contains_key(&entry) {
         self.floor = now;
         self.stamps.clear();
      } else {
         self.stamps.insert(entry, now);
      }
   }

   fn reset(&mut self) {
      self.floor = self.tick();
      self.stamps.clear();
   }

   fn is_current(&self, generation: Generation, entries: &[Stamp]) -> bool {
      self.floor <= generation.0
         && entries
            .iter()
            .all(|entry| self.stamps.get(entry).is_none_or(|&at| at <= generation.0))
   }
}

/// In-memory cache of parent records (`P`), per-child settings (`S`) and the
/// ordered child collections (`C`) of each parent.
///
/// A parent with at most `page_size` children has its whole collection cached
/// as one entry. A larger parent is marked *large* and its children are cached as
/// consecutive pages of `page_size`, so reading a window of a huge collection only
/// needs the pages that cover it.
///
/// Every pool is bounded and evicts least-recently-used entries on its own. The
/// cache is safe to share between threads; each pool has its own lock.
///
/// Fills after a store read go through the `put_*_if` methods with a
/// [`Generation`] taken before the read, so a read that raced a write can never
/// put back what the write invalidated.
pub struct TieredCache<P, S, C> {
   config: CacheConfig,
   parents: BoundedPool<i64, P>,
   settings: BoundedPool<String, (i64, S)>,
   collections: BoundedPool<i64, Arc<[C]>>,
   chunks: BoundedPool<ChunkKey, Arc<[C]>>,
   /// Parent id -> total child count, for parents cached in chunks
   large_parents: Mutex<HashMap<i64, usize>>,
   /// Held while invalidating and while filling, never while reading
   clock: Mutex<Clock>,
}

impl<P: Clone, S: Clone, C: Clone> TieredCache<P, S, C> {
   pub fn new(config: CacheConfig) -> Self {
      Self {
         parents: BoundedPool::new(config.parent_capacity),
         settings: BoundedPool::new(config.settings_capacity),
         collections: BoundedPool::new(config.collection_capacity),
         chunks: BoundedPool::new(config.chunk_capacity),
         large_parents: Mutex::new(HashMap::new()),
         clock: Mutex::new(Clock::default()),
         config,
      }
   }

   pub fn config(&self) -> &CacheConfig {
      &self.config
   }

   pub fn page_size(&self) -> usize {
      self.config.effective_page_size()
   }

   /// Current reading of the invalidation clock
   pub fn generation(&self) -> Generation {
      Generation(self.clock.lock().now)
   }

   // ==========================================================================
   // Parents
   // ==========================================================================

   pub fn get_parent(&self, id: i64) -> Option<P> {
      let parent = self.parents.get(&id);
      trace!(parent_id = id, hit = parent.is_some(), "parent lookup");
      parent
   }

   /// Cache a parent written by the caller, superseding any fill in flight
   pub fn put_parent(&self, id: i64, parent: P) {
      let mut clock = self.clock.lock();
      clock.stamp(Stamp::Parent(id));
      self.parents.put(id, parent);
   }

   pub fn put_parents(&self, parents: impl IntoIterator<Item = (i64, P)>) {
      let mut clock = self.clock.lock();
      for (id, parent) in parents {
         clock.stamp(Stamp::Parent(id));
         self.parents.put(id, parent);
      }
   }

   /// Cache a parent read at `generation`, unless it changed since
   ///
   /// Returns whether the parent was cached.
   pub fn put_parent_if(&self, id: i64, generation: Generation, parent: P) -> bool {
      let clock = self.clock.lock();
      if !clock.is_current(generation, &[Stamp::Parent(id)]) {
         trace!(parent_id = id, "dropped stale parent fill");
         return false;
      }
      self.parents.put(id, parent);
      true
   }

   // ==========================================================================
   // Settings
   // ==========================================================================

   pub fn get_settings(&self, key: &str) -> Option<S> {
      self
         .settings
         .get(&key.to_string())
         .map(|(_, settings)| settings)
   }

   /// Cache `settings` under `key`, remembering which parent owns it so that
   /// invalidating the parent also drops it.
   pub fn put_settings(&self, key: impl Into<String>, parent_id: i64, settings: S) {
      let key = key.into();
      let mut clock = self.clock.lock();
      clock.stamp(Stamp::Settings(key.clone()));
      self.settings.put(key, (parent_id, settings));
   }

   /// Cache settings read at `generation`, unless they or their parent changed since
   pub fn put_settings_if(
      &self,
      key: impl Into<String>,
      parent_id: i64,
      generation: Generation,
      settings: S,
   ) -> bool {
      let key = key.into();
      let clock = self.clock.lock();
      let entries = [Stamp::Settings(key.clone()), Stamp::Parent(parent_id)];
      if !clock.is_current(generation, &entries) {
         trace!(key = %key, "dropped stale settings fill");
         return false;
      }
      self.settings.put(key, (parent_id, settings));
      true
   }

   pub fn invalidate_settings(&self, key: &str) {
      let mut clock = self.clock.lock();
      clock.stamp(Stamp::Settings(key.to_string()));
      self.settings.remove(&key.to_string());
   }

   // ==========================================================================
   // Children
   // ==========================================================================

   /// Cache the complete ordered child collection of a parent
   ///
   /// Replaces whatever was cached for the parent's children before. A collection
   /// longer than the page size is split into pages and the parent is marked large.
   pub fn put_children(&self, parent_id: i64, children: Vec<C>) {
      let mut clock = self.clock.lock();
      clock.stamp(Stamp::Parent(parent_id));
      self.store_children(parent_id, children);
   }

   /// Cache a child collection read at `generation`, unless the parent was
   /// invalidated since
   pub fn put_children_if(&self, parent_id: i64, generation: Generation, children: Vec<C>) -> bool {
      let clock = self.clock.lock();
      if !clock.is_current(generation, &[Stamp::Parent(parent_id)]) {
         debug!(parent_id, "dropped stale child collection fill");
         return false;
      }
      self.store_children(parent_id, children);
      true
   }

   fn store_children(&self, parent_id: i64, children: Vec<C>) {
      let page_size = self.page_size();
      let total = children.len();

      self.collections.remove(&parent_id);
      self.chunks.remove_where(|key, _| key.parent_id == parent_id);

      if total <= page_size {
         self.large_parents.lock().remove(&parent_id);
         self.collections.put(parent_id, Arc::from(children));
         return;
      }

      // Pages that cannot all fit would evict this parent's first pages, and
      // everyone else's, while being stored
      let pages = total.div_ceil(page_size);
      if pages > self.chunks.capacity() {
         self.large_parents.lock().remove(&parent_id);
         debug!(parent_id, total, pages, "child collection too large to cache");
         return;
      }

      self.large_parents.lock().insert(parent_id, total);

      let mut remaining = children.into_iter();
      let mut index = 0;
      loop {
         let page: Vec<C> = remaining.by_ref().take(page_size).collect();
         if page.is_empty() {
            break;
         }
         self.chunks.put(ChunkKey::new(parent_id, index), Arc::from(page));
         index += 1;
      }

      debug!(parent_id, total, chunks = index, "cached large child collection");
   }

   pub fn put_children_for_parents(&self, collections: impl IntoIterator<Item = (i64, Vec<C>)>) {
      for (parent_id, children) in collections {
         self.put_children(parent_id, children);
      }
   }

   /// Cached children of a parent
   ///
   /// For a small parent this is the whole collection. For a large parent only the
   /// first page is returned; use [`get_children_range`](Self::get_children_range)
   /// or [`large_parent_len`](Self::large_parent_len) to reach the rest.
   pub fn get_children(&self, parent_id: i64) -> Option<Arc<[C]>> {
      if self.is_large(parent_id) {
         self.chunks.get(&ChunkKey::new(parent_id, 0))
      } else {
         self.collections.get(&parent_id)
      }
   }

   /// Children at positions `start..end` of a parent's collection
   ///
   /// `end` is clamped to the collection length. Returns `None` unless every page
   /// covering the window is cached; a partially cached window is a miss.
   pub fn get_children_range(&self, parent_id: i64, start: usize, end: usize) -> Option<Vec<C>> {
      let Some(total) = self.large_parent_len(parent_id) else {
         let children = self.collections.get(&parent_id)?;
         let end = end.min(children.len());
         let start = start.min(end);
         return Some(children[start..end].to_vec());
      };

      let end = end.min(total);
      if start >= end {
         return Some(Vec::new());
      }

      let page_size = self.page_size();
      let mut window = Vec::with_capacity(end - start);

      for index in start / page_size..=(end - 1) / page_size {
         let page = self.chunks.get(&ChunkKey::new(parent_id, index))?;
         let page_start = index * page_size;
         let from = start.saturating_sub(page_start);
         let to = (end - page_start).min(page.len());
         if from >= to {
            return None;
         }
         window.extend_from_slice(&page[from..to]);
      }

      Some(window)
   }

   pub fn is_large(&self, parent_id: i64) -> bool {
      self.large_parents.lock().contains_key(&parent_id)
   }

   /// Total child count of a parent cached in pages
   pub fn large_parent_len(&self, parent_id: i64) -> Option<usize> {
      self.large_parents.lock().get(&parent_id).copied()
   }

   // ==========================================================================
   // Invalidation
   // ==========================================================================

   /// Forget everything cached for a parent: the record, its children (whole or
   /// paged), its large marker and the settings of its children.
   pub fn invalidate_parent(&self, parent_id: i64) {
      let mut clock = self.clock.lock();
      clock.stamp(Stamp::Parent(parent_id));
      self.parents.remove(&parent_id);
      self.collections.remove(&parent_id);
      self.large_parents.lock().remove(&parent_id);
      let chunks = self.chunks.remove_where(|key, _| key.parent_id == parent_id);
      let settings = self
         .settings
         .remove_where(|_, (owner, _)| *owner == parent_id);

      debug!(parent_id, chunks, settings, "invalidated parent");
   }

   /// Empty every pool and forget every large marker
   pub fn invalidate_all(&self) -> usize {
      let mut clock = self.clock.lock();
      clock.reset();
      let evicted = self.parents.evict_all()
         + self.settings.evict_all()
         + self.collections.evict_all()
         + self.chunks.evict_all();
      self.large_parents.lock().clear();

      debug!(evicted, "invalidated all cache pools");
      evicted
   }

   // ==========================================================================
   // Reporting
   // ==========================================================================

   pub fn stats(&self) -> CacheStats {
      CacheStats {
         parents: self.parents.stats(),
         settings: self.settings.stats(),
         collections: self.collections.stats(),
         chunks: self.chunks.stats(),
      }
   }

   pub fn usage(&self) -> CacheUsage {
      CacheUsage {
         parents: self.parents.len(),
         parent_capacity: self.parents.capacity(),
         settings: self.settings.len(),
         settings_capacity: self.settings.capacity(),
         collections: self.collections.len(),
         collection_capacity: self.collections.capacity(),
         chunks: self.chunks.len(),
         chunk_capacity: self.chunks.capacity(),
         large_parents: self.large_parents.lock().len(),
      }
   }
}

impl<P: Clone, S: Clone, C: Clone> Default for TieredCache<P, S, C> {
   fn default() -> Self {
      Self::new(CacheConfig::default())
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   type TestCache = TieredCache<String, bool, u32>;

   fn small_pages() -> TestCache {
      TieredCache::new(CacheConfig::default().with_page_size(10))
   }

   #[test]
   fn test_exactly_page_size_is_not_large() {
      let cache = small_pages();
      cache.put_children(1, (0..10).collect());
      assert!(!cache.is_large(1));
      assert_eq!(cache.get_children(1).unwrap().len(), 10);

      cache.put_children(2, (0..11).collect());
      assert!(cache.is_large(2));
      assert_eq!(cache.large_parent_len(2), Some(11));
      assert_eq!(cache.usage().chunks, 2);
   }

   #[test]
   fn test_shrinking_collection_drops_old_pages() {
      let cache = small_pages();
      cache.put_children(1, (0..25).collect());
      assert_eq!(cache.usage().chunks, 3);

      cache.put_children(1, (0..5).collect());
      assert!(!cache.is_large(1));
      assert_eq!(cache.usage().chunks, 0);
      assert_eq!(cache.get_children(1).unwrap().len(), 5);
   }

   #[test]
   fn test_range_on_page_boundaries() {
      let cache = small_pages();
      cache.put_children(1, (0..30).collect());

      // Window ending exactly on a page boundary touches only its own pages
      assert_eq!(cache.get_children_range(1, 10, 20), Some((10..20).collect()));
      assert_eq!(cache.get_children_range(1, 0, 1), Some(vec![0]));
      assert_eq!(cache.get_children_range(1, 29, 30), Some(vec![29]));
   }

   #[test]
   fn test_range_clamps_end() {
      let cache = small_pages();
      cache.put_children(1, (0..15).collect());
      assert_eq!(cache.get_children_range(1, 12, 100), Some(vec![12, 13, 14]));
      assert_eq!(cache.get_children_range(1, 20, 30), Some(vec![]));

      cache.put_children(2, (0..5).collect());
      assert_eq!(cache.get_children_range(2, 3, 100), Some(vec![3, 4]));
      assert_eq!(cache.get_children_range(2, 7, 9), Some(vec![]));
   }

   #[test]
   fn test_range_of_unknown_parent_is_miss() {
      let cache = small_pages();
      assert_eq!(cache.get_children_range(9, 0, 5), None);
   }

   #[test]
   fn test_fill_after_invalidation_is_dropped() {
      let cache = small_pages();
      let before = cache.generation();
      cache.invalidate_parent(1);

      assert!(!cache.put_children_if(1, before, vec![1, 2]));
      assert_eq!(cache.get_children(1), None);

      // Other parents are unaffected
      assert!(cache.put_children_if(2, before, vec![3]));

      let after = cache.generation();
      assert!(cache.put_children_if(1, after, vec![1, 2, 3]));
      assert_eq!(cache.get_children(1).unwrap().len(), 3);
   }

   #[test]
   fn test_fill_after_writer_put_is_dropped() {
      let cache = small_pages();
      let before = cache.generation();
      cache.put_parent(1, "written".to_string());
      cache.put_settings("a", 1, true);

      assert!(!cache.put_parent_if(1, before, "read".to_string()));
      assert!(!cache.put_settings_if("a", 1, before, false));
      assert_eq!(cache.get_parent(1).as_deref(), Some("written"));
      assert_eq!(cache.get_settings("a"), Some(true));
   }

   #[test]
   fn test_settings_fill_dropped_when_parent_invalidated() {
      let cache = small_pages();
      let before = cache.generation();
      cache.invalidate_parent(1);
      assert!(!cache.put_settings_if("a", 1, before, true));
      assert!(cache.put_settings_if("b", 2, before, true));
   }

   #[test]
   fn test_fill_after_invalidate_all_is_dropped() {
      let cache = small_pages();
      let before = cache.generation();
      cache.invalidate_all();
      assert!(!cache.put_parent_if(5, before, "read".to_string()));
      assert!(cache.put_parent_if(5, cache.generation(), "read".to_string()));
   }

   #[test]
   fn test_stamp_overflow_stays_conservative() {
      let cache = small_pages();
      let before = cache.generation();
      for id in 0..(MAX_STAMPS as i64 + 10) {
         cache.invalidate_parent(id);
      }
      // Past the stamp budget every older fill is refused
      assert!(!cache.put_parent_if(-5, before, "read".to_string()));
      assert!(cache.put_parent_if(-5, cache.generation(), "read".to_string()));
   }

   #[test]
   fn test_collection_larger_than_chunk_pool_is_not_cached() {
      let cache: TestCache =
         TieredCache::new(CacheConfig::default().with_page_size(10).with_chunk_capacity(3));
      cache.put_children(1, (0..25).collect());
      assert_eq!(cache.usage().chunks, 3);

      cache.put_children(2, (0..31).collect());
      assert!(!cache.is_large(2));
      assert_eq!(cache.get_children(2), None);
      // The first parent's pages survived
      assert_eq!(cache.get_children_range(1, 0, 25), Some((0..25).collect()));
   }
}

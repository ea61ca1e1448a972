use std::sync::Arc;
use std::time::Duration;
use tiered_record_cache::{CacheConfig, TieredCache, spawn_maintenance};

#[derive(Debug, Clone, PartialEq)]
struct Parent {
   name: String,
}

#[derive(Debug, Clone, PartialEq)]
struct Settings {
   is_read: bool,
}

#[derive(Debug, Clone, PartialEq)]
struct Child {
   parent_id: i64,
   order: usize,
}

type RecordCache = TieredCache<Parent, Settings, Child>;

fn children(parent_id: i64, count: usize) -> Vec<Child> {
   (0..count).map(|order| Child { parent_id, order }).collect()
}

fn orders(children: &[Child]) -> Vec<usize> {
   children.iter().map(|c| c.order).collect()
}

// ============================================================================
// Chunking
// ============================================================================

#[test]
fn test_large_parent_range_read() {
   let cache = RecordCache::new(CacheConfig::default());
   cache.put_children(7, children(7, 250));

   assert!(cache.is_large(7));
   assert_eq!(cache.large_parent_len(7), Some(250));
   assert_eq!(cache.usage().chunks, 3);

   let window = cache.get_children_range(7, 150, 160).unwrap();
   assert_eq!(orders(&window), (150..160).collect::<Vec<_>>());

   // Last page is partial
   let tail = cache.get_children_range(7, 195, 250).unwrap();
   assert_eq!(orders(&tail), (195..250).collect::<Vec<_>>());
}

#[test]
fn test_large_parent_get_children_returns_first_page() {
   let cache = RecordCache::new(CacheConfig::default());
   cache.put_children(7, children(7, 250));

   let first = cache.get_children(7).unwrap();
   assert_eq!(first.len(), 100);
   assert_eq!(first[0].order, 0);
}

#[test]
fn test_threshold_boundary() {
   let page_size = CacheConfig::default().page_size;
   let cache = RecordCache::new(CacheConfig::default());

   cache.put_children(1, children(1, page_size));
   cache.put_children(2, children(2, page_size + 1));

   assert!(!cache.is_large(1));
   assert_eq!(cache.get_children(1).unwrap().len(), page_size);

   assert!(cache.is_large(2));
   assert_eq!(cache.get_children(2).unwrap().len(), page_size);
   let last = cache.get_children_range(2, page_size, page_size + 1).unwrap();
   assert_eq!(orders(&last), vec![page_size]);
}

#[test]
fn test_evicted_page_makes_range_a_miss() {
   let cache = RecordCache::new(CacheConfig::default().with_chunk_capacity(3));
   cache.put_children(7, children(7, 250));

   // A second large parent pushes parent 7's oldest pages out
   cache.put_children(8, children(8, 150));

   assert_eq!(cache.get_children_range(7, 0, 10), None);
   assert!(cache.get_children_range(8, 0, 150).is_some());
}

// ============================================================================
// Invalidation
// ============================================================================

#[test]
fn test_invalidate_parent_clears_everything_for_it() {
   let cache = RecordCache::new(CacheConfig::default());
   cache.put_parent(7, Parent { name: "seven".into() });
   cache.put_children(7, children(7, 250));
   cache.put_settings("https://x/7/1", 7, Settings { is_read: true });

   cache.put_parent(8, Parent { name: "eight".into() });
   cache.put_children(8, children(8, 3));
   cache.put_settings("https://x/8/1", 8, Settings { is_read: false });

   cache.invalidate_parent(7);

   assert_eq!(cache.get_parent(7), None);
   assert_eq!(cache.get_children(7), None);
   assert_eq!(cache.get_children_range(7, 0, 10), None);
   assert!(!cache.is_large(7));
   assert_eq!(cache.get_settings("https://x/7/1"), None);

   // Other parents are untouched
   assert!(cache.get_parent(8).is_some());
   assert_eq!(cache.get_children(8).unwrap().len(), 3);
   assert!(cache.get_settings("https://x/8/1").is_some());

   let usage = cache.usage();
   assert_eq!(usage.chunks, 0);
   assert_eq!(usage.large_parents, 0);
}

#[test]
fn test_invalidate_all() {
   let cache = RecordCache::new(CacheConfig::default());
   cache.put_parents((1..=5).map(|id| (id, Parent { name: id.to_string() })));
   cache.put_children_for_parents([(1, children(1, 5)), (2, children(2, 500))]);

   assert!(cache.invalidate_all() > 0);
   let usage = cache.usage();
   assert_eq!(usage.total_entries(), 0);
   assert_eq!(usage.large_parents, 0);
}

// ============================================================================
// Statistics
// ============================================================================

#[test]
fn test_stats_track_hits_and_misses() {
   let cache = RecordCache::new(CacheConfig::default());
   cache.put_parent(1, Parent { name: "one".into() });

   cache.get_parent(1);
   cache.get_parent(1);
   cache.get_parent(2);
   cache.get_children(1);

   let stats = cache.stats();
   assert_eq!(stats.parents.hits, 2);
   assert_eq!(stats.parents.misses, 1);
   assert_eq!(stats.collections.misses, 1);
   assert!((stats.parents.hit_rate() - 2.0 / 3.0).abs() < f64::EPSILON);
}

#[test]
fn test_usage_reports_capacities() {
   let cache = RecordCache::new(CacheConfig::default());
   let usage = cache.usage();
   assert_eq!(usage.parent_capacity, 200);
   assert_eq!(usage.settings_capacity, 500);
   assert_eq!(usage.collection_capacity, 20);
   assert_eq!(usage.chunk_capacity, 50);
   assert_eq!(usage.utilization(), 0.0);
}

// ============================================================================
// Concurrency and maintenance
// ============================================================================

#[test]
fn test_concurrent_readers_and_writers() {
   let cache = Arc::new(RecordCache::new(CacheConfig::default()));

   let threads: Vec<_> = (0..8)
      .map(|t| {
         let cache = Arc::clone(&cache);
         std::thread::spawn(move || {
            for round in 0..50 {
               let parent_id = (t * 50 + round) % 16;
               cache.put_children(parent_id, children(parent_id, 120));
               if let Some(window) = cache.get_children_range(parent_id, 90, 110) {
                  // Either a complete, correctly ordered window or a miss
                  assert_eq!(orders(&window), (90..110).collect::<Vec<_>>());
               }
               if round % 7 == 0 {
                  cache.invalidate_parent(parent_id);
               }
            }
         })
      })
      .collect();

   for thread in threads {
      thread.join().unwrap();
   }
}

#[tokio::test]
async fn test_maintenance_sweeps_cache() {
   let cache = Arc::new(RecordCache::new(CacheConfig::default()));
   cache.put_parent(1, Parent { name: "one".into() });

   let handle = spawn_maintenance(&cache, Duration::from_millis(20));
   tokio::time::sleep(Duration::from_millis(150)).await;

   assert_eq!(cache.get_parent(1), None);
   handle.stop();
}

#[tokio::test]
async fn test_maintenance_stops_when_cache_dropped() {
   let cache = Arc::new(RecordCache::new(CacheConfig::default()));
   let handle = spawn_maintenance(&cache, Duration::from_millis(10));
   drop(cache);

   tokio::time::sleep(Duration::from_millis(100)).await;
   assert!(handle.is_finished());
}

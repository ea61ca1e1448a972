use serde::Serialize;

/// Counters for one pool of the cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TierStats {
   pub hits: u64,
   pub misses: u64,
   pub size: usize,
   pub capacity: usize,
}

impl TierStats {
   /// Fraction of lookups that hit. 0.0 when nothing has been looked up.
   pub fn hit_rate(&self) -> f64 {
      let total = self.hits + self.misses;
      if total == 0 {
         0.0
      } else {
         self.hits as f64 / total as f64
      }
   }
}

/// Hit/miss counters for every pool of a [`TieredCache`](crate::TieredCache).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
   pub parents: TierStats,
   pub settings: TierStats,
   pub collections: TierStats,
   pub chunks: TierStats,
}

impl CacheStats {
   /// Hit rate across all pools combined.
   pub fn overall_hit_rate(&self) -> f64 {
      let tiers = [self.parents, self.settings, self.collections, self.chunks];
      let combined = tiers.iter().fold(TierStats::default(), |acc, t| TierStats {
         hits: acc.hits + t.hits,
         misses: acc.misses + t.misses,
         ..acc
      });
      combined.hit_rate()
   }
}

/// Occupancy of every pool, for memory reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheUsage {
   pub parents: usize,
   pub parent_capacity: usize,
   pub settings: usize,
   pub settings_capacity: usize,
   pub collections: usize,
   pub collection_capacity: usize,
   pub chunks: usize,
   pub chunk_capacity: usize,
   /// Parents whose children are currently held in chunks
   pub large_parents: usize,
}

impl CacheUsage {
   pub fn total_entries(&self) -> usize {
      self.parents + self.settings + self.collections + self.chunks
   }

   pub fn total_capacity(&self) -> usize {
      self.parent_capacity + self.settings_capacity + self.collection_capacity + self.chunk_capacity
   }

   /// Occupied fraction of the combined capacity.
   pub fn utilization(&self) -> f64 {
      match self.total_capacity() {
         0 => 0.0,
         capacity => self.total_entries() as f64 / capacity as f64,
      }
   }
}

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a [`TieredCache`](crate::TieredCache).
///
/// Capacities are entry counts. A capacity or page size of zero is treated as one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
   /// Maximum number of cached parent records.
   ///
   /// Default: 200.
   pub parent_capacity: usize,

   /// Maximum number of cached settings records.
   ///
   /// Default: 500.
   pub settings_capacity: usize,

   /// Maximum number of whole child collections (small parents).
   ///
   /// Default: 20.
   pub collection_capacity: usize,

   /// Maximum number of child chunks (large parents).
   ///
   /// Default: 50.
   pub chunk_capacity: usize,

   /// Children per chunk. A parent with more children than this is stored in chunks.
   ///
   /// Default: 100.
   pub page_size: usize,

   /// Seconds between background sweeps that empty every pool.
   ///
   /// Default: 1800 (30 minutes).
   pub maintenance_interval_secs: u64,
}

impl Default for CacheConfig {
   fn default() -> Self {
      Self {
         parent_capacity: 200,
         settings_capacity: 500,
         collection_capacity: 20,
         chunk_capacity: 50,
         page_size: 100,
         maintenance_interval_secs: 30 * 60,
      }
   }
}

impl CacheConfig {
   /// Creates a configuration with the default capacities.
   pub fn new() -> Self {
      Self::default()
   }

   pub fn with_parent_capacity(mut self, capacity: usize) -> Self {
      self.parent_capacity = capacity;
      self
   }

   pub fn with_settings_capacity(mut self, capacity: usize) -> Self {
      self.settings_capacity = capacity;
      self
   }

   pub fn with_collection_capacity(mut self, capacity: usize) -> Self {
      self.collection_capacity = capacity;
      self
   }

   pub fn with_chunk_capacity(mut self, capacity: usize) -> Self {
      self.chunk_capacity = capacity;
      self
   }

   /// Sets the chunk size and the large-collection threshold.
   pub fn with_page_size(mut self, page_size: usize) -> Self {
      self.page_size = page_size;
      self
   }

   pub fn with_maintenance_interval(mut self, interval: Duration) -> Self {
      self.maintenance_interval_secs = interval.as_secs();
      self
   }

   pub fn maintenance_interval(&self) -> Duration {
      Duration::from_secs(self.maintenance_interval_secs.max(1))
   }

   pub(crate) fn effective_page_size(&self) -> usize {
      self.page_size.max(1)
   }
}

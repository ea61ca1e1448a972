//! Configuration for a [`NovelStore`](crate::NovelStore)

use serde::{Deserialize, Serialize};
use sqlx_sqlite_handle_pool::PoolConfig;
use tiered_record_cache::CacheConfig;

/// Top-level store configuration
///
/// Every field has a default, so a partial JSON document is enough:
///
/// ```
/// use novel_store::StoreConfig;
///
/// let config: StoreConfig =
///     serde_json::from_str(r#"{ "cache": { "page_size": 50 } }"#).unwrap();
/// assert_eq!(config.cache.page_size, 50);
/// assert_eq!(config.pool.max_idle_handles, 3);
/// assert!(config.background_maintenance);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
   pub pool: PoolConfig,
   pub cache: CacheConfig,

   /// Run the periodic cache sweep in the background
   ///
   /// Default: true
   pub background_maintenance: bool,
}

impl Default for StoreConfig {
   fn default() -> Self {
      Self {
         pool: PoolConfig::default(),
         cache: CacheConfig::default(),
         background_maintenance: true,
      }
   }
}

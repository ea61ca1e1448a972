//! # tiered-record-cache
//!
//! Bounded in-memory caching for record stores that serve parent records, the
//! ordered child collections under each parent, and per-child settings.
//!
//! ## Core Types
//!
//! - **[`TieredCache`]**: The four pools (parents, settings, whole collections, pages)
//! - **[`BoundedPool`]**: One LRU pool with hit/miss counters
//! - **[`CacheConfig`]**: Capacities, page size and maintenance period
//! - **[`CacheStats`]** / **[`CacheUsage`]**: Hit rates and occupancy
//! - **[`MaintenanceHandle`]**: Background task that periodically empties the cache
//!
//! ## Large collections
//!
//! A parent with more children than the page size is marked large and its
//! collection is cached as pages. Range reads are served from exactly the pages
//! that cover the window and are a miss if any of them is missing.
//!
//! ```
//! use tiered_record_cache::{CacheConfig, TieredCache};
//!
//! let cache: TieredCache<String, bool, u32> = TieredCache::new(CacheConfig::default());
//! cache.put_children(7, (0..250).collect());
//!
//! assert!(cache.is_large(7));
//! assert_eq!(cache.get_children_range(7, 150, 160), Some((150..160).collect()));
//!
//! cache.invalidate_parent(7);
//! assert_eq!(cache.get_children(7), None);
//! ```
//!
mod bounded;
mod cache;
mod config;
mod maintenance;
mod stats;

pub use bounded::BoundedPool;
pub use cache::{ChunkKey, Generation, TieredCache};
pub use config::CacheConfig;
pub use maintenance::{MaintenanceHandle, spawn_maintenance};
pub use stats::{CacheStats, CacheUsage, TierStats};

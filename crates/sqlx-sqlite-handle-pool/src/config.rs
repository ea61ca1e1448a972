//! Configuration for SQLite handle pools

use serde::{Deserialize, Serialize};

/// Configuration for a [`SqliteHandlePool`](crate::SqliteHandlePool)
///
/// # Examples
///
/// ```
/// use sqlx_sqlite_handle_pool::PoolConfig;
///
/// // Use defaults
/// let config = PoolConfig::default();
///
/// // Override just one field
/// let config = PoolConfig {
///     max_idle_handles: 1,
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
   /// Maximum number of released handles kept open for reuse
   ///
   /// Handles released while this many are already idle are closed instead.
   ///
   /// Default: 3
   pub max_idle_handles: usize,

   /// Maximum number of handles checked out at the same time
   ///
   /// Acquisitions beyond this wait until another handle is released.
   ///
   /// Default: 8
   pub max_open_handles: usize,

   /// How long a handle waits on a locked database before failing (in seconds)
   ///
   /// Default: 5
   pub busy_timeout_secs: u64,
}

impl Default for PoolConfig {
   fn default() -> Self {
      Self {
         max_idle_handles: 3,
         max_open_handles: 8,
         busy_timeout_secs: 5,
      }
   }
}

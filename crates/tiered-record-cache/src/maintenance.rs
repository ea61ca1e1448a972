//! Periodic background sweep of a shared cache

use crate::cache::TieredCache;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

/// Handle to a running maintenance task.
///
/// The task stops when [`stop`](Self::stop) is called, when this handle is
/// dropped, or on its own once the cache it sweeps has been dropped.
#[derive(Debug)]
pub struct MaintenanceHandle {
   task: JoinHandle<()>,
}

impl MaintenanceHandle {
   pub fn stop(&self) {
      self.task.abort();
   }

   pub fn is_finished(&self) -> bool {
      self.task.is_finished()
   }
}

impl Drop for MaintenanceHandle {
   fn drop(&mut self) {
      self.task.abort();
   }
}

/// Start a tokio task that empties `cache` every `period`.
///
/// The first sweep happens one full period after the call. The task only holds a
/// weak reference, so it never keeps the cache alive.
///
/// Must be called from within a tokio runtime.
pub fn spawn_maintenance<P, S, C>(cache: &Arc<TieredCache<P, S, C>>, period: Duration) -> MaintenanceHandle
where
   P: Clone + Send + Sync + 'static,
   S: Clone + Send + Sync + 'static,
   C: Clone + Send + Sync + 'static,
{
   let period = period.max(Duration::from_millis(1));
   let cache = Arc::downgrade(cache);

   let task = tokio::spawn(async move {
      let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
      ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

      loop {
         ticker.tick().await;

         let Some(cache) = cache.upgrade() else {
            debug!("cache dropped; stopping maintenance");
            break;
         };
         let evicted = cache.invalidate_all();
         debug!(evicted, "cache maintenance sweep");
      }
   });

   MaintenanceHandle { task }
}

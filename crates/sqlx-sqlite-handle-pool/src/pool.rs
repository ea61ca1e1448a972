//! Bounded pool of raw SQLite handles

use crate::Result;
use crate::config::PoolConfig;
use crate::error::Error;
use crate::handle::{HandleMode, PooledHandle};
use crate::transaction::PooledTransaction;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection};
use sqlx::{ConnectOptions, Connection};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, trace, warn};

struct IdleHandle {
   conn: SqliteConnection,
   mode: HandleMode,
}

/// State shared between the pool and the handles it has handed out
pub(crate) struct PoolShared {
   path: PathBuf,
   config: PoolConfig,

   /// Released handles waiting for reuse, never more than `max_idle_handles`
   idle: Mutex<Vec<IdleHandle>>,

   /// Bounds how many handles are checked out at once
   permits: Arc<Semaphore>,

   /// Tracks if WAL mode has been initialized (set on first read-write handle)
   wal_initialized: AtomicBool,

   /// Marks the pool as shut down; flipped while holding the idle lock
   closed: AtomicBool,

   opened: AtomicU64,
   closed_handles: AtomicU64,
}

impl PoolShared {
   pub(crate) fn note_closed(&self) {
      self.closed_handles.fetch_add(1, Ordering::Relaxed);
   }

   /// Return a handle to the idle set, or close it when it cannot be kept
   pub(crate) fn release(&self, conn: SqliteConnection, mode: HandleMode, reusable: bool) {
      if reusable {
         let mut idle = self.idle.lock();
         if !self.closed.load(Ordering::SeqCst) && idle.len() < self.config.max_idle_handles {
            idle.push(IdleHandle { conn, mode });
            trace!(?mode, idle = idle.len(), "handle returned to pool");
            return;
         }
      }

      // Dropping the connection closes the underlying SQLite handle
      debug!(?mode, reusable, "closing released handle");
      self.note_closed();
      drop(conn);
   }

   fn take_idle(&self, mode: HandleMode) -> Option<SqliteConnection> {
      let mut idle = self.idle.lock();
      let position = idle.iter().position(|h| h.mode == mode)?;
      Some(idle.swap_remove(position).conn)
   }
}

/// Point-in-time view of pool usage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
   /// Handles currently idle and available for reuse
   pub idle: usize,
   /// Upper bound on idle handles
   pub max_idle: usize,
   /// Handles currently checked out
   pub in_use: usize,
   /// Upper bound on checked-out handles
   pub max_open: usize,
   /// Handles opened over the pool's lifetime
   pub opened: u64,
   /// Handles closed over the pool's lifetime
   pub closed: u64,
   pub is_closed: bool,
}

impl PoolStats {
   /// Fraction of the idle capacity currently occupied
   pub fn utilization(&self) -> f64 {
      if self.max_idle == 0 {
         return 0.0;
      }
      self.idle as f64 / self.max_idle as f64
   }
}

/// A bounded pool of SQLite handles for one database file.
///
/// Handles are opened either read-only or read-write. A released handle is kept
/// for reuse while fewer than `max_idle_handles` are idle and is closed otherwise.
/// Acquisition only reuses an idle handle opened with the same mode.
///
/// Cloning the pool is cheap; clones share the same handles.
///
/// # Example
///
/// ```no_run
/// use sqlx_sqlite_handle_pool::{HandleMode, SqliteHandlePool};
///
/// # async fn example() -> Result<(), sqlx_sqlite_handle_pool::Error> {
/// let pool = SqliteHandlePool::open("test.db", None).await?;
///
/// let mut reader = pool.acquire_read().await?;
/// let rows = sqlx::query("SELECT * FROM users")
///     .fetch_all(&mut *reader)
///     .await?;
/// drop(reader);
///
/// pool.shutdown().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct SqliteHandlePool {
   shared: Arc<PoolShared>,
}

impl SqliteHandlePool {
   /// Open a pool for the database at `path`
   ///
   /// The database file is created if it doesn't exist. No handle is kept open
   /// until the first acquisition. WAL mode is enabled when the first read-write
   /// handle is opened.
   ///
   /// # Arguments
   ///
   /// * `path` - Path to the SQLite database file (will be created if missing)
   /// * `custom_config` - Optional pool configuration. Pass `None` for the defaults
   ///   (3 idle handles, 8 concurrently checked out, 5 second busy timeout).
   pub async fn open(path: impl AsRef<Path>, custom_config: Option<PoolConfig>) -> Result<Self> {
      let config = custom_config.unwrap_or_default();
      let path = path.as_ref();

      if path.as_os_str().is_empty() {
         return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "Database path cannot be empty",
         )));
      }

      // A read-only handle cannot create the file, and the first acquisition
      // may well be a read
      if !path.exists() {
         let conn = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .read_only(false)
            .connect()
            .await
            .map_err(Error::HandleUnavailable)?;
         conn.close().await?;
      }

      let max_open = config.max_open_handles.max(1);

      Ok(Self {
         shared: Arc::new(PoolShared {
            path: path.to_path_buf(),
            idle: Mutex::new(Vec::with_capacity(config.max_idle_handles)),
            permits: Arc::new(Semaphore::new(max_open)),
            config: PoolConfig {
               max_open_handles: max_open,
               ..config
            },
            wal_initialized: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            opened: AtomicU64::new(0),
            closed_handles: AtomicU64::new(0),
         }),
      })
   }

   /// Path of the database file this pool serves
   pub fn path(&self) -> &Path {
      &self.shared.path
   }

   pub fn config(&self) -> &PoolConfig {
      &self.shared.config
   }

   pub fn is_closed(&self) -> bool {
      self.shared.closed.load(Ordering::SeqCst)
   }

   /// Acquire a read-only handle
   pub async fn acquire_read(&self) -> Result<PooledHandle> {
      self.acquire(HandleMode::ReadOnly).await
   }

   /// Acquire a read-write handle
   ///
   /// The first read-write handle opened by the pool switches the database to
   /// WAL journal mode.
   pub async fn acquire_write(&self) -> Result<PooledHandle> {
      self.acquire(HandleMode::ReadWrite).await
   }

   /// Acquire a handle in the given mode, reusing an idle one when possible
   ///
   /// Waits when `max_open_handles` handles are already checked out.
   pub async fn acquire(&self, mode: HandleMode) -> Result<PooledHandle> {
      if self.is_closed() {
         return Err(Error::PoolClosed);
      }

      let permit = Arc::clone(&self.shared.permits)
         .acquire_owned()
         .await
         .map_err(|_| Error::PoolClosed)?;

      let conn = match self.take_live_idle(mode).await {
         Some(conn) => {
            trace!(?mode, "reusing idle handle");
            conn
         }
         None => self.open_handle(mode).await?,
      };

      Ok(PooledHandle::new(conn, mode, Arc::clone(&self.shared), permit))
   }

   /// First idle handle of `mode` that still answers a ping; dead ones are closed
   async fn take_live_idle(&self, mode: HandleMode) -> Option<SqliteConnection> {
      while let Some(mut conn) = self.shared.take_idle(mode) {
         match conn.ping().await {
            Ok(()) => return Some(conn),
            Err(e) => {
               warn!(?mode, error = %e, "dropping dead idle handle");
               self.shared.note_closed();
            }
         }
      }
      None
   }

   /// Release a handle back to the pool
   ///
   /// Equivalent to dropping it.
   pub fn release(&self, handle: PooledHandle) {
      drop(handle);
   }

   async fn open_handle(&self, mode: HandleMode) -> Result<SqliteConnection> {
      let options = SqliteConnectOptions::new()
         .filename(&self.shared.path)
         .read_only(mode == HandleMode::ReadOnly)
         .busy_timeout(Duration::from_secs(self.shared.config.busy_timeout_secs));

      let mut conn = options.connect().await.map_err(Error::HandleUnavailable)?;
      self.shared.opened.fetch_add(1, Ordering::Relaxed);
      debug!(?mode, path = %self.shared.path.display(), "opened database handle");

      if mode == HandleMode::ReadWrite {
         // Journal mode is persistent, so only the first writer needs to set it
         if !self.shared.wal_initialized.load(Ordering::SeqCst) {
            sqlx::query("PRAGMA journal_mode = WAL")
               .execute(&mut conn)
               .await?;
            self.shared.wal_initialized.store(true, Ordering::SeqCst);
         }

         // https://www.sqlite.org/wal.html#performance_considerations
         sqlx::query("PRAGMA synchronous = NORMAL")
            .execute(&mut conn)
            .await?;
      }

      Ok(conn)
   }

   /// Run `f` with a handle in the given mode
   ///
   /// The handle is released however `f` finishes, including when the returned
   /// future is dropped early. When `f` fails the handle is closed rather than
   /// kept for reuse.
   ///
   /// # Example
   ///
   /// ```no_run
   /// use sqlx_sqlite_handle_pool::{HandleMode, SqliteHandlePool};
   ///
   /// # async fn example(pool: SqliteHandlePool) -> Result<(), sqlx_sqlite_handle_pool::Error> {
   /// let count: i64 = pool
   ///     .with_handle(HandleMode::ReadOnly, |conn| {
   ///         Box::pin(async move {
   ///             let count = sqlx::query_scalar("SELECT COUNT(*) FROM users")
   ///                 .fetch_one(conn)
   ///                 .await?;
   ///             Ok::<_, sqlx_sqlite_handle_pool::Error>(count)
   ///         })
   ///     })
   ///     .await?;
   /// # Ok(())
   /// # }
   /// ```
   pub async fn with_handle<F, T, E>(&self, mode: HandleMode, f: F) -> std::result::Result<T, E>
   where
      F: for<'c> FnOnce(&'c mut SqliteConnection) -> BoxFuture<'c, std::result::Result<T, E>>,
      E: From<Error>,
   {
      let mut handle = self.acquire(mode).await?;
      let result = f(&mut *handle).await;
      if result.is_err() {
         handle.discard();
      }
      result
   }

   /// Begin an immediate transaction on a read-write handle
   ///
   /// Dropping the returned transaction without committing closes its handle,
   /// which rolls the work back.
   pub async fn begin(&self) -> Result<PooledTransaction> {
      let handle = self.acquire_write().await?;
      PooledTransaction::begin(handle).await
   }

   /// Run `f` inside an immediate transaction
   ///
   /// Commits when `f` succeeds and rolls back when it fails. A handle whose
   /// transaction failed is closed after the rollback. If the rollback itself
   /// fails [`Error::TransactionRollbackFailed`] is returned.
   pub async fn with_transaction<F, T, E>(&self, f: F) -> std::result::Result<T, E>
   where
      F: for<'c> FnOnce(&'c mut SqliteConnection) -> BoxFuture<'c, std::result::Result<T, E>>,
      E: From<Error> + std::fmt::Display,
   {
      let mut tx = self.begin().await?;

      match f(&mut *tx).await {
         Ok(value) => {
            tx.commit().await?;
            Ok(value)
         }
         Err(transaction_error) => match tx.discard().rollback().await {
            Ok(()) => Err(transaction_error),
            Err(rollback_error) => {
               warn!(error = %rollback_error, "rollback failed after transaction error");
               Err(E::from(Error::TransactionRollbackFailed {
                  transaction_error: transaction_error.to_string(),
                  rollback_error: rollback_error.to_string(),
               }))
            }
         },
      }
   }

   /// Snapshot of the pool's counters
   pub fn stats(&self) -> PoolStats {
      let shared = &self.shared;
      let max_open = shared.config.max_open_handles;

      PoolStats {
         idle: shared.idle.lock().len(),
         max_idle: shared.config.max_idle_handles,
         in_use: max_open.saturating_sub(shared.permits.available_permits()),
         max_open,
         opened: shared.opened.load(Ordering::Relaxed),
         closed: shared.closed_handles.load(Ordering::Relaxed),
         is_closed: self.is_closed(),
      }
   }

   /// Shut the pool down and close every idle handle
   ///
   /// Later acquisitions fail with [`Error::PoolClosed`]. Handles still checked
   /// out are closed when they are released. Calling this more than once is a
   /// no-op.
   pub async fn shutdown(&self) -> Result<()> {
      let drained = {
         let mut idle = self.shared.idle.lock();
         if self.shared.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
         }
         std::mem::take(&mut *idle)
      };

      self.shared.permits.close();

      // Flush the WAL into the main file while a writer is at hand
      let mut checkpointed = !self.shared.wal_initialized.load(Ordering::SeqCst);
      let count = drained.len();

      for IdleHandle { mut conn, mode } in drained {
         if !checkpointed && mode == HandleMode::ReadWrite {
            if let Err(e) = sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
               .execute(&mut conn)
               .await
            {
               warn!(error = %e, "WAL checkpoint failed during shutdown");
            }
            checkpointed = true;
         }

         self.shared.note_closed();
         if let Err(e) = conn.close().await {
            warn!(error = %e, "failed to close idle handle");
         }
      }

      info!(path = %self.shared.path.display(), closed = count, "connection pool shut down");
      Ok(())
   }

   /// Shut the pool down and delete the database files
   ///
   /// Removes the database file along with its WAL and SHM files. Use with caution!
   pub async fn remove(self) -> Result<()> {
      self.shutdown().await?;

      let path = self.shared.path.clone();
      std::fs::remove_file(&path).map_err(Error::Io)?;

      // These files may not exist if WAL was never initialized
      for suffix in ["-wal", "-shm"] {
         let mut sidecar = path.clone().into_os_string();
         sidecar.push(suffix);
         if let Err(e) = std::fs::remove_file(&sidecar)
            && e.kind() != std::io::ErrorKind::NotFound
         {
            return Err(Error::Io(e));
         }
      }

      Ok(())
   }
}

impl std::fmt::Debug for SqliteHandlePool {
   fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
      f.debug_struct("SqliteHandlePool")
         .field("path", &self.shared.path)
         .field("config", &self.shared.config)
         .field("closed", &self.is_closed())
         .finish()
   }
}

#[cfg(test)]
mod tests {
   use super::*;
   use tempfile::TempDir;

   async fn create_pool(config: Option<PoolConfig>) -> (SqliteHandlePool, TempDir) {
      let temp_dir = TempDir::new().unwrap();
      let pool = SqliteHandlePool::open(temp_dir.path().join("pool.db"), config)
         .await
         .unwrap();
      (pool, temp_dir)
   }

   #[tokio::test]
   async fn test_open_creates_file() {
      let (pool, _temp) = create_pool(None).await;
      assert!(pool.path().exists());
      assert_eq!(pool.stats().opened, 0);
   }

   #[tokio::test]
   async fn test_empty_path_rejected() {
      let result = SqliteHandlePool::open("", None).await;
      assert!(matches!(result, Err(Error::Io(_))));
   }

   #[tokio::test]
   async fn test_first_writer_enables_wal() {
      let (pool, _temp) = create_pool(None).await;

      let mut writer = pool.acquire_write().await.unwrap();
      let mode: String = sqlx::query_scalar("PRAGMA journal_mode")
         .fetch_one(&mut *writer)
         .await
         .unwrap();
      assert_eq!(mode.to_lowercase(), "wal");
   }

   #[tokio::test]
   async fn test_mode_mismatch_opens_new_handle() {
      let (pool, _temp) = create_pool(None).await;

      drop(pool.acquire_read().await.unwrap());
      assert_eq!(pool.stats().idle, 1);

      // Idle reader must not be handed out as a writer
      let writer = pool.acquire_write().await.unwrap();
      assert_eq!(writer.mode(), HandleMode::ReadWrite);
      assert_eq!(pool.stats().opened, 2);
      assert_eq!(pool.stats().idle, 1);
   }

   #[tokio::test]
   async fn test_discarded_handle_is_closed() {
      let (pool, _temp) = create_pool(None).await;

      let mut reader = pool.acquire_read().await.unwrap();
      reader.discard();
      drop(reader);

      let stats = pool.stats();
      assert_eq!(stats.idle, 0);
      assert_eq!(stats.closed, 1);
   }

   #[tokio::test]
   async fn test_live_idle_handle_is_reused() {
      let (pool, _temp) = create_pool(None).await;

      drop(pool.acquire_write().await.unwrap());
      assert!(pool.take_live_idle(HandleMode::ReadOnly).await.is_none());

      let conn = pool.take_live_idle(HandleMode::ReadWrite).await;
      assert!(conn.is_some());
      assert_eq!(pool.stats().idle, 0);
      assert_eq!(pool.stats().closed, 0);
   }

   #[tokio::test]
   async fn test_utilization() {
      let stats = PoolStats {
         idle: 3,
         max_idle: 3,
         in_use: 0,
         max_open: 8,
         opened: 3,
         closed: 0,
         is_closed: false,
      };
      assert_eq!(stats.utilization(), 1.0);

      let empty = PoolStats { max_idle: 0, idle: 0, ..stats };
      assert_eq!(empty.utilization(), 0.0);
   }
}

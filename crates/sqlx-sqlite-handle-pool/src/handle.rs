//! PooledHandle RAII guard returned by the pool

use crate::pool::PoolShared;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::Connection;
use sqlx::sqlite::SqliteConnection;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use tokio::sync::OwnedSemaphorePermit;

const EXPECT_MSG: &str = "BUG: pooled connection already taken";

/// Access mode a handle was opened with
///
/// Idle handles are only reused for acquisitions asking for the same mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HandleMode {
   ReadOnly,
   ReadWrite,
}

/// RAII guard for a checked-out database handle
///
/// Dropping the guard releases the handle: it goes back to the idle set when
/// there is room and it is still healthy, otherwise it is closed. A handle
/// dropped while a transaction is still open is always closed, which rolls the
/// transaction back.
///
/// The guard derefs to `SqliteConnection` allowing direct use with sqlx queries.
///
/// # Example
///
/// ```no_run
/// use sqlx_sqlite_handle_pool::SqliteHandlePool;
///
/// # async fn example() -> Result<(), sqlx_sqlite_handle_pool::Error> {
/// let pool = SqliteHandlePool::open("test.db", None).await?;
/// let mut writer = pool.acquire_write().await?;
/// sqlx::query("INSERT INTO users (name) VALUES (?)")
///     .bind("Alice")
///     .execute(&mut *writer)
///     .await?;
/// // Released when dropped
/// # Ok(())
/// # }
/// ```
pub struct PooledHandle {
   conn: Option<SqliteConnection>,
   mode: HandleMode,
   reusable: bool,
   in_transaction: bool,
   shared: Arc<PoolShared>,
   _permit: OwnedSemaphorePermit,
}

impl PooledHandle {
   pub(crate) fn new(
      conn: SqliteConnection,
      mode: HandleMode,
      shared: Arc<PoolShared>,
      permit: OwnedSemaphorePermit,
   ) -> Self {
      Self {
         conn: Some(conn),
         mode,
         reusable: true,
         in_transaction: false,
         shared,
         _permit: permit,
      }
   }

   /// Mode this handle was opened with
   pub fn mode(&self) -> HandleMode {
      self.mode
   }

   /// Mark the handle as broken so it is closed instead of reused on release
   pub fn discard(&mut self) {
      self.reusable = false;
   }

   /// Whether the handle will be offered back to the idle set on release
   pub fn is_reusable(&self) -> bool {
      self.reusable && !self.in_transaction
   }

   pub(crate) fn set_in_transaction(&mut self, in_transaction: bool) {
      self.in_transaction = in_transaction;
   }

   /// Close the handle now instead of releasing it
   pub async fn close(mut self) -> Result<()> {
      let Some(conn) = self.conn.take() else {
         return Ok(());
      };

      self.shared.note_closed();
      conn.close().await.map_err(Error::Sqlx)
   }
}

impl Deref for PooledHandle {
   type Target = SqliteConnection;

   fn deref(&self) -> &Self::Target {
      self.conn.as_ref().expect(EXPECT_MSG)
   }
}

impl DerefMut for PooledHandle {
   fn deref_mut(&mut self) -> &mut Self::Target {
      self.conn.as_mut().expect(EXPECT_MSG)
   }
}

impl Drop for PooledHandle {
   fn drop(&mut self) {
      if let Some(conn) = self.conn.take() {
         let reusable = self.is_reusable();
         self.shared.release(conn, self.mode, reusable);
      }
   }
}

impl std::fmt::Debug for PooledHandle {
   fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
      f.debug_struct("PooledHandle")
         .field("mode", &self.mode)
         .field("reusable", &self.reusable)
         .field("in_transaction", &self.in_transaction)
         .finish()
   }
}

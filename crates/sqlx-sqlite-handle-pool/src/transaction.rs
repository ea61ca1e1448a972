//! Immediate transactions on pooled read-write handles

use crate::Result;
use crate::handle::PooledHandle;
use sqlx::sqlite::SqliteConnection;
use std::ops::{Deref, DerefMut};
use tracing::debug;

/// An open `BEGIN IMMEDIATE` transaction holding a read-write handle
///
/// Call [`commit`](Self::commit) or [`rollback`](Self::rollback) to finish it.
/// If the transaction is dropped unfinished its handle is closed rather than
/// returned to the pool, and SQLite discards the uncommitted work.
#[derive(Debug)]
pub struct PooledTransaction {
   handle: PooledHandle,
}

impl PooledTransaction {
   pub(crate) async fn begin(mut handle: PooledHandle) -> Result<Self> {
      sqlx::query("BEGIN IMMEDIATE").execute(&mut *handle).await?;
      handle.set_in_transaction(true);
      Ok(Self { handle })
   }

   /// Commit the transaction and release the handle
   pub async fn commit(mut self) -> Result<()> {
      sqlx::query("COMMIT").execute(&mut *self.handle).await?;
      self.handle.set_in_transaction(false);
      Ok(())
   }

   /// Close the handle once the transaction finishes instead of returning it
   pub fn discard(mut self) -> Self {
      self.handle.discard();
      self
   }

   /// Roll the transaction back and release the handle
   pub async fn rollback(mut self) -> Result<()> {
      if let Err(e) = sqlx::query("ROLLBACK").execute(&mut *self.handle).await {
         self.handle.discard();
         return Err(e.into());
      }
      self.handle.set_in_transaction(false);
      debug!("transaction rolled back");
      Ok(())
   }
}

impl Deref for PooledTransaction {
   type Target = SqliteConnection;

   fn deref(&self) -> &Self::Target {
      &self.handle
   }
}

impl DerefMut for PooledTransaction {
   fn deref_mut(&mut self) -> &mut Self::Target {
      &mut self.handle
   }
}

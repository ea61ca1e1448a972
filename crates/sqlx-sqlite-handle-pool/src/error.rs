//! Error types for sqlx-sqlite-handle-pool

use thiserror::Error;

/// Errors that may occur when working with sqlx-sqlite-handle-pool
#[derive(Error, Debug)]
pub enum Error {
   /// IO error when accessing database files. Standard library IO errors
   /// are converted to this variant.
   #[error("IO error: {0}")]
   Io(#[from] std::io::Error),

   /// Error from the sqlx library. Standard sqlx errors are converted to this variant
   #[error("Sqlx error: {0}")]
   Sqlx(#[from] sqlx::Error),

   /// The pool has been shut down and cannot hand out handles
   #[error("Connection pool has been shut down")]
   PoolClosed,

   /// A new handle could not be opened
   #[error("Unable to open database handle: {0}")]
   HandleUnavailable(#[source] sqlx::Error),

   /// No compiled statement is registered under the given name
   #[error("Prepared statement '{0}' is not available")]
   StatementUnavailable(String),

   /// The scoped transaction failed and so did its rollback
   #[error("Transaction failed: {transaction_error}; rollback also failed: {rollback_error}")]
   TransactionRollbackFailed {
      transaction_error: String,
      rollback_error: String,
   },
}

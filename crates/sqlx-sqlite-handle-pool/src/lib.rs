//! # sqlx-sqlite-handle-pool
//!
//! A small pool of raw SQLite handles built on SQLx, plus a registry of named
//! compiled write statements.
//!
//! ## Core Types
//!
//! - **[`SqliteHandlePool`]**: Bounded pool handing out read-only or read-write handles
//! - **[`PooledHandle`]**: RAII guard; dropping it releases the handle
//! - **[`PooledTransaction`]**: `BEGIN IMMEDIATE` transaction on a pooled writer
//! - **[`StatementRegistry`]**: Named statements compiled once and executed many times
//! - **[`PoolConfig`]**: Pool sizing and busy timeout
//! - **[`Error`]**: Error type for pool operations
//!
//! ## Architecture
//!
//! - **Mode-matched reuse**: an idle handle is only handed out for the mode it was opened with
//! - **Bounded idle set**: released handles beyond `max_idle_handles` are closed
//! - **Bounded checkout**: at most `max_open_handles` handles are in use at once
//! - **Lazy WAL mode**: Write-Ahead Logging enabled when the first writer is opened
//!
//! ## Usage
//!
//! ```no_run
//! use serde_json::json;
//! use sqlx_sqlite_handle_pool::{SqliteHandlePool, StatementRegistry};
//!
//! #[tokio::main]
//! async fn main() -> sqlx_sqlite_handle_pool::Result<()> {
//!     let pool = SqliteHandlePool::open("example.db", None).await?;
//!     let statements = StatementRegistry::new();
//!
//!     let mut writer = pool.acquire_write().await?;
//!     statements
//!         .compile(&mut writer, "insert_user", "INSERT INTO users (name) VALUES (?)")
//!         .await?;
//!     let result = statements
//!         .execute(&mut writer, "insert_user", vec![json!("Alice")])
//!         .await?;
//!     println!("inserted row {}", result.last_insert_id);
//!     drop(writer);
//!
//!     statements.close();
//!     pool.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
mod bind;
mod config;
mod error;
mod handle;
mod pool;
mod statements;
mod transaction;

// Re-export public types
pub use bind::bind_value;
pub use config::PoolConfig;
pub use error::Error;
pub use handle::{HandleMode, PooledHandle};
pub use pool::{PoolStats, SqliteHandlePool};
pub use statements::{StatementRegistry, WriteQueryResult};
pub use transaction::PooledTransaction;

/// A type alias for Results with our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

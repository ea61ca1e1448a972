//! # novel-store
//!
//! Local storage for a novel reader: novels, their chapters, per-chapter reading
//! state, genres and large preferences, kept in SQLite behind a tiered cache.
//!
//! ## Layers
//!
//! - **[`NovelStore`]**: the façade every caller uses
//! - **[`NovelCache`]**: bounded LRU pools for novels, chapter settings and
//!   chapter lists; large chapter lists are cached in fixed-size pages
//! - **[`SqliteHandlePool`](sqlx_sqlite_handle_pool::SqliteHandlePool)**: reusable
//!   read-only and read-write SQLite handles
//! - **[`schema_migrator`]**: upgrades databases written by older versions to
//!   [`SCHEMA_VERSION`]
//!
//! ## Consistency
//!
//! Writes reach SQLite before the cache. A write that fails leaves the cache as
//! it was, and a write that succeeds either refreshes or invalidates the
//! affected entries. Reads that miss the cache fill it from SQLite.
//!
//! ## Example
//!
//! ```no_run
//! use novel_store::{ChapterSettings, Novel, NovelStore, StoreConfig};
//!
//! # async fn example() -> novel_store::Result<()> {
//! let store = NovelStore::open("library.db", Some(StoreConfig::default())).await?;
//!
//! let mut novel = Novel::new("A Novel", "https://example.com/a-novel");
//! let id = store.insert_novel(&mut novel).await?;
//!
//! let mut settings = ChapterSettings::new("https://example.com/a-novel/1", id, "Chapter 1");
//! store.insert_chapter_settings(&settings).await?;
//!
//! settings.is_read = true;
//! store.update_chapter_settings(&settings).await?;
//!
//! store.shutdown().await?;
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod migrations;
mod models;
mod statements;
mod store;

pub use config::StoreConfig;
pub use error::{Error, Result};
pub use migrations::{
   CHAPTER_SETTINGS_TABLE, CHAPTER_TABLE, DOWNLOAD_TABLE, GENRE_TABLE, LARGE_PREFERENCE_TABLE,
   NOVEL_GENRE_TABLE, NOVEL_SECTION_TABLE, NOVEL_TABLE, READING_HISTORY_PREFERENCE, SCHEMA_VERSION,
   SOURCE_TABLE, prepare_schema, schema_migrator,
};
pub use models::{
   Chapter, ChapterSettings, DEFAULT_SECTION_ID, Metadata, Novel, UNKNOWN_SOURCE_ID,
};
pub use statements::{NAMED_STATEMENTS, NamedStatement};
pub use store::{NovelCache, NovelStore};

pub use sqlx_sqlite_handle_pool::{PoolConfig, PoolStats};
pub use tiered_record_cache::{CacheConfig, CacheStats, CacheUsage};

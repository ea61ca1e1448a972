//! The cached, pooled store façade

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use sqlx_sqlite_handle_pool::{HandleMode, PoolStats, SqliteHandlePool, StatementRegistry};
use tiered_record_cache::{
   CacheStats, CacheUsage, MaintenanceHandle, TieredCache, spawn_maintenance,
};
use tracing::{debug, info, trace};

use crate::config::StoreConfig;
use crate::migrations::prepare_schema;
use crate::models::{Chapter, ChapterSettings, Novel};
use crate::statements::{self, INSERT_CHAPTER, INSERT_CHAPTER_SETTINGS, INSERT_NOVEL};
use crate::statements::{UPDATE_CHAPTER_SETTINGS, UPDATE_NOVEL};
use crate::{Error, Result};

/// Cache of novels, chapter settings keyed by chapter URL, and chapter lists.
pub type NovelCache = TieredCache<Novel, ChapterSettings, Chapter>;

const SELECT_NOVEL_BY_ID: &str = "SELECT * FROM novel WHERE id = ?";
const SELECT_NOVEL_BY_URL: &str = "SELECT * FROM novel WHERE url = ? ORDER BY id LIMIT 1";
const DELETE_NOVEL: &str = "DELETE FROM novel WHERE id = ?";
const SELECT_CHAPTERS: &str = "SELECT * FROM web_page WHERE novel_id = ? ORDER BY order_id";
const SELECT_CHAPTERS_BY_TRANSLATOR: &str = "SELECT * FROM web_page \
   WHERE novel_id = ? AND translator_source_name = ? ORDER BY order_id";
const COUNT_CHAPTERS: &str = "SELECT COUNT(*) FROM web_page WHERE novel_id = ?";
const SELECT_SETTINGS: &str = "SELECT * FROM web_page_settings WHERE url = ?";
const SELECT_GENRES: &str = "SELECT genre.name FROM genre \
   JOIN novel_genre ON novel_genre.genre_id = genre.id \
   WHERE novel_genre.novel_id = ? ORDER BY genre.name";
const SELECT_PREFERENCE: &str = "SELECT value FROM large_preference WHERE name = ?";
const UPSERT_PREFERENCE: &str = "INSERT INTO large_preference (name, value) VALUES (?, ?) \
   ON CONFLICT(name) DO UPDATE SET value = excluded.value";

struct StoreInner {
   pool: SqliteHandlePool,
   statements: Arc<StatementRegistry>,
   cache: Arc<NovelCache>,
   maintenance: Mutex<Option<MaintenanceHandle>>,
}

/// Storage for novels, their chapters and per-chapter reading state.
///
/// Reads go through a [`NovelCache`] and fall back to SQLite on a miss. Writes
/// go to SQLite first and touch the cache only after they commit, so a failed
/// write never leaves the cache ahead of the database.
///
/// Cloning is cheap; clones share the pool, statements and cache.
///
/// # Example
///
/// ```no_run
/// use novel_store::{Chapter, Novel, NovelStore};
///
/// # async fn example() -> novel_store::Result<()> {
/// let store = NovelStore::open("library.db", None).await?;
///
/// let mut novel = Novel::new("A Novel", "https://example.com/a-novel");
/// let id = store.insert_novel(&mut novel).await?;
///
/// store
///    .insert_chapters(vec![Chapter::new(id, 0, "https://example.com/a-novel/1", "Chapter 1")])
///    .await?;
/// let chapters = store.get_chapters(id).await?;
/// assert_eq!(chapters.len(), 1);
///
/// store.shutdown().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct NovelStore {
   inner: Arc<StoreInner>,
}

impl NovelStore {
   /// Open (creating if needed) the store at `path`
   ///
   /// Upgrades the schema to the current version, compiles the named write
   /// statements and, unless disabled, starts the background cache sweep. The
   /// sweep needs a tokio runtime with a timer.
   pub async fn open(path: impl AsRef<Path>, custom_config: Option<StoreConfig>) -> Result<Self> {
      let config = custom_config.unwrap_or_default();
      let pool = SqliteHandlePool::open(path, Some(config.pool.clone())).await?;

      let registry = Arc::new(StatementRegistry::new());
      {
         let mut writer = pool.acquire_write().await?;
         let report = prepare_schema(&mut writer).await?;
         let compiled = statements::compile_all(&registry, &mut writer).await;
         debug!(from = report.from, to = report.to, compiled, "store initialized");
      }

      let cache = Arc::new(NovelCache::new(config.cache.clone()));
      let maintenance = config
         .background_maintenance
         .then(|| spawn_maintenance(&cache, config.cache.maintenance_interval()));

      info!(path = %pool.path().display(), "opened novel store");

      Ok(Self {
         inner: Arc::new(StoreInner {
            pool,
            statements: registry,
            cache,
            maintenance: Mutex::new(maintenance),
         }),
      })
   }

   pub fn path(&self) -> &Path {
      self.inner.pool.path()
   }

   /// The cache in front of the database
   pub fn cache(&self) -> &NovelCache {
      &self.inner.cache
   }

   /// The registry of compiled write statements
   pub fn statements(&self) -> &StatementRegistry {
      &self.inner.statements
   }

   // ==========================================================================
   // Novels
   // ==========================================================================

   /// Fetch a novel by id, `None` when it does not exist
   pub async fn get_novel(&self, id: i64) -> Result<Option<Novel>> {
      if let Some(novel) = self.inner.cache.get_parent(id) {
         trace!(id, "novel cache hit");
         return Ok(Some(novel));
      }

      let generation = self.inner.cache.generation();
      let novel = self
         .inner
         .pool
         .with_handle(HandleMode::ReadOnly, move |conn| {
            Box::pin(async move {
               let novel = sqlx::query_as::<_, Novel>(SELECT_NOVEL_BY_ID)
                  .bind(id)
                  .fetch_optional(conn)
                  .await?;
               Ok::<_, Error>(novel)
            })
         })
         .await?;

      if let Some(novel) = &novel {
         self.inner.cache.put_parent_if(id, generation, novel.clone());
      }
      Ok(novel)
   }

   /// Fetch the novel with this URL
   ///
   /// URLs are not unique; the oldest matching novel wins.
   pub async fn get_novel_by_url(&self, url: &str) -> Result<Option<Novel>> {
      let url = url.to_string();
      let generation = self.inner.cache.generation();
      let novel = self
         .inner
         .pool
         .with_handle(HandleMode::ReadOnly, move |conn| {
            Box::pin(async move {
               let novel = sqlx::query_as::<_, Novel>(SELECT_NOVEL_BY_URL)
                  .bind(url)
                  .fetch_optional(conn)
                  .await?;
               Ok::<_, Error>(novel)
            })
         })
         .await?;

      if let Some(novel) = &novel
         && let Some(id) = novel.id
      {
         self.inner.cache.put_parent_if(id, generation, novel.clone());
      }
      Ok(novel)
   }

   /// Insert a new novel and assign its id
   ///
   /// Fails with [`Error::IdentityAlreadyAssigned`] if `novel.id` is already set.
   pub async fn insert_novel(&self, novel: &mut Novel) -> Result<i64> {
      if let Some(id) = novel.id {
         return Err(Error::IdentityAlreadyAssigned(id));
      }

      let values = statements::novel_values(novel)?;
      let registry = Arc::clone(&self.inner.statements);
      let result = self
         .inner
         .pool
         .with_handle(HandleMode::ReadWrite, move |conn| {
            Box::pin(async move { statements::run(&registry, conn, INSERT_NOVEL, values).await })
         })
         .await?;

      let id = result.last_insert_id;
      novel.id = Some(id);
      self.inner.cache.put_parent(id, novel.clone());
      debug!(id, "inserted novel");
      Ok(id)
   }

   /// Insert several novels in one transaction
   ///
   /// Either every novel is inserted or none is. Returns the novels with their
   /// assigned ids, in input order.
   pub async fn insert_novels(&self, novels: Vec<Novel>) -> Result<Vec<Novel>> {
      if let Some(id) = novels.iter().find_map(|novel| novel.id) {
         return Err(Error::IdentityAlreadyAssigned(id));
      }

      let values = novels
         .iter()
         .map(statements::novel_values)
         .collect::<Result<Vec<_>>>()?;
      let registry = Arc::clone(&self.inner.statements);
      let ids = self
         .inner
         .pool
         .with_transaction(move |conn| {
            Box::pin(async move {
               let mut ids = Vec::with_capacity(values.len());
               for novel_values in values {
                  let result = statements::run(&registry, conn, INSERT_NOVEL, novel_values).await?;
                  ids.push(result.last_insert_id);
               }
               Ok::<_, Error>(ids)
            })
         })
         .await?;

      let novels: Vec<Novel> = novels
         .into_iter()
         .zip(ids)
         .map(|(mut novel, id)| {
            novel.id = Some(id);
            novel
         })
         .collect();

      self.inner.cache.put_parents(
         novels
            .iter()
            .filter_map(|novel| novel.id.map(|id| (id, novel.clone()))),
      );
      debug!(count = novels.len(), "inserted novels");
      Ok(novels)
   }

   /// Overwrite a stored novel
   pub async fn update_novel(&self, novel: &Novel) -> Result<()> {
      let id = novel.id.ok_or(Error::MissingIdentity)?;
      let values = statements::update_novel_values(novel, id)?;
      let registry = Arc::clone(&self.inner.statements);
      let result = self
         .inner
         .pool
         .with_handle(HandleMode::ReadWrite, move |conn| {
            Box::pin(async move { statements::run(&registry, conn, UPDATE_NOVEL, values).await })
         })
         .await?;

      if result.rows_affected == 0 {
         self.inner.cache.invalidate_parent(id);
         return Err(Error::NovelNotFound(id));
      }

      self.inner.cache.put_parent(id, novel.clone());
      Ok(())
   }

   /// Delete a novel together with its chapters, chapter settings and genres
   ///
   /// Returns whether the novel existed.
   pub async fn delete_novel(&self, id: i64) -> Result<bool> {
      let deleted = self
         .inner
         .pool
         .with_handle(HandleMode::ReadWrite, move |conn| {
            Box::pin(async move {
               let result = sqlx::query(DELETE_NOVEL).bind(id).execute(conn).await?;
               Ok::<_, Error>(result.rows_affected() > 0)
            })
         })
         .await?;

      self.inner.cache.invalidate_parent(id);
      if deleted {
         info!(id, "deleted novel");
      }
      Ok(deleted)
   }

   // ==========================================================================
   // Chapters
   // ==========================================================================

   /// Every chapter of a novel, ordered by `order_id`
   pub async fn get_chapters(&self, novel_id: i64) -> Result<Vec<Chapter>> {
      let cache = &self.inner.cache;
      if let Some(chapters) = self.cached_chapters(novel_id) {
         trace!(novel_id, "chapter cache hit");
         return Ok(chapters);
      }

      let generation = cache.generation();
      let chapters = self.load_chapters(novel_id).await?;
      cache.put_children_if(novel_id, generation, chapters.clone());
      Ok(chapters)
   }

   /// Chapters `start..end` of a novel by position, clamped to the chapters
   /// that exist
   ///
   /// For novels cached in chunks this is served from the chunks covering the
   /// window. If any of them was evicted the whole list is reloaded.
   pub async fn get_chapters_range(
      &self,
      novel_id: i64,
      start: usize,
      end: usize,
   ) -> Result<Vec<Chapter>> {
      if let Some(window) = self.inner.cache.get_children_range(novel_id, start, end) {
         trace!(novel_id, start, end, "chapter range cache hit");
         return Ok(window);
      }

      let generation = self.inner.cache.generation();
      let chapters = self.load_chapters(novel_id).await?;
      let end = end.min(chapters.len());
      let window = chapters[start.min(end)..end].to_vec();
      self.inner.cache.put_children_if(novel_id, generation, chapters);
      Ok(window)
   }

   /// Chapters of a novel published by one translator, ordered by `order_id`
   ///
   /// `None` selects every chapter. Served from the cached chapter list when
   /// the whole list is cached; otherwise only the matching rows are read and
   /// nothing is cached.
   pub async fn get_chapters_by_translator(
      &self,
      novel_id: i64,
      translator: Option<&str>,
   ) -> Result<Vec<Chapter>> {
      let Some(translator) = translator else {
         return self.get_chapters(novel_id).await;
      };

      if let Some(chapters) = self.cached_chapters(novel_id) {
         trace!(novel_id, translator, "chapter cache hit");
         return Ok(chapters
            .into_iter()
            .filter(|chapter| chapter.translator_source_name.as_deref() == Some(translator))
            .collect());
      }

      let translator = translator.to_string();
      self
         .inner
         .pool
         .with_handle(HandleMode::ReadOnly, move |conn| {
            Box::pin(async move {
               let chapters = sqlx::query_as::<_, Chapter>(SELECT_CHAPTERS_BY_TRANSLATOR)
                  .bind(novel_id)
                  .bind(translator)
                  .fetch_all(conn)
                  .await?;
               Ok::<_, Error>(chapters)
            })
         })
         .await
   }

   /// Number of stored chapters of a novel
   pub async fn chapter_count(&self, novel_id: i64) -> Result<i64> {
      self
         .inner
         .pool
         .with_handle(HandleMode::ReadOnly, move |conn| {
            Box::pin(async move {
               let count = sqlx::query_scalar::<_, i64>(COUNT_CHAPTERS)
                  .bind(novel_id)
                  .fetch_one(conn)
                  .await?;
               Ok::<_, Error>(count)
            })
         })
         .await
   }

   /// The complete cached chapter list, assembled from every chunk of a large novel
   fn cached_chapters(&self, novel_id: i64) -> Option<Vec<Chapter>> {
      let cache = &self.inner.cache;
      match cache.large_parent_len(novel_id) {
         Some(total) => cache.get_children_range(novel_id, 0, total),
         None => cache.get_children(novel_id).map(|chapters| chapters.to_vec()),
      }
   }

   async fn load_chapters(&self, novel_id: i64) -> Result<Vec<Chapter>> {
      let chapters = self
         .inner
         .pool
         .with_handle(HandleMode::ReadOnly, move |conn| {
            Box::pin(async move {
               let chapters = sqlx::query_as::<_, Chapter>(SELECT_CHAPTERS)
                  .bind(novel_id)
                  .fetch_all(conn)
                  .await?;
               Ok::<_, Error>(chapters)
            })
         })
         .await?;

      debug!(novel_id, count = chapters.len(), "loaded chapters");
      Ok(chapters)
   }

   /// Insert chapters in one transaction
   ///
   /// Every chapter must belong to an existing novel, and `order_id` must be
   /// unique per novel. On success the cached data of every affected novel is
   /// invalidated; on failure nothing is written and the cache is untouched.
   pub async fn insert_chapters(&self, chapters: Vec<Chapter>) -> Result<()> {
      if chapters.is_empty() {
         return Ok(());
      }

      let novel_ids: BTreeSet<i64> = chapters.iter().map(|chapter| chapter.novel_id).collect();
      let values: Vec<_> = chapters.iter().map(statements::chapter_values).collect();
      let registry = Arc::clone(&self.inner.statements);
      self
         .inner
         .pool
         .with_transaction(move |conn| {
            Box::pin(async move {
               for chapter_values in values {
                  statements::run(&registry, conn, INSERT_CHAPTER, chapter_values).await?;
               }
               Ok::<_, Error>(())
            })
         })
         .await?;

      for novel_id in &novel_ids {
         self.inner.cache.invalidate_parent(*novel_id);
      }
      debug!(count = chapters.len(), novels = novel_ids.len(), "inserted chapters");
      Ok(())
   }

   /// Insert the chapters of several novels in one transaction
   ///
   /// Each chapter's `novel_id` is set from its map key.
   pub async fn insert_chapters_for_novels(
      &self,
      chapters_by_novel: IndexMap<i64, Vec<Chapter>>,
   ) -> Result<()> {
      let chapters = chapters_by_novel
         .into_iter()
         .flat_map(|(novel_id, chapters)| {
            chapters.into_iter().map(move |mut chapter| {
               chapter.novel_id = novel_id;
               chapter
            })
         })
         .collect();
      self.insert_chapters(chapters).await
   }

   // ==========================================================================
   // Chapter settings
   // ==========================================================================

   /// Reading state of the chapter at `url`
   pub async fn get_chapter_settings(&self, url: &str) -> Result<Option<ChapterSettings>> {
      if let Some(settings) = self.inner.cache.get_settings(url) {
         trace!(url, "settings cache hit");
         return Ok(Some(settings));
      }

      let key = url.to_string();
      let generation = self.inner.cache.generation();
      let settings = self
         .inner
         .pool
         .with_handle(HandleMode::ReadOnly, move |conn| {
            Box::pin(async move {
               let settings = sqlx::query_as::<_, ChapterSettings>(SELECT_SETTINGS)
                  .bind(key)
                  .fetch_optional(conn)
                  .await?;
               Ok::<_, Error>(settings)
            })
         })
         .await?;

      if let Some(settings) = &settings {
         self
            .inner
            .cache
            .put_settings_if(url, settings.novel_id, generation, settings.clone());
      }
      Ok(settings)
   }

   pub async fn insert_chapter_settings(&self, settings: &ChapterSettings) -> Result<()> {
      let values = statements::insert_settings_values(settings)?;
      let registry = Arc::clone(&self.inner.statements);
      self
         .inner
         .pool
         .with_handle(HandleMode::ReadWrite, move |conn| {
            Box::pin(async move {
               statements::run(&registry, conn, INSERT_CHAPTER_SETTINGS, values).await
            })
         })
         .await?;

      self
         .inner
         .cache
         .put_settings(settings.url.clone(), settings.novel_id, settings.clone());
      Ok(())
   }

   /// Overwrite the reading state of a chapter
   ///
   /// Returns whether a row was updated. The owning novel cannot change.
   pub async fn update_chapter_settings(&self, settings: &ChapterSettings) -> Result<bool> {
      let values = statements::update_settings_values(settings)?;
      let registry = Arc::clone(&self.inner.statements);
      let result = self
         .inner
         .pool
         .with_handle(HandleMode::ReadWrite, move |conn| {
            Box::pin(async move {
               statements::run(&registry, conn, UPDATE_CHAPTER_SETTINGS, values).await
            })
         })
         .await?;

      let updated = result.rows_affected > 0;
      if updated {
         self
            .inner
            .cache
            .put_settings(settings.url.clone(), settings.novel_id, settings.clone());
      } else {
         self.inner.cache.invalidate_settings(&settings.url);
      }
      Ok(updated)
   }

   // ==========================================================================
   // Genres
   // ==========================================================================

   /// Replace the genres of a novel
   pub async fn set_novel_genres(&self, novel_id: i64, genres: Vec<String>) -> Result<()> {
      self
         .inner
         .pool
         .with_transaction(move |conn| {
            Box::pin(async move {
               sqlx::query("DELETE FROM novel_genre WHERE novel_id = ?")
                  .bind(novel_id)
                  .execute(&mut *conn)
                  .await?;

               for genre in genres {
                  sqlx::query("INSERT OR IGNORE INTO genre (name) VALUES (?)")
                     .bind(&genre)
                     .execute(&mut *conn)
                     .await?;
                  sqlx::query(
                     "INSERT OR IGNORE INTO novel_genre (novel_id, genre_id) \
                      SELECT ?, id FROM genre WHERE name = ?",
                  )
                  .bind(novel_id)
                  .bind(&genre)
                  .execute(&mut *conn)
                  .await?;
               }
               Ok::<_, Error>(())
            })
         })
         .await
   }

   /// Genre names of a novel, alphabetically
   pub async fn get_novel_genres(&self, novel_id: i64) -> Result<Vec<String>> {
      self
         .inner
         .pool
         .with_handle(HandleMode::ReadOnly, move |conn| {
            Box::pin(async move {
               let genres = sqlx::query_scalar::<_, String>(SELECT_GENRES)
                  .bind(novel_id)
                  .fetch_all(conn)
                  .await?;
               Ok::<_, Error>(genres)
            })
         })
         .await
   }

   // ==========================================================================
   // Large preferences
   // ==========================================================================

   /// Value of a large preference, such as the reading history
   pub async fn get_large_preference(&self, name: &str) -> Result<Option<String>> {
      let name = name.to_string();
      self
         .inner
         .pool
         .with_handle(HandleMode::ReadOnly, move |conn| {
            Box::pin(async move {
               let value = sqlx::query_scalar::<_, String>(SELECT_PREFERENCE)
                  .bind(name)
                  .fetch_optional(conn)
                  .await?;
               Ok::<_, Error>(value)
            })
         })
         .await
   }

   pub async fn set_large_preference(&self, name: &str, value: &str) -> Result<()> {
      let (name, value) = (name.to_string(), value.to_string());
      self
         .inner
         .pool
         .with_handle(HandleMode::ReadWrite, move |conn| {
            Box::pin(async move {
               sqlx::query(UPSERT_PREFERENCE)
                  .bind(name)
                  .bind(value)
                  .execute(conn)
                  .await?;
               Ok::<_, Error>(())
            })
         })
         .await
   }

   // ==========================================================================
   // Maintenance
   // ==========================================================================

   /// Delete chapters and chapter settings whose novel no longer exists
   ///
   /// Returns the number of rows removed.
   pub async fn cleanup_orphans(&self) -> Result<u64> {
      let removed = self
         .inner
         .pool
         .with_transaction(move |conn| {
            Box::pin(async move {
               let mut removed = 0;
               for sql in [
                  "DELETE FROM web_page WHERE novel_id NOT IN (SELECT id FROM novel)",
                  "DELETE FROM web_page_settings WHERE novel_id NOT IN (SELECT id FROM novel)",
               ] {
                  removed += sqlx::query(sql).execute(&mut *conn).await?.rows_affected();
               }
               Ok::<_, Error>(removed)
            })
         })
         .await?;

      if removed > 0 {
         self.inner.cache.invalidate_all();
         info!(removed, "removed orphaned chapter rows");
      }
      Ok(removed)
   }

   /// Drop everything cached for one novel
   pub fn invalidate_novel(&self, novel_id: i64) {
      self.inner.cache.invalidate_parent(novel_id);
   }

   /// Empty every cache pool; returns the number of entries dropped
   pub fn invalidate_all(&self) -> usize {
      self.inner.cache.invalidate_all()
   }

   pub fn cache_stats(&self) -> CacheStats {
      self.inner.cache.stats()
   }

   pub fn cache_usage(&self) -> CacheUsage {
      self.inner.cache.usage()
   }

   pub fn pool_stats(&self) -> PoolStats {
      self.inner.pool.stats()
   }

   /// Shut the store down
   ///
   /// Stops the background sweep, drops the compiled statements, closes the
   /// pool and finally empties the cache. Later operations that need the
   /// database fail with a pool-closed error. Calling this more than once is a
   /// no-op.
   pub async fn shutdown(&self) -> Result<()> {
      if let Some(maintenance) = self.inner.maintenance.lock().take() {
         maintenance.stop();
      }
      self.inner.statements.close();
      self.inner.pool.shutdown().await?;
      self.inner.cache.invalidate_all();
      info!(path = %self.path().display(), "novel store shut down");
      Ok(())
   }
}

//! Schema versions and the upgrade chain
//!
//! Versions 1 through 9 evolved with plain `ALTER TABLE` statements, which left
//! nullable columns behind. Version 10 rebuilds every table from the descriptor
//! in `schemas/10.json`, which adds NOT NULL constraints, defaults, foreign keys
//! and indices in one pass. Columns that first appear in version 10, such as
//! `translator_source_name`, arrive with that rebuild.

use sqlx::SqliteConnection;
use sqlx_sqlite_table_migrate::{
   Migration, MigrationReport, SchemaDocument, SchemaMigrator, live_columns, user_version,
};
use tracing::{debug, info};

use crate::Result;

/// Schema version written by this crate.
pub const SCHEMA_VERSION: u32 = 10;

pub const NOVEL_TABLE: &str = "novel";
pub const CHAPTER_TABLE: &str = "web_page";
pub const CHAPTER_SETTINGS_TABLE: &str = "web_page_settings";
pub const GENRE_TABLE: &str = "genre";
pub const NOVEL_GENRE_TABLE: &str = "novel_genre";
pub const SOURCE_TABLE: &str = "source";
pub const NOVEL_SECTION_TABLE: &str = "novel_section";
pub const DOWNLOAD_TABLE: &str = "download";
pub const LARGE_PREFERENCE_TABLE: &str = "large_preference";

/// Large preference seeded on every database.
pub const READING_HISTORY_PREFERENCE: &str = "reading_history";

const SCHEMA_V10: &str = include_str!("../schemas/10.json");

const SEED_READING_HISTORY: &str =
   "INSERT OR IGNORE INTO large_preference (name, value) VALUES ('reading_history', '[]')";

/// The catch-all source every chapter without a known source points at
const SEED_ALL_SOURCES: &str = "INSERT OR IGNORE INTO source (id, name) VALUES (-1, 'All')";

/// Build the migrator for the whole chain, up to [`SCHEMA_VERSION`]
pub fn schema_migrator() -> Result<SchemaMigrator> {
   let migrator = SchemaMigrator::new(SCHEMA_VERSION)
      .with_descriptor(SCHEMA_VERSION, SchemaDocument::from_json(SCHEMA_V10)?)
      .with_migration(
         Migration::new(1)
            .sql("ALTER TABLE novel ADD COLUMN order_id INTEGER")
            .sql("UPDATE novel SET order_id = id"),
      )
      .with_migration(
         // Chapters gain an order and are re-fetched from their sources, so the
         // old list and the bookmarks into it are dropped
         Migration::new(2)
            .sql("ALTER TABLE novel ADD COLUMN new_releases_count INTEGER")
            .sql("UPDATE novel SET new_releases_count = 0")
            .sql("UPDATE novel SET current_web_page_id = -1")
            .sql("DROP TABLE IF EXISTS web_page")
            .sql(
               "CREATE TABLE web_page (id INTEGER PRIMARY KEY, url TEXT, redirect_url TEXT, \
                chapter TEXT, title TEXT, metadata TEXT, file_path TEXT, is_read INTEGER, \
                novel_id INTEGER, order_id INTEGER, \
                FOREIGN KEY (novel_id) REFERENCES novel(id))",
            ),
      )
      .with_migration(
         Migration::new(3)
            .sql("ALTER TABLE novel ADD COLUMN chapters_count INTEGER")
            .sql("UPDATE novel SET chapters_count = new_releases_count"),
      )
      .with_migration(
         Migration::new(4)
            .sql("ALTER TABLE web_page ADD COLUMN source_id INTEGER")
            .sql("UPDATE web_page SET source_id = -1")
            .sql("CREATE TABLE source (id INTEGER PRIMARY KEY, name TEXT)")
            .sql("INSERT INTO source (id, name) VALUES (-1, 'All')"),
      )
      .with_migration(
         // Downloads are tracked per chapter instead of per novel
         Migration::new(5)
            .sql("DROP TABLE IF EXISTS download_queue")
            .sql(
               "CREATE TABLE download (name TEXT, web_page_id INTEGER PRIMARY KEY, \
                chapter TEXT, status INTEGER, order_id INTEGER, metadata TEXT)",
            ),
      )
      .with_migration(
         Migration::new(6)
            .sql("UPDATE novel SET chapters_count = new_releases_count")
            .sql("UPDATE novel SET new_releases_count = 0")
            .sql("CREATE TABLE novel_section (id INTEGER PRIMARY KEY, name TEXT, order_id INTEGER)")
            .sql("ALTER TABLE novel ADD COLUMN novel_section_id INTEGER")
            .sql("UPDATE novel SET novel_section_id = -1"),
      )
      .with_migration(
         Migration::new(7)
            .sql("CREATE TABLE large_preference (name TEXT PRIMARY KEY, value TEXT)")
            .sql(SEED_READING_HISTORY)
            .sql("CREATE INDEX web_pages_url_id_index ON web_page (id, url)"),
      )
      .with_migration(
         Migration::new(8)
            .sql("DROP INDEX IF EXISTS web_pages_url_id_index")
            // The reading position moves from a chapter id to a chapter URL
            .sql("ALTER TABLE novel ADD COLUMN current_web_page_url TEXT")
            .sql(
               "UPDATE novel SET current_web_page_url = \
                (SELECT url FROM web_page WHERE web_page.id = novel.current_web_page_id)",
            )
            // Downloads are keyed by chapter URL; ids go away below
            .sql("ALTER TABLE download RENAME TO download_old")
            .sql(
               "CREATE TABLE download (name TEXT, web_page_url TEXT PRIMARY KEY, chapter TEXT, \
                status INTEGER, order_id INTEGER, metadata TEXT)",
            )
            .sql(
               "INSERT OR IGNORE INTO download (name, web_page_url, chapter, status, order_id, metadata) \
                SELECT d.name, w.url, d.chapter, d.status, d.order_id, d.metadata \
                FROM download_old AS d JOIN web_page AS w ON d.web_page_id = w.id",
            )
            .sql("DROP TABLE download_old")
            // Chapters become keyed by URL and their reading state moves to its own table
            .sql("ALTER TABLE web_page RENAME TO web_page_old")
            .sql(
               "CREATE TABLE web_page (url TEXT PRIMARY KEY, chapter TEXT, novel_id INTEGER, \
                source_id INTEGER, order_id INTEGER, \
                FOREIGN KEY (novel_id) REFERENCES novel(id), \
                FOREIGN KEY (source_id) REFERENCES source(id))",
            )
            .sql(
               "CREATE TABLE web_page_settings (url TEXT PRIMARY KEY, novel_id INTEGER, \
                redirect_url TEXT, title TEXT, metadata TEXT, file_path TEXT, is_read INTEGER, \
                FOREIGN KEY (novel_id) REFERENCES novel(id))",
            )
            .sql(
               "INSERT OR IGNORE INTO web_page (url, chapter, novel_id, order_id, source_id) \
                SELECT url, chapter, novel_id, order_id, source_id FROM web_page_old ORDER BY id",
            )
            .sql(
               "INSERT OR IGNORE INTO web_page_settings \
                (url, novel_id, redirect_url, title, file_path, is_read, metadata) \
                SELECT url, novel_id, redirect_url, title, file_path, is_read, '{}' \
                FROM web_page_old ORDER BY id",
            )
            .sql("DROP TABLE web_page_old")
            .sql("CREATE INDEX web_page_url_novel_id_index ON web_page (url, novel_id)")
            .sql("CREATE INDEX web_page_settings_url_index ON web_page_settings (url, novel_id)"),
      )
      .with_migration(
         Migration::new(9)
            // Rows the new foreign keys and unique index would reject
            .sql(
               "DELETE FROM web_page WHERE novel_id IS NULL OR novel_id NOT IN (SELECT id FROM novel)",
            )
            .sql(
               "DELETE FROM web_page_settings \
                WHERE novel_id IS NULL OR novel_id NOT IN (SELECT id FROM novel)",
            )
            .sql(
               "DELETE FROM novel_genre WHERE novel_id NOT IN (SELECT id FROM novel) \
                OR genre_id NOT IN (SELECT id FROM genre)",
            )
            .sql(
               "DELETE FROM web_page WHERE rowid NOT IN \
                (SELECT MIN(rowid) FROM web_page GROUP BY novel_id, order_id)",
            )
            .sql(
               "DELETE FROM novel_genre WHERE rowid NOT IN \
                (SELECT MIN(rowid) FROM novel_genre GROUP BY novel_id, genre_id)",
            )
            .rebuild_all(),
      );

   Ok(migrator)
}

/// Bring the database on `conn` to [`SCHEMA_VERSION`]
///
/// An empty database gets the current schema directly. A database that has
/// tables but no recorded version predates versioning and is treated as
/// version 1.
pub async fn prepare_schema(conn: &mut SqliteConnection) -> Result<MigrationReport> {
   let migrator = schema_migrator()?;
   let stored = user_version(conn).await?;

   let report = if stored == 0 && live_columns(conn, NOVEL_TABLE).await?.is_empty() {
      migrator.create_schema(conn, SCHEMA_VERSION).await?;
      MigrationReport {
         from: 0,
         to: SCHEMA_VERSION,
         applied: vec![SCHEMA_VERSION],
      }
   } else {
      let from = stored.max(1);
      if from < SCHEMA_VERSION {
         info!(from, to = SCHEMA_VERSION, "upgrading database schema");
      }
      migrator.migrate(conn, from).await?
   };

   for seed in [SEED_READING_HISTORY, SEED_ALL_SOURCES] {
      sqlx::query(seed).execute(&mut *conn).await?;
   }
   debug!(version = report.to, "schema ready");
   Ok(report)
}

//! Named write statements and their ad hoc fallback
//!
//! The hot write paths are compiled once on a write handle when the store
//! opens. A statement that failed to compile, or was removed since, is run as
//! an ad hoc query with the same SQL and values instead, so the outcome never
//! depends on whether the prepared form exists.

use serde_json::Value as JsonValue;
use sqlx::SqliteConnection;
use sqlx_sqlite_handle_pool::{StatementRegistry, WriteQueryResult, bind_value};
use tracing::{debug, warn};

use crate::Result;
use crate::models::{Chapter, ChapterSettings, Novel, encode_metadata};

/// A write statement with a stable name
#[derive(Debug, Clone, Copy)]
pub struct NamedStatement {
   pub name: &'static str,
   pub sql: &'static str,
}

pub const INSERT_NOVEL: NamedStatement = NamedStatement {
   name: "insert_novel",
   sql: "INSERT INTO novel (name, url, source_id, image_url, rating, short_description, \
         long_description, image_file_path, metadata, current_web_page_url, order_id, \
         chapters_count, new_releases_count, novel_section_id, external_novel_id) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
};

pub const UPDATE_NOVEL: NamedStatement = NamedStatement {
   name: "update_novel",
   sql: "UPDATE novel SET name = ?, url = ?, source_id = ?, image_url = ?, rating = ?, \
         short_description = ?, long_description = ?, image_file_path = ?, metadata = ?, \
         current_web_page_url = ?, order_id = ?, chapters_count = ?, new_releases_count = ?, \
         novel_section_id = ?, external_novel_id = ? WHERE id = ?",
};

pub const INSERT_CHAPTER: NamedStatement = NamedStatement {
   name: "insert_chapter",
   sql: "INSERT INTO web_page (url, chapter, novel_id, order_id, source_id, translator_source_name) \
         VALUES (?, ?, ?, ?, ?, ?)",
};

pub const INSERT_CHAPTER_SETTINGS: NamedStatement = NamedStatement {
   name: "insert_chapter_settings",
   sql: "INSERT INTO web_page_settings (url, novel_id, title, redirect_url, file_path, is_read, metadata) \
         VALUES (?, ?, ?, ?, ?, ?, ?)",
};

pub const UPDATE_CHAPTER_SETTINGS: NamedStatement = NamedStatement {
   name: "update_chapter_settings",
   sql: "UPDATE web_page_settings SET title = ?, redirect_url = ?, file_path = ?, is_read = ?, \
         metadata = ? WHERE url = ?",
};

pub const NAMED_STATEMENTS: [NamedStatement; 5] = [
   INSERT_NOVEL,
   UPDATE_NOVEL,
   INSERT_CHAPTER,
   INSERT_CHAPTER_SETTINGS,
   UPDATE_CHAPTER_SETTINGS,
];

/// Compile every named statement, logging the ones that fail
///
/// Returns how many compiled. Failures are not fatal; those statements run ad hoc.
pub async fn compile_all(registry: &StatementRegistry, conn: &mut SqliteConnection) -> usize {
   let mut compiled = 0;
   for statement in NAMED_STATEMENTS {
      match registry.compile(conn, statement.name, statement.sql).await {
         Ok(()) => compiled += 1,
         Err(e) => {
            warn!(statement = statement.name, error = %e, "failed to compile statement; it will run ad hoc");
         }
      }
   }
   compiled
}

/// Run `statement` with positional `values`
///
/// Uses the registry's compiled form when there is one, and an ad hoc query
/// otherwise.
pub async fn run(
   registry: &StatementRegistry,
   conn: &mut SqliteConnection,
   statement: NamedStatement,
   values: Vec<JsonValue>,
) -> Result<WriteQueryResult> {
   if registry.contains(statement.name) {
      return Ok(registry.execute(conn, statement.name, values).await?);
   }

   debug!(statement = statement.name, "statement not compiled; running ad hoc");
   let query = values.into_iter().fold(sqlx::query(statement.sql), bind_value);
   let result = query.execute(&mut *conn).await?;

   Ok(WriteQueryResult {
      rows_affected: result.rows_affected(),
      last_insert_id: result.last_insert_rowid(),
   })
}

fn optional(value: &Option<String>) -> JsonValue {
   value.clone().map_or(JsonValue::Null, JsonValue::String)
}

/// Values shared by [`INSERT_NOVEL`] and [`UPDATE_NOVEL`], in column order
pub fn novel_values(novel: &Novel) -> Result<Vec<JsonValue>> {
   Ok(vec![
      novel.name.clone().into(),
      novel.url.clone().into(),
      novel.source_id.into(),
      optional(&novel.image_url),
      optional(&novel.rating),
      optional(&novel.short_description),
      optional(&novel.long_description),
      optional(&novel.image_file_path),
      encode_metadata(&novel.metadata)?.into(),
      optional(&novel.current_chapter_url),
      novel.order_id.into(),
      novel.chapters_count.into(),
      novel.new_releases_count.into(),
      novel.novel_section_id.into(),
      optional(&novel.external_novel_id),
   ])
}

pub fn update_novel_values(novel: &Novel, id: i64) -> Result<Vec<JsonValue>> {
   let mut values = novel_values(novel)?;
   values.push(id.into());
   Ok(values)
}

pub fn chapter_values(chapter: &Chapter) -> Vec<JsonValue> {
   vec![
      chapter.url.clone().into(),
      chapter.name.clone().into(),
      chapter.novel_id.into(),
      chapter.order_id.into(),
      chapter.source_id.into(),
      optional(&chapter.translator_source_name),
   ]
}

pub fn insert_settings_values(settings: &ChapterSettings) -> Result<Vec<JsonValue>> {
   Ok(vec![
      settings.url.clone().into(),
      settings.novel_id.into(),
      settings.title.clone().into(),
      optional(&settings.redirect_url),
      optional(&settings.file_path),
      settings.is_read.into(),
      encode_metadata(&settings.metadata)?.into(),
   ])
}

pub fn update_settings_values(settings: &ChapterSettings) -> Result<Vec<JsonValue>> {
   Ok(vec![
      settings.title.clone().into(),
      optional(&settings.redirect_url),
      optional(&settings.file_path),
      settings.is_read.into(),
      encode_metadata(&settings.metadata)?.into(),
      settings.url.clone().into(),
   ])
}

//! Records stored by the novel store

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row};

/// Free-form key/value metadata, persisted as a JSON object.
///
/// Insertion order is kept so a record reads back exactly as it was written.
pub type Metadata = IndexMap<String, String>;

/// Source id of records that did not come from a known source.
pub const UNKNOWN_SOURCE_ID: i64 = -1;

/// Section id of novels that were never filed into a section.
pub const DEFAULT_SECTION_ID: i64 = -1;

/// A novel in the library.
///
/// `id` stays `None` until the store assigns one on insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Novel {
   pub id: Option<i64>,
   pub name: String,
   pub url: String,
   pub source_id: i64,
   pub image_url: Option<String>,
   pub rating: Option<String>,
   pub short_description: Option<String>,
   pub long_description: Option<String>,
   pub image_file_path: Option<String>,
   pub metadata: Metadata,
   /// URL of the chapter the reader stopped at
   pub current_chapter_url: Option<String>,
   pub order_id: i64,
   pub chapters_count: i64,
   pub new_releases_count: i64,
   pub novel_section_id: i64,
   /// Id of the novel on an external tracking site
   pub external_novel_id: Option<String>,
}

impl Novel {
   pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
      Self {
         id: None,
         name: name.into(),
         url: url.into(),
         source_id: UNKNOWN_SOURCE_ID,
         image_url: None,
         rating: None,
         short_description: None,
         long_description: None,
         image_file_path: None,
         metadata: Metadata::new(),
         current_chapter_url: None,
         order_id: -1,
         chapters_count: 0,
         new_releases_count: 0,
         novel_section_id: DEFAULT_SECTION_ID,
         external_novel_id: None,
      }
   }

   pub fn is_persisted(&self) -> bool {
      self.id.is_some()
   }
}

/// A chapter of a novel, identified by its URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chapter {
   pub url: String,
   pub name: String,
   pub novel_id: i64,
   /// Position within the novel; unique per novel
   pub order_id: i64,
   pub source_id: i64,
   pub translator_source_name: Option<String>,
}

impl Chapter {
   pub fn new(novel_id: i64, order_id: i64, url: impl Into<String>, name: impl Into<String>) -> Self {
      Self {
         url: url.into(),
         name: name.into(),
         novel_id,
         order_id,
         source_id: UNKNOWN_SOURCE_ID,
         translator_source_name: None,
      }
   }
}

/// Per-chapter reading state, keyed by the chapter URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterSettings {
   pub url: String,
   pub novel_id: i64,
   pub title: String,
   pub redirect_url: Option<String>,
   /// Local copy of the chapter, when downloaded
   pub file_path: Option<String>,
   pub is_read: bool,
   pub metadata: Metadata,
}

impl ChapterSettings {
   pub fn new(url: impl Into<String>, novel_id: i64, title: impl Into<String>) -> Self {
      Self {
         url: url.into(),
         novel_id,
         title: title.into(),
         redirect_url: None,
         file_path: None,
         is_read: false,
         metadata: Metadata::new(),
      }
   }

   pub fn is_downloaded(&self) -> bool {
      self.file_path.is_some()
   }
}

/// Decode a metadata column; legacy rows may hold NULL or an empty string.
fn decode_metadata(row: &SqliteRow, column: &str) -> sqlx::Result<Metadata> {
   let raw: Option<String> = row.try_get(column)?;
   match raw.as_deref().map(str::trim) {
      None | Some("") => Ok(Metadata::new()),
      Some(json) => serde_json::from_str(json).map_err(|e| sqlx::Error::ColumnDecode {
         index: column.to_string(),
         source: Box::new(e),
      }),
   }
}

pub(crate) fn encode_metadata(metadata: &Metadata) -> serde_json::Result<String> {
   serde_json::to_string(metadata)
}

impl<'r> FromRow<'r, SqliteRow> for Novel {
   fn from_row(row: &'r SqliteRow) -> sqlx::Result<Self> {
      Ok(Self {
         id: Some(row.try_get("id")?),
         name: row.try_get("name")?,
         url: row.try_get("url")?,
         source_id: row.try_get("source_id")?,
         image_url: row.try_get("image_url")?,
         rating: row.try_get("rating")?,
         short_description: row.try_get("short_description")?,
         long_description: row.try_get("long_description")?,
         image_file_path: row.try_get("image_file_path")?,
         metadata: decode_metadata(row, "metadata")?,
         current_chapter_url: row.try_get("current_web_page_url")?,
         order_id: row.try_get("order_id")?,
         chapters_count: row.try_get("chapters_count")?,
         new_releases_count: row.try_get("new_releases_count")?,
         novel_section_id: row.try_get("novel_section_id")?,
         external_novel_id: row.try_get("external_novel_id")?,
      })
   }
}

impl<'r> FromRow<'r, SqliteRow> for Chapter {
   fn from_row(row: &'r SqliteRow) -> sqlx::Result<Self> {
      Ok(Self {
         url: row.try_get("url")?,
         name: row.try_get("chapter")?,
         novel_id: row.try_get("novel_id")?,
         order_id: row.try_get("order_id")?,
         source_id: row.try_get("source_id")?,
         translator_source_name: row.try_get("translator_source_name")?,
      })
   }
}

impl<'r> FromRow<'r, SqliteRow> for ChapterSettings {
   fn from_row(row: &'r SqliteRow) -> sqlx::Result<Self> {
      Ok(Self {
         url: row.try_get("url")?,
         novel_id: row.try_get("novel_id")?,
         title: row.try_get("title")?,
         redirect_url: row.try_get("redirect_url")?,
         file_path: row.try_get("file_path")?,
         is_read: row.try_get("is_read")?,
         metadata: decode_metadata(row, "metadata")?,
      })
   }
}

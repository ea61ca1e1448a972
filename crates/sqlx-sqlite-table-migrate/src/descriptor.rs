//! Versioned schema descriptor documents

use crate::identifier::checked;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Placeholder replaced by the concrete table name in `createSql` templates.
pub const TABLE_NAME_PLACEHOLDER: &str = "${TABLE_NAME}";

/// Column affinities accepted in field descriptors.
const AFFINITIES: [&str; 5] = ["INTEGER", "TEXT", "REAL", "BLOB", "NUMERIC"];

/// A full schema description for one version, as stored in the JSON assets.
///
/// ```json
/// {
///   "formatVersion": 1,
///   "database": {
///     "version": 10,
///     "entities": [{
///       "tableName": "novel",
///       "createSql": "CREATE TABLE IF NOT EXISTS `${TABLE_NAME}` (...)",
///       "fields": [{ "columnName": "id", "affinity": "INTEGER", "notNull": true }],
///       "indices": [{ "name": "index_novel_url", "createSql": "CREATE INDEX ..." }]
///     }]
///   }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaDocument {
   #[serde(default)]
   pub format_version: Option<u32>,
   pub database: DatabaseSchema,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseSchema {
   #[serde(default)]
   pub version: Option<u32>,
   pub entities: Vec<EntityDescriptor>,
}

/// One table: its DDL template, columns and indices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityDescriptor {
   pub table_name: String,
   pub create_sql: String,
   #[serde(default)]
   pub fields: Vec<FieldDescriptor>,
   #[serde(default)]
   pub indices: Vec<IndexDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDescriptor {
   pub column_name: String,
   pub affinity: String,
   #[serde(default)]
   pub not_null: bool,
   /// Value used to fill NULLs in a NOT NULL column; bound as a parameter, never
   /// interpolated.
   #[serde(default)]
   pub default_value: Option<JsonValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexDescriptor {
   #[serde(default)]
   pub name: Option<String>,
   pub create_sql: String,
}

impl SchemaDocument {
   /// Parse and validate a descriptor document
   pub fn from_json(json: &str) -> Result<Self> {
      let document: SchemaDocument = serde_json::from_str(json)?;
      document.validate()?;
      Ok(document)
   }

   /// Check every table and column name and every affinity
   pub fn validate(&self) -> Result<()> {
      for entity in &self.database.entities {
         checked(&entity.table_name)?;
         for field in &entity.fields {
            checked(&field.column_name)?;
            if !AFFINITIES.contains(&field.affinity.as_str()) {
               return Err(Error::InvalidIdentifier(field.affinity.clone()));
            }
         }
      }
      Ok(())
   }

   pub fn version(&self) -> Option<u32> {
      self.database.version
   }

   pub fn entities(&self) -> &[EntityDescriptor] {
      &self.database.entities
   }

   pub fn entity(&self, table_name: &str) -> Result<&EntityDescriptor> {
      self
         .database
         .entities
         .iter()
         .find(|e| e.table_name == table_name)
         .ok_or_else(|| Error::MissingTable(table_name.to_string()))
   }
}

impl EntityDescriptor {
   /// DDL creating this entity under `table_name`
   pub fn create_sql_for(&self, table_name: &str) -> String {
      self.create_sql.replace(TABLE_NAME_PLACEHOLDER, table_name)
   }

   pub fn field(&self, column_name: &str) -> Result<&FieldDescriptor> {
      self
         .fields
         .iter()
         .find(|f| f.column_name == column_name)
         .ok_or_else(|| Error::MissingColumn {
            table: self.table_name.clone(),
            column: column_name.to_string(),
         })
   }

   pub fn column_names(&self) -> impl Iterator<Item = &str> {
      self.fields.iter().map(|f| f.column_name.as_str())
   }
}

impl FieldDescriptor {
   /// Default to backfill NULLs with, if this column needs one
   pub fn backfill_value(&self) -> Option<&JsonValue> {
      match &self.default_value {
         Some(JsonValue::Null) | None => None,
         Some(value) if self.not_null => Some(value),
         Some(_) => None,
      }
   }
}

impl IndexDescriptor {
   /// DDL creating this index on `table_name`
   pub fn create_sql_for(&self, table_name: &str) -> String {
      self.create_sql.replace(TABLE_NAME_PLACEHOLDER, table_name)
   }
}

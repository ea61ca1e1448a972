/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for schema migrations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
   /// Error from SQLx operations.
   #[error(transparent)]
   Sqlx(#[from] sqlx::Error),

   /// Schema descriptor could not be parsed.
   #[error("invalid schema descriptor: {0}")]
   Descriptor(#[from] serde_json::Error),

   /// A migration step failed and was rolled back.
   #[error("migration from version {from} to {to} failed: {source}")]
   MigrationFailed {
      from: u32,
      to: u32,
      #[source]
      source: Box<Error>,
   },

   /// No migration is registered starting at this version.
   #[error("no migration registered from version {0}")]
   MissingMigration(u32),

   /// No schema descriptor is registered for this version.
   #[error("no schema descriptor registered for version {0}")]
   MissingDescriptor(u32),

   /// The descriptor has no entity for this table.
   #[error("table '{0}' is not described by the schema descriptor")]
   MissingTable(String),

   /// The descriptor has no field for this column.
   #[error("column '{column}' of table '{table}' is not described by the schema descriptor")]
   MissingColumn { table: String, column: String },

   /// Identifier unsafe to interpolate into SQL.
   #[error(
      "invalid identifier '{0}': must contain only alphanumeric characters and underscores, and cannot start with a digit"
   )]
   InvalidIdentifier(String),

   /// The database was written by a newer schema than this code knows.
   #[error("database schema version {stored} is newer than supported version {target}")]
   UnsupportedDowngrade { stored: u32, target: u32 },
}

impl Error {
   /// Extract a structured error code from the error type.
   pub fn error_code(&self) -> String {
      match self {
         Error::Sqlx(e) => {
            if let Some(code) = e.as_database_error().and_then(|db_err| db_err.code()) {
               return format!("SQLITE_{}", code);
            }
            "SQLX_ERROR".to_string()
         }
         Error::Descriptor(_) => "INVALID_SCHEMA_DESCRIPTOR".to_string(),
         Error::MigrationFailed { .. } => "MIGRATION_FAILED".to_string(),
         Error::MissingMigration(_) => "MISSING_MIGRATION".to_string(),
         Error::MissingDescriptor(_) => "MISSING_SCHEMA_DESCRIPTOR".to_string(),
         Error::MissingTable(_) => "MISSING_TABLE".to_string(),
         Error::MissingColumn { .. } => "MISSING_COLUMN".to_string(),
         Error::InvalidIdentifier(_) => "INVALID_IDENTIFIER".to_string(),
         Error::UnsupportedDowngrade { .. } => "UNSUPPORTED_DOWNGRADE".to_string(),
      }
   }
}

use serde::{Serialize, Serializer};
use sqlx::error::ErrorKind;

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Structured error response for callers that serialize errors.
#[derive(Serialize)]
struct ErrorResponse {
   code: String,
   message: String,
}

/// Error types for the novel store.
#[derive(Debug, thiserror::Error)]
pub enum Error {
   /// Error from SQLx operations.
   #[error(transparent)]
   Sqlx(sqlx::Error),

   /// Error from the handle pool.
   #[error(transparent)]
   ConnectionPool(sqlx_sqlite_handle_pool::Error),

   /// Error from schema migrations.
   #[error(transparent)]
   Migration(#[from] sqlx_sqlite_table_migrate::Error),

   /// A write broke a uniqueness, foreign key, NOT NULL or CHECK constraint.
   #[error("constraint violation: {0}")]
   ConstraintViolation(String),

   /// Insert of a novel that already carries an id.
   #[error("novel already has id {0}; use update_novel instead")]
   IdentityAlreadyAssigned(i64),

   /// Update of a novel that was never inserted.
   #[error("novel has no id; insert it first")]
   MissingIdentity,

   /// Update of a novel id the store does not have.
   #[error("novel {0} not found")]
   NovelNotFound(i64),

   /// Metadata could not be encoded as JSON.
   #[error("invalid metadata: {0}")]
   Metadata(#[from] serde_json::Error),
}

impl From<sqlx::Error> for Error {
   fn from(error: sqlx::Error) -> Self {
      let is_constraint = error.as_database_error().is_some_and(|db_err| {
         matches!(
            db_err.kind(),
            ErrorKind::UniqueViolation
               | ErrorKind::ForeignKeyViolation
               | ErrorKind::NotNullViolation
               | ErrorKind::CheckViolation
         )
      });

      if is_constraint {
         Error::ConstraintViolation(error.to_string())
      } else {
         Error::Sqlx(error)
      }
   }
}

impl From<sqlx_sqlite_handle_pool::Error> for Error {
   fn from(error: sqlx_sqlite_handle_pool::Error) -> Self {
      match error {
         sqlx_sqlite_handle_pool::Error::Sqlx(e) => Error::from(e),
         other => Error::ConnectionPool(other),
      }
   }
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
         Error::ConnectionPool(sqlx_sqlite_handle_pool::Error::PoolClosed) => {
            "POOL_CLOSED".to_string()
         }
         Error::ConnectionPool(_) => "CONNECTION_ERROR".to_string(),
         Error::Migration(e) => e.error_code(),
         Error::ConstraintViolation(_) => "CONSTRAINT_VIOLATION".to_string(),
         Error::IdentityAlreadyAssigned(_) => "IDENTITY_ALREADY_ASSIGNED".to_string(),
         Error::MissingIdentity => "MISSING_IDENTITY".to_string(),
         Error::NovelNotFound(_) => "NOVEL_NOT_FOUND".to_string(),
         Error::Metadata(_) => "INVALID_METADATA".to_string(),
      }
   }

   pub fn is_constraint_violation(&self) -> bool {
      matches!(self, Error::ConstraintViolation(_))
   }
}

impl Serialize for Error {
   fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
   where
      S: Serializer,
   {
      let response = ErrorResponse {
         code: self.error_code(),
         message: self.to_string(),
      };
      response.serialize(serializer)
   }
}

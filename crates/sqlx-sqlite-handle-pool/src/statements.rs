//! Named registry of compiled write statements

use crate::bind::bind_value;
use crate::{Error, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::sqlite::{SqliteConnection, SqliteStatement};
use sqlx::{Executor, Statement};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Result returned from write operations (e.g. INSERT, UPDATE, DELETE).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteQueryResult {
   /// The number of rows affected by the write operation.
   pub rows_affected: u64,
   /// The last inserted row ID (SQLite ROWID).
   ///
   /// Only meaningful for INSERT operations on tables with a ROWID.
   pub last_insert_id: i64,
}

/// Compiled statements keyed by name
///
/// Statements are compiled once against a handle and then executed many times
/// with fresh positional values. Parameter values are owned by each execution,
/// so nothing bound for one call is visible to the next, whether it succeeded
/// or failed.
///
/// A name whose compilation failed is simply absent; callers check
/// [`Error::StatementUnavailable`] and run the same SQL ad hoc instead.
#[derive(Debug, Default)]
pub struct StatementRegistry {
   statements: RwLock<HashMap<String, Arc<SqliteStatement<'static>>>>,
}

impl StatementRegistry {
   pub fn new() -> Self {
      Self::default()
   }

   /// Compile `sql` on `conn` and register it under `name`
   ///
   /// Replaces any statement already registered under that name. On failure
   /// the name is left unregistered and the error is returned.
   pub async fn compile(&self, conn: &mut SqliteConnection, name: &str, sql: &str) -> Result<()> {
      match (&mut *conn).prepare(sql).await {
         Ok(statement) => {
            self
               .statements
               .write()
               .insert(name.to_string(), Arc::new(Statement::to_owned(&statement)));
            debug!(statement = name, "compiled statement");
            Ok(())
         }
         Err(e) => {
            self.statements.write().remove(name);
            warn!(statement = name, error = %e, "failed to compile statement");
            Err(Error::Sqlx(e))
         }
      }
   }

   pub fn contains(&self, name: &str) -> bool {
      self.statements.read().contains_key(name)
   }

   /// Names of every registered statement, sorted
   pub fn names(&self) -> Vec<String> {
      let mut names: Vec<String> = self.statements.read().keys().cloned().collect();
      names.sort();
      names
   }

   /// SQL text registered under `name`
   pub fn sql(&self, name: &str) -> Option<String> {
      self
         .statements
         .read()
         .get(name)
         .map(|statement| statement.sql().to_string())
   }

   /// Execute the statement registered under `name` with positional `values`
   pub async fn execute(
      &self,
      conn: &mut SqliteConnection,
      name: &str,
      values: Vec<JsonValue>,
   ) -> Result<WriteQueryResult> {
      // Clone out so the lock is not held across the await
      let statement = self
         .statements
         .read()
         .get(name)
         .cloned()
         .ok_or_else(|| Error::StatementUnavailable(name.to_string()))?;

      let query = values.into_iter().fold(statement.query(), bind_value);
      let result = query.execute(&mut *conn).await?;

      Ok(WriteQueryResult {
         rows_affected: result.rows_affected(),
         last_insert_id: result.last_insert_rowid(),
      })
   }

   /// Drop the statement registered under `name`
   ///
   /// Returns whether one was registered.
   pub fn remove(&self, name: &str) -> bool {
      self.statements.write().remove(name).is_some()
   }

   /// Drop every registered statement
   pub fn close(&self) {
      let mut statements = self.statements.write();
      debug!(count = statements.len(), "closing statement registry");
      statements.clear();
   }

   pub fn len(&self) -> usize {
      self.statements.read().len()
   }

   pub fn is_empty(&self) -> bool {
      self.statements.read().is_empty()
   }
}

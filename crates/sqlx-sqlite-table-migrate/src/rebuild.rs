//! Descriptor-driven table rebuilds

use crate::descriptor::EntityDescriptor;
use crate::identifier::{checked, quoted};
use crate::{Error, Result};
use sqlx::sqlite::SqliteConnection;
use sqlx_sqlite_handle_pool::bind_value;
use tracing::{debug, info};

/// Prefix of the temporary table a rebuild copies into.
pub const SHADOW_PREFIX: &str = "new_";

/// What a rebuild did to one table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RebuildSummary {
   /// Rows copied from the live table into the rebuilt one
   pub rows_copied: u64,
   /// NULL cells replaced by column defaults before copying
   pub cells_backfilled: u64,
   /// The table did not exist yet and was created directly
   pub created: bool,
}

/// Column names of a live table, in declaration order. Empty if the table does not exist.
pub async fn live_columns(conn: &mut SqliteConnection, table: &str) -> Result<Vec<String>> {
   let columns = sqlx::query_scalar("SELECT name FROM pragma_table_info(?)")
      .bind(table)
      .fetch_all(&mut *conn)
      .await?;
   Ok(columns)
}

/// Rebuilds one live table to match its descriptor.
///
/// SQLite cannot add constraints or change a column's nullability in place, so the
/// table is recreated under a shadow name, the rows are copied across, the old
/// table is dropped and the shadow renamed over it. Run inside a transaction with
/// foreign key enforcement off; [`SchemaMigrator`](crate::SchemaMigrator) does both.
#[derive(Debug)]
pub struct TableRebuild<'a> {
   entity: &'a EntityDescriptor,
   table: String,
   shadow: String,
}

impl<'a> TableRebuild<'a> {
   pub fn new(entity: &'a EntityDescriptor) -> Result<Self> {
      let table = checked(&entity.table_name)?.to_string();
      for column in entity.column_names() {
         checked(column)?;
      }

      Ok(Self {
         entity,
         shadow: format!("{SHADOW_PREFIX}{table}"),
         table,
      })
   }

   pub fn table_name(&self) -> &str {
      &self.table
   }

   pub fn shadow_name(&self) -> &str {
      &self.shadow
   }

   /// Create the shadow table from the descriptor's DDL
   pub async fn create_shadow_table(&self, conn: &mut SqliteConnection) -> Result<()> {
      let drop_stale = format!("DROP TABLE IF EXISTS {}", quoted(&self.shadow));
      sqlx::raw_sql(&drop_stale).execute(&mut *conn).await?;
      sqlx::raw_sql(&self.entity.create_sql_for(&self.shadow))
         .execute(&mut *conn)
         .await?;
      Ok(())
   }

   /// Replace NULLs in the live table with the defaults of NOT NULL columns
   ///
   /// Columns the live table does not have yet are skipped; the copy leaves them
   /// to the shadow table's own defaults.
   pub async fn backfill_defaults(&self, conn: &mut SqliteConnection) -> Result<u64> {
      let live = live_columns(conn, &self.table).await?;
      let mut backfilled = 0;

      for field in &self.entity.fields {
         let Some(default) = field.backfill_value() else {
            continue;
         };
         if !live.contains(&field.column_name) {
            continue;
         }

         let column = quoted(&field.column_name);
         let sql = format!(
            "UPDATE {} SET {column} = ? WHERE {column} IS NULL",
            quoted(&self.table)
         );
         let result = bind_value(sqlx::query(&sql), default.clone())
            .execute(&mut *conn)
            .await?;
         backfilled += result.rows_affected();
      }

      if backfilled > 0 {
         debug!(table = %self.table, backfilled, "backfilled NULL cells with defaults");
      }
      Ok(backfilled)
   }

   /// Copy every row of the live table into the shadow table
   ///
   /// Copies the descriptor's columns that the live table already has.
   pub async fn copy_rows(&self, conn: &mut SqliteConnection) -> Result<u64> {
      let live = live_columns(conn, &self.table).await?;
      let columns: Vec<String> = self
         .entity
         .column_names()
         .filter(|c| live.iter().any(|l| l == c))
         .map(quoted)
         .collect();

      if columns.is_empty() {
         return Ok(0);
      }

      let column_list = columns.join(", ");
      let sql = format!(
         "INSERT INTO {} ({column_list}) SELECT {column_list} FROM {}",
         quoted(&self.shadow),
         quoted(&self.table)
      );
      let result = sqlx::query(&sql).execute(&mut *conn).await?;
      Ok(result.rows_affected())
   }

   /// Drop the live table and rename the shadow table over it
   pub async fn swap_tables(&self, conn: &mut SqliteConnection) -> Result<()> {
      let sql = format!(
         "DROP TABLE {table}; ALTER TABLE {shadow} RENAME TO {table}",
         table = quoted(&self.table),
         shadow = quoted(&self.shadow)
      );
      sqlx::raw_sql(&sql).execute(&mut *conn).await?;
      Ok(())
   }

   /// Create the descriptor's indices on the live table
   pub async fn create_indices(&self, conn: &mut SqliteConnection) -> Result<()> {
      for index in &self.entity.indices {
         sqlx::raw_sql(&index.create_sql_for(&self.table))
            .execute(&mut *conn)
            .await?;
      }
      Ok(())
   }

   /// Rebuild the table, or create it if it does not exist yet
   pub async fn run(&self, conn: &mut SqliteConnection) -> Result<RebuildSummary> {
      if live_columns(conn, &self.table).await?.is_empty() {
         sqlx::raw_sql(&self.entity.create_sql_for(&self.table))
            .execute(&mut *conn)
            .await?;
         self.create_indices(conn).await?;
         info!(table = %self.table, "created table");
         return Ok(RebuildSummary {
            created: true,
            ..Default::default()
         });
      }

      self.create_shadow_table(conn).await?;
      let cells_backfilled = self.backfill_defaults(conn).await?;
      let rows_copied = self.copy_rows(conn).await?;
      self.swap_tables(conn).await?;
      self.create_indices(conn).await?;

      info!(table = %self.table, rows_copied, cells_backfilled, "rebuilt table");
      Ok(RebuildSummary {
         rows_copied,
         cells_backfilled,
         created: false,
      })
   }

   /// Add one descriptor column to the live table without rebuilding it
   ///
   /// The column is added with its affinity only; NULLs are then backfilled with
   /// the column's default. NOT NULL is enforced by the next rebuild. Adding a
   /// column the table already has is a no-op.
   pub async fn add_column(&self, conn: &mut SqliteConnection, column: &str) -> Result<()> {
      let field = self.entity.field(column)?;
      let live = live_columns(conn, &self.table).await?;
      if live.is_empty() {
         return Err(Error::MissingTable(self.table.clone()));
      }
      if live.contains(&field.column_name) {
         debug!(table = %self.table, column, "column already present");
         return Ok(());
      }

      let sql = format!(
         "ALTER TABLE {} ADD COLUMN {} {}",
         quoted(&self.table),
         quoted(&field.column_name),
         field.affinity
      );
      sqlx::raw_sql(&sql).execute(&mut *conn).await?;

      if let Some(default) = field.default_value.as_ref().filter(|v| !v.is_null()) {
         let column = quoted(&field.column_name);
         let sql = format!(
            "UPDATE {} SET {column} = ? WHERE {column} IS NULL",
            quoted(&self.table)
         );
         bind_value(sqlx::query(&sql), default.clone())
            .execute(&mut *conn)
            .await?;
      }

      info!(table = %self.table, column, "added column");
      Ok(())
   }
}

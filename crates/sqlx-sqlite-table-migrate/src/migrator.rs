//! Ordered version-to-version schema migrations

use crate::descriptor::SchemaDocument;
use crate::rebuild::TableRebuild;
use crate::{Error, Result};
use serde::Serialize;
use sqlx::Row;
use sqlx::sqlite::SqliteConnection;
use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use tracing::{error, info, warn};

/// One action of a migration.
#[derive(Debug, Clone)]
pub enum MigrationStep {
   /// Run fixed SQL (may hold several statements)
   Sql(Cow<'static, str>),
   /// Rebuild the named tables from the target version's descriptor
   RebuildTables(Vec<String>),
   /// Rebuild every table the target version's descriptor describes
   RebuildAll,
   /// Add one column from the target version's descriptor
   AddColumn { table: String, column: String },
}

impl MigrationStep {
   fn needs_descriptor(&self) -> bool {
      !matches!(self, MigrationStep::Sql(_))
   }
}

/// Everything needed to move a database from version `from` to `from + 1`.
#[derive(Debug, Clone)]
pub struct Migration {
   from: u32,
   steps: Vec<MigrationStep>,
}

impl Migration {
   pub fn new(from: u32) -> Self {
      Self {
         from,
         steps: Vec::new(),
      }
   }

   pub fn from_version(&self) -> u32 {
      self.from
   }

   pub fn to_version(&self) -> u32 {
      self.from + 1
   }

   pub fn steps(&self) -> &[MigrationStep] {
      &self.steps
   }

   pub fn sql(mut self, sql: impl Into<Cow<'static, str>>) -> Self {
      self.steps.push(MigrationStep::Sql(sql.into()));
      self
   }

   pub fn rebuild_tables<I, T>(mut self, tables: I) -> Self
   where
      I: IntoIterator<Item = T>,
      T: Into<String>,
   {
      self
         .steps
         .push(MigrationStep::RebuildTables(tables.into_iter().map(Into::into).collect()));
      self
   }

   pub fn rebuild_all(mut self) -> Self {
      self.steps.push(MigrationStep::RebuildAll);
      self
   }

   pub fn add_column(mut self, table: impl Into<String>, column: impl Into<String>) -> Self {
      self.steps.push(MigrationStep::AddColumn {
         table: table.into(),
         column: column.into(),
      });
      self
   }
}

/// Outcome of [`SchemaMigrator::migrate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationReport {
   pub from: u32,
   pub to: u32,
   /// Versions reached, in order
   pub applied: Vec<u32>,
}

/// Read `PRAGMA user_version`
pub async fn user_version(conn: &mut SqliteConnection) -> Result<u32> {
   let version: i64 = sqlx::query_scalar("PRAGMA user_version")
      .fetch_one(&mut *conn)
      .await?;
   Ok(u32::try_from(version).unwrap_or_default())
}

/// Write `PRAGMA user_version`
pub async fn set_user_version(conn: &mut SqliteConnection, version: u32) -> Result<()> {
   // Pragmas take no bound parameters; a u32 is safe to format
   sqlx::raw_sql(&format!("PRAGMA user_version = {version}"))
      .execute(&mut *conn)
      .await?;
   Ok(())
}

/// Applies an ordered chain of [`Migration`]s up to a target version.
///
/// The stored version lives in `PRAGMA user_version`. Each step `v -> v+1` runs in
/// its own immediate transaction together with the version bump, so a failed step
/// leaves the database at `v`. Steps are never skipped: every version between the
/// stored one and the target needs a registered migration.
///
/// # Example
///
/// ```no_run
/// use sqlx_sqlite_table_migrate::{Migration, SchemaDocument, SchemaMigrator};
///
/// # async fn example(conn: &mut sqlx::SqliteConnection, v3_json: &str) -> sqlx_sqlite_table_migrate::Result<()> {
/// let migrator = SchemaMigrator::new(3)
///    .with_migration(Migration::new(1).sql("ALTER TABLE novel ADD COLUMN rating TEXT"))
///    .with_migration(Migration::new(2).rebuild_all())
///    .with_descriptor(3, SchemaDocument::from_json(v3_json)?);
///
/// let report = migrator.migrate_to_target(conn).await?;
/// println!("applied {:?}", report.applied);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct SchemaMigrator {
   target: u32,
   migrations: BTreeMap<u32, Migration>,
   descriptors: HashMap<u32, SchemaDocument>,
}

impl SchemaMigrator {
   pub fn new(target: u32) -> Self {
      Self {
         target,
         ..Default::default()
      }
   }

   /// Register a migration, replacing any other starting at the same version
   pub fn with_migration(mut self, migration: Migration) -> Self {
      self.migrations.insert(migration.from, migration);
      self
   }

   /// Register the schema descriptor of `version`
   pub fn with_descriptor(mut self, version: u32, document: SchemaDocument) -> Self {
      self.descriptors.insert(version, document);
      self
   }

   pub fn target(&self) -> u32 {
      self.target
   }

   pub fn descriptor(&self, version: u32) -> Result<&SchemaDocument> {
      self
         .descriptors
         .get(&version)
         .ok_or(Error::MissingDescriptor(version))
   }

   /// Migrations needed to get from `from` to the target, checked up front
   fn plan(&self, from: u32) -> Result<Vec<&Migration>> {
      if from > self.target {
         return Err(Error::UnsupportedDowngrade {
            stored: from,
            target: self.target,
         });
      }

      (from..self.target)
         .map(|version| {
            let migration = self
               .migrations
               .get(&version)
               .ok_or(Error::MissingMigration(version))?;
            if migration.steps.iter().any(MigrationStep::needs_descriptor) {
               self.descriptor(migration.to_version())?;
            }
            Ok(migration)
         })
         .collect()
   }

   /// Migrate from whatever `PRAGMA user_version` says to the target
   pub async fn migrate_to_target(&self, conn: &mut SqliteConnection) -> Result<MigrationReport> {
      let from = user_version(conn).await?;
      self.migrate(conn, from).await
   }

   /// Migrate a database currently at `from` to the target version
   pub async fn migrate(&self, conn: &mut SqliteConnection, from: u32) -> Result<MigrationReport> {
      let plan = self.plan(from)?;
      let mut report = MigrationReport {
         from,
         to: from,
         applied: Vec::new(),
      };

      if plan.is_empty() {
         return Ok(report);
      }

      // Dropping a parent table must never cascade into its children
      let foreign_keys: bool = sqlx::query_scalar("PRAGMA foreign_keys")
         .fetch_one(&mut *conn)
         .await?;
      sqlx::raw_sql("PRAGMA foreign_keys = OFF")
         .execute(&mut *conn)
         .await?;

      let mut outcome = Ok(());
      for migration in plan {
         if let Err(e) = self.apply(conn, migration).await {
            outcome = Err(e);
            break;
         }
         report.to = migration.to_version();
         report.applied.push(report.to);
      }

      if foreign_keys {
         sqlx::raw_sql("PRAGMA foreign_keys = ON")
            .execute(&mut *conn)
            .await?;
      }
      outcome?;

      self.report_foreign_key_violations(conn).await?;
      info!(from, to = report.to, "schema migrated");
      Ok(report)
   }

   async fn apply(&self, conn: &mut SqliteConnection, migration: &Migration) -> Result<()> {
      let (from, to) = (migration.from, migration.to_version());
      info!(from, to, steps = migration.steps.len(), "applying migration");

      sqlx::raw_sql("BEGIN IMMEDIATE").execute(&mut *conn).await?;

      let result = self.run_steps(conn, migration).await;
      let result = match result {
         Ok(()) => set_user_version(conn, to).await,
         Err(e) => Err(e),
      };

      match result {
         Ok(()) => {
            sqlx::raw_sql("COMMIT").execute(&mut *conn).await?;
            Ok(())
         }
         Err(e) => {
            error!(from, to, error = %e, "migration failed; rolling back");
            if let Err(rollback_error) = sqlx::raw_sql("ROLLBACK").execute(&mut *conn).await {
               error!(from, to, error = %rollback_error, "rollback after failed migration failed");
            }
            Err(Error::MigrationFailed {
               from,
               to,
               source: Box::new(e),
            })
         }
      }
   }

   async fn run_steps(&self, conn: &mut SqliteConnection, migration: &Migration) -> Result<()> {
      for step in &migration.steps {
         match step {
            MigrationStep::Sql(sql) => {
               sqlx::raw_sql(sql).execute(&mut *conn).await?;
            }
            MigrationStep::RebuildTables(tables) => {
               let descriptor = self.descriptor(migration.to_version())?;
               for table in tables {
                  TableRebuild::new(descriptor.entity(table)?)?
                     .run(conn)
                     .await?;
               }
            }
            MigrationStep::RebuildAll => {
               let descriptor = self.descriptor(migration.to_version())?;
               for entity in descriptor.entities() {
                  TableRebuild::new(entity)?.run(conn).await?;
               }
            }
            MigrationStep::AddColumn { table, column } => {
               let descriptor = self.descriptor(migration.to_version())?;
               TableRebuild::new(descriptor.entity(table)?)?
                  .add_column(conn, column)
                  .await?;
            }
         }
      }
      Ok(())
   }

   async fn report_foreign_key_violations(&self, conn: &mut SqliteConnection) -> Result<()> {
      let violations = sqlx::query("PRAGMA foreign_key_check")
         .fetch_all(&mut *conn)
         .await?;

      for row in &violations {
         let table: String = row.try_get(0)?;
         let rowid: Option<i64> = row.try_get(1)?;
         let parent: String = row.try_get(2)?;
         warn!(table = %table, rowid, parent = %parent, "row references a missing parent after migration");
      }
      Ok(())
   }

   /// Create the schema of `version` from its descriptor on an empty database
   pub async fn create_schema(&self, conn: &mut SqliteConnection, version: u32) -> Result<()> {
      let descriptor = self.descriptor(version)?;

      sqlx::raw_sql("BEGIN IMMEDIATE").execute(&mut *conn).await?;

      let result = async {
         for entity in descriptor.entities() {
            TableRebuild::new(entity)?.run(conn).await?;
         }
         set_user_version(conn, version).await
      }
      .await;

      match result {
         Ok(()) => {
            sqlx::raw_sql("COMMIT").execute(&mut *conn).await?;
            info!(version, "created schema");
            Ok(())
         }
         Err(e) => {
            if let Err(rollback_error) = sqlx::raw_sql("ROLLBACK").execute(&mut *conn).await {
               error!(version, error = %rollback_error, "rollback after failed schema creation failed");
            }
            Err(e)
         }
      }
   }
}

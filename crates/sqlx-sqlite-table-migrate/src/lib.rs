//! # sqlx-sqlite-table-migrate
//!
//! Versioned SQLite schema migrations on top of sqlx.
//!
//! ## Core Types
//!
//! - **[`SchemaDocument`]**: JSON description of every table of one schema version
//! - **[`TableRebuild`]**: Rebuilds a live table to match its descriptor
//! - **[`Migration`]**: The steps that move a database from version `v` to `v + 1`
//! - **[`SchemaMigrator`]**: Applies the chain of migrations up to a target version
//!
//! ## Table rebuilds
//!
//! SQLite's `ALTER TABLE` cannot add constraints or change nullability, so a
//! rebuild:
//!
//! 1. creates `new_<table>` from the descriptor's DDL
//! 2. fills NULLs of NOT NULL columns in the live table with their defaults
//! 3. copies all rows across
//! 4. drops the live table
//! 5. renames `new_<table>` to `<table>`
//! 6. recreates the descriptor's indices
//!
//! Table and column names are validated before they are interpolated into SQL,
//! and default values are always bound as parameters.
//!
mod descriptor;
mod error;
mod identifier;
mod migrator;
mod rebuild;

pub use descriptor::{
   DatabaseSchema, EntityDescriptor, FieldDescriptor, IndexDescriptor, SchemaDocument,
   TABLE_NAME_PLACEHOLDER,
};
pub use error::{Error, Result};
pub use identifier::is_valid_identifier;
pub use migrator::{
   Migration, MigrationReport, MigrationStep, SchemaMigrator, set_user_version, user_version,
};
pub use rebuild::{RebuildSummary, SHADOW_PREFIX, TableRebuild, live_columns};

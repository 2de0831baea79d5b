//! Schema-driven Postgres tables.
//!
//! A table is declared once, as a [`TableDefinition`], and loaded into a
//! validated [`TableSchema`]. From that schema tally derives:
//!
//! - the DDL that creates the table ([`generate_ddl`]),
//! - input validation for inserts and updates ([`Validators`]),
//! - schema-aware CRUD ([`TableEngine`]),
//!
//! and, separately, keeps a versioned migration history whose entries are
//! hashed so that edits to already-applied migrations are caught
//! ([`Migrator`]).
//!
//! # Talking to the database
//!
//! Everything goes through an [`Executor`]. [`Traced`] adapts a
//! tokio-postgres client or a pooled connection and logs each statement via
//! tracing:
//!
//! ```ignore
//! let (config, _) = tally_config::load()?;
//! let pool = TracedPool::from_config(&config)?;
//! let db = pool.get().await?.with_actor("importer");
//!
//! let users = TableEngine::new(users_schema);
//! let created = users.insert(&db, &input).await?;
//! ```
//!
//! # Migrations
//!
//! ```ignore
//! let (config, _) = tally_config::load()?;
//! let migrator = Migrator::from_config(&config)?;
//! let report = migrator.migrate(&db).await?;
//! for version in &report.applied {
//!     println!("applied {version}");
//! }
//! ```

pub mod compile;
pub mod crud;
mod error;
pub mod logging;
pub mod meta;
pub mod migrate;
pub mod query;
pub mod schema;
pub mod source;
mod traced;
pub mod validate;

pub use tally_schema::{
    CheckDefinition, Column, ColumnBehavior, ColumnDefinition, ColumnType, DeriveFn,
    ForeignKeyDefinition, FormatModifier, GeneratedKind, IndexDefinition, IndexMethod, InitRule,
    ManagedColumn, PgType, ReferentialAction, Row, SchemaError, SchemaWarning, SkipRule,
    TableDefinition, TableSchema, Value,
};

pub use compile::{ColumnProfile, CompiledTable};
pub use crud::{Combinator, FindOptions, Finder, OrderKey, TableEngine};
pub use error::Error;
pub use meta::{MigrationRecord, Tracker};
pub use migrate::{
    MigrationReport, MigrationState, MigrationStatus, MigrationUnit, Migrator, MigratorConfig,
    Operation, StatusReport,
};
pub use schema::{Ddl, generate_ddl};
pub use source::{DirectorySource, MigrationSource, StaticSource};
pub use traced::{
    BoxFuture, Connection, Executor, ExecutorExt, InTransaction, Traced, TracedPool, connect,
    transaction,
};
pub use validate::{RuleSet, ValidationError, Validators, Violation, ViolationKind};

/// Result type for tally operations.
pub type Result<T> = std::result::Result<T, Error>;

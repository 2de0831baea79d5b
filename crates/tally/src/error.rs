use thiserror::Error;

use crate::validate::ValidationError;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Schema(#[from] tally_schema::SchemaError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("table {table}: column {column} is immutable and cannot be changed")]
    ImmutableField { table: String, column: String },

    #[error("table {table}: expected exactly one matching row, found {matched}")]
    NotFound { table: String, matched: u64 },

    #[error(
        "migration {namespace}/{version} has drifted: recorded hash {recorded}, current hash {computed}"
    )]
    Drift {
        namespace: String,
        version: u64,
        recorded: String,
        computed: String,
    },

    #[error("migration {namespace}/{version} ({label}) failed: {source}")]
    MigrationFailed {
        namespace: String,
        version: u64,
        label: String,
        source: Box<Error>,
    },

    #[error("migration {namespace}/{version} has no down procedure")]
    NoRollbackAvailable { namespace: String, version: u64 },

    #[error("migration version {version} is declared more than once in namespace {namespace}")]
    DuplicateVersion { namespace: String, version: u64 },

    #[error("no migration {version} in namespace {namespace}")]
    UnknownMigration { namespace: String, version: u64 },

    #[error("postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    #[error("pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    #[error("database error: {0}")]
    Database(String),

    #[error("column {column} has type {actual}, expected {expected}")]
    TypeMismatch {
        column: String,
        expected: String,
        actual: String,
    },

    #[error("failed to read column {column} as {expected}: {message}")]
    ColumnReadError {
        column: String,
        expected: String,
        message: String,
    },

    #[error(transparent)]
    Config(#[from] tally_config::ConfigError),

    #[error("failed to initialize logging: {0}")]
    Logging(String),

    #[error("failed to read migrations from {path}: {message}")]
    Source { path: String, message: String },
}

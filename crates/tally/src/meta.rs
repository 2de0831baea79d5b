//! The migration tracking table.
//!
//! The tracker is an ordinary tally table: its shape comes from a fixed
//! [`TableDefinition`], and its DDL from the same generator user tables use.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use tally_schema::{ColumnDefinition, SchemaError, TableDefinition, TableSchema};
use tally_sql::{DeleteStmt, Expr, InsertStmt, OrderBy, SelectColumn, SelectStmt, render};

use crate::compile::Params;
use crate::schema::Ddl;
use crate::{Error, Executor, Result, Row, Value};

const COLUMNS: [&str; 5] = ["namespace", "version", "hash", "label", "applied_at"];

/// The definition of the tracking table.
pub fn tracking_definition(namespace: &str, table: &str) -> TableDefinition {
    TableDefinition::new(namespace, table)
        .doc("One row per applied migration unit.")
        .column(ColumnDefinition::new("namespace", "text").not_null())
        .column(ColumnDefinition::new("version", "bigint").not_null())
        .column(ColumnDefinition::new("hash", "text").not_null())
        .column(ColumnDefinition::new("label", "text").not_null())
        .column(
            ColumnDefinition::new("applied_at", "timestamptz")
                .not_null()
                .default("now()"),
        )
        .primary_key(["namespace", "version"])
}

pub fn tracking_schema(namespace: &str, table: &str) -> std::result::Result<TableSchema, SchemaError> {
    TableSchema::load(tracking_definition(namespace, table))
}

/// A row of the tracking table.
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationRecord {
    pub namespace: String,
    pub version: u64,
    pub hash: String,
    pub label: String,
    pub applied_at: DateTime<Utc>,
}

impl MigrationRecord {
    fn from_row(row: &Row) -> Result<Self> {
        let text = |column: &str| match row.get(column) {
            Some(Value::String(s)) => Ok(s.clone()),
            other => Err(read_error(column, "text", other)),
        };
        let version = match row.get("version") {
            Some(v) => v
                .as_i64()
                .and_then(|n| u64::try_from(n).ok())
                .ok_or_else(|| read_error("version", "bigint", Some(v)))?,
            None => return Err(read_error("version", "bigint", None)),
        };
        let applied_at = match row.get("applied_at") {
            Some(Value::Timestamp(ts)) => *ts,
            other => return Err(read_error("applied_at", "timestamptz", other)),
        };
        Ok(MigrationRecord {
            namespace: text("namespace")?,
            version,
            hash: text("hash")?,
            label: text("label")?,
            applied_at,
        })
    }
}

fn read_error(column: &str, expected: &str, found: Option<&Value>) -> Error {
    Error::ColumnReadError {
        column: column.to_string(),
        expected: expected.to_string(),
        message: match found {
            Some(v) => format!("got {}", v.kind()),
            None => "column missing from result".to_string(),
        },
    }
}

pub(crate) fn version_value(version: u64) -> Result<Value> {
    i64::try_from(version)
        .map(Value::I64)
        .map_err(|_| Error::Database(format!("migration version {version} exceeds bigint range")))
}

/// Reads and writes the tracking table.
#[derive(Debug, Clone)]
pub struct Tracker {
    schema: TableSchema,
}

impl Tracker {
    pub fn new(namespace: &str, table: &str) -> std::result::Result<Self, SchemaError> {
        Ok(Self {
            schema: tracking_schema(namespace, table)?,
        })
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    /// Idempotent bootstrap DDL.
    pub fn bootstrap_sql(&self) -> String {
        Ddl::create_if_not_exists(&self.schema).to_sql()
    }

    pub async fn bootstrap<E: Executor + ?Sized>(&self, db: &E) -> Result<()> {
        db.batch_execute(&self.bootstrap_sql()).await
    }

    /// Whether the tracking table exists yet.
    pub async fn exists<E: Executor + ?Sized>(&self, db: &E) -> Result<bool> {
        let params = [Value::from(self.schema.qualified_name())];
        let rows = db
            .query("SELECT to_regclass($1) IS NOT NULL AS present", &params)
            .await?;
        Ok(matches!(
            rows.first().and_then(|r| r.get("present")),
            Some(Value::Bool(true))
        ))
    }

    fn select(&self, namespace: &str, params: &mut Params) -> SelectStmt {
        SelectStmt::new(self.schema.table_name())
            .columns(COLUMNS.map(|c| SelectColumn::expr(Expr::column(c))))
            .where_(
                Expr::column("namespace").eq(params.bind("namespace", Value::from(namespace))),
            )
    }

    /// All records of a namespace, keyed and ordered by version.
    pub async fn records<E: Executor + ?Sized>(
        &self,
        db: &E,
        namespace: &str,
    ) -> Result<IndexMap<u64, MigrationRecord>> {
        let mut params = Params::new();
        let stmt = self
            .select(namespace, &mut params)
            .order_by(OrderBy::asc(Expr::column("version")));
        let rendered = render(&stmt);
        let rows = db
            .query(&rendered.sql, &params.values_for(&rendered)?)
            .await?;
        rows.iter()
            .map(|row| MigrationRecord::from_row(row).map(|r| (r.version, r)))
            .collect()
    }

    /// One record, read inside the applying transaction.
    pub async fn find<E: Executor + ?Sized>(
        &self,
        db: &E,
        namespace: &str,
        version: u64,
    ) -> Result<Option<MigrationRecord>> {
        let mut params = Params::new();
        let version = params.bind("version", version_value(version)?);
        let stmt = self
            .select(namespace, &mut params)
            .and_where(Expr::column("version").eq(version))
            .for_update();
        let rendered = render(&stmt);
        let rows = db
            .query(&rendered.sql, &params.values_for(&rendered)?)
            .await?;
        rows.first().map(MigrationRecord::from_row).transpose()
    }

    pub async fn insert<E: Executor + ?Sized>(
        &self,
        db: &E,
        namespace: &str,
        version: u64,
        hash: &str,
        label: &str,
    ) -> Result<()> {
        let mut params = Params::new();
        let stmt = InsertStmt::new(self.schema.table_name())
            .column("namespace", params.bind("namespace", Value::from(namespace)))
            .column("version", params.bind("version", version_value(version)?))
            .column("hash", params.bind("hash", Value::from(hash)))
            .column("label", params.bind("label", Value::from(label)));
        let rendered = render(&stmt);
        db.execute(&rendered.sql, &params.values_for(&rendered)?)
            .await?;
        Ok(())
    }

    pub async fn delete<E: Executor + ?Sized>(
        &self,
        db: &E,
        namespace: &str,
        version: u64,
    ) -> Result<u64> {
        let mut params = Params::new();
        let stmt = DeleteStmt::new(self.schema.table_name()).where_(
            Expr::column("namespace")
                .eq(params.bind("namespace", Value::from(namespace)))
                .and(Expr::column("version").eq(params.bind("version", version_value(version)?))),
        );
        let rendered = render(&stmt);
        db.execute(&rendered.sql, &params.values_for(&rendered)?)
            .await
    }
}

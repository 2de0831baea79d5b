//! Executors and traced database connections.
//!
//! Everything in tally talks to the database through [`Executor`], which
//! works in terms of [`Value`] parameters and [`Row`] results. [`Traced`]
//! implements it over any tokio-postgres [`Connection`] and logs every
//! statement via tracing.

use std::future::Future;
use std::ops::Deref;
use std::pin::Pin;

use tokio_postgres::types::ToSql;
use tracing::Instrument;

use crate::query::{SqlParam, pg_row_to_row};
use crate::{Result, Row, Value};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The database surface tally needs.
///
/// Transactions are plain `BEGIN`/`COMMIT`/`ROLLBACK` statements on the same
/// session, so an executor must be bound to a single connection. Inside a
/// transaction the caller opened, see [`ExecutorExt::within_transaction`].
pub trait Executor: Send + Sync {
    /// Execute a statement, returning the number of rows affected.
    fn execute<'a>(&'a self, sql: &'a str, params: &'a [Value]) -> BoxFuture<'a, Result<u64>>;

    /// Execute a query, returning all rows.
    fn query<'a>(&'a self, sql: &'a str, params: &'a [Value]) -> BoxFuture<'a, Result<Vec<Row>>>;

    /// Execute one or more statements without parameters.
    fn batch_execute<'a>(&'a self, sql: &'a str) -> BoxFuture<'a, Result<()>>;

    /// Who is making changes, stamped into audit columns.
    fn actor(&self) -> Option<&str> {
        None
    }

    /// Whether the session already has an open transaction. tally then
    /// scopes its own work with a savepoint instead of `BEGIN`/`COMMIT`.
    fn in_transaction(&self) -> bool {
        false
    }
}

/// Transaction and locking helpers for every [`Executor`].
pub trait ExecutorExt: Executor {
    fn begin(&self) -> BoxFuture<'_, Result<()>> {
        self.batch_execute("BEGIN")
    }

    fn commit(&self) -> BoxFuture<'_, Result<()>> {
        self.batch_execute("COMMIT")
    }

    fn rollback(&self) -> BoxFuture<'_, Result<()>> {
        self.batch_execute("ROLLBACK")
    }

    /// View this executor as running inside a transaction the caller
    /// opened (and will commit).
    ///
    /// ```ignore
    /// db.begin().await?;
    /// let tx = db.within_transaction();
    /// products.update(&tx, &key, &patch).await?;
    /// tickets.remove_where(&tx, &conditions).await?;
    /// db.commit().await?;
    /// ```
    fn within_transaction(&self) -> InTransaction<'_, Self> {
        InTransaction { inner: self }
    }

    /// Block until the session-level advisory lock `key` is held.
    fn advisory_lock(&self, key: i64) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let params = [Value::I64(key)];
            self.execute("SELECT pg_advisory_lock($1)", &params).await?;
            Ok(())
        })
    }

    fn advisory_unlock(&self, key: i64) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let params = [Value::I64(key)];
            self.execute("SELECT pg_advisory_unlock($1)", &params).await?;
            Ok(())
        })
    }
}

impl<E: Executor + ?Sized> ExecutorExt for E {}

impl<E: Executor + ?Sized> Executor for &E {
    fn execute<'a>(&'a self, sql: &'a str, params: &'a [Value]) -> BoxFuture<'a, Result<u64>> {
        (**self).execute(sql, params)
    }

    fn query<'a>(&'a self, sql: &'a str, params: &'a [Value]) -> BoxFuture<'a, Result<Vec<Row>>> {
        (**self).query(sql, params)
    }

    fn batch_execute<'a>(&'a self, sql: &'a str) -> BoxFuture<'a, Result<()>> {
        (**self).batch_execute(sql)
    }

    fn actor(&self) -> Option<&str> {
        (**self).actor()
    }

    fn in_transaction(&self) -> bool {
        (**self).in_transaction()
    }
}

/// An executor whose session has a transaction open already.
///
/// Created by [`ExecutorExt::within_transaction`].
pub struct InTransaction<'a, E: ?Sized> {
    inner: &'a E,
}

impl<E: Executor + ?Sized> Executor for InTransaction<'_, E> {
    fn execute<'a>(&'a self, sql: &'a str, params: &'a [Value]) -> BoxFuture<'a, Result<u64>> {
        self.inner.execute(sql, params)
    }

    fn query<'a>(&'a self, sql: &'a str, params: &'a [Value]) -> BoxFuture<'a, Result<Vec<Row>>> {
        self.inner.query(sql, params)
    }

    fn batch_execute<'a>(&'a self, sql: &'a str) -> BoxFuture<'a, Result<()>> {
        self.inner.batch_execute(sql)
    }

    fn actor(&self) -> Option<&str> {
        self.inner.actor()
    }

    fn in_transaction(&self) -> bool {
        true
    }
}

const SAVEPOINT: &str = "tally_work";

/// Run `work` between `BEGIN` and `COMMIT`, rolling back if it fails.
///
/// When `db` is already in a transaction, `work` runs under a savepoint
/// instead, and only the savepoint is released or rolled back.
pub async fn transaction<E, T>(db: &E, work: impl Future<Output = Result<T>>) -> Result<T>
where
    E: Executor + ?Sized,
{
    let nested = db.in_transaction();
    if nested {
        db.batch_execute(&format!("SAVEPOINT {SAVEPOINT}")).await?;
    } else {
        db.begin().await?;
    }
    match work.await {
        Ok(value) => {
            if nested {
                db.batch_execute(&format!("RELEASE SAVEPOINT {SAVEPOINT}"))
                    .await?;
            } else {
                db.commit().await?;
            }
            Ok(value)
        }
        Err(e) => {
            let undone = if nested {
                db.batch_execute(&format!(
                    "ROLLBACK TO SAVEPOINT {SAVEPOINT}; RELEASE SAVEPOINT {SAVEPOINT}"
                ))
                .await
            } else {
                db.rollback().await
            };
            if let Err(rollback_err) = undone {
                tracing::warn!(error = %rollback_err, nested, "rollback failed");
            }
            Err(e)
        }
    }
}

/// Trait for database connections that can execute queries.
///
/// This is implemented for `tokio_postgres::Client` and `deadpool_postgres::Object`.
pub trait Connection: Send + Sync {
    /// Execute a statement, returning the number of rows affected.
    fn execute<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [&'a (dyn ToSql + Sync)],
    ) -> BoxFuture<'a, std::result::Result<u64, tokio_postgres::Error>>;

    /// Execute a query, returning all rows.
    fn query<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [&'a (dyn ToSql + Sync)],
    ) -> BoxFuture<'a, std::result::Result<Vec<tokio_postgres::Row>, tokio_postgres::Error>>;

    /// Execute statements using the simple query protocol.
    fn batch_execute<'a>(
        &'a self,
        sql: &'a str,
    ) -> BoxFuture<'a, std::result::Result<(), tokio_postgres::Error>>;
}

impl Connection for tokio_postgres::Client {
    fn execute<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [&'a (dyn ToSql + Sync)],
    ) -> BoxFuture<'a, std::result::Result<u64, tokio_postgres::Error>> {
        Box::pin(tokio_postgres::Client::execute(self, sql, params))
    }

    fn query<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [&'a (dyn ToSql + Sync)],
    ) -> BoxFuture<'a, std::result::Result<Vec<tokio_postgres::Row>, tokio_postgres::Error>> {
        Box::pin(tokio_postgres::Client::query(self, sql, params))
    }

    fn batch_execute<'a>(
        &'a self,
        sql: &'a str,
    ) -> BoxFuture<'a, std::result::Result<(), tokio_postgres::Error>> {
        Box::pin(tokio_postgres::Client::batch_execute(self, sql))
    }
}

impl Connection for deadpool_postgres::Object {
    fn execute<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [&'a (dyn ToSql + Sync)],
    ) -> BoxFuture<'a, std::result::Result<u64, tokio_postgres::Error>> {
        // Deref to the underlying Client to avoid recursion
        let client: &tokio_postgres::Client = self.deref();
        Box::pin(client.execute(sql, params))
    }

    fn query<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [&'a (dyn ToSql + Sync)],
    ) -> BoxFuture<'a, std::result::Result<Vec<tokio_postgres::Row>, tokio_postgres::Error>> {
        let client: &tokio_postgres::Client = self.deref();
        Box::pin(client.query(sql, params))
    }

    fn batch_execute<'a>(
        &'a self,
        sql: &'a str,
    ) -> BoxFuture<'a, std::result::Result<(), tokio_postgres::Error>> {
        let client: &tokio_postgres::Client = self.deref();
        Box::pin(client.batch_execute(sql))
    }
}

/// An [`Executor`] over a connection that logs all statements via tracing.
///
/// # Example
///
/// ```ignore
/// use tally::Traced;
///
/// let db = Traced::new(client).with_actor("importer");
/// let row = users.insert(&db, input).await?;
/// ```
pub struct Traced<C: Connection> {
    conn: C,
    actor: Option<String>,
}

impl<C: Connection> Traced<C> {
    pub fn new(conn: C) -> Self {
        Self { conn, actor: None }
    }

    /// Stamp `actor` into `created_by`/`updated_by` of audited tables.
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    /// Get the inner connection (for cases where you need the raw connection).
    pub fn inner(&self) -> &C {
        &self.conn
    }

    pub fn into_inner(self) -> C {
        self.conn
    }
}

impl<C: Connection> Executor for Traced<C> {
    fn execute<'a>(&'a self, sql: &'a str, params: &'a [Value]) -> BoxFuture<'a, Result<u64>> {
        Box::pin(async move {
            let span = tracing::debug_span!(
                "db.execute",
                sql = %sql,
                params = params.len(),
                affected = tracing::field::Empty,
            );
            let wrapped: Vec<SqlParam<'_>> = params.iter().map(SqlParam).collect();
            let refs: Vec<&(dyn ToSql + Sync)> =
                wrapped.iter().map(|p| p as &(dyn ToSql + Sync)).collect();
            let affected = self
                .conn
                .execute(sql, &refs)
                .instrument(span.clone())
                .await?;
            span.record("affected", affected);
            Ok(affected)
        })
    }

    fn query<'a>(&'a self, sql: &'a str, params: &'a [Value]) -> BoxFuture<'a, Result<Vec<Row>>> {
        Box::pin(async move {
            let span = tracing::debug_span!(
                "db.query",
                sql = %sql,
                params = params.len(),
                rows = tracing::field::Empty,
            );
            let wrapped: Vec<SqlParam<'_>> = params.iter().map(SqlParam).collect();
            let refs: Vec<&(dyn ToSql + Sync)> =
                wrapped.iter().map(|p| p as &(dyn ToSql + Sync)).collect();
            let rows = self
                .conn
                .query(sql, &refs)
                .instrument(span.clone())
                .await?;
            span.record("rows", rows.len());
            rows.iter().map(pg_row_to_row).collect()
        })
    }

    fn batch_execute<'a>(&'a self, sql: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let span = tracing::debug_span!("db.batch", sql = %sql);
            self.conn.batch_execute(sql).instrument(span).await?;
            Ok(())
        })
    }

    fn actor(&self) -> Option<&str> {
        self.actor.as_deref()
    }
}

/// Open a single traced connection.
///
/// The connection task is spawned onto the current tokio runtime.
pub async fn connect(url: &str) -> Result<Traced<tokio_postgres::Client>> {
    let (client, connection) = tokio_postgres::connect(url, tokio_postgres::NoTls).await?;
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::error!(error = %e, "database connection error");
        }
    });
    Ok(Traced::new(client))
}

/// A traced connection pool.
///
/// Wraps a `deadpool_postgres::Pool` and hands out [`Traced`] connections, so
/// all queries are automatically logged.
#[derive(Clone)]
pub struct TracedPool {
    inner: deadpool_postgres::Pool,
}

impl TracedPool {
    pub fn new(pool: deadpool_postgres::Pool) -> Self {
        Self { inner: pool }
    }

    /// Build a pool from a connection URL.
    pub fn connect(url: &str) -> Result<Self> {
        let pg_config: tokio_postgres::Config = url.parse()?;
        let manager = deadpool_postgres::Manager::new(pg_config, tokio_postgres::NoTls);
        let pool = deadpool_postgres::Pool::builder(manager)
            .build()
            .map_err(|e| crate::Error::Database(e.to_string()))?;
        Ok(Self { inner: pool })
    }

    /// Build a pool from `database.url` of a loaded configuration.
    pub fn from_config(config: &tally_config::Config) -> Result<Self> {
        Self::connect(config.database.require_url()?)
    }

    /// Get a traced connection from the pool.
    pub async fn get(&self) -> Result<Traced<deadpool_postgres::Object>> {
        let conn = self.inner.get().await?;
        Ok(Traced::new(conn))
    }

    /// Get the inner pool (for cases where you need the raw pool).
    pub fn inner(&self) -> &deadpool_postgres::Pool {
        &self.inner
    }
}

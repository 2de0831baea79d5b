//! Schema-aware create, read, update and delete.
//!
//! One [`TableEngine`] serves any table: everything table-specific comes
//! from the [`TableSchema`] it is built from.
//!
//! ```ignore
//! let users = TableEngine::new(users_schema);
//! let row = users.insert(&db, &input).await?;
//! let active = users
//!     .find_where(&conditions, Combinator::And, FindOptions::default().limit(50))?
//!     .fetch(&db)
//!     .await?;
//! ```

use tally_schema::{ManagedColumn, TableSchema};
use tally_sql::{
    DeleteStmt, Expr, InsertStmt, OrderBy, RenderedSql, Returning, SelectColumn, SelectStmt,
    UpdateStmt, render,
};

use crate::compile::{CompiledTable, Params};
use crate::traced::transaction;
use crate::validate::{ValidationError, Validators, Violation, ViolationKind};
use crate::{Error, Executor, Result, Row, Value};

/// How the conditions of a query are joined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Combinator {
    #[default]
    And,
    Or,
}

/// One ORDER BY key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderKey {
    pub column: String,
    pub descending: bool,
}

impl OrderKey {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            descending: false,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            descending: true,
        }
    }
}

/// Ordering and paging of a [`Finder`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FindOptions {
    pub order_by: Vec<OrderKey>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    /// Also return logically deleted rows.
    pub include_deleted: bool,
}

impl FindOptions {
    pub fn order_by(mut self, key: OrderKey) -> Self {
        self.order_by.push(key);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn include_deleted(mut self) -> Self {
        self.include_deleted = true;
        self
    }
}

/// A compiled SELECT. Building one touches nothing; [`Finder::fetch`] runs
/// it, as often as needed.
#[derive(Debug, Clone)]
pub struct Finder {
    rendered: RenderedSql,
    values: Vec<Value>,
}

impl Finder {
    pub fn sql(&self) -> &str {
        &self.rendered.sql
    }

    pub fn params(&self) -> &[Value] {
        &self.values
    }

    pub async fn fetch<E: Executor + ?Sized>(&self, db: &E) -> Result<Vec<Row>> {
        db.query(&self.rendered.sql, &self.values).await
    }
}

fn limit_expr(n: u64) -> Expr {
    Expr::int(i64::try_from(n).unwrap_or(i64::MAX))
}

/// CRUD over one schema-declared table.
#[derive(Debug, Clone)]
pub struct TableEngine {
    schema: TableSchema,
    compiled: CompiledTable,
    validators: Validators,
}

impl TableEngine {
    pub fn new(schema: TableSchema) -> Self {
        for warning in schema.warnings() {
            tracing::warn!(table = %schema.qualified_name(), "{warning}");
        }
        Self {
            compiled: CompiledTable::new(&schema),
            validators: Validators::new(&schema),
            schema,
        }
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn compiled(&self) -> &CompiledTable {
        &self.compiled
    }

    pub fn validators(&self) -> &Validators {
        &self.validators
    }

    fn empty_conditions(&self) -> Error {
        ValidationError::single(self.schema.name(), "", ViolationKind::EmptyConditions).into()
    }

    fn not_found(&self, matched: usize) -> Error {
        Error::NotFound {
            table: self.schema.name().to_string(),
            matched: matched as u64,
        }
    }

    /// `deleted_at IS NULL` for soft-delete tables.
    fn live_only(&self) -> Option<Expr> {
        self.schema
            .managed(ManagedColumn::DeletedAt)
            .map(|c| Expr::column(c.name.as_str()).is_null())
    }

    /// Key conditions, restricted to live rows.
    fn key_filter(&self, key: &Row, params: &mut Params) -> Result<Expr> {
        let exprs = self.compiled.compile_conditions(key, "key", params)?;
        Expr::all(exprs.into_iter().chain(self.live_only())).ok_or_else(|| self.empty_conditions())
    }

    fn condition_filter(
        &self,
        conditions: &Row,
        combinator: Combinator,
        params: &mut Params,
    ) -> Result<Option<Expr>> {
        let exprs = self
            .compiled
            .compile_conditions(conditions, "where", params)?;
        Ok(match combinator {
            Combinator::And => Expr::all(exprs),
            Combinator::Or => Expr::any(exprs),
        })
    }

    /// Insert one row and return it as stored.
    ///
    /// Nothing reaches the database when validation fails.
    pub async fn insert<E: Executor + ?Sized>(&self, db: &E, row: &Row) -> Result<Row> {
        self.validators.insert.check(row)?;
        let write = self.compiled.compile_insert(row, db.actor())?;

        let mut stmt = InsertStmt::new(self.compiled.table().clone()).returning(Returning::All);
        for (column, expr) in write.assignments {
            stmt = stmt.column(column, expr);
        }
        let rendered = render(&stmt);
        let rows = db
            .query(&rendered.sql, &write.params.values_for(&rendered)?)
            .await?;
        rows.into_iter().next().ok_or_else(|| {
            Error::Database(format!("insert into {} returned no row", self.schema.name()))
        })
    }

    /// Update the one live row matching `key` with `patch`.
    ///
    /// Runs in a transaction that locks the row first. Immutable and
    /// generated columns may appear in the patch only with their stored
    /// value. A patch that changes nothing returns the stored row untouched.
    ///
    /// Pass [`ExecutorExt::within_transaction`](crate::ExecutorExt::within_transaction)
    /// to run inside a transaction of your own; the update then uses a
    /// savepoint and leaves committing to you.
    pub async fn update<E: Executor + ?Sized>(
        &self,
        db: &E,
        key: &Row,
        patch: &Row,
    ) -> Result<Row> {
        self.validators.update.check(patch)?;
        if key.is_empty() {
            return Err(self.empty_conditions());
        }
        let mut write = self.compiled.compile_update(patch, db.actor())?;
        let filter = self.key_filter(key, &mut write.params)?;

        let lock = render(
            &SelectStmt::new(self.compiled.table().clone())
                .where_(filter.clone())
                .for_update(),
        );
        let lock_values = write.params.values_for(&lock)?;

        let changes = write.assignments.iter().any(|(column, _)| {
            self.compiled
                .profile(column.as_str())
                .is_some_and(|p| p.column.managed.is_none())
        });
        let mut stmt = UpdateStmt::new(self.compiled.table().clone())
            .where_(filter)
            .returning(Returning::All);
        for (column, expr) in write.assignments {
            stmt = stmt.set(column, expr);
        }
        for predicate in write.predicates {
            stmt = stmt.and_where(predicate);
        }
        let update = render(&stmt);
        let update_values = write.params.values_for(&update)?;
        let guarded = write.guarded;

        transaction(db, async {
            let mut locked = db.query(&lock.sql, &lock_values).await?;
            if locked.len() != 1 {
                return Err(self.not_found(locked.len()));
            }
            let stored = locked.remove(0);

            for (column, value) in &guarded {
                let current = stored.get(column).unwrap_or(&Value::Null);
                if !current.same_as(value) {
                    return Err(Error::ImmutableField {
                        table: self.schema.name().to_string(),
                        column: column.clone(),
                    });
                }
            }

            if !changes {
                tracing::debug!(table = %self.schema.name(), "update changes nothing");
                return Ok(stored);
            }

            let rows = db.query(&update.sql, &update_values).await?;
            rows.into_iter().next().ok_or_else(|| self.not_found(0))
        })
        .await
    }

    /// Build a query for rows matching `conditions`.
    ///
    /// Empty conditions match every row.
    pub fn find_where(
        &self,
        conditions: &Row,
        combinator: Combinator,
        options: FindOptions,
    ) -> Result<Finder> {
        let mut params = Params::new();
        let matched = self.condition_filter(conditions, combinator, &mut params)?;

        let unknown: Vec<Violation> = options
            .order_by
            .iter()
            .filter(|key| self.compiled.profile(&key.column).is_none())
            .map(|key| Violation {
                column: key.column.clone(),
                kind: ViolationKind::UnknownColumn,
            })
            .collect();
        if !unknown.is_empty() {
            return Err(ValidationError {
                table: self.schema.name().to_string(),
                violations: unknown,
            }
            .into());
        }

        let mut stmt = SelectStmt::new(self.compiled.table().clone());
        if let Some(expr) = matched {
            stmt = stmt.and_where(expr);
        }
        if !options.include_deleted
            && let Some(live) = self.live_only()
        {
            stmt = stmt.and_where(live);
        }
        for key in &options.order_by {
            let expr = Expr::column(key.column.as_str());
            stmt = stmt.order_by(if key.descending {
                OrderBy::desc(expr)
            } else {
                OrderBy::asc(expr)
            });
        }
        if let Some(limit) = options.limit {
            stmt = stmt.limit(limit_expr(limit));
        }
        if let Some(offset) = options.offset {
            stmt = stmt.offset(limit_expr(offset));
        }

        let rendered = render(&stmt);
        let values = params.values_for(&rendered)?;
        Ok(Finder { rendered, values })
    }

    /// The live row with this key, if any.
    pub async fn find_by_key<E: Executor + ?Sized>(
        &self,
        db: &E,
        key: &Row,
    ) -> Result<Option<Row>> {
        if key.is_empty() {
            return Err(self.empty_conditions());
        }
        let mut rows = self
            .find_where(key, Combinator::And, FindOptions::default())?
            .fetch(db)
            .await?;
        match rows.len() {
            0 | 1 => Ok(rows.pop()),
            matched => Err(self.not_found(matched)),
        }
    }

    /// Count live rows matching `conditions`.
    pub async fn count_where<E: Executor + ?Sized>(
        &self,
        db: &E,
        conditions: &Row,
        combinator: Combinator,
    ) -> Result<u64> {
        let mut params = Params::new();
        let count = Expr::FnCall {
            name: "count".to_string(),
            args: vec![Expr::Raw("*".to_string())],
        };
        let mut stmt = SelectStmt::new(self.compiled.table().clone())
            .column(SelectColumn::aliased(count, "count"));
        if let Some(expr) = self.condition_filter(conditions, combinator, &mut params)? {
            stmt = stmt.and_where(expr);
        }
        if let Some(live) = self.live_only() {
            stmt = stmt.and_where(live);
        }

        let rendered = render(&stmt);
        let rows = db
            .query(&rendered.sql, &params.values_for(&rendered)?)
            .await?;
        let count = rows.first().and_then(|r| r.get("count"));
        count
            .and_then(Value::as_i64)
            .and_then(|n| u64::try_from(n).ok())
            .ok_or_else(|| Error::ColumnReadError {
                column: "count".to_string(),
                expected: "bigint".to_string(),
                message: match count {
                    Some(v) => format!("got {}", v.kind()),
                    None => "column missing from result".to_string(),
                },
            })
    }

    /// Remove the live rows matching every condition.
    ///
    /// Soft-delete tables stamp `deleted_at` (and the audit columns) instead
    /// of deleting. Returns the number of rows affected.
    pub async fn remove_where<E: Executor + ?Sized>(&self, db: &E, conditions: &Row) -> Result<u64> {
        if conditions.is_empty() {
            return Err(self.empty_conditions());
        }
        let mut params = Params::new();
        let filter = self
            .condition_filter(conditions, Combinator::And, &mut params)?
            .ok_or_else(|| self.empty_conditions())?;

        let rendered = match self.schema.managed(ManagedColumn::DeletedAt) {
            Some(deleted_at) => {
                let mut stmt = UpdateStmt::new(self.compiled.table().clone())
                    .set(deleted_at.name.as_str(), Expr::Now)
                    .where_(filter)
                    .and_where(Expr::column(deleted_at.name.as_str()).is_null());
                if let Some(updated_at) = self.schema.managed(ManagedColumn::UpdatedAt) {
                    stmt = stmt.set(updated_at.name.as_str(), Expr::Now);
                }
                if let Some(updated_by) = self.schema.managed(ManagedColumn::UpdatedBy) {
                    let actor = params.bind("audit:updated_by", Value::from(db.actor()));
                    stmt = stmt.set(updated_by.name.as_str(), actor);
                }
                render(&stmt)
            }
            None => render(&DeleteStmt::new(self.compiled.table().clone()).where_(filter)),
        };
        let removed = db
            .execute(&rendered.sql, &params.values_for(&rendered)?)
            .await?;
        tracing::debug!(table = %self.schema.name(), removed, "removed rows");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_schema::{ColumnDefinition, TableDefinition};

    fn tickets() -> TableEngine {
        TableEngine::new(
            TableDefinition::new("public", "tickets")
                .soft_delete()
                .column(ColumnDefinition::new("id", "bigint").primary_key())
                .column(ColumnDefinition::new("status", "text").not_null())
                .column(ColumnDefinition::new("owner", "text"))
                .load()
                .unwrap(),
        )
    }

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_find_where_or_with_paging() {
        let finder = tickets()
            .find_where(
                &row(&[("status", "open".into()), ("owner", Value::Null)]),
                Combinator::Or,
                FindOptions::default()
                    .order_by(OrderKey::desc("id"))
                    .limit(10)
                    .offset(20),
            )
            .unwrap();
        insta::assert_snapshot!(finder.sql(), @r#"
SELECT *
FROM "public"."tickets"
WHERE ("status" = $1 OR "owner" IS NULL) AND "deleted_at" IS NULL
ORDER BY "id" DESC
LIMIT 10
OFFSET 20
"#);
        assert_eq!(finder.params(), [Value::from("open")]);
    }

    #[test]
    fn test_find_where_include_deleted() {
        let finder = tickets()
            .find_where(
                &Row::new(),
                Combinator::And,
                FindOptions::default().include_deleted(),
            )
            .unwrap();
        assert_eq!(finder.sql(), "SELECT *\nFROM \"public\".\"tickets\"");
        assert!(finder.params().is_empty());
    }

    #[test]
    fn test_find_where_rejects_unknown_columns() {
        let engine = tickets();
        let err = engine
            .find_where(
                &row(&[("color", "red".into())]),
                Combinator::And,
                FindOptions::default(),
            )
            .unwrap_err();
        assert!(matches!(err, Error::Validation(ref v) if v.mentions("color")));

        let err = engine
            .find_where(
                &Row::new(),
                Combinator::And,
                FindOptions::default().order_by(OrderKey::asc("rank")),
            )
            .unwrap_err();
        assert!(matches!(err, Error::Validation(ref v) if v.mentions("rank")));
    }
}

//! DDL for schema-declared tables.
//!
//! ## Statement order
//!
//! [`generate_ddl`] emits, for one table:
//!
//! 1. `CREATE TABLE` with column clauses only,
//! 2. one `ALTER TABLE ... ADD CONSTRAINT` per primary key, unique, check and
//!    foreign key constraint (in that order),
//! 3. `CREATE INDEX` statements.
//!
//! Equal schemas always produce byte-identical output.
//!
//! ## Example
//!
//! ```ignore
//! use tally::{TableDefinition, ColumnDefinition, generate_ddl};
//!
//! let users = TableDefinition::new("public", "users")
//!     .column(ColumnDefinition::new("id", "uuid").primary_key().default("gen_random_uuid()"))
//!     .column(ColumnDefinition::new("email", "text").not_null().unique())
//!     .load()?;
//!
//! println!("{}", generate_ddl(&users).to_sql());
//! ```

pub mod codegen;

pub use codegen::{Ddl, generate_ddl};

use tally_schema::{
    CheckConstraint, Column, ForeignKey, Index, IndexMethod, PrimaryKey, ReferentialAction,
    TableSchema, UniqueConstraint,
};
use tally_sql::{TableName, quote_ident, quote_idents};

/// The column clause used inside `CREATE TABLE`.
pub fn column_def_sql(col: &Column) -> String {
    let mut def = format!("{} {}", quote_ident(&col.name), col.ty);

    if let Some(generated) = &col.generated {
        let kind = if generated.is_always() {
            "ALWAYS"
        } else {
            "BY DEFAULT"
        };
        match &generated.expression {
            None => def.push_str(&format!(" GENERATED {kind} AS IDENTITY")),
            Some(expr) => {
                let storage = if generated.stored { "STORED" } else { "VIRTUAL" };
                def.push_str(&format!(" GENERATED ALWAYS AS ({expr}) {storage}"));
            }
        }
    }

    if !col.nullable {
        def.push_str(" NOT NULL");
    }

    if let Some(default) = &col.default {
        def.push_str(&format!(" DEFAULT {default}"));
    }

    def
}

/// Generate the CREATE TABLE statement.
///
/// Constraints are added separately (see [`generate_ddl`]) unless `inline`
/// is set, in which case they become table constraints of this statement.
pub fn create_table_sql(schema: &TableSchema, if_not_exists: bool, inline: bool) -> String {
    let guard = if if_not_exists { "IF NOT EXISTS " } else { "" };
    let mut sql = format!("CREATE TABLE {guard}{} (\n", schema.qualified_name());

    let mut parts: Vec<String> = schema
        .all_columns()
        .iter()
        .map(|col| format!("    {}", column_def_sql(col)))
        .collect();

    if inline {
        let constraints = schema.constraints();
        let table = schema.table_name();
        parts.extend(
            constraints
                .primary_key
                .iter()
                .map(primary_key_clause)
                .chain(constraints.unique.iter().map(unique_clause))
                .chain(constraints.checks.iter().map(check_clause))
                .chain(
                    constraints
                        .foreign_keys
                        .iter()
                        .map(|fk| foreign_key_clause(&table, fk)),
                )
                .map(|clause| format!("    {clause}")),
        );
    }

    sql.push_str(&parts.join(",\n"));
    sql.push_str("\n);");

    sql
}

fn primary_key_clause(pk: &PrimaryKey) -> String {
    format!(
        "CONSTRAINT {} PRIMARY KEY ({})",
        quote_ident(&pk.name),
        quote_idents(&pk.columns)
    )
}

fn unique_clause(uq: &UniqueConstraint) -> String {
    format!(
        "CONSTRAINT {} UNIQUE ({})",
        quote_ident(&uq.name),
        quote_idents(&uq.columns)
    )
}

fn check_clause(check: &CheckConstraint) -> String {
    format!("CONSTRAINT {} CHECK ({})", quote_ident(&check.name), check.expr)
}

/// References default to the referencing table's namespace.
fn foreign_key_clause(table: &TableName, fk: &ForeignKey) -> String {
    let namespace = fk
        .references_namespace
        .clone()
        .or_else(|| table.namespace.clone());
    let target = match namespace {
        Some(ns) => TableName::qualified(ns, &fk.references_table),
        None => TableName::new(&fk.references_table),
    };
    let mut clause = format!(
        "CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
        quote_ident(&fk.name),
        quote_idents(&fk.columns),
        target,
        quote_idents(&fk.references_columns)
    );
    if fk.on_delete != ReferentialAction::NoAction {
        clause.push_str(&format!(" ON DELETE {}", fk.on_delete.to_sql()));
    }
    clause
}

fn add_constraint_sql(schema: &TableSchema, clause: String) -> String {
    format!("ALTER TABLE {} ADD {clause};", schema.qualified_name())
}

pub fn add_primary_key_sql(schema: &TableSchema, pk: &PrimaryKey) -> String {
    add_constraint_sql(schema, primary_key_clause(pk))
}

pub fn add_unique_sql(schema: &TableSchema, uq: &UniqueConstraint) -> String {
    add_constraint_sql(schema, unique_clause(uq))
}

pub fn add_check_sql(schema: &TableSchema, check: &CheckConstraint) -> String {
    add_constraint_sql(schema, check_clause(check))
}

pub fn add_foreign_key_sql(schema: &TableSchema, fk: &ForeignKey) -> String {
    add_constraint_sql(schema, foreign_key_clause(&schema.table_name(), fk))
}

/// Generate CREATE INDEX SQL statement for a given index.
pub fn create_index_sql(schema: &TableSchema, idx: &Index, if_not_exists: bool) -> String {
    let unique = if idx.unique { "UNIQUE " } else { "" };
    let guard = if if_not_exists { "IF NOT EXISTS " } else { "" };
    let method = match idx.method {
        IndexMethod::Btree => String::new(),
        other => format!(" USING {}", other.as_str()),
    };
    let cols: Vec<_> = idx.columns.iter().map(|c| c.to_sql()).collect();
    let where_clause = idx
        .where_clause
        .as_ref()
        .map(|w| format!(" WHERE {}", w))
        .unwrap_or_default();
    format!(
        "CREATE {}INDEX {}{} ON {}{} ({}){};",
        unique,
        guard,
        quote_ident(&idx.name),
        schema.qualified_name(),
        method,
        cols.join(", "),
        where_clause
    )
}

/// The inverse of [`generate_ddl`].
pub fn drop_table_sql(schema: &TableSchema) -> String {
    format!("DROP TABLE {};", schema.qualified_name())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_schema::{ColumnDefinition, GeneratedKind, TableDefinition};

    fn column(def: ColumnDefinition) -> Column {
        let schema = TableSchema::load(TableDefinition::new("public", "t").column(def)).unwrap();
        schema.all_columns()[0].clone()
    }

    #[test]
    fn test_column_def_sql() {
        assert_eq!(
            column_def_sql(&column(ColumnDefinition::new("name", "character varying").length(40))),
            "\"name\" varchar(40)"
        );
        assert_eq!(
            column_def_sql(&column(
                ColumnDefinition::new("id", "bigint")
                    .primary_key()
                    .identity(GeneratedKind::ByDefault)
            )),
            "\"id\" bigint GENERATED BY DEFAULT AS IDENTITY NOT NULL"
        );
        assert_eq!(
            column_def_sql(&column(
                ColumnDefinition::new("total", "numeric(10,2)").generated_as("price * qty")
            )),
            "\"total\" numeric(10,2) GENERATED ALWAYS AS (price * qty) STORED"
        );
        assert_eq!(
            column_def_sql(&column(
                ColumnDefinition::new("state", "text").not_null().default("'new'")
            )),
            "\"state\" text NOT NULL DEFAULT 'new'"
        );
    }

    #[test]
    fn test_drop_table_sql() {
        let schema = TableSchema::load(
            TableDefinition::new("billing", "order")
                .column(ColumnDefinition::new("id", "bigint").primary_key()),
        )
        .unwrap();
        assert_eq!(drop_table_sql(&schema), "DROP TABLE \"billing\".\"order\";");
    }
}

use tally_schema::TableSchema;
use tally_sql::quote_ident;

use super::{
    add_check_sql, add_foreign_key_sql, add_primary_key_sql, add_unique_sql, create_index_sql,
    create_table_sql, drop_table_sql,
};

/// An ordered list of DDL statements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ddl {
    pub statements: Vec<String>,
}

impl Ddl {
    /// Idempotent DDL for bootstrapping a table that may already exist.
    ///
    /// Constraints are inlined into `CREATE TABLE IF NOT EXISTS`, since
    /// `ADD CONSTRAINT` has no `IF NOT EXISTS` form.
    pub fn create_if_not_exists(schema: &TableSchema) -> Ddl {
        let mut statements = vec![
            format!(
                "CREATE SCHEMA IF NOT EXISTS {};",
                quote_ident(schema.namespace())
            ),
            create_table_sql(schema, true, true),
        ];
        statements.extend(
            schema
                .constraints()
                .indexes
                .iter()
                .map(|idx| create_index_sql(schema, idx, true)),
        );
        Ddl { statements }
    }

    /// All statements as one script.
    pub fn to_sql(&self) -> String {
        self.statements.join("\n\n")
    }
}

/// Generate the DDL that creates a table with all its constraints and indexes.
pub fn generate_ddl(schema: &TableSchema) -> Ddl {
    let constraints = schema.constraints();
    let mut statements = vec![create_table_sql(schema, false, false)];

    statements.extend(
        constraints
            .primary_key
            .iter()
            .map(|pk| add_primary_key_sql(schema, pk)),
    );
    statements.extend(constraints.unique.iter().map(|uq| add_unique_sql(schema, uq)));
    statements.extend(constraints.checks.iter().map(|ck| add_check_sql(schema, ck)));
    statements.extend(
        constraints
            .foreign_keys
            .iter()
            .map(|fk| add_foreign_key_sql(schema, fk)),
    );
    statements.extend(
        constraints
            .indexes
            .iter()
            .map(|idx| create_index_sql(schema, idx, false)),
    );

    Ddl { statements }
}

/// A malformed or inconsistent table definition, reported by
/// [`TableSchema::load`](crate::TableSchema::load).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("table definition has an empty {what} name")]
    EmptyName { what: &'static str },

    #[error("table {table}: no columns declared")]
    NoColumns { table: String },

    #[error("table {table}: column {column} declared more than once")]
    DuplicateColumn { table: String, column: String },

    #[error("table {table}: column {column} collides with the {feature} column of the same name")]
    ReservedColumn {
        table: String,
        column: String,
        feature: &'static str,
    },

    #[error("table {table}: column {column}: invalid type {ty:?}")]
    InvalidType {
        table: String,
        column: String,
        ty: String,
    },

    #[error("table {table}: column {column}: {reason}")]
    InvalidColumn {
        table: String,
        column: String,
        reason: String,
    },

    #[error("table {table}: {constraint} references unknown column {column}")]
    UnknownColumn {
        table: String,
        constraint: String,
        column: String,
    },

    #[error("table {table}: {constraint} has no columns")]
    EmptyConstraint { table: String, constraint: String },

    #[error("table {table}: primary key {reason}")]
    InvalidPrimaryKey { table: String, reason: String },

    #[error(
        "table {table}: foreign key {constraint} has {columns} column(s) but references {referenced}"
    )]
    ForeignKeyArity {
        table: String,
        constraint: String,
        columns: usize,
        referenced: usize,
    },

    #[error("table {table}: constraint name {name} used more than once")]
    DuplicateConstraint { table: String, name: String },

    #[error("table definition is not valid: {0}")]
    Parse(String),
}

//! Table schema model for tally.
//!
//! A [`TableDefinition`] is what users write (by hand in JSON/TOML, or with the
//! builder API). [`TableSchema::load`] validates it eagerly and produces the
//! immutable model that the DDL generator, the validators and the CRUD engine
//! all consume.

use serde::{Deserialize, Serialize};
use std::fmt;

mod behavior;
pub use behavior::*;

mod definition;
pub use definition::*;

mod error;
pub use error::SchemaError;

mod load;

mod types;
pub use types::{ColumnType, PgType};

mod value;
pub use value::{Row, Value};

/// Namespace used when a definition doesn't name one.
pub const DEFAULT_NAMESPACE: &str = "public";

/// Whether a generated column is `GENERATED ALWAYS` or `GENERATED BY DEFAULT`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GeneratedKind {
    #[default]
    Always,
    ByDefault,
}

/// A database-generated column.
///
/// With an expression this is a computed column (`GENERATED ALWAYS AS (..)`);
/// without one it is an identity column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Generated {
    #[serde(default)]
    pub kind: GeneratedKind,
    #[serde(default)]
    pub expression: Option<String>,
    /// `STORED` when true, `VIRTUAL` otherwise. Ignored for identity columns.
    #[serde(default = "default_true")]
    pub stored: bool,
}

fn default_true() -> bool {
    true
}

impl Generated {
    pub fn is_identity(&self) -> bool {
        self.expression.is_none()
    }

    /// The application may never write this column.
    pub fn is_always(&self) -> bool {
        self.kind == GeneratedKind::Always
    }
}

/// Columns tally adds and maintains on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ManagedColumn {
    CreatedAt,
    UpdatedAt,
    CreatedBy,
    UpdatedBy,
    DeletedAt,
}

impl ManagedColumn {
    pub const AUDIT: [ManagedColumn; 4] = [
        ManagedColumn::CreatedAt,
        ManagedColumn::UpdatedAt,
        ManagedColumn::CreatedBy,
        ManagedColumn::UpdatedBy,
    ];

    pub fn column_name(self) -> &'static str {
        match self {
            ManagedColumn::CreatedAt => "created_at",
            ManagedColumn::UpdatedAt => "updated_at",
            ManagedColumn::CreatedBy => "created_by",
            ManagedColumn::UpdatedBy => "updated_by",
            ManagedColumn::DeletedAt => "deleted_at",
        }
    }

    /// Name of the table option that introduces this column.
    pub fn feature(self) -> &'static str {
        match self {
            ManagedColumn::DeletedAt => "soft delete",
            _ => "audit",
        }
    }

    fn column(self) -> Column {
        let (ty, nullable, default, immutable) = match self {
            ManagedColumn::CreatedAt => ("timestamptz", false, Some("now()"), true),
            ManagedColumn::UpdatedAt => ("timestamptz", false, Some("now()"), false),
            ManagedColumn::CreatedBy => ("text", true, None, true),
            ManagedColumn::UpdatedBy => ("text", true, None, false),
            ManagedColumn::DeletedAt => ("timestamptz", true, None, false),
        };
        Column {
            name: self.column_name().to_string(),
            ty: ColumnType {
                kind: if ty == "text" {
                    PgType::Text
                } else {
                    PgType::Timestamptz
                },
                name: ty.to_string(),
                modifier: None,
                array: false,
            },
            nullable,
            default: default.map(str::to_string),
            primary_key: false,
            immutable,
            generated: None,
            behavior: ColumnBehavior::default(),
            managed: Some(self),
            doc: None,
        }
    }
}

/// A loaded column.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub ty: ColumnType,
    pub nullable: bool,
    /// Default value expression, rendered verbatim.
    pub default: Option<String>,
    pub primary_key: bool,
    /// Primary-key columns are always immutable.
    pub immutable: bool,
    pub generated: Option<Generated>,
    pub behavior: ColumnBehavior,
    /// Set for columns added by the `audit` and `soft_delete` options.
    pub managed: Option<ManagedColumn>,
    pub doc: Option<String>,
}

impl Column {
    /// Must an insert supply this column?
    pub fn is_required(&self) -> bool {
        !self.nullable
            && self.default.is_none()
            && self.generated.is_none()
            && self.managed.is_none()
            && self.behavior.init != Some(InitRule::Now)
    }
}

/// What happens to referencing rows when the referenced row goes away.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReferentialAction {
    #[default]
    NoAction,
    Restrict,
    Cascade,
    SetNull,
    SetDefault,
}

impl ReferentialAction {
    pub fn to_sql(self) -> &'static str {
        match self {
            ReferentialAction::NoAction => "NO ACTION",
            ReferentialAction::Restrict => "RESTRICT",
            ReferentialAction::Cascade => "CASCADE",
            ReferentialAction::SetNull => "SET NULL",
            ReferentialAction::SetDefault => "SET DEFAULT",
        }
    }
}

/// The table's primary key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimaryKey {
    pub name: String,
    pub columns: Vec<String>,
}

/// A UNIQUE constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniqueConstraint {
    pub name: String,
    pub columns: Vec<String>,
}

/// A foreign key constraint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ForeignKey {
    pub name: String,
    /// Column(s) in this table
    pub columns: Vec<String>,
    /// Namespace of the referenced table, when qualified
    pub references_namespace: Option<String>,
    /// Referenced table
    pub references_table: String,
    /// Referenced column(s)
    pub references_columns: Vec<String>,
    pub on_delete: ReferentialAction,
}

/// A table CHECK constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckConstraint {
    pub name: String,
    pub expr: String,
}

/// Index access method.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexMethod {
    #[default]
    Btree,
    Hash,
    Gin,
    Gist,
    Brin,
}

impl IndexMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            IndexMethod::Btree => "btree",
            IndexMethod::Hash => "hash",
            IndexMethod::Gin => "gin",
            IndexMethod::Gist => "gist",
            IndexMethod::Brin => "brin",
        }
    }
}

/// Sort order for index columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    /// Ascending order (default)
    #[default]
    Asc,
    /// Descending order
    Desc,
}

impl SortOrder {
    /// Returns the SQL keyword for this sort order, or empty string for ASC (default).
    pub fn to_sql(&self) -> &'static str {
        match self {
            SortOrder::Asc => "",
            SortOrder::Desc => " DESC",
        }
    }
}

/// Nulls ordering for index columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NullsOrder {
    /// Use database default (NULLS LAST for ASC, NULLS FIRST for DESC)
    #[default]
    Default,
    /// Sort nulls before non-null values
    First,
    /// Sort nulls after non-null values
    Last,
}

impl NullsOrder {
    /// Returns the SQL clause for this nulls ordering, or empty string for default.
    pub fn to_sql(&self) -> &'static str {
        match self {
            NullsOrder::Default => "",
            NullsOrder::First => " NULLS FIRST",
            NullsOrder::Last => " NULLS LAST",
        }
    }
}

/// A column in an index with optional sort order and nulls ordering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexColumn {
    /// Column name
    pub name: String,
    /// Sort order (ASC or DESC)
    pub order: SortOrder,
    /// Nulls ordering (NULLS FIRST, NULLS LAST, or default)
    pub nulls: NullsOrder,
}

impl IndexColumn {
    /// Create a new index column with default (ASC) ordering and default nulls.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            order: SortOrder::Asc,
            nulls: NullsOrder::Default,
        }
    }

    /// Create a new index column with DESC ordering and default nulls.
    pub fn desc(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            order: SortOrder::Desc,
            nulls: NullsOrder::Default,
        }
    }

    /// Returns the SQL fragment for this column (quoted name + order + nulls).
    pub fn to_sql(&self) -> String {
        format!(
            "{}{}{}",
            tally_sql::quote_ident(&self.name),
            self.order.to_sql(),
            self.nulls.to_sql()
        )
    }

    /// Parse a column specification like "col_name", "col_name DESC", or "col_name DESC NULLS FIRST".
    pub fn parse(spec: &str) -> Self {
        let spec = spec.trim();
        let upper = spec.to_uppercase();

        // Parse nulls ordering first (it comes at the end)
        let (spec_without_nulls, nulls) = if upper.ends_with(" NULLS FIRST") {
            (&spec[..spec.len() - 12], NullsOrder::First)
        } else if upper.ends_with(" NULLS LAST") {
            (&spec[..spec.len() - 11], NullsOrder::Last)
        } else {
            (spec, NullsOrder::Default)
        };

        let trimmed = spec_without_nulls.trim();
        let upper_trimmed = trimmed.to_uppercase();

        let (name, order) = if upper_trimmed.ends_with(" DESC") {
            (trimmed[..trimmed.len() - 5].trim(), SortOrder::Desc)
        } else if upper_trimmed.ends_with(" ASC") {
            (trimmed[..trimmed.len() - 4].trim(), SortOrder::Asc)
        } else {
            (trimmed, SortOrder::Asc)
        };

        Self {
            name: unquote_ident(name),
            order,
            nulls,
        }
    }
}

fn unquote_ident(s: &str) -> String {
    let s = s.trim();
    if s.len() >= 2 && s.starts_with('"') && s.ends_with('"') {
        return s[1..s.len() - 1].replace("\"\"", "\"");
    }
    s.to_string()
}

/// A database index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Index {
    pub name: String,
    /// Column(s) in the index with sort order
    pub columns: Vec<IndexColumn>,
    pub method: IndexMethod,
    pub unique: bool,
    /// Optional WHERE clause for partial indexes
    pub where_clause: Option<String>,
}

/// Everything a table declares besides its columns. Names are resolved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Constraints {
    pub primary_key: Option<PrimaryKey>,
    pub unique: Vec<UniqueConstraint>,
    pub foreign_keys: Vec<ForeignKey>,
    pub checks: Vec<CheckConstraint>,
    pub indexes: Vec<Index>,
}

/// A non-fatal inconsistency found while loading a definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaWarning {
    pub column: Option<String>,
    pub message: String,
}

impl fmt::Display for SchemaWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.column {
            Some(column) => write!(f, "column {column}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// A validated table schema.
///
/// Built only by [`TableSchema::load`]; there is no way to mutate it after
/// that. Changing a table means writing a new definition (and a migration).
#[derive(Debug, Clone, PartialEq)]
pub struct TableSchema {
    namespace: String,
    name: String,
    audit: bool,
    soft_delete: bool,
    version: Option<String>,
    doc: Option<String>,
    columns: Vec<Column>,
    constraints: Constraints,
    warnings: Vec<SchemaWarning>,
}

impl TableSchema {
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The schema-qualified table name for the SQL builder.
    pub fn table_name(&self) -> tally_sql::TableName {
        tally_sql::TableName::qualified(&self.namespace, &self.name)
    }

    /// `"namespace"."name"`, quoted.
    pub fn qualified_name(&self) -> String {
        self.table_name().to_string()
    }

    pub fn audit(&self) -> bool {
        self.audit
    }

    pub fn soft_delete(&self) -> bool {
        self.soft_delete
    }

    /// The schema-definition version tag (unrelated to migration versions).
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn doc(&self) -> Option<&str> {
        self.doc.as_deref()
    }

    /// Declared columns followed by managed columns.
    pub fn all_columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn declared_columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter().filter(|c| c.managed.is_none())
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// The managed column of the given kind, if the table carries it.
    pub fn managed(&self, kind: ManagedColumn) -> Option<&Column> {
        self.columns.iter().find(|c| c.managed == Some(kind))
    }

    /// Primary key column names; empty when the table has none.
    pub fn primary_key(&self) -> &[String] {
        self.constraints
            .primary_key
            .as_ref()
            .map(|pk| pk.columns.as_slice())
            .unwrap_or(&[])
    }

    pub fn constraints(&self) -> &Constraints {
        &self.constraints
    }

    pub fn warnings(&self) -> &[SchemaWarning] {
        &self.warnings
    }
}

/// Parse a foreign key reference string.
///
/// Supports two formats:
/// - `table(column)` (parentheses)
/// - `table.column` (dot-separated)
///
/// The table part may itself be qualified (`app.users(id)`, `app.users.id`).
/// Returns `Some((table, column))` on success, `None` on parse failure.
pub fn parse_fk_reference(fk_ref: &str) -> Option<(&str, &str)> {
    if let Some(paren_idx) = fk_ref.find('(')
        && fk_ref.ends_with(')')
    {
        let table = &fk_ref[..paren_idx];
        let col = &fk_ref[paren_idx + 1..fk_ref.len() - 1];
        if !table.is_empty() && !col.is_empty() {
            return Some((table, col));
        }
        return None;
    }

    if let Some((table, col)) = fk_ref.rsplit_once('.')
        && !table.is_empty()
        && !col.is_empty()
    {
        return Some((table, col));
    }

    None
}

#[cfg(test)]
mod tests;

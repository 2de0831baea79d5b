//! Declarative table definitions, as written by users.

use serde::{Deserialize, Serialize};

use crate::{
    ColumnBehavior, FormatModifier, Generated, GeneratedKind, IndexMethod, InitRule,
    ReferentialAction, SchemaError, SkipRule, TableSchema,
};

fn default_namespace() -> String {
    crate::DEFAULT_NAMESPACE.to_string()
}

/// A table definition, before validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TableDefinition {
    #[serde(default = "default_namespace")]
    pub namespace: String,
    pub name: String,
    /// Adds `created_at`, `updated_at`, `created_by` and `updated_by`.
    #[serde(default)]
    pub audit: bool,
    /// Adds `deleted_at`; removals become logical.
    #[serde(default)]
    pub soft_delete: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<String>,
    #[serde(default)]
    pub columns: Vec<ColumnDefinition>,
    #[serde(default)]
    pub constraints: ConstraintDefinitions,
}

/// A column definition, before validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ColumnDefinition {
    pub name: String,
    /// Database type string; may carry an inline length (`varchar(100)`).
    #[serde(rename = "type")]
    pub ty: String,
    pub length: Option<u32>,
    /// Defaults to nullable, except for primary-key columns.
    pub nullable: Option<bool>,
    pub default: Option<String>,
    /// Shorthand for a single-column primary key entry.
    pub primary_key: bool,
    /// Shorthand for a single-column UNIQUE constraint.
    pub unique: bool,
    pub immutable: bool,
    /// Shorthand for a single-column foreign key: `users(id)` or `users.id`.
    pub references: Option<String>,
    pub generated: Option<Generated>,
    pub behavior: ColumnBehavior,
    pub doc: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConstraintDefinitions {
    pub primary_key: Vec<String>,
    pub unique: Vec<UniqueDefinition>,
    pub foreign_keys: Vec<ForeignKeyDefinition>,
    pub checks: Vec<CheckDefinition>,
    pub indexes: Vec<IndexDefinition>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UniqueDefinition {
    #[serde(default)]
    pub name: Option<String>,
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ForeignKeyDefinition {
    #[serde(default)]
    pub name: Option<String>,
    pub columns: Vec<String>,
    /// Referenced table, optionally qualified: `users` or `app.users`.
    pub references: String,
    pub referenced_columns: Vec<String>,
    #[serde(default)]
    pub on_delete: ReferentialAction,
}

impl ForeignKeyDefinition {
    pub fn new<S: Into<String>>(
        columns: impl IntoIterator<Item = S>,
        references: impl Into<String>,
        referenced_columns: impl IntoIterator<Item = S>,
    ) -> Self {
        Self {
            name: None,
            columns: columns.into_iter().map(Into::into).collect(),
            references: references.into(),
            referenced_columns: referenced_columns.into_iter().map(Into::into).collect(),
            on_delete: ReferentialAction::NoAction,
        }
    }

    pub fn on_delete(mut self, action: ReferentialAction) -> Self {
        self.on_delete = action;
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CheckDefinition {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(alias = "expr")]
    pub expression: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IndexDefinition {
    #[serde(default)]
    pub name: Option<String>,
    /// Column specs: `"created_at DESC NULLS LAST"`.
    pub columns: Vec<String>,
    #[serde(default, alias = "kind")]
    pub method: IndexMethod,
    #[serde(default)]
    pub unique: bool,
    #[serde(default, rename = "where")]
    pub where_clause: Option<String>,
}

impl IndexDefinition {
    pub fn new<S: Into<String>>(columns: impl IntoIterator<Item = S>) -> Self {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn method(mut self, method: IndexMethod) -> Self {
        self.method = method;
        self
    }

    pub fn where_(mut self, predicate: impl Into<String>) -> Self {
        self.where_clause = Some(predicate.into());
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

impl TableDefinition {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            audit: false,
            soft_delete: false,
            version: None,
            doc: None,
            columns: Vec::new(),
            constraints: ConstraintDefinitions::default(),
        }
    }

    /// Parse a definition from JSON.
    pub fn from_json(json: &str) -> Result<Self, SchemaError> {
        serde_json::from_str(json).map_err(|e| SchemaError::Parse(e.to_string()))
    }

    /// Parse a definition from TOML.
    pub fn from_toml(text: &str) -> Result<Self, SchemaError> {
        toml::from_str(text).map_err(|e| SchemaError::Parse(e.to_string()))
    }

    /// Validate into a [`TableSchema`].
    pub fn load(self) -> Result<TableSchema, SchemaError> {
        TableSchema::load(self)
    }

    pub fn audit(mut self) -> Self {
        self.audit = true;
        self
    }

    pub fn soft_delete(mut self) -> Self {
        self.soft_delete = true;
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = Some(doc.into());
        self
    }

    pub fn column(mut self, column: ColumnDefinition) -> Self {
        self.columns.push(column);
        self
    }

    pub fn primary_key<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.constraints.primary_key = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn unique<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.constraints.unique.push(UniqueDefinition {
            name: None,
            columns: columns.into_iter().map(Into::into).collect(),
        });
        self
    }

    pub fn foreign_key(mut self, fk: ForeignKeyDefinition) -> Self {
        self.constraints.foreign_keys.push(fk);
        self
    }

    pub fn check(mut self, expression: impl Into<String>) -> Self {
        self.constraints.checks.push(CheckDefinition {
            name: None,
            expression: expression.into(),
        });
        self
    }

    pub fn index(mut self, index: IndexDefinition) -> Self {
        self.constraints.indexes.push(index);
        self
    }
}

impl ColumnDefinition {
    pub fn new(name: impl Into<String>, ty: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty: ty.into(),
            ..<Self as Default>::default()
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = Some(false);
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = Some(true);
        self
    }

    pub fn default(mut self, expr: impl Into<String>) -> Self {
        self.default = Some(expr.into());
        self
    }

    pub fn length(mut self, length: u32) -> Self {
        self.length = Some(length);
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn immutable(mut self) -> Self {
        self.immutable = true;
        self
    }

    pub fn references(mut self, target: impl Into<String>) -> Self {
        self.references = Some(target.into());
        self
    }

    /// `GENERATED ALWAYS AS (expr) STORED`.
    pub fn generated_as(mut self, expression: impl Into<String>) -> Self {
        self.generated = Some(Generated {
            kind: GeneratedKind::Always,
            expression: Some(expression.into()),
            stored: true,
        });
        self
    }

    /// `GENERATED {ALWAYS | BY DEFAULT} AS IDENTITY`.
    pub fn identity(mut self, kind: GeneratedKind) -> Self {
        self.generated = Some(Generated {
            kind,
            expression: None,
            stored: true,
        });
        self
    }

    pub fn skip(mut self, rule: SkipRule) -> Self {
        self.behavior.skip = rule;
        self
    }

    pub fn init(mut self, rule: InitRule) -> Self {
        self.behavior.init = Some(rule);
        self
    }

    pub fn conditional(mut self) -> Self {
        self.behavior.conditional = true;
        self
    }

    pub fn cast(mut self, ty: impl Into<String>) -> Self {
        self.behavior.cast = Some(ty.into());
        self
    }

    pub fn json(mut self) -> Self {
        self.behavior.format = FormatModifier::Json;
        self
    }

    pub fn doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = Some(doc.into());
        self
    }
}

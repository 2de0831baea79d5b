//! Per-column write behavior.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Row, Value};

/// Decides, from the shape of an input row, whether a column is left out of a
/// statement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkipRule {
    /// Always included.
    #[default]
    Never,
    /// Skipped when the input row does not mention the column.
    IfAbsent,
    /// Skipped when the input value is absent or null.
    IfNull,
    /// Skipped unless the named column is present in the input row.
    UnlessPresent(String),
}

impl SkipRule {
    /// Evaluate the rule for `column` against an input row.
    pub fn skips(&self, column: &str, row: &Row) -> bool {
        match self {
            SkipRule::Never => false,
            SkipRule::IfAbsent => !row.contains_key(column),
            SkipRule::IfNull => row.get(column).is_none_or(Value::is_null),
            SkipRule::UnlessPresent(other) => !row.contains_key(other.as_str()),
        }
    }
}

/// A programmatic value derivation.
#[derive(Clone, Copy)]
pub struct DeriveFn(pub fn(&Row) -> Option<Value>);

impl DeriveFn {
    pub fn call(&self, row: &Row) -> Option<Value> {
        (self.0)(row)
    }
}

impl fmt::Debug for DeriveFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DeriveFn(..)")
    }
}

impl PartialEq for DeriveFn {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::fn_addr_eq(self.0, other.0)
    }
}

/// Transforms or derives a column's value before it is written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InitRule {
    /// Trim surrounding whitespace from string input.
    Trim,
    /// Lowercase string input.
    Lowercase,
    /// Let the database stamp the current time (`NOW()`).
    Now,
    /// Compute the value from the whole input row. Returning `None` falls
    /// back to the raw input.
    #[serde(skip)]
    Derived(DeriveFn),
}

/// How the input value is encoded before being bound.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FormatModifier {
    #[default]
    Raw,
    /// JSON-encode the input (json/jsonb columns only).
    Json,
}

/// The behavior bundle attached to a column.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ColumnBehavior {
    pub skip: SkipRule,
    pub init: Option<InitRule>,
    /// On update, the input value becomes a WHERE predicate instead of a SET.
    #[serde(alias = "conditional_update")]
    pub conditional: bool,
    /// Explicit cast applied to the bound parameter (`$1::citext`).
    pub cast: Option<String>,
    pub format: FormatModifier,
}

//! Input validation derived from a table schema.
//!
//! [`Validators::new`] turns a [`TableSchema`] into two [`RuleSet`]s, one for
//! inserts and one for updates. A rule set checks a whole input row and
//! reports every problem it finds rather than stopping at the first.

use std::fmt;

use indexmap::IndexMap;
use tally_schema::{Column, InitRule, TableSchema};

use crate::compile::coerce;
use crate::Row;

/// A failed validation: every violation found in one input row.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("table {table}: {}", display_violations(.violations))]
pub struct ValidationError {
    pub table: String,
    pub violations: Vec<Violation>,
}

impl ValidationError {
    pub fn single(table: impl Into<String>, column: impl Into<String>, kind: ViolationKind) -> Self {
        Self {
            table: table.into(),
            violations: vec![Violation {
                column: column.into(),
                kind,
            }],
        }
    }

    /// Whether `column` has a violation of any kind.
    pub fn mentions(&self, column: &str) -> bool {
        self.violations.iter().any(|v| v.column == column)
    }
}

fn display_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Clone, PartialEq)]
pub struct Violation {
    pub column: String,
    pub kind: ViolationKind,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.column.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{}: {}", self.column, self.kind)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ViolationKind {
    /// A required column is absent.
    Missing,
    NullNotAllowed,
    UnknownColumn,
    /// Audit and soft-delete columns are written by tally only.
    ManagedColumn,
    /// `GENERATED ALWAYS` columns cannot be written.
    Generated,
    TypeMismatch { expected: String, found: &'static str },
    TooLong { max: usize, len: usize },
    OutOfRange,
    InvalidFormat { expected: String },
    NotInEnum { allowed: Vec<String> },
    /// A removal without any condition.
    EmptyConditions,
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViolationKind::Missing => f.write_str("required"),
            ViolationKind::NullNotAllowed => f.write_str("must not be null"),
            ViolationKind::UnknownColumn => f.write_str("unknown column"),
            ViolationKind::ManagedColumn => f.write_str("managed by tally and cannot be set"),
            ViolationKind::Generated => f.write_str("generated by the database and cannot be set"),
            ViolationKind::TypeMismatch { expected, found } => {
                write!(f, "expected {expected}, got {found}")
            }
            ViolationKind::TooLong { max, len } => {
                write!(f, "at most {max} characters allowed, got {len}")
            }
            ViolationKind::OutOfRange => f.write_str("out of range for column type"),
            ViolationKind::InvalidFormat { expected } => write!(f, "not a valid {expected}"),
            ViolationKind::NotInEnum { allowed } => {
                write!(f, "must be one of {}", allowed.join(", "))
            }
            ViolationKind::EmptyConditions => f.write_str("at least one condition is required"),
        }
    }
}

/// What a rule set does with one column.
#[derive(Debug, Clone)]
struct ColumnRule {
    column: Column,
    required: bool,
    /// Reason the column can never be written in this mode.
    forbidden: Option<ViolationKind>,
    allowed: Option<Vec<String>>,
}

/// Validation rules for one write mode.
#[derive(Debug, Clone)]
pub struct RuleSet {
    table: String,
    rules: IndexMap<String, ColumnRule>,
}

impl RuleSet {
    /// Check an input row. All violations are collected.
    pub fn check(&self, row: &Row) -> Result<(), ValidationError> {
        let mut violations = Vec::new();
        let mut push = |column: &str, kind| {
            violations.push(Violation {
                column: column.to_string(),
                kind,
            })
        };

        for (name, value) in row {
            let Some(rule) = self.rules.get(name) else {
                push(name, ViolationKind::UnknownColumn);
                continue;
            };
            if let Some(kind) = &rule.forbidden {
                push(name, kind.clone());
                continue;
            }
            if value.is_null() {
                if !rule.column.nullable {
                    push(name, ViolationKind::NullNotAllowed);
                }
                continue;
            }
            if let Err(kind) = coerce(value, &rule.column.ty) {
                push(name, kind);
                continue;
            }
            if let (Some(allowed), Some(s)) = (&rule.allowed, value.as_str())
                && !allowed.iter().any(|a| a == s)
            {
                push(
                    name,
                    ViolationKind::NotInEnum {
                        allowed: allowed.clone(),
                    },
                );
            }
        }

        for (name, rule) in &self.rules {
            if rule.required && !row.contains_key(name) && !derives_value(&rule.column, row) {
                push(name, ViolationKind::Missing);
            }
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(ValidationError {
                table: self.table.clone(),
                violations,
            })
        }
    }

    /// Allowed values for `column`, when a CHECK constraint enumerates them.
    pub fn enum_values(&self, column: &str) -> Option<&[String]> {
        self.rules.get(column)?.allowed.as_deref()
    }

    pub fn is_required(&self, column: &str) -> bool {
        self.rules.get(column).is_some_and(|r| r.required)
    }
}

/// A derived init rule can stand in for a missing required value.
fn derives_value(column: &Column, row: &Row) -> bool {
    match &column.behavior.init {
        Some(InitRule::Derived(f)) => f.call(row).is_some_and(|v| !v.is_null()),
        _ => false,
    }
}

/// The insert and update rule sets of a table.
#[derive(Debug, Clone)]
pub struct Validators {
    pub insert: RuleSet,
    pub update: RuleSet,
}

impl Validators {
    pub fn new(schema: &TableSchema) -> Self {
        let mut enums: IndexMap<String, Vec<String>> = IndexMap::new();
        for check in &schema.constraints().checks {
            match parse_enum_check(&check.expr) {
                Some((column, values)) => {
                    enums.insert(column, values);
                }
                None => tracing::debug!(
                    table = %schema.name(),
                    check = %check.name,
                    "check constraint is not an enumeration, not validated client-side"
                ),
            }
        }

        let rule = |column: &Column, insert: bool| {
            let forbidden = if column.managed.is_some() {
                Some(ViolationKind::ManagedColumn)
            } else if insert && column.generated.as_ref().is_some_and(|g| g.is_always()) {
                Some(ViolationKind::Generated)
            } else {
                None
            };
            let rule = ColumnRule {
                column: column.clone(),
                required: insert && column.is_required(),
                forbidden,
                allowed: enums.get(&column.name).cloned(),
            };
            (column.name.clone(), rule)
        };

        let columns = schema.all_columns();
        Validators {
            insert: RuleSet {
                table: schema.name().to_string(),
                rules: columns.iter().map(|c| rule(c, true)).collect(),
            },
            update: RuleSet {
                table: schema.name().to_string(),
                rules: columns.iter().map(|c| rule(c, false)).collect(),
            },
        }
    }
}

/// Recognize enumerating CHECK expressions.
///
/// Handles `col IN ('a', 'b')` and the form Postgres reports back,
/// `col = ANY (ARRAY['a'::text, 'b'::text])`, with optional quoting, casts
/// and outer parentheses. Anything else yields `None`.
pub fn parse_enum_check(expr: &str) -> Option<(String, Vec<String>)> {
    let expr = strip_parens(expr.trim());
    let lower = expr.to_ascii_lowercase();

    let in_idx = lower.find(" in ");
    let any_idx = lower.find("= any");
    let (lhs, list) = match (in_idx, any_idx) {
        (Some(i), a) if a.is_none_or(|a| i < a) => {
            let list = strip_parens(expr[i + 4..].trim());
            (&expr[..i], list)
        }
        (_, Some(a)) => {
            let rest = unwrap_expr(expr[a + 5..].trim());
            let rest = rest
                .strip_prefix("ARRAY")
                .or_else(|| rest.strip_prefix("array"))?
                .trim();
            let list = rest.strip_prefix('[')?.strip_suffix(']')?;
            (&expr[..a], list)
        }
        _ => return None,
    };

    let column = column_name(lhs)?;
    let values = split_literals(list)?;
    if values.is_empty() {
        return None;
    }
    Some((column, values))
}

/// Remove balanced outer parentheses, repeatedly.
fn strip_parens(mut s: &str) -> &str {
    loop {
        let Some(inner) = s.strip_prefix('(').and_then(|r| r.strip_suffix(')')) else {
            return s;
        };
        // `(a) OR (b)` starts and ends with parens but isn't wrapped.
        let mut depth = 0i32;
        for c in inner.chars() {
            match c {
                '(' => depth += 1,
                ')' => depth -= 1,
                _ => {}
            }
            if depth < 0 {
                return s;
            }
        }
        s = inner.trim();
    }
}

/// `(x)::text[]` → `(x)`; leaves casts inside literals and arrays alone.
fn strip_cast(s: &str) -> &str {
    let Some(idx) = s.rfind("::") else {
        return s;
    };
    let (before, ty) = (s[..idx].trim_end(), &s[idx + 2..]);
    let plain_type = ty
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, ' ' | '_' | '[' | ']'));
    if plain_type && (before.ends_with(')') || before.ends_with(']')) {
        before
    } else {
        s
    }
}

/// Strip outer parentheses and trailing casts until neither is left.
fn unwrap_expr(mut s: &str) -> &str {
    loop {
        let next = strip_cast(strip_parens(s.trim()));
        if next == s {
            return s;
        }
        s = next;
    }
}

/// `"status"`, `status`, `(status)::text` → `status`
fn column_name(lhs: &str) -> Option<String> {
    let mut lhs = unwrap_expr(lhs.trim());
    if let Some((before, _cast)) = lhs.split_once("::") {
        lhs = unwrap_expr(before);
    }
    let name = if lhs.len() >= 2 && lhs.starts_with('"') && lhs.ends_with('"') {
        lhs[1..lhs.len() - 1].replace("\"\"", "\"")
    } else {
        lhs.to_string()
    };
    let valid = !name.is_empty() && name.chars().all(|c| c.is_alphanumeric() || c == '_');
    valid.then_some(name)
}

/// `'a'::text, 'b'` → `["a", "b"]`. Fails on anything that isn't a string literal.
fn split_literals(list: &str) -> Option<Vec<String>> {
    let mut values = Vec::new();
    let mut chars = list.chars().peekable();
    loop {
        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }
        if chars.peek().is_none() {
            break;
        }
        if chars.next()? != '\'' {
            return None;
        }
        let mut value = String::new();
        loop {
            match chars.next()? {
                '\'' if chars.peek() == Some(&'\'') => {
                    chars.next();
                    value.push('\'');
                }
                '\'' => break,
                c => value.push(c),
            }
        }
        values.push(value);
        // Skip an optional `::type` and the separating comma.
        for c in chars.by_ref() {
            if c == ',' {
                break;
            }
        }
    }
    Some(values)
}

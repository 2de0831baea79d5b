//! Column compilation: which columns a write touches, and with what.
//!
//! A [`CompiledTable`] is built once per schema. It classifies every column
//! for insert and update, resolves behavior rules against an input row, and
//! coerces input values to the column's database type.

use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use indexmap::IndexMap;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use tally_schema::{
    Column, ColumnType, FormatModifier, Generated, InitRule, ManagedColumn, PgType, TableSchema,
};
use tally_sql::{ColumnName, Expr, ParamName, RenderedSql, TableName};
use uuid::Uuid;

use crate::validate::{ValidationError, Violation, ViolationKind};
use crate::{Row, Value};

/// Special input strings the database resolves itself.
const TIMESTAMP_LITERALS: [&str; 6] = ["now", "today", "tomorrow", "yesterday", "infinity", "-infinity"];
const TIME_LITERALS: [&str; 1] = ["now"];

/// How a column participates in writes.
#[derive(Debug, Clone)]
pub struct ColumnProfile {
    pub column: Column,
    /// May appear in an INSERT column list.
    pub insertable: bool,
    /// May appear in an UPDATE SET list.
    pub updatable: bool,
    /// Patch values are compared against the stored row instead of written.
    pub guarded: bool,
}

impl ColumnProfile {
    fn new(column: &Column) -> Self {
        let generated = column.generated.as_ref();
        let managed = column.managed.is_some();
        Self {
            insertable: !managed && !generated.is_some_and(Generated::is_always),
            updatable: !managed && !column.immutable && generated.is_none(),
            guarded: !managed && (column.immutable || generated.is_some()),
            column: column.clone(),
        }
    }
}

/// Named parameter values, bound in the order the renderer numbers them.
#[derive(Debug, Clone, Default)]
pub struct Params {
    values: IndexMap<ParamName, Value>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a value and return its placeholder.
    pub fn bind(&mut self, name: impl Into<ParamName>, value: Value) -> Expr {
        let name = name.into();
        self.values.insert(name.clone(), value);
        Expr::Param(name)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(&ParamName::new(name))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Values in `$1, $2, ...` order for a rendered statement.
    pub fn values_for(&self, rendered: &RenderedSql) -> crate::Result<Vec<Value>> {
        rendered
            .params
            .iter()
            .map(|name| {
                self.values
                    .get(name)
                    .cloned()
                    .ok_or_else(|| crate::Error::Database(format!("unbound parameter {name}")))
            })
            .collect()
    }
}

/// The column-level pieces of one INSERT or UPDATE.
#[derive(Debug, Clone, Default)]
pub struct CompiledWrite {
    /// `column = expr` pairs, in schema column order.
    pub assignments: Vec<(ColumnName, Expr)>,
    /// Extra WHERE predicates from conditional columns (update only).
    pub predicates: Vec<Expr>,
    pub params: Params,
    /// Coerced patch values for immutable and generated columns (update only).
    pub guarded: Vec<(String, Value)>,
}

enum Resolved {
    Now,
    Value(Value),
}

/// Per-table column profiles.
#[derive(Debug, Clone)]
pub struct CompiledTable {
    name: String,
    table: TableName,
    soft_delete: bool,
    profiles: Vec<ColumnProfile>,
}

impl CompiledTable {
    pub fn new(schema: &TableSchema) -> Self {
        Self {
            name: schema.name().to_string(),
            table: schema.table_name(),
            soft_delete: schema.soft_delete(),
            profiles: schema.all_columns().iter().map(ColumnProfile::new).collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &TableName {
        &self.table
    }

    pub fn soft_delete(&self) -> bool {
        self.soft_delete
    }

    pub fn profiles(&self) -> &[ColumnProfile] {
        &self.profiles
    }

    pub fn profile(&self, column: &str) -> Option<&ColumnProfile> {
        self.profiles.iter().find(|p| p.column.name == column)
    }

    /// Compile the column list of an INSERT.
    ///
    /// Audit `created_by`/`updated_by` are stamped with `actor` when given;
    /// the timestamps come from column defaults.
    pub fn compile_insert(
        &self,
        row: &Row,
        actor: Option<&str>,
    ) -> Result<CompiledWrite, ValidationError> {
        let mut write = CompiledWrite::default();
        let mut violations = Vec::new();

        for profile in &self.profiles {
            let column = &profile.column;
            if let Some(managed) = column.managed {
                if let (Some(actor), ManagedColumn::CreatedBy | ManagedColumn::UpdatedBy) =
                    (actor, managed)
                {
                    let expr = write
                        .params
                        .bind(format!("audit:{}", column.name), Value::from(actor));
                    write.assignments.push((ColumnName::from(&column.name), expr));
                }
                continue;
            }
            if !profile.insertable {
                continue;
            }
            match resolve(column, row) {
                None => {}
                Some(Resolved::Now) => {
                    write
                        .assignments
                        .push((ColumnName::from(&column.name), Expr::Now));
                }
                Some(Resolved::Value(value)) => match encode(column, &value) {
                    Ok(value) => {
                        let expr = placeholder(&mut write.params, "set", column, value);
                        write.assignments.push((ColumnName::from(&column.name), expr));
                    }
                    Err(kind) => violations.push(violation(column, kind)),
                },
            }
        }

        self.finish(write, violations)
    }

    /// Compile the SET list and conditional predicates of an UPDATE.
    ///
    /// Audited tables always get `updated_at = NOW()` and
    /// `updated_by = actor`.
    pub fn compile_update(
        &self,
        patch: &Row,
        actor: Option<&str>,
    ) -> Result<CompiledWrite, ValidationError> {
        let mut write = CompiledWrite::default();
        let mut violations = Vec::new();

        for profile in &self.profiles {
            let column = &profile.column;
            let name = ColumnName::from(&column.name);
            match column.managed {
                Some(ManagedColumn::UpdatedAt) => {
                    write.assignments.push((name, Expr::Now));
                    continue;
                }
                Some(ManagedColumn::UpdatedBy) => {
                    let expr = write
                        .params
                        .bind(format!("audit:{}", column.name), Value::from(actor));
                    write.assignments.push((name, expr));
                    continue;
                }
                Some(_) => continue,
                None => {}
            }

            if profile.guarded {
                if let Some(value) = patch.get(&column.name) {
                    match encode(column, value) {
                        Ok(value) => write.guarded.push((column.name.clone(), value)),
                        Err(kind) => violations.push(violation(column, kind)),
                    }
                }
                continue;
            }

            if column.behavior.conditional {
                if column.behavior.skip.skips(&column.name, patch) {
                    continue;
                }
                if let Some(value) = patch.get(&column.name) {
                    match predicate(&mut write.params, "cond", column, value) {
                        Ok(expr) => write.predicates.push(expr),
                        Err(kind) => violations.push(violation(column, kind)),
                    }
                }
                continue;
            }

            if !profile.updatable {
                continue;
            }
            match resolve(column, patch) {
                None => {}
                Some(Resolved::Now) => write.assignments.push((name, Expr::Now)),
                Some(Resolved::Value(value)) => match encode(column, &value) {
                    Ok(value) => {
                        let expr = placeholder(&mut write.params, "set", column, value);
                        write.assignments.push((name, expr));
                    }
                    Err(kind) => violations.push(violation(column, kind)),
                },
            }
        }

        self.finish(write, violations)
    }

    /// Compile `column = value` conditions (`IS NULL` for nulls).
    ///
    /// `prefix` keeps parameter names apart when several condition sets end
    /// up in one statement.
    pub fn compile_conditions(
        &self,
        conditions: &Row,
        prefix: &str,
        params: &mut Params,
    ) -> Result<Vec<Expr>, ValidationError> {
        let mut exprs = Vec::with_capacity(conditions.len());
        let mut violations = Vec::new();
        for (name, value) in conditions {
            let Some(profile) = self.profile(name) else {
                violations.push(Violation {
                    column: name.clone(),
                    kind: ViolationKind::UnknownColumn,
                });
                continue;
            };
            match predicate(params, prefix, &profile.column, value) {
                Ok(expr) => exprs.push(expr),
                Err(kind) => violations.push(violation(&profile.column, kind)),
            }
        }
        if violations.is_empty() {
            Ok(exprs)
        } else {
            Err(ValidationError {
                table: self.name.clone(),
                violations,
            })
        }
    }

    fn finish(
        &self,
        write: CompiledWrite,
        violations: Vec<Violation>,
    ) -> Result<CompiledWrite, ValidationError> {
        if violations.is_empty() {
            Ok(write)
        } else {
            Err(ValidationError {
                table: self.name.clone(),
                violations,
            })
        }
    }
}

fn violation(column: &Column, kind: ViolationKind) -> Violation {
    Violation {
        column: column.name.clone(),
        kind,
    }
}

/// Apply skip and init rules. `None` leaves the column out of the statement.
fn resolve(column: &Column, row: &Row) -> Option<Resolved> {
    if column.behavior.skip.skips(&column.name, row) {
        return None;
    }
    let raw = row.get(&column.name);
    let value = match &column.behavior.init {
        Some(InitRule::Now) => return Some(Resolved::Now),
        Some(InitRule::Derived(derive)) => derive.call(row).or_else(|| raw.cloned()),
        Some(InitRule::Trim) => raw.map(|v| map_str(v, |s| s.trim().to_string())),
        Some(InitRule::Lowercase) => raw.map(|v| map_str(v, str::to_lowercase)),
        None => raw.cloned(),
    };
    value.map(Resolved::Value)
}

fn map_str(value: &Value, f: impl FnOnce(&str) -> String) -> Value {
    match value {
        Value::String(s) => Value::String(f(s)),
        other => other.clone(),
    }
}

/// Apply the format modifier, then coerce to the column type.
fn encode(column: &Column, value: &Value) -> Result<Value, ViolationKind> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    if column.behavior.format == FormatModifier::Json && !matches!(value, Value::Json(_)) {
        return coerce(&Value::Json(value.to_json().to_string()), &column.ty);
    }
    coerce(value, &column.ty)
}

fn placeholder(params: &mut Params, prefix: &str, column: &Column, value: Value) -> Expr {
    let literal = is_database_literal(&value, &column.ty);
    let expr = params.bind(format!("{prefix}:{}", column.name), value);
    if literal {
        expr.cast("text").cast(column.ty.to_string())
    } else if let Some(cast) = &column.behavior.cast {
        expr.cast(cast.clone())
    } else {
        expr
    }
}

fn predicate(
    params: &mut Params,
    prefix: &str,
    column: &Column,
    value: &Value,
) -> Result<Expr, ViolationKind> {
    let target = Expr::column(column.name.as_str());
    if value.is_null() {
        return Ok(target.is_null());
    }
    let value = encode(column, value)?;
    Ok(target.eq(placeholder(params, prefix, column, value)))
}

/// A string left for the database to interpret, like `'now'::timestamptz`.
fn is_database_literal(value: &Value, ty: &ColumnType) -> bool {
    ty.kind.is_temporal() && !ty.array && matches!(value, Value::String(_))
}

fn mismatch(value: &Value, ty: &ColumnType) -> ViolationKind {
    ViolationKind::TypeMismatch {
        expected: ty.to_string(),
        found: value.kind(),
    }
}

fn invalid(expected: &str) -> ViolationKind {
    ViolationKind::InvalidFormat {
        expected: expected.to_string(),
    }
}

/// Coerce an input value to the representation bound for `ty`.
///
/// Never truncates: values that don't fit are rejected. Unknown and array
/// types pass through for the database to judge.
pub fn coerce(value: &Value, ty: &ColumnType) -> Result<Value, ViolationKind> {
    if value.is_null() || ty.array {
        return Ok(value.clone());
    }
    match ty.kind {
        PgType::SmallInt => {
            let n = integer(value, ty)?;
            i16::try_from(n)
                .map(Value::I16)
                .map_err(|_| ViolationKind::OutOfRange)
        }
        PgType::Integer => {
            let n = integer(value, ty)?;
            i32::try_from(n)
                .map(Value::I32)
                .map_err(|_| ViolationKind::OutOfRange)
        }
        PgType::BigInt => integer(value, ty).map(Value::I64),
        PgType::Real => real(float(value, ty)?).map(Value::F32),
        PgType::DoublePrecision => float(value, ty).map(Value::F64),
        PgType::Numeric => {
            let d = decimal(value, ty)?;
            check_precision(d, ty)?;
            Ok(Value::Decimal(d))
        }
        PgType::Boolean => match value {
            Value::Bool(_) => Ok(value.clone()),
            _ => Err(mismatch(value, ty)),
        },
        PgType::Text | PgType::Varchar | PgType::Char => match value {
            Value::String(s) => {
                if let Some(max) = ty.max_length() {
                    let len = s.chars().count();
                    if len > max {
                        return Err(ViolationKind::TooLong { max, len });
                    }
                }
                Ok(value.clone())
            }
            _ => Err(mismatch(value, ty)),
        },
        PgType::Bytea => match value {
            Value::Bytes(_) => Ok(value.clone()),
            _ => Err(mismatch(value, ty)),
        },
        PgType::Uuid => match value {
            Value::Uuid(_) => Ok(value.clone()),
            Value::String(s) => Uuid::parse_str(s.trim())
                .map(Value::Uuid)
                .map_err(|_| invalid("uuid")),
            _ => Err(mismatch(value, ty)),
        },
        PgType::Json | PgType::Jsonb => match value {
            Value::Json(raw) | Value::String(raw) => {
                serde_json::from_str::<serde_json::Value>(raw).map_err(|_| invalid("json"))?;
                Ok(Value::Json(raw.clone()))
            }
            other => Ok(Value::Json(other.to_json().to_string())),
        },
        PgType::Timestamptz | PgType::Timestamp => match value {
            Value::Timestamp(_) => Ok(value.clone()),
            Value::Date(d) => Ok(Value::Timestamp(d.and_time(NaiveTime::MIN).and_utc())),
            Value::String(s) => parse_timestamp(s),
            _ => Err(mismatch(value, ty)),
        },
        PgType::Date => match value {
            Value::Date(_) => Ok(value.clone()),
            Value::String(s) if is_literal(s, &TIMESTAMP_LITERALS) => Ok(value.clone()),
            Value::String(s) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
                .map(Value::Date)
                .map_err(|_| invalid("date")),
            _ => Err(mismatch(value, ty)),
        },
        PgType::Time => match value {
            Value::Time(_) => Ok(value.clone()),
            Value::String(s) if is_literal(s, &TIME_LITERALS) => Ok(value.clone()),
            Value::String(s) => NaiveTime::parse_from_str(s.trim(), "%H:%M:%S%.f")
                .or_else(|_| NaiveTime::parse_from_str(s.trim(), "%H:%M"))
                .map(Value::Time)
                .map_err(|_| invalid("time")),
            _ => Err(mismatch(value, ty)),
        },
        PgType::Other => Ok(value.clone()),
    }
}

fn is_literal(s: &str, literals: &[&str]) -> bool {
    let s = s.trim();
    literals.iter().any(|l| l.eq_ignore_ascii_case(s))
}

fn parse_timestamp(s: &str) -> Result<Value, ViolationKind> {
    if is_literal(s, &TIMESTAMP_LITERALS) {
        return Ok(Value::String(s.to_string()));
    }
    let s = s.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Ok(Value::Timestamp(ts.with_timezone(&Utc)));
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(Value::Timestamp(ts.and_utc()));
        }
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Ok(Value::Timestamp(d.and_time(NaiveTime::MIN).and_utc()));
    }
    Err(invalid("timestamp"))
}

fn integer(value: &Value, ty: &ColumnType) -> Result<i64, ViolationKind> {
    let from_float = |f: f64| {
        if !f.is_finite() || f.fract() != 0.0 {
            return Err(invalid("integer"));
        }
        if f < i64::MIN as f64 || f >= i64::MAX as f64 {
            return Err(ViolationKind::OutOfRange);
        }
        Ok(f as i64)
    };
    match value {
        Value::I16(_) | Value::I32(_) | Value::I64(_) => {
            value.as_i64().ok_or_else(|| mismatch(value, ty))
        }
        Value::F32(f) => from_float(f64::from(*f)),
        Value::F64(f) => from_float(*f),
        Value::Decimal(d) => {
            if !d.fract().is_zero() {
                return Err(invalid("integer"));
            }
            d.to_i64().ok_or(ViolationKind::OutOfRange)
        }
        _ => Err(mismatch(value, ty)),
    }
}

/// The exact `f64` for `value`. Integers and decimals that a double
/// would round are out of range.
fn float(value: &Value, ty: &ColumnType) -> Result<f64, ViolationKind> {
    match value {
        Value::F32(f) => Ok(f64::from(*f)),
        Value::F64(f) => Ok(*f),
        Value::Decimal(d) => {
            let f = d.to_f64().ok_or(ViolationKind::OutOfRange)?;
            // Shortest round-trip text of the double must name the same number.
            match Decimal::from_str(&f.to_string()) {
                Ok(back) if back == *d => Ok(f),
                _ => Err(ViolationKind::OutOfRange),
            }
        }
        _ => {
            let n = value.as_i64().ok_or_else(|| mismatch(value, ty))?;
            let f = n as f64;
            if f >= i64::MAX as f64 || f as i64 != n {
                return Err(ViolationKind::OutOfRange);
            }
            Ok(f)
        }
    }
}

/// Narrow to `real`, rejecting overflow and lost digits.
///
/// A double passes when the single prints as the same decimal, so `0.1`
/// is accepted while `0.123456789` is not.
fn real(f: f64) -> Result<f32, ViolationKind> {
    if !f.is_finite() {
        return Ok(f as f32);
    }
    let narrowed = f as f32;
    if !narrowed.is_finite() {
        return Err(ViolationKind::OutOfRange);
    }
    if f64::from(narrowed) == f || narrowed.to_string() == f.to_string() {
        Ok(narrowed)
    } else {
        Err(ViolationKind::OutOfRange)
    }
}

fn decimal(value: &Value, ty: &ColumnType) -> Result<Decimal, ViolationKind> {
    match value {
        Value::Decimal(d) => Ok(*d),
        Value::F32(f) => Decimal::try_from(f64::from(*f)).map_err(|_| ViolationKind::OutOfRange),
        Value::F64(f) => Decimal::try_from(*f).map_err(|_| ViolationKind::OutOfRange),
        Value::String(s) => Decimal::from_str(s.trim()).map_err(|_| invalid("numeric")),
        _ => value
            .as_i64()
            .map(Decimal::from)
            .ok_or_else(|| mismatch(value, ty)),
    }
}

/// Reject values that `numeric(p,s)` would round or overflow.
fn check_precision(d: Decimal, ty: &ColumnType) -> Result<(), ViolationKind> {
    let Some((precision, scale)) = ty.precision() else {
        return Ok(());
    };
    let normalized = d.normalize();
    if normalized.scale() > scale {
        return Err(ViolationKind::OutOfRange);
    }
    let integer_digits = normalized.trunc().abs().to_string().trim_start_matches('0').len();
    if integer_digits as u32 > precision.saturating_sub(scale) {
        return Err(ViolationKind::OutOfRange);
    }
    Ok(())
}

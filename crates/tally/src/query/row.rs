//! Row mapping between Postgres and runtime values.

use std::error::Error as StdError;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use tokio_postgres::types::{FromSql, IsNull, ToSql, Type as PgTypeInfo, WrongType};
use uuid::Uuid;

use crate::{Row, Value};

type BoxError = Box<dyn StdError + Sync + Send>;

/// Raw JSON/JSONB bytes as sent by the server.
struct JsonRaw(Vec<u8>);

impl<'a> FromSql<'a> for JsonRaw {
    fn from_sql(ty: &PgTypeInfo, raw: &'a [u8]) -> Result<Self, BoxError> {
        // JSONB wire format has a 1-byte version prefix
        let bytes = if *ty == PgTypeInfo::JSONB && raw.first() == Some(&1) {
            &raw[1..]
        } else {
            raw
        };
        Ok(JsonRaw(bytes.to_vec()))
    }

    fn accepts(ty: &PgTypeInfo) -> bool {
        *ty == PgTypeInfo::JSON || *ty == PgTypeInfo::JSONB
    }
}

/// Convert a tokio_postgres row to a [`Row`], keyed by result column name.
pub fn pg_row_to_row(pg_row: &tokio_postgres::Row) -> Result<Row, crate::Error> {
    let mut row = Row::with_capacity(pg_row.len());
    for (idx, column) in pg_row.columns().iter().enumerate() {
        let value = pg_value_to_value(pg_row, idx, column.name(), column.type_())?;
        row.insert(column.name().to_string(), value);
    }
    Ok(row)
}

fn read<'a, T: FromSql<'a>>(
    row: &'a tokio_postgres::Row,
    idx: usize,
    column_name: &str,
    expected: &str,
) -> Result<Option<T>, crate::Error> {
    row.try_get::<_, Option<T>>(idx).map_err(|e| {
        if e.source().and_then(|s| s.downcast_ref::<WrongType>()).is_some() {
            let actual = row
                .columns()
                .get(idx)
                .map(|c| c.type_().name().to_string())
                .unwrap_or_else(|| "unknown".to_string());
            crate::Error::TypeMismatch {
                column: column_name.to_string(),
                expected: expected.to_string(),
                actual,
            }
        } else {
            crate::Error::ColumnReadError {
                column: column_name.to_string(),
                expected: expected.to_string(),
                message: e.to_string(),
            }
        }
    })
}

/// Extract a value from a Postgres row at a given index.
fn pg_value_to_value(
    row: &tokio_postgres::Row,
    idx: usize,
    name: &str,
    ty: &PgTypeInfo,
) -> Result<Value, crate::Error> {
    let value = match *ty {
        PgTypeInfo::BOOL => read::<bool>(row, idx, name, "bool")?.map(Value::Bool),
        PgTypeInfo::INT2 => read::<i16>(row, idx, name, "smallint")?.map(Value::I16),
        PgTypeInfo::INT4 => read::<i32>(row, idx, name, "integer")?.map(Value::I32),
        PgTypeInfo::INT8 => read::<i64>(row, idx, name, "bigint")?.map(Value::I64),
        PgTypeInfo::FLOAT4 => read::<f32>(row, idx, name, "real")?.map(Value::F32),
        PgTypeInfo::FLOAT8 => read::<f64>(row, idx, name, "double precision")?.map(Value::F64),
        PgTypeInfo::NUMERIC => read::<Decimal>(row, idx, name, "numeric")?.map(Value::Decimal),
        PgTypeInfo::BYTEA => read::<Vec<u8>>(row, idx, name, "bytea")?.map(Value::Bytes),
        PgTypeInfo::UUID => read::<Uuid>(row, idx, name, "uuid")?.map(Value::Uuid),
        PgTypeInfo::TIMESTAMPTZ => {
            read::<DateTime<Utc>>(row, idx, name, "timestamptz")?.map(Value::Timestamp)
        }
        PgTypeInfo::TIMESTAMP => read::<NaiveDateTime>(row, idx, name, "timestamp")?
            .map(|ts| Value::Timestamp(ts.and_utc())),
        PgTypeInfo::DATE => read::<NaiveDate>(row, idx, name, "date")?.map(Value::Date),
        PgTypeInfo::TIME => read::<NaiveTime>(row, idx, name, "time")?.map(Value::Time),
        PgTypeInfo::JSON | PgTypeInfo::JSONB => read::<JsonRaw>(row, idx, name, "json")?
            .map(|raw| Value::Json(String::from_utf8_lossy(&raw.0).into_owned())),
        // text, varchar, bpchar, name, citext, enums, ...
        _ => read::<String>(row, idx, name, "text")?.map(Value::String),
    };
    Ok(value.unwrap_or(Value::Null))
}

/// Wrapper to make our Value usable as a ToSql parameter.
///
/// Each variant defers to the matching Rust type's own type check, so a
/// mismatch surfaces as a `WrongType` error instead of garbage on the wire.
#[derive(Debug)]
pub struct SqlParam<'a>(pub &'a Value);

impl ToSql for SqlParam<'_> {
    fn to_sql(&self, ty: &PgTypeInfo, out: &mut bytes::BytesMut) -> Result<IsNull, BoxError> {
        self.to_sql_checked(ty, out)
    }

    fn accepts(_ty: &PgTypeInfo) -> bool {
        true
    }

    fn to_sql_checked(&self, ty: &PgTypeInfo, out: &mut bytes::BytesMut) -> Result<IsNull, BoxError> {
        match self.0 {
            Value::Null => Ok(IsNull::Yes),
            Value::Bool(v) => v.to_sql_checked(ty, out),
            Value::I16(v) => v.to_sql_checked(ty, out),
            Value::I32(v) => v.to_sql_checked(ty, out),
            Value::I64(v) => v.to_sql_checked(ty, out),
            Value::F32(v) => v.to_sql_checked(ty, out),
            Value::F64(v) => v.to_sql_checked(ty, out),
            Value::Decimal(v) => v.to_sql_checked(ty, out),
            Value::String(v) => v.to_sql_checked(ty, out),
            Value::Bytes(v) => v.to_sql_checked(ty, out),
            Value::Uuid(v) => v.to_sql_checked(ty, out),
            Value::Timestamp(v) if *ty == PgTypeInfo::TIMESTAMP => {
                v.naive_utc().to_sql_checked(ty, out)
            }
            Value::Timestamp(v) => v.to_sql_checked(ty, out),
            Value::Date(v) => v.to_sql_checked(ty, out),
            Value::Time(v) => v.to_sql_checked(ty, out),
            Value::Json(v) if *ty == PgTypeInfo::JSON || *ty == PgTypeInfo::JSONB => {
                if *ty == PgTypeInfo::JSONB {
                    out.extend_from_slice(&[1]); // JSONB version 1
                }
                out.extend_from_slice(v.as_bytes());
                Ok(IsNull::No)
            }
            Value::Json(v) => v.to_sql_checked(ty, out),
        }
    }
}

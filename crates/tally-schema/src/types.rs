//! Column type strings.

use std::fmt;

/// Postgres column types tally knows how to validate and convert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PgType {
    /// SMALLINT (2 bytes)
    SmallInt,
    /// INTEGER (4 bytes)
    Integer,
    /// BIGINT (8 bytes)
    BigInt,
    /// REAL (4 bytes floating point)
    Real,
    /// DOUBLE PRECISION (8 bytes floating point)
    DoublePrecision,
    /// NUMERIC (arbitrary precision)
    Numeric,
    /// BOOLEAN
    Boolean,
    /// TEXT
    Text,
    /// VARCHAR(n)
    Varchar,
    /// CHAR(n)
    Char,
    /// BYTEA (binary)
    Bytea,
    /// TIMESTAMPTZ
    Timestamptz,
    /// TIMESTAMP (without time zone)
    Timestamp,
    /// DATE
    Date,
    /// TIME
    Time,
    /// UUID
    Uuid,
    /// JSON
    Json,
    /// JSONB
    Jsonb,
    /// Anything else; passed through to the database untouched.
    Other,
}

impl PgType {
    /// Resolve a (lowercase, whitespace-collapsed) base type name.
    fn from_base_name(name: &str) -> (PgType, &'static str) {
        match name {
            "smallint" | "int2" => (PgType::SmallInt, "smallint"),
            "integer" | "int" | "int4" => (PgType::Integer, "integer"),
            "bigint" | "int8" => (PgType::BigInt, "bigint"),
            "real" | "float4" => (PgType::Real, "real"),
            "double precision" | "float8" => (PgType::DoublePrecision, "double precision"),
            "numeric" | "decimal" => (PgType::Numeric, "numeric"),
            "boolean" | "bool" => (PgType::Boolean, "boolean"),
            "text" => (PgType::Text, "text"),
            "varchar" | "character varying" => (PgType::Varchar, "varchar"),
            "char" | "character" => (PgType::Char, "char"),
            "bpchar" => (PgType::Char, "bpchar"),
            "bytea" => (PgType::Bytea, "bytea"),
            "timestamptz" | "timestamp with time zone" => (PgType::Timestamptz, "timestamptz"),
            "timestamp" | "timestamp without time zone" => (PgType::Timestamp, "timestamp"),
            "date" => (PgType::Date, "date"),
            "time" | "time without time zone" => (PgType::Time, "time"),
            "uuid" => (PgType::Uuid, "uuid"),
            "json" => (PgType::Json, "json"),
            "jsonb" => (PgType::Jsonb, "jsonb"),
            _ => (PgType::Other, ""),
        }
    }

    pub fn is_integer(self) -> bool {
        matches!(self, PgType::SmallInt | PgType::Integer | PgType::BigInt)
    }

    pub fn is_json(self) -> bool {
        matches!(self, PgType::Json | PgType::Jsonb)
    }

    pub fn is_temporal(self) -> bool {
        matches!(
            self,
            PgType::Timestamptz | PgType::Timestamp | PgType::Date | PgType::Time
        )
    }

    /// Whether a `length` attribute makes sense for this type.
    pub fn takes_length(self) -> bool {
        matches!(self, PgType::Varchar | PgType::Char)
    }
}

/// A parsed column type, e.g. `varchar(100)` or `numeric(10,2)` or `text[]`.
///
/// Display renders the canonical lowercase form used in DDL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnType {
    pub kind: PgType,
    /// Canonical base name (`varchar`, `timestamptz`, or the raw name for
    /// unknown types).
    pub name: String,
    /// Type modifier inside the parentheses, without spaces.
    pub modifier: Option<String>,
    pub array: bool,
}

impl ColumnType {
    /// Parse a type string. Returns `None` for empty or unbalanced input.
    ///
    /// Quoted identifiers (`"OrderState"`) keep their case.
    pub fn parse(raw: &str) -> Option<ColumnType> {
        let mut s = lowercase_unquoted(raw.trim());
        let mut array = false;
        while let Some(stripped) = s.strip_suffix("[]") {
            array = true;
            s = stripped.trim_end().to_string();
        }

        let (base, modifier) = match s.find('(') {
            Some(open) => {
                let close = s[open..].find(')')? + open;
                let modifier: String = s[open + 1..close]
                    .chars()
                    .filter(|c| !c.is_whitespace())
                    .collect();
                if modifier.is_empty() {
                    return None;
                }
                // `timestamp(3) with time zone`: the suffix belongs to the base.
                let base = format!("{} {}", &s[..open], &s[close + 1..]);
                (base, Some(modifier))
            }
            None => (s.clone(), None),
        };
        let base = base.split_whitespace().collect::<Vec<_>>().join(" ");
        if base.is_empty() || base.contains(')') {
            return None;
        }

        let (kind, canonical) = PgType::from_base_name(&base);
        let name = if kind == PgType::Other {
            base
        } else {
            canonical.to_string()
        };
        Some(ColumnType {
            kind,
            name,
            modifier,
            array,
        })
    }

    /// Maximum character length for `varchar(n)` / `char(n)`.
    ///
    /// Bare `char` is `char(1)`; bare `varchar` and `bpchar` are unbounded.
    pub fn max_length(&self) -> Option<usize> {
        if !self.kind.takes_length() || self.array {
            return None;
        }
        match self.modifier.as_deref() {
            Some(modifier) => modifier.parse().ok(),
            None if self.kind == PgType::Char && self.name == "char" => Some(1),
            None => None,
        }
    }

    /// `(precision, scale)` for `numeric(p,s)`.
    pub fn precision(&self) -> Option<(u32, u32)> {
        if self.kind != PgType::Numeric {
            return None;
        }
        let modifier = self.modifier.as_deref()?;
        let mut parts = modifier.split(',');
        let precision = parts.next()?.parse().ok()?;
        let scale = match parts.next() {
            Some(s) => s.parse().ok()?,
            None => 0,
        };
        Some((precision, scale))
    }
}

fn lowercase_unquoted(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut quoted = false;
    for c in s.chars() {
        if c == '"' {
            quoted = !quoted;
        }
        if quoted {
            out.push(c);
        } else {
            out.extend(c.to_lowercase());
        }
    }
    out
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if let Some(modifier) = &self.modifier {
            write!(f, "({modifier})")?;
        }
        if self.array {
            f.write_str("[]")?;
        }
        Ok(())
    }
}

//! SQL expressions.

use crate::{ColumnName, ParamName};

/// A SQL expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A parameter placeholder (e.g., $handle -> $1)
    Param(ParamName),
    /// A column reference
    Column(ColumnName),
    /// A string literal
    String(String),
    /// An integer literal
    Int(i64),
    /// NULL
    Null,
    /// NOW() function
    Now,
    /// Binary operation (e.g., a = b, a AND b)
    BinOp {
        left: Box<Expr>,
        op: BinOp,
        right: Box<Expr>,
    },
    /// IS NULL / IS NOT NULL
    IsNull { expr: Box<Expr>, negated: bool },
    /// Postgres cast: `expr::type`
    Cast { expr: Box<Expr>, ty: String },
    /// Parenthesized sub-expression
    Paren(Box<Expr>),
    /// Function call
    FnCall { name: String, args: Vec<Expr> },
    /// Raw SQL (escape hatch)
    Raw(String),
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Eq,
    And,
    Or,
}

impl BinOp {
    pub fn as_str(self) -> &'static str {
        match self {
            BinOp::Eq => "=",
            BinOp::And => "AND",
            BinOp::Or => "OR",
        }
    }
}

// Convenience constructors
impl Expr {
    pub fn param(name: impl Into<ParamName>) -> Self {
        Expr::Param(name.into())
    }

    pub fn column(name: impl Into<ColumnName>) -> Self {
        Expr::Column(name.into())
    }

    pub fn string(s: impl Into<String>) -> Self {
        Expr::String(s.into())
    }

    pub fn int(n: i64) -> Self {
        Expr::Int(n)
    }

    fn bin(self, op: BinOp, other: Expr) -> Self {
        Expr::BinOp {
            left: Box::new(self),
            op,
            right: Box::new(other),
        }
    }

    /// Create an equality expression: self = other
    pub fn eq(self, other: Expr) -> Self {
        self.bin(BinOp::Eq, other)
    }

    /// Create an AND expression: self AND other
    pub fn and(self, other: Expr) -> Self {
        self.bin(BinOp::And, other)
    }

    /// Create an OR expression: self OR other
    pub fn or(self, other: Expr) -> Self {
        self.bin(BinOp::Or, other)
    }

    /// Create IS NULL expression
    pub fn is_null(self) -> Self {
        Expr::IsNull {
            expr: Box::new(self),
            negated: false,
        }
    }

    /// Create IS NOT NULL expression
    pub fn is_not_null(self) -> Self {
        Expr::IsNull {
            expr: Box::new(self),
            negated: true,
        }
    }

    /// Cast this expression: `self::ty`
    pub fn cast(self, ty: impl Into<String>) -> Self {
        Expr::Cast {
            expr: Box::new(self),
            ty: ty.into(),
        }
    }

    /// Wrap in parentheses.
    pub fn paren(self) -> Self {
        Expr::Paren(Box::new(self))
    }

    /// Fold expressions with AND. Returns `None` for an empty input.
    pub fn all(exprs: impl IntoIterator<Item = Expr>) -> Option<Expr> {
        exprs.into_iter().reduce(Expr::and)
    }

    /// Fold expressions with OR, parenthesized when there is more than one.
    pub fn any(exprs: impl IntoIterator<Item = Expr>) -> Option<Expr> {
        let mut iter = exprs.into_iter();
        let first = iter.next()?;
        let mut count = 1;
        let folded = iter.fold(first, |acc, e| {
            count += 1;
            acc.or(e)
        });
        Some(if count > 1 { folded.paren() } else { folded })
    }
}

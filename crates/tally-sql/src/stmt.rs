//! SQL statements.

use crate::expr::Expr;
use crate::{ColumnName, TableName};

/// A SELECT statement over a single table.
#[derive(Debug, Clone)]
pub struct SelectStmt {
    /// Selected expressions; empty means `*`.
    pub columns: Vec<SelectColumn>,
    pub from: TableName,
    pub where_: Option<Expr>,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<Expr>,
    pub offset: Option<Expr>,
    /// Append `FOR UPDATE` (row locks inside a transaction).
    pub for_update: bool,
}

/// A column in a SELECT clause.
#[derive(Debug, Clone)]
pub struct SelectColumn {
    pub expr: Expr,
    pub alias: Option<ColumnName>,
}

impl SelectColumn {
    pub fn expr(expr: Expr) -> Self {
        Self { expr, alias: None }
    }

    pub fn aliased(expr: Expr, alias: impl Into<ColumnName>) -> Self {
        Self {
            expr,
            alias: Some(alias.into()),
        }
    }
}

/// ORDER BY clause.
#[derive(Debug, Clone)]
pub struct OrderBy {
    pub expr: Expr,
    pub desc: bool,
}

impl OrderBy {
    pub fn asc(expr: Expr) -> Self {
        Self {
            expr,
            desc: false,
        }
    }

    pub fn desc(expr: Expr) -> Self {
        Self {
            expr,
            desc: true,
        }
    }
}

// ============================================================================
// INSERT statement
// ============================================================================

/// An INSERT statement. With no columns it renders `DEFAULT VALUES`.
#[derive(Debug, Clone)]
pub struct InsertStmt {
    pub table: TableName,
    pub columns: Vec<ColumnName>,
    pub values: Vec<Expr>,
    pub returning: Returning,
}

/// A RETURNING clause.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Returning {
    #[default]
    Nothing,
    All,
    Columns(Vec<ColumnName>),
}

/// An assignment in UPDATE SET.
#[derive(Debug, Clone)]
pub struct UpdateAssignment {
    pub column: ColumnName,
    pub value: Expr,
}

impl UpdateAssignment {
    pub fn new(column: ColumnName, value: Expr) -> Self {
        Self { column, value }
    }
}

// ============================================================================
// UPDATE statement
// ============================================================================

/// An UPDATE statement.
#[derive(Debug, Clone)]
pub struct UpdateStmt {
    pub table: TableName,
    pub assignments: Vec<UpdateAssignment>,
    pub where_: Option<Expr>,
    pub returning: Returning,
}

// ============================================================================
// DELETE statement
// ============================================================================

/// A DELETE statement.
#[derive(Debug, Clone)]
pub struct DeleteStmt {
    pub table: TableName,
    pub where_: Option<Expr>,
    pub returning: Returning,
}

// ============================================================================
// Builder-style constructors
// ============================================================================

impl SelectStmt {
    pub fn new(from: TableName) -> Self {
        Self {
            columns: Vec::new(),
            from,
            where_: None,
            order_by: Vec::new(),
            limit: None,
            offset: None,
            for_update: false,
        }
    }

    pub fn column(mut self, col: SelectColumn) -> Self {
        self.columns.push(col);
        self
    }

    pub fn columns(mut self, cols: impl IntoIterator<Item = SelectColumn>) -> Self {
        self.columns.extend(cols);
        self
    }

    pub fn where_(mut self, expr: Expr) -> Self {
        self.where_ = Some(expr);
        self
    }

    pub fn and_where(mut self, expr: Expr) -> Self {
        self.where_ = Some(match self.where_ {
            Some(existing) => existing.and(expr),
            None => expr,
        });
        self
    }

    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order_by.push(order);
        self
    }

    pub fn limit(mut self, expr: Expr) -> Self {
        self.limit = Some(expr);
        self
    }

    pub fn offset(mut self, expr: Expr) -> Self {
        self.offset = Some(expr);
        self
    }

    pub fn for_update(mut self) -> Self {
        self.for_update = true;
        self
    }
}

impl InsertStmt {
    pub fn new(table: TableName) -> Self {
        Self {
            table,
            columns: Vec::new(),
            values: Vec::new(),
            returning: Returning::Nothing,
        }
    }

    pub fn column(mut self, name: impl Into<ColumnName>, value: Expr) -> Self {
        self.columns.push(name.into());
        self.values.push(value);
        self
    }

    pub fn returning(mut self, returning: Returning) -> Self {
        self.returning = returning;
        self
    }
}

impl UpdateStmt {
    pub fn new(table: TableName) -> Self {
        Self {
            table,
            assignments: Vec::new(),
            where_: None,
            returning: Returning::Nothing,
        }
    }

    pub fn set(mut self, column: impl Into<ColumnName>, value: Expr) -> Self {
        self.assignments
            .push(UpdateAssignment::new(column.into(), value));
        self
    }

    pub fn where_(mut self, expr: Expr) -> Self {
        self.where_ = Some(expr);
        self
    }

    pub fn and_where(mut self, expr: Expr) -> Self {
        self.where_ = Some(match self.where_ {
            Some(existing) => existing.and(expr),
            None => expr,
        });
        self
    }

    pub fn returning(mut self, returning: Returning) -> Self {
        self.returning = returning;
        self
    }
}

impl DeleteStmt {
    pub fn new(table: TableName) -> Self {
        Self {
            table,
            where_: None,
            returning: Returning::Nothing,
        }
    }

    pub fn where_(mut self, expr: Expr) -> Self {
        self.where_ = Some(expr);
        self
    }

    pub fn and_where(mut self, expr: Expr) -> Self {
        self.where_ = Some(match self.where_ {
            Some(existing) => existing.and(expr),
            None => expr,
        });
        self
    }

    pub fn returning(mut self, returning: Returning) -> Self {
        self.returning = returning;
        self
    }
}

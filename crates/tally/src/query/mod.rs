//! Conversions between runtime values and the Postgres wire types.

mod row;
pub use row::{SqlParam, pg_row_to_row};

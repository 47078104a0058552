//! Oracle SQL dialect.
//!
//! Oracle differences from ANSI:
//! - ANSI identifier quoting (`"`), case-sensitive once quoted
//! - No boolean type in SQL before 23c (1/0)
//! - Row limiting through the `ROWNUM` pseudo-column in WHERE
//! - Table aliases without `AS` (`FROM orders o`)

use super::helpers;
use super::{LimitStyle, SqlDialect};

/// Oracle SQL dialect.
#[derive(Debug, Clone, Copy)]
pub struct Oracle;

impl SqlDialect for Oracle {
    fn name(&self) -> &'static str {
        "oracle"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        helpers::quote_double(ident)
    }

    fn format_bool(&self, b: bool) -> &'static str {
        helpers::format_bool_numeric(b)
    }

    fn limit_style(&self) -> LimitStyle {
        LimitStyle::RowNum
    }

    fn table_alias_uses_as(&self) -> bool {
        false
    }
}

//! SQLite SQL dialect.
//!
//! - ANSI identifier quoting (`"`)
//! - Booleans are integers (1/0)
//! - Trailing `LIMIT n`
//! - Schemas are attached databases, so `dbo.table` only resolves when a
//!   database named `dbo` is attached

use super::helpers;
use super::SqlDialect;

/// SQLite SQL dialect.
#[derive(Debug, Clone, Copy)]
pub struct Sqlite;

impl SqlDialect for Sqlite {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        helpers::quote_double(ident)
    }

    fn format_bool(&self, b: bool) -> &'static str {
        helpers::format_bool_numeric(b)
    }

    fn supports_full_outer_join(&self) -> bool {
        // FULL JOIN landed in 3.39; the bundled library is newer
        true
    }
}

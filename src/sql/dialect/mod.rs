//! SQL Dialect definitions and formatting rules.
//!
//! This module provides a trait-based abstraction for SQL dialect differences.
//! Each dialect implements `SqlDialect` to handle its specific syntax:
//!
//! - Identifier quoting: `"` (PG/DuckDB/SQLite/Oracle), `` ` `` (MySQL), `[]` (T-SQL)
//! - Row limiting: trailing `LIMIT n`, `SELECT TOP n`, or `ROWNUM <= n`
//! - Boolean literals: true/false vs 1/0
//!
//! # Usage
//!
//! ```
//! use linkql::sql::dialect::{Dialect, LimitStyle, SqlDialect};
//!
//! let dialect = Dialect::TSql;
//! assert_eq!(dialect.quote_identifier("user"), "[user]");
//! assert_eq!(dialect.limit_style(), LimitStyle::Top);
//! ```
//!
//! # Row limiting
//!
//! | Dialect | Style | Emitted |
//! |---------|-------|---------|
//! | PostgreSQL | Trailing | `... LIMIT n` |
//! | MySQL | Trailing | `... LIMIT n` |
//! | SQLite | Trailing | `... LIMIT n` |
//! | DuckDB | Trailing | `... LIMIT n` |
//! | SQL Server | Top | `SELECT [DISTINCT] TOP n ...` |
//! | Oracle | RowNum | `... WHERE ... AND ROWNUM <= n` |

mod duckdb;
pub mod helpers;
mod mysql;
mod oracle;
mod postgres;
mod sqlite;
mod tsql;

pub use duckdb::DuckDb;
pub use mysql::MySql;
pub use oracle::Oracle;
pub use postgres::Postgres;
pub use sqlite::Sqlite;
pub use tsql::TSql;

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::token::TokenStream;

/// Where a dialect puts its row limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitStyle {
    /// `LIMIT n` after everything else.
    Trailing,
    /// `TOP n` immediately after `SELECT [DISTINCT]`.
    Top,
    /// `ROWNUM <= n` ANDed into the WHERE clause.
    RowNum,
}

/// SQL dialect trait - defines how SQL constructs are rendered.
///
/// Implementations handle dialect-specific syntax differences.
/// The default implementations follow ANSI SQL where possible.
pub trait SqlDialect: std::fmt::Debug {
    /// Dialect name for display/logging.
    fn name(&self) -> &'static str;

    // =========================================================================
    // Identifier and Literal Quoting
    // =========================================================================

    /// Quote an identifier (table, column, alias).
    ///
    /// - PostgreSQL/DuckDB/SQLite/Oracle: `"identifier"`
    /// - MySQL: `` `identifier` ``
    /// - T-SQL: `[identifier]`
    fn quote_identifier(&self, ident: &str) -> String;

    /// Quote a string literal.
    ///
    /// All dialects use single quotes with `''` for escaping.
    /// Override for Unicode prefix (T-SQL N'...').
    fn quote_string(&self, s: &str) -> String {
        helpers::quote_string_single(s)
    }

    /// Format a boolean literal.
    ///
    /// - PostgreSQL/DuckDB: `true`/`false`
    /// - MySQL/T-SQL/Oracle/SQLite: `1`/`0`
    fn format_bool(&self, b: bool) -> &'static str;

    // =========================================================================
    // Row Limiting
    // =========================================================================

    /// Where the row limit goes in a SELECT.
    fn limit_style(&self) -> LimitStyle {
        LimitStyle::Trailing
    }

    /// Emit the limit fragment for this dialect's `limit_style()`.
    fn emit_limit(&self, limit: u64) -> TokenStream {
        match self.limit_style() {
            LimitStyle::Trailing => helpers::emit_limit_trailing(limit),
            LimitStyle::Top => helpers::emit_limit_top(limit),
            LimitStyle::RowNum => helpers::emit_limit_rownum(limit),
        }
    }

    // =========================================================================
    // JOIN Syntax
    // =========================================================================

    /// Whether this dialect supports FULL OUTER JOIN.
    fn supports_full_outer_join(&self) -> bool {
        true
    }

    /// Whether table aliases are written `table AS alias` rather than `table alias`.
    fn table_alias_uses_as(&self) -> bool {
        true
    }
}

/// Supported SQL dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[default]
    Postgres,
    MySql,
    TSql,
    Oracle,
    Sqlite,
    DuckDb,
}

impl Dialect {
    /// Every supported dialect, in display order.
    pub const ALL: [Dialect; 6] = [
        Dialect::Postgres,
        Dialect::MySql,
        Dialect::TSql,
        Dialect::Oracle,
        Dialect::Sqlite,
        Dialect::DuckDb,
    ];

    /// Get the dialect implementation.
    pub fn dialect(&self) -> &'static dyn SqlDialect {
        match self {
            Dialect::Postgres => &Postgres,
            Dialect::MySql => &MySql,
            Dialect::TSql => &TSql,
            Dialect::Oracle => &Oracle,
            Dialect::Sqlite => &Sqlite,
            Dialect::DuckDb => &DuckDb,
        }
    }
}

// Implement SqlDialect for Dialect enum by delegating to concrete types
impl SqlDialect for Dialect {
    fn name(&self) -> &'static str {
        self.dialect().name()
    }

    fn quote_identifier(&self, ident: &str) -> String {
        self.dialect().quote_identifier(ident)
    }

    fn quote_string(&self, s: &str) -> String {
        self.dialect().quote_string(s)
    }

    fn format_bool(&self, b: bool) -> &'static str {
        self.dialect().format_bool(b)
    }

    fn limit_style(&self) -> LimitStyle {
        self.dialect().limit_style()
    }

    fn emit_limit(&self, limit: u64) -> TokenStream {
        self.dialect().emit_limit(limit)
    }

    fn supports_full_outer_join(&self) -> bool {
        self.dialect().supports_full_outer_join()
    }

    fn table_alias_uses_as(&self) -> bool {
        self.dialect().table_alias_uses_as()
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.dialect().name())
    }
}

impl FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(Dialect::Postgres),
            "mysql" | "mariadb" => Ok(Dialect::MySql),
            "tsql" | "mssql" | "sqlserver" => Ok(Dialect::TSql),
            "oracle" => Ok(Dialect::Oracle),
            "sqlite" => Ok(Dialect::Sqlite),
            "duckdb" => Ok(Dialect::DuckDb),
            other => Err(format!(
                "unknown dialect '{}' (expected one of: postgres, mysql, tsql, oracle, sqlite, duckdb)",
                other
            )),
        }
    }
}

//! Test utilities for SQL emission validation.
//!
//! Provides helpers for validating that emitted SQL is syntactically correct
//! using sqlparser-rs for roundtrip validation.

use sqlparser::dialect::{
    DuckDbDialect, GenericDialect, MsSqlDialect, MySqlDialect, PostgreSqlDialect, SQLiteDialect,
};
use sqlparser::parser::Parser;

use regex::Regex;
use std::sync::LazyLock;

use super::dialect::Dialect;

/// `FROM "t" AS "x"` / `JOIN "s"."t" AS "x"`: accepted by the generic parser, rejected by Oracle.
static TABLE_ALIAS_AS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\b(?:FROM|JOIN)\s+(?:"[^"]*"\.)?"[^"]*"\s+AS\b"#).unwrap()
});

/// Validates that a SQL string is syntactically valid for the given dialect.
///
/// Uses sqlparser-rs to parse the SQL and returns an error if parsing fails.
/// This provides roundtrip validation to ensure emitted SQL is always valid.
pub fn validate_sql(sql: &str, dialect: Dialect) -> Result<(), String> {
    let parser_dialect: Box<dyn sqlparser::dialect::Dialect> = match dialect {
        Dialect::Postgres => Box::new(PostgreSqlDialect {}),
        Dialect::DuckDb => Box::new(DuckDbDialect {}),
        Dialect::MySql => Box::new(MySqlDialect {}),
        Dialect::TSql => Box::new(MsSqlDialect {}),
        Dialect::Sqlite => Box::new(SQLiteDialect {}),
        Dialect::Oracle => Box::new(GenericDialect {}), // sqlparser has no Oracle dialect
    };

    Parser::parse_sql(&*parser_dialect, sql)
        .map(|_| ())
        .map_err(|e| format!("Invalid SQL for {:?}: {}\nSQL: {}", dialect, e, sql))?;

    if dialect == Dialect::Oracle && TABLE_ALIAS_AS.is_match(sql) {
        return Err(format!("Oracle does not allow AS before a table alias\nSQL: {}", sql));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_valid_sql() {
        validate_sql("SELECT * FROM users", Dialect::Postgres).unwrap();
        validate_sql("SELECT * FROM users", Dialect::MySql).unwrap();
        validate_sql("SELECT * FROM users", Dialect::DuckDb).unwrap();
        validate_sql("SELECT TOP 10 * FROM users", Dialect::TSql).unwrap();
    }

    #[test]
    fn test_validate_invalid_sql() {
        let result = validate_sql("SELEC * FORM users", Dialect::Postgres);
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_oracle_table_alias() {
        validate_sql(r#"SELECT "o"."id" AS "oid" FROM "orders" "o""#, Dialect::Oracle).unwrap();
        assert!(validate_sql(r#"SELECT * FROM "orders" AS "o""#, Dialect::Oracle).is_err());
        assert!(validate_sql(
            r#"SELECT * FROM "a" "x" INNER JOIN "dbo"."b" AS "y" ON "x"."id" = "y"."id""#,
            Dialect::Oracle
        )
        .is_err());
    }
}

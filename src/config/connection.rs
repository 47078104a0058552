//! Database drivers named in `[connections.<name>]` sections.

use crate::sql::Dialect;

/// Error type for connection configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Unsupported driver: {0}. Supported: mssql, postgres, mysql, oracle, sqlite, duckdb")]
    UnsupportedDriver(String),
}

/// Supported database drivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Driver {
    /// Microsoft SQL Server
    MsSql,
    Postgres,
    MySql,
    Oracle,
    /// SQLite file or `:memory:`
    Sqlite,
    /// DuckDB (file or in-memory)
    DuckDb,
}

impl Driver {
    /// Parse driver from string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Result<Self, ConnectionError> {
        match s.to_lowercase().as_str() {
            "mssql" | "sqlserver" | "sql_server" => Ok(Driver::MsSql),
            "postgres" | "postgresql" | "pg" => Ok(Driver::Postgres),
            "mysql" | "mariadb" => Ok(Driver::MySql),
            "oracle" => Ok(Driver::Oracle),
            "sqlite" | "sqlite3" => Ok(Driver::Sqlite),
            "duckdb" | "duck" => Ok(Driver::DuckDb),
            other => Err(ConnectionError::UnsupportedDriver(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Driver::MsSql => "mssql",
            Driver::Postgres => "postgres",
            Driver::MySql => "mysql",
            Driver::Oracle => "oracle",
            Driver::Sqlite => "sqlite",
            Driver::DuckDb => "duckdb",
        }
    }

    /// SQL dialect spoken by this driver.
    pub fn dialect(&self) -> Dialect {
        match self {
            Driver::MsSql => Dialect::TSql,
            Driver::Postgres => Dialect::Postgres,
            Driver::MySql => Dialect::MySql,
            Driver::Oracle => Dialect::Oracle,
            Driver::Sqlite => Dialect::Sqlite,
            Driver::DuckDb => Dialect::DuckDb,
        }
    }

    /// Get the default port for this driver.
    pub fn default_port(&self) -> u16 {
        match self {
            Driver::MsSql => 1433,
            Driver::Postgres => 5432,
            Driver::MySql => 3306,
            Driver::Oracle => 1521,
            Driver::Sqlite | Driver::DuckDb => 0, // Not applicable
        }
    }

    /// File-backed drivers have no server to talk to.
    pub fn is_embedded(&self) -> bool {
        matches!(self, Driver::Sqlite | Driver::DuckDb)
    }
}

impl std::fmt::Display for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

//! TOML-based configuration for linkql.
//!
//! Supports a config file (linkql.toml) with environment variable expansion.
//!
//! Example configuration:
//! ```toml
//! [planner]
//! max_hops = 4
//! default_limit = 500
//!
//! [resolver]
//! fuzzy_threshold = 0.7
//! strip_prefixes = ["stg_", "tbl_", "rbp_"]
//!
//! [execution]
//! timeout_secs = 60
//! schema_fallback = true
//!
//! [kpi]
//! target_duration_ms = 2000
//!
//! [connections.production]
//! driver = "mssql"
//! connection_string = "${PROD_DB_CONNECTION_STRING}"
//! default_schema = "dbo"
//!
//! [connections.local]
//! driver = "sqlite"
//! connection_string = "./data/local.db"
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use super::connection::Driver;
use crate::executor::ExecutionConfig;
use crate::planner::PlannerConfig;
use crate::reconcile::KpiConfig;
use crate::resolve::ResolverConfig;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "LINKQL_CONFIG";

/// Error type for settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Connection not found: {0}")]
    ConnectionNotFound(String),

    #[error("Unsupported driver: {0}")]
    UnsupportedDriver(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    pub planner: PlannerConfig,
    pub resolver: ResolverConfig,
    pub execution: ExecutionConfig,
    pub kpi: KpiConfig,

    /// Named database connections.
    pub connections: BTreeMap<String, ConnectionSettings>,
}

/// Connection configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ConnectionSettings {
    /// Database driver (mssql, postgres, mysql, oracle, sqlite, duckdb).
    pub driver: String,

    /// Connection string (supports ${ENV_VAR} expansion).
    pub connection_string: String,

    /// Default schema for this connection.
    #[serde(default)]
    pub default_schema: Option<String>,
}

impl ConnectionSettings {
    /// Get the driver type.
    pub fn driver_type(&self) -> Result<Driver, SettingsError> {
        Driver::from_str(&self.driver)
            .map_err(|_| SettingsError::UnsupportedDriver(self.driver.clone()))
    }

    /// Get the connection string with environment variables expanded.
    pub fn resolved_connection_string(&self) -> Result<String, SettingsError> {
        expand_env_vars(&self.connection_string)
    }
}

impl Settings {
    /// Load settings from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(SettingsError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate settings from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, SettingsError> {
        let settings: Settings = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from the default config file locations.
    ///
    /// Searches in order:
    /// 1. Environment variable `LINKQL_CONFIG`
    /// 2. `./linkql.toml`
    /// 3. `<config dir>/linkql/config.toml`
    pub fn load() -> Result<Self, SettingsError> {
        if let Ok(path) = env::var(CONFIG_ENV) {
            return Self::from_file(&path);
        }

        let local_config = PathBuf::from("linkql.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("linkql").join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        Ok(Settings::default())
    }

    /// Reject values the planner and KPI code cannot work with.
    pub fn validate(&self) -> Result<(), SettingsError> {
        let invalid = |msg: String| -> Result<(), SettingsError> { Err(SettingsError::InvalidConfig(msg)) };

        if self.planner.max_hops == 0 {
            return invalid("planner.max_hops must be at least 1".into());
        }
        for (name, w) in [
            ("planner.confidence_weight", self.planner.confidence_weight),
            ("planner.length_weight", self.planner.length_weight),
            ("kpi.match_weight", self.kpi.match_weight),
            ("kpi.utilization_weight", self.kpi.utilization_weight),
            ("kpi.speed_weight", self.kpi.speed_weight),
        ] {
            if !w.is_finite() || w < 0.0 {
                return invalid(format!("{} must be a non-negative number, got {}", name, w));
            }
        }
        if self.planner.default_limit == 0 {
            return invalid("planner.default_limit must be at least 1".into());
        }
        if !(0.0..=1.0).contains(&self.resolver.fuzzy_threshold) {
            return invalid(format!(
                "resolver.fuzzy_threshold must be within [0, 1], got {}",
                self.resolver.fuzzy_threshold
            ));
        }
        if self.execution.timeout_secs == 0 {
            return invalid("execution.timeout_secs must be at least 1".into());
        }
        for (name, conn) in &self.connections {
            conn.driver_type().map_err(|_| {
                SettingsError::InvalidConfig(format!(
                    "connection '{}' uses unsupported driver '{}'",
                    name, conn.driver
                ))
            })?;
        }
        Ok(())
    }

    /// Get a connection by name.
    pub fn get_connection(&self, name: &str) -> Result<&ConnectionSettings, SettingsError> {
        self.connections
            .get(name)
            .ok_or_else(|| SettingsError::ConnectionNotFound(name.to_string()))
    }

    /// Get the default connection ("default" if it exists, else the first by name).
    pub fn default_connection(&self) -> Option<(&str, &ConnectionSettings)> {
        if let Some(conn) = self.connections.get("default") {
            return Some(("default", conn));
        }
        self.connections.iter().next().map(|(k, v)| (k.as_str(), v))
    }
}

/// Expand environment variables in a string.
///
/// Supports `${VAR}` and `$VAR` syntax.
pub fn expand_env_vars(s: &str) -> Result<String, SettingsError> {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            result.push(c);
            continue;
        }

        let braced = chars.peek() == Some(&'{');
        let mut var_name = String::new();
        if braced {
            chars.next(); // consume '{'
            let mut closed = false;
            for ch in chars.by_ref() {
                if ch == '}' {
                    closed = true;
                    break;
                }
                var_name.push(ch);
            }
            if !closed {
                return Err(SettingsError::InvalidConfig(format!(
                    "unterminated '${{{}' in '{}'",
                    var_name, s
                )));
            }
        } else {
            // $VAR ends at the first non-alphanumeric/underscore
            while let Some(ch) = chars.next_if(|ch| ch.is_alphanumeric() || *ch == '_') {
                var_name.push(ch);
            }
            if var_name.is_empty() {
                // Just a lone $, keep it
                result.push('$');
                continue;
            }
        }

        let value =
            env::var(&var_name).map_err(|_| SettingsError::MissingEnvVar(var_name.clone()))?;
        result.push_str(&value);
    }

    Ok(result)
}

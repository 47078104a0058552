//! Configuration module for linkql.
//!
//! Handles the TOML settings file, environment variable expansion and
//! database driver names.

mod connection;
mod settings;

pub use connection::{ConnectionError, Driver};
pub use settings::{expand_env_vars, ConnectionSettings, Settings, SettingsError, CONFIG_ENV};

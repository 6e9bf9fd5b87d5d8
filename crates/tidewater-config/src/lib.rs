//! Shared configuration for the Tidewater server.
//!
//! Values resolve in layers through `ortho_config`: built-in defaults, then
//! configuration files (`--config-path` or `TIDEWATER_CONFIG_PATH`, plus the
//! usual discovery locations), then `TIDEWATER_*` environment variables, then
//! command-line flags. Every field is reachable from all three layers, for
//! example `--heartbeat-interval-secs`, `TIDEWATER_HEARTBEAT_INTERVAL_SECS`
//! and `heartbeat_interval_secs` in a file.

mod defaults;
mod listen;
mod logging;

use camino::{Utf8Path, Utf8PathBuf};
use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use defaults::{
    CONFIG_PATH_ENV_VAR, DEFAULT_BACKEND_PORT, DEFAULT_CLIENT_PORT, DEFAULT_DB_PATH,
    DEFAULT_HEARTBEAT_INTERVAL_SECS, DEFAULT_MAX_OPEN_FILES, DEFAULT_OPTIMIZE_INTERVAL_SECS,
    default_backend_listen, default_client_listen, default_db_path, default_log_format,
    default_log_level,
};
pub use listen::{ListenAddress, ListenParseError};
pub use logging::{LogFormat, LogLevel, LogParseError};

/// Resolved server configuration.
///
/// `Config::load()` reads the process arguments and environment, while
/// `Config::load_from_iter(args)` takes an explicit argument list whose first
/// item is the program name. Both return `Arc<ortho_config::OrthoError>` on
/// failure. Call [`Config::validate`] on the result before driving a server.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, OrthoConfig)]
#[serde(default)]
#[ortho_config(prefix = "TIDEWATER")]
pub struct Config {
    /// Container directory with one subdirectory per database instance.
    #[ortho_config(cli_short = 'd')]
    pub db_path: Utf8PathBuf,
    /// Capacity of the shard file handle cache.
    #[ortho_config(cli_short = 'm')]
    pub max_open_files: usize,
    /// Address of the client-facing listener.
    #[ortho_config(cli_short = 'c')]
    pub client_listen: ListenAddress,
    /// Address of the inter-node listener.
    #[ortho_config(cli_short = 'b')]
    pub backend_listen: ListenAddress,
    /// Seconds between optimize passes.
    #[ortho_config(cli_short = 'o')]
    pub optimize_interval_secs: u64,
    /// Seconds between heartbeats.
    #[ortho_config(cli_short = 't')]
    pub heartbeat_interval_secs: u64,
    /// Minimum severity written to the log.
    #[ortho_config(cli_short = 'l')]
    pub log_level: LogLevel,
    /// Emit ANSI colours.
    #[ortho_config(cli_short = 'C')]
    pub log_colorized: bool,
    /// Output format of log lines.
    #[ortho_config(cli_short = 'f')]
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            max_open_files: DEFAULT_MAX_OPEN_FILES,
            client_listen: default_client_listen(),
            backend_listen: default_backend_listen(),
            optimize_interval_secs: DEFAULT_OPTIMIZE_INTERVAL_SECS,
            heartbeat_interval_secs: DEFAULT_HEARTBEAT_INTERVAL_SECS,
            log_level: default_log_level(),
            log_colorized: false,
            log_format: default_log_format(),
        }
    }
}

/// A value that loaded but cannot drive the server.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A field holds an unusable value.
    #[error("invalid value for '{field}': {reason}")]
    Invalid {
        /// Name of the offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
}

impl ConfigError {
    fn at_least_one(field: &'static str) -> Self {
        Self::Invalid {
            field,
            reason: "must be at least 1".to_owned(),
        }
    }
}

impl Config {
    /// Rejects values that load but cannot drive the server.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first field that is zero
    /// where a count or interval is required, or an empty `db_path`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_open_files == 0 {
            return Err(ConfigError::at_least_one("max_open_files"));
        }
        if self.optimize_interval_secs == 0 {
            return Err(ConfigError::at_least_one("optimize_interval_secs"));
        }
        if self.heartbeat_interval_secs == 0 {
            return Err(ConfigError::at_least_one("heartbeat_interval_secs"));
        }
        if self.db_path.as_str().is_empty() {
            return Err(ConfigError::Invalid {
                field: "db_path",
                reason: "must not be empty".to_owned(),
            });
        }
        Ok(())
    }

    /// Database container directory.
    #[must_use]
    pub fn db_path(&self) -> &Utf8Path {
        self.db_path.as_path()
    }

    /// Capacity of the shard file handle cache.
    #[must_use]
    pub const fn max_open_files(&self) -> usize {
        self.max_open_files
    }

    /// Client listener address.
    #[must_use]
    pub const fn client_listen(&self) -> &ListenAddress {
        &self.client_listen
    }

    /// Inter-node listener address.
    #[must_use]
    pub const fn backend_listen(&self) -> &ListenAddress {
        &self.backend_listen
    }

    /// Seconds between optimize passes.
    #[must_use]
    pub const fn optimize_interval_secs(&self) -> u64 {
        self.optimize_interval_secs
    }

    /// Seconds between heartbeats.
    #[must_use]
    pub const fn heartbeat_interval_secs(&self) -> u64 {
        self.heartbeat_interval_secs
    }

    /// Log severity threshold.
    #[must_use]
    pub const fn log_level(&self) -> LogLevel {
        self.log_level
    }

    /// Whether log output is colourised.
    #[must_use]
    pub const fn log_colorized(&self) -> bool {
        self.log_colorized
    }

    /// Log line format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn defaults_validate() {
        Config::default()
            .validate()
            .expect("defaults should be valid");
    }

    #[rstest]
    #[case::open_files(Config { max_open_files: 0, ..Config::default() }, "max_open_files")]
    #[case::optimize(
        Config { optimize_interval_secs: 0, ..Config::default() },
        "optimize_interval_secs"
    )]
    #[case::heartbeat(
        Config { heartbeat_interval_secs: 0, ..Config::default() },
        "heartbeat_interval_secs"
    )]
    #[case::db_path(Config { db_path: Utf8PathBuf::new(), ..Config::default() }, "db_path")]
    fn rejects_unusable_values(#[case] config: Config, #[case] expected: &str) {
        match config.validate() {
            Err(ConfigError::Invalid { field, .. }) => assert_eq!(field, expected),
            Ok(()) => panic!("{expected} should be rejected"),
        }
    }

    #[test]
    fn partial_file_keeps_remaining_defaults() {
        let config: Config = toml::from_str("max_open_files = 8\n").expect("parse partial file");
        assert_eq!(config.max_open_files, 8);
        assert_eq!(config.client_listen, default_client_listen());
        assert_eq!(config.log_level, LogLevel::Info);
    }
}

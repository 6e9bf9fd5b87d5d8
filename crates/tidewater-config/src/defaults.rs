use camino::Utf8PathBuf;

use crate::listen::ListenAddress;
use crate::logging::{LogFormat, LogLevel};

/// Container directory holding one subdirectory per database instance.
pub const DEFAULT_DB_PATH: &str = "/var/lib/tidewater/dbpath/";

/// Upper bound on shard file handles kept open at once.
pub const DEFAULT_MAX_OPEN_FILES: usize = 32_768;

/// Port serving client connections.
pub const DEFAULT_CLIENT_PORT: u16 = 9000;

/// Port serving inter-node connections.
pub const DEFAULT_BACKEND_PORT: u16 = 9010;

/// Seconds between optimize passes.
pub const DEFAULT_OPTIMIZE_INTERVAL_SECS: u64 = 3600;

/// Seconds between heartbeats.
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 30;

/// Environment variable naming the configuration file, read alongside the
/// `--config-path` flag.
pub const CONFIG_PATH_ENV_VAR: &str = "TIDEWATER_CONFIG_PATH";

/// Default database container path.
#[must_use]
pub fn default_db_path() -> Utf8PathBuf {
    Utf8PathBuf::from(DEFAULT_DB_PATH)
}

/// Default client listener address.
#[must_use]
pub fn default_client_listen() -> ListenAddress {
    ListenAddress::new("0.0.0.0", DEFAULT_CLIENT_PORT)
}

/// Default inter-node listener address.
#[must_use]
pub fn default_backend_listen() -> ListenAddress {
    ListenAddress::new("0.0.0.0", DEFAULT_BACKEND_PORT)
}

/// Default log severity threshold.
#[must_use]
pub fn default_log_level() -> LogLevel {
    LogLevel::Info
}

/// Default logging format for the binaries.
#[must_use]
pub fn default_log_format() -> LogFormat {
    LogFormat::Compact
}

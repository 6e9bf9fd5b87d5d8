//! Defines the unified error surface for server launch.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use nix::errno::Errno;
use ortho_config::OrthoError;
use thiserror::Error;
use tidewater_config::ConfigError;

use crate::bootstrap::BootstrapError;
use crate::reactor::ReactorError;
use crate::telemetry::TelemetryError;
use crate::transport::{ListenerError, ListenerKind};

use super::LifecycleState;

/// Errors raised while holding the PID lock on the database directory.
#[derive(Debug, Error)]
pub enum GuardError {
    /// Lock file creation failed.
    #[error("failed to create lock file '{path}': {source}")]
    Create {
        /// Lock file path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// A running server already holds the lock.
    #[error("server already running with pid {pid}")]
    AlreadyRunning {
        /// PID recorded in the existing lock file.
        pid: u32,
    },
    /// Removing a stale lock failed.
    #[error("failed to remove stale lock '{path}': {source}")]
    Cleanup {
        /// Lock file path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Writing the PID failed.
    #[error("failed to write pid to '{path}': {source}")]
    PidWrite {
        /// Lock file path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Probing an existing PID failed.
    #[error("failed to check existing process {pid}: {source}")]
    CheckProcess {
        /// PID whose liveness could not be checked.
        pid: u32,
        /// Underlying OS error.
        #[source]
        source: Errno,
    },
}

/// Errors surfaced while launching or running the server.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// Configuration layers could not be loaded or merged.
    #[error("failed to load configuration: {source}")]
    Configuration {
        /// Underlying loader error.
        #[source]
        source: Arc<OrthoError>,
    },
    /// Configuration loaded but holds an unusable value.
    #[error("invalid configuration: {source}")]
    InvalidConfiguration {
        /// Underlying validation error.
        #[source]
        source: ConfigError,
    },
    /// Telemetry could not be installed.
    #[error("failed to initialise telemetry: {source}")]
    Telemetry {
        /// Underlying telemetry error.
        #[source]
        source: TelemetryError,
    },
    /// Loading the databases failed.
    #[error("bootstrap failed: {source}")]
    Bootstrap {
        /// Underlying bootstrap error.
        #[source]
        source: BootstrapError,
    },
    /// The reactor could not be built or configured.
    #[error("reactor error: {source}")]
    Reactor {
        /// Underlying reactor error.
        #[source]
        source: ReactorError,
    },
    /// A listener failed to start.
    #[error("failed to start {kind} listener: {source}")]
    Listener {
        /// Listener that failed.
        kind: ListenerKind,
        /// Underlying listener error.
        #[source]
        source: ListenerError,
    },
    /// A lifecycle operation was invoked out of order.
    #[error("cannot {operation} while {state}")]
    InvalidState {
        /// Operation attempted.
        operation: &'static str,
        /// State the server was in.
        state: LifecycleState,
    },
}

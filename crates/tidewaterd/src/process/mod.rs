//! Process lifecycle: the server controller, the PID lock and the shutdown
//! path.

mod errors;
mod guard;
mod lifecycle;
mod shutdown;

use std::ffi::OsString;
use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;

use ortho_config::OrthoConfig;
use tidewater_config::Config;

use crate::health::StructuredLifecycleReporter;
use crate::storage::DiskEngine;
use crate::telemetry;

pub use errors::{GuardError, LaunchError};
pub use guard::{PID_FILE, PidLock};
pub use lifecycle::{LifecycleState, Server, ServerContext, serve};
pub use shutdown::{ShutdownReason, ShutdownTrigger};

pub(crate) const PROCESS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::process");

/// Entry point of the `tidewaterd` binary.
///
/// Loads configuration from `args` and the environment, then serves until a
/// shutdown signal arrives. Launch failures are written to `stderr`.
pub fn run<I, E>(args: I, stderr: &mut E) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    E: Write,
{
    match launch(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(target: PROCESS_TARGET, error = %error, "server exited with error");
            let _ = writeln!(stderr, "tidewaterd: {error}");
            ExitCode::FAILURE
        }
    }
}

fn launch<I>(args: I) -> Result<(), LaunchError>
where
    I: IntoIterator<Item = OsString>,
{
    let arguments: Vec<OsString> = args.into_iter().collect();
    let config =
        Config::load_from_iter(arguments).map_err(|source| LaunchError::Configuration { source })?;
    config
        .validate()
        .map_err(|source| LaunchError::InvalidConfiguration { source })?;
    run_server(config)
}

/// Installs telemetry and runs the server with the on-disk storage engine
/// until a shutdown signal arrives.
///
/// # Errors
///
/// Returns the first [`LaunchError`] raised by telemetry or [`serve`].
pub fn run_server(config: Config) -> Result<(), LaunchError> {
    telemetry::initialise(&config).map_err(|source| LaunchError::Telemetry { source })?;
    serve(
        config,
        DiskEngine::new(),
        Arc::new(StructuredLifecycleReporter::new()),
    )
}

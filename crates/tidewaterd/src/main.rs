//! Server entrypoint for `tidewaterd`.
//!
//! Delegates to [`tidewaterd::run`], which loads configuration, bootstraps
//! the database container and serves until a shutdown signal arrives.

use std::io;
use std::process::ExitCode;

fn main() -> ExitCode {
    let mut stderr = io::stderr().lock();
    tidewaterd::run(std::env::args_os(), &mut stderr)
}

//! Structured reporting of server lifecycle events.

use std::fmt;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use crate::bootstrap::BootstrapError;
use crate::process::ShutdownReason;
use crate::transport::ListenerKind;

const HEALTH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::health");

/// Why a directory under the container was not loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// `.`, `..` or a `__` prefix.
    Reserved,
    /// Not a directory.
    NotDirectory,
    /// Metadata could not be read.
    Unreadable,
    /// No readable `database.conf`.
    MissingConf,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Reserved => "reserved name",
            Self::NotDirectory => "not a directory",
            Self::Unreadable => "unreadable",
            Self::MissingConf => "no database.conf",
        })
    }
}

/// Observer trait used to surface lifecycle events to telemetry sinks.
pub trait LifecycleReporter: Send + Sync {
    /// Invoked before the container is scanned.
    fn bootstrap_starting(&self, db_path: &Path);

    /// Invoked before a candidate directory is loaded.
    fn instance_loading(&self, dir: &Path);

    /// Invoked after an instance loaded and was registered.
    fn instance_loaded(&self, name: &str, dir: &Path);

    /// Invoked for entries that are not loaded.
    fn instance_skipped(&self, dir: &Path, reason: SkipReason);

    /// Invoked after every candidate loaded.
    fn bootstrap_succeeded(&self, loaded: usize);

    /// Invoked when bootstrap fails.
    fn bootstrap_failed(&self, error: &BootstrapError);

    /// Invoked once a listener accepts connections.
    fn listener_bound(&self, kind: ListenerKind, addr: SocketAddr);

    /// Invoked immediately before the reactor starts dispatching.
    fn reactor_running(&self, live_handles: usize);

    /// Invoked once per shutdown, when the first stop request is handled.
    fn shutdown_requested(&self, reason: ShutdownReason);

    /// Invoked after the resource walk and drain finished.
    fn shutdown_completed(&self, closed: usize);
}

impl<T> LifecycleReporter for Arc<T>
where
    T: LifecycleReporter,
{
    fn bootstrap_starting(&self, db_path: &Path) {
        (**self).bootstrap_starting(db_path);
    }

    fn instance_loading(&self, dir: &Path) {
        (**self).instance_loading(dir);
    }

    fn instance_loaded(&self, name: &str, dir: &Path) {
        (**self).instance_loaded(name, dir);
    }

    fn instance_skipped(&self, dir: &Path, reason: SkipReason) {
        (**self).instance_skipped(dir, reason);
    }

    fn bootstrap_succeeded(&self, loaded: usize) {
        (**self).bootstrap_succeeded(loaded);
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        (**self).bootstrap_failed(error);
    }

    fn listener_bound(&self, kind: ListenerKind, addr: SocketAddr) {
        (**self).listener_bound(kind, addr);
    }

    fn reactor_running(&self, live_handles: usize) {
        (**self).reactor_running(live_handles);
    }

    fn shutdown_requested(&self, reason: ShutdownReason) {
        (**self).shutdown_requested(reason);
    }

    fn shutdown_completed(&self, closed: usize) {
        (**self).shutdown_completed(closed);
    }
}

/// Default reporter that records lifecycle events using `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredLifecycleReporter;

impl StructuredLifecycleReporter {
    /// Builds a new reporter.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl LifecycleReporter for StructuredLifecycleReporter {
    fn bootstrap_starting(&self, db_path: &Path) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "bootstrap_starting",
            db_path = %db_path.display(),
            "loading databases"
        );
    }

    fn instance_loading(&self, dir: &Path) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "instance_loading",
            dir = %dir.display(),
            "loading database"
        );
    }

    fn instance_loaded(&self, name: &str, dir: &Path) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "instance_loaded",
            instance = name,
            dir = %dir.display(),
            "finished loading database"
        );
    }

    fn instance_skipped(&self, dir: &Path, reason: SkipReason) {
        tracing::debug!(
            target: HEALTH_TARGET,
            event = "instance_skipped",
            dir = %dir.display(),
            reason = %reason,
            "skipping directory entry"
        );
    }

    fn bootstrap_succeeded(&self, loaded: usize) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "bootstrap_succeeded",
            loaded,
            "databases loaded"
        );
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        tracing::error!(
            target: HEALTH_TARGET,
            event = "bootstrap_failed",
            error = %error,
            "database bootstrap failed"
        );
    }

    fn listener_bound(&self, kind: ListenerKind, addr: SocketAddr) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "listener_bound",
            listener = %kind,
            %addr,
            "listening"
        );
    }

    fn reactor_running(&self, live_handles: usize) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "reactor_running",
            live_handles,
            "server running"
        );
    }

    fn shutdown_requested(&self, reason: ShutdownReason) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "shutdown_requested",
            reason = %reason,
            "shutting down"
        );
    }

    fn shutdown_completed(&self, closed: usize) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "shutdown_completed",
            closed,
            "all handles closed"
        );
    }
}

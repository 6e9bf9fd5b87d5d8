//! Test double for [`LifecycleReporter`] that records events for assertions.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::bootstrap::BootstrapError;
use crate::health::{LifecycleReporter, SkipReason};
use crate::process::ShutdownReason;
use crate::transport::ListenerKind;

/// Lifecycle events tracked during scenarios.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    BootstrapStarting(PathBuf),
    InstanceLoading(PathBuf),
    InstanceLoaded(String),
    InstanceSkipped(PathBuf, SkipReason),
    BootstrapSucceeded(usize),
    BootstrapFailed(String),
    ListenerBound(ListenerKind, SocketAddr),
    ReactorRunning(usize),
    ShutdownRequested(ShutdownReason),
    ShutdownCompleted(usize),
}

/// Records lifecycle events in arrival order.
#[derive(Debug, Default)]
pub struct RecordingLifecycleReporter {
    events: Mutex<Vec<LifecycleEvent>>,
}

impl RecordingLifecycleReporter {
    #[must_use]
    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.events
            .lock()
            .expect("lifecycle reporter mutex poisoned")
            .clone()
    }

    /// Events accepted by `filter`, in order.
    pub fn matching(&self, filter: impl Fn(&LifecycleEvent) -> bool) -> Vec<LifecycleEvent> {
        self.events().into_iter().filter(|event| filter(event)).collect()
    }

    /// Names of the instances reported as loaded.
    pub fn loaded_names(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                LifecycleEvent::InstanceLoaded(name) => Some(name),
                _ => None,
            })
            .collect()
    }

    fn record(&self, event: LifecycleEvent) {
        self.events
            .lock()
            .expect("lifecycle reporter mutex poisoned")
            .push(event);
    }
}

impl LifecycleReporter for RecordingLifecycleReporter {
    fn bootstrap_starting(&self, db_path: &Path) {
        self.record(LifecycleEvent::BootstrapStarting(db_path.to_path_buf()));
    }

    fn instance_loading(&self, dir: &Path) {
        self.record(LifecycleEvent::InstanceLoading(dir.to_path_buf()));
    }

    fn instance_loaded(&self, name: &str, _dir: &Path) {
        self.record(LifecycleEvent::InstanceLoaded(name.to_owned()));
    }

    fn instance_skipped(&self, dir: &Path, reason: SkipReason) {
        self.record(LifecycleEvent::InstanceSkipped(dir.to_path_buf(), reason));
    }

    fn bootstrap_succeeded(&self, loaded: usize) {
        self.record(LifecycleEvent::BootstrapSucceeded(loaded));
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        self.record(LifecycleEvent::BootstrapFailed(error.to_string()));
    }

    fn listener_bound(&self, kind: ListenerKind, addr: SocketAddr) {
        self.record(LifecycleEvent::ListenerBound(kind, addr));
    }

    fn reactor_running(&self, live_handles: usize) {
        self.record(LifecycleEvent::ReactorRunning(live_handles));
    }

    fn shutdown_requested(&self, reason: ShutdownReason) {
        self.record(LifecycleEvent::ShutdownRequested(reason));
    }

    fn shutdown_completed(&self, closed: usize) {
        self.record(LifecycleEvent::ShutdownCompleted(closed));
    }
}

//! Reporter and server builders shared by the signal suites.
//!
//! Each suite lives in its own test binary because signal dispositions are
//! process-wide.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};

use nix::sys::signal::{Signal, raise};
use tempfile::TempDir;
use tidewater_config::{Config, ListenAddress};
use tidewaterd::transport::ListenerKind;
use tidewaterd::{
    BootstrapError, DiskEngine, LifecycleReporter, Server, ShutdownReason, SkipReason,
};

/// Raises `signals`, in order, as soon as the reactor starts running.
pub struct RaisingReporter {
    signals: Vec<Signal>,
    requested: Mutex<Vec<ShutdownReason>>,
    completed: Mutex<Option<usize>>,
}

impl RaisingReporter {
    pub fn new(signals: &[Signal]) -> Self {
        Self {
            signals: signals.to_vec(),
            requested: Mutex::new(Vec::new()),
            completed: Mutex::new(None),
        }
    }

    pub fn requested(&self) -> Vec<ShutdownReason> {
        self.requested
            .lock()
            .expect("reporter mutex poisoned")
            .clone()
    }

    pub fn completed(&self) -> Option<usize> {
        *self.completed.lock().expect("reporter mutex poisoned")
    }
}

impl LifecycleReporter for RaisingReporter {
    fn bootstrap_starting(&self, _db_path: &Path) {}

    fn instance_loading(&self, _dir: &Path) {}

    fn instance_loaded(&self, _name: &str, _dir: &Path) {}

    fn instance_skipped(&self, _dir: &Path, _reason: SkipReason) {}

    fn bootstrap_succeeded(&self, _loaded: usize) {}

    fn bootstrap_failed(&self, _error: &BootstrapError) {}

    fn listener_bound(&self, _kind: ListenerKind, _addr: SocketAddr) {}

    fn reactor_running(&self, _live_handles: usize) {
        for signal in &self.signals {
            raise(*signal).expect("raise signal");
        }
    }

    fn shutdown_requested(&self, reason: ShutdownReason) {
        self.requested
            .lock()
            .expect("reporter mutex poisoned")
            .push(reason);
    }

    fn shutdown_completed(&self, closed: usize) {
        *self.completed.lock().expect("reporter mutex poisoned") = Some(closed);
    }
}

/// A started server on ephemeral loopback ports over a scratch container.
pub fn started_server(dir: &TempDir, reporter: &Arc<RaisingReporter>) -> Server<DiskEngine> {
    let db_path = dir.path().join("db");
    let config = Config {
        db_path: db_path.to_str().expect("utf-8 temp path").into(),
        client_listen: ListenAddress::new("127.0.0.1", 0),
        backend_listen: ListenAddress::new("127.0.0.1", 0),
        ..Config::default()
    };
    let shared: Arc<dyn LifecycleReporter> = Arc::clone(reporter) as Arc<dyn LifecycleReporter>;
    let mut server = Server::new(config, DiskEngine::new(), shared);
    server.initialise().expect("initialise");
    server.bootstrap().expect("bootstrap");
    server.start().expect("start");
    server
}

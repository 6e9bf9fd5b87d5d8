//! Several shutdown signals landing together still produce one shutdown.

mod support;

use std::sync::Arc;

use nix::sys::signal::Signal;
use tempfile::TempDir;
use tidewaterd::{LifecycleState, ShutdownReason, ShutdownSignal};

use support::{RaisingReporter, started_server};

#[test]
fn sigterm_sigint_and_sigquit_together_request_one_shutdown() {
    let dir = TempDir::new().expect("create temp dir");
    let reporter = Arc::new(RaisingReporter::new(&[
        Signal::SIGTERM,
        Signal::SIGINT,
        Signal::SIGQUIT,
    ]));
    let mut server = started_server(&dir, &reporter);

    server.run().expect("run until a signal arrives");

    let requested = reporter.requested();
    assert_eq!(requested.len(), 1, "requests: {requested:?}");
    assert!(
        ShutdownSignal::ALL
            .iter()
            .any(|signal| requested.first() == Some(&ShutdownReason::Signal(*signal))),
        "the first arriving signal is the recorded reason: {requested:?}"
    );
    assert!(reporter.completed().is_some());
    assert_eq!(server.live_handles(), 0);
    let tasks = server.tasks().expect("tasks present");
    assert_eq!(tasks.optimize.cancellations(), 1);
    assert_eq!(tasks.heartbeat.cancellations(), 1);

    server.terminate();
    assert_eq!(server.state(), LifecycleState::Terminated);
}

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use tracing::info;

use super::PROCESS_TARGET;
use crate::reactor::{ShutdownSignal, WakeHandle};

/// What started the shutdown sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// A termination signal arrived.
    Signal(ShutdownSignal),
    /// Shutdown was requested programmatically.
    Requested,
    /// A listener failed during startup.
    ListenerFailure,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Signal(signal) => write!(f, "received {signal}"),
            Self::Requested => f.write_str("requested"),
            Self::ListenerFailure => f.write_str("listener failure"),
        }
    }
}

/// Flags a shutdown from inside a reactor callback.
///
/// Firing only records the reason and wakes the shutdown handle; tasks are
/// cancelled and the reactor stopped on the next loop turn. Only the first
/// reason is kept.
#[derive(Debug, Clone)]
pub struct ShutdownTrigger {
    reason: Rc<Cell<Option<ShutdownReason>>>,
    wake: WakeHandle,
}

impl ShutdownTrigger {
    pub(super) fn new(reason: Rc<Cell<Option<ShutdownReason>>>, wake: WakeHandle) -> Self {
        Self { reason, wake }
    }

    /// Records `reason` and wakes the shutdown path. Only the first reason
    /// is kept.
    pub fn fire(&self, reason: ShutdownReason) {
        match self.reason.get() {
            Some(pending) => info!(
                target: PROCESS_TARGET,
                %reason,
                %pending,
                "shutdown already pending; ignoring"
            ),
            None => self.reason.set(Some(reason)),
        }
        self.wake.wake();
    }
}

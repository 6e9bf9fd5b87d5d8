//! Single-threaded reactor built on a current-thread Tokio runtime and a
//! `LocalSet`.
//!
//! Every task the server spawns is tracked as a typed [`Resource`] so the
//! shutdown walk can close each one deterministically. State shared between
//! callbacks is `!Send` and lives behind `Rc`.

mod resource;
mod signals;

use std::cell::Cell;
use std::io;
use std::rc::Rc;
use std::time::Duration;

use thiserror::Error;
use tokio::runtime::{Builder, Runtime};
use tokio::sync::Notify;
use tokio::task::LocalSet;
use tracing::debug;

pub use resource::{
    AsyncResource, Resource, ResourceId, ResourceKind, ResourceTable, SignalWatcher, TcpResource,
    TimerResource, WakeHandle,
};
pub use signals::ShutdownSignal;

pub(crate) const REACTOR_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::reactor");

/// Errors raised by the reactor.
#[derive(Debug, Error)]
pub enum ReactorError {
    /// The current-thread runtime could not be built.
    #[error("failed to build reactor runtime: {source}")]
    Runtime {
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// A signal watcher could not be installed.
    #[error("failed to watch {signal}: {source}")]
    Signal {
        /// Signal that was being watched.
        signal: ShutdownSignal,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// The reactor was released while resources were still tracked.
    #[error("reactor released with {live} live handles")]
    Busy {
        /// Resources still tracked or awaiting close.
        live: usize,
    },
}

struct StopState {
    requested: Cell<bool>,
    notify: Notify,
}

/// Requests the reactor loop to return.
#[derive(Clone)]
pub struct StopHandle {
    state: Rc<StopState>,
}

impl StopHandle {
    fn new() -> Self {
        Self {
            state: Rc::new(StopState {
                requested: Cell::new(false),
                notify: Notify::new(),
            }),
        }
    }

    /// Requests a stop. Returns `false` when one was already requested.
    pub fn request(&self) -> bool {
        if self.state.requested.replace(true) {
            debug!(target: REACTOR_TARGET, "stop already requested");
            return false;
        }
        self.state.notify.notify_one();
        true
    }

    /// Whether a stop has been requested.
    #[must_use]
    pub fn is_requested(&self) -> bool {
        self.state.requested.get()
    }

    async fn wait(&self) {
        if !self.is_requested() {
            self.state.notify.notified().await;
        }
    }
}

/// Event loop owning the runtime, the local task set and the resource table.
pub struct Reactor {
    local: LocalSet,
    runtime: Runtime,
    resources: Rc<ResourceTable>,
    stop: StopHandle,
}

impl Reactor {
    /// Builds the runtime. No resources exist yet.
    ///
    /// # Errors
    ///
    /// Returns [`ReactorError::Runtime`] when the runtime cannot be built.
    pub fn new() -> Result<Self, ReactorError> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|source| ReactorError::Runtime { source })?;
        Ok(Self {
            local: LocalSet::new(),
            runtime,
            resources: Rc::new(ResourceTable::default()),
            stop: StopHandle::new(),
        })
    }

    /// Runs `f` inside the reactor context so it can register resources.
    /// Must not be called from a reactor callback.
    pub fn within<R>(&self, f: impl FnOnce() -> R) -> R {
        self.local.block_on(&self.runtime, async move { f() })
    }

    /// Watches `signal`, invoking `on_signal` for every delivery.
    ///
    /// # Errors
    ///
    /// Returns [`ReactorError::Signal`] when the handler cannot be installed.
    pub fn watch_signal(
        &self,
        signal: ShutdownSignal,
        on_signal: impl Fn(ShutdownSignal) + 'static,
    ) -> Result<ResourceId, ReactorError> {
        self.within(|| self.resources.watch_signal(signal, on_signal))
    }

    /// Starts a repeating timer whose first tick fires after `period`.
    pub fn start_timer(&self, period: Duration, tick: impl FnMut() + 'static) -> ResourceId {
        self.within(|| self.resources.start_timer(period, tick))
    }

    /// Registers an async wake handle running `callback` after each wake.
    pub fn add_async(&self, callback: impl FnMut() + 'static) -> WakeHandle {
        self.within(|| self.resources.add_async(callback))
    }

    /// Table of live resources.
    #[must_use]
    pub fn resources(&self) -> &Rc<ResourceTable> {
        &self.resources
    }

    /// Handle that can stop the loop from inside a callback.
    #[must_use]
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Requests the loop to return; idempotent.
    pub fn stop(&self) -> bool {
        self.stop.request()
    }

    /// Dispatches callbacks until a stop is requested.
    pub fn run(&self) {
        let stop = self.stop.clone();
        self.local.block_on(&self.runtime, async move { stop.wait().await });
    }

    /// Dispatches callbacks until a stop is requested or `limit` elapses.
    /// Returns whether the stop was observed.
    pub fn run_for(&self, limit: Duration) -> bool {
        let stop = self.stop.clone();
        self.local.block_on(&self.runtime, async move {
            tokio::time::timeout(limit, stop.wait()).await.is_ok()
        })
    }

    /// Closes every tracked resource. Close callbacks run at [`Reactor::drain`].
    pub fn close_all(&self) -> usize {
        self.resources.close_all()
    }

    /// Runs the loop until every closed resource has finished and its close
    /// callback has run. Returns the number of resources drained.
    pub fn drain(&self) -> usize {
        let pending = self.resources.take_pending();
        let count = pending.len();
        self.local.block_on(&self.runtime, async move {
            for close in pending {
                close.finish().await;
            }
        });
        count
    }

    /// Handles that are tracked or still awaiting their close callback.
    #[must_use]
    pub fn live_handles(&self) -> usize {
        self.resources.live()
    }

    /// Releases the reactor. Fails when handles are still live; the runtime
    /// is dropped either way.
    ///
    /// # Errors
    ///
    /// Returns [`ReactorError::Busy`] when resources are still tracked.
    pub fn close(self) -> Result<(), ReactorError> {
        let live = self.live_handles();
        if live > 0 {
            return Err(ReactorError::Busy { live });
        }
        Ok(())
    }
}

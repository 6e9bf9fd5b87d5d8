//! Typed reactor resources and the table that tracks them.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::rc::{Rc, Weak};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{trace, warn};

use super::{REACTOR_TARGET, ReactorError, ShutdownSignal};

/// Identifier of a tracked resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(u64);

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Discriminant of [`Resource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    /// Signal watcher.
    Signal,
    /// Listener or connection.
    Tcp,
    /// Repeating timer.
    Timer,
    /// Wake handle.
    Async,
}

/// Every kind of handle the reactor can hold.
pub enum Resource {
    /// Signal watcher.
    Signal(SignalWatcher),
    /// Listener (no payload) or accepted connection (with payload).
    Tcp(TcpResource),
    /// Repeating timer.
    Timer(TimerResource),
    /// Cross-callback wake handle.
    Async(AsyncResource),
}

/// Task forwarding one signal to its callback.
pub struct SignalWatcher {
    signal: ShutdownSignal,
    task: JoinHandle<()>,
}

/// Listener or connection task, with optional session state.
pub struct TcpResource {
    task: JoinHandle<()>,
    payload: Option<Box<dyn Any>>,
}

/// Repeating timer task.
pub struct TimerResource {
    task: JoinHandle<()>,
    active: Rc<Cell<bool>>,
}

/// Task running a callback after each wake.
pub struct AsyncResource {
    task: JoinHandle<()>,
    callback: Rc<RefCell<Box<dyn FnMut()>>>,
}

type CloseCallback = Box<dyn FnOnce()>;

/// A resource whose task was aborted and whose close callback is pending.
pub(super) struct PendingClose {
    kind: ResourceKind,
    task: JoinHandle<()>,
    callback: Option<CloseCallback>,
}

impl PendingClose {
    fn new(kind: ResourceKind, task: JoinHandle<()>, callback: Option<CloseCallback>) -> Self {
        task.abort();
        Self {
            kind,
            task,
            callback,
        }
    }

    pub(super) async fn finish(self) {
        if let Err(error) = self.task.await
            && !error.is_cancelled()
        {
            warn!(
                target: REACTOR_TARGET,
                kind = ?self.kind,
                error = %error,
                "reactor task failed before close"
            );
        }
        if let Some(callback) = self.callback {
            callback();
        }
    }
}

impl Resource {
    /// Discriminant of this resource.
    #[must_use]
    pub const fn kind(&self) -> ResourceKind {
        match self {
            Self::Signal(_) => ResourceKind::Signal,
            Self::Tcp(_) => ResourceKind::Tcp,
            Self::Timer(_) => ResourceKind::Timer,
            Self::Async(_) => ResourceKind::Async,
        }
    }

    fn close(self) -> PendingClose {
        match self {
            Self::Signal(watcher) => {
                trace!(target: REACTOR_TARGET, signal = %watcher.signal, "closing signal watcher");
                PendingClose::new(ResourceKind::Signal, watcher.task, None)
            }
            Self::Tcp(TcpResource {
                task,
                payload: None,
            }) => PendingClose::new(ResourceKind::Tcp, task, None),
            Self::Tcp(TcpResource {
                task,
                payload: Some(payload),
            }) => PendingClose::new(ResourceKind::Tcp, task, Some(Box::new(move || drop(payload)))),
            Self::Timer(timer) => {
                timer.active.set(false);
                PendingClose::new(ResourceKind::Timer, timer.task, None)
            }
            Self::Async(handle) => {
                let callback = handle.callback;
                PendingClose::new(
                    ResourceKind::Async,
                    handle.task,
                    Some(Box::new(move || drop(callback))),
                )
            }
        }
    }
}

/// Wakes an async resource; its callback runs on the next reactor turn.
/// Repeated wakes before the callback runs coalesce.
#[derive(Clone)]
pub struct WakeHandle {
    notify: Rc<Notify>,
    callback: Weak<RefCell<Box<dyn FnMut()>>>,
}

impl WakeHandle {
    /// Schedules the callback.
    pub fn wake(&self) {
        self.notify.notify_one();
    }

    /// Whether the resource has been closed and its callback freed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.callback.strong_count() == 0
    }
}

impl fmt::Debug for WakeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WakeHandle")
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Registry of live reactor resources.
///
/// Registration methods spawn onto the current `LocalSet` and must run inside
/// the reactor context.
#[derive(Default)]
pub struct ResourceTable {
    entries: RefCell<BTreeMap<ResourceId, Resource>>,
    next: Cell<u64>,
    pending: RefCell<Vec<PendingClose>>,
}

impl ResourceTable {
    fn reserve(&self) -> ResourceId {
        let id = self.next.get() + 1;
        self.next.set(id);
        ResourceId(id)
    }

    fn insert(&self, id: ResourceId, resource: Resource) {
        self.entries.borrow_mut().insert(id, resource);
    }

    pub(super) fn watch_signal(
        &self,
        signal: ShutdownSignal,
        on_signal: impl Fn(ShutdownSignal) + 'static,
    ) -> Result<ResourceId, ReactorError> {
        let mut stream = tokio::signal::unix::signal(signal.kind())
            .map_err(|source| ReactorError::Signal { signal, source })?;
        let task = tokio::task::spawn_local(async move {
            while stream.recv().await.is_some() {
                on_signal(signal);
            }
        });
        let id = self.reserve();
        self.insert(id, Resource::Signal(SignalWatcher { signal, task }));
        Ok(id)
    }

    pub(super) fn start_timer(&self, period: Duration, mut tick: impl FnMut() + 'static) -> ResourceId {
        let active = Rc::new(Cell::new(true));
        let running = Rc::clone(&active);
        let task = tokio::task::spawn_local(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if !running.get() {
                    break;
                }
                tick();
            }
        });
        let id = self.reserve();
        self.insert(id, Resource::Timer(TimerResource { task, active }));
        id
    }

    pub(super) fn add_async(&self, on_wake: impl FnMut() + 'static) -> WakeHandle {
        let notify = Rc::new(Notify::new());
        let boxed: Box<dyn FnMut()> = Box::new(on_wake);
        let callback = Rc::new(RefCell::new(boxed));
        let waiter = Rc::clone(&notify);
        let target = Rc::downgrade(&callback);
        let task = tokio::task::spawn_local(async move {
            loop {
                waiter.notified().await;
                let Some(live) = target.upgrade() else {
                    break;
                };
                let mut run = live.borrow_mut();
                (*run)();
            }
        });
        let handle = WakeHandle {
            notify,
            callback: Rc::downgrade(&callback),
        };
        let id = self.reserve();
        self.insert(id, Resource::Async(AsyncResource { task, callback }));
        handle
    }

    /// Tracks a TCP task. Listeners pass no payload; connections pass their
    /// session state, which is dropped when the task ends or is closed.
    ///
    /// Callable from inside reactor callbacks.
    pub fn spawn_tcp<F>(self: &Rc<Self>, payload: Option<Box<dyn Any>>, body: F) -> ResourceId
    where
        F: Future<Output = ()> + 'static,
    {
        let id = self.reserve();
        let table = Rc::clone(self);
        let task = tokio::task::spawn_local(async move {
            body.await;
            table.finished(id);
        });
        self.insert(id, Resource::Tcp(TcpResource { task, payload }));
        id
    }

    fn finished(&self, id: ResourceId) {
        let resource = self.entries.borrow_mut().remove(&id);
        if resource.is_some() {
            trace!(target: REACTOR_TARGET, %id, "resource finished");
        }
    }

    /// Closes one resource. Its callback runs at the next drain.
    pub fn close(&self, id: ResourceId) -> bool {
        let Some(resource) = self.entries.borrow_mut().remove(&id) else {
            return false;
        };
        let pending = resource.close();
        self.pending.borrow_mut().push(pending);
        true
    }

    /// Closes every tracked resource; returns how many were closed.
    pub(super) fn close_all(&self) -> usize {
        let entries = std::mem::take(&mut *self.entries.borrow_mut());
        let count = entries.len();
        let mut pending = self.pending.borrow_mut();
        for (id, resource) in entries {
            trace!(target: REACTOR_TARGET, %id, kind = ?resource.kind(), "closing resource");
            pending.push(resource.close());
        }
        count
    }

    pub(super) fn take_pending(&self) -> Vec<PendingClose> {
        std::mem::take(&mut *self.pending.borrow_mut())
    }

    /// Resources that are tracked or awaiting their close callback.
    #[must_use]
    pub fn live(&self) -> usize {
        self.entries.borrow().len() + self.pending.borrow().len()
    }

    /// Tracked resources of `kind`.
    #[must_use]
    pub fn count(&self, kind: ResourceKind) -> usize {
        self.entries
            .borrow()
            .values()
            .filter(|resource| resource.kind() == kind)
            .count()
    }
}

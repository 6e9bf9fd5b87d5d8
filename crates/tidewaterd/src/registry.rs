//! Reference-counted registry of loaded instances.
//!
//! The registry is the sole owner of every registered [`Instance`]. Other
//! components hold an [`InstanceHandle`] or an [`InstanceLease`]. State lives
//! behind `RefCell`/`Cell`, so the registry is shared through `Rc` on the
//! reactor thread only.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use tracing::{debug, warn};

use crate::instance::Instance;

pub(crate) const REGISTRY_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::registry");

/// Copyable identifier of a registered instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceHandle(u64);

impl fmt::Display for InstanceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

struct Entry {
    handle: InstanceHandle,
    refs: usize,
    instance: Instance,
}

type ReleaseFn = Box<dyn Fn(Instance)>;

/// Ordered collection of registered instances with per-instance counts.
pub struct InstanceRegistry {
    entries: RefCell<Vec<Entry>>,
    next: Cell<u64>,
    release: ReleaseFn,
}

impl fmt::Debug for InstanceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceRegistry")
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

impl InstanceRegistry {
    /// Creates an empty registry. `release` destroys an instance once its
    /// count drops to zero, or at teardown.
    pub fn new(release: impl Fn(Instance) + 'static) -> Self {
        Self {
            entries: RefCell::new(Vec::new()),
            next: Cell::new(1),
            release: Box::new(release),
        }
    }

    /// Registers a fully loaded instance. The registry holds the initial
    /// reference.
    pub fn append(&self, instance: Instance) -> InstanceHandle {
        let handle = InstanceHandle(self.next.get());
        self.next.set(handle.0 + 1);
        debug!(
            target: REGISTRY_TARGET,
            instance = %instance.name(),
            %handle,
            "instance registered"
        );
        self.entries.borrow_mut().push(Entry {
            handle,
            refs: 1,
            instance,
        });
        handle
    }

    /// Adds a reference. Returns `false` when the handle is not registered.
    pub fn acquire(&self, handle: InstanceHandle) -> bool {
        let mut entries = self.entries.borrow_mut();
        match entries.iter_mut().find(|entry| entry.handle == handle) {
            Some(entry) => {
                entry.refs += 1;
                true
            }
            None => false,
        }
    }

    /// Adds a reference released automatically when the lease drops.
    pub fn lease(self: &Rc<Self>, handle: InstanceHandle) -> Option<InstanceLease> {
        self.acquire(handle).then(|| InstanceLease {
            registry: Rc::clone(self),
            handle,
        })
    }

    /// Drops a reference. When it was the last one the entry is removed and
    /// the release routine runs; returns whether that happened.
    ///
    /// The entry is unlinked before the routine runs, so the routine may
    /// call back into the registry.
    pub fn release(&self, handle: InstanceHandle) -> bool {
        let removed = {
            let mut entries = self.entries.borrow_mut();
            let Some(position) = entries.iter().position(|entry| entry.handle == handle) else {
                warn!(
                    target: REGISTRY_TARGET,
                    %handle,
                    "dangling release of unregistered instance ignored"
                );
                return false;
            };
            let Some(entry) = entries.get_mut(position) else {
                return false;
            };
            entry.refs = entry.refs.saturating_sub(1);
            if entry.refs > 0 {
                return false;
            }
            entries.remove(position)
        };
        debug!(
            target: REGISTRY_TARGET,
            instance = %removed.instance.name(),
            %handle,
            "last reference released"
        );
        (self.release)(removed.instance);
        true
    }

    /// Destroys every instance regardless of outstanding references and
    /// returns how many were destroyed.
    pub fn teardown_all(&self) -> usize {
        let drained: Vec<Entry> = self.entries.borrow_mut().drain(..).collect();
        let count = drained.len();
        for entry in drained {
            if entry.refs > 1 {
                warn!(
                    target: REGISTRY_TARGET,
                    instance = %entry.instance.name(),
                    outstanding = entry.refs - 1,
                    "tearing down instance with outstanding references"
                );
            }
            (self.release)(entry.instance);
        }
        count
    }

    /// Current count for `handle`, including the registry's own reference.
    #[must_use]
    pub fn ref_count(&self, handle: InstanceHandle) -> Option<usize> {
        self.entries
            .borrow()
            .iter()
            .find(|entry| entry.handle == handle)
            .map(|entry| entry.refs)
    }

    /// Number of registered instances.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    /// Whether no instance is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Handles in registration order.
    #[must_use]
    pub fn handles(&self) -> Vec<InstanceHandle> {
        self.entries.borrow().iter().map(|entry| entry.handle).collect()
    }

    /// Handle of the instance named `name`.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<InstanceHandle> {
        self.entries
            .borrow()
            .iter()
            .find(|entry| entry.instance.name() == name)
            .map(|entry| entry.handle)
    }

    /// Runs `f` with shared access to an instance. `f` must not call back
    /// into the registry.
    pub fn with_instance<R>(&self, handle: InstanceHandle, f: impl FnOnce(&Instance) -> R) -> Option<R> {
        let entries = self.entries.borrow();
        entries
            .iter()
            .find(|entry| entry.handle == handle)
            .map(|entry| f(&entry.instance))
    }

    /// Runs `f` with exclusive access to an instance. `f` must not call back
    /// into the registry.
    pub fn with_instance_mut<R>(
        &self,
        handle: InstanceHandle,
        f: impl FnOnce(&mut Instance) -> R,
    ) -> Option<R> {
        let mut entries = self.entries.borrow_mut();
        entries
            .iter_mut()
            .find(|entry| entry.handle == handle)
            .map(|entry| f(&mut entry.instance))
    }
}

/// Counted reference to a registered instance.
pub struct InstanceLease {
    registry: Rc<InstanceRegistry>,
    handle: InstanceHandle,
}

impl InstanceLease {
    /// Handle of the leased instance.
    #[must_use]
    pub const fn handle(&self) -> InstanceHandle {
        self.handle
    }

    /// Runs `f` with shared access to the leased instance. Returns `None`
    /// once the registry has been torn down.
    pub fn with<R>(&self, f: impl FnOnce(&Instance) -> R) -> Option<R> {
        self.registry.with_instance(self.handle, f)
    }
}

impl fmt::Debug for InstanceLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceLease")
            .field("handle", &self.handle)
            .finish()
    }
}

impl Drop for InstanceLease {
    fn drop(&mut self) {
        self.registry.release(self.handle);
    }
}

use std::cell::RefCell;
use std::fmt;
use std::net::SocketAddr;

use crate::registry::{InstanceHandle, InstanceLease};

use super::ListenerKind;

/// Per-connection state, tracked as the payload of the connection resource.
pub struct Session {
    kind: ListenerKind,
    peer: SocketAddr,
    lease: RefCell<Option<InstanceLease>>,
}

impl Session {
    /// Unbound session for a connection from `peer`.
    #[must_use]
    pub const fn new(kind: ListenerKind, peer: SocketAddr) -> Self {
        Self {
            kind,
            peer,
            lease: RefCell::new(None),
        }
    }

    /// Listener that accepted the connection.
    #[must_use]
    pub const fn kind(&self) -> ListenerKind {
        self.kind
    }

    /// Remote address.
    #[must_use]
    pub const fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Binds the session to an instance, releasing any previous binding.
    pub fn bind(&self, lease: InstanceLease) {
        let previous = self.lease.borrow_mut().replace(lease);
        drop(previous);
    }

    /// Instance the session is bound to.
    #[must_use]
    pub fn database(&self) -> Option<InstanceHandle> {
        self.lease.borrow().as_ref().map(InstanceLease::handle)
    }

    /// Runs `f` against the bound lease.
    pub fn with_lease<R>(&self, f: impl FnOnce(&InstanceLease) -> R) -> Option<R> {
        self.lease.borrow().as_ref().map(f)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("kind", &self.kind)
            .field("peer", &self.peer)
            .field("database", &self.database())
            .finish()
    }
}

//! TCP listeners registered on the reactor.

use std::any::Any;
use std::io;
use std::net::{SocketAddr, TcpListener as StdTcpListener, ToSocketAddrs};
use std::rc::Rc;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use tidewater_config::ListenAddress;

use super::{ConnectionHandler, LISTENER_TARGET, ListenerError, ListenerKind, Session};
use crate::reactor::{Reactor, ResourceTable};

const ERROR_BACKOFF: Duration = Duration::from_millis(150);

/// Binds `address` and registers its accept loop on the reactor as a TCP
/// resource without payload. Each accepted connection becomes a TCP resource
/// carrying its [`Session`].
///
/// Binding happens synchronously so failures surface before the reactor
/// runs. Returns the bound address.
///
/// # Errors
///
/// Returns [`ListenerError`] when resolving, binding or registering fails.
pub fn start_listener(
    reactor: &Reactor,
    kind: ListenerKind,
    address: &ListenAddress,
    handler: Rc<dyn ConnectionHandler>,
) -> Result<SocketAddr, ListenerError> {
    let socket = bind_tcp(&address.host, address.port)?;
    let addr = socket
        .local_addr()
        .map_err(|source| ListenerError::Register {
            addr: SocketAddr::from(([0, 0, 0, 0], address.port)),
            source,
        })?;
    socket
        .set_nonblocking(true)
        .map_err(|source| ListenerError::Register { addr, source })?;
    let resources = Rc::clone(reactor.resources());
    reactor.within(move || {
        let listener =
            TcpListener::from_std(socket).map_err(|source| ListenerError::Register { addr, source })?;
        let table = Rc::clone(&resources);
        resources.spawn_tcp(None, accept_loop(kind, listener, table, handler));
        Ok(addr)
    })
}

async fn accept_loop(
    kind: ListenerKind,
    listener: TcpListener,
    resources: Rc<ResourceTable>,
    handler: Rc<dyn ConnectionHandler>,
) {
    info!(
        target: LISTENER_TARGET,
        listener = %kind,
        "listener active"
    );
    let mut last_error = None::<io::ErrorKind>;
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                last_error = None;
                let session = Rc::new(Session::new(kind, peer));
                let payload: Box<dyn Any> = Box::new(Rc::clone(&session));
                let id = resources.spawn_tcp(Some(payload), handler.handle(stream, session));
                debug!(
                    target: LISTENER_TARGET,
                    listener = %kind,
                    %peer,
                    resource = %id,
                    "connection accepted"
                );
            }
            Err(error) => {
                let error_kind = error.kind();
                if last_error != Some(error_kind) {
                    warn!(
                        target: LISTENER_TARGET,
                        listener = %kind,
                        error = %error,
                        "accept error"
                    );
                }
                last_error = Some(error_kind);
                tokio::time::sleep(ERROR_BACKOFF).await;
            }
        }
    }
}

fn bind_tcp(host: &str, port: u16) -> Result<StdTcpListener, ListenerError> {
    let mut addrs = (host, port)
        .to_socket_addrs()
        .map_err(|source| ListenerError::Resolve {
            host: host.to_string(),
            port,
            source,
        })?;
    let addr = addrs.next().ok_or_else(|| ListenerError::ResolveEmpty {
        host: host.to_string(),
        port,
    })?;
    StdTcpListener::bind(addr).map_err(|source| ListenerError::Bind { addr, source })
}

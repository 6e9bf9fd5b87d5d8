//! Lifecycle controller owning the process-wide server context.

use std::cell::Cell;
use std::fmt;
use std::net::SocketAddr;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use tidewater_config::Config;

use super::errors::LaunchError;
use super::guard::PidLock;
use super::shutdown::{ShutdownReason, ShutdownTrigger};
use super::PROCESS_TARGET;
use crate::bootstrap::{self, BootstrapError};
use crate::health::LifecycleReporter;
use crate::loader::InstanceLoader;
use crate::query::{AggregateTable, Grammar, PropertyTable};
use crate::reactor::{Reactor, ShutdownSignal};
use crate::registry::InstanceRegistry;
use crate::storage::{HandleCache, StorageEngine};
use crate::tasks::{self, BackgroundTasks};
use crate::transport::{self, BackendHandler, ClientHandler, ConnectionHandler, ListenerKind};

/// Lifecycle phase of a [`Server`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Constructed; no context yet.
    Uninitialized,
    /// Context built; databases may be loaded.
    Bootstrapping,
    /// Reactor, listeners and periodic tasks are live.
    Running,
    /// The shutdown walk has run or is running.
    ShuttingDown,
    /// Context released. Final.
    Terminated,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Uninitialized => "uninitialized",
            Self::Bootstrapping => "bootstrapping",
            Self::Running => "running",
            Self::ShuttingDown => "shutting down",
            Self::Terminated => "terminated",
        })
    }
}

/// Process-wide state built by [`Server::initialise`] and released by
/// [`Server::terminate`].
pub struct ServerContext {
    grammar: Rc<Grammar>,
    properties: Rc<PropertyTable>,
    aggregates: Rc<AggregateTable>,
    registry: Rc<InstanceRegistry>,
    handles: Rc<HandleCache>,
    tasks: Rc<BackgroundTasks>,
    reactor: Option<Reactor>,
    trigger: Option<ShutdownTrigger>,
    lock: Option<PidLock>,
    client_addr: Option<SocketAddr>,
    backend_addr: Option<SocketAddr>,
}

impl ServerContext {
    fn new(max_open_files: usize) -> Self {
        let handles = Rc::new(HandleCache::new(max_open_files));
        let release_handles = Rc::clone(&handles);
        let registry = Rc::new(InstanceRegistry::new(move |instance| {
            instance.close(&release_handles);
        }));
        Self {
            grammar: Rc::new(Grammar::compile()),
            properties: Rc::new(PropertyTable::new()),
            aggregates: Rc::new(AggregateTable::new()),
            registry,
            handles,
            tasks: Rc::new(BackgroundTasks::new()),
            reactor: None,
            trigger: None,
            lock: None,
            client_addr: None,
            backend_addr: None,
        }
    }
}

/// Drives the server through
/// `Uninitialized → Bootstrapping → Running → ShuttingDown → Terminated`.
pub struct Server<E> {
    config: Config,
    engine: Rc<E>,
    reporter: Arc<dyn LifecycleReporter>,
    state: LifecycleState,
    context: Option<ServerContext>,
    bootstrapped: bool,
    shut_down: bool,
}

impl<E> Server<E> {
    /// Builds an uninitialised server over `engine`.
    #[must_use]
    pub fn new(config: Config, engine: E, reporter: Arc<dyn LifecycleReporter>) -> Self {
        Self {
            config,
            engine: Rc::new(engine),
            reporter,
            state: LifecycleState::Uninitialized,
            context: None,
            bootstrapped: false,
            shut_down: false,
        }
    }

    /// Current lifecycle phase.
    #[must_use]
    pub const fn state(&self) -> LifecycleState {
        self.state
    }

    /// Configuration the server was built with.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// The instance registry, until [`Server::terminate`].
    #[must_use]
    pub fn registry(&self) -> Option<&Rc<InstanceRegistry>> {
        self.context.as_ref().map(|context| &context.registry)
    }

    /// The shard file handle cache, until [`Server::terminate`].
    #[must_use]
    pub fn handle_cache(&self) -> Option<&Rc<HandleCache>> {
        self.context.as_ref().map(|context| &context.handles)
    }

    /// The periodic optimize and heartbeat tasks.
    #[must_use]
    pub fn tasks(&self) -> Option<&Rc<BackgroundTasks>> {
        self.context.as_ref().map(|context| &context.tasks)
    }

    /// The reactor, once [`Server::start`] has created it.
    #[must_use]
    pub fn reactor(&self) -> Option<&Reactor> {
        self.context.as_ref()?.reactor.as_ref()
    }

    /// Handle that starts the shutdown sequence from inside the reactor.
    #[must_use]
    pub fn shutdown_trigger(&self) -> Option<ShutdownTrigger> {
        self.context.as_ref()?.trigger.clone()
    }

    /// Bound address of the client listener.
    #[must_use]
    pub fn client_addr(&self) -> Option<SocketAddr> {
        self.context.as_ref()?.client_addr
    }

    /// Bound address of the inter-node listener.
    #[must_use]
    pub fn backend_addr(&self) -> Option<SocketAddr> {
        self.context.as_ref()?.backend_addr
    }

    /// Live reactor handles; zero when no reactor exists.
    #[must_use]
    pub fn live_handles(&self) -> usize {
        self.reactor().map_or(0, Reactor::live_handles)
    }

    /// Builds the grammar, the query tables, the registry and the handle
    /// cache.
    ///
    /// # Errors
    ///
    /// Returns [`LaunchError::InvalidState`] unless the server is
    /// uninitialised.
    pub fn initialise(&mut self) -> Result<(), LaunchError> {
        self.expect_state("initialise", LifecycleState::Uninitialized)?;
        self.context = Some(ServerContext::new(self.config.max_open_files()));
        self.state = LifecycleState::Bootstrapping;
        debug!(target: PROCESS_TARGET, "server context initialised");
        Ok(())
    }

    /// Cancels the periodic tasks, stops the reactor, closes every resource
    /// and drains close callbacks. Returns the number of resources drained.
    /// Later calls are no-ops.
    pub fn shutdown(&mut self) -> usize {
        self.shutdown_with(ShutdownReason::Requested)
    }

    fn shutdown_with(&mut self, reason: ShutdownReason) -> usize {
        if self.shut_down || self.state == LifecycleState::Terminated {
            debug!(target: PROCESS_TARGET, "shutdown already completed");
            return 0;
        }
        self.shut_down = true;
        self.state = LifecycleState::ShuttingDown;
        let Some(context) = self.context.as_ref() else {
            return 0;
        };
        let Some(reactor) = context.reactor.as_ref() else {
            return 0;
        };
        if !reactor.stop_handle().is_requested() {
            self.reporter.shutdown_requested(reason);
        }
        context.tasks.cancel_all(reactor.resources());
        reactor.stop();
        let closed = reactor.close_all();
        let drained = reactor.drain();
        debug!(target: PROCESS_TARGET, closed, drained, "resource walk finished");
        self.reporter.shutdown_completed(drained);
        drained
    }

    /// Releases the reactor, tears down the registry and drops the tables
    /// and the handle cache. Safe in any state; later calls are no-ops.
    pub fn terminate(&mut self) {
        if self.state == LifecycleState::Terminated {
            return;
        }
        if self.reactor().is_some() && !self.shut_down {
            self.shutdown_with(ShutdownReason::Requested);
        }
        self.state = LifecycleState::Terminated;
        let Some(mut context) = self.context.take() else {
            return;
        };
        if let Some(reactor) = context.reactor.take()
            && let Err(error) = reactor.close()
        {
            warn!(target: PROCESS_TARGET, error = %error, "reactor released with open handles");
        }
        context.trigger = None;
        let destroyed = context.registry.teardown_all();
        drop(context.lock.take());
        let ServerContext {
            grammar,
            properties,
            aggregates,
            registry,
            handles,
            ..
        } = context;
        drop((grammar, properties, aggregates));
        drop(registry);
        drop(handles);
        info!(target: PROCESS_TARGET, destroyed, "server terminated");
    }

    fn expect_state(&self, operation: &'static str, expected: LifecycleState) -> Result<(), LaunchError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(LaunchError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    fn context(&self, operation: &'static str) -> Result<&ServerContext, LaunchError> {
        self.context.as_ref().ok_or(LaunchError::InvalidState {
            operation,
            state: self.state,
        })
    }
}

impl<E> Server<E>
where
    E: StorageEngine + 'static,
{
    /// Locks the database directory and loads every instance. On failure
    /// the server is terminated and the reactor is never created.
    ///
    /// # Errors
    ///
    /// Returns [`LaunchError::Bootstrap`] when the container, the PID lock
    /// or an instance load fails, and [`LaunchError::InvalidState`] when
    /// called out of order.
    pub fn bootstrap(&mut self) -> Result<usize, LaunchError> {
        self.expect_state("bootstrap", LifecycleState::Bootstrapping)?;
        if self.bootstrapped {
            return Err(LaunchError::InvalidState {
                operation: "bootstrap twice",
                state: self.state,
            });
        }
        match self.load_databases() {
            Ok(loaded) => {
                self.bootstrapped = true;
                Ok(loaded)
            }
            Err(error) => {
                self.terminate();
                Err(error)
            }
        }
    }

    fn load_databases(&mut self) -> Result<usize, LaunchError> {
        let base = self.config.db_path().as_std_path();
        let context = self.context("bootstrap")?;
        let loader = InstanceLoader::new(&*self.engine, &context.handles);
        let (lock, loaded) = bootstrap::load_guarded(
            base,
            &loader,
            &context.registry,
            &*self.reporter,
            |container| PidLock::acquire(container).map_err(|source| BootstrapError::Lock { source }),
        )
        .map_err(|source| LaunchError::Bootstrap { source })?;
        if let Some(held) = self.context.as_mut() {
            held.lock = Some(lock);
        }
        Ok(loaded)
    }

    /// Creates the reactor, watches the shutdown signals, binds the backend
    /// then the client listener and schedules the periodic tasks.
    ///
    /// A listener failure runs the shutdown sequence before returning. A
    /// failure while watching signals also walks whatever was registered.
    ///
    /// # Errors
    ///
    /// Returns [`LaunchError::Reactor`], [`LaunchError::Listener`] or
    /// [`LaunchError::InvalidState`].
    pub fn start(&mut self) -> Result<(), LaunchError> {
        self.expect_state("start", LifecycleState::Bootstrapping)?;
        if !self.bootstrapped {
            return Err(LaunchError::InvalidState {
                operation: "start before bootstrap",
                state: self.state,
            });
        }
        let reactor = Reactor::new().map_err(|source| LaunchError::Reactor { source })?;
        if let Some(context) = self.context.as_mut() {
            context.reactor = Some(reactor);
        }
        match self.install_shutdown_path() {
            Ok(trigger) => {
                if let Some(context) = self.context.as_mut() {
                    context.trigger = Some(trigger);
                }
            }
            Err(error) => {
                warn!(target: PROCESS_TARGET, error = %error, "signal setup failed; shutting down");
                self.shutdown_with(ShutdownReason::Requested);
                return Err(error);
            }
        }

        for kind in [ListenerKind::Backend, ListenerKind::Client] {
            if let Err(source) = self.start_listener(kind) {
                warn!(
                    target: PROCESS_TARGET,
                    listener = %kind,
                    error = %source,
                    "listener failed; shutting down"
                );
                self.shutdown_with(ShutdownReason::ListenerFailure);
                return Err(LaunchError::Listener { kind, source });
            }
        }

        self.start_tasks()?;
        self.state = LifecycleState::Running;
        Ok(())
    }

    fn install_shutdown_path(&self) -> Result<ShutdownTrigger, LaunchError> {
        let context = self.context("start")?;
        let reactor = context.reactor.as_ref().ok_or(LaunchError::InvalidState {
            operation: "install shutdown path",
            state: self.state,
        })?;
        let reason = Rc::new(Cell::new(None));
        let pending = Rc::clone(&reason);
        let stop = reactor.stop_handle();
        let background = Rc::clone(&context.tasks);
        let resources = Rc::downgrade(reactor.resources());
        let reporter = Arc::clone(&self.reporter);
        let wake = reactor.add_async(move || {
            if stop.is_requested() {
                debug!(target: PROCESS_TARGET, "stop already requested");
                return;
            }
            reporter.shutdown_requested(pending.get().unwrap_or(ShutdownReason::Requested));
            if let Some(table) = resources.upgrade() {
                background.cancel_all(&table);
            }
            stop.request();
        });
        let trigger = ShutdownTrigger::new(reason, wake);
        for signal in ShutdownSignal::ALL {
            let watcher_trigger = trigger.clone();
            reactor
                .watch_signal(signal, move |received| {
                    watcher_trigger.fire(ShutdownReason::Signal(received));
                })
                .map_err(|source| LaunchError::Reactor { source })?;
        }
        Ok(trigger)
    }

    fn start_listener(&mut self, kind: ListenerKind) -> Result<(), transport::ListenerError> {
        let Some(context) = self.context.as_mut() else {
            return Ok(());
        };
        let Some(reactor) = context.reactor.as_ref() else {
            return Ok(());
        };
        let (address, handler) = match kind {
            ListenerKind::Backend => {
                let handler: Rc<dyn ConnectionHandler> = Rc::new(BackendHandler);
                (self.config.backend_listen(), handler)
            }
            ListenerKind::Client => {
                let handler: Rc<dyn ConnectionHandler> = Rc::new(ClientHandler::new(
                    Rc::clone(&context.registry),
                    Rc::clone(&context.grammar),
                    Rc::clone(&context.properties),
                ));
                (self.config.client_listen(), handler)
            }
        };
        let addr = transport::start_listener(reactor, kind, address, handler)?;
        match kind {
            ListenerKind::Backend => context.backend_addr = Some(addr),
            ListenerKind::Client => context.client_addr = Some(addr),
        }
        self.reporter.listener_bound(kind, addr);
        Ok(())
    }

    fn start_tasks(&self) -> Result<(), LaunchError> {
        let context = self.context("start")?;
        let Some(reactor) = context.reactor.as_ref() else {
            return Ok(());
        };

        let optimized = Rc::clone(&context.registry);
        let engine = Rc::clone(&self.engine);
        let aggregates = Rc::clone(&context.aggregates);
        context.tasks.optimize.start(
            reactor,
            Duration::from_secs(self.config.optimize_interval_secs()),
            move || tasks::optimize_pass(&optimized, &*engine, &aggregates),
        );

        let beating = Rc::clone(&context.registry);
        let resources = Rc::downgrade(reactor.resources());
        context.tasks.heartbeat.start(
            reactor,
            Duration::from_secs(self.config.heartbeat_interval_secs()),
            move || {
                if let Some(table) = resources.upgrade() {
                    tasks::heartbeat_pass(&beating, &table);
                }
            },
        );
        Ok(())
    }

    /// Blocks in the reactor until a stop is requested, then runs the
    /// shutdown sequence.
    ///
    /// # Errors
    ///
    /// Returns [`LaunchError::InvalidState`] unless the server is running.
    pub fn run(&mut self) -> Result<(), LaunchError> {
        self.expect_state("run", LifecycleState::Running)?;
        let Some(reactor) = self.reactor() else {
            return Err(LaunchError::InvalidState {
                operation: "run",
                state: self.state,
            });
        };
        self.reporter.reactor_running(reactor.live_handles());
        reactor.run();
        self.shutdown_with(ShutdownReason::Requested);
        Ok(())
    }
}

impl<E> Drop for Server<E> {
    fn drop(&mut self) {
        self.terminate();
    }
}

impl<E> fmt::Debug for Server<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("state", &self.state)
            .field("live_handles", &self.live_handles())
            .finish_non_exhaustive()
    }
}

/// Runs a server to completion: initialise, bootstrap, start, run and
/// terminate.
///
/// # Errors
///
/// Returns the first [`LaunchError`] raised by a lifecycle step. The server
/// is terminated on every path.
pub fn serve<E>(config: Config, engine: E, reporter: Arc<dyn LifecycleReporter>) -> Result<(), LaunchError>
where
    E: StorageEngine + 'static,
{
    let mut server = Server::new(config, engine, reporter);
    server.initialise()?;
    server.bootstrap()?;
    server.start()?;
    server.run()?;
    server.terminate();
    Ok(())
}

//! Server core of the Tidewater time-series database.
//!
//! Startup discovers database instances under the configured container
//! directory, loads each through a fixed pipeline (configuration, identity
//! metadata, users, servers, series, write buffer, shards) and registers it
//! in a reference-counted [`InstanceRegistry`]. The [`Server`] controller
//! then runs a single-threaded reactor serving the client and inter-node
//! listeners plus the periodic optimize and heartbeat tasks.
//!
//! SIGINT, SIGTERM and SIGQUIT start the shutdown sequence: periodic tasks
//! are cancelled, the reactor stops, every reactor resource is closed
//! through an exhaustive walk and close callbacks are drained before the
//! registry is torn down.

pub mod bootstrap;
pub mod health;
pub mod instance;
pub mod loader;
pub mod process;
pub mod query;
pub mod reactor;
pub mod registry;
pub mod storage;
pub mod tasks;
pub mod telemetry;
pub mod transport;

pub use bootstrap::{BootstrapError, load_all};
pub use health::{LifecycleReporter, SkipReason, StructuredLifecycleReporter};
pub use instance::Instance;
pub use loader::{InstanceLoader, LoadError};
pub use process::{
    LaunchError, LifecycleState, Server, ShutdownReason, ShutdownTrigger, run, run_server, serve,
};
pub use reactor::{Reactor, ReactorError, ShutdownSignal, StopHandle};
pub use registry::{InstanceHandle, InstanceLease, InstanceRegistry};
pub use storage::{DiskEngine, HandleCache, StorageEngine, StorageError};
pub use telemetry::{TelemetryError, TelemetryHandle};

#[cfg(test)]
mod tests;

//! Storage collaborators consumed by the loader and the periodic tasks.
//!
//! The server core only knows the [`StorageEngine`] seam; [`DiskEngine`] is
//! the default implementation shipped with the binary.

mod disk;
mod handles;

use crate::instance::{Instance, Pools, Series};

pub use disk::{
    BUFFER_FILE, DiskEngine, SERIES_FILE, SERVERS_FILE, SHARD_EXTENSION, SHARDS_DIR, USERS_FILE,
};
pub use handles::HandleCache;

pub(crate) const STORAGE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::storage");

/// Failure reported by a storage collaborator.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct StorageError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl StorageError {
    /// Builds an error without an underlying source.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Builds an error that wraps an underlying source.
    #[must_use]
    pub fn with_source(
        message: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Human-readable message describing the failure.
    #[must_use]
    pub fn message(&self) -> &str {
        self.message.as_str()
    }
}

/// Loads and maintains the derived state of an instance.
///
/// The loader calls the fallible stages in declaration order and stops at the
/// first error. Implementations populate the instance through its setters.
#[cfg_attr(test, mockall::automock)]
pub trait StorageEngine {
    /// Loads the user list.
    fn load_users(&self, instance: &mut Instance) -> Result<(), StorageError>;

    /// Loads the cluster server list.
    fn load_servers(&self, instance: &mut Instance) -> Result<(), StorageError>;

    /// Loads the series index.
    fn load_series(&self, instance: &mut Instance) -> Result<(), StorageError>;

    /// Loads the write buffer descriptor.
    fn load_buffer(&self, instance: &mut Instance) -> Result<(), StorageError>;

    /// Opens the write buffer for appending.
    fn open_buffer(&self, instance: &mut Instance) -> Result<(), StorageError>;

    /// Discovers shard files, accessing them through `handles`.
    fn load_shards(&self, instance: &mut Instance, handles: &HandleCache)
    -> Result<(), StorageError>;

    /// Derives the pool topology from the server list.
    fn generate_pools(&self, instance: &mut Instance);

    /// Refreshes derived properties of one series.
    fn update_series_properties(&self, series: &mut Series, pools: &Pools);

    /// Periodic maintenance pass over a registered instance.
    fn optimize(&self, instance: &mut Instance) -> Result<(), StorageError>;
}

//! Database instance model.
//!
//! An [`Instance`] is assembled only by the loader. Once registered, the
//! registry owns it and everything else refers to it through a handle or a
//! lease.

mod conf;
mod metadata;
mod model;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::storage::HandleCache;

pub use conf::{CONF_FILE, ConfError, DatabaseConf};
pub use metadata::{
    DatabaseMetadata, METADATA_FILE, METADATA_SCHEMA, MetadataError, TimePrecision,
};
pub use model::{Buffer, Pools, Series, SeriesKind, ServerEntry, Shard, User};

pub(crate) const INSTANCE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::instance");

/// One database living in its own directory under the container.
#[derive(Debug)]
pub struct Instance {
    name: String,
    dbpath: PathBuf,
    buffer_path: PathBuf,
    metadata: DatabaseMetadata,
    users: Vec<User>,
    servers: Vec<ServerEntry>,
    series: BTreeMap<u32, Series>,
    buffer: Option<Buffer>,
    shards: Vec<Shard>,
    pools: Pools,
    start_ts: Option<u64>,
}

impl Instance {
    /// Instance with identity set and no derived state.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        dbpath: PathBuf,
        buffer_path: PathBuf,
        metadata: DatabaseMetadata,
    ) -> Self {
        Self {
            name: name.into(),
            dbpath,
            buffer_path,
            metadata,
            users: Vec::new(),
            servers: Vec::new(),
            series: BTreeMap::new(),
            buffer: None,
            shards: Vec::new(),
            pools: Pools::default(),
            start_ts: None,
        }
    }

    /// Directory name the instance is registered under.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Instance directory, always ending in a path separator.
    #[must_use]
    pub fn dbpath(&self) -> &Path {
        &self.dbpath
    }

    /// Directory holding the write buffer.
    #[must_use]
    pub fn buffer_path(&self) -> &Path {
        &self.buffer_path
    }

    /// Identity metadata decoded from `database.dat`.
    #[must_use]
    pub const fn metadata(&self) -> &DatabaseMetadata {
        &self.metadata
    }

    /// Loaded user accounts.
    #[must_use]
    pub fn users(&self) -> &[User] {
        &self.users
    }

    /// Replaces the user accounts.
    pub fn set_users(&mut self, users: Vec<User>) {
        self.users = users;
    }

    /// Known cluster servers.
    #[must_use]
    pub fn servers(&self) -> &[ServerEntry] {
        &self.servers
    }

    /// Replaces the server list.
    pub fn set_servers(&mut self, servers: Vec<ServerEntry>) {
        self.servers = servers;
    }

    /// Series index keyed by id.
    #[must_use]
    pub const fn series(&self) -> &BTreeMap<u32, Series> {
        &self.series
    }

    /// Mutable series index.
    pub fn series_mut(&mut self) -> &mut BTreeMap<u32, Series> {
        &mut self.series
    }

    /// Series index together with the pool topology, for property updates
    /// that need both.
    pub fn series_and_pools(&mut self) -> (&mut BTreeMap<u32, Series>, &Pools) {
        (&mut self.series, &self.pools)
    }

    /// Open write buffer, once loaded.
    #[must_use]
    pub const fn buffer(&self) -> Option<&Buffer> {
        self.buffer.as_ref()
    }

    /// Mutable write buffer.
    pub fn buffer_mut(&mut self) -> Option<&mut Buffer> {
        self.buffer.as_mut()
    }

    /// Installs the opened write buffer.
    pub fn set_buffer(&mut self, buffer: Buffer) {
        self.buffer = Some(buffer);
    }

    /// Loaded shards.
    #[must_use]
    pub fn shards(&self) -> &[Shard] {
        &self.shards
    }

    /// Replaces the shard list.
    pub fn set_shards(&mut self, shards: Vec<Shard>) {
        self.shards = shards;
    }

    /// Pool topology.
    #[must_use]
    pub const fn pools(&self) -> &Pools {
        &self.pools
    }

    /// Replaces the pool topology.
    pub fn set_pools(&mut self, pools: Pools) {
        self.pools = pools;
    }

    /// Seconds since the Unix epoch at which loading completed.
    #[must_use]
    pub const fn start_ts(&self) -> Option<u64> {
        self.start_ts
    }

    /// Records the load completion time.
    pub fn stamp_start(&mut self, seconds: u64) {
        self.start_ts = Some(seconds);
    }

    /// Releases everything the instance holds: closes the buffer, evicts its
    /// shard handles from `handles` and frees the series index.
    pub fn close(mut self, handles: &HandleCache) {
        if let Some(buffer) = self.buffer.as_mut()
            && let Err(error) = buffer.close()
        {
            warn!(
                target: INSTANCE_TARGET,
                instance = %self.name,
                file = %buffer.path().display(),
                error = %error,
                "failed to flush buffer while closing instance"
            );
        }
        let evicted = handles.evict_under(&self.dbpath);
        let series = self.series.len();
        self.series.clear();
        debug!(
            target: INSTANCE_TARGET,
            instance = %self.name,
            evicted,
            series,
            "instance closed"
        );
    }
}

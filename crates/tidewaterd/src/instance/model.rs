//! Records owned by an instance: users, servers, series, buffer and shards.

use std::collections::BTreeMap;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Database user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Login name.
    pub name: String,
    /// Granted access keywords.
    #[serde(default)]
    pub access: Vec<String>,
}

/// Cluster member known to an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerEntry {
    /// Server name, unique within the cluster.
    pub name: String,
    /// Inter-node address.
    pub address: String,
    /// Inter-node port.
    pub port: u16,
    /// Pool the server belongs to.
    #[serde(default)]
    pub pool: u16,
    /// Whether this entry describes the running process.
    #[serde(default)]
    pub local: bool,
}

/// Value type stored by a series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeriesKind {
    /// Signed integers.
    Integer,
    /// Floating point numbers.
    Float,
    /// Strings.
    String,
}

/// Entry of the series index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Series {
    /// Numeric series id.
    pub id: u32,
    /// Series name.
    pub name: String,
    /// Value type.
    pub kind: SeriesKind,
    /// Number of stored points.
    #[serde(default)]
    pub length: u64,
    /// Pool responsible for the series; derived after load.
    #[serde(skip)]
    pub pool: u16,
}

/// Pool topology derived from the server list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pools {
    /// Pool of the local server.
    pub local_pool: u16,
    /// Server names per pool.
    pub members: BTreeMap<u16, Vec<String>>,
}

impl Pools {
    /// Number of pools, at least one.
    #[must_use]
    pub fn pool_count(&self) -> u16 {
        u16::try_from(self.members.len()).unwrap_or(u16::MAX).max(1)
    }
}

/// Write buffer: on-disk descriptor plus the append handle once opened.
#[derive(Debug)]
pub struct Buffer {
    path: PathBuf,
    size: u64,
    file: Option<File>,
}

impl Buffer {
    /// Descriptor for the buffer file at `path` holding `size` bytes.
    #[must_use]
    pub fn new(path: PathBuf, size: u64) -> Self {
        Self {
            path,
            size,
            file: None,
        }
    }

    /// Buffer file location.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size recorded when the descriptor was loaded.
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.size
    }

    /// Whether an append handle is held.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.file.is_some()
    }

    /// Installs the append handle.
    pub fn attach(&mut self, file: File) {
        self.file = Some(file);
    }

    /// Flushes the append handle to disk when one is held.
    ///
    /// # Errors
    ///
    /// Propagates the flush error of the append handle.
    pub fn sync(&self) -> io::Result<()> {
        match &self.file {
            Some(file) => file.sync_all(),
            None => Ok(()),
        }
    }

    /// Flushes and drops the append handle.
    ///
    /// # Errors
    ///
    /// Propagates the final flush error.
    pub fn close(&mut self) -> io::Result<()> {
        let result = self.sync();
        self.file = None;
        result
    }
}

/// Shard file known to an instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shard {
    /// Shard id parsed from the file name.
    pub id: u64,
    /// File location.
    pub path: PathBuf,
    /// File size when loaded.
    pub size: u64,
}

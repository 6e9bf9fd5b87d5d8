//! Builds one [`Instance`] from its directory through a strict pipeline.

use std::ffi::OsString;
use std::path::{MAIN_SEPARATOR, Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::instance::{
    CONF_FILE, ConfError, DatabaseConf, DatabaseMetadata, Instance, METADATA_FILE, MetadataError,
};
use crate::storage::{HandleCache, StorageEngine, StorageError};

pub(crate) const LOADER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::loader");

/// Errors raised while loading a single instance, one variant per stage.
#[derive(Debug, Error)]
pub enum LoadError {
    /// `database.conf` could not be read or parsed.
    #[error("invalid database configuration: {source}")]
    Config {
        /// Underlying configuration error.
        #[source]
        source: ConfError,
    },
    /// `database.dat` could not be read or decoded.
    #[error("invalid identity metadata '{path}': {source}")]
    Metadata {
        /// Metadata file.
        path: PathBuf,
        /// Underlying codec error.
        #[source]
        source: MetadataError,
    },
    /// The user list failed to load.
    #[error("cannot load users of '{name}': {source}")]
    Users {
        /// Instance name.
        name: String,
        /// Underlying storage error.
        #[source]
        source: StorageError,
    },
    /// The server list failed to load.
    #[error("cannot load servers of '{name}': {source}")]
    Servers {
        /// Instance name.
        name: String,
        /// Underlying storage error.
        #[source]
        source: StorageError,
    },
    /// The series definitions failed to load.
    #[error("cannot load series of '{name}': {source}")]
    Series {
        /// Instance name.
        name: String,
        /// Underlying storage error.
        #[source]
        source: StorageError,
    },
    /// The write buffer failed to load.
    #[error("cannot load buffer of '{name}': {source}")]
    BufferLoad {
        /// Instance name.
        name: String,
        /// Underlying storage error.
        #[source]
        source: StorageError,
    },
    /// The write buffer failed to open.
    #[error("cannot open buffer of '{name}': {source}")]
    BufferOpen {
        /// Instance name.
        name: String,
        /// Underlying storage error.
        #[source]
        source: StorageError,
    },
    /// The shard set failed to load.
    #[error("cannot load shards of '{name}': {source}")]
    Shards {
        /// Instance name.
        name: String,
        /// Underlying storage error.
        #[source]
        source: StorageError,
    },
}

/// Runs the load pipeline against a storage collaborator.
pub struct InstanceLoader<'a, E: ?Sized> {
    engine: &'a E,
    handles: &'a HandleCache,
}

impl<'a, E> InstanceLoader<'a, E>
where
    E: StorageEngine + ?Sized,
{
    /// Loader over `engine` that opens shard files through `handles`.
    #[must_use]
    pub const fn new(engine: &'a E, handles: &'a HandleCache) -> Self {
        Self { engine, handles }
    }

    /// Loads the instance rooted at `candidate`.
    ///
    /// Stages run in a fixed order and the first failure aborts the load.
    /// A failed load leaves nothing open: the partial instance is dropped and
    /// any shard handles opened for it are evicted.
    ///
    /// # Errors
    ///
    /// Returns the [`LoadError`] variant of the first failing stage.
    pub fn load_one(&self, candidate: &Path) -> Result<Instance, LoadError> {
        let conf = DatabaseConf::read(&candidate.join(CONF_FILE))
            .map_err(|source| LoadError::Config { source })?;

        let metadata_path = candidate.join(METADATA_FILE);
        let metadata =
            DatabaseMetadata::read(&metadata_path).map_err(|source| LoadError::Metadata {
                path: metadata_path.clone(),
                source,
            })?;

        let name = candidate
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| metadata.name.clone());
        if metadata.name != name {
            warn!(
                target: LOADER_TARGET,
                directory = %name,
                recorded = %metadata.name,
                "metadata name differs from directory; using directory name"
            );
        }

        let dbpath = with_trailing_separator(candidate);
        let buffer_path = conf.buffer_path().unwrap_or_else(|| dbpath.clone());
        let mut instance = Instance::new(name.clone(), dbpath, buffer_path, metadata);

        self.engine
            .load_users(&mut instance)
            .map_err(|source| LoadError::Users {
                name: name.clone(),
                source,
            })?;
        self.engine
            .load_servers(&mut instance)
            .map_err(|source| LoadError::Servers {
                name: name.clone(),
                source,
            })?;
        self.engine
            .load_series(&mut instance)
            .map_err(|source| LoadError::Series {
                name: name.clone(),
                source,
            })?;
        self.engine
            .load_buffer(&mut instance)
            .map_err(|source| LoadError::BufferLoad {
                name: name.clone(),
                source,
            })?;
        self.engine
            .open_buffer(&mut instance)
            .map_err(|source| LoadError::BufferOpen {
                name: name.clone(),
                source,
            })?;
        if let Err(source) = self.engine.load_shards(&mut instance, self.handles) {
            self.handles.evict_under(instance.dbpath());
            return Err(LoadError::Shards { name, source });
        }

        self.engine.generate_pools(&mut instance);

        info!(
            target: LOADER_TARGET,
            instance = %name,
            series = instance.series().len(),
            "updating series properties"
        );
        let (series, pools) = instance.series_and_pools();
        for entry in series.values_mut() {
            self.engine.update_series_properties(entry, pools);
        }

        instance.stamp_start(unix_seconds());
        debug!(
            target: LOADER_TARGET,
            instance = %name,
            dbpath = %instance.dbpath().display(),
            buffer_path = %instance.buffer_path().display(),
            shards = instance.shards().len(),
            "instance loaded"
        );
        Ok(instance)
    }
}

fn with_trailing_separator(path: &Path) -> PathBuf {
    let mut raw = OsString::from(path.as_os_str());
    if !raw.to_string_lossy().ends_with(MAIN_SEPARATOR) {
        raw.push(MAIN_SEPARATOR.to_string());
    }
    PathBuf::from(raw)
}

fn unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adds_missing_separator_once() {
        let with = with_trailing_separator(Path::new("/srv/db/"));
        let without = with_trailing_separator(Path::new("/srv/db"));
        assert_eq!(with.as_os_str(), "/srv/db/");
        assert_eq!(without.as_os_str(), "/srv/db/");
    }
}

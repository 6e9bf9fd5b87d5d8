//! Default on-disk storage collaborator.
//!
//! Users, servers and the series index live in JSON files inside the
//! instance directory. The write buffer is a single append-only file and
//! shards are `<id>.sdb` files under `shards/`.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io;
use std::path::Path;

use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use tidewater_config::DEFAULT_BACKEND_PORT;

use super::{HandleCache, STORAGE_TARGET, StorageEngine, StorageError};
use crate::instance::{Buffer, Instance, Pools, Series, ServerEntry, Shard, User};

/// User list inside the instance directory.
pub const USERS_FILE: &str = "users.json";
/// Server list inside the instance directory.
pub const SERVERS_FILE: &str = "servers.json";
/// Series index inside the instance directory.
pub const SERIES_FILE: &str = "series.json";
/// Write buffer inside the buffer directory.
pub const BUFFER_FILE: &str = "buffer.dat";
/// Shard directory inside the instance directory.
pub const SHARDS_DIR: &str = "shards";
/// Extension of shard files.
pub const SHARD_EXTENSION: &str = "sdb";

const DEFAULT_USER: &str = "admin";
const FULL_ACCESS: &str = "full";
const LOCAL_SERVER: &str = "localhost";

/// Storage collaborator reading the plain file layout described above.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiskEngine;

impl DiskEngine {
    /// Creates the engine.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl StorageEngine for DiskEngine {
    fn load_users(&self, instance: &mut Instance) -> Result<(), StorageError> {
        let users = read_json::<Vec<User>>(&instance.dbpath().join(USERS_FILE))?
            .unwrap_or_else(|| {
                vec![User {
                    name: DEFAULT_USER.to_owned(),
                    access: vec![FULL_ACCESS.to_owned()],
                }]
            });
        instance.set_users(users);
        Ok(())
    }

    fn load_servers(&self, instance: &mut Instance) -> Result<(), StorageError> {
        let servers = read_json::<Vec<ServerEntry>>(&instance.dbpath().join(SERVERS_FILE))?
            .unwrap_or_else(|| {
                vec![ServerEntry {
                    name: LOCAL_SERVER.to_owned(),
                    address: LOCAL_SERVER.to_owned(),
                    port: DEFAULT_BACKEND_PORT,
                    pool: 0,
                    local: true,
                }]
            });
        if servers.is_empty() {
            return Err(StorageError::new("server list is empty"));
        }
        instance.set_servers(servers);
        Ok(())
    }

    fn load_series(&self, instance: &mut Instance) -> Result<(), StorageError> {
        let entries =
            read_json::<Vec<Series>>(&instance.dbpath().join(SERIES_FILE))?.unwrap_or_default();
        let index = instance.series_mut();
        index.clear();
        for series in entries {
            let id = series.id;
            if index.insert(id, series).is_some() {
                return Err(StorageError::new(format!("duplicate series id {id}")));
            }
        }
        Ok(())
    }

    fn load_buffer(&self, instance: &mut Instance) -> Result<(), StorageError> {
        let dir = instance.buffer_path();
        if !dir.is_dir() {
            return Err(StorageError::new(format!(
                "buffer directory '{}' does not exist",
                dir.display()
            )));
        }
        let path = dir.join(BUFFER_FILE);
        let size = match fs::metadata(&path) {
            Ok(meta) => meta.len(),
            Err(error) if error.kind() == io::ErrorKind::NotFound => 0,
            Err(error) => {
                return Err(StorageError::with_source(
                    format!("cannot inspect '{}'", path.display()),
                    error,
                ));
            }
        };
        instance.set_buffer(Buffer::new(path, size));
        Ok(())
    }

    fn open_buffer(&self, instance: &mut Instance) -> Result<(), StorageError> {
        let buffer = instance
            .buffer_mut()
            .ok_or_else(|| StorageError::new("buffer descriptor not loaded"))?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(buffer.path())
            .map_err(|error| {
                StorageError::with_source(
                    format!("cannot open '{}'", buffer.path().display()),
                    error,
                )
            })?;
        buffer.attach(file);
        Ok(())
    }

    fn load_shards(
        &self,
        instance: &mut Instance,
        handles: &HandleCache,
    ) -> Result<(), StorageError> {
        let dir = instance.dbpath().join(SHARDS_DIR);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                instance.set_shards(Vec::new());
                return Ok(());
            }
            Err(error) => {
                return Err(StorageError::with_source(
                    format!("cannot list '{}'", dir.display()),
                    error,
                ));
            }
        };
        let mut shards = Vec::new();
        for item in entries {
            let entry = item.map_err(|error| {
                StorageError::with_source(format!("cannot list '{}'", dir.display()), error)
            })?;
            let path = entry.path();
            let Some(id) = shard_id(&path) else {
                warn!(
                    target: STORAGE_TARGET,
                    file = %path.display(),
                    "skipping unrecognised file in shard directory"
                );
                continue;
            };
            let size = handles
                .with_file(&path, |file| file.metadata().map(|meta| meta.len()))
                .map_err(|error| {
                    StorageError::with_source(format!("cannot open '{}'", path.display()), error)
                })?;
            shards.push(Shard { id, path, size });
        }
        shards.sort_by_key(|shard| shard.id);
        debug!(
            target: STORAGE_TARGET,
            instance = %instance.name(),
            shards = shards.len(),
            "shards loaded"
        );
        instance.set_shards(shards);
        Ok(())
    }

    fn generate_pools(&self, instance: &mut Instance) {
        let mut members: BTreeMap<u16, Vec<String>> = BTreeMap::new();
        let mut local_pool = 0;
        for server in instance.servers() {
            members
                .entry(server.pool)
                .or_default()
                .push(server.name.clone());
            if server.local {
                local_pool = server.pool;
            }
        }
        instance.set_pools(Pools {
            local_pool,
            members,
        });
    }

    fn update_series_properties(&self, series: &mut Series, pools: &Pools) {
        series.pool = fnv1a(series.name.as_bytes())
            .checked_rem(u64::from(pools.pool_count()))
            .and_then(|slot| usize::try_from(slot).ok())
            .and_then(|index| pools.members.keys().nth(index).copied())
            .unwrap_or(pools.local_pool);
    }

    fn optimize(&self, instance: &mut Instance) -> Result<(), StorageError> {
        match instance.buffer() {
            Some(buffer) => buffer.sync().map_err(|error| {
                StorageError::with_source(
                    format!("cannot sync '{}'", buffer.path().display()),
                    error,
                )
            }),
            None => Ok(()),
        }
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StorageError> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(error) => {
            return Err(StorageError::with_source(
                format!("cannot read '{}'", path.display()),
                error,
            ));
        }
    };
    serde_json::from_str(&text)
        .map(Some)
        .map_err(|error| StorageError::with_source(format!("invalid '{}'", path.display()), error))
}

fn shard_id(path: &Path) -> Option<u64> {
    if path.extension()? != SHARD_EXTENSION {
        return None;
    }
    path.file_stem()?.to_str()?.parse().ok()
}

fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    bytes.iter().fold(OFFSET, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(PRIME)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::{DatabaseMetadata, SeriesKind};
    use rstest::{fixture, rstest};
    use std::path::PathBuf;
    use tempfile::TempDir;

    #[fixture]
    fn workspace() -> (TempDir, Instance) {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().to_path_buf();
        let instance = Instance::new(
            "metrics",
            path.clone(),
            path,
            DatabaseMetadata::new("metrics"),
        );
        (dir, instance)
    }

    #[rstest]
    fn missing_user_file_yields_admin(workspace: (TempDir, Instance)) {
        let (_dir, mut instance) = workspace;
        DiskEngine.load_users(&mut instance).expect("load users");
        assert_eq!(instance.users().len(), 1);
        assert_eq!(instance.users()[0].name, DEFAULT_USER);
    }

    #[rstest]
    fn malformed_user_file_fails(workspace: (TempDir, Instance)) {
        let (dir, mut instance) = workspace;
        fs::write(dir.path().join(USERS_FILE), b"{not json").expect("write users");
        let error = DiskEngine
            .load_users(&mut instance)
            .expect_err("malformed users must fail");
        assert!(error.message().contains(USERS_FILE));
    }

    #[rstest]
    fn pools_follow_servers(workspace: (TempDir, Instance)) {
        let (dir, mut instance) = workspace;
        let servers = r#"[
            {"name": "a", "address": "10.0.0.1", "port": 9010, "pool": 0},
            {"name": "b", "address": "10.0.0.2", "port": 9010, "pool": 1, "local": true},
            {"name": "c", "address": "10.0.0.3", "port": 9010, "pool": 1}
        ]"#;
        fs::write(dir.path().join(SERVERS_FILE), servers).expect("write servers");
        DiskEngine.load_servers(&mut instance).expect("load servers");
        DiskEngine.generate_pools(&mut instance);

        let pools = instance.pools();
        assert_eq!(pools.local_pool, 1);
        assert_eq!(pools.pool_count(), 2);
        assert_eq!(pools.members[&1], vec!["b".to_owned(), "c".to_owned()]);
    }

    #[rstest]
    fn duplicate_series_ids_fail(workspace: (TempDir, Instance)) {
        let (dir, mut instance) = workspace;
        let series = r#"[
            {"id": 1, "name": "cpu", "kind": "float"},
            {"id": 1, "name": "mem", "kind": "integer"}
        ]"#;
        fs::write(dir.path().join(SERIES_FILE), series).expect("write series");
        let error = DiskEngine
            .load_series(&mut instance)
            .expect_err("duplicate ids must fail");
        assert!(error.message().contains("duplicate"));
    }

    #[test]
    fn series_pool_is_stable_and_in_range() {
        let pools = Pools {
            local_pool: 0,
            members: BTreeMap::from([(0, vec!["a".to_owned()]), (4, vec!["b".to_owned()])]),
        };
        let mut series = Series {
            id: 7,
            name: "cpu.load".to_owned(),
            kind: SeriesKind::Float,
            length: 0,
            pool: u16::MAX,
        };
        DiskEngine.update_series_properties(&mut series, &pools);
        let first = series.pool;
        DiskEngine.update_series_properties(&mut series, &pools);
        assert_eq!(series.pool, first);
        assert!(pools.members.contains_key(&first));
    }

    #[rstest]
    fn buffer_opens_for_append(workspace: (TempDir, Instance)) {
        let (dir, mut instance) = workspace;
        fs::write(dir.path().join(BUFFER_FILE), b"abc").expect("write buffer");
        DiskEngine.load_buffer(&mut instance).expect("load buffer");
        DiskEngine.open_buffer(&mut instance).expect("open buffer");
        let buffer = instance.buffer().expect("buffer descriptor");
        assert_eq!(buffer.size(), 3);
        assert!(buffer.is_open());
        DiskEngine.optimize(&mut instance).expect("optimize syncs buffer");
    }

    #[test]
    fn missing_buffer_directory_fails() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let mut instance = Instance::new(
            "metrics",
            dir.path().to_path_buf(),
            PathBuf::from("/nonexistent/tidewater/buffer/"),
            DatabaseMetadata::new("metrics"),
        );
        assert!(DiskEngine.load_buffer(&mut instance).is_err());
    }

    #[rstest]
    fn shards_are_sorted_and_cached(workspace: (TempDir, Instance)) {
        let (dir, mut instance) = workspace;
        let shards = dir.path().join(SHARDS_DIR);
        fs::create_dir(&shards).expect("create shard dir");
        fs::write(shards.join("20.sdb"), b"twenty").expect("write shard");
        fs::write(shards.join("3.sdb"), b"3").expect("write shard");
        fs::write(shards.join("notes.txt"), b"ignored").expect("write stray file");
        let handles = HandleCache::new(8);

        DiskEngine
            .load_shards(&mut instance, &handles)
            .expect("load shards");

        let ids: Vec<u64> = instance.shards().iter().map(|shard| shard.id).collect();
        assert_eq!(ids, vec![3, 20]);
        assert_eq!(instance.shards()[1].size, 6);
        assert_eq!(handles.len(), 2);
    }

    #[rstest]
    fn missing_shard_directory_is_empty(workspace: (TempDir, Instance)) {
        let (_dir, mut instance) = workspace;
        let handles = HandleCache::new(1);
        DiskEngine
            .load_shards(&mut instance, &handles)
            .expect("load shards");
        assert!(instance.shards().is_empty());
    }
}

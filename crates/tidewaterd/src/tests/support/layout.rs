//! Temporary database containers populated with instance directories.

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::instance::{CONF_FILE, DatabaseMetadata, METADATA_FILE};

/// A scratch container directory; removed when dropped.
pub struct DatabaseLayout {
    root: TempDir,
}

impl DatabaseLayout {
    pub fn new() -> Self {
        Self {
            root: TempDir::new().expect("create container directory"),
        }
    }

    /// The container directory.
    pub fn path(&self) -> &Path {
        self.root.path()
    }

    /// A loadable instance with an empty `database.conf`.
    pub fn add_instance(&self, name: &str) -> PathBuf {
        self.add_instance_with_conf(name, "")
    }

    /// A loadable instance with the given `database.conf` text.
    pub fn add_instance_with_conf(&self, name: &str, conf: &str) -> PathBuf {
        let dir = self.add_directory(name);
        fs::write(dir.join(CONF_FILE), conf).expect("write database.conf");
        DatabaseMetadata::new(name)
            .write(&dir.join(METADATA_FILE))
            .expect("write database.dat");
        dir
    }

    /// An instance whose metadata records a different name.
    pub fn add_renamed_instance(&self, dir_name: &str, recorded: &str) -> PathBuf {
        let dir = self.add_instance(dir_name);
        DatabaseMetadata::new(recorded)
            .write(&dir.join(METADATA_FILE))
            .expect("rewrite database.dat");
        dir
    }

    /// An instance whose metadata is cut short.
    pub fn add_corrupt_instance(&self, name: &str) -> PathBuf {
        let dir = self.add_instance(name);
        let path = dir.join(METADATA_FILE);
        let bytes = fs::read(&path).expect("read database.dat");
        let head = bytes.get(..2).expect("database.dat holds a schema byte and a record");
        fs::write(&path, head).expect("truncate database.dat");
        dir
    }

    /// A bare directory without `database.conf`.
    pub fn add_directory(&self, name: &str) -> PathBuf {
        let dir = self.root.path().join(name);
        fs::create_dir_all(&dir).expect("create instance directory");
        dir
    }

    /// A regular file directly in the container.
    pub fn add_file(&self, name: &str) -> PathBuf {
        let path = self.root.path().join(name);
        fs::write(&path, b"not a database").expect("write stray file");
        path
    }
}

//! Per-instance `database.conf`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use toml::{Table, Value};

/// File name of the per-instance configuration.
pub const CONF_FILE: &str = "database.conf";

const BUFFER_SECTION: &str = "buffer";
const BUFFER_PATH_KEY: &str = "buffer_path";

/// Parsed `database.conf`, kept as a raw table so unknown sections survive.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DatabaseConf {
    table: Table,
}

impl DatabaseConf {
    /// Reads and parses the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfError`] when the file is missing, unreadable or malformed.
    pub fn read(path: &Path) -> Result<Self, ConfError> {
        let text = fs::read_to_string(path).map_err(|source| ConfError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text).map_err(|source| ConfError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Parses configuration text.
    ///
    /// # Errors
    ///
    /// Returns the TOML error for malformed input.
    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str::<Table>(text).map(|table| Self { table })
    }

    /// Raw value stored under `[section] key`.
    #[must_use]
    pub fn option(&self, section: &str, key: &str) -> Option<&Value> {
        self.table.get(section)?.as_table()?.get(key)
    }

    /// Buffer location override. Only string values count; any other type
    /// is ignored.
    #[must_use]
    pub fn buffer_path(&self) -> Option<PathBuf> {
        match self.option(BUFFER_SECTION, BUFFER_PATH_KEY)? {
            Value::String(path) => Some(PathBuf::from(path)),
            _ => None,
        }
    }
}

/// Errors raised while reading `database.conf`.
#[derive(Debug, Error)]
pub enum ConfError {
    /// The file could not be read.
    #[error("cannot read '{path}': {source}")]
    Read {
        /// Configuration path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The file is not valid TOML.
    #[error("cannot parse '{path}': {source}")]
    Parse {
        /// Configuration path.
        path: PathBuf,
        /// Underlying TOML error.
        #[source]
        source: toml::de::Error,
    },
}

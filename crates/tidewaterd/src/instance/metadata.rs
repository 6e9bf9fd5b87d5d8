//! Codec for `database.dat`, the packed identity record of an instance.
//!
//! Layout: one schema byte followed by a postcard-encoded
//! [`DatabaseMetadata`]. The schema byte lets future layouts coexist with
//! old files; anything after the record is rejected.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// File name of the identity record inside an instance directory.
pub const METADATA_FILE: &str = "database.dat";

/// Schema marker written as the first byte of the record.
pub const METADATA_SCHEMA: u8 = 1;

/// Resolution of timestamps stored by an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimePrecision {
    /// Seconds.
    Seconds,
    /// Milliseconds.
    Milliseconds,
    /// Microseconds.
    Microseconds,
    /// Nanoseconds.
    Nanoseconds,
}

impl TimePrecision {
    /// Short unit label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Seconds => "s",
            Self::Milliseconds => "ms",
            Self::Microseconds => "us",
            Self::Nanoseconds => "ns",
        }
    }
}

/// Identity metadata of one database instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseMetadata {
    /// Database name as recorded at creation time.
    pub name: String,
    /// Timestamp resolution.
    pub time_precision: TimePrecision,
    /// Size in bytes of one write-buffer slot.
    pub buffer_size: u32,
    /// Time span covered by one shard, in seconds.
    pub shard_duration: u64,
    /// IANA timezone name used for calendar arithmetic.
    pub timezone: String,
    /// Percentage of series a single drop may remove without force.
    pub drop_threshold: u8,
}

impl DatabaseMetadata {
    /// Metadata with the defaults a freshly created database receives.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            time_precision: TimePrecision::Milliseconds,
            buffer_size: 1024,
            shard_duration: 604_800,
            timezone: "NAIVE".to_owned(),
            drop_threshold: 100,
        }
    }

    /// Serialises the record, schema byte first.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError::Encode`] when serialisation fails.
    pub fn encode(&self) -> Result<Vec<u8>, MetadataError> {
        let mut bytes = vec![METADATA_SCHEMA];
        let body = postcard::to_stdvec(self).map_err(MetadataError::Encode)?;
        bytes.extend_from_slice(&body);
        Ok(bytes)
    }

    /// Parses a record produced by [`DatabaseMetadata::encode`].
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError`] for an empty, unknown, truncated or overlong
    /// record.
    pub fn decode(bytes: &[u8]) -> Result<Self, MetadataError> {
        let (&schema, body) = bytes.split_first().ok_or(MetadataError::Empty)?;
        if schema != METADATA_SCHEMA {
            return Err(MetadataError::Schema { found: schema });
        }
        let (metadata, rest) =
            postcard::take_from_bytes::<Self>(body).map_err(MetadataError::Decode)?;
        if !rest.is_empty() {
            return Err(MetadataError::Trailing { bytes: rest.len() });
        }
        Ok(metadata)
    }

    /// Reads and decodes a record from disk.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError::Io`] when the file cannot be read, or a decode
    /// error.
    pub fn read(path: &Path) -> Result<Self, MetadataError> {
        let bytes = fs::read(path).map_err(|source| MetadataError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::decode(&bytes)
    }

    /// Encodes the record and writes it to disk.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError::Io`] when the file cannot be written.
    pub fn write(&self, path: &Path) -> Result<(), MetadataError> {
        let bytes = self.encode()?;
        fs::write(path, bytes).map_err(|source| MetadataError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Errors raised while reading or writing `database.dat`.
#[derive(Debug, Error)]
pub enum MetadataError {
    /// The file could not be read or written.
    #[error("cannot access '{path}': {source}")]
    Io {
        /// Record location.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The file holds no bytes at all.
    #[error("record is empty")]
    Empty,
    /// The schema marker is not one this build understands.
    #[error("unsupported schema marker {found}")]
    Schema {
        /// Marker found in the file.
        found: u8,
    },
    /// The record body is truncated or malformed.
    #[error("corrupt record: {0}")]
    Decode(#[source] postcard::Error),
    /// Bytes follow a complete record.
    #[error("{bytes} unexpected trailing bytes after record")]
    Trailing {
        /// Count of surplus bytes.
        bytes: usize,
    },
    /// The record could not be serialised.
    #[error("cannot encode record: {0}")]
    Encode(#[source] postcard::Error),
}

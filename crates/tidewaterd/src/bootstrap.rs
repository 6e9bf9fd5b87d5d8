//! Discovers instance directories under the container and loads them.

use std::fs::{self, DirBuilder};
use std::io;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::warn;

use crate::health::{LifecycleReporter, SkipReason};
use crate::instance::CONF_FILE;
use crate::loader::{InstanceLoader, LoadError};
use crate::process::GuardError;
use crate::registry::InstanceRegistry;
use crate::storage::StorageEngine;

pub(crate) const BOOTSTRAP_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::bootstrap");

const RESERVED_PREFIX: &[u8] = b"__";

/// Errors surfaced while bootstrapping the container directory.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// The container could not be created, inspected or listed.
    #[error("cannot use database directory '{path}': {source}")]
    Directory {
        /// Container path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// An instance failed to load; no further candidates were tried.
    #[error("cannot load database at '{path}': {source}")]
    Load {
        /// Candidate directory.
        path: PathBuf,
        /// Stage failure.
        #[source]
        source: LoadError,
    },
    /// Another server holds the container's PID lock.
    #[error("cannot lock database directory: {source}")]
    Lock {
        /// Underlying lock error.
        #[source]
        source: GuardError,
    },
}

/// Creates the container with mode `0o700` when it does not exist yet.
///
/// # Errors
///
/// Returns [`BootstrapError::Directory`] when `base` exists but is not a
/// directory, or cannot be inspected or created.
pub fn ensure_container(base: &Path) -> Result<(), BootstrapError> {
    let directory_error = |source| BootstrapError::Directory {
        path: base.to_path_buf(),
        source,
    };
    match fs::metadata(base) {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(directory_error(io::Error::new(
            io::ErrorKind::NotADirectory,
            "not a directory",
        ))),
        Err(error) if error.kind() == io::ErrorKind::NotFound => DirBuilder::new()
            .recursive(true)
            .mode(0o700)
            .create(base)
            .map_err(directory_error),
        Err(error) => Err(directory_error(error)),
    }
}

/// Loads every instance directory below `base` into `registry`.
///
/// Reserved names (`.`, `..`, `__*`), non-directories, unreadable entries
/// and directories without a readable `database.conf` are skipped. The
/// first failing load aborts the scan; instances registered before it stay
/// registered. Returns the number of instances loaded by this call.
///
/// # Errors
///
/// Returns the first [`BootstrapError`] from creating the container,
/// listing it or loading a candidate.
pub fn load_all<E>(
    base: &Path,
    loader: &InstanceLoader<'_, E>,
    registry: &InstanceRegistry,
    reporter: &dyn LifecycleReporter,
) -> Result<usize, BootstrapError>
where
    E: StorageEngine + ?Sized,
{
    load_guarded(base, loader, registry, reporter, |_| Ok(())).map(|((), loaded)| loaded)
}

/// Like [`load_all`], but runs `guard` once the container exists and before
/// any candidate is scanned. The guard's value is returned with the count.
///
/// Every failure, including one raised by `guard`, is reported through
/// [`LifecycleReporter::bootstrap_failed`] after
/// [`LifecycleReporter::bootstrap_starting`].
///
/// # Errors
///
/// Returns the first [`BootstrapError`] from the container, the guard or a
/// candidate load.
pub fn load_guarded<E, G, F>(
    base: &Path,
    loader: &InstanceLoader<'_, E>,
    registry: &InstanceRegistry,
    reporter: &dyn LifecycleReporter,
    guard: F,
) -> Result<(G, usize), BootstrapError>
where
    E: StorageEngine + ?Sized,
    F: FnOnce(&Path) -> Result<G, BootstrapError>,
{
    reporter.bootstrap_starting(base);
    let outcome = ensure_container(base).and_then(|()| {
        let held = guard(base)?;
        let loaded = scan(base, loader, registry, reporter)?;
        Ok((held, loaded))
    });
    match &outcome {
        Ok((_, loaded)) => reporter.bootstrap_succeeded(*loaded),
        Err(error) => reporter.bootstrap_failed(error),
    }
    outcome
}

fn scan<E>(
    base: &Path,
    loader: &InstanceLoader<'_, E>,
    registry: &InstanceRegistry,
    reporter: &dyn LifecycleReporter,
) -> Result<usize, BootstrapError>
where
    E: StorageEngine + ?Sized,
{
    let mut loaded = 0;
    for candidate in candidates(base, reporter)? {
        if fs::File::open(candidate.join(CONF_FILE)).is_err() {
            reporter.instance_skipped(&candidate, SkipReason::MissingConf);
            continue;
        }
        reporter.instance_loading(&candidate);
        let instance = loader
            .load_one(&candidate)
            .map_err(|source| BootstrapError::Load {
                path: candidate.clone(),
                source,
            })?;
        reporter.instance_loaded(instance.name(), &candidate);
        registry.append(instance);
        loaded += 1;
    }
    Ok(loaded)
}

fn candidates(base: &Path, reporter: &dyn LifecycleReporter) -> Result<Vec<PathBuf>, BootstrapError> {
    let entries = fs::read_dir(base).map_err(|source| BootstrapError::Directory {
        path: base.to_path_buf(),
        source,
    })?;
    let mut found = Vec::new();
    for item in entries {
        let entry = match item {
            Ok(entry) => entry,
            Err(error) => {
                warn!(
                    target: BOOTSTRAP_TARGET,
                    directory = %base.display(),
                    error = %error,
                    "skipping unreadable directory entry"
                );
                continue;
            }
        };
        let path = entry.path();
        if is_reserved(&entry.file_name()) {
            reporter.instance_skipped(&path, SkipReason::Reserved);
            continue;
        }
        match fs::metadata(&path) {
            Ok(meta) if meta.is_dir() => found.push(path),
            Ok(_) => reporter.instance_skipped(&path, SkipReason::NotDirectory),
            Err(_) => reporter.instance_skipped(&path, SkipReason::Unreadable),
        }
    }
    found.sort();
    Ok(found)
}

fn is_reserved(name: &std::ffi::OsStr) -> bool {
    name == "." || name == ".." || name.as_encoded_bytes().starts_with(RESERVED_PREFIX)
}

//! Bounded cache of open shard file handles shared by every instance.

use std::cell::RefCell;
use std::fs::{File, OpenOptions};
use std::io;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use lru::LruCache;
use tracing::trace;

use super::STORAGE_TARGET;

/// Least-recently-used cache of open files, capped at `max_open_files`.
///
/// Interior mutability keeps the cache usable through shared references from
/// any reactor callback. Closures passed to [`HandleCache::with_file`] must
/// not call back into the cache.
#[derive(Debug)]
pub struct HandleCache {
    handles: RefCell<LruCache<PathBuf, File>>,
}

impl HandleCache {
    /// Creates a cache holding at most `max_open_files` handles (minimum 1).
    #[must_use]
    pub fn new(max_open_files: usize) -> Self {
        let capacity = NonZeroUsize::new(max_open_files).unwrap_or(NonZeroUsize::MIN);
        Self {
            handles: RefCell::new(LruCache::new(capacity)),
        }
    }

    /// Runs `f` against the cached handle for `path`, opening it read-only
    /// first when absent. Opening may evict the least recently used handle.
    ///
    /// # Errors
    ///
    /// Returns the open error, or whatever `f` returns.
    pub fn with_file<R>(
        &self,
        path: &Path,
        f: impl FnOnce(&mut File) -> io::Result<R>,
    ) -> io::Result<R> {
        let mut handles = self.handles.borrow_mut();
        if let Some(file) = handles.get_mut(path) {
            return f(file);
        }
        let opened = OpenOptions::new().read(true).open(path)?;
        if let Some((evicted, _)) = handles.push(path.to_path_buf(), opened) {
            trace!(
                target: STORAGE_TARGET,
                file = %evicted.display(),
                "evicted file handle"
            );
        }
        match handles.get_mut(path) {
            Some(cached) => f(cached),
            None => Err(io::Error::other("handle vanished after insert")),
        }
    }

    /// Closes the handle for `path`. Returns whether one was held.
    pub fn evict(&self, path: &Path) -> bool {
        self.handles.borrow_mut().pop(path).is_some()
    }

    /// Closes every handle whose path lies under `prefix`.
    pub fn evict_under(&self, prefix: &Path) -> usize {
        let mut handles = self.handles.borrow_mut();
        let doomed: Vec<PathBuf> = handles
            .iter()
            .filter(|(path, _)| path.starts_with(prefix))
            .map(|(path, _)| path.clone())
            .collect();
        for path in &doomed {
            handles.pop(path);
        }
        doomed.len()
    }

    /// Whether a handle for `path` is held.
    #[must_use]
    pub fn contains(&self, path: &Path) -> bool {
        self.handles.borrow().contains(path)
    }

    /// Number of open handles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handles.borrow().len()
    }

    /// Whether no handle is open.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of open handles.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.handles.borrow().cap().get()
    }
}

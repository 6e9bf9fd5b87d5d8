use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use tracing::{info, warn};

use super::PROCESS_TARGET;
use super::errors::GuardError;

/// Lock file name inside the database directory. The `__` prefix keeps it
/// out of instance discovery.
pub const PID_FILE: &str = "__tidewaterd.pid";

/// Exclusive claim on a database directory, released on drop.
#[derive(Debug)]
pub struct PidLock {
    path: PathBuf,
}

impl PidLock {
    /// Claims `db_path` for the current process.
    ///
    /// A lock whose recorded process is alive refuses the claim; a stale
    /// lock is replaced.
    ///
    /// # Errors
    ///
    /// Returns [`GuardError`] when another live process holds the lock or the
    /// lock file cannot be written.
    pub fn acquire(db_path: &Path) -> Result<Self, GuardError> {
        let path = db_path.join(PID_FILE);
        match create_lock(&path) {
            Ok(()) => {}
            Err(GuardError::Create { source, .. }) if source.kind() == io::ErrorKind::AlreadyExists => {
                clear_stale(&path)?;
                create_lock(&path)?;
            }
            Err(error) => return Err(error),
        }
        info!(
            target: PROCESS_TARGET,
            file = %path.display(),
            pid = std::process::id(),
            "acquired database lock"
        );
        Ok(Self { path })
    }

    /// Location of the lock file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidLock {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Err(error) if error.kind() != io::ErrorKind::NotFound => {
                warn!(
                    target: PROCESS_TARGET,
                    file = %self.path.display(),
                    error = %error,
                    "failed to remove lock file"
                );
            }
            _ => {}
        }
    }
}

fn create_lock(path: &Path) -> Result<(), GuardError> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)
        .map_err(|source| GuardError::Create {
            path: path.to_path_buf(),
            source,
        })?;
    writeln!(file, "{}", std::process::id())
        .and_then(|()| file.sync_all())
        .map_err(|source| GuardError::PidWrite {
            path: path.to_path_buf(),
            source,
        })
}

fn clear_stale(path: &Path) -> Result<(), GuardError> {
    if let Some(pid) = read_pid(path) {
        if check_process(pid)? {
            info!(
                target: PROCESS_TARGET,
                pid,
                "refusing to start: existing server alive"
            );
            return Err(GuardError::AlreadyRunning { pid });
        }
        warn!(
            target: PROCESS_TARGET,
            pid,
            "existing server not detected; removing stale lock"
        );
    }
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(GuardError::Cleanup {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn read_pid(path: &Path) -> Option<u32> {
    let content = fs::read_to_string(path).ok()?;
    content.trim().parse::<u32>().ok().filter(|pid| *pid != 0)
}

fn check_process(pid: u32) -> Result<bool, GuardError> {
    let Ok(raw) = i32::try_from(pid) else {
        return Ok(false);
    };
    match kill(Pid::from_raw(raw), None) {
        Ok(()) | Err(Errno::EPERM) => Ok(true),
        Err(Errno::ESRCH) => Ok(false),
        Err(errno) => Err(GuardError::CheckProcess { pid, source: errno }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    #[test]
    fn writes_own_pid_and_removes_on_drop() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let lock = PidLock::acquire(dir.path()).expect("acquire lock");
        let content = fs::read_to_string(lock.path()).expect("read lock");
        assert_eq!(content.trim(), std::process::id().to_string());
        let mode = fs::metadata(lock.path()).expect("lock metadata").permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        let path = lock.path().to_path_buf();
        drop(lock);
        assert!(!path.exists());
    }

    #[test]
    fn live_holder_refuses_second_claim() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let _first = PidLock::acquire(dir.path()).expect("acquire lock");
        let error = PidLock::acquire(dir.path()).expect_err("second claim must fail");
        assert!(matches!(error, GuardError::AlreadyRunning { pid } if pid == std::process::id()));
    }

    #[test]
    fn stale_lock_is_replaced() {
        let dir = tempfile::tempdir().expect("create temp dir");
        fs::write(dir.path().join(PID_FILE), "not-a-pid\n").expect("write stale lock");
        let lock = PidLock::acquire(dir.path()).expect("replace stale lock");
        let content = fs::read_to_string(lock.path()).expect("read lock");
        assert_eq!(content.trim(), std::process::id().to_string());
    }
}

//! Exclusive-instance lock: advisory flock on a pid file, with stale-holder
//! reclaim.
//!
//! At most one live process holds the lock per host. Acquisition is
//! non-blocking: on contention the recorded pid is probed, a dead holder's
//! file is removed and acquisition retried exactly once, a live holder is
//! reported as "already running" and the caller must exit without side
//! effects.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};

use crate::core::errors::{Result, ScanError};
use crate::platform::process;

/// Exclusive ownership of the singleton right to run.
///
/// The advisory lock lives as long as the wrapped descriptor; the handle is
/// retained for the life of the daemon process.
pub struct InstanceLock {
    path: PathBuf,
    handle: Option<Flock<File>>,
}

impl std::fmt::Debug for InstanceLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceLock")
            .field("path", &self.path)
            .field("held", &self.handle.is_some())
            .finish()
    }
}

enum FlockAttempt {
    Acquired(Flock<File>),
    Contended,
}

impl InstanceLock {
    /// Acquire the lock at `path`, reclaiming it from a dead holder if
    /// necessary.
    pub fn acquire(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        match Self::try_flock(&path)? {
            FlockAttempt::Acquired(handle) => Self::finish(path, handle),
            FlockAttempt::Contended => match Self::read_holder_pid(&path) {
                Some(pid) if process::is_alive(pid) => Err(ScanError::AlreadyRunning { pid }),
                Some(_) => {
                    // Recorded holder is dead: the lock is stale. Remove
                    // and retry exactly once.
                    let _ = std::fs::remove_file(&path);
                    match Self::try_flock(&path)? {
                        FlockAttempt::Acquired(handle) => Self::finish(path, handle),
                        FlockAttempt::Contended => {
                            let pid = Self::read_holder_pid(&path).unwrap_or(0);
                            Err(ScanError::AlreadyRunning { pid })
                        }
                    }
                }
                // Contended but no readable pid: a holder exists and has
                // not recorded itself yet. Do not touch its file.
                None => Err(ScanError::Lock {
                    path,
                    details: "lock is held but the holder pid is not yet recorded".to_string(),
                }),
            },
        }
    }

    fn finish(path: PathBuf, mut handle: Flock<File>) -> Result<Self> {
        Self::write_pid(&mut handle).map_err(|source| ScanError::Lock {
            path: path.clone(),
            details: format!("failed to record pid: {source}"),
        })?;
        eprintln!(
            "[MODSCAN-LOCK] acquired {} (pid {})",
            path.display(),
            std::process::id()
        );
        Ok(Self {
            path,
            handle: Some(handle),
        })
    }

    fn try_flock(path: &Path) -> Result<FlockAttempt> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|source| ScanError::io(path, source))?;

        match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(handle) => Ok(FlockAttempt::Acquired(handle)),
            Err((_, Errno::EWOULDBLOCK)) => Ok(FlockAttempt::Contended),
            Err((_, errno)) => Err(ScanError::Lock {
                path: path.to_path_buf(),
                details: format!("flock failed: {errno}"),
            }),
        }
    }

    fn write_pid(handle: &mut Flock<File>) -> std::io::Result<()> {
        handle.set_len(0)?;
        handle.seek(SeekFrom::Start(0))?;
        write!(handle, "{}", std::process::id())?;
        handle.flush()
    }

    fn read_holder_pid(path: &Path) -> Option<i32> {
        let mut contents = String::new();
        File::open(path).ok()?.read_to_string(&mut contents).ok()?;
        contents.trim().parse().ok()
    }

    /// Path of the backing pid file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether this handle still holds the lock.
    #[must_use]
    pub fn is_held(&self) -> bool {
        self.handle.is_some()
    }

    /// Release the lock and remove the pid file.
    ///
    /// Idempotent and safe from an exit hook. The file is removed only while
    /// this process is the holder (the descriptor is dropped after the
    /// unlink, so no other process can have acquired it in between).
    pub fn release(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = std::fs::remove_file(&self.path);
            drop(handle);
            eprintln!("[MODSCAN-LOCK] released {}", self.path.display());
        }
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lock_path(dir: &tempfile::TempDir) -> PathBuf {
        dir.path().join("modscan.pid")
    }

    #[test]
    fn acquire_records_own_pid() {
        let dir = tempfile::tempdir().unwrap();
        let path = lock_path(&dir);
        let lock = InstanceLock::acquire(&path).unwrap();
        assert!(lock.is_held());
        let recorded = std::fs::read_to_string(&path).unwrap();
        assert_eq!(recorded.trim(), std::process::id().to_string());
    }

    #[test]
    fn second_acquire_fails_while_held() {
        let dir = tempfile::tempdir().unwrap();
        let path = lock_path(&dir);
        let _lock = InstanceLock::acquire(&path).unwrap();

        // flock is per open file description: a second descriptor in the
        // same process conflicts just like another process would.
        let err = InstanceLock::acquire(&path).unwrap_err();
        assert_eq!(err.code(), "MS-2001");
    }

    #[test]
    fn stale_file_with_dead_pid_is_reclaimed() {
        let dir = tempfile::tempdir().unwrap();
        let path = lock_path(&dir);
        // A pid file without a live flock holder and with a dead pid.
        std::fs::write(&path, "1073741808").unwrap();

        let lock = InstanceLock::acquire(&path).unwrap();
        assert!(lock.is_held());
        let recorded = std::fs::read_to_string(&path).unwrap();
        assert_eq!(recorded.trim(), std::process::id().to_string());
    }

    #[test]
    fn release_is_idempotent_and_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = lock_path(&dir);
        let mut lock = InstanceLock::acquire(&path).unwrap();
        lock.release();
        assert!(!lock.is_held());
        assert!(!path.exists());
        lock.release();
        assert!(!path.exists());
    }

    #[test]
    fn lock_is_reacquirable_after_release() {
        let dir = tempfile::tempdir().unwrap();
        let path = lock_path(&dir);
        let mut first = InstanceLock::acquire(&path).unwrap();
        first.release();
        let second = InstanceLock::acquire(&path).unwrap();
        assert!(second.is_held());
    }

    #[test]
    fn garbage_pid_file_without_holder_is_reclaimed() {
        let dir = tempfile::tempdir().unwrap();
        let path = lock_path(&dir);
        std::fs::write(&path, "not-a-pid").unwrap();
        let lock = InstanceLock::acquire(&path).unwrap();
        assert!(lock.is_held());
    }
}

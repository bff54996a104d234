//! Host-level exclusive lock guarding every database access.
//!
//! The lock is an OS advisory lock (`flock` on unix, `LockFileEx` on
//! Windows) held on `<data_dir>/db.lock` for the whole unit of work. Separate
//! open handles conflict with each other even inside one process, so threads
//! and processes are serialized the same way.

use crate::error::{Result, StoreError};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, warn};

#[cfg(unix)]
const DIR_MODE: u32 = 0o777;
#[cfg(unix)]
const LOCK_FILE_MODE: u32 = 0o666;

/// An acquired exclusive lock. Released by [`LockHandle::release`] or on drop.
#[derive(Debug)]
pub struct LockHandle {
    path: PathBuf,
    file: Option<File>,
}

impl LockHandle {
    /// Block until the exclusive lock on `path` is obtained.
    ///
    /// Creates the parent directory and the lock file when absent. There is
    /// no timeout: a holder that never releases blocks this call forever.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Lock`] if the directory or file cannot be
    /// created/opened, or the OS rejects the lock request.
    pub fn acquire(path: &Path) -> Result<Self> {
        let lock_err = |source| StoreError::Lock {
            path: path.to_path_buf(),
            source,
        };

        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            ensure_dir(dir).map_err(lock_err)?;
        }

        let existed = path.exists();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(lock_err)?;
        if !existed {
            set_permissive(path, false);
        }

        let started = Instant::now();
        file.lock().map_err(lock_err)?;
        debug!(
            path = %path.display(),
            waited_ms = started.elapsed().as_millis(),
            "Acquired database lock"
        );

        Ok(Self {
            path: path.to_path_buf(),
            file: Some(file),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub const fn is_held(&self) -> bool {
        self.file.is_some()
    }

    /// Unlock and close the lock file. Calling it again is a no-op.
    pub fn release(&mut self) {
        let Some(file) = self.file.take() else {
            return;
        };
        if let Err(err) = file.unlock() {
            // Closing the handle below drops the lock regardless.
            warn!(path = %self.path.display(), error = %err, "Lock release error");
        }
        drop(file);
        debug!(path = %self.path.display(), "Released database lock");
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        self.release();
    }
}

/// Create `dir` (and parents) if missing, with permissive access on unix.
pub(crate) fn ensure_dir(dir: &Path) -> std::io::Result<()> {
    if dir.is_dir() {
        return Ok(());
    }
    fs::create_dir_all(dir)?;
    set_permissive(dir, true);
    Ok(())
}

#[cfg(unix)]
fn set_permissive(path: &Path, is_dir: bool) {
    use std::os::unix::fs::PermissionsExt;

    let mode = if is_dir { DIR_MODE } else { LOCK_FILE_MODE };
    if let Err(err) = fs::set_permissions(path, fs::Permissions::from_mode(mode)) {
        debug!(path = %path.display(), error = %err, "Could not relax permissions");
    }
}

#[cfg(not(unix))]
fn set_permissive(_path: &Path, _is_dir: bool) {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn acquire_creates_directory_and_file() {
        let temp = TempDir::new().expect("tempdir");
        let path = temp.path().join("nested").join("db.lock");

        let lock = LockHandle::acquire(&path).expect("acquire");
        assert!(lock.is_held());
        assert!(path.is_file());
        assert_eq!(lock.path(), path);
    }

    #[cfg(unix)]
    #[test]
    fn new_lock_file_is_world_writable() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().expect("tempdir");
        let path = temp.path().join("db.lock");
        let _lock = LockHandle::acquire(&path).expect("acquire");
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, LOCK_FILE_MODE);
    }

    #[test]
    fn release_is_idempotent() {
        let temp = TempDir::new().expect("tempdir");
        let path = temp.path().join("db.lock");

        let mut lock = LockHandle::acquire(&path).expect("acquire");
        lock.release();
        assert!(!lock.is_held());
        lock.release();

        // The lock is free again.
        let again = LockHandle::acquire(&path).expect("reacquire");
        assert!(again.is_held());
    }

    #[test]
    fn second_acquire_blocks_until_release() {
        let temp = TempDir::new().expect("tempdir");
        let path = temp.path().join("db.lock");

        let mut holder = LockHandle::acquire(&path).expect("acquire");
        let acquired = Arc::new(AtomicBool::new(false));

        let waiter = {
            let path = path.clone();
            let acquired = Arc::clone(&acquired);
            thread::spawn(move || {
                let lock = LockHandle::acquire(&path).expect("waiter acquire");
                acquired.store(true, Ordering::SeqCst);
                drop(lock);
            })
        };

        thread::sleep(Duration::from_millis(200));
        assert!(!acquired.load(Ordering::SeqCst), "waiter must block");

        holder.release();
        waiter.join().expect("join waiter");
        assert!(acquired.load(Ordering::SeqCst));
    }

    #[test]
    fn drop_releases_lock() {
        let temp = TempDir::new().expect("tempdir");
        let path = temp.path().join("db.lock");

        {
            let _lock = LockHandle::acquire(&path).expect("acquire");
        }
        let file = File::open(&path).expect("open");
        assert!(file.try_lock().is_ok());
    }

    #[test]
    fn unusable_directory_is_lock_error() {
        let temp = TempDir::new().expect("tempdir");
        let blocker = temp.path().join("not_a_dir");
        fs::write(&blocker, b"file").expect("write");

        let err = LockHandle::acquire(&blocker.join("db.lock")).unwrap_err();
        assert!(matches!(err, StoreError::Lock { .. }));
    }
}

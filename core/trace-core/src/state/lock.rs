//! Named advisory locks shared by every hook process.
//!
//! Each name maps to one zero-byte file `locks/{name}.lock`. Locking uses `flock(2)`
//! on that file, so the lock belongs to the open file description: it is released when
//! the guard drops, when the file is closed, or when the holding process dies. A crashed
//! peer therefore never leaves a lock behind.
//!
//! # Lock domains
//!
//! - one per session id, serializing read-modify-write of `sessions/{id}.json`
//! - the literal `index`, serializing read-modify-write of `sessions/index.json`
//!
//! Callers never hold a session lock while acquiring the index lock (or the reverse).
//!
//! # Bounded wait
//!
//! Acquisition polls with `LOCK_NB` and jittered exponential backoff until the configured
//! timeout. A hook process must not hang because a sibling is stuck holding a lock.

use std::fs::{File, OpenOptions};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fs_err as fs;
use rand::Rng;

use crate::error::{Result, TraceError};
use crate::storage::StorageConfig;

pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

const INITIAL_BACKOFF: Duration = Duration::from_millis(1);
const MAX_BACKOFF: Duration = Duration::from_millis(100);

/// Opens and acquires lock files under `locks/`.
#[derive(Debug, Clone)]
pub struct LockManager {
    storage: StorageConfig,
    timeout: Duration,
}

impl LockManager {
    pub fn new(storage: StorageConfig, timeout: Duration) -> Self {
        Self { storage, timeout }
    }

    /// Blocks until the lock for `name` is held or the timeout elapses.
    pub fn acquire(&self, name: &str) -> Result<LockGuard> {
        let path = self.storage.lock_file(name);
        let dir = self.storage.locks_dir();
        if !dir.exists() {
            fs::create_dir_all(&dir)
                .map_err(|e| TraceError::io("Failed to create lock directory", &dir, e))?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| TraceError::io("Failed to open lock file", &path, e))?;

        let start = Instant::now();
        let mut backoff = INITIAL_BACKOFF;
        let mut rng = rand::thread_rng();

        loop {
            if try_flock(&file).map_err(|e| TraceError::io("flock failed", &path, e))? {
                return Ok(LockGuard {
                    file: Some(file),
                    path,
                    name: name.to_string(),
                });
            }

            let waited = start.elapsed();
            if waited >= self.timeout {
                return Err(TraceError::LockTimeout {
                    name: name.to_string(),
                    waited,
                });
            }

            let jitter = Duration::from_micros(rng.gen_range(0..=backoff.as_micros() as u64));
            std::thread::sleep((backoff + jitter).min(self.timeout.saturating_sub(waited)));
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }
}

/// Returns `Ok(true)` when the exclusive lock was taken, `Ok(false)` when someone else holds it.
fn try_flock(file: &File) -> std::io::Result<bool> {
    // SAFETY: `flock` is called on a valid descriptor owned by `file`, which outlives the call.
    // LOCK_EX | LOCK_NB requests an exclusive lock without blocking.
    #[allow(unsafe_code)]
    let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if result == 0 {
        return Ok(true);
    }
    let err = std::io::Error::last_os_error();
    match err.raw_os_error() {
        Some(code) if code == libc::EWOULDBLOCK || code == libc::EAGAIN => Ok(false),
        Some(libc::EINTR) => Ok(false),
        _ => Err(err),
    }
}

/// A held lock. Dropping it releases the lock on every exit path.
#[derive(Debug)]
pub struct LockGuard {
    file: Option<File>,
    path: PathBuf,
    name: String,
}

impl LockGuard {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Explicit release; equivalent to dropping the guard.
    pub fn release(mut self) {
        self.unlock();
    }

    /// Unlinks the lock file and then releases the lock.
    ///
    /// Used when the session it protects is deleted. A waiter that already opened the old
    /// file will acquire an orphaned inode and find no record behind it.
    pub fn release_and_remove(mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::debug!(
                    path = %self.path.display(),
                    error = %e,
                    "Failed to remove lock file"
                );
            }
        }
        self.unlock();
    }

    fn unlock(&mut self) {
        if let Some(file) = self.file.take() {
            // SAFETY: same descriptor as in `try_flock`; closing the file afterwards would
            // release the lock anyway, unlocking first just makes the ordering explicit.
            #[allow(unsafe_code)]
            unsafe {
                libc::flock(file.as_raw_fd(), libc::LOCK_UN);
            }
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.unlock();
    }
}

//! Cross-process lock guaranteeing a single driver instance per lock file.
//!
//! Uses `flock(2)` on the lock file. The kernel drops the lock when the
//! descriptor closes, so a crashed holder never leaves a stale lock behind.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::error::ModemError;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug)]
pub struct ProcessLock {
    path: PathBuf,
    file: Option<File>,
}

impl ProcessLock {
    /// Acquire the lock, retrying until `timeout` elapses.
    pub fn acquire(path: impl AsRef<Path>, timeout: Duration) -> Result<Self, ModemError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|source| ModemError::LockIo {
                path: path.clone(),
                source,
            })?;

        let deadline = Instant::now() + timeout;
        loop {
            match try_lock_exclusive(&file) {
                Ok(()) => {
                    tracing::debug!(path = %path.display(), "lock acquired");
                    return Ok(Self {
                        path,
                        file: Some(file),
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(ModemError::LockContention { path, timeout });
                    }
                    std::thread::sleep(POLL_INTERVAL.min(deadline - now));
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(source) => return Err(ModemError::LockIo { path, source }),
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_held(&self) -> bool {
        self.file.is_some()
    }

    /// Release the lock. Safe to call any number of times.
    pub fn release(&mut self) {
        if let Some(file) = self.file.take() {
            // SAFETY: the descriptor is owned by `file` and still open.
            let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_UN) };
            if rc != 0 {
                // Closing the descriptor below drops the lock regardless.
                tracing::warn!(
                    path = %self.path.display(),
                    error = %io::Error::last_os_error(),
                    "explicit unlock failed"
                );
            }
            tracing::debug!(path = %self.path.display(), "lock released");
        }
    }
}

impl Drop for ProcessLock {
    fn drop(&mut self) {
        self.release();
    }
}

fn try_lock_exclusive(file: &File) -> io::Result<()> {
    // SAFETY: plain syscall on a descriptor we own.
    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

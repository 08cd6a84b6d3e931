//! Advisory locking of the journal log.
//!
//! Every process that writes the log (the CLI, a bot running on the same
//! machine) goes through a [`LogLock`] on the `<log>.lock` sibling file, so
//! two appends can never interleave their bytes.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use fs2::FileExt;
use tracing::debug;

use crate::error::ErrorCode;

/// How long writers wait for a competing process before giving up.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

const FIRST_BACKOFF: Duration = Duration::from_millis(2);
const MAX_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    /// Another process kept the lock for the whole wait.
    #[error("log lock {} still held after {waited:?}", .path.display())]
    Timeout { path: PathBuf, waited: Duration },

    #[error("cannot open log lock: {0}")]
    IoError(#[from] io::Error),
}

impl LockError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Timeout { .. } => ErrorCode::LockContention,
            Self::IoError(_) => ErrorCode::LogWriteFailed,
        }
    }

    #[must_use]
    pub const fn hint(&self) -> Option<&'static str> {
        self.code().hint()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Read,
    Write,
}

/// Held lock on `<log>.lock`; released on drop.
///
/// Writers (appends, pulls, rewrites) hold it exclusively. Whole-log reads
/// hold it shared so they never see half of an append.
#[derive(Debug)]
pub struct LogLock {
    file: File,
    path: PathBuf,
}

impl LogLock {
    /// Take the lock for writing, waiting at most `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Timeout`] if another process holds the lock for
    /// longer than `timeout`.
    pub fn exclusive(path: &Path, timeout: Duration) -> Result<Self, LockError> {
        Self::wait_for(path, timeout, Mode::Write)
    }

    /// Take the lock for reading, waiting at most `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Timeout`] if a writer holds the lock for longer
    /// than `timeout`.
    pub fn shared(path: &Path, timeout: Duration) -> Result<Self, LockError> {
        Self::wait_for(path, timeout, Mode::Read)
    }

    fn wait_for(path: &Path, timeout: Duration, mode: Mode) -> Result<Self, LockError> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)?;

        let deadline = Instant::now() + timeout;
        let mut backoff = FIRST_BACKOFF;
        let mut attempts = 0u32;
        loop {
            let taken = match mode {
                Mode::Read => FileExt::try_lock_shared(&file),
                Mode::Write => FileExt::try_lock_exclusive(&file),
            };
            attempts += 1;
            if taken.is_ok() {
                if attempts > 1 {
                    debug!(
                        path = %path.display(),
                        ?mode,
                        attempts,
                        "log lock acquired after waiting"
                    );
                }
                return Ok(Self {
                    file,
                    path: path.to_path_buf(),
                });
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(LockError::Timeout {
                    path: path.to_path_buf(),
                    waited: timeout,
                });
            }
            thread::sleep(backoff.min(deadline - now));
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LogLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

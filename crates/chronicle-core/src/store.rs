//! The local journal log file.
//!
//! A [`LogStore`] owns one plaintext log (by default
//! `~/.chronicle/chronicle.log`). Normal operation only ever appends; the
//! maintenance paths ([`LogStore::rewrite_with_backup`],
//! [`LogStore::rewrite_entries`], [`LogStore::quarantine_torn_records`])
//! replace the whole file atomically and keep the previous state on disk.
//!
//! # Invariants
//!
//! - Every append is one `O_APPEND` write of fully encoded records, followed
//!   by `flush` + `sync_data`, under the exclusive `<log>.lock`.
//! - A torn append is never hidden: if the file does not end in a newline,
//!   the next append starts on a fresh line so the torn record stays
//!   unterminated and [`LogStore::load`] reports it.
//! - Rewrites copy the current file to `<log>.bak`, write a sibling temp
//!   file, fsync it and rename it over the log.
//! - Quarantined text is appended to `<log>.corrupt`, never deleted.

use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::entry::parser::{FormatErrorKind, is_start_marker, is_torn_marker, scan};
use crate::entry::{EncodeError, Entry, EntryId, FormatError, decode, encode, encode_log};
use crate::error::ErrorCode;
use crate::lock::{DEFAULT_LOCK_TIMEOUT, LockError, LogLock};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors raised by [`LogStore`] operations.
///
/// Whatever the variant, the log on disk is still in its pre-operation state
/// or, for rewrites, recoverable from `<log>.bak`.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The log (or replacement content) is not valid log text.
    #[error("{}: {source}", .path.display())]
    Format {
        path: PathBuf,
        #[source]
        source: FormatError,
    },

    #[error("log I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("{0}")]
    Lock(#[from] LockError),

    #[error("cannot encode entry: {0}")]
    Encode(#[from] EncodeError),

    /// A rewrite would add, drop, or reorder entries.
    #[error(
        "rewrite changes entry identity at position {position}: expected {}, found {}",
        .expected.as_deref().unwrap_or("<end of log>"),
        .found.as_deref().unwrap_or("<end of log>")
    )]
    IdentityViolation {
        position: usize,
        expected: Option<String>,
        found: Option<String>,
    },
}

impl StoreError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Format { .. } => ErrorCode::MalformedLog,
            Self::Io(_) => ErrorCode::LogWriteFailed,
            Self::Lock(err) => err.code(),
            Self::Encode(_) => ErrorCode::InvalidEntry,
            Self::IdentityViolation { .. } => ErrorCode::IdentityViolation,
        }
    }
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Outcome of [`LogStore::quarantine_torn_records`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuarantineOutcome {
    /// No unterminated record was found; the log was not touched.
    Clean,
    /// Unterminated records were moved out of the log.
    Quarantined {
        /// Number of records moved.
        records: usize,
        /// Number of lines moved.
        lines: usize,
        /// Where the moved text now lives.
        corrupt_path: PathBuf,
    },
}

// ---------------------------------------------------------------------------
// LogStore
// ---------------------------------------------------------------------------

/// Handle on one journal log file and its sibling lock, backup, and
/// quarantine files.
#[derive(Debug, Clone)]
pub struct LogStore {
    path: PathBuf,
    lock_timeout: Duration,
}

impl LogStore {
    /// Does not touch the filesystem.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    #[must_use]
    pub const fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn lock_path(&self) -> PathBuf {
        sibling(&self.path, "lock")
    }

    #[must_use]
    pub fn backup_path(&self) -> PathBuf {
        sibling(&self.path, "bak")
    }

    #[must_use]
    pub fn corrupt_path(&self) -> PathBuf {
        sibling(&self.path, "corrupt")
    }

    fn temp_path(&self) -> PathBuf {
        sibling(&self.path, "tmp")
    }

    #[must_use]
    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Create the parent directory and an empty log if none exists.
    ///
    /// Returns `true` if the log was created.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the directory or file cannot be created.
    pub fn init(&self) -> Result<bool, StoreError> {
        if self.exists() {
            return Ok(false);
        }
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        info!(path = %self.path.display(), "created journal log");
        Ok(true)
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Raw log text; a missing file reads as an empty log.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] on read failure or invalid UTF-8, or
    /// [`StoreError::Lock`] if a writer holds the log too long.
    pub fn read_raw(&self) -> Result<String, StoreError> {
        if !self.exists() {
            return Ok(String::new());
        }
        let _lock = LogLock::shared(&self.lock_path(), self.lock_timeout)?;
        self.read_unlocked()
    }

    fn read_unlocked(&self) -> Result<String, StoreError> {
        match fs::read_to_string(&self.path) {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn decode_text(&self, text: &str) -> Result<Vec<Entry>, StoreError> {
        decode(text).map_err(|source| StoreError::Format {
            path: self.path.clone(),
            source,
        })
    }

    /// Read and decode the whole log, in file order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Format`] if any record is malformed, including a
    /// torn final append.
    pub fn load(&self) -> Result<Vec<Entry>, StoreError> {
        let text = self.read_raw()?;
        let entries = self.decode_text(&text)?;
        debug!(path = %self.path.display(), entries = entries.len(), "loaded journal log");
        Ok(entries)
    }

    /// Ids of every entry in the log, built in one pass.
    ///
    /// # Errors
    ///
    /// Same as [`load`](Self::load).
    pub fn ids(&self) -> Result<HashSet<EntryId>, StoreError> {
        Ok(self.load()?.into_iter().map(|e| e.id).collect())
    }

    /// BLAKE3 hex digest of the raw log bytes.
    ///
    /// # Errors
    ///
    /// Same as [`read_raw`](Self::read_raw).
    pub fn fingerprint(&self) -> Result<String, StoreError> {
        let text = self.read_raw()?;
        Ok(blake3::hash(text.as_bytes()).to_hex().to_string())
    }

    // -----------------------------------------------------------------------
    // Appends
    // -----------------------------------------------------------------------

    /// Durably append one entry.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Encode`] if the entry cannot be written (the log
    /// is not touched), or an I/O or lock error.
    pub fn append(&self, entry: &Entry) -> Result<(), StoreError> {
        self.append_all(std::slice::from_ref(entry)).map(|_| ())
    }

    /// Durably append `entries` in order with a single write.
    ///
    /// Every entry is encoded before the file is opened, so an unencodable
    /// entry leaves the log untouched. Returns the number appended.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Encode`] for the first unencodable entry, or an
    /// I/O or lock error.
    pub fn append_all(&self, entries: &[Entry]) -> Result<usize, StoreError> {
        if entries.is_empty() {
            return Ok(0);
        }

        let records = entries
            .iter()
            .map(encode)
            .collect::<Result<Vec<_>, _>>()?;

        let _lock = LogLock::exclusive(&self.lock_path(), self.lock_timeout)?;
        self.write_records_unlocked(&records)?;
        Ok(entries.len())
    }

    /// Append the entries of `candidates` whose ids are not in the log yet,
    /// in order, checking and writing under one exclusive lock.
    ///
    /// Two concurrent pulls of the same snapshot therefore never write the
    /// same id twice. Returns the number appended.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Encode`] for the first unencodable candidate
    /// (the log is not touched), [`StoreError::Format`] if the current log is
    /// malformed, or an I/O or lock error.
    pub fn append_missing(&self, candidates: &[Entry]) -> Result<usize, StoreError> {
        if candidates.is_empty() {
            return Ok(0);
        }

        let encoded = candidates
            .iter()
            .map(|entry| encode(entry).map(|record| (&entry.id, record)))
            .collect::<Result<Vec<_>, _>>()?;

        let _lock = LogLock::exclusive(&self.lock_path(), self.lock_timeout)?;
        let mut present: HashSet<EntryId> = self
            .decode_text(&self.read_unlocked()?)?
            .into_iter()
            .map(|e| e.id)
            .collect();

        let records: Vec<String> = encoded
            .into_iter()
            .filter(|(id, _)| present.insert((*id).clone()))
            .map(|(_, record)| record)
            .collect();

        if records.len() < candidates.len() {
            debug!(
                path = %self.path.display(),
                already_present = candidates.len() - records.len(),
                "skipped entries written since the merge was planned"
            );
        }
        if records.is_empty() {
            return Ok(0);
        }
        self.write_records_unlocked(&records)?;
        Ok(records.len())
    }

    /// One `O_APPEND` write of encoded records. Caller holds the exclusive
    /// lock.
    fn write_records_unlocked(&self, records: &[String]) -> Result<(), StoreError> {
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)?;

        let mut buf = separator_for(tail_bytes(&mut file)?.as_slice()).to_string();
        buf.push_str(&records.join("\n"));

        file.write_all(buf.as_bytes())?;
        file.flush()?;
        file.sync_data()?;

        info!(
            path = %self.path.display(),
            count = records.len(),
            bytes = buf.len(),
            "appended entries"
        );
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Rewrites
    // -----------------------------------------------------------------------

    /// Replace the whole log with `content`, keeping the old file as
    /// `<log>.bak`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Format`] if `content` is not valid log text (the
    /// log is not touched), or an I/O or lock error.
    pub fn rewrite_with_backup(&self, content: &str) -> Result<(), StoreError> {
        self.decode_text(content)?;
        let _lock = LogLock::exclusive(&self.lock_path(), self.lock_timeout)?;
        self.replace_unlocked(content)
    }

    /// Replace the log with `entries`, which must carry exactly the current
    /// ids in the current order. Bodies and metadata may change.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::IdentityViolation`] at the first position where
    /// the id sequences differ, [`StoreError::Encode`] for an unencodable
    /// entry, or the errors of [`load`](Self::load).
    pub fn rewrite_entries(&self, entries: &[Entry]) -> Result<(), StoreError> {
        let content = encode_log(entries)?;

        let _lock = LogLock::exclusive(&self.lock_path(), self.lock_timeout)?;
        let current = self.decode_text(&self.read_unlocked()?)?;

        let len = current.len().max(entries.len());
        for position in 0..len {
            let expected = current.get(position).map(|e| &e.id);
            let found = entries.get(position).map(|e| &e.id);
            if expected != found {
                return Err(StoreError::IdentityViolation {
                    position,
                    expected: expected.map(ToString::to_string),
                    found: found.map(ToString::to_string),
                });
            }
        }

        self.replace_unlocked(&content)
    }

    /// Backup, write temp, fsync, rename. Caller holds the exclusive lock.
    fn replace_unlocked(&self, content: &str) -> Result<(), StoreError> {
        if self.exists() {
            fs::copy(&self.path, self.backup_path())?;
        }

        let temp = self.temp_path();
        {
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&temp)?;
            file.write_all(content.as_bytes())?;
            file.flush()?;
            file.sync_all()?;
        }
        fs::rename(&temp, &self.path)?;

        info!(
            path = %self.path.display(),
            backup = %self.backup_path().display(),
            bytes = content.len(),
            "rewrote journal log"
        );
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Repair
    // -----------------------------------------------------------------------

    /// Move every unterminated record (normally a torn final append) into
    /// `<log>.corrupt` and rewrite the log without it.
    ///
    /// A record's extent runs from its `@entry` line up to the next `@entry`
    /// line or end of file. A lone line holding a cut-off `@entry` marker
    /// counts as a torn record too. Other problems are left for
    /// [`validate`](crate::entry::validate) to report.
    ///
    /// # Errors
    ///
    /// Returns an I/O or lock error; on failure the log is unchanged or
    /// recoverable from `<log>.bak`.
    pub fn quarantine_torn_records(&self) -> Result<QuarantineOutcome, StoreError> {
        if !self.exists() {
            return Ok(QuarantineOutcome::Clean);
        }

        let _lock = LogLock::exclusive(&self.lock_path(), self.lock_timeout)?;
        let text = self.read_unlocked()?;

        let lines: Vec<&str> = text.lines().collect();
        let mut torn_starts = Vec::new();
        let mut torn_markers = Vec::new();
        scan(&text, |error| {
            match error.kind {
                FormatErrorKind::UnterminatedEntry { .. } => torn_starts.push(error.line),
                FormatErrorKind::TextOutsideEntry(_)
                    if lines
                        .get(error.line - 1)
                        .is_some_and(|line| is_torn_marker(line)) =>
                {
                    torn_markers.push(error.line);
                }
                _ => {}
            }
            ControlFlow::Continue(())
        });

        let records = torn_starts.len() + torn_markers.len();
        if records == 0 {
            return Ok(QuarantineOutcome::Clean);
        }

        let mut quarantined = vec![false; lines.len()];
        for &line in &torn_markers {
            quarantined[line - 1] = true;
        }
        for &start in &torn_starts {
            quarantined[start - 1] = true;
            for (line, flag) in lines.iter().zip(quarantined.iter_mut()).skip(start) {
                if is_start_marker(line.trim_end_matches('\r')) {
                    break;
                }
                *flag = true;
            }
        }

        let mut kept = String::new();
        let mut moved = String::new();
        for (line, &is_torn) in lines.iter().zip(&quarantined) {
            let target = if is_torn { &mut moved } else { &mut kept };
            target.push_str(line);
            target.push('\n');
        }
        let moved_lines = quarantined.iter().filter(|&&q| q).count();

        let corrupt_path = self.corrupt_path();
        let mut corrupt = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&corrupt_path)?;
        corrupt.write_all(moved.as_bytes())?;
        corrupt.sync_data()?;

        let kept = kept.trim_end_matches('\n');
        if kept.is_empty() {
            self.replace_unlocked("")?;
        } else {
            self.replace_unlocked(&format!("{kept}\n"))?;
        }

        warn!(
            path = %self.path.display(),
            records,
            lines = moved_lines,
            corrupt = %corrupt_path.display(),
            "quarantined unterminated records"
        );

        Ok(QuarantineOutcome::Quarantined {
            records,
            lines: moved_lines,
            corrupt_path,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().map(ToOwned::to_owned).unwrap_or_default();
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}

/// Last (up to) two bytes of `file`.
fn tail_bytes(file: &mut fs::File) -> io::Result<Vec<u8>> {
    let len = file.metadata()?.len();
    file.seek(SeekFrom::Start(len.saturating_sub(2)))?;
    let mut tail = Vec::with_capacity(2);
    file.read_to_end(&mut tail)?;
    Ok(tail)
}

/// Text to write before a new record given the current end of the log.
fn separator_for(tail: &[u8]) -> &'static str {
    match tail {
        [] | [.., b'\n', b'\n'] | [b'\n'] => "",
        [.., b'\n'] => "\n",
        _ => "\n\n",
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

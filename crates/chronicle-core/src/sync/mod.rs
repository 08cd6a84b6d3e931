//! Encrypted merge-sync between the local log and one remote snapshot.
//!
//! Every operation is a single blocking round-trip:
//!
//! - **push**: load → encode → encrypt → put. Always a full overwrite, which
//!   also folds any extra token lines into one.
//! - **pull**: get → decrypt and decode every token line → plan → one
//!   locked `append_missing`. A missing or never-pushed remote is "nothing to
//!   do", not an error. A snapshot that fails to decrypt or decode aborts
//!   before anything is appended.
//! - **status**: get → decrypt → decode → compare. Never writes.
//! - **setup**: fresh salt plus a newly provisioned remote object.
//!
//! The engine never retries. The passphrase-derived [`SyncKey`] is passed
//! into each call and never stored.

pub mod merge;

use serde::Serialize;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::crypto::{self, DecryptionError, EncryptionError, Salt, SyncKey};
use crate::entry::{self, EncodeError, Entry, EntryId, FormatError};
use crate::error::ErrorCode;
use crate::remote::{RemoteError, SnapshotStore};
use crate::store::{LogStore, StoreError};

pub use merge::{Comparison, MergePlan, compare, plan_pull};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Decryption(#[from] DecryptionError),

    #[error(transparent)]
    Encryption(#[from] EncryptionError),

    #[error("local log cannot be encoded: {0}")]
    Encode(#[from] EncodeError),

    /// The decrypted snapshot is not a valid log. Nothing was appended.
    #[error("remote snapshot is malformed at {0}")]
    RemoteFormat(#[source] FormatError),

    #[error("remote snapshot is not valid UTF-8")]
    RemoteEncoding,
}

impl SyncError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Store(err) => err.code(),
            Self::Remote(err) => err.code(),
            Self::Decryption(err) => err.code(),
            Self::Encryption(_) => ErrorCode::InternalUnexpected,
            Self::Encode(_) => ErrorCode::InvalidEntry,
            Self::RemoteFormat(_) | Self::RemoteEncoding => ErrorCode::MalformedLog,
        }
    }
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PushReport {
    pub remote_id: String,
    pub pushed: usize,
    pub bytes: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PullReport {
    /// `false` if the remote was missing or never pushed to.
    pub remote_found: bool,
    pub appended: usize,
    pub skipped: usize,
    pub diverged: Vec<EntryId>,
    pub duplicates_in_remote: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub backend: &'static str,
    pub remote_id: String,
    pub remote_found: bool,
    pub local_entries: usize,
    pub remote_entries: usize,
    pub local_only: usize,
    pub remote_only: usize,
    pub shared: usize,
    pub diverged: Vec<EntryId>,
    /// BLAKE3 of the local log bytes.
    pub local_fingerprint: String,
}

impl StatusReport {
    #[must_use]
    pub fn in_sync(&self) -> bool {
        self.remote_found
            && self.local_only == 0
            && self.remote_only == 0
            && self.diverged.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupReport {
    pub remote_id: String,
    pub salt: Salt,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Runs sync operations for one local log against one remote object.
#[derive(Debug)]
pub struct SyncEngine<'a, R> {
    store: &'a LogStore,
    remote: R,
    remote_id: String,
}

impl<'a, R: SnapshotStore> SyncEngine<'a, R> {
    #[must_use]
    pub fn new(store: &'a LogStore, remote: R, remote_id: impl Into<String>) -> Self {
        Self {
            store,
            remote,
            remote_id: remote_id.into(),
        }
    }

    #[must_use]
    pub fn remote_id(&self) -> &str {
        &self.remote_id
    }

    /// Upload the whole local log, replacing the remote snapshot.
    ///
    /// An empty log is pushed too, so the remote mirrors local state.
    ///
    /// # Errors
    ///
    /// Store, encode, encryption, or remote errors. The local log is never
    /// modified.
    pub fn push(&self, key: &SyncKey) -> Result<PushReport, SyncError> {
        let entries = self.store.load()?;
        let plaintext = Zeroizing::new(entry::encode_log(&entries)?);
        let token = crypto::encrypt(plaintext.as_bytes(), key)?;

        debug!(
            backend = self.remote.backend(),
            remote = %self.remote_id,
            entries = entries.len(),
            "uploading snapshot"
        );
        self.remote.put(&self.remote_id, &token)?;

        info!(
            remote = %self.remote_id,
            pushed = entries.len(),
            bytes = token.len(),
            "push complete"
        );
        Ok(PushReport {
            remote_id: self.remote_id.clone(),
            pushed: entries.len(),
            bytes: token.len(),
        })
    }

    /// Fetch and decode the remote log. `None` if there is no snapshot yet.
    ///
    /// The remote holds one token per line: a push writes a single token,
    /// while other writers (the chat bot) may append more. Blank and `#`
    /// lines are skipped. Entries come back in token order; any token that
    /// fails to decrypt or decode fails the whole fetch.
    fn fetch(&self, key: &SyncKey) -> Result<Option<Vec<Entry>>, SyncError> {
        let content = match self.remote.get(&self.remote_id) {
            Ok(content) => content,
            Err(RemoteError::NotFound { .. }) => {
                debug!(remote = %self.remote_id, "no remote snapshot");
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };

        let mut entries = Vec::new();
        let mut tokens = 0usize;
        for token in snapshot_tokens(&content) {
            let plaintext = crypto::decrypt(token, key)?;
            let text =
                std::str::from_utf8(&plaintext).map_err(|_| SyncError::RemoteEncoding)?;
            entries.extend(entry::decode(text).map_err(SyncError::RemoteFormat)?);
            tokens += 1;
        }
        if tokens == 0 {
            debug!(remote = %self.remote_id, "remote holds no tokens");
            return Ok(None);
        }

        debug!(
            remote = %self.remote_id,
            tokens,
            entries = entries.len(),
            "decoded remote snapshot"
        );
        Ok(Some(entries))
    }

    /// Append every remote entry whose id is not already local.
    ///
    /// Idempotent: pulling the same snapshot again appends nothing.
    ///
    /// # Errors
    ///
    /// Remote errors other than not-found, [`SyncError::Decryption`] (wrong
    /// passphrase or tampering), [`SyncError::RemoteFormat`], or store
    /// errors. Nothing is appended unless the whole snapshot decoded.
    pub fn pull(&self, key: &SyncKey) -> Result<PullReport, SyncError> {
        let Some(remote) = self.fetch(key)? else {
            return Ok(PullReport::default());
        };

        let local = self.store.load()?;
        let plan = plan_pull(&local, remote);

        for id in &plan.diverged {
            warn!(
                id = %id,
                "remote entry differs from local copy; keeping local"
            );
        }

        // Ids appended by another writer since `load` count as skipped.
        let appended = self.store.append_missing(&plan.to_append)?;
        let skipped = plan.skipped + (plan.to_append.len() - appended);
        info!(
            remote = %self.remote_id,
            appended,
            skipped,
            diverged = plan.diverged.len(),
            "pull complete"
        );

        Ok(PullReport {
            remote_found: true,
            appended,
            skipped,
            diverged: plan.diverged,
            duplicates_in_remote: plan.duplicates_in_remote,
        })
    }

    /// Compare local and remote logs without writing anything.
    ///
    /// # Errors
    ///
    /// Same as [`pull`](Self::pull), minus append failures.
    pub fn status(&self, key: &SyncKey) -> Result<StatusReport, SyncError> {
        let local = self.store.load()?;
        let local_fingerprint = self.store.fingerprint()?;
        let remote = self.fetch(key)?;
        let remote_found = remote.is_some();
        let remote = remote.unwrap_or_default();
        let comparison = compare(&local, &remote);

        Ok(StatusReport {
            backend: self.remote.backend(),
            remote_id: self.remote_id.clone(),
            remote_found,
            local_entries: local.len(),
            remote_entries: remote.len(),
            local_only: comparison.local_only,
            remote_only: comparison.remote_only,
            shared: comparison.shared,
            diverged: comparison.diverged,
            local_fingerprint,
        })
    }
}

/// Token lines of a remote object, skipping blank and `#` comment lines.
fn snapshot_tokens(content: &str) -> impl Iterator<Item = &str> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
}

/// Provision a remote object and a fresh salt for a new sync group.
///
/// The caller persists both; every other device copies them.
///
/// # Errors
///
/// Whatever [`SnapshotStore::create`] returns.
pub fn setup<R: SnapshotStore>(remote: &R) -> Result<SetupReport, SyncError> {
    let salt = Salt::generate();
    let remote_id = remote.create()?;
    info!(backend = remote.backend(), remote = %remote_id, "provisioned sync remote");
    Ok(SetupReport { remote_id, salt })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{KEY_LEN, SALT_LEN};
    use crate::remote::MemoryStore;
    use chrono::{DateTime, FixedOffset, TimeZone};
    use tempfile::TempDir;

    fn ts() -> DateTime<FixedOffset> {
        FixedOffset::east_opt(3600)
            .expect("offset")
            .with_ymd_and_hms(2026, 1, 1, 12, 0, 0)
            .single()
            .expect("timestamp")
    }

    fn entry(id: &str, body: &str) -> Entry {
        let mut e = Entry::new("entry", body, ts());
        e.id = EntryId::parse(id).expect("id");
        e
    }

    fn key(salt: &Salt) -> SyncKey {
        SyncKey::from_bytes([42; KEY_LEN], *salt)
    }

    #[test]
    fn setup_returns_remote_and_salt() {
        let remote = MemoryStore::new();
        let report = setup(&remote).expect("setup");
        assert_eq!(remote.len(), 1);
        assert!(remote.raw(&report.remote_id).is_some());
    }

    #[test]
    fn pull_from_fresh_remote_appends_nothing() {
        let tmp = TempDir::new().expect("tempdir");
        let store = LogStore::new(tmp.path().join("chronicle.log"));
        let remote = MemoryStore::new();
        let SetupReport { remote_id, salt } = setup(&remote).expect("setup");

        let engine = SyncEngine::new(&store, &remote, remote_id);
        let report = engine.pull(&key(&salt)).expect("pull");
        assert_eq!(report, PullReport::default());
        assert!(!store.exists());
    }

    #[test]
    fn push_then_pull_elsewhere_then_pull_again() {
        let tmp = TempDir::new().expect("tempdir");
        let laptop = LogStore::new(tmp.path().join("laptop.log"));
        let phone = LogStore::new(tmp.path().join("phone.log"));
        let remote = MemoryStore::new();
        let SetupReport { remote_id, salt } = setup(&remote).expect("setup");
        let key = key(&salt);

        laptop
            .append_all(&[
                entry("20260101-1200-aaaa", "A"),
                entry("20260101-1201-bbbb", "B"),
            ])
            .expect("append");

        let push = SyncEngine::new(&laptop, &remote, remote_id.as_str())
            .push(&key)
            .expect("push");
        assert_eq!(push.pushed, 2);

        let phone_sync = SyncEngine::new(&phone, &remote, remote_id.as_str());
        assert_eq!(phone_sync.pull(&key).expect("pull").appended, 2);
        let second = phone_sync.pull(&key).expect("pull again");
        assert_eq!(second.appended, 0);
        assert_eq!(second.skipped, 2);
        assert_eq!(phone.load().expect("load"), laptop.load().expect("load"));
    }

    #[test]
    fn wrong_key_is_fatal_and_appends_nothing() {
        let tmp = TempDir::new().expect("tempdir");
        let store = LogStore::new(tmp.path().join("chronicle.log"));
        let remote = MemoryStore::new();
        let SetupReport { remote_id, salt } = setup(&remote).expect("setup");
        store
            .append(&entry("20260101-1200-aaaa", "A"))
            .expect("append");
        SyncEngine::new(&store, &remote, remote_id.as_str())
            .push(&key(&salt))
            .expect("push");

        let other = TempDir::new().expect("tempdir");
        let fresh = LogStore::new(other.path().join("chronicle.log"));
        let wrong = SyncKey::from_bytes([7; KEY_LEN], salt);
        let err = SyncEngine::new(&fresh, &remote, remote_id.as_str())
            .pull(&wrong)
            .expect_err("wrong key");
        assert!(matches!(
            err,
            SyncError::Decryption(DecryptionError::Authentication)
        ));
        assert_eq!(err.code(), ErrorCode::DecryptionFailed);
        assert!(!fresh.exists());

        let other_salt = Salt::from_bytes([1; SALT_LEN]);
        let err = SyncEngine::new(&fresh, &remote, remote_id.as_str())
            .pull(&key(&other_salt))
            .expect_err("salt mismatch");
        assert_eq!(err.code(), ErrorCode::SaltMismatch);
    }

    #[test]
    fn malformed_snapshot_aborts_before_appending() {
        let tmp = TempDir::new().expect("tempdir");
        let store = LogStore::new(tmp.path().join("chronicle.log"));
        let remote = MemoryStore::new();
        let SetupReport { remote_id, salt } = setup(&remote).expect("setup");
        let key = key(&salt);

        let blob = "\
@entry 20260101-1200-aaaa 2026-01-01T12:00:00+00:00 entry
fine
@end

@entry 20260101-1201-bbbb 2026-01-01T12:01:00+00:00 entry
torn";
        let token = crypto::encrypt(blob.as_bytes(), &key).expect("encrypt");
        remote.put(&remote_id, &token).expect("put");

        let err = SyncEngine::new(&store, &remote, remote_id.as_str())
            .pull(&key)
            .expect_err("malformed");
        match err {
            SyncError::RemoteFormat(e) => assert_eq!(e.line, 5),
            other => panic!("unexpected error: {other}"),
        }
        assert!(!store.exists());
    }

    #[test]
    fn remote_errors_propagate() {
        let tmp = TempDir::new().expect("tempdir");
        let store = LogStore::new(tmp.path().join("chronicle.log"));
        let remote = MemoryStore::new();
        let salt = Salt::from_bytes([3; SALT_LEN]);

        let err = SyncEngine::new(&store, &remote, "mem-404")
            .push(&key(&salt))
            .expect_err("missing remote");
        assert_eq!(err.code(), ErrorCode::RemoteNotFound);
    }

    #[test]
    fn status_reports_both_sides_without_writing() {
        let tmp = TempDir::new().expect("tempdir");
        let store = LogStore::new(tmp.path().join("chronicle.log"));
        let remote = MemoryStore::new();
        let SetupReport { remote_id, salt } = setup(&remote).expect("setup");
        let key = key(&salt);
        let engine = SyncEngine::new(&store, &remote, remote_id.as_str());

        store
            .append(&entry("20260101-1200-aaaa", "A"))
            .expect("append");
        let before = engine.status(&key).expect("status");
        assert!(!before.remote_found);
        assert_eq!(before.local_only, 1);
        assert!(!before.in_sync());

        engine.push(&key).expect("push");
        let after = engine.status(&key).expect("status");
        assert!(after.in_sync());
        assert_eq!(after.shared, 1);
        assert_eq!(after.backend, "memory");

        store
            .append(&entry("20260101-1201-bbbb", "B"))
            .expect("append");
        let ahead = engine.status(&key).expect("status");
        assert_eq!(ahead.local_only, 1);
        assert_eq!(ahead.remote_entries, 1);
        assert_ne!(ahead.local_fingerprint, after.local_fingerprint);
    }
}

pub mod add;
pub mod init;
pub mod list;
pub mod repair;
pub mod sync;
pub mod validate;

use anyhow::{Context as _, Result};
use chronicle_core::config::{self, Config};
use chronicle_core::crypto::{Passphrase, SyncKey};
use chronicle_core::error::ErrorCode;
use chronicle_core::store::LogStore;
use std::io::{self, BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};
use zeroize::Zeroizing;

pub const PASSPHRASE_ENV: &str = "CHRONICLE_PASSPHRASE";

/// An error that already knows its [`ErrorCode`], for failures detected in
/// the CLI itself rather than in the core.
#[derive(Debug)]
pub struct Coded {
    pub code: ErrorCode,
    pub message: String,
}

impl Coded {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Coded {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for Coded {}

/// The chronicle directory, its config, and its log.
pub struct Journal {
    pub dir: PathBuf,
    pub config: Config,
    pub store: LogStore,
}

impl Journal {
    /// Load config and locate the log without requiring it to exist.
    pub fn locate(dir: &Path) -> Result<Self> {
        let config = config::load_config(dir)?;
        let store = LogStore::new(config.log_path(dir));
        Ok(Self {
            dir: dir.to_path_buf(),
            config,
            store,
        })
    }

    /// Like [`locate`](Self::locate), but the log must already exist.
    pub fn open(dir: &Path) -> Result<Self> {
        let journal = Self::locate(dir)?;
        if !journal.store.exists() {
            return Err(Coded::new(
                ErrorCode::NotInitialized,
                format!("no journal log at {}", journal.store.path().display()),
            )
            .into());
        }
        Ok(journal)
    }

    /// Derive the sync key from the configured salt and the user's passphrase.
    pub fn sync_key(&self) -> Result<SyncKey> {
        let salt = self.config.sync.salt()?;
        let passphrase = read_passphrase()?;
        tracing::debug!("deriving sync key");
        Ok(SyncKey::derive(&passphrase, &salt))
    }
}

/// `CHRONICLE_PASSPHRASE`, or one line from stdin (with a prompt on stderr
/// when interactive).
fn read_passphrase() -> Result<Passphrase> {
    if let Ok(value) = std::env::var(PASSPHRASE_ENV) {
        return non_empty(Passphrase::from(value));
    }

    let stdin = io::stdin();
    if stdin.is_terminal() {
        eprint!("Passphrase: ");
        io::stderr().flush().ok();
    }
    let mut line = Zeroizing::new(String::new());
    stdin
        .lock()
        .read_line(&mut line)
        .context("Failed to read passphrase from stdin")?;
    non_empty(Passphrase::from(line.trim_end_matches(['\n', '\r'])))
}

fn non_empty(passphrase: Passphrase) -> Result<Passphrase> {
    if passphrase.is_empty() {
        return Err(Coded::new(
            ErrorCode::DecryptionFailed,
            format!("empty passphrase; set {PASSPHRASE_ENV} or type it on stdin"),
        )
        .into());
    }
    Ok(passphrase)
}

/// Map any error in the chain to its stable code.
pub fn error_code(err: &anyhow::Error) -> ErrorCode {
    use chronicle_core::config::ConfigError;
    use chronicle_core::crypto::DecryptionError;
    use chronicle_core::entry::EncodeError;
    use chronicle_core::lock::LockError;
    use chronicle_core::remote::RemoteError;
    use chronicle_core::store::StoreError;
    use chronicle_core::sync::SyncError;

    for cause in err.chain() {
        if let Some(e) = cause.downcast_ref::<Coded>() {
            return e.code;
        }
        if let Some(e) = cause.downcast_ref::<SyncError>() {
            return e.code();
        }
        if let Some(e) = cause.downcast_ref::<StoreError>() {
            return e.code();
        }
        if let Some(e) = cause.downcast_ref::<RemoteError>() {
            return e.code();
        }
        if let Some(e) = cause.downcast_ref::<DecryptionError>() {
            return e.code();
        }
        if let Some(e) = cause.downcast_ref::<LockError>() {
            return e.code();
        }
        if let Some(e) = cause.downcast_ref::<ConfigError>() {
            return e.code();
        }
        if cause.downcast_ref::<EncodeError>().is_some() {
            return ErrorCode::InvalidEntry;
        }
        if cause.downcast_ref::<toml::de::Error>().is_some() {
            return ErrorCode::ConfigParseError;
        }
    }
    ErrorCode::InternalUnexpected
}

//! Remote snapshot stores.
//!
//! A remote holds exactly one opaque snapshot token per identifier. Stores
//! never interpret, retry, or version what they hold; retry policy belongs
//! to the caller and revision history, if any, to the service.
//!
//! - [`GistStore`]: a secret GitHub Gist, one file per gist.
//! - [`DirStore`]: `<dir>/<id>.enc`, for a synced folder or offline target.
//! - [`MemoryStore`]: in-process, for tests and embedding.

mod dir;
mod gist;
mod memory;

pub use dir::DirStore;
pub use gist::{GIST_FILE_NAME, GistStore};
pub use memory::MemoryStore;

use std::time::Duration;

use crate::error::ErrorCode;

/// Content written by [`SnapshotStore::create`] before the first push.
///
/// Stores report it as [`RemoteError::NotFound`] so a pull against a freshly
/// provisioned remote is a no-op.
pub const PLACEHOLDER: &str = "# chronicle sync\n";

/// `true` if `content` holds no snapshot yet.
#[must_use]
pub fn is_placeholder(content: &str) -> bool {
    let content = content.trim();
    content.is_empty() || content == PLACEHOLDER.trim()
}

/// Failure talking to a remote, split by what the caller can do about it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    /// No object under that identifier, or it holds no snapshot yet.
    #[error("remote snapshot '{id}' not found")]
    NotFound { id: String },

    /// Credentials missing, invalid, or lacking scope.
    #[error("remote rejected credentials: {0}")]
    Auth(String),

    #[error("remote rate limit reached{}", retry_hint(.retry_after.as_ref()))]
    RateLimited { retry_after: Option<Duration> },

    /// Network or filesystem failure before a response was read.
    #[error("remote transport failure: {0}")]
    Transport(String),

    #[error("unexpected remote response: {0}")]
    InvalidResponse(String),
}

fn retry_hint(wait: Option<&Duration>) -> String {
    wait.map(|w| format!(" (retry after {}s)", w.as_secs()))
        .unwrap_or_default()
}

impl RemoteError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound { .. } => ErrorCode::RemoteNotFound,
            Self::Auth(_) => ErrorCode::RemoteAuth,
            Self::RateLimited { .. } => ErrorCode::RemoteRateLimited,
            Self::Transport(_) => ErrorCode::RemoteTransport,
            Self::InvalidResponse(_) => ErrorCode::RemoteInvalidResponse,
        }
    }

    /// Whether repeating the same request later could succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Transport(_))
    }
}

/// One remote object holding one snapshot token.
pub trait SnapshotStore {
    /// Short backend name for logs and status output.
    fn backend(&self) -> &'static str;

    /// Provision a new, empty remote object and return its identifier.
    ///
    /// # Errors
    ///
    /// Any [`RemoteError`] except `NotFound`.
    fn create(&self) -> Result<String, RemoteError>;

    /// Fetch the current token.
    ///
    /// # Errors
    ///
    /// [`RemoteError::NotFound`] if the object is missing or still holds
    /// [`PLACEHOLDER`]; any other [`RemoteError`] on failure.
    fn get(&self, id: &str) -> Result<String, RemoteError>;

    /// Overwrite the object's content with `token`.
    ///
    /// # Errors
    ///
    /// [`RemoteError::NotFound`] if the object does not exist; any other
    /// [`RemoteError`] on failure.
    fn put(&self, id: &str, token: &str) -> Result<(), RemoteError>;
}

impl<S: SnapshotStore + ?Sized> SnapshotStore for &S {
    fn backend(&self) -> &'static str {
        (**self).backend()
    }

    fn create(&self) -> Result<String, RemoteError> {
        (**self).create()
    }

    fn get(&self, id: &str) -> Result<String, RemoteError> {
        (**self).get(id)
    }

    fn put(&self, id: &str, token: &str) -> Result<(), RemoteError> {
        (**self).put(id, token)
    }
}

impl<S: SnapshotStore + ?Sized> SnapshotStore for Box<S> {
    fn backend(&self) -> &'static str {
        (**self).backend()
    }

    fn create(&self) -> Result<String, RemoteError> {
        (**self).create()
    }

    fn get(&self, id: &str) -> Result<String, RemoteError> {
        (**self).get(id)
    }

    fn put(&self, id: &str, token: &str) -> Result<(), RemoteError> {
        (**self).put(id, token)
    }
}

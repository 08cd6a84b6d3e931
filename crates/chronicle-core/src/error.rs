use std::fmt;

/// Machine-readable error codes for scripts and wrappers around the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NotInitialized,
    ConfigParseError,
    SyncNotConfigured,
    SyncAlreadyConfigured,
    MalformedLog,
    InvalidEntry,
    IdentityViolation,
    DecryptionFailed,
    SaltMismatch,
    RemoteNotFound,
    RemoteAuth,
    RemoteRateLimited,
    RemoteTransport,
    RemoteInvalidResponse,
    LogWriteFailed,
    LockContention,
    InternalUnexpected,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::NotInitialized => "E1001",
            Self::ConfigParseError => "E1002",
            Self::SyncNotConfigured => "E1003",
            Self::SyncAlreadyConfigured => "E1004",
            Self::MalformedLog => "E2001",
            Self::InvalidEntry => "E2002",
            Self::IdentityViolation => "E2003",
            Self::DecryptionFailed => "E3001",
            Self::SaltMismatch => "E3002",
            Self::RemoteNotFound => "E4001",
            Self::RemoteAuth => "E4002",
            Self::RemoteRateLimited => "E4003",
            Self::RemoteTransport => "E4004",
            Self::RemoteInvalidResponse => "E4005",
            Self::LogWriteFailed => "E5001",
            Self::LockContention => "E5002",
            Self::InternalUnexpected => "E9001",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::NotInitialized => "Journal not initialized",
            Self::ConfigParseError => "Config file parse error",
            Self::SyncNotConfigured => "Sync is not configured",
            Self::SyncAlreadyConfigured => "Sync is already configured",
            Self::MalformedLog => "Malformed journal log",
            Self::InvalidEntry => "Entry cannot be written to the log",
            Self::IdentityViolation => "Rewrite would change entry identities",
            Self::DecryptionFailed => "Snapshot could not be decrypted",
            Self::SaltMismatch => "Snapshot was encrypted with a different salt",
            Self::RemoteNotFound => "Remote snapshot not found",
            Self::RemoteAuth => "Remote rejected credentials",
            Self::RemoteRateLimited => "Remote rate limit reached",
            Self::RemoteTransport => "Remote transport failure",
            Self::RemoteInvalidResponse => "Unexpected remote response",
            Self::LogWriteFailed => "Journal log write failed",
            Self::LockContention => "Lock contention",
            Self::InternalUnexpected => "Internal unexpected error",
        }
    }

    /// Optional remediation hint surfaced next to the error.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::NotInitialized => Some("Run `chronicle init` to create the journal."),
            Self::ConfigParseError => Some("Fix syntax in config.toml and retry."),
            Self::SyncNotConfigured => Some("Run `chronicle sync setup` on one device first."),
            Self::SyncAlreadyConfigured => {
                Some("Pass --force to provision a new remote and salt for this device.")
            }
            Self::MalformedLog => Some("Run `chronicle validate` to list every problem."),
            Self::InvalidEntry => None,
            Self::IdentityViolation => {
                Some("Corrections may change bodies and metadata, never ids or order.")
            }
            Self::DecryptionFailed => Some("Check your passphrase."),
            Self::SaltMismatch => {
                Some("Copy the [sync] salt from the device that ran `chronicle sync setup`.")
            }
            Self::RemoteNotFound => Some("Check the [sync] remote_id in config.toml."),
            Self::RemoteAuth => Some("Check GITHUB_TOKEN and its gist scope."),
            Self::RemoteRateLimited => Some("Wait for the rate limit window to reset and retry."),
            Self::RemoteTransport => Some("Check your connection and retry."),
            Self::RemoteInvalidResponse => Some("Retry once. If persistent, report a bug."),
            Self::LogWriteFailed => Some("Check disk space and write permissions."),
            Self::LockContention => Some("Retry after the other chronicle process finishes."),
            Self::InternalUnexpected => Some("Retry once. If persistent, report a bug with logs."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

//! Snapshot encryption.
//!
//! A snapshot is the whole encoded log sealed with XChaCha20-Poly1305 under a
//! key stretched from the user's passphrase:
//!
//! ```text
//! chronicle.v1.<salt, base64url>.<nonce || ciphertext, base64url>
//! ```
//!
//! The `chronicle.v1.<salt>` header is authenticated as associated data, so
//! a token cannot be re-labelled with another salt or version. The salt is in
//! the clear so a device configured with a different salt gets a precise
//! [`DecryptionError::SaltMismatch`] instead of a bare authentication
//! failure.
//!
//! Only the salt is ever persisted. Passphrases and derived keys live in
//! zeroizing buffers for the duration of one command.

use std::fmt;
use std::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::ErrorCode;

/// PBKDF2-HMAC-SHA256 rounds. Changing this breaks every existing remote.
pub const PBKDF2_ITERATIONS: u32 = 480_000;

pub const SALT_LEN: usize = 16;
pub const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 24;
const TAG_LEN: usize = 16;

const TOKEN_PREFIX: &str = "chronicle";
const TOKEN_VERSION: &str = "v1";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Why a snapshot token could not be opened.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecryptionError {
    #[error("snapshot token is malformed: {0}")]
    Malformed(&'static str),

    #[error("snapshot token version '{0}' is not supported")]
    UnsupportedVersion(String),

    #[error("snapshot was encrypted with salt {remote}, but this device uses {local}")]
    SaltMismatch { local: String, remote: String },

    /// Wrong passphrase, or the token was altered.
    #[error("snapshot failed authentication (wrong passphrase or corrupted data)")]
    Authentication,
}

impl DecryptionError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::SaltMismatch { .. } => ErrorCode::SaltMismatch,
            _ => ErrorCode::DecryptionFailed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("plaintext is too large to encrypt")]
pub struct EncryptionError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid salt: expected {SALT_LEN} bytes of base64")]
pub struct InvalidSalt;

// ---------------------------------------------------------------------------
// Salt
// ---------------------------------------------------------------------------

/// Per-remote KDF salt, generated once by `sync setup` and shared in
/// plaintext config by every device.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Salt([u8; SALT_LEN]);

impl Salt {
    /// Fresh random salt from the OS generator.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    #[must_use]
    pub const fn from_bytes(bytes: [u8; SALT_LEN]) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; SALT_LEN] {
        &self.0
    }

    /// Standard base64, the form stored in `config.toml`.
    #[must_use]
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.0)
    }

    /// Parse the config form. URL-safe input is accepted too.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidSalt`] if `raw` does not decode to exactly
    /// [`SALT_LEN`] bytes.
    pub fn from_base64(raw: &str) -> Result<Self, InvalidSalt> {
        let raw = raw.trim();
        let bytes = STANDARD
            .decode(raw)
            .or_else(|_| URL_SAFE_NO_PAD.decode(raw))
            .map_err(|_| InvalidSalt)?;
        let bytes: [u8; SALT_LEN] = bytes.try_into().map_err(|_| InvalidSalt)?;
        Ok(Self(bytes))
    }

    fn to_token_form(self) -> String {
        URL_SAFE_NO_PAD.encode(self.0)
    }
}

impl fmt::Debug for Salt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Salt({})", self.to_base64())
    }
}

impl fmt::Display for Salt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base64())
    }
}

impl FromStr for Salt {
    type Err = InvalidSalt;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_base64(s)
    }
}

// ---------------------------------------------------------------------------
// Passphrase
// ---------------------------------------------------------------------------

/// The user's sync passphrase. Never persisted, never logged.
#[derive(Clone)]
pub struct Passphrase(Zeroizing<String>);

impl Passphrase {
    #[must_use]
    pub fn new(value: String) -> Self {
        Self(Zeroizing::new(value))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl From<String> for Passphrase {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for Passphrase {
    fn from(value: &str) -> Self {
        Self::new(value.to_owned())
    }
}

impl fmt::Debug for Passphrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Passphrase(<redacted>)")
    }
}

// ---------------------------------------------------------------------------
// SyncKey
// ---------------------------------------------------------------------------

/// A derived snapshot key together with the salt it was derived with.
pub struct SyncKey {
    key: Zeroizing<[u8; KEY_LEN]>,
    salt: Salt,
}

impl SyncKey {
    /// Stretch `passphrase` with PBKDF2-HMAC-SHA256 over `salt`.
    ///
    /// Deterministic; runs [`PBKDF2_ITERATIONS`] rounds.
    #[must_use]
    pub fn derive(passphrase: &Passphrase, salt: &Salt) -> Self {
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        pbkdf2::pbkdf2_hmac::<Sha256>(
            passphrase.as_bytes(),
            salt.as_bytes(),
            PBKDF2_ITERATIONS,
            key.as_mut_slice(),
        );
        tracing::debug!(iterations = PBKDF2_ITERATIONS, "derived sync key");
        Self { key, salt: *salt }
    }

    /// Wrap raw key material, skipping the KDF.
    #[must_use]
    pub fn from_bytes(bytes: [u8; KEY_LEN], salt: Salt) -> Self {
        Self {
            key: Zeroizing::new(bytes),
            salt,
        }
    }

    #[must_use]
    pub const fn salt(&self) -> &Salt {
        &self.salt
    }

    fn cipher(&self) -> XChaCha20Poly1305 {
        XChaCha20Poly1305::new(Key::from_slice(self.key.as_slice()))
    }
}

impl fmt::Debug for SyncKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncKey")
            .field("key", &"<redacted>")
            .field("salt", &self.salt)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Token
// ---------------------------------------------------------------------------

fn header(salt: Salt) -> String {
    format!("{TOKEN_PREFIX}.{TOKEN_VERSION}.{}", salt.to_token_form())
}

/// Seal `plaintext` into a self-contained snapshot token.
///
/// # Errors
///
/// Returns [`EncryptionError`] only if the AEAD rejects the input length.
pub fn encrypt(plaintext: &[u8], key: &SyncKey) -> Result<String, EncryptionError> {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    let header = header(key.salt);
    let ciphertext = key
        .cipher()
        .encrypt(
            XNonce::from_slice(&nonce),
            Payload {
                msg: plaintext,
                aad: header.as_bytes(),
            },
        )
        .map_err(|_| EncryptionError)?;

    let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    sealed.extend_from_slice(&nonce);
    sealed.extend_from_slice(&ciphertext);

    Ok(format!("{header}.{}", URL_SAFE_NO_PAD.encode(sealed)))
}

/// Open a snapshot token.
///
/// # Errors
///
/// Returns a [`DecryptionError`] for a malformed or unsupported token, a salt
/// other than `key`'s, or any authentication failure (wrong key or altered
/// bytes). Never returns unauthenticated plaintext.
pub fn decrypt(token: &str, key: &SyncKey) -> Result<Zeroizing<Vec<u8>>, DecryptionError> {
    let mut parts = token.trim().splitn(4, '.');
    let (Some(prefix), Some(version), Some(salt), Some(sealed)) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(DecryptionError::Malformed("expected four dot-separated parts"));
    };

    if prefix != TOKEN_PREFIX {
        return Err(DecryptionError::Malformed("unknown token prefix"));
    }
    if version != TOKEN_VERSION {
        return Err(DecryptionError::UnsupportedVersion(version.to_string()));
    }

    let remote_salt = URL_SAFE_NO_PAD
        .decode(salt)
        .ok()
        .and_then(|bytes| <[u8; SALT_LEN]>::try_from(bytes).ok())
        .map(Salt)
        .ok_or(DecryptionError::Malformed("salt is not valid base64url"))?;
    if remote_salt != key.salt {
        return Err(DecryptionError::SaltMismatch {
            local: key.salt.to_base64(),
            remote: remote_salt.to_base64(),
        });
    }

    let sealed = URL_SAFE_NO_PAD
        .decode(sealed)
        .map_err(|_| DecryptionError::Malformed("payload is not valid base64url"))?;
    if sealed.len() < NONCE_LEN + TAG_LEN {
        return Err(DecryptionError::Malformed("payload is too short"));
    }
    let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);

    let aad = header(remote_salt);
    key.cipher()
        .decrypt(
            XNonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad: aad.as_bytes(),
            },
        )
        .map(Zeroizing::new)
        .map_err(|_| DecryptionError::Authentication)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

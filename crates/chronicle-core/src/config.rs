use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset, Local, Offset, Utc};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::crypto::{InvalidSalt, Salt};
use crate::error::ErrorCode;
use crate::remote::{DirStore, GistStore, SnapshotStore};

pub const CONFIG_FILE: &str = "config.toml";
pub const DEFAULT_DIR_NAME: &str = ".chronicle";
pub const DIR_ENV: &str = "CHRONICLE_DIR";
pub const TOKEN_ENV: &str = "GITHUB_TOKEN";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub chronicle: JournalConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalConfig {
    #[serde(default = "default_log_file")]
    pub log_file: PathBuf,
    /// `local` (default), `utc`, or a fixed offset such as `+02:00`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            log_file: default_log_file(),
            timezone: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Gist,
    Dir,
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Gist => "gist",
            Self::Dir => "dir",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub backend: Backend,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<String>,
    /// Base64 KDF salt shared by every device of one sync group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salt: Option<String>,
    /// Snapshot directory for the `dir` backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Fallback when `GITHUB_TOKEN` is unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github_token: Option<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            remote_id: None,
            salt: None,
            dir: None,
            timeout_secs: default_timeout_secs(),
            github_token: None,
        }
    }
}

/// Problems with the `[sync]` section that stop a sync command.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("[sync] {0} is not set")]
    SyncNotConfigured(&'static str),

    #[error("[sync] salt: {0}")]
    InvalidSalt(#[from] InvalidSalt),

    #[error("no GitHub token: set {TOKEN_ENV} or [sync] github_token")]
    MissingGithubToken,

    #[error("[sync] dir is required for the dir backend")]
    MissingSyncDir,

    #[error("invalid [chronicle] timezone '{0}'")]
    InvalidTimezone(String),
}

impl ConfigError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::SyncNotConfigured(_) => ErrorCode::SyncNotConfigured,
            Self::MissingGithubToken => ErrorCode::RemoteAuth,
            Self::InvalidSalt(_) | Self::MissingSyncDir | Self::InvalidTimezone(_) => {
                ErrorCode::ConfigParseError
            }
        }
    }
}

/// Resolve the chronicle directory: `--dir`, then `CHRONICLE_DIR`, then
/// `~/.chronicle`.
///
/// # Errors
///
/// Fails only if no override is given and the home directory is unknown.
pub fn resolve_dir(cli_dir: Option<&Path>) -> Result<PathBuf> {
    if let Some(dir) = cli_dir {
        return Ok(dir.to_path_buf());
    }
    if let Some(dir) = env::var_os(DIR_ENV).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir));
    }
    dirs::home_dir()
        .map(|home| home.join(DEFAULT_DIR_NAME))
        .context("cannot determine home directory; pass --dir or set CHRONICLE_DIR")
}

#[must_use]
pub fn config_path(dir: &Path) -> PathBuf {
    dir.join(CONFIG_FILE)
}

/// Load `<dir>/config.toml`; a missing file yields defaults.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_config(dir: &Path) -> Result<Config> {
    let path = config_path(dir);
    if !path.exists() {
        return Ok(Config::default());
    }

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    toml::from_str::<Config>(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))
}

/// Replace the `[sync]` table in `<dir>/config.toml`.
///
/// Other tables and keys keep their values, but the file is re-rendered from
/// parsed TOML, so comments and formatting are not preserved. Returns `true`
/// if the previous file had comment lines that were dropped.
///
/// # Errors
///
/// Returns an error if the existing file cannot be parsed or the new one
/// cannot be written.
pub fn save_sync_config(dir: &Path, sync: &SyncConfig) -> Result<bool> {
    let path = config_path(dir);
    let (mut doc, had_comments): (toml::Table, bool) = if path.exists() {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let doc = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        let had_comments = content.lines().any(|l| l.trim_start().starts_with('#'));
        (doc, had_comments)
    } else {
        (toml::Table::new(), false)
    };

    let sync_value = toml::Value::try_from(sync).context("Failed to serialize [sync]")?;
    doc.insert("sync".to_string(), sync_value);

    std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    let rendered = toml::to_string_pretty(&doc).context("Failed to render config")?;
    let temp = dir.join(format!("{CONFIG_FILE}.tmp"));
    std::fs::write(&temp, rendered)
        .with_context(|| format!("Failed to write {}", temp.display()))?;
    std::fs::rename(&temp, &path)
        .with_context(|| format!("Failed to replace {}", path.display()))?;
    tracing::debug!(
        path = %path.display(),
        dropped_comments = had_comments,
        "saved sync config"
    );
    Ok(had_comments)
}

impl Config {
    /// The log file, resolved against the chronicle directory.
    #[must_use]
    pub fn log_path(&self, dir: &Path) -> PathBuf {
        if self.chronicle.log_file.is_absolute() {
            self.chronicle.log_file.clone()
        } else {
            dir.join(&self.chronicle.log_file)
        }
    }
}

impl JournalConfig {
    /// UTC offset to stamp new entries with at instant `now`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidTimezone`] for anything other than
    /// `local`, `utc`, or `±HH:MM`.
    pub fn offset_at(&self, now: DateTime<Utc>) -> Result<FixedOffset, ConfigError> {
        let raw = self.timezone.as_deref().map_or("local", str::trim);
        match raw.to_ascii_lowercase().as_str() {
            "" | "local" => Ok(now.with_timezone(&Local).offset().fix()),
            "utc" | "z" => Ok(Utc.fix()),
            _ => raw
                .parse::<FixedOffset>()
                .map_err(|_| ConfigError::InvalidTimezone(raw.to_string())),
        }
    }
}

impl SyncConfig {
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.remote_id.is_some() && self.salt.is_some()
    }

    /// # Errors
    ///
    /// [`ConfigError::SyncNotConfigured`] if unset, or
    /// [`ConfigError::InvalidSalt`].
    pub fn salt(&self) -> Result<Salt, ConfigError> {
        let raw = self
            .salt
            .as_deref()
            .ok_or(ConfigError::SyncNotConfigured("salt"))?;
        Ok(Salt::from_base64(raw)?)
    }

    /// # Errors
    ///
    /// [`ConfigError::SyncNotConfigured`] if unset.
    pub fn remote_id(&self) -> Result<&str, ConfigError> {
        self.remote_id
            .as_deref()
            .ok_or(ConfigError::SyncNotConfigured("remote_id"))
    }

    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// `env_token` (normally `GITHUB_TOKEN`) wins over the config value.
    #[must_use]
    pub fn github_token(&self, env_token: Option<String>) -> Option<String> {
        env_token
            .filter(|t| !t.trim().is_empty())
            .or_else(|| self.github_token.clone())
            .filter(|t| !t.trim().is_empty())
    }

    /// Build the configured snapshot store. A relative `dir` is resolved
    /// against `base`.
    ///
    /// # Errors
    ///
    /// [`ConfigError::MissingGithubToken`] or [`ConfigError::MissingSyncDir`].
    pub fn open_remote(
        &self,
        base: &Path,
        env_token: Option<String>,
    ) -> Result<Box<dyn SnapshotStore>, ConfigError> {
        match self.backend {
            Backend::Gist => {
                let token = self
                    .github_token(env_token)
                    .ok_or(ConfigError::MissingGithubToken)?;
                Ok(Box::new(GistStore::new(token, self.timeout())))
            }
            Backend::Dir => {
                let dir = self.dir.as_ref().ok_or(ConfigError::MissingSyncDir)?;
                let dir = if dir.is_absolute() {
                    dir.clone()
                } else {
                    base.join(dir)
                };
                Ok(Box::new(DirStore::new(dir)))
            }
        }
    }
}

fn default_log_file() -> PathBuf {
    PathBuf::from("chronicle.log")
}

const fn default_timeout_secs() -> u64 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    #[test]
    fn missing_config_uses_defaults() {
        let tmp = TempDir::new().expect("tempdir");
        let cfg = load_config(tmp.path()).expect("load should succeed");
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.sync.backend, Backend::Gist);
        assert_eq!(cfg.sync.timeout_secs, 30);
        assert!(!cfg.sync.is_configured());
        assert_eq!(cfg.log_path(tmp.path()), tmp.path().join("chronicle.log"));
    }

    #[test]
    fn parses_full_config() {
        let cfg: Config = toml::from_str(
            r#"
[chronicle]
log_file = "/var/journal/me.log"
timezone = "+02:00"

[sync]
backend = "dir"
remote_id = "chronicle-00ff"
salt = "AAECAwQFBgcICQoLDA0ODw=="
dir = "remote"
timeout_secs = 5
"#,
        )
        .expect("parse");

        assert_eq!(
            cfg.log_path(Path::new("/home/x/.chronicle")),
            PathBuf::from("/var/journal/me.log")
        );
        assert_eq!(cfg.sync.backend, Backend::Dir);
        assert_eq!(cfg.sync.remote_id().expect("id"), "chronicle-00ff");
        assert_eq!(
            cfg.sync.salt().expect("salt").as_bytes(),
            &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15]
        );
        assert_eq!(cfg.sync.timeout(), Duration::from_secs(5));

        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).single().expect("now");
        assert_eq!(
            cfg.chronicle.offset_at(now).expect("offset").local_minus_utc(),
            7200
        );
    }

    #[test]
    fn unconfigured_sync_reports_missing_field() {
        let sync = SyncConfig::default();
        assert_eq!(
            sync.remote_id(),
            Err(ConfigError::SyncNotConfigured("remote_id"))
        );
        let err = sync.salt().expect_err("no salt");
        assert_eq!(err.code(), ErrorCode::SyncNotConfigured);
    }

    #[test]
    fn bad_salt_and_timezone_are_config_errors() {
        let sync = SyncConfig {
            salt: Some("not base64!".into()),
            ..SyncConfig::default()
        };
        assert_eq!(sync.salt().expect_err("bad").code(), ErrorCode::ConfigParseError);

        let journal = JournalConfig {
            timezone: Some("Mars/Olympus".into()),
            ..JournalConfig::default()
        };
        assert!(matches!(
            journal.offset_at(Utc::now()),
            Err(ConfigError::InvalidTimezone(_))
        ));
    }

    #[test]
    fn env_token_wins_over_config() {
        let sync = SyncConfig {
            github_token: Some("from-config".into()),
            ..SyncConfig::default()
        };
        assert_eq!(
            sync.github_token(Some("from-env".into())).as_deref(),
            Some("from-env")
        );
        assert_eq!(sync.github_token(None).as_deref(), Some("from-config"));
        assert_eq!(
            sync.github_token(Some("  ".into())).as_deref(),
            Some("from-config")
        );
        assert!(SyncConfig::default().github_token(None).is_none());
    }

    #[test]
    fn open_remote_requires_backend_settings() {
        let base = Path::new("/tmp/chronicle");
        let gist = SyncConfig::default();
        assert_eq!(
            gist.open_remote(base, None).err(),
            Some(ConfigError::MissingGithubToken)
        );
        assert_eq!(
            gist.open_remote(base, Some("t".into()))
                .expect("gist")
                .backend(),
            "gist"
        );

        let dir = SyncConfig {
            backend: Backend::Dir,
            ..SyncConfig::default()
        };
        assert_eq!(
            dir.open_remote(base, None).err(),
            Some(ConfigError::MissingSyncDir)
        );
    }

    #[test]
    fn save_sync_config_keeps_other_sections() {
        let tmp = TempDir::new().expect("tempdir");
        std::fs::write(
            config_path(tmp.path()),
            "[chronicle]\ntimezone = \"utc\"\n\n[bot]\nchat_id = 42\n",
        )
        .expect("seed config");

        let sync = SyncConfig {
            backend: Backend::Dir,
            remote_id: Some("chronicle-0a".into()),
            salt: Some(Salt::from_bytes([1; 16]).to_base64()),
            dir: Some(PathBuf::from("remote")),
            ..SyncConfig::default()
        };
        assert!(!save_sync_config(tmp.path(), &sync).expect("save"));

        let cfg = load_config(tmp.path()).expect("reload");
        assert_eq!(cfg.sync, sync);
        assert_eq!(cfg.chronicle.timezone.as_deref(), Some("utc"));

        let raw = std::fs::read_to_string(config_path(tmp.path())).expect("read");
        assert!(raw.contains("chat_id = 42"));
        assert!(!raw.contains("github_token"));
    }

    #[test]
    fn save_sync_config_reports_dropped_comments() {
        let tmp = TempDir::new().expect("tempdir");
        std::fs::write(
            config_path(tmp.path()),
            "# journal settings\n[chronicle]\n  # utc, local or +HH:MM\ntimezone = \"utc\"\n",
        )
        .expect("seed config");

        let dropped = save_sync_config(tmp.path(), &SyncConfig::default()).expect("save");
        assert!(dropped);
        let raw = std::fs::read_to_string(config_path(tmp.path())).expect("read");
        assert!(!raw.contains('#'));
        assert_eq!(
            load_config(tmp.path()).expect("reload").chronicle.timezone.as_deref(),
            Some("utc")
        );

        assert!(!save_sync_config(tmp.path(), &SyncConfig::default()).expect("save again"));
    }
}

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tracing::debug;
use zeroize::Zeroizing;

use super::{PLACEHOLDER, RemoteError, SnapshotStore, is_placeholder};

/// The single file each sync gist carries.
pub const GIST_FILE_NAME: &str = "chronicle_sync.enc";

const DEFAULT_API_BASE: &str = "https://api.github.com";
const GIST_DESCRIPTION: &str = "chronicle sync";
const API_VERSION: &str = "2022-11-28";

/// A secret GitHub Gist holding the token in [`GIST_FILE_NAME`].
///
/// Needs a token with the `gist` scope. Gist revisions are GitHub's
/// business; every `put` is a plain overwrite.
pub struct GistStore {
    agent: ureq::Agent,
    token: Zeroizing<String>,
    api_base: String,
}

impl std::fmt::Debug for GistStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GistStore")
            .field("api_base", &self.api_base)
            .field("token", &"<redacted>")
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct GistResponse {
    id: String,
    #[serde(default)]
    files: HashMap<String, GistFile>,
}

#[derive(Debug, Deserialize)]
struct GistFile {
    content: Option<String>,
    #[serde(default)]
    truncated: bool,
    raw_url: Option<String>,
}

/// Where a gist's snapshot can be read from.
#[derive(Debug, PartialEq, Eq)]
enum Content {
    Inline(String),
    /// Over the API's inline size limit; fetch the raw URL.
    Raw(String),
}

impl GistStore {
    #[must_use]
    pub fn new(token: String, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(timeout)
            .user_agent(concat!("chronicle/", env!("CARGO_PKG_VERSION")))
            .build();
        Self {
            agent,
            token: Zeroizing::new(token),
            api_base: DEFAULT_API_BASE.to_string(),
        }
    }

    /// Point at a GitHub Enterprise or test server instead of api.github.com.
    #[must_use]
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn request(&self, method: &str, url: &str) -> ureq::Request {
        self.agent
            .request(method, url)
            .set("Authorization", &format!("Bearer {}", self.token.as_str()))
            .set("Accept", "application/vnd.github+json")
            .set("X-GitHub-Api-Version", API_VERSION)
    }

    fn gist_url(&self, id: &str) -> String {
        format!("{}/gists/{id}", self.api_base)
    }
}

/// Map a ureq failure onto the remote error taxonomy.
fn map_error(err: ureq::Error, id: &str) -> RemoteError {
    match err {
        ureq::Error::Status(status, response) => {
            let remaining = response.header("x-ratelimit-remaining");
            let retry_after = retry_after(
                response.header("retry-after"),
                response.header("x-ratelimit-reset"),
                chrono::Utc::now().timestamp(),
            );
            classify_status(status, remaining, retry_after, id)
        }
        ureq::Error::Transport(transport) => RemoteError::Transport(transport.to_string()),
    }
}

fn classify_status(
    status: u16,
    ratelimit_remaining: Option<&str>,
    retry_after: Option<Duration>,
    id: &str,
) -> RemoteError {
    match status {
        429 => RemoteError::RateLimited { retry_after },
        403 if ratelimit_remaining == Some("0") => RemoteError::RateLimited { retry_after },
        401 | 403 => RemoteError::Auth(format!("HTTP {status}")),
        404 => RemoteError::NotFound { id: id.to_string() },
        other => RemoteError::InvalidResponse(format!("HTTP {other}")),
    }
}

/// Wait time from `Retry-After` (seconds) or `X-RateLimit-Reset` (epoch).
fn retry_after(retry_after: Option<&str>, reset: Option<&str>, now: i64) -> Option<Duration> {
    if let Some(secs) = retry_after.and_then(|v| v.trim().parse::<u64>().ok()) {
        return Some(Duration::from_secs(secs));
    }
    let reset = reset.and_then(|v| v.trim().parse::<i64>().ok())?;
    u64::try_from(reset.saturating_sub(now))
        .ok()
        .map(Duration::from_secs)
}

fn snapshot_content(gist: GistResponse) -> Option<Content> {
    let mut files = gist.files;
    let file = files.remove(GIST_FILE_NAME)?;
    match (file.truncated, file.raw_url, file.content) {
        (true, Some(url), _) => Some(Content::Raw(url)),
        (_, _, Some(content)) => Some(Content::Inline(content)),
        (_, Some(url), None) => Some(Content::Raw(url)),
        (_, None, None) => None,
    }
}

impl SnapshotStore for GistStore {
    fn backend(&self) -> &'static str {
        "gist"
    }

    fn create(&self) -> Result<String, RemoteError> {
        let body = json!({
            "description": GIST_DESCRIPTION,
            "public": false,
            "files": { GIST_FILE_NAME: { "content": PLACEHOLDER } },
        });
        let gist: GistResponse = self
            .request("POST", &format!("{}/gists", self.api_base))
            .send_json(body)
            .map_err(|e| map_error(e, "<new>"))?
            .into_json()
            .map_err(|e| RemoteError::InvalidResponse(format!("gist create: {e}")))?;
        debug!(gist = %gist.id, "created secret gist");
        Ok(gist.id)
    }

    fn get(&self, id: &str) -> Result<String, RemoteError> {
        let gist: GistResponse = self
            .request("GET", &self.gist_url(id))
            .call()
            .map_err(|e| map_error(e, id))?
            .into_json()
            .map_err(|e| RemoteError::InvalidResponse(format!("gist read: {e}")))?;

        let not_found = || RemoteError::NotFound { id: id.to_string() };
        let content = match snapshot_content(gist).ok_or_else(not_found)? {
            Content::Inline(content) => content,
            Content::Raw(url) => {
                debug!(gist = %id, "snapshot truncated inline, fetching raw file");
                self.request("GET", &url)
                    .call()
                    .map_err(|e| map_error(e, id))?
                    .into_string()
                    .map_err(|e| RemoteError::InvalidResponse(format!("gist raw read: {e}")))?
            }
        };

        if is_placeholder(&content) {
            return Err(not_found());
        }
        Ok(content)
    }

    fn put(&self, id: &str, token: &str) -> Result<(), RemoteError> {
        let body = json!({ "files": { GIST_FILE_NAME: { "content": token } } });
        self.request("PATCH", &self.gist_url(id))
            .send_json(body)
            .map_err(|e| map_error(e, id))?;
        debug!(gist = %id, bytes = token.len(), "updated gist");
        Ok(())
    }
}

//! Output modes shared by every command.
//!
//! A command builds one serializable view and hands it to [`render_mode`]
//! with a text renderer and a pretty renderer; JSON comes from `serde`.
//! The mode is the first of: `--format`, `--json`, `CHRONICLE_FORMAT`, then
//! pretty on a terminal and text when piped.
//!
//! Results go to stdout; errors always go to stderr.

use chronicle_core::ErrorCode;
use clap::ValueEnum;
use serde::Serialize;
use std::io::{self, IsTerminal, Write};

const FORMAT_ENV: &str = "CHRONICLE_FORMAT";
const RULE_WIDTH: usize = 60;
const KEY_WIDTH: usize = 16;

pub fn pretty_rule(w: &mut dyn Write) -> io::Result<()> {
    writeln!(w, "{}", "-".repeat(RULE_WIDTH))
}

/// Write a heading underlined with `=`.
pub fn pretty_section(w: &mut dyn Write, heading: &str) -> io::Result<()> {
    writeln!(w, "{heading}")?;
    writeln!(w, "{}", "=".repeat(heading.len().clamp(8, RULE_WIDTH)))
}

/// `Key:           value`
pub fn pretty_kv(w: &mut dyn Write, key: &str, value: impl AsRef<str>) -> io::Result<()> {
    writeln!(w, "  {:<KEY_WIDTH$}{}", format!("{key}:"), value.as_ref())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputMode {
    /// Labelled output for people.
    Pretty,
    /// One `key=value` line or row per record, for scripts.
    Text,
    /// Machine-readable JSON.
    Json,
}

impl OutputMode {
    fn from_env_value(raw: &str) -> Option<Self> {
        <Self as ValueEnum>::from_str(raw.trim(), true).ok()
    }
}

fn pick_mode(
    flag: Option<OutputMode>,
    json: bool,
    env: Option<&str>,
    terminal: bool,
) -> OutputMode {
    flag.or(json.then_some(OutputMode::Json))
        .or_else(|| env.and_then(OutputMode::from_env_value))
        .unwrap_or(if terminal {
            OutputMode::Pretty
        } else {
            OutputMode::Text
        })
}

/// Resolve the output mode for this invocation.
pub fn resolve_output_mode(flag: Option<OutputMode>, json: bool) -> OutputMode {
    let env = std::env::var(FORMAT_ENV).ok();
    pick_mode(flag, json, env.as_deref(), io::stdout().is_terminal())
}

/// Render a serializable value with explicit pretty/text renderers.
pub fn render_mode<T: Serialize>(
    mode: OutputMode,
    value: &T,
    text_fn: impl FnOnce(&T, &mut dyn Write) -> io::Result<()>,
    pretty_fn: impl FnOnce(&T, &mut dyn Write) -> io::Result<()>,
) -> anyhow::Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    match mode {
        OutputMode::Json => {
            serde_json::to_writer_pretty(&mut out, value)?;
            writeln!(out)?;
        }
        OutputMode::Text => text_fn(value, &mut out)?,
        OutputMode::Pretty => pretty_fn(value, &mut out)?,
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A failed command as shown to the user.
#[derive(Debug, Serialize)]
pub struct CliError {
    /// Stable `E####` code.
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<&'static str>,
}

impl CliError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.code(),
            message: message.into(),
            hint: code.hint(),
        }
    }
}

/// Write `error` to stderr.
pub fn render_error(mode: OutputMode, error: &CliError) -> anyhow::Result<()> {
    write_error(mode, error, &mut io::stderr().lock())
}

fn write_error(mode: OutputMode, error: &CliError, out: &mut dyn Write) -> anyhow::Result<()> {
    if mode == OutputMode::Json {
        serde_json::to_writer_pretty(&mut *out, &serde_json::json!({ "error": error }))?;
        writeln!(out)?;
        return Ok(());
    }
    writeln!(out, "error[{}]: {}", error.code, error.message)?;
    if let Some(hint) = error.hint {
        writeln!(out, "  hint: {hint}")?;
    }
    Ok(())
}

//! `chronicle push`, `pull`, `sync status`, and `sync setup`.
//!
//! Recommended order on each device is pull then push: a push replaces the
//! remote snapshot with the local log, so entries only another device has
//! pushed are lost from the remote (not from that device) until it pushes
//! again.

use crate::cmd::{Coded, Journal};
use crate::output::{OutputMode, pretty_kv, pretty_section, render_mode};
use anyhow::Result;
use chronicle_core::config::{Backend, SyncConfig, TOKEN_ENV, save_sync_config};
use chronicle_core::error::ErrorCode;
use chronicle_core::remote::SnapshotStore;
use chronicle_core::sync::{self, SyncEngine};
use clap::{Args, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Subcommand, Debug)]
pub enum SyncCommand {
    /// Compare the local log with the remote snapshot.
    Status,
    /// Provision a remote snapshot and a fresh salt for a new sync group.
    Setup(SetupArgs),
}

#[derive(Args, Debug)]
pub struct SetupArgs {
    /// Where snapshots live.
    #[arg(long, value_enum, default_value = "gist")]
    pub backend: BackendArg,

    /// Snapshot directory for the `dir` backend.
    #[arg(long, required_if_eq("backend", "dir"))]
    pub path: Option<PathBuf>,

    /// Replace an existing [sync] configuration.
    #[arg(long)]
    pub force: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum BackendArg {
    Gist,
    Dir,
}

impl From<BackendArg> for Backend {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Gist => Self::Gist,
            BackendArg::Dir => Self::Dir,
        }
    }
}

fn env_token() -> Option<String> {
    std::env::var(TOKEN_ENV).ok()
}

fn open_remote(journal: &Journal) -> Result<(Box<dyn SnapshotStore>, String)> {
    let sync = &journal.config.sync;
    let remote_id = sync.remote_id()?.to_string();
    let remote = sync.open_remote(&journal.dir, env_token())?;
    Ok((remote, remote_id))
}

// ---------------------------------------------------------------------------
// push / pull
// ---------------------------------------------------------------------------

pub fn run_push(dir: &Path, output: OutputMode) -> Result<()> {
    let journal = Journal::open(dir)?;
    let (remote, remote_id) = open_remote(&journal)?;
    let key = journal.sync_key()?;
    let report = SyncEngine::new(&journal.store, remote, remote_id).push(&key)?;

    render_mode(
        output,
        &report,
        |r, w| writeln!(w, "pushed={} bytes={}", r.pushed, r.bytes),
        |r, w| {
            writeln!(w, "Pushed {} entries", r.pushed)?;
            pretty_kv(w, "Remote", &r.remote_id)
        },
    )
}

pub fn run_pull(dir: &Path, output: OutputMode) -> Result<()> {
    let journal = Journal::open(dir)?;
    let (remote, remote_id) = open_remote(&journal)?;
    let key = journal.sync_key()?;
    let report = SyncEngine::new(&journal.store, remote, remote_id).pull(&key)?;

    render_mode(
        output,
        &report,
        |r, w| {
            writeln!(
                w,
                "appended={} skipped={} diverged={}",
                r.appended,
                r.skipped,
                r.diverged.len()
            )
        },
        |r, w| {
            if !r.remote_found {
                return writeln!(w, "Remote has no snapshot yet; nothing to pull");
            }
            writeln!(w, "Pulled {} new entries ({} already present)", r.appended, r.skipped)?;
            for id in &r.diverged {
                writeln!(w, "  {id} differs from the remote copy; kept local")?;
            }
            Ok(())
        },
    )
}

// ---------------------------------------------------------------------------
// sync status / setup
// ---------------------------------------------------------------------------

pub fn run_sync(command: &SyncCommand, dir: &Path, output: OutputMode) -> Result<()> {
    match command {
        SyncCommand::Status => run_status(dir, output),
        SyncCommand::Setup(args) => run_setup(args, dir, output),
    }
}

fn run_status(dir: &Path, output: OutputMode) -> Result<()> {
    let journal = Journal::open(dir)?;
    let (remote, remote_id) = open_remote(&journal)?;
    let key = journal.sync_key()?;
    let report = SyncEngine::new(&journal.store, remote, remote_id).status(&key)?;

    render_mode(
        output,
        &report,
        |r, w| {
            writeln!(
                w,
                "in_sync={} local={} remote={} local_only={} remote_only={} diverged={}",
                r.in_sync(),
                r.local_entries,
                r.remote_entries,
                r.local_only,
                r.remote_only,
                r.diverged.len()
            )
        },
        |r, w| {
            pretty_section(w, "Sync status")?;
            pretty_kv(w, "Backend", r.backend)?;
            pretty_kv(w, "Remote", &r.remote_id)?;
            if !r.remote_found {
                pretty_kv(w, "Snapshot", "none yet (run `chronicle push`)")?;
            }
            pretty_kv(w, "Local entries", r.local_entries.to_string())?;
            pretty_kv(w, "Remote entries", r.remote_entries.to_string())?;
            pretty_kv(w, "Local only", r.local_only.to_string())?;
            pretty_kv(w, "Remote only", r.remote_only.to_string())?;
            for id in &r.diverged {
                writeln!(w, "  {id} differs between local and remote")?;
            }
            pretty_kv(w, "In sync", if r.in_sync() { "yes" } else { "no" })
        },
    )
}

#[derive(Debug, Serialize)]
struct SetupView {
    backend: String,
    remote_id: String,
    salt: String,
    /// config.toml was re-rendered without its comments.
    comments_dropped: bool,
}

fn run_setup(args: &SetupArgs, dir: &Path, output: OutputMode) -> Result<()> {
    let journal = Journal::locate(dir)?;
    if journal.config.sync.is_configured() && !args.force {
        return Err(Coded::new(
            ErrorCode::SyncAlreadyConfigured,
            "sync is already configured; pass --force to replace it",
        )
        .into());
    }

    let mut sync_config = SyncConfig {
        backend: args.backend.into(),
        dir: args.path.clone(),
        ..journal.config.sync.clone()
    };
    let remote = sync_config.open_remote(&journal.dir, env_token())?;
    let setup = sync::setup(&remote)?;

    sync_config.remote_id = Some(setup.remote_id.clone());
    sync_config.salt = Some(setup.salt.to_base64());
    let comments_dropped = save_sync_config(&journal.dir, &sync_config)?;

    let view = SetupView {
        backend: sync_config.backend.to_string(),
        remote_id: setup.remote_id,
        salt: setup.salt.to_base64(),
        comments_dropped,
    };
    render_mode(
        output,
        &view,
        |v, w| {
            writeln!(w, "remote_id={}", v.remote_id)?;
            writeln!(w, "salt={}", v.salt)?;
            writeln!(w, "comments_dropped={}", v.comments_dropped)
        },
        |v, w| {
            writeln!(w, "Sync configured")?;
            pretty_kv(w, "Backend", &v.backend)?;
            pretty_kv(w, "Remote", &v.remote_id)?;
            pretty_kv(w, "Salt", &v.salt)?;
            if v.comments_dropped {
                writeln!(w, "Note: config.toml was rewritten without its comments.")?;
            }
            writeln!(
                w,
                "Copy the [sync] section of config.toml to your other devices and use the same passphrase."
            )
        },
    )
}

//! `chronicle init`: create the journal directory, config, and empty log.

use crate::cmd::Journal;
use crate::output::{OutputMode, pretty_kv, render_mode};
use anyhow::{Context as _, Result};
use chronicle_core::config::config_path;
use serde::Serialize;
use std::path::Path;

const CONFIG_TOML: &str = "[chronicle]\n\
    log_file = \"chronicle.log\"\n\
    # timezone = \"local\"   # or \"utc\", or a fixed offset like \"+02:00\"\n\
    \n\
    # Filled in by `chronicle sync setup`; copy to every device.\n\
    # [sync]\n\
    # backend = \"gist\"\n\
    # remote_id = \"...\"\n\
    # salt = \"...\"\n";

#[derive(Debug, Serialize)]
struct InitReport {
    dir: String,
    log: String,
    created_log: bool,
    created_config: bool,
}

/// Create `<dir>`, a commented `config.toml`, and an empty log. Existing
/// files are left untouched, so running it twice is harmless.
pub fn run_init(dir: &Path, output: OutputMode) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;

    let config_file = config_path(dir);
    let created_config = !config_file.exists();
    if created_config {
        std::fs::write(&config_file, CONFIG_TOML)
            .with_context(|| format!("Failed to write {}", config_file.display()))?;
    }

    let journal = Journal::locate(dir)?;
    let created_log = journal.store.init()?;

    let report = InitReport {
        dir: dir.display().to_string(),
        log: journal.store.path().display().to_string(),
        created_log,
        created_config,
    };

    render_mode(
        output,
        &report,
        |r, w| {
            writeln!(w, "dir={}", r.dir)?;
            writeln!(w, "log={}", r.log)?;
            writeln!(w, "created={}", r.created_log)
        },
        |r, w| {
            if r.created_log {
                writeln!(w, "Initialized journal")?;
            } else {
                writeln!(w, "Journal already initialized")?;
            }
            pretty_kv(w, "Directory", &r.dir)?;
            pretty_kv(w, "Log", &r.log)
        },
    )
}

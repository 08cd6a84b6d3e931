//! `chronicle validate`: report every structural problem in the log.

use crate::cmd::{Coded, Journal};
use crate::output::{OutputMode, pretty_kv, pretty_section, render_mode};
use anyhow::Result;
use chronicle_core::entry::validate::report;
use chronicle_core::error::ErrorCode;
use serde::Serialize;
use std::path::Path;

#[derive(Debug, Serialize)]
struct FindingView {
    line: usize,
    message: String,
}

#[derive(Debug, Serialize)]
struct ValidateView {
    ok: bool,
    path: String,
    entries: usize,
    findings: Vec<FindingView>,
}

/// Exits non-zero when any finding is reported.
pub fn run_validate(dir: &Path, output: OutputMode) -> Result<()> {
    let journal = Journal::open(dir)?;
    let text = journal.store.read_raw()?;
    let result = report(&text);

    let view = ValidateView {
        ok: result.is_ok(),
        path: journal.store.path().display().to_string(),
        entries: result.entries,
        findings: result
            .findings
            .iter()
            .map(|(line, error)| FindingView {
                line: *line,
                message: error.kind.to_string(),
            })
            .collect(),
    };

    render_mode(
        output,
        &view,
        |v, w| {
            for f in &v.findings {
                writeln!(w, "{}:{}: {}", v.path, f.line, f.message)?;
            }
            writeln!(w, "entries={} findings={}", v.entries, v.findings.len())
        },
        |v, w| {
            pretty_section(w, "Validation")?;
            pretty_kv(w, "Log", &v.path)?;
            pretty_kv(w, "Entries", v.entries.to_string())?;
            if v.ok {
                return writeln!(w, "No problems found");
            }
            for f in &v.findings {
                writeln!(w, "  line {:>5}  {}", f.line, f.message)?;
            }
            Ok(())
        },
    )?;

    if view.ok {
        Ok(())
    } else {
        Err(Coded::new(
            ErrorCode::MalformedLog,
            format!("{} problem(s) in {}", view.findings.len(), view.path),
        )
        .into())
    }
}

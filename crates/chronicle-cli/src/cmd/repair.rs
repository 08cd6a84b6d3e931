//! `chronicle repair`: move torn records out of the log.

use crate::cmd::Journal;
use crate::output::{OutputMode, pretty_kv, render_mode};
use anyhow::Result;
use chronicle_core::entry::validate;
use chronicle_core::store::QuarantineOutcome;
use serde::Serialize;
use std::path::Path;

#[derive(Debug, Serialize)]
struct RepairView {
    repaired: bool,
    records: usize,
    lines: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    corrupt_path: Option<String>,
    /// Problems `repair` does not fix, left for manual editing.
    remaining_findings: usize,
}

pub fn run_repair(dir: &Path, output: OutputMode) -> Result<()> {
    let journal = Journal::open(dir)?;
    let outcome = journal.store.quarantine_torn_records()?;
    let remaining_findings = validate(&journal.store.read_raw()?).len();

    let view = match outcome {
        QuarantineOutcome::Clean => RepairView {
            repaired: false,
            records: 0,
            lines: 0,
            corrupt_path: None,
            remaining_findings,
        },
        QuarantineOutcome::Quarantined {
            records,
            lines,
            corrupt_path,
        } => RepairView {
            repaired: true,
            records,
            lines,
            corrupt_path: Some(corrupt_path.display().to_string()),
            remaining_findings,
        },
    };

    render_mode(
        output,
        &view,
        |v, w| {
            writeln!(
                w,
                "repaired={} records={} lines={} remaining={}",
                v.repaired, v.records, v.lines, v.remaining_findings
            )
        },
        |v, w| {
            if v.repaired {
                writeln!(w, "Quarantined {} torn record(s)", v.records)?;
                pretty_kv(w, "Lines moved", v.lines.to_string())?;
                if let Some(path) = &v.corrupt_path {
                    pretty_kv(w, "Moved to", path)?;
                }
            } else {
                writeln!(w, "No torn records found")?;
            }
            if v.remaining_findings > 0 {
                writeln!(
                    w,
                    "{} other problem(s) remain; run `chronicle validate`",
                    v.remaining_findings
                )?;
            }
            Ok(())
        },
    )
}

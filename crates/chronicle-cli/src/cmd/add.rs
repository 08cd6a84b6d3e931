//! `chronicle add`: append one entry to the log.

use crate::cmd::Journal;
use crate::output::{OutputMode, pretty_kv, render_mode};
use anyhow::{Context as _, Result};
use chrono::{NaiveDate, Utc};
use chronicle_core::entry::{DEFAULT_KIND, Entry, EntryId};
use clap::Args;
use serde::Serialize;
use std::io::{IsTerminal, Read};
use std::path::Path;

#[derive(Args, Debug)]
pub struct AddArgs {
    /// Entry type (`entry`, `win`, `decision`, ...).
    #[arg(short = 't', long = "type", default_value = DEFAULT_KIND)]
    pub kind: String,

    /// Tag to attach. Repeat or comma-separate.
    #[arg(long = "tag", value_delimiter = ',')]
    pub tags: Vec<String>,

    /// Person mentioned. Repeat or comma-separate.
    #[arg(short, long = "person", value_delimiter = ',')]
    pub people: Vec<String>,

    /// Date to revisit this entry (YYYY-MM-DD).
    #[arg(long)]
    pub review: Option<NaiveDate>,

    /// Id of a related entry.
    #[arg(long = "ref")]
    pub reference: Option<EntryId>,

    /// Entry text. Read from stdin when omitted.
    pub text: Vec<String>,
}

#[derive(Debug, Serialize)]
struct AddReport {
    id: String,
    timestamp: String,
    #[serde(rename = "type")]
    kind: String,
    lines: usize,
}

fn read_body(args: &AddArgs) -> Result<String> {
    if !args.text.is_empty() {
        return Ok(args.text.join(" "));
    }
    let stdin = std::io::stdin();
    if stdin.is_terminal() {
        eprintln!("Enter entry text, then Ctrl-D:");
    }
    let mut text = String::new();
    stdin
        .lock()
        .read_to_string(&mut text)
        .context("Failed to read entry text from stdin")?;
    Ok(text)
}

fn build_entry(args: &AddArgs, text: &str, journal: &Journal) -> Result<Entry> {
    let now = Utc::now();
    let offset = journal.config.chronicle.offset_at(now)?;
    let mut entry = Entry::new(args.kind.trim(), text, now.with_timezone(&offset))
        .with_tags(args.tags.iter().map(|t| t.trim()).filter(|t| !t.is_empty()))
        .with_people(
            args.people
                .iter()
                .map(|p| p.trim())
                .filter(|p| !p.is_empty()),
        );
    entry.review_date = args.review;
    entry.reference.clone_from(&args.reference);
    Ok(entry)
}

pub fn run_add(args: &AddArgs, dir: &Path, output: OutputMode) -> Result<()> {
    let journal = Journal::open(dir)?;
    let text = read_body(args)?;
    let entry = build_entry(args, &text, &journal)?;
    journal.store.append(&entry)?;

    let report = AddReport {
        id: entry.id.to_string(),
        timestamp: entry.timestamp.to_rfc3339(),
        kind: entry.kind.clone(),
        lines: entry.body.len(),
    };
    render_mode(
        output,
        &report,
        |r, w| writeln!(w, "{}", r.id),
        |r, w| {
            writeln!(w, "Added {}", r.id)?;
            pretty_kv(w, "Type", &r.kind)?;
            pretty_kv(w, "Time", &r.timestamp)
        },
    )
}

//! `chronicle list`: show recent entries.

use crate::cmd::Journal;
use crate::output::{OutputMode, pretty_rule, render_mode};
use anyhow::Result;
use chronicle_core::entry::Entry;
use clap::Args;
use std::path::Path;

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Maximum entries to show, newest last.
    #[arg(short = 'n', long, default_value = "20")]
    pub limit: usize,

    /// Only entries of this type.
    #[arg(short = 't', long = "type")]
    pub kind: Option<String>,

    /// Only entries carrying this tag.
    #[arg(long)]
    pub tag: Option<String>,

    /// Only entries mentioning this person.
    #[arg(short, long)]
    pub person: Option<String>,
}

fn matches(args: &ListArgs, entry: &Entry) -> bool {
    args.kind.as_deref().is_none_or(|k| entry.kind == k)
        && args.tag.as_deref().is_none_or(|t| entry.tags.contains(t))
        && args.person.as_deref().is_none_or(|p| entry.people.contains(p))
}

/// The last `limit` matching entries, in log order.
fn select(args: &ListArgs, entries: Vec<Entry>) -> Vec<Entry> {
    let mut selected: Vec<Entry> = entries.into_iter().filter(|e| matches(args, e)).collect();
    let skip = selected.len().saturating_sub(args.limit);
    selected.drain(..skip);
    selected
}

fn labels(entry: &Entry) -> String {
    let mut parts: Vec<String> = entry.tags.iter().map(|t| format!("#{t}")).collect();
    parts.extend(entry.people.iter().map(|p| format!("@{p}")));
    parts.join(" ")
}

pub fn run_list(args: &ListArgs, dir: &Path, output: OutputMode) -> Result<()> {
    let journal = Journal::open(dir)?;
    let entries = select(args, journal.store.load()?);

    render_mode(
        output,
        &entries,
        |list, w| {
            for e in list {
                writeln!(
                    w,
                    "{}\t{}\t{}\t{}",
                    e.id,
                    e.timestamp.to_rfc3339(),
                    e.kind,
                    e.headline()
                )?;
            }
            Ok(())
        },
        |list, w| {
            if list.is_empty() {
                return writeln!(w, "No entries");
            }
            for e in list {
                writeln!(
                    w,
                    "{}  {}  [{}]  {}",
                    e.id,
                    e.timestamp.format("%Y-%m-%d %H:%M %:z"),
                    e.kind,
                    labels(e)
                )?;
                for line in &e.body {
                    writeln!(w, "    {line}")?;
                }
                pretty_rule(w)?;
            }
            Ok(())
        },
    )
}

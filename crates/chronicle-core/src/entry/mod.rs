//! Journal entry data model and the textual log format.
//!
//! This module defines the [`Entry`] record, its [`EntryId`] merge key, and
//! the codec submodules that move entries in and out of the log format:
//!
//! ```text
//! @entry <id> <timestamp> <type> [tags] [people:a,b] [review:YYYY-MM-DD] [ref:<id>]
//! <body line 1>
//! <body line 2...>
//! @end
//! ```
//!
//! - [`parser`] decodes log text into entries and fails on any structural
//!   problem instead of dropping data.
//! - [`writer`] encodes entries, refusing anything the parser could not
//!   read back.
//! - [`validate`] scans a whole log and reports every problem it finds.

pub mod parser;
pub mod validate;
pub mod writer;

pub use parser::{FormatError, FormatErrorKind, decode};
pub use validate::{Finding, ValidationReport, validate};
pub use writer::{EncodeError, encode, encode_log};

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Type token written by the current CLI and bot when none is given.
pub const DEFAULT_KIND: &str = "entry";

/// Maximum length of the random suffix accepted in an [`EntryId`].
const MAX_SUFFIX_LEN: usize = 16;

// ---------------------------------------------------------------------------
// EntryId
// ---------------------------------------------------------------------------

/// Unique identifier of an entry: `YYYYMMDD-HHMM-xxxx`.
///
/// The prefix is the UTC creation minute; the suffix is random lowercase hex
/// (four characters when generated here). Two entries with the same id are
/// the same logical entry, whatever their content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntryId(String);

/// Returned when a string does not have the `YYYYMMDD-HHMM-xxxx` shape.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid entry id '{0}': expected YYYYMMDD-HHMM-<suffix>")]
pub struct InvalidEntryId(pub String);

impl EntryId {
    /// Parse and validate an id.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidEntryId`] if `raw` is not `8 digits - 4 digits -
    /// 1..=16 lowercase alphanumerics`.
    pub fn parse(raw: &str) -> Result<Self, InvalidEntryId> {
        if is_well_formed(raw) {
            Ok(Self(raw.to_string()))
        } else {
            Err(InvalidEntryId(raw.to_string()))
        }
    }

    /// Generate a fresh id for an entry created at `at`.
    #[must_use]
    pub fn generate(at: DateTime<Utc>) -> Self {
        Self::generate_with(at, &mut rand::thread_rng())
    }

    /// Generate an id drawing the suffix from `rng`.
    #[must_use]
    pub fn generate_with<R: RngCore + ?Sized>(at: DateTime<Utc>, rng: &mut R) -> Self {
        let mut suffix = [0u8; 2];
        rng.fill_bytes(&mut suffix);
        Self(format!(
            "{}-{:02x}{:02x}",
            at.format("%Y%m%d-%H%M"),
            suffix[0],
            suffix[1]
        ))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn is_well_formed(raw: &str) -> bool {
    let bytes = raw.as_bytes();
    if bytes.len() < 15 || bytes.len() > 14 + MAX_SUFFIX_LEN {
        return false;
    }
    bytes[..8].iter().all(u8::is_ascii_digit)
        && bytes[8] == b'-'
        && bytes[9..13].iter().all(u8::is_ascii_digit)
        && bytes[13] == b'-'
        && bytes[14..]
            .iter()
            .all(|b| b.is_ascii_digit() || b.is_ascii_lowercase())
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for EntryId {
    type Err = InvalidEntryId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for EntryId {
    type Error = InvalidEntryId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<EntryId> for String {
    fn from(id: EntryId) -> Self {
        id.0
    }
}

impl AsRef<str> for EntryId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ---------------------------------------------------------------------------
// Entry
// ---------------------------------------------------------------------------

/// One journal record.
///
/// Field order follows the header layout of the log format. `extra` holds
/// bracket fields this build does not understand, verbatim and in file order,
/// so that older builds can rewrite logs produced by newer ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub id: EntryId,

    /// Creation time with the writer's UTC offset. Immutable.
    pub timestamp: DateTime<FixedOffset>,

    /// The `type` token (`entry`, `win`, `decision`, ...).
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,

    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub people: BTreeSet<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_date: Option<NaiveDate>,

    /// Id of a related entry. Existence is not checked.
    #[serde(default, rename = "ref", skip_serializing_if = "Option::is_none")]
    pub reference: Option<EntryId>,

    /// Unrecognized bracket fields (content between the brackets).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra: Vec<String>,

    /// Body lines without leading or trailing blank lines.
    pub body: Vec<String>,
}

impl Entry {
    /// Create an entry stamped at `timestamp` with a freshly generated id.
    ///
    /// `text` is split into lines and blank lines at either end are dropped.
    #[must_use]
    pub fn new(kind: impl Into<String>, text: &str, timestamp: DateTime<FixedOffset>) -> Self {
        Self {
            id: EntryId::generate(timestamp.with_timezone(&Utc)),
            timestamp,
            kind: kind.into(),
            tags: BTreeSet::new(),
            people: BTreeSet::new(),
            review_date: None,
            reference: None,
            extra: Vec::new(),
            body: normalize_body(text.lines()),
        }
    }

    #[must_use]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn with_people<I, S>(mut self, people: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.people.extend(people.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn with_review_date(mut self, date: NaiveDate) -> Self {
        self.review_date = Some(date);
        self
    }

    #[must_use]
    pub fn with_reference(mut self, id: EntryId) -> Self {
        self.reference = Some(id);
        self
    }

    /// The body joined with `\n`.
    #[must_use]
    pub fn body_text(&self) -> String {
        self.body.join("\n")
    }

    /// First non-empty body line, used as a one-line summary.
    #[must_use]
    pub fn headline(&self) -> &str {
        self.body
            .iter()
            .map(String::as_str)
            .find(|line| !line.trim().is_empty())
            .unwrap_or_default()
    }
}

/// Drop blank lines at both ends; keep everything in between verbatim.
pub(crate) fn normalize_body<'a, I>(lines: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let lines: Vec<&str> = lines.into_iter().collect();
    let first = lines.iter().position(|l| !l.trim().is_empty());
    let last = lines.iter().rposition(|l| !l.trim().is_empty());
    match (first, last) {
        (Some(first), Some(last)) => lines[first..=last]
            .iter()
            .map(|l| (*l).to_string())
            .collect(),
        _ => Vec::new(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Log text parser.
//!
//! Decodes the line-oriented `@entry ... @end` format into [`Entry`] values.
//! The parser is strict about structure and tolerant about content:
//!
//! - A record opened by `@entry` must be closed by `@end` before the next
//!   `@entry` or end of input. An unterminated record is an error that points
//!   at the record's start line, which is how a torn append shows up.
//! - `id` and `timestamp` must be present and well formed; the body must have
//!   at least one non-empty line.
//! - Bracket fields are order-independent. Known prefixes are dispatched
//!   through [`FIELD_HANDLERS`]; bare content is the tag list; any other
//!   `prefix:value` content is kept verbatim in [`Entry::extra`].
//! - Blank lines and `#` comment lines between records are ignored. Any other
//!   text outside a record is an error rather than silently skipped.

use std::collections::BTreeSet;
use std::fmt;
use std::ops::ControlFlow;

use chrono::{DateTime, NaiveDate};

use super::{Entry, EntryId, normalize_body};

/// First token of a record's start line.
pub const ENTRY_MARKER: &str = "@entry";

/// The line that closes a record.
pub const END_MARKER: &str = "@end";

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// A structural problem in log text, with its 1-based line number.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("line {line}: {kind}")]
pub struct FormatError {
    pub line: usize,
    pub kind: FormatErrorKind,
}

impl FormatError {
    #[must_use]
    pub const fn new(line: usize, kind: FormatErrorKind) -> Self {
        Self { line, kind }
    }
}

/// What went wrong at a [`FormatError`]'s line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatErrorKind {
    /// A record opened on this line has no `@end`.
    UnterminatedEntry {
        /// The record's id, if its header was readable.
        id: Option<String>,
    },
    /// `@end` with no open record.
    OrphanEnd,
    /// The start line lacks a required positional field.
    MissingField(&'static str),
    /// The id token is not `YYYYMMDD-HHMM-xxxx`.
    InvalidId(String),
    /// The timestamp is not ISO-8601 with a UTC offset.
    InvalidTimestamp(String),
    /// The type token contains a bracket.
    InvalidType(String),
    /// More positional tokens than `id timestamp type`.
    UnexpectedToken(String),
    /// A `[` without a closing `]`, or a nested `[`.
    UnclosedBracket(String),
    /// `[review:...]` is not a `YYYY-MM-DD` date.
    InvalidReviewDate(String),
    /// `[ref:...]` is not a well-formed entry id.
    InvalidReference(String),
    /// The record has no non-empty body line.
    EmptyBody { id: String },
    /// Non-blank, non-comment text outside any record.
    TextOutsideEntry(String),
    /// The id was already used earlier in the log (reported by `validate`).
    DuplicateId { id: String, first_line: usize },
}

impl fmt::Display for FormatErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnterminatedEntry { id: Some(id) } => {
                write!(f, "entry '{id}' opened here has no closing @end")
            }
            Self::UnterminatedEntry { id: None } => {
                write!(f, "@entry opened here has no closing @end")
            }
            Self::OrphanEnd => write!(f, "@end without matching @entry"),
            Self::MissingField(field) => write!(f, "@entry header is missing the {field}"),
            Self::InvalidId(raw) => write!(f, "invalid entry id '{raw}'"),
            Self::InvalidTimestamp(raw) => {
                write!(f, "invalid timestamp '{raw}' (expected ISO-8601 with offset)")
            }
            Self::InvalidType(raw) => write!(f, "invalid entry type '{raw}'"),
            Self::UnexpectedToken(raw) => write!(f, "unexpected header token '{raw}'"),
            Self::UnclosedBracket(raw) => write!(f, "unbalanced bracket field '{raw}'"),
            Self::InvalidReviewDate(raw) => write!(f, "invalid review date '{raw}'"),
            Self::InvalidReference(raw) => write!(f, "invalid ref id '{raw}'"),
            Self::EmptyBody { id } => write!(f, "entry '{id}' has an empty body"),
            Self::TextOutsideEntry(raw) => write!(f, "text outside any entry: '{raw}'"),
            Self::DuplicateId { id, first_line } => {
                write!(f, "duplicate id '{id}' (first used on line {first_line})")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Line classification
// ---------------------------------------------------------------------------

/// `true` if `line` opens a record.
#[must_use]
pub fn is_start_marker(line: &str) -> bool {
    line.strip_prefix(ENTRY_MARKER)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with(char::is_whitespace))
}

/// `true` if `line` is a cut-off start marker (`@`, `@e`, ... `@entr`), as
/// left by a write that died inside the marker itself.
#[must_use]
pub fn is_torn_marker(line: &str) -> bool {
    let line = line.trim_end();
    !line.is_empty() && line.len() < ENTRY_MARKER.len() && ENTRY_MARKER.starts_with(line)
}

/// `true` if `line` closes a record.
#[must_use]
pub fn is_end_marker(line: &str) -> bool {
    line.trim_end() == END_MARKER
}

// ---------------------------------------------------------------------------
// Header parsing
// ---------------------------------------------------------------------------

/// Signature shared by the prefixed bracket field handlers.
type FieldHandler = fn(&mut Entry, &str) -> Result<(), FormatErrorKind>;

/// Prefixed bracket fields understood by this build.
///
/// Anything else of the form `[prefix:value]` lands in [`Entry::extra`].
pub const FIELD_HANDLERS: &[(&str, FieldHandler)] = &[
    ("people", parse_people),
    ("review", parse_review),
    ("ref", parse_ref),
];

/// `true` if `prefix` has a handler in [`FIELD_HANDLERS`].
#[must_use]
pub fn is_known_prefix(prefix: &str) -> bool {
    FIELD_HANDLERS.iter().any(|(known, _)| *known == prefix)
}

fn split_list(value: &str) -> impl Iterator<Item = String> + '_ {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
}

fn parse_people(entry: &mut Entry, value: &str) -> Result<(), FormatErrorKind> {
    entry.people.extend(split_list(value));
    Ok(())
}

fn parse_review(entry: &mut Entry, value: &str) -> Result<(), FormatErrorKind> {
    let raw = value.trim();
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| FormatErrorKind::InvalidReviewDate(raw.to_string()))?;
    entry.review_date = Some(date);
    Ok(())
}

fn parse_ref(entry: &mut Entry, value: &str) -> Result<(), FormatErrorKind> {
    let raw = value.trim();
    let id = EntryId::parse(raw).map_err(|_| FormatErrorKind::InvalidReference(raw.to_string()))?;
    entry.reference = Some(id);
    Ok(())
}

/// Route one bracket field's content to tags, a handler, or `extra`.
fn apply_bracket(entry: &mut Entry, content: &str) -> Result<(), FormatErrorKind> {
    match content.split_once(':') {
        Some((prefix, value)) => {
            match FIELD_HANDLERS.iter().find(|(known, _)| *known == prefix) {
                Some((_, handler)) => handler(entry, value),
                None => {
                    entry.extra.push(content.to_string());
                    Ok(())
                }
            }
        }
        None => {
            entry.tags.extend(split_list(content));
            Ok(())
        }
    }
}

/// Split the text after `@entry` into positional tokens and bracket contents.
fn tokenize(rest: &str) -> Result<(Vec<&str>, Vec<&str>), FormatErrorKind> {
    let mut positional = Vec::new();
    let mut brackets = Vec::new();
    let mut rest = rest.trim_start();

    while !rest.is_empty() {
        if let Some(after) = rest.strip_prefix('[') {
            let Some(close) = after.find(']') else {
                return Err(FormatErrorKind::UnclosedBracket(rest.to_string()));
            };
            let content = &after[..close];
            if content.contains('[') {
                return Err(FormatErrorKind::UnclosedBracket(format!("[{content}]")));
            }
            brackets.push(content);
            rest = &after[close + 1..];
        } else {
            let end = rest
                .find(|c: char| c.is_whitespace() || c == '[')
                .unwrap_or(rest.len());
            positional.push(&rest[..end]);
            rest = &rest[end..];
        }
        rest = rest.trim_start();
    }

    Ok((positional, brackets))
}

/// Parse a start line into an [`Entry`] with an empty body.
///
/// # Errors
///
/// Returns a [`FormatError`] located at `line_no` if required fields are
/// missing or malformed, or a bracket field cannot be read.
pub fn parse_header(line: &str, line_no: usize) -> Result<Entry, FormatError> {
    let err = |kind| FormatError::new(line_no, kind);

    let rest = line
        .strip_prefix(ENTRY_MARKER)
        .filter(|rest| rest.is_empty() || rest.starts_with(char::is_whitespace))
        .ok_or_else(|| err(FormatErrorKind::MissingField("@entry marker")))?;

    let (positional, brackets) = tokenize(rest).map_err(err)?;
    let mut positional = positional.into_iter();

    let raw_id = positional
        .next()
        .ok_or_else(|| err(FormatErrorKind::MissingField("id")))?;
    let id =
        EntryId::parse(raw_id).map_err(|_| err(FormatErrorKind::InvalidId(raw_id.to_string())))?;

    let raw_ts = positional
        .next()
        .ok_or_else(|| err(FormatErrorKind::MissingField("timestamp")))?;
    let timestamp = DateTime::parse_from_rfc3339(raw_ts)
        .map_err(|_| err(FormatErrorKind::InvalidTimestamp(raw_ts.to_string())))?;

    let kind = positional
        .next()
        .ok_or_else(|| err(FormatErrorKind::MissingField("type")))?;
    if kind.contains(']') {
        return Err(err(FormatErrorKind::InvalidType(kind.to_string())));
    }

    if let Some(extra) = positional.next() {
        return Err(err(FormatErrorKind::UnexpectedToken(extra.to_string())));
    }

    let mut entry = Entry {
        id,
        timestamp,
        kind: kind.to_string(),
        tags: BTreeSet::new(),
        people: BTreeSet::new(),
        review_date: None,
        reference: None,
        extra: Vec::new(),
        body: Vec::new(),
    };

    for content in brackets {
        apply_bracket(&mut entry, content).map_err(err)?;
    }

    Ok(entry)
}

// ---------------------------------------------------------------------------
// Scanner
// ---------------------------------------------------------------------------

/// A record whose `@end` has not been seen yet.
struct OpenRecord<'a> {
    start_line: usize,
    /// `None` when the header failed to parse (already reported).
    entry: Option<Entry>,
    body: Vec<&'a str>,
}

impl OpenRecord<'_> {
    fn unterminated(&self) -> FormatError {
        FormatError::new(
            self.start_line,
            FormatErrorKind::UnterminatedEntry {
                id: self.entry.as_ref().map(|e| e.id.to_string()),
            },
        )
    }
}

/// Walk `input` once, handing every problem to `on_error`.
///
/// Returns the complete records found, each with its start line. Stops early
/// if `on_error` returns [`ControlFlow::Break`].
pub(crate) fn scan<F>(input: &str, mut on_error: F) -> Vec<(usize, Entry)>
where
    F: FnMut(FormatError) -> ControlFlow<()>,
{
    let mut entries = Vec::new();
    let mut open: Option<OpenRecord<'_>> = None;

    macro_rules! report {
        ($error:expr) => {
            if on_error($error).is_break() {
                return entries;
            }
        };
    }

    for (i, raw) in input.lines().enumerate() {
        let line_no = i + 1;
        let line = raw.trim_end_matches('\r');

        if is_start_marker(line) {
            if let Some(previous) = open.take() {
                report!(previous.unterminated());
            }
            let entry = match parse_header(line, line_no) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    report!(e);
                    None
                }
            };
            open = Some(OpenRecord {
                start_line: line_no,
                entry,
                body: Vec::new(),
            });
        } else if is_end_marker(line) {
            let Some(record) = open.take() else {
                report!(FormatError::new(line_no, FormatErrorKind::OrphanEnd));
                continue;
            };
            let Some(mut entry) = record.entry else {
                continue;
            };
            entry.body = normalize_body(record.body);
            if entry.body.is_empty() {
                report!(FormatError::new(
                    record.start_line,
                    FormatErrorKind::EmptyBody {
                        id: entry.id.to_string(),
                    },
                ));
                continue;
            }
            entries.push((record.start_line, entry));
        } else if let Some(record) = open.as_mut() {
            record.body.push(line);
        } else if !line.trim().is_empty() && !line.starts_with('#') {
            report!(FormatError::new(
                line_no,
                FormatErrorKind::TextOutsideEntry(truncate(line)),
            ));
        }
    }

    if let Some(record) = open {
        report!(record.unterminated());
    }

    entries
}

fn truncate(line: &str) -> String {
    const MAX: usize = 60;
    if line.chars().count() <= MAX {
        line.to_string()
    } else {
        let head: String = line.chars().take(MAX).collect();
        format!("{head}...")
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Decode a whole log into its entries, in file order.
///
/// # Errors
///
/// Returns the first [`FormatError`] encountered. Nothing is returned for a
/// log that has any structural problem.
pub fn decode(input: &str) -> Result<Vec<Entry>, FormatError> {
    let mut first_error = None;
    let entries = scan(input, |e| {
        first_error = Some(e);
        ControlFlow::Break(())
    });
    match first_error {
        Some(e) => Err(e),
        None => Ok(entries.into_iter().map(|(_, entry)| entry).collect()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const BASIC: &str = "\
@entry 20260101-1200-ab12 2026-01-01T12:00:00+00:00 win [coding,rust]
Great day.
@end
";

    #[test]
    fn cut_off_markers_are_recognized() {
        for cut in ["@", "@e", "@en", "@ent", "@entr", "@entr\r"] {
            assert!(is_torn_marker(cut), "{cut:?}");
        }
        for other in ["", "@entry", "@end", "@x", "email me", "#@en"] {
            assert!(!is_torn_marker(other), "{other:?}");
        }
    }

    #[test]
    fn decode_basic_entry() {
        let entries = decode(BASIC).expect("should parse");
        assert_eq!(entries.len(), 1);
        let e = &entries[0];
        assert_eq!(e.id.as_str(), "20260101-1200-ab12");
        assert_eq!(e.kind, "win");
        assert_eq!(
            e.tags.iter().map(String::as_str).collect::<Vec<_>>(),
            ["coding", "rust"]
        );
        assert_eq!(e.body, vec!["Great day."]);
    }

    #[test]
    fn decode_all_header_fields_in_any_order() {
        let text = "\
@entry 20260101-1200-ab12 2026-01-01T12:00:00-05:00 decision [ref:20251231-0800-cd34] [review:2026-02-01] [people:Alice, Bob] [work]
Pick the vendor.
@end
";
        let e = &decode(text).expect("should parse")[0];
        assert!(e.people.contains("Alice") && e.people.contains("Bob"));
        assert_eq!(
            e.review_date,
            Some(NaiveDate::from_ymd_opt(2026, 2, 1).expect("date"))
        );
        assert_eq!(
            e.reference.as_ref().map(EntryId::as_str),
            Some("20251231-0800-cd34")
        );
        assert!(e.tags.contains("work"));
        assert_eq!(e.timestamp.offset().local_minus_utc(), -5 * 3600);
    }

    #[test]
    fn decode_minimal_header() {
        let text = "@entry 20260101-1200-ab12 2026-01-01T12:00:00+00:00 entry\nx\n@end\n";
        let e = &decode(text).expect("should parse")[0];
        assert!(e.tags.is_empty() && e.people.is_empty());
        assert!(e.review_date.is_none() && e.reference.is_none());
    }

    #[test]
    fn decode_multiple_entries_with_separators_and_comments() {
        let text = "\
# chronicle log

@entry 20260101-1200-ab12 2026-01-01T12:00:00+00:00 win
First.
@end


@entry 20260102-0800-cd34 2026-01-02T08:00:00+00:00 block
Second.
@end
";
        let entries = decode(text).expect("should parse");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].body, vec!["Second."]);
    }

    #[test]
    fn unknown_bracket_fields_are_preserved() {
        let text = "\
@entry 20260101-1200-ab12 2026-01-01T12:00:00+00:00 entry [mood:good] [work] [energy: 4/5]
Body.
@end
";
        let e = &decode(text).expect("should parse")[0];
        assert_eq!(e.extra, vec!["mood:good", "energy: 4/5"]);
        assert!(e.tags.contains("work"));
    }

    #[test]
    fn body_keeps_internal_whitespace_and_drops_edge_blank_lines() {
        let text = "\
@entry 20260101-1200-ab12 2026-01-01T12:00:00+00:00 entry

  indented
\tTabbed

last line

@end
";
        let e = &decode(text).expect("should parse")[0];
        assert_eq!(e.body, vec!["  indented", "\tTabbed", "", "last line"]);
    }

    #[test]
    fn crlf_input_is_accepted() {
        let text = "@entry 20260101-1200-ab12 2026-01-01T12:00:00+00:00 win\r\nBody\r\n@end\r\n";
        let e = &decode(text).expect("should parse")[0];
        assert_eq!(e.body, vec!["Body"]);
    }

    #[test]
    fn empty_input_is_an_empty_log() {
        assert!(decode("").expect("empty").is_empty());
        assert!(decode("\n\n# only comments\n").expect("blank").is_empty());
    }

    #[test]
    fn missing_end_at_eof_points_at_start_line() {
        let text = "\
@entry 20260101-1200-ab12 2026-01-01T12:00:00+00:00 win
ok
@end

@entry 20260102-0800-cd34 2026-01-02T08:00:00+00:00 block
Torn
";
        let err = decode(text).expect_err("should fail");
        assert_eq!(err.line, 5);
        assert_eq!(
            err.kind,
            FormatErrorKind::UnterminatedEntry {
                id: Some("20260102-0800-cd34".into())
            }
        );
    }

    #[test]
    fn missing_end_before_next_entry() {
        let text = "\
@entry 20260101-1200-ab12 2026-01-01T12:00:00+00:00 win
First.
@entry 20260102-0800-cd34 2026-01-02T08:00:00+00:00 block
Second.
@end
";
        let err = decode(text).expect_err("should fail");
        assert_eq!(err.line, 1);
        assert!(matches!(err.kind, FormatErrorKind::UnterminatedEntry { .. }));
    }

    #[test]
    fn orphan_end_is_rejected() {
        let err = decode("@end\n").expect_err("should fail");
        assert_eq!(err, FormatError::new(1, FormatErrorKind::OrphanEnd));
    }

    #[test]
    fn missing_fields_are_rejected() {
        let err = decode("@entry 20260101-1200-ab12\nBody.\n@end\n").expect_err("should fail");
        assert_eq!(err.kind, FormatErrorKind::MissingField("timestamp"));

        let err = decode("@entry\nBody.\n@end\n").expect_err("should fail");
        assert_eq!(err.kind, FormatErrorKind::MissingField("id"));

        let err = decode("@entry 20260101-1200-ab12 2026-01-01T12:00:00+00:00\nB\n@end\n")
            .expect_err("should fail");
        assert_eq!(err.kind, FormatErrorKind::MissingField("type"));
    }

    #[test]
    fn malformed_id_and_timestamp_are_rejected() {
        let err = decode("@entry nope 2026-01-01T12:00:00+00:00 win\nB\n@end\n")
            .expect_err("should fail");
        assert_eq!(err.kind, FormatErrorKind::InvalidId("nope".into()));

        let err = decode("@entry 20260101-1200-ab12 not-a-timestamp win\nB\n@end\n")
            .expect_err("should fail");
        assert!(matches!(err.kind, FormatErrorKind::InvalidTimestamp(_)));

        // Offset is required.
        let err = decode("@entry 20260101-1200-ab12 2026-01-01T12:00:00 win\nB\n@end\n")
            .expect_err("should fail");
        assert!(matches!(err.kind, FormatErrorKind::InvalidTimestamp(_)));
    }

    #[test]
    fn empty_body_is_rejected_at_start_line() {
        let text = "\n@entry 20260101-1200-ab12 2026-01-01T12:00:00+00:00 win\n\n   \n@end\n";
        let err = decode(text).expect_err("should fail");
        assert_eq!(err.line, 2);
        assert!(matches!(err.kind, FormatErrorKind::EmptyBody { .. }));
    }

    #[test]
    fn bad_bracket_fields_are_rejected() {
        let err = decode("@entry 20260101-1200-ab12 2026-01-01T12:00:00+00:00 win [open\nB\n@end\n")
            .expect_err("should fail");
        assert!(matches!(err.kind, FormatErrorKind::UnclosedBracket(_)));

        let err = decode(
            "@entry 20260101-1200-ab12 2026-01-01T12:00:00+00:00 win [review:soon]\nB\n@end\n",
        )
        .expect_err("should fail");
        assert_eq!(err.kind, FormatErrorKind::InvalidReviewDate("soon".into()));

        let err =
            decode("@entry 20260101-1200-ab12 2026-01-01T12:00:00+00:00 win [ref:x]\nB\n@end\n")
                .expect_err("should fail");
        assert_eq!(err.kind, FormatErrorKind::InvalidReference("x".into()));
    }

    #[test]
    fn extra_positional_token_is_rejected() {
        let err =
            decode("@entry 20260101-1200-ab12 2026-01-01T12:00:00+00:00 win stray\nB\n@end\n")
                .expect_err("should fail");
        assert_eq!(err.kind, FormatErrorKind::UnexpectedToken("stray".into()));
    }

    #[test]
    fn bracket_in_type_is_rejected() {
        let err = decode("@entry 20260101-1200-ab12 2026-01-01T12:00:00+00:00 win]\nB\n@end\n")
            .expect_err("should fail");
        assert_eq!(err.kind, FormatErrorKind::InvalidType("win]".into()));
    }

    #[test]
    fn text_outside_entries_is_rejected() {
        let err = decode("lost line\n").expect_err("should fail");
        assert!(matches!(err.kind, FormatErrorKind::TextOutsideEntry(_)));
    }

    #[test]
    fn marker_detection() {
        assert!(is_start_marker("@entry"));
        assert!(is_start_marker("@entry 2026"));
        assert!(!is_start_marker("@entryway"));
        assert!(is_end_marker("@end"));
        assert!(is_end_marker("@end  "));
        assert!(!is_end_marker("@ending"));
        assert!(!is_end_marker(" @end"));
    }

    #[test]
    fn error_display_includes_line() {
        let err = FormatError::new(7, FormatErrorKind::OrphanEnd);
        assert_eq!(err.to_string(), "line 7: @end without matching @entry");
    }

    #[test]
    fn no_panic_on_garbage() {
        let inputs = [
            "@entry",
            "@entry [",
            "@entry ]]]",
            "@entry 20260101-1200-ab12 2026-01-01T12:00:00+00:00 win [a][b][",
            "@end\n@end\n@entry\n",
            "\u{0}\u{1}@entry \t\t",
            "@entry 20260101-1200-ab12 \u{1F600} win\n\u{1F600}\n@end",
        ];
        for input in inputs {
            let _ = decode(input);
        }
    }
}

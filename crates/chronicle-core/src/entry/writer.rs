//! Log text writer.
//!
//! Serializes [`Entry`] values to the record format read by
//! [`super::parser`]. Guarantees:
//!
//! - Round-trip: anything [`encode`] accepts decodes back to an equal entry.
//! - Deterministic: tags and people are written sorted; unknown fields keep
//!   their original order.
//! - Refusal over repair: an entry that would not survive a round trip is an
//!   [`EncodeError`], never silently altered.

use chrono::{Datelike, SecondsFormat};

use super::Entry;
use super::parser::{END_MARKER, ENTRY_MARKER, is_end_marker, is_known_prefix, is_start_marker};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Reasons an entry cannot be written to the log.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    #[error("entry {id}: body is empty")]
    EmptyBody { id: String },

    #[error("entry {id}: body starts or ends with a blank line")]
    UnnormalizedBody { id: String },

    #[error("entry {id}: body line {index} {reason}")]
    BodyLine {
        id: String,
        index: usize,
        reason: &'static str,
    },

    #[error("entry {id}: type '{kind}' must be a single non-empty token")]
    InvalidKind { id: String, kind: String },

    #[error("entry {id}: tag '{tag}' cannot be written")]
    InvalidTag { id: String, tag: String },

    #[error("entry {id}: person '{person}' cannot be written")]
    InvalidPerson { id: String, person: String },

    #[error("entry {id}: unknown field '{field}' cannot be written")]
    InvalidExtra { id: String, field: String },

    #[error("entry {id}: timestamp year is outside 0000-9999")]
    TimestampOutOfRange { id: String },
}

// ---------------------------------------------------------------------------
// Checks
// ---------------------------------------------------------------------------

fn has_edge_whitespace(value: &str) -> bool {
    value.trim() != value
}

fn has_line_break(value: &str) -> bool {
    value.contains(['\n', '\r'])
}

fn valid_list_item(item: &str, forbidden: &[char]) -> bool {
    !item.is_empty()
        && !has_edge_whitespace(item)
        && !has_line_break(item)
        && !item.contains([',', '[', ']'])
        && !item.contains(forbidden)
}

fn check(entry: &Entry) -> Result<(), EncodeError> {
    let id = || entry.id.to_string();

    if !(0..=9999).contains(&entry.timestamp.year()) {
        return Err(EncodeError::TimestampOutOfRange { id: id() });
    }

    let kind = entry.kind.as_str();
    if kind.is_empty() || kind.contains(|c: char| c.is_whitespace() || c == '[' || c == ']') {
        return Err(EncodeError::InvalidKind {
            id: id(),
            kind: kind.to_string(),
        });
    }

    if let Some(tag) = entry.tags.iter().find(|t| !valid_list_item(t, &[':'])) {
        return Err(EncodeError::InvalidTag {
            id: id(),
            tag: tag.clone(),
        });
    }

    if let Some(person) = entry.people.iter().find(|p| !valid_list_item(p, &[])) {
        return Err(EncodeError::InvalidPerson {
            id: id(),
            person: person.clone(),
        });
    }

    for field in &entry.extra {
        let readable = field
            .split_once(':')
            .is_some_and(|(prefix, _)| !is_known_prefix(prefix))
            && !has_line_break(field)
            && !field.contains(['[', ']']);
        if !readable {
            return Err(EncodeError::InvalidExtra {
                id: id(),
                field: field.clone(),
            });
        }
    }

    let (Some(first), Some(last)) = (entry.body.first(), entry.body.last()) else {
        return Err(EncodeError::EmptyBody { id: id() });
    };
    if first.trim().is_empty() || last.trim().is_empty() {
        return Err(EncodeError::UnnormalizedBody { id: id() });
    }

    for (index, line) in entry.body.iter().enumerate() {
        let reason = if line.contains('\n') || line.ends_with('\r') {
            Some("contains a line break")
        } else if is_start_marker(line) {
            Some("would open a new record")
        } else if is_end_marker(line) {
            Some("would close the record")
        } else {
            None
        };
        if let Some(reason) = reason {
            return Err(EncodeError::BodyLine {
                id: id(),
                index: index + 1,
                reason,
            });
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Serialize one entry as a record, `@end` line included, newline-terminated.
///
/// # Errors
///
/// Returns an [`EncodeError`] if the entry could not be decoded back
/// unchanged.
pub fn encode(entry: &Entry) -> Result<String, EncodeError> {
    check(entry)?;

    let mut out = format!(
        "{ENTRY_MARKER} {} {} {}",
        entry.id,
        entry.timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, false),
        entry.kind,
    );

    if !entry.tags.is_empty() {
        let tags: Vec<&str> = entry.tags.iter().map(String::as_str).collect();
        out.push_str(&format!(" [{}]", tags.join(",")));
    }
    if !entry.people.is_empty() {
        let people: Vec<&str> = entry.people.iter().map(String::as_str).collect();
        out.push_str(&format!(" [people:{}]", people.join(",")));
    }
    if let Some(date) = entry.review_date {
        out.push_str(&format!(" [review:{}]", date.format("%Y-%m-%d")));
    }
    if let Some(reference) = &entry.reference {
        out.push_str(&format!(" [ref:{reference}]"));
    }
    for field in &entry.extra {
        out.push_str(&format!(" [{field}]"));
    }
    out.push('\n');

    for line in &entry.body {
        out.push_str(line);
        out.push('\n');
    }
    out.push_str(END_MARKER);
    out.push('\n');

    Ok(out)
}

/// Serialize a whole log: records in the given order, separated by a blank
/// line. An empty slice gives an empty string.
///
/// # Errors
///
/// Returns the first [`EncodeError`]; nothing is produced in that case.
pub fn encode_log(entries: &[Entry]) -> Result<String, EncodeError> {
    let mut out = String::new();
    for (i, entry) in entries.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        out.push_str(&encode(entry)?);
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{EntryId, decode};
    use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone};

    fn ts() -> DateTime<FixedOffset> {
        FixedOffset::west_opt(5 * 3600)
            .expect("offset")
            .with_ymd_and_hms(2026, 3, 1, 18, 45, 0)
            .single()
            .expect("timestamp")
    }

    fn sample() -> Entry {
        let mut entry = Entry::new("decision", "Chose plan B.\n\n  because reasons", ts())
            .with_tags(["work", "planning"])
            .with_people(["Bob", "Alice"])
            .with_review_date(NaiveDate::from_ymd_opt(2026, 4, 1).expect("date"))
            .with_reference(EntryId::parse("20260228-1000-ab12").expect("id"));
        entry.id = EntryId::parse("20260301-2345-cd34").expect("id");
        entry.extra.push("mood:calm".into());
        entry
    }

    #[test]
    fn encode_writes_canonical_header() {
        let text = encode(&sample()).expect("encode");
        let header = text.lines().next().expect("header");
        assert_eq!(
            header,
            "@entry 20260301-2345-cd34 2026-03-01T18:45:00-05:00 decision \
             [planning,work] [people:Alice,Bob] [review:2026-04-01] \
             [ref:20260228-1000-ab12] [mood:calm]"
        );
        assert!(text.ends_with("  because reasons\n@end\n"));
    }

    #[test]
    fn encode_then_decode_is_identity() {
        let entry = sample();
        let decoded = decode(&encode(&entry).expect("encode")).expect("decode");
        assert_eq!(decoded, vec![entry]);
    }

    #[test]
    fn subsecond_timestamps_survive() {
        let mut entry = sample();
        entry.timestamp = DateTime::parse_from_rfc3339("2026-03-01T18:45:00.123456+05:30")
            .expect("timestamp");
        let decoded = decode(&encode(&entry).expect("encode")).expect("decode");
        assert_eq!(decoded[0].timestamp, entry.timestamp);
    }

    #[test]
    fn encode_log_separates_records_with_blank_line() {
        let a = sample();
        let mut b = Entry::new("win", "Second", ts());
        b.id = EntryId::parse("20260301-2346-ef56").expect("id");
        let text = encode_log(&[a.clone(), b.clone()]).expect("encode");
        assert!(text.contains("@end\n\n@entry 20260301-2346-ef56"));
        assert_eq!(decode(&text).expect("decode"), vec![a, b]);
        assert_eq!(encode_log(&[]).expect("empty"), "");
    }

    #[test]
    fn rejects_empty_and_unnormalized_bodies() {
        let mut entry = sample();
        entry.body.clear();
        assert!(matches!(encode(&entry), Err(EncodeError::EmptyBody { .. })));

        entry.body = vec![String::new(), "x".into()];
        assert!(matches!(
            encode(&entry),
            Err(EncodeError::UnnormalizedBody { .. })
        ));
    }

    #[test]
    fn rejects_marker_lines_in_body() {
        for line in ["@end", "@entry 20260101-1200-ab12", "a\nb", "ab\r"] {
            let mut entry = sample();
            entry.body = vec!["ok".into(), line.into(), "ok".into()];
            assert!(
                matches!(encode(&entry), Err(EncodeError::BodyLine { index: 2, .. })),
                "{line:?} should be rejected"
            );
        }
        // Not markers.
        let mut entry = sample();
        entry.body = vec![
            "@entryway".into(),
            " @end".into(),
            "@ending".into(),
            "a\rb".into(),
        ];
        let decoded = decode(&encode(&entry).expect("encode")).expect("decode");
        assert_eq!(decoded[0].body, entry.body);
    }

    #[test]
    fn rejects_unwritable_metadata() {
        let mut entry = sample();
        entry.kind = "two words".into();
        assert!(matches!(encode(&entry), Err(EncodeError::InvalidKind { .. })));

        for tag in ["", " padded", "a,b", "x]", "key:value"] {
            let mut entry = sample();
            entry.tags.insert(tag.into());
            assert!(
                matches!(encode(&entry), Err(EncodeError::InvalidTag { .. })),
                "{tag:?}"
            );
        }

        let mut entry = sample();
        entry.people.insert("A, B".into());
        assert!(matches!(
            encode(&entry),
            Err(EncodeError::InvalidPerson { .. })
        ));

        for field in ["nocolon", "people:x", "ref:x", "a:[b]"] {
            let mut entry = sample();
            entry.extra = vec![field.into()];
            assert!(
                matches!(encode(&entry), Err(EncodeError::InvalidExtra { .. })),
                "{field:?}"
            );
        }
    }

    #[test]
    fn people_may_contain_colons() {
        let mut entry = sample();
        entry.people.insert("Dr: Who".into());
        let decoded = decode(&encode(&entry).expect("encode")).expect("decode");
        assert!(decoded[0].people.contains("Dr: Who"));
    }
}

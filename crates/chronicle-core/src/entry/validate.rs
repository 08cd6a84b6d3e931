//! Whole-log linting.
//!
//! [`validate`] walks the full text once and collects every structural
//! problem instead of stopping at the first. It also reports duplicate ids,
//! which [`super::decode`] accepts because a log with a repeated id is still
//! readable.
//!
//! ```
//! use chronicle_core::entry::validate;
//!
//! let findings = validate("@end\n");
//! for (line, error) in &findings {
//!     println!("line {line}: {}", error.kind);
//! }
//! assert_eq!(findings.len(), 1);
//! ```

use std::collections::HashMap;
use std::ops::ControlFlow;

use super::parser::{FormatError, FormatErrorKind, scan};

/// One problem found by [`validate`]: the 1-based line and the error there.
pub type Finding = (usize, FormatError);

/// Summary of a [`validate`] run, for callers that want counts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    /// Complete records that parsed cleanly.
    pub entries: usize,
    /// Every problem found, ordered by line.
    pub findings: Vec<Finding>,
}

impl ValidationReport {
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.findings.is_empty()
    }
}

/// Scan `input` and report every structural violation, sorted by line.
///
/// Never fails and never panics; an empty result means the log is clean.
#[must_use]
pub fn validate(input: &str) -> Vec<Finding> {
    report(input).findings
}

/// Like [`validate`], also counting the records that parsed cleanly.
#[must_use]
pub fn report(input: &str) -> ValidationReport {
    let mut findings: Vec<Finding> = Vec::new();
    let entries = scan(input, |error| {
        findings.push((error.line, error));
        ControlFlow::Continue(())
    });

    let mut first_seen: HashMap<&str, usize> = HashMap::with_capacity(entries.len());
    for (line, entry) in &entries {
        match first_seen.get(entry.id.as_str()) {
            Some(&first_line) => findings.push((
                *line,
                FormatError::new(
                    *line,
                    FormatErrorKind::DuplicateId {
                        id: entry.id.to_string(),
                        first_line,
                    },
                ),
            )),
            None => {
                first_seen.insert(entry.id.as_str(), *line);
            }
        }
    }

    findings.sort_by_key(|(line, _)| *line);

    ValidationReport {
        entries: entries.len(),
        findings,
    }
}

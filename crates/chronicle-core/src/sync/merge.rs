//! Id-keyed merge planning.
//!
//! Pure functions over decoded entries; no I/O. The merge policy is
//! append-only and idempotent:
//!
//! - An entry whose id is already local is skipped, whatever its content.
//! - A skipped entry whose content differs from the local copy is reported as
//!   diverged. It is never applied.
//! - A remote log that repeats an id contributes only its first copy.
//! - New entries keep their remote relative order.

use std::collections::{HashMap, HashSet};

use crate::entry::{Entry, EntryId};

/// What a pull would do to the local log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergePlan {
    /// Entries to append, in remote order.
    pub to_append: Vec<Entry>,
    /// Remote entries whose id is already local.
    pub skipped: usize,
    /// Ids present on both sides with different content.
    pub diverged: Vec<EntryId>,
    /// Later copies of an id the remote log already contained.
    pub duplicates_in_remote: usize,
}

/// Plan an id-keyed, append-only merge of `remote` into `local`.
///
/// Builds the local index in one pass over `local`.
#[must_use]
pub fn plan_pull(local: &[Entry], remote: Vec<Entry>) -> MergePlan {
    let index: HashMap<&EntryId, &Entry> = local.iter().map(|e| (&e.id, e)).collect();
    let mut seen_remote: HashSet<EntryId> = HashSet::with_capacity(remote.len());
    let mut plan = MergePlan::default();

    for entry in remote {
        if let Some(existing) = index.get(&entry.id) {
            plan.skipped += 1;
            if *existing != &entry && !plan.diverged.contains(&entry.id) {
                plan.diverged.push(entry.id.clone());
            }
            continue;
        }
        if !seen_remote.insert(entry.id.clone()) {
            plan.duplicates_in_remote += 1;
            continue;
        }
        plan.to_append.push(entry);
    }

    plan
}

/// Side-by-side comparison of a local and a remote log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Comparison {
    pub local_only: usize,
    pub remote_only: usize,
    pub shared: usize,
    pub diverged: Vec<EntryId>,
}

impl Comparison {
    /// Both sides hold exactly the same entries.
    #[must_use]
    pub fn in_sync(&self) -> bool {
        self.local_only == 0 && self.remote_only == 0 && self.diverged.is_empty()
    }
}

/// Compare two logs by id without changing either.
#[must_use]
pub fn compare(local: &[Entry], remote: &[Entry]) -> Comparison {
    let local_index: HashMap<&EntryId, &Entry> = local.iter().map(|e| (&e.id, e)).collect();
    let remote_index: HashMap<&EntryId, &Entry> = remote.iter().map(|e| (&e.id, e)).collect();

    let mut comparison = Comparison::default();
    for (id, entry) in &local_index {
        match remote_index.get(id) {
            Some(other) => {
                comparison.shared += 1;
                if other != entry {
                    comparison.diverged.push((*id).clone());
                }
            }
            None => comparison.local_only += 1,
        }
    }
    comparison.remote_only = remote_index
        .keys()
        .filter(|id| !local_index.contains_key(*id))
        .count();
    comparison.diverged.sort();
    comparison
}

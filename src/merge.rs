//! Field-level reconciliation for merging two identities.
//!
//! The registry's [`merge`](crate::registry::IdentityRegistry::merge)
//! operation does the index and store bookkeeping; the per-field policies
//! live here so a stricter conflict-resolution strategy (say, explicit
//! operator choice) can replace one without touching the rest of the
//! algorithm.

use crate::metadata::IdentityMetadata;
use crate::record::{IdentityRecord, Lifecycle};

/// Scalar text conflict policy: the longer value wins, ties keep the
/// primary.
///
/// This is a heuristic, not a guarantee — it assumes the longer string is
/// usually the more complete one ("Alice M. Smith" over "Alice").
#[must_use]
pub fn longer_text_wins<'a>(primary: &'a str, secondary: &'a str) -> &'a str {
    if secondary.len() > primary.len() {
        secondary
    } else {
        primary
    }
}

/// Folds `secondary`'s metadata into `primary`.
///
/// List fields union member-wise without duplicates; the display name is
/// resolved by [`longer_text_wins`].
pub(crate) fn merge_metadata(primary: &mut IdentityMetadata, secondary: &IdentityMetadata) {
    primary.display_name =
        longer_text_wins(&primary.display_name, &secondary.display_name).to_owned();
    union_into(&mut primary.email, &secondary.email);
    union_into(&mut primary.chat, &secondary.chat);
    union_into(&mut primary.wiki, &secondary.wiki);
}

/// Folds `secondary`'s record history into `primary`.
///
/// Aliases not already on the primary are appended in sorted order;
/// join/part lists are concatenated and re-sorted; message and action
/// entries are copied with the secondary overwriting the primary on a
/// timestamp collision (last merged in wins, no warning).
pub(crate) fn merge_records(primary: &mut IdentityRecord, secondary: &IdentityRecord) {
    let mut incoming: Vec<String> = secondary
        .aliases
        .iter()
        .filter(|alias| !primary.has_alias(alias))
        .cloned()
        .collect();
    incoming.sort();
    primary.aliases.extend(incoming);

    primary.join_times.extend_from_slice(&secondary.join_times);
    primary.join_times.sort_unstable();
    primary.join_times.dedup();

    primary.part_times.extend_from_slice(&secondary.part_times);
    primary.part_times.sort_unstable();
    primary.part_times.dedup();

    for (time, text) in &secondary.messages {
        primary.messages.insert(*time, text.clone());
    }
    for (time, text) in &secondary.actions {
        primary.actions.insert(*time, text.clone());
    }

    if primary.state == Lifecycle::New {
        primary.state = secondary.state;
    }
}

fn union_into(primary: &mut Vec<String>, secondary: &[String]) {
    for item in secondary {
        if !primary.contains(item) {
            primary.push(item.clone());
        }
    }
}

//! Change detection between an incoming source record and its stored mirror entry.
//!
//! Detection is a pure comparison. Callers decide whether to write based on the
//! returned [`Change`], so an unchanged record never touches the store.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::record::{MirrorEntry, Record, SyncState};
use crate::settings::StatusPartitions;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Change {
    New,
    Changed,
    Unchanged,
}

/// Classify `incoming` against the stored entry for the same id.
#[must_use]
pub fn detect(incoming: &Record, stored: Option<&MirrorEntry>) -> Change {
    let Some(stored) = stored else {
        return Change::New;
    };

    let current = &stored.record;
    let group_label = effective_group_label(incoming, current);

    let same = current.title == incoming.title
        && current.body == incoming.body
        && current.status == incoming.status
        && current.category == incoming.category
        && current.group_label.as_deref() == group_label
        && current.schedule_window == incoming.schedule_window;

    if same {
        Change::Unchanged
    } else {
        Change::Changed
    }
}

/// Entry to persist for `incoming`, or `None` when nothing should be written.
///
/// New and changed records come back `NotSynced` with `updated_at = now`. The stored
/// `sink_id`, `created_at` and `present` flag carry over, and a missing incoming group
/// label keeps the stored one.
#[must_use]
pub fn next_entry(
    incoming: Record,
    stored: Option<&MirrorEntry>,
    now: OffsetDateTime,
) -> Option<MirrorEntry> {
    match (detect(&incoming, stored), stored) {
        (Change::Unchanged, _) => None,
        (_, None) => Some(MirrorEntry::first_sighting(incoming, now)),
        (_, Some(stored)) => {
            let mut record = incoming;
            if record.group_label.is_none() {
                record.group_label.clone_from(&stored.record.group_label);
            }
            Some(MirrorEntry {
                record,
                sink_id: stored.sink_id().map(str::to_string),
                present: stored.present,
                sync_state: SyncState::NotSynced,
                created_at: stored.created_at,
                updated_at: now,
            })
        }
    }
}

/// Sink id to complete when `incoming` moves a synced record into a completed status.
///
/// Only a transition from a non-completed status counts, and only when the stored
/// entry already has a sink id.
#[must_use]
pub fn completion_target<'a>(
    incoming: &Record,
    stored: &'a MirrorEntry,
    statuses: &StatusPartitions,
) -> Option<&'a str> {
    let was_completed = statuses.is_completed(&stored.record.status);
    let now_completed = statuses.is_completed(&incoming.status);
    if was_completed || !now_completed {
        return None;
    }
    stored.sink_id()
}

fn effective_group_label<'a>(incoming: &'a Record, current: &'a Record) -> Option<&'a str> {
    incoming.group_label.as_deref().or(current.group_label.as_deref())
}

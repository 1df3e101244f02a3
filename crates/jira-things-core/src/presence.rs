//! Presence reconciliation against the complete set of ids seen in one fetch cycle.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::record::SyncState;
use crate::store::MirrorStore;

/// Presence flag and sync state an entry should carry after a reconciliation pass.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct PresenceUpdate {
    pub present: bool,
    pub sync_state: SyncState,
}

impl PresenceUpdate {
    #[must_use]
    pub fn flipped(&self, was_present: bool) -> bool {
        self.present != was_present
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct PresenceSummary {
    pub vanished: usize,
    pub reappeared: usize,
    pub demoted: usize,
}

impl PresenceSummary {
    /// Fold one entry's transition into the summary.
    pub fn count(&mut self, was_present: bool, before: SyncState, update: PresenceUpdate) {
        if update.flipped(was_present) {
            if update.present {
                self.reappeared += 1;
            } else {
                self.vanished += 1;
            }
        }
        if before != update.sync_state {
            self.demoted += 1;
        }
    }
}

/// Presence transition for one entry.
///
/// A flip of a `Synced` entry demotes it to `NotSynced`; any other state is left alone.
#[must_use]
pub fn transition(was_present: bool, sync_state: SyncState, now_present: bool) -> PresenceUpdate {
    let sync_state = if was_present != now_present && sync_state == SyncState::Synced {
        SyncState::NotSynced
    } else {
        sync_state
    };
    PresenceUpdate { present: now_present, sync_state }
}

/// Apply one full-cycle presence set to every stored entry.
///
/// An empty set is a no-op: an empty fetch never means everything disappeared.
///
/// # Errors
/// Propagates store failures.
pub fn reconcile<M>(store: &mut M, present_ids: &BTreeSet<String>) -> Result<PresenceSummary, SyncError>
where
    M: MirrorStore + ?Sized,
{
    if present_ids.is_empty() {
        tracing::debug!("presence set is empty, skipping reconciliation");
        return Ok(PresenceSummary::default());
    }

    let summary = store.reconcile_presence(present_ids)?;
    tracing::info!(
        vanished = summary.vanished,
        reappeared = summary.reappeared,
        demoted = summary.demoted,
        "presence reconciled"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use time::OffsetDateTime;

    use super::*;
    use crate::record::{MirrorEntry, Record};
    use crate::testing::MemoryStore;

    fn ids(values: &[&str]) -> BTreeSet<String> {
        values.iter().map(|value| (*value).to_string()).collect()
    }

    fn entry(id: &str, present: bool, state: SyncState) -> MirrorEntry {
        let mut entry =
            MirrorEntry::first_sighting(Record::new(id, "title", "Open"), OffsetDateTime::UNIX_EPOCH);
        entry.present = present;
        entry.sync_state = state;
        entry
    }

    #[test]
    fn synced_entry_that_vanishes_is_demoted() {
        let update = transition(true, SyncState::Synced, false);
        assert_eq!(update, PresenceUpdate { present: false, sync_state: SyncState::NotSynced });
    }

    #[test]
    fn synced_entry_that_reappears_is_demoted() {
        let update = transition(false, SyncState::Synced, true);
        assert_eq!(update, PresenceUpdate { present: true, sync_state: SyncState::NotSynced });
    }

    #[test]
    fn unflipped_synced_entry_stays_synced() {
        assert_eq!(transition(true, SyncState::Synced, true).sync_state, SyncState::Synced);
        assert_eq!(transition(false, SyncState::Synced, false).sync_state, SyncState::Synced);
    }

    #[test]
    fn unknown_and_not_synced_are_never_touched_by_a_flip() {
        assert_eq!(transition(true, SyncState::Unknown, false).sync_state, SyncState::Unknown);
        assert_eq!(transition(true, SyncState::NotSynced, false).sync_state, SyncState::NotSynced);
    }

    #[test]
    fn reconcile_with_empty_set_is_a_no_op() -> anyhow::Result<()> {
        let mut store = MemoryStore::with_entries(vec![
            entry("T-1", true, SyncState::Synced),
            entry("T-2", false, SyncState::NotSynced),
        ]);
        let before = store.snapshot();

        let summary = reconcile(&mut store, &BTreeSet::new())?;

        assert_eq!(summary, PresenceSummary::default());
        assert_eq!(store.snapshot(), before);
        assert_eq!(store.writes(), 0);
        Ok(())
    }

    #[test]
    fn reconcile_marks_missing_entries_absent_and_demotes_synced() -> anyhow::Result<()> {
        let mut store = MemoryStore::with_entries(vec![
            entry("T-1", true, SyncState::Synced),
            entry("T-2", true, SyncState::Synced),
            entry("T-3", true, SyncState::Unknown),
            entry("T-4", false, SyncState::Synced),
        ]);

        let summary = reconcile(&mut store, &ids(&["T-2", "T-4"]))?;

        assert_eq!(summary, PresenceSummary { vanished: 2, reappeared: 1, demoted: 2 });
        let t1 = store.entry("T-1");
        assert!(!t1.present);
        assert_eq!(t1.sync_state, SyncState::NotSynced);
        let t2 = store.entry("T-2");
        assert!(t2.present);
        assert_eq!(t2.sync_state, SyncState::Synced);
        let t3 = store.entry("T-3");
        assert!(!t3.present);
        assert_eq!(t3.sync_state, SyncState::Unknown);
        let t4 = store.entry("T-4");
        assert!(t4.present);
        assert_eq!(t4.sync_state, SyncState::NotSynced);
        Ok(())
    }

    fn arb_state() -> impl Strategy<Value = SyncState> {
        prop_oneof![Just(SyncState::Synced), Just(SyncState::NotSynced), Just(SyncState::Unknown)]
    }

    proptest! {
        #[test]
        fn property_flip_demotes_only_synced(
            was_present in any::<bool>(),
            now_present in any::<bool>(),
            state in arb_state(),
        ) {
            let update = transition(was_present, state, now_present);
            prop_assert_eq!(update.present, now_present);
            let expected = if was_present != now_present && state == SyncState::Synced {
                SyncState::NotSynced
            } else {
                state
            };
            prop_assert_eq!(update.sync_state, expected);
        }
    }
}

use std::collections::BTreeSet;

use crate::error::SyncError;
use crate::presence::PresenceSummary;
use crate::record::MirrorEntry;

/// Result of one propagation attempt, written back to the mirror.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum SyncOutcome {
    /// The sink accepted a new task under this id.
    Created { sink_id: String },
    /// The sink accepted an update to an existing task.
    Updated,
    /// The attempt failed and its effect on the sink is not known.
    Unconfirmed,
}

/// Durable table of mirror entries keyed by source id.
///
/// Every method is one short atomic unit. Entries are never deleted.
pub trait MirrorStore {
    /// # Errors
    /// Returns [`SyncError::Store`] when the entry cannot be read.
    fn get(&self, id: &str) -> Result<Option<MirrorEntry>, SyncError>;

    /// Persist an entry seen for the first time.
    ///
    /// # Errors
    /// Returns [`SyncError::Store`] when the write fails or the id already exists.
    fn insert(&mut self, entry: &MirrorEntry) -> Result<(), SyncError>;

    /// Overwrite content fields, `sync_state` and `updated_at` of an existing entry.
    ///
    /// A stored non-empty `sink_id` is kept when `entry` carries none.
    ///
    /// # Errors
    /// Returns [`SyncError::Store`] when the write fails or the id is unknown.
    fn replace_content(&mut self, entry: &MirrorEntry) -> Result<(), SyncError>;

    /// Set `present` on every entry from `present_ids`, demoting flipped `Synced`
    /// entries as [`crate::presence::transition`] describes.
    ///
    /// An empty `present_ids` is a no-op: it never marks every entry absent.
    ///
    /// # Errors
    /// Returns [`SyncError::Store`] when the pass cannot be committed.
    fn reconcile_presence(
        &mut self,
        present_ids: &BTreeSet<String>,
    ) -> Result<PresenceSummary, SyncError>;

    /// Entries whose `sync_state` is not `Synced`, oldest first.
    ///
    /// # Errors
    /// Returns [`SyncError::Store`] when entries cannot be read.
    fn pending(&self) -> Result<Vec<MirrorEntry>, SyncError>;

    /// Every entry, oldest first.
    ///
    /// # Errors
    /// Returns [`SyncError::Store`] when entries cannot be read.
    fn all(&self) -> Result<Vec<MirrorEntry>, SyncError>;

    /// Write back the sync state implied by `outcome`.
    ///
    /// # Errors
    /// Returns [`SyncError::Store`] when the write fails or the id is unknown.
    fn record_outcome(&mut self, id: &str, outcome: &SyncOutcome) -> Result<(), SyncError>;
}

//! Mirror and push phases over explicit collaborators.
//!
//! The mirror phase fetches every query group before touching the store, so a failed
//! fetch never leaves a partially applied mirror. The push phase plans and propagates
//! entries one at a time; each write-back is its own store unit.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::detect::{completion_target, detect, next_entry, Change};
use crate::error::SyncError;
use crate::plan::plan;
use crate::presence::{self, PresenceSummary};
use crate::propagate::{PropagationSummary, Propagator, TaskSink};
use crate::record::Record;
use crate::settings::{QueryGroup, SyncSettings};
use crate::store::MirrorStore;

/// Authoritative record source.
pub trait RecordSource {
    /// Every record matching `group`, with all result pages aggregated.
    ///
    /// # Errors
    /// Returns [`SyncError::SourceFetch`] on transport or auth failure.
    fn fetch(&mut self, group: &QueryGroup) -> Result<Vec<Record>, SyncError>;
}

/// Complete result of one fetch cycle across all query groups.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct SourceSnapshot {
    pub records: Vec<Record>,
    pub present_ids: BTreeSet<String>,
}

impl SourceSnapshot {
    /// Fetch every group, labelling records with their group's label.
    ///
    /// A record returned by more than one group keeps the first group's label.
    ///
    /// # Errors
    /// Returns the first source error; nothing fetched so far is returned.
    pub fn fetch<S>(source: &mut S, groups: &[QueryGroup]) -> Result<Self, SyncError>
    where
        S: RecordSource + ?Sized,
    {
        let mut snapshot = Self::default();
        for group in groups {
            let records = source.fetch(group)?;
            tracing::info!(group = %group.name, count = records.len(), "fetched records from source");
            for mut record in records {
                if !snapshot.present_ids.insert(record.id.clone()) {
                    tracing::debug!(id = %record.id, group = %group.name, "record already fetched by an earlier group");
                    continue;
                }
                if group.group_label.is_some() {
                    record.group_label.clone_from(&group.group_label);
                }
                snapshot.records.push(record);
            }
        }
        Ok(snapshot)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct MirrorSummary {
    pub added: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub presence: PresenceSummary,
}

impl MirrorSummary {
    #[must_use]
    pub fn total(&self) -> usize {
        self.added + self.updated + self.unchanged
    }
}

/// Which entries a push considers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum PushScope {
    /// Entries whose state is not `Synced`.
    Pending,
    /// Every entry, whatever its state.
    Everything,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct RunSummary {
    pub mirror: Option<MirrorSummary>,
    pub push: Option<PropagationSummary>,
}

pub struct SyncEngine<'a, M: MirrorStore + ?Sized, K: TaskSink + ?Sized> {
    store: &'a mut M,
    sink: &'a mut K,
    settings: &'a SyncSettings,
}

impl<'a, M, K> SyncEngine<'a, M, K>
where
    M: MirrorStore + ?Sized,
    K: TaskSink + ?Sized,
{
    pub fn new(store: &'a mut M, sink: &'a mut K, settings: &'a SyncSettings) -> Self {
        Self { store, sink, settings }
    }

    /// Fetch every configured query group and fold the result into the mirror.
    ///
    /// # Errors
    /// Returns [`SyncError::SourceFetch`] before any store mutation when a fetch fails,
    /// or a store error.
    pub fn update_mirror<S>(&mut self, source: &mut S) -> Result<MirrorSummary, SyncError>
    where
        S: RecordSource + ?Sized,
    {
        let snapshot = SourceSnapshot::fetch(source, &self.settings.query_groups)?;
        self.apply_snapshot(snapshot, OffsetDateTime::now_utc())
    }

    /// Fold a complete snapshot into the mirror, then reconcile presence.
    ///
    /// # Errors
    /// Propagates store failures.
    pub fn apply_snapshot(
        &mut self,
        snapshot: SourceSnapshot,
        now: OffsetDateTime,
    ) -> Result<MirrorSummary, SyncError> {
        let mut summary = MirrorSummary::default();
        if snapshot.records.is_empty() {
            tracing::info!("no records found at source, mirror left untouched");
            return Ok(summary);
        }

        for record in snapshot.records {
            let stored = self.store.get(&record.id)?;
            match detect(&record, stored.as_ref()) {
                Change::Unchanged => {
                    tracing::debug!(id = %record.id, "record unchanged");
                    summary.unchanged += 1;
                }
                Change::New => {
                    tracing::info!(id = %record.id, title = %record.title, "adding new record");
                    if let Some(entry) = next_entry(record, None, now) {
                        self.store.insert(&entry)?;
                        summary.added += 1;
                    }
                }
                Change::Changed => {
                    tracing::info!(id = %record.id, title = %record.title, "updating changed record");
                    if let Some(stored) = stored.as_ref() {
                        if let Some(sink_id) = completion_target(&record, stored, &self.settings.statuses) {
                            Propagator::new(&mut *self.sink, self.settings).complete(&record.id, sink_id);
                        }
                    }
                    if let Some(entry) = next_entry(record, stored.as_ref(), now) {
                        self.store.replace_content(&entry)?;
                        summary.updated += 1;
                    }
                }
            }
        }

        summary.presence = presence::reconcile(&mut *self.store, &snapshot.present_ids)?;
        tracing::info!(
            added = summary.added,
            updated = summary.updated,
            unchanged = summary.unchanged,
            total = summary.total(),
            "mirror update complete"
        );
        Ok(summary)
    }

    /// Propagate entries in `scope` to the sink.
    ///
    /// # Errors
    /// Returns [`SyncError::SinkUnavailable`] when the sink cannot be reached, or a
    /// store error.
    pub fn push(&mut self, scope: PushScope) -> Result<PropagationSummary, SyncError> {
        let entries = match scope {
            PushScope::Pending => self.store.pending()?,
            PushScope::Everything => self.store.all()?,
        };
        let work = plan(entries);
        Propagator::new(&mut *self.sink, self.settings).run(&mut *self.store, &work)
    }

    /// Mirror then push pending entries.
    ///
    /// # Errors
    /// Returns the first fatal error of either phase.
    pub fn run<S>(&mut self, source: &mut S) -> Result<RunSummary, SyncError>
    where
        S: RecordSource + ?Sized,
    {
        let mirror = self.update_mirror(source)?;
        let push = self.push(PushScope::Pending)?;
        Ok(RunSummary { mirror: Some(mirror), push: Some(push) })
    }
}

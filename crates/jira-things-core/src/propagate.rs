//! Sink propagation: drive create/update calls and write back sync state.
//!
//! Individual sink failures are absorbed into `Unknown` state and counts. Only a sink
//! that cannot be reached at all, or a failing store, ends the batch.

use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::plan::Plan;
use crate::record::{MirrorEntry, SyncState};
use crate::settings::SyncSettings;
use crate::store::{MirrorStore, SyncOutcome};
use crate::task::TaskDraft;

/// Downstream task manager.
pub trait TaskSink {
    /// Check that the sink can be reached before a batch starts.
    ///
    /// # Errors
    /// Returns [`SyncError::SinkUnavailable`] when no call in the batch could succeed.
    fn ensure_available(&mut self) -> Result<(), SyncError>;

    /// Create a task and return the sink-assigned id.
    ///
    /// # Errors
    /// Returns [`SyncError::SinkCall`] when the sink rejects or fails the call.
    fn create_task(&mut self, task: &TaskDraft) -> Result<String, SyncError>;

    /// # Errors
    /// Returns [`SyncError::SinkCall`] when the sink rejects or fails the call.
    fn update_task(&mut self, sink_id: &str, credential: &str, task: &TaskDraft)
        -> Result<(), SyncError>;

    /// Mark a task completed without touching its other fields.
    ///
    /// # Errors
    /// Returns [`SyncError::SinkCall`] when the sink rejects or fails the call.
    fn complete_task(&mut self, sink_id: &str, credential: &str) -> Result<(), SyncError>;
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct PropagationSummary {
    pub created: usize,
    pub updated: usize,
    pub failed: usize,
}

impl PropagationSummary {
    #[must_use]
    pub fn total(&self) -> usize {
        self.created + self.updated + self.failed
    }
}

/// What happened to one entry.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Attempt {
    Created,
    Updated,
    Failed,
}

pub struct Propagator<'a, S: TaskSink + ?Sized> {
    sink: &'a mut S,
    settings: &'a SyncSettings,
}

impl<'a, S: TaskSink + ?Sized> Propagator<'a, S> {
    pub fn new(sink: &'a mut S, settings: &'a SyncSettings) -> Self {
        Self { sink, settings }
    }

    /// Create `entry` in the sink and record the outcome.
    ///
    /// An entry that already has a sink id is updated instead.
    ///
    /// # Errors
    /// Only store failures are returned; sink failures become `Unknown` state.
    pub fn create<M>(&mut self, store: &mut M, entry: &MirrorEntry) -> Result<Attempt, SyncError>
    where
        M: MirrorStore + ?Sized,
    {
        if entry.sink_id().is_some() {
            return self.update(store, entry);
        }
        warn_if_retrying(entry);
        let draft = TaskDraft::render(entry, self.settings);

        let result = self.sink.create_task(&draft).and_then(|sink_id| {
            if sink_id.trim().is_empty() {
                Err(SyncError::SinkCall("sink returned an empty task id".to_string()))
            } else {
                Ok(sink_id)
            }
        });

        match result {
            Ok(sink_id) => {
                tracing::info!(id = entry.id(), sink_id = %sink_id, "created task in sink");
                store.record_outcome(entry.id(), &SyncOutcome::Created { sink_id })?;
                Ok(Attempt::Created)
            }
            Err(err) => {
                tracing::error!(id = entry.id(), error = %err, "failed to create task in sink");
                store.record_outcome(entry.id(), &SyncOutcome::Unconfirmed)?;
                Ok(Attempt::Failed)
            }
        }
    }

    /// Update the sink task behind `entry` and record the outcome.
    ///
    /// Without a configured credential the entry counts as failed, no sink call is
    /// made and its state is left as it was.
    ///
    /// # Errors
    /// Only store failures are returned; sink failures become `Unknown` state.
    pub fn update<M>(&mut self, store: &mut M, entry: &MirrorEntry) -> Result<Attempt, SyncError>
    where
        M: MirrorStore + ?Sized,
    {
        let Some(sink_id) = entry.sink_id() else {
            return self.create(store, entry);
        };
        let Some(credential) = self.settings.credential() else {
            tracing::warn!(
                id = entry.id(),
                error = %SyncError::CredentialMissing,
                "skipping sink update"
            );
            return Ok(Attempt::Failed);
        };

        warn_if_retrying(entry);
        let draft = TaskDraft::render(entry, self.settings);
        match self.sink.update_task(sink_id, credential, &draft) {
            Ok(()) => {
                tracing::info!(id = entry.id(), sink_id, "updated task in sink");
                store.record_outcome(entry.id(), &SyncOutcome::Updated)?;
                Ok(Attempt::Updated)
            }
            Err(err) => {
                tracing::error!(id = entry.id(), sink_id, error = %err, "failed to update task in sink");
                store.record_outcome(entry.id(), &SyncOutcome::Unconfirmed)?;
                Ok(Attempt::Failed)
            }
        }
    }

    /// Propagate a whole plan, creates first, one entry at a time.
    ///
    /// # Errors
    /// Returns [`SyncError::SinkUnavailable`] when the sink cannot be reached before the
    /// batch starts, or a store error. Per-entry sink failures are only counted.
    pub fn run<M>(&mut self, store: &mut M, plan: &Plan) -> Result<PropagationSummary, SyncError>
    where
        M: MirrorStore + ?Sized,
    {
        let mut summary = PropagationSummary::default();
        if plan.is_empty() {
            tracing::info!("nothing to propagate");
            return Ok(summary);
        }

        tracing::info!(
            to_create = plan.to_create.len(),
            to_update = plan.to_update.len(),
            "propagating entries to sink"
        );
        self.sink.ensure_available()?;

        for entry in &plan.to_create {
            let attempt = self.create(store, entry)?;
            tally(&mut summary, attempt);
        }
        for entry in &plan.to_update {
            let attempt = self.update(store, entry)?;
            tally(&mut summary, attempt);
        }

        tracing::info!(
            created = summary.created,
            updated = summary.updated,
            failed = summary.failed,
            total = summary.total(),
            "sink propagation complete"
        );
        Ok(summary)
    }

    /// Best-effort completion of a sink task whose record just reached a completed status.
    ///
    /// Failures are logged and swallowed; the regular push retries via `NotSynced`.
    pub fn complete(&mut self, id: &str, sink_id: &str) {
        let Some(credential) = self.settings.credential() else {
            tracing::warn!(id, "no sink credential configured, cannot mark task complete");
            return;
        };
        match self.sink.complete_task(sink_id, credential) {
            Ok(()) => tracing::info!(id, sink_id, "marked sink task complete"),
            Err(err) => tracing::error!(id, sink_id, error = %err, "failed to mark sink task complete"),
        }
    }
}

fn tally(summary: &mut PropagationSummary, attempt: Attempt) {
    match attempt {
        Attempt::Created => summary.created += 1,
        Attempt::Updated => summary.updated += 1,
        Attempt::Failed => summary.failed += 1,
    }
}

fn warn_if_retrying(entry: &MirrorEntry) {
    if entry.sync_state == SyncState::Unknown {
        tracing::warn!(id = entry.id(), "retrying entry whose previous sink attempt was unconfirmed");
    }
}

//! In-memory collaborators for unit tests.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::engine::RecordSource;
use crate::error::SyncError;
use crate::presence::{transition, PresenceSummary};
use crate::propagate::TaskSink;
use crate::record::{MirrorEntry, Record, SyncState};
use crate::settings::QueryGroup;
use crate::store::{MirrorStore, SyncOutcome};
use crate::task::TaskDraft;

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: BTreeMap<String, MirrorEntry>,
    writes: usize,
}

impl MemoryStore {
    pub fn with_entries(entries: Vec<MirrorEntry>) -> Self {
        Self {
            entries: entries.into_iter().map(|entry| (entry.id().to_string(), entry)).collect(),
            writes: 0,
        }
    }

    pub fn snapshot(&self) -> Vec<MirrorEntry> {
        let mut entries: Vec<MirrorEntry> = self.entries.values().cloned().collect();
        entries.sort_by(|lhs, rhs| {
            lhs.created_at.cmp(&rhs.created_at).then_with(|| lhs.id().cmp(rhs.id()))
        });
        entries
    }

    pub fn entry(&self, id: &str) -> MirrorEntry {
        match self.entries.get(id) {
            Some(entry) => entry.clone(),
            None => panic!("entry {id} should exist"),
        }
    }

    pub fn writes(&self) -> usize {
        self.writes
    }

    fn entry_mut(&mut self, id: &str) -> Result<&mut MirrorEntry, SyncError> {
        self.entries.get_mut(id).ok_or_else(|| SyncError::Store(format!("unknown id {id}")))
    }
}

impl MirrorStore for MemoryStore {
    fn get(&self, id: &str) -> Result<Option<MirrorEntry>, SyncError> {
        Ok(self.entries.get(id).cloned())
    }

    fn insert(&mut self, entry: &MirrorEntry) -> Result<(), SyncError> {
        if self.entries.contains_key(entry.id()) {
            return Err(SyncError::Store(format!("duplicate id {}", entry.id())));
        }
        self.entries.insert(entry.id().to_string(), entry.clone());
        self.writes += 1;
        Ok(())
    }

    fn replace_content(&mut self, entry: &MirrorEntry) -> Result<(), SyncError> {
        let stored = self.entry_mut(entry.id())?;
        let sink_id = entry.sink_id().or(stored.sink_id()).map(str::to_string);
        stored.record = entry.record.clone();
        stored.sync_state = entry.sync_state;
        stored.updated_at = entry.updated_at;
        stored.sink_id = sink_id;
        self.writes += 1;
        Ok(())
    }

    fn reconcile_presence(
        &mut self,
        present_ids: &BTreeSet<String>,
    ) -> Result<PresenceSummary, SyncError> {
        let mut summary = PresenceSummary::default();
        if present_ids.is_empty() {
            return Ok(summary);
        }
        for entry in self.entries.values_mut() {
            let update = transition(entry.present, entry.sync_state, present_ids.contains(entry.id()));
            summary.count(entry.present, entry.sync_state, update);
            if update.present != entry.present || update.sync_state != entry.sync_state {
                entry.present = update.present;
                entry.sync_state = update.sync_state;
                self.writes += 1;
            }
        }
        Ok(summary)
    }

    fn pending(&self) -> Result<Vec<MirrorEntry>, SyncError> {
        Ok(self
            .snapshot()
            .into_iter()
            .filter(|entry| entry.sync_state != SyncState::Synced)
            .collect())
    }

    fn all(&self) -> Result<Vec<MirrorEntry>, SyncError> {
        Ok(self.snapshot())
    }

    fn record_outcome(&mut self, id: &str, outcome: &SyncOutcome) -> Result<(), SyncError> {
        let stored = self.entry_mut(id)?;
        match outcome {
            SyncOutcome::Created { sink_id } => {
                stored.sink_id = Some(sink_id.clone());
                stored.sync_state = SyncState::Synced;
            }
            SyncOutcome::Updated => stored.sync_state = SyncState::Synced,
            SyncOutcome::Unconfirmed => stored.sync_state = SyncState::Unknown,
        }
        self.writes += 1;
        Ok(())
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum SinkCall {
    Create { title: String },
    Update { sink_id: String, title: String },
    Complete { sink_id: String },
}

#[derive(Debug, Default)]
pub struct FakeSink {
    ids: VecDeque<String>,
    failing_titles: BTreeSet<String>,
    fail_updates: bool,
    offline: bool,
    calls: Vec<SinkCall>,
}

impl FakeSink {
    pub fn assigning(ids: &[&str]) -> Self {
        Self { ids: ids.iter().map(|id| (*id).to_string()).collect(), ..Self::default() }
    }

    pub fn fail_create_for(&mut self, title: &str) {
        self.failing_titles.insert(title.to_string());
    }

    pub fn fail_updates(&mut self) {
        self.fail_updates = true;
    }

    pub fn go_offline(&mut self) {
        self.offline = true;
    }

    pub fn calls(&self) -> &[SinkCall] {
        &self.calls
    }
}

impl TaskSink for FakeSink {
    fn ensure_available(&mut self) -> Result<(), SyncError> {
        if self.offline {
            return Err(SyncError::SinkUnavailable("fake sink is offline".to_string()));
        }
        Ok(())
    }

    fn create_task(&mut self, task: &TaskDraft) -> Result<String, SyncError> {
        self.calls.push(SinkCall::Create { title: task.title.clone() });
        if self.failing_titles.contains(&task.title) {
            return Err(SyncError::SinkCall(format!("rejected {}", task.title)));
        }
        self.ids
            .pop_front()
            .ok_or_else(|| SyncError::SinkCall("no sink id left to assign".to_string()))
    }

    fn update_task(
        &mut self,
        sink_id: &str,
        _credential: &str,
        task: &TaskDraft,
    ) -> Result<(), SyncError> {
        self.calls.push(SinkCall::Update { sink_id: sink_id.to_string(), title: task.title.clone() });
        if self.fail_updates {
            return Err(SyncError::SinkCall(format!("update of {sink_id} rejected")));
        }
        Ok(())
    }

    fn complete_task(&mut self, sink_id: &str, _credential: &str) -> Result<(), SyncError> {
        self.calls.push(SinkCall::Complete { sink_id: sink_id.to_string() });
        if self.fail_updates {
            return Err(SyncError::SinkCall(format!("completion of {sink_id} rejected")));
        }
        Ok(())
    }
}

/// Source answering each query with a canned result.
#[derive(Debug, Default)]
pub struct FakeSource {
    results: BTreeMap<String, Result<Vec<Record>, SyncError>>,
}

impl FakeSource {
    pub fn answering(query: &str, records: Vec<Record>) -> Self {
        let mut source = Self::default();
        source.answer(query, records);
        source
    }

    pub fn answer(&mut self, query: &str, records: Vec<Record>) {
        self.results.insert(query.to_string(), Ok(records));
    }

    pub fn fail(&mut self, query: &str, message: &str) {
        self.results.insert(query.to_string(), Err(SyncError::SourceFetch(message.to_string())));
    }
}

impl RecordSource for FakeSource {
    fn fetch(&mut self, group: &QueryGroup) -> Result<Vec<Record>, SyncError> {
        self.results.get(&group.query).cloned().unwrap_or_else(|| Ok(Vec::new()))
    }
}

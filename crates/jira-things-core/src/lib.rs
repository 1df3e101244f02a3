//! Reconciliation and sync-state engine for mirroring issue-tracker records into a
//! local store and propagating them to a task manager.

mod detect;
mod engine;
mod error;
mod plan;
mod presence;
mod propagate;
mod record;
mod settings;
mod store;
mod task;

#[cfg(test)]
mod testing;

pub use detect::{completion_target, detect, next_entry, Change};
pub use engine::{MirrorSummary, PushScope, RecordSource, RunSummary, SourceSnapshot, SyncEngine};
pub use error::SyncError;
pub use plan::{plan, Plan};
pub use presence::{reconcile, transition, PresenceSummary, PresenceUpdate};
pub use propagate::{Attempt, PropagationSummary, Propagator, TaskSink};
pub use record::{MirrorEntry, Record, ScheduleWindow, SyncState};
pub use settings::{QueryGroup, StatusPartitions, SyncSettings};
pub use store::{MirrorStore, SyncOutcome};
pub use task::{ScheduleHint, TaskDraft};

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Sprint-like window a record is scheduled in. Display only; never drives sync decisions.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct ScheduleWindow {
    pub label: Option<String>,
    pub state: Option<String>,
    pub end_time: Option<String>,
}

impl ScheduleWindow {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.label.is_none() && self.state.is_none() && self.end_time.is_none()
    }
}

/// One tracked item as seen at the source.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Record {
    pub id: String,
    pub title: String,
    pub body: String,
    pub status: String,
    pub category: Option<String>,
    /// Computed locally from the query group the record was fetched through.
    pub group_label: Option<String>,
    pub has_children: bool,
    #[serde(default)]
    pub schedule_window: ScheduleWindow,
}

impl Record {
    #[must_use]
    pub fn new(id: impl Into<String>, title: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            body: String::new(),
            status: status.into(),
            category: None,
            group_label: None,
            has_children: false,
            schedule_window: ScheduleWindow::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Synced,
    NotSynced,
    /// A propagation attempt failed and its effect on the sink is not known.
    Unknown,
}

impl SyncState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Synced => "synced",
            Self::NotSynced => "not_synced",
            Self::Unknown => "unknown",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "synced" => Some(Self::Synced),
            "not_synced" => Some(Self::NotSynced),
            "unknown" => Some(Self::Unknown),
            _ => None,
        }
    }
}

impl Display for SyncState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted wrapper around a [`Record`] carrying sink identity and sync metadata.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct MirrorEntry {
    pub record: Record,
    pub sink_id: Option<String>,
    pub present: bool,
    pub sync_state: SyncState,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl MirrorEntry {
    /// Entry for a record seen for the first time.
    #[must_use]
    pub fn first_sighting(record: Record, now: OffsetDateTime) -> Self {
        Self {
            record,
            sink_id: None,
            present: true,
            sync_state: SyncState::NotSynced,
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.record.id
    }

    /// Known sink identifier, ignoring empty strings left by older writers.
    #[must_use]
    pub fn sink_id(&self) -> Option<&str> {
        self.sink_id.as_deref().filter(|value| !value.is_empty())
    }
}

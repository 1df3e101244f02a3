use serde::{Deserialize, Serialize};

use crate::record::MirrorEntry;
use crate::settings::SyncSettings;

/// Where the sink should schedule a task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleHint {
    Today,
    Anytime,
    Someday,
}

impl ScheduleHint {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Today => "today",
            Self::Anytime => "anytime",
            Self::Someday => "someday",
        }
    }
}

/// Sink-side rendering of one mirror entry.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct TaskDraft {
    pub title: String,
    pub notes: String,
    pub tags: Vec<String>,
    pub list: Option<String>,
    pub schedule: ScheduleHint,
    pub completed: bool,
}

impl TaskDraft {
    #[must_use]
    pub fn render(entry: &MirrorEntry, settings: &SyncSettings) -> Self {
        let record = &entry.record;
        let base_url = settings.source_base_url.trim_end_matches('/');

        let mut tags = settings.tags.clone();
        if settings.category_as_tag {
            if let Some(category) = record.category.as_deref().filter(|value| !value.is_empty()) {
                let tag = category.to_lowercase();
                if !tags.contains(&tag) {
                    tags.push(tag);
                }
            }
        }

        let statuses = &settings.statuses;
        let schedule = if statuses.today.contains(&record.status) {
            ScheduleHint::Today
        } else if statuses.someday.contains(&record.status) {
            ScheduleHint::Someday
        } else {
            ScheduleHint::Anytime
        };

        Self {
            title: format!("[{}] {}", record.id, record.title),
            notes: format!("{base_url}/browse/{}\n\n{}", record.id, record.body),
            tags,
            list: record.group_label.clone().or_else(|| settings.default_list.clone()),
            schedule,
            completed: statuses.is_completed(&record.status),
        }
    }
}

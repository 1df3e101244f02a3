use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// Status names partitioned by how the sink should schedule a task.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct StatusPartitions {
    #[serde(default)]
    pub completed: BTreeSet<String>,
    #[serde(default)]
    pub today: BTreeSet<String>,
    #[serde(default)]
    pub anytime: BTreeSet<String>,
    #[serde(default)]
    pub someday: BTreeSet<String>,
}

impl StatusPartitions {
    #[must_use]
    pub fn is_completed(&self, status: &str) -> bool {
        self.completed.contains(status)
    }
}

/// A named source query whose results are filed under one group label in the sink.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct QueryGroup {
    pub name: String,
    pub query: String,
    pub group_label: Option<String>,
}

/// Everything the engine needs to decide and render propagation.
///
/// Built once from configuration and handed to [`crate::SyncEngine`]; nothing reads
/// settings from the environment at call time.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct SyncSettings {
    pub statuses: StatusPartitions,
    /// Sink authorization credential. Required for updates, not for creates.
    #[serde(skip_serializing)]
    pub credential: Option<String>,
    pub tags: Vec<String>,
    pub category_as_tag: bool,
    /// List used when an entry has no group label.
    pub default_list: Option<String>,
    /// Base URL of the source, used to link each task back to its record.
    pub source_base_url: String,
    pub query_groups: Vec<QueryGroup>,
}

impl SyncSettings {
    /// Non-empty credential, if one is configured.
    #[must_use]
    pub fn credential(&self) -> Option<&str> {
        self.credential.as_deref().map(str::trim).filter(|value| !value.is_empty())
    }

    /// Check the invariants the engine relies on.
    ///
    /// # Errors
    /// Returns [`SyncError::Configuration`] when no query group is defined, a group has an
    /// empty name or query, group names repeat, or a status is in more than one
    /// scheduling partition.
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.query_groups.is_empty() {
            return Err(SyncError::Configuration(
                "at least one query group is required".to_string(),
            ));
        }

        let mut names = BTreeSet::new();
        for group in &self.query_groups {
            if group.name.trim().is_empty() {
                return Err(SyncError::Configuration("query group name is empty".to_string()));
            }
            if group.query.trim().is_empty() {
                return Err(SyncError::Configuration(format!(
                    "query group `{}` has an empty query",
                    group.name
                )));
            }
            if !names.insert(group.name.as_str()) {
                return Err(SyncError::Configuration(format!(
                    "query group `{}` is defined more than once",
                    group.name
                )));
            }
        }

        let partitions = [
            ("today", &self.statuses.today),
            ("anytime", &self.statuses.anytime),
            ("someday", &self.statuses.someday),
        ];
        for (index, (left_name, left)) in partitions.iter().enumerate() {
            for (right_name, right) in &partitions[index + 1..] {
                if let Some(status) = left.intersection(right).next() {
                    return Err(SyncError::Configuration(format!(
                        "status `{status}` is listed under both `{left_name}` and `{right_name}`"
                    )));
                }
            }
        }

        Ok(())
    }
}

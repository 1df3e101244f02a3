use crate::record::MirrorEntry;

/// Entries split by the sink call they need.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct Plan {
    pub to_create: Vec<MirrorEntry>,
    pub to_update: Vec<MirrorEntry>,
}

impl Plan {
    #[must_use]
    pub fn len(&self) -> usize {
        self.to_create.len() + self.to_update.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.to_create.is_empty() && self.to_update.is_empty()
    }
}

/// Partition entries into creates (no sink id yet) and updates, keeping input order.
#[must_use]
pub fn plan(entries: Vec<MirrorEntry>) -> Plan {
    let (to_update, to_create) = entries.into_iter().partition(|entry| entry.sink_id().is_some());
    Plan { to_create, to_update }
}

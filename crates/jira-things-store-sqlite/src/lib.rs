use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use jira_things_core::{
    transition, MirrorEntry, MirrorStore, PresenceSummary, Record, ScheduleWindow, SyncError,
    SyncOutcome, SyncState,
};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::debug;

const LATEST_SCHEMA_VERSION: i64 = 2;

const CREATE_SCHEMA_MIGRATIONS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at TEXT NOT NULL
);
";

const MIGRATION_001_SQL: &str = r"
CREATE TABLE IF NOT EXISTS mirror_entries (
  id TEXT PRIMARY KEY,
  title TEXT NOT NULL,
  body TEXT NOT NULL DEFAULT '',
  status TEXT NOT NULL,
  category TEXT,
  has_children INTEGER NOT NULL DEFAULT 0,
  sink_id TEXT,
  sync_state TEXT NOT NULL CHECK (sync_state IN ('synced','not_synced','unknown')),
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_mirror_entries_sync_state ON mirror_entries(sync_state);
";

const MIGRATION_002_SQL: &str = r"
ALTER TABLE mirror_entries ADD COLUMN group_label TEXT;
ALTER TABLE mirror_entries ADD COLUMN schedule_label TEXT;
ALTER TABLE mirror_entries ADD COLUMN schedule_state TEXT;
ALTER TABLE mirror_entries ADD COLUMN schedule_end TEXT;
ALTER TABLE mirror_entries ADD COLUMN present INTEGER NOT NULL DEFAULT 1;
";

const SELECT_ENTRY_COLUMNS: &str = "id, title, body, status, category, group_label, has_children, \
     schedule_label, schedule_state, schedule_end, sink_id, present, sync_state, created_at, updated_at";

pub struct SqliteStore {
    conn: Connection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaStatus {
    pub current_version: i64,
    pub target_version: i64,
    pub pending_versions: Vec<i64>,
    pub inferred_from_legacy: bool,
}

impl SqliteStore {
    /// Open or create a mirror database at `path`.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or configured.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    /// Report current and target schema versions plus pending migrations.
    ///
    /// # Errors
    /// Returns an error when schema metadata cannot be read or initialized.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;
        let (current_version, inferred_from_legacy) = detect_effective_schema_version(&self.conn)?;
        let pending_versions = if current_version < LATEST_SCHEMA_VERSION {
            ((current_version + 1)..=LATEST_SCHEMA_VERSION).collect::<Vec<_>>()
        } else {
            Vec::new()
        };

        Ok(SchemaStatus {
            current_version,
            target_version: LATEST_SCHEMA_VERSION,
            pending_versions,
            inferred_from_legacy,
        })
    }

    /// Apply all forward migrations up to the latest supported schema version.
    ///
    /// # Errors
    /// Returns an error when migration bootstrapping or any migration step fails.
    pub fn migrate(&mut self) -> Result<()> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;

        let mut version = current_schema_version(&self.conn)?;

        if version == 0 {
            version = self.bootstrap_schema_version()?;
        }

        if version < 2 {
            self.apply_migration_2()?;
            version = current_schema_version(&self.conn)?;
        }

        if version != LATEST_SCHEMA_VERSION {
            return Err(anyhow!(
                "unsupported schema version {version}; expected {LATEST_SCHEMA_VERSION}"
            ));
        }

        Ok(())
    }

    fn bootstrap_schema_version(&self) -> Result<i64> {
        if !table_exists(&self.conn, "mirror_entries")? {
            apply_migration_1(&self.conn)?;
            return Ok(1);
        }

        if !table_has_column(&self.conn, "mirror_entries", "sync_state")? {
            return Err(anyhow!("database schema is invalid: mirror_entries has no sync_state column"));
        }

        // Table created before the ledger existed.
        record_schema_version(&self.conn, 1)?;
        if table_has_column(&self.conn, "mirror_entries", "present")? {
            record_schema_version(&self.conn, 2)?;
            return Ok(2);
        }
        Ok(1)
    }

    fn apply_migration_2(&mut self) -> Result<()> {
        if table_has_column(&self.conn, "mirror_entries", "present")? {
            record_schema_version(&self.conn, 2)?;
            return Ok(());
        }

        let tx = self.conn.transaction().context("failed to start migration v2 transaction")?;
        tx.execute_batch(MIGRATION_002_SQL).context("failed to apply migration v2")?;
        record_schema_version(&tx, 2)?;
        tx.commit().context("failed to commit migration v2")?;
        debug!("applied schema migration v2");
        Ok(())
    }

    /// # Errors
    /// Returns an error when the row cannot be read or decoded.
    pub fn get_entry(&self, id: &str) -> Result<Option<MirrorEntry>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {SELECT_ENTRY_COLUMNS} FROM mirror_entries WHERE id = ?1"),
                params![id],
                EntryRow::from_row,
            )
            .optional()
            .with_context(|| format!("failed to load mirror entry {id}"))?;
        row.map(EntryRow::into_entry).transpose()
    }

    /// # Errors
    /// Returns an error when the insert fails, including on a duplicate id.
    pub fn insert_entry(&mut self, entry: &MirrorEntry) -> Result<()> {
        let record = &entry.record;
        let window = &record.schedule_window;
        self.conn
            .execute(
                "INSERT INTO mirror_entries(
                   id, title, body, status, category, group_label, has_children,
                   schedule_label, schedule_state, schedule_end,
                   sink_id, present, sync_state, created_at, updated_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                params![
                    record.id,
                    record.title,
                    record.body,
                    record.status,
                    record.category,
                    record.group_label,
                    record.has_children,
                    window.label,
                    window.state,
                    window.end_time,
                    entry.sink_id(),
                    entry.present,
                    entry.sync_state.as_str(),
                    rfc3339(entry.created_at)?,
                    rfc3339(entry.updated_at)?,
                ],
            )
            .with_context(|| format!("failed to insert mirror entry {}", record.id))?;
        Ok(())
    }

    /// Overwrite content, `sync_state` and `updated_at`; keep a stored `sink_id` when
    /// `entry` has none.
    ///
    /// # Errors
    /// Returns an error when the update fails or no entry has this id.
    pub fn replace_entry_content(&mut self, entry: &MirrorEntry) -> Result<()> {
        let record = &entry.record;
        let window = &record.schedule_window;
        let changed = self
            .conn
            .execute(
                "UPDATE mirror_entries SET
                   title = ?2, body = ?3, status = ?4, category = ?5, group_label = ?6,
                   has_children = ?7, schedule_label = ?8, schedule_state = ?9,
                   schedule_end = ?10, sink_id = COALESCE(?11, sink_id),
                   sync_state = ?12, updated_at = ?13
                 WHERE id = ?1",
                params![
                    record.id,
                    record.title,
                    record.body,
                    record.status,
                    record.category,
                    record.group_label,
                    record.has_children,
                    window.label,
                    window.state,
                    window.end_time,
                    entry.sink_id(),
                    entry.sync_state.as_str(),
                    rfc3339(entry.updated_at)?,
                ],
            )
            .with_context(|| format!("failed to update mirror entry {}", record.id))?;
        if changed == 0 {
            return Err(anyhow!("mirror entry not found: {}", record.id));
        }
        Ok(())
    }

    /// Set presence for every entry in one transaction.
    ///
    /// # Errors
    /// Returns an error when the pass cannot be read, written or committed.
    pub fn apply_presence(&mut self, present_ids: &BTreeSet<String>) -> Result<PresenceSummary> {
        if present_ids.is_empty() {
            tracing::warn!("empty presence set, leaving presence flags unchanged");
            return Ok(PresenceSummary::default());
        }
        let tx = self.conn.transaction().context("failed to start presence transaction")?;
        let mut summary = PresenceSummary::default();

        let current = {
            let mut stmt = tx
                .prepare("SELECT id, present, sync_state FROM mirror_entries")
                .context("failed to prepare presence scan")?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, bool>(1)?, row.get::<_, String>(2)?))
            })?;
            rows.collect::<rusqlite::Result<Vec<_>>>().context("failed to scan presence flags")?
        };

        for (id, was_present, raw_state) in current {
            let before = parse_sync_state(&raw_state)?;
            let update = transition(was_present, before, present_ids.contains(&id));
            summary.count(was_present, before, update);
            if update.present == was_present && update.sync_state == before {
                continue;
            }
            tx.execute(
                "UPDATE mirror_entries SET present = ?2, sync_state = ?3 WHERE id = ?1",
                params![id, update.present, update.sync_state.as_str()],
            )
            .with_context(|| format!("failed to update presence of {id}"))?;
        }

        tx.commit().context("failed to commit presence transaction")?;
        Ok(summary)
    }

    /// Entries not yet confirmed at the sink, oldest first.
    ///
    /// # Errors
    /// Returns an error when entries cannot be read or decoded.
    pub fn list_pending(&self) -> Result<Vec<MirrorEntry>> {
        self.query_entries("WHERE sync_state != 'synced'")
    }

    /// # Errors
    /// Returns an error when entries cannot be read or decoded.
    pub fn list_entries(&self) -> Result<Vec<MirrorEntry>> {
        self.query_entries("")
    }

    /// # Errors
    /// Returns an error when the write fails or no entry has this id.
    pub fn write_outcome(&mut self, id: &str, outcome: &SyncOutcome) -> Result<()> {
        let changed = match outcome {
            SyncOutcome::Created { sink_id } => self.conn.execute(
                "UPDATE mirror_entries SET sink_id = ?2, sync_state = 'synced' WHERE id = ?1",
                params![id, sink_id],
            ),
            SyncOutcome::Updated => self.conn.execute(
                "UPDATE mirror_entries SET sync_state = 'synced' WHERE id = ?1",
                params![id],
            ),
            SyncOutcome::Unconfirmed => self.conn.execute(
                "UPDATE mirror_entries SET sync_state = 'unknown' WHERE id = ?1",
                params![id],
            ),
        }
        .with_context(|| format!("failed to record sync outcome for {id}"))?;
        if changed == 0 {
            return Err(anyhow!("mirror entry not found: {id}"));
        }
        Ok(())
    }

    /// Number of entries per sync state. States with no entries are reported as zero.
    ///
    /// # Errors
    /// Returns an error when the counts cannot be read.
    pub fn sync_state_counts(&self) -> Result<BTreeMap<SyncState, usize>> {
        let mut counts: BTreeMap<SyncState, usize> =
            [SyncState::Synced, SyncState::NotSynced, SyncState::Unknown]
                .into_iter()
                .map(|state| (state, 0))
                .collect();

        let mut stmt = self
            .conn
            .prepare("SELECT sync_state, COUNT(*) FROM mirror_entries GROUP BY sync_state")
            .context("failed to prepare sync state counts")?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let raw: String = row.get(0)?;
            let count: i64 = row.get(1)?;
            let count = usize::try_from(count)
                .with_context(|| format!("invalid entry count {count} for {raw}"))?;
            counts.insert(parse_sync_state(&raw)?, count);
        }
        Ok(counts)
    }

    fn query_entries(&self, filter: &str) -> Result<Vec<MirrorEntry>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {SELECT_ENTRY_COLUMNS} FROM mirror_entries {filter} ORDER BY created_at ASC, id ASC"
            ))
            .context("failed to prepare mirror entry query")?;
        let rows = stmt.query_map([], EntryRow::from_row)?;
        let rows = rows.collect::<rusqlite::Result<Vec<_>>>().context("failed to read mirror entries")?;
        rows.into_iter().map(EntryRow::into_entry).collect()
    }
}

fn store_error(err: &anyhow::Error) -> SyncError {
    SyncError::Store(format!("{err:#}"))
}

impl MirrorStore for SqliteStore {
    fn get(&self, id: &str) -> Result<Option<MirrorEntry>, SyncError> {
        self.get_entry(id).map_err(|err| store_error(&err))
    }

    fn insert(&mut self, entry: &MirrorEntry) -> Result<(), SyncError> {
        self.insert_entry(entry).map_err(|err| store_error(&err))
    }

    fn replace_content(&mut self, entry: &MirrorEntry) -> Result<(), SyncError> {
        self.replace_entry_content(entry).map_err(|err| store_error(&err))
    }

    fn reconcile_presence(
        &mut self,
        present_ids: &BTreeSet<String>,
    ) -> Result<PresenceSummary, SyncError> {
        self.apply_presence(present_ids).map_err(|err| store_error(&err))
    }

    fn pending(&self) -> Result<Vec<MirrorEntry>, SyncError> {
        self.list_pending().map_err(|err| store_error(&err))
    }

    fn all(&self) -> Result<Vec<MirrorEntry>, SyncError> {
        self.list_entries().map_err(|err| store_error(&err))
    }

    fn record_outcome(&mut self, id: &str, outcome: &SyncOutcome) -> Result<(), SyncError> {
        self.write_outcome(id, outcome).map_err(|err| store_error(&err))
    }
}

#[derive(Debug)]
struct EntryRow {
    id: String,
    title: String,
    body: String,
    status: String,
    category: Option<String>,
    group_label: Option<String>,
    has_children: bool,
    schedule_label: Option<String>,
    schedule_state: Option<String>,
    schedule_end: Option<String>,
    sink_id: Option<String>,
    present: bool,
    sync_state: String,
    created_at: String,
    updated_at: String,
}

impl EntryRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            body: row.get(2)?,
            status: row.get(3)?,
            category: row.get(4)?,
            group_label: row.get(5)?,
            has_children: row.get(6)?,
            schedule_label: row.get(7)?,
            schedule_state: row.get(8)?,
            schedule_end: row.get(9)?,
            sink_id: row.get(10)?,
            present: row.get(11)?,
            sync_state: row.get(12)?,
            created_at: row.get(13)?,
            updated_at: row.get(14)?,
        })
    }

    fn into_entry(self) -> Result<MirrorEntry> {
        let sync_state = parse_sync_state(&self.sync_state)?;
        let created_at = parse_rfc3339(&self.created_at)?;
        let updated_at = parse_rfc3339(&self.updated_at)?;
        Ok(MirrorEntry {
            record: Record {
                id: self.id,
                title: self.title,
                body: self.body,
                status: self.status,
                category: self.category,
                group_label: self.group_label,
                has_children: self.has_children,
                schedule_window: ScheduleWindow {
                    label: self.schedule_label,
                    state: self.schedule_state,
                    end_time: self.schedule_end,
                },
            },
            sink_id: self.sink_id.filter(|value| !value.is_empty()),
            present: self.present,
            sync_state,
            created_at,
            updated_at,
        })
    }
}

fn apply_migration_1(conn: &Connection) -> Result<()> {
    conn.execute_batch(MIGRATION_001_SQL).context("failed to apply migration v1")?;
    record_schema_version(conn, 1)?;
    Ok(())
}

fn table_exists(conn: &Connection, table_name: &str) -> Result<bool> {
    let exists = conn
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
            params![table_name],
            |row| row.get::<_, i64>(0),
        )
        .with_context(|| format!("failed to check if table exists: {table_name}"))?;
    Ok(exists == 1)
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    if !table_exists(conn, table)? {
        return Ok(false);
    }

    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({table})"))
        .with_context(|| format!("failed to inspect table_info for {table}"))?;
    let mut rows = stmt.query([])?;

    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }

    Ok(false)
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    let version = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| {
            row.get::<_, i64>(0)
        })
        .context("failed to read current schema version")?;
    Ok(version)
}

fn detect_effective_schema_version(conn: &Connection) -> Result<(i64, bool)> {
    let recorded = current_schema_version(conn)?;
    if recorded > 0 {
        return Ok((recorded, false));
    }

    if !table_exists(conn, "mirror_entries")? {
        return Ok((0, false));
    }

    if table_has_column(conn, "mirror_entries", "present")? {
        return Ok((2, true));
    }

    if table_has_column(conn, "mirror_entries", "sync_state")? {
        return Ok((1, true));
    }

    Err(anyhow!("database schema is invalid: mirror_entries has no sync_state column"))
}

fn record_schema_version(conn: &Connection, version: i64) -> Result<()> {
    let now = rfc3339(OffsetDateTime::now_utc())?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
        params![version, now],
    )
    .with_context(|| format!("failed to record migration version {version}"))?;
    Ok(())
}

fn parse_sync_state(raw: &str) -> Result<SyncState> {
    SyncState::parse(raw).ok_or_else(|| anyhow!("invalid sync_state in database: {raw}"))
}

fn rfc3339(value: OffsetDateTime) -> Result<String> {
    value
        .format(&time::format_description::well_known::Rfc3339)
        .context("failed to format RFC3339 timestamp")
}

fn parse_rfc3339(value: &str) -> Result<OffsetDateTime> {
    OffsetDateTime::parse(value, &time::format_description::well_known::Rfc3339)
        .with_context(|| format!("invalid RFC3339 timestamp: {value}"))
}

#[cfg(test)]
mod tests {
    use time::Duration;

    use super::*;

    fn open_migrated() -> Result<SqliteStore> {
        let mut store = SqliteStore::open(Path::new(":memory:"))?;
        store.migrate()?;
        Ok(store)
    }

    fn at(offset_secs: i64) -> OffsetDateTime {
        OffsetDateTime::UNIX_EPOCH + Duration::days(20_000) + Duration::seconds(offset_secs)
    }

    fn entry(id: &str, offset_secs: i64) -> MirrorEntry {
        let mut record = Record::new(id, format!("title {id}"), "To Do");
        record.body = format!("body of {id}");
        record.category = Some("Task".to_string());
        MirrorEntry::first_sighting(record, at(offset_secs))
    }

    fn ids(entries: &[MirrorEntry]) -> Vec<String> {
        entries.iter().map(|entry| entry.id().to_string()).collect()
    }

    fn present(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|id| (*id).to_string()).collect()
    }

    #[test]
    fn fresh_database_migrates_to_latest_version() -> Result<()> {
        let mut store = SqliteStore::open(Path::new(":memory:"))?;

        let before = store.schema_status()?;
        assert_eq!(before.current_version, 0);
        assert_eq!(before.pending_versions, vec![1, 2]);
        assert!(!before.inferred_from_legacy);

        store.migrate()?;
        let after = store.schema_status()?;
        assert_eq!(after.current_version, LATEST_SCHEMA_VERSION);
        assert!(after.pending_versions.is_empty());

        // A second migrate is a no-op.
        store.migrate()?;
        assert_eq!(current_schema_version(&store.conn)?, LATEST_SCHEMA_VERSION);
        Ok(())
    }

    #[test]
    fn insert_and_get_preserve_every_field() -> Result<()> {
        let mut store = open_migrated()?;
        let mut stored = entry("T-1", 0);
        stored.record.group_label = Some("Platform".to_string());
        stored.record.has_children = true;
        stored.record.schedule_window = ScheduleWindow {
            label: Some("Sprint 7".to_string()),
            state: Some("active".to_string()),
            end_time: Some("2026-03-01T12:00:00.000+00:00".to_string()),
        };
        store.insert_entry(&stored)?;

        let loaded = store.get_entry("T-1")?;
        assert_eq!(loaded, Some(stored));
        assert_eq!(store.get_entry("T-404")?, None);
        Ok(())
    }

    #[test]
    fn duplicate_insert_is_rejected() -> Result<()> {
        let mut store = open_migrated()?;
        store.insert_entry(&entry("T-1", 0))?;
        assert!(store.insert_entry(&entry("T-1", 5)).is_err());
        Ok(())
    }

    #[test]
    fn sync_state_check_constraint_rejects_unknown_values() -> Result<()> {
        let store = open_migrated()?;
        let result = store.conn.execute(
            "INSERT INTO mirror_entries(id, title, status, sync_state, created_at, updated_at)
             VALUES ('T-9', 't', 'Open', 'not synced', '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')",
            [],
        );
        assert!(result.is_err());
        Ok(())
    }

    #[test]
    fn replace_content_keeps_stored_sink_id() -> Result<()> {
        let mut store = open_migrated()?;
        let original = entry("T-1", 0);
        store.insert_entry(&original)?;
        store.write_outcome("T-1", &SyncOutcome::Created { sink_id: "things-1".to_string() })?;

        let mut changed = original.clone();
        changed.record.title = "renamed".to_string();
        changed.sync_state = SyncState::NotSynced;
        changed.updated_at = at(60);
        store.replace_entry_content(&changed)?;

        let Some(loaded) = store.get_entry("T-1")? else {
            return Err(anyhow!("entry T-1 missing after update"));
        };
        assert_eq!(loaded.record.title, "renamed");
        assert_eq!(loaded.sink_id(), Some("things-1"));
        assert_eq!(loaded.sync_state, SyncState::NotSynced);
        assert_eq!(loaded.created_at, original.created_at);
        assert_eq!(loaded.updated_at, at(60));
        Ok(())
    }

    #[test]
    fn replace_content_of_unknown_id_fails() -> Result<()> {
        let mut store = open_migrated()?;
        let err = match store.replace_entry_content(&entry("T-404", 0)) {
            Ok(()) => return Err(anyhow!("expected missing entry to fail")),
            Err(err) => err,
        };
        assert!(err.to_string().contains("T-404"));
        Ok(())
    }

    #[test]
    fn presence_pass_demotes_only_flipped_synced_entries() -> Result<()> {
        let mut store = open_migrated()?;
        for (offset, id) in ["T-1", "T-2", "T-3", "T-4"].into_iter().enumerate() {
            store.insert_entry(&entry(id, i64::try_from(offset)?))?;
        }
        store.write_outcome("T-1", &SyncOutcome::Created { sink_id: "a".to_string() })?;
        store.write_outcome("T-2", &SyncOutcome::Created { sink_id: "b".to_string() })?;
        store.write_outcome("T-3", &SyncOutcome::Unconfirmed)?;

        let summary = store.apply_presence(&present(&["T-2", "T-4"]))?;
        assert_eq!(summary, PresenceSummary { vanished: 2, reappeared: 0, demoted: 1 });

        let entries = store.list_entries()?;
        let state = |id: &str| {
            entries.iter().find(|entry| entry.id() == id).map(|entry| (entry.present, entry.sync_state))
        };
        assert_eq!(state("T-1"), Some((false, SyncState::NotSynced)));
        assert_eq!(state("T-2"), Some((true, SyncState::Synced)));
        assert_eq!(state("T-3"), Some((false, SyncState::Unknown)));
        assert_eq!(state("T-4"), Some((true, SyncState::NotSynced)));

        // Same set again: nothing flips.
        let again = store.apply_presence(&present(&["T-2", "T-4"]))?;
        assert_eq!(again, PresenceSummary::default());
        Ok(())
    }

    #[test]
    fn empty_presence_set_changes_nothing() -> Result<()> {
        let mut store = open_migrated()?;
        store.insert_entry(&entry("T-1", 0))?;
        store.write_outcome("T-1", &SyncOutcome::Created { sink_id: "a".to_string() })?;

        let summary = MirrorStore::reconcile_presence(&mut store, &BTreeSet::new())?;

        assert_eq!(summary, PresenceSummary::default());
        let Some(loaded) = store.get_entry("T-1")? else {
            return Err(anyhow!("entry T-1 missing"));
        };
        assert!(loaded.present);
        assert_eq!(loaded.sync_state, SyncState::Synced);
        Ok(())
    }

    #[test]
    fn pending_lists_unsynced_entries_oldest_first() -> Result<()> {
        let mut store = open_migrated()?;
        store.insert_entry(&entry("T-3", 30))?;
        store.insert_entry(&entry("T-1", 10))?;
        store.insert_entry(&entry("T-2", 20))?;
        store.write_outcome("T-1", &SyncOutcome::Created { sink_id: "a".to_string() })?;
        store.write_outcome("T-3", &SyncOutcome::Unconfirmed)?;

        assert_eq!(ids(&store.list_pending()?), vec!["T-2".to_string(), "T-3".to_string()]);
        assert_eq!(
            ids(&store.list_entries()?),
            vec!["T-1".to_string(), "T-2".to_string(), "T-3".to_string()]
        );
        Ok(())
    }

    #[test]
    fn outcomes_update_state_and_counts() -> Result<()> {
        let mut store = open_migrated()?;
        store.insert_entry(&entry("T-1", 0))?;
        store.insert_entry(&entry("T-2", 1))?;
        store.insert_entry(&entry("T-3", 2))?;

        store.write_outcome("T-1", &SyncOutcome::Created { sink_id: "a".to_string() })?;
        store.write_outcome("T-2", &SyncOutcome::Unconfirmed)?;
        assert!(store.write_outcome("T-404", &SyncOutcome::Updated).is_err());

        let counts = store.sync_state_counts()?;
        assert_eq!(counts.get(&SyncState::Synced), Some(&1));
        assert_eq!(counts.get(&SyncState::NotSynced), Some(&1));
        assert_eq!(counts.get(&SyncState::Unknown), Some(&1));
        Ok(())
    }

    #[test]
    fn trait_errors_map_to_store_errors() -> Result<()> {
        let mut store = open_migrated()?;
        let outcome = MirrorStore::record_outcome(&mut store, "T-404", &SyncOutcome::Updated);
        assert!(matches!(outcome, Err(SyncError::Store(message)) if message.contains("T-404")));
        Ok(())
    }

    #[test]
    fn migrate_v1_database_keeps_existing_rows() -> Result<()> {
        let mut store = SqliteStore::open(Path::new(":memory:"))?;
        store.conn.execute_batch(MIGRATION_001_SQL)?;
        store.conn.execute(
            "INSERT INTO mirror_entries(id, title, body, status, category, has_children, sink_id,
               sync_state, created_at, updated_at)
             VALUES ('T-1', 'legacy', 'old body', 'Done', 'Bug', 1, 'things-1', 'synced',
               '2026-01-01T00:00:00Z', '2026-01-02T00:00:00Z')",
            [],
        )?;

        let status = store.schema_status()?;
        assert_eq!(status.current_version, 1);
        assert_eq!(status.pending_versions, vec![2]);
        assert!(status.inferred_from_legacy);

        store.migrate()?;
        assert_eq!(current_schema_version(&store.conn)?, 2);

        let Some(migrated) = store.get_entry("T-1")? else {
            return Err(anyhow!("legacy entry missing after migration"));
        };
        assert!(migrated.present);
        assert_eq!(migrated.sync_state, SyncState::Synced);
        assert_eq!(migrated.sink_id(), Some("things-1"));
        assert!(migrated.record.has_children);
        assert_eq!(migrated.record.group_label, None);
        assert!(migrated.record.schedule_window.is_empty());
        Ok(())
    }

    #[test]
    fn migrate_rejects_foreign_mirror_table() -> Result<()> {
        let mut store = SqliteStore::open(Path::new(":memory:"))?;
        store.conn.execute_batch("CREATE TABLE mirror_entries(id TEXT PRIMARY KEY);")?;

        let err = match store.migrate() {
            Ok(()) => return Err(anyhow!("expected migration to fail on invalid schema")),
            Err(err) => err,
        };
        assert!(err.to_string().contains("no sync_state column"));
        Ok(())
    }

    #[test]
    fn on_disk_database_survives_reopen() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("mirror.sqlite3");

        {
            let mut store = SqliteStore::open(&path)?;
            store.migrate()?;
            store.insert_entry(&entry("T-1", 0))?;
        }

        let mut reopened = SqliteStore::open(&path)?;
        reopened.migrate()?;
        assert_eq!(ids(&reopened.list_entries()?), vec!["T-1".to_string()]);
        Ok(())
    }
}

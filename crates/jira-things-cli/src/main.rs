use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use jira_things_core::{PushScope, RunSummary, SyncEngine, SyncError, SyncState};
use jira_things_store_sqlite::SqliteStore;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

mod config;
mod jira;
mod things;

use config::{AppConfig, DEFAULT_CONFIG_PATH, DEFAULT_DB_PATH};
use jira::JiraClient;
use things::{SystemRunner, ThingsClient};

const CLI_CONTRACT_VERSION: &str = "cli.v1";

#[derive(Debug, Parser)]
#[command(name = "jira-things")]
#[command(about = "Mirror Jira issues into SQLite and propagate them to Things 3")]
struct Cli {
    /// YAML configuration file.
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Mirror database; overrides `database.path` from the config file.
    #[arg(long)]
    db: Option<PathBuf>,

    #[arg(short, long, default_value_t = false)]
    verbose: bool,

    #[arg(long, value_enum, default_value_t = Mode::Full)]
    mode: Mode,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, ValueEnum)]
enum Mode {
    /// Fetch from Jira and update the mirror only.
    UpdateMirrorOnly,
    /// Push entries that are not synced.
    PushUnsyncedOnly,
    /// Push every entry whatever its sync state.
    PushAllRegardlessOfState,
    /// Update the mirror, then push entries that are not synced.
    Full,
    /// Print sync state counts and entries needing attention. Touches no remote system.
    Report,
}

impl Mode {
    fn updates_mirror(self) -> bool {
        matches!(self, Self::UpdateMirrorOnly | Self::Full)
    }

    fn push_scope(self) -> Option<PushScope> {
        match self {
            Self::PushUnsyncedOnly | Self::Full => Some(PushScope::Pending),
            Self::PushAllRegardlessOfState => Some(PushScope::Everything),
            Self::UpdateMirrorOnly | Self::Report => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::UpdateMirrorOnly => "update-mirror-only",
            Self::PushUnsyncedOnly => "push-unsynced-only",
            Self::PushAllRegardlessOfState => "push-all-regardless-of-state",
            Self::Full => "full",
            Self::Report => "report",
        }
    }
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn init_tracing(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    // A report against an explicit database needs nothing from the config file.
    let config = match (cli.mode, cli.db.as_ref()) {
        (Mode::Report, Some(_)) => None,
        _ => Some(config::load(&cli.config)?),
    };
    let db_path = cli
        .db
        .clone()
        .or_else(|| config.as_ref().map(|config| config.database_path.clone()))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH));

    let mut store = open_store(&db_path)?;
    match config {
        Some(config) if cli.mode != Mode::Report => run_sync(cli.mode, &config, &mut store),
        _ => run_report(&store, &db_path),
    }
}

fn open_store(path: &Path) -> Result<SqliteStore> {
    let mut store = SqliteStore::open(path)?;
    store
        .migrate()
        .with_context(|| format!("failed to migrate mirror database {}", path.display()))?;
    Ok(store)
}

fn run_sync(mode: Mode, config: &AppConfig, store: &mut SqliteStore) -> Result<()> {
    let mut sink = ThingsClient::new(SystemRunner);
    let mut engine = SyncEngine::new(store, &mut sink, &config.sync);

    let mirror = if mode.updates_mirror() {
        let mut source = JiraClient::new(config.jira.clone());
        Some(engine.update_mirror(&mut source)?)
    } else {
        None
    };
    let push = match mode.push_scope().map(|scope| engine.push(scope)).transpose() {
        Ok(push) => push,
        Err(err) if mirror.is_some() => {
            // The mirror phase is already committed; report it before failing.
            emit_json(sync_payload(mode, &RunSummary { mirror, push: None }, Some(&err)))?;
            return Err(err.into());
        }
        Err(err) => return Err(err.into()),
    };

    emit_json(sync_payload(mode, &RunSummary { mirror, push }, None))
}

fn sync_payload(mode: Mode, summary: &RunSummary, push_error: Option<&SyncError>) -> Value {
    let mut payload = serde_json::json!({
        "mode": mode.as_str(),
        "mirror": summary.mirror,
        "push": summary.push
    });
    if let (Some(err), Value::Object(object)) = (push_error, &mut payload) {
        object.insert("push_error".to_string(), Value::String(err.to_string()));
    }
    payload
}

fn run_report(store: &SqliteStore, db_path: &Path) -> Result<()> {
    let counts = store.sync_state_counts()?;
    let entries = store.list_entries()?;
    let needs_attention: Vec<&str> = entries
        .iter()
        .filter(|entry| entry.sync_state == SyncState::Unknown)
        .map(|entry| entry.id())
        .collect();
    let absent = entries.iter().filter(|entry| !entry.present).count();
    let count = |state: SyncState| counts.get(&state).copied().unwrap_or(0);

    emit_json(serde_json::json!({
        "mode": Mode::Report.as_str(),
        "database": db_path.display().to_string(),
        "total": entries.len(),
        "counts": {
            "synced": count(SyncState::Synced),
            "not_synced": count(SyncState::NotSynced),
            "unknown": count(SyncState::Unknown)
        },
        "absent_from_source": absent,
        "needs_attention": needs_attention
    }))
}

#[cfg(test)]
mod tests {
    use jira_things_core::{MirrorSummary, PropagationSummary};

    use super::*;

    #[test]
    fn sync_payload_keeps_mirror_counts_when_push_fails() {
        let mirror = MirrorSummary { added: 2, updated: 1, unchanged: 4, ..MirrorSummary::default() };
        let err = SyncError::SinkUnavailable("Things is not running".to_string());

        let payload =
            sync_payload(Mode::Full, &RunSummary { mirror: Some(mirror), push: None }, Some(&err));

        assert_eq!(payload["mode"], "full");
        assert_eq!(payload["mirror"]["added"], 2);
        assert_eq!(payload["mirror"]["unchanged"], 4);
        assert!(payload["push"].is_null());
        assert!(payload["push_error"].as_str().is_some_and(|text| text.contains("Things is not running")));
    }

    #[test]
    fn sync_payload_without_error_has_no_error_field() {
        let summary = RunSummary {
            mirror: None,
            push: Some(PropagationSummary { created: 1, updated: 0, failed: 0 }),
        };

        let payload = sync_payload(Mode::PushUnsyncedOnly, &summary, None);

        assert_eq!(payload["push"]["created"], 1);
        assert!(payload.get("push_error").is_none());
    }
}

//! YAML configuration file, validated into engine settings and client settings.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use jira_things_core::{QueryGroup, StatusPartitions, SyncError, SyncSettings};
use serde::Deserialize;

use crate::jira::{JiraRequestConfig, JiraSettings};

pub const DEFAULT_CONFIG_PATH: &str = "./jira-things.yaml";
pub const DEFAULT_DB_PATH: &str = "./jira-things.sqlite3";

const JIRA_TOKEN_ENV: &str = "JIRA_API_TOKEN";
const THINGS_TOKEN_ENV: &str = "THINGS_AUTH_TOKEN";
const MAX_PAGE_SIZE: u32 = 5000;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    jira: JiraSection,
    #[serde(default)]
    queries: Vec<QuerySection>,
    #[serde(default)]
    statuses: StatusSection,
    #[serde(default)]
    things: ThingsSection,
    #[serde(default)]
    database: DatabaseSection,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct JiraSection {
    base_url: String,
    user_email: String,
    #[serde(default)]
    api_token: Option<String>,
    #[serde(default = "default_page_size")]
    page_size: u32,
    #[serde(default)]
    timeout_secs: Option<u64>,
    #[serde(default)]
    max_retries: Option<u32>,
    #[serde(default)]
    retry_delay_ms: Option<u64>,
    /// Single query accepted when `queries` is absent.
    #[serde(default)]
    jql: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct QuerySection {
    name: String,
    jql: String,
    #[serde(default)]
    project: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct StatusSection {
    #[serde(default)]
    completed: BTreeSet<String>,
    #[serde(default)]
    today: BTreeSet<String>,
    #[serde(default)]
    anytime: BTreeSet<String>,
    #[serde(default)]
    someday: BTreeSet<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ThingsSection {
    #[serde(default)]
    auth_token: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    type_as_tag: bool,
    #[serde(default)]
    project: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct DatabaseSection {
    #[serde(default)]
    path: Option<PathBuf>,
}

fn default_page_size() -> u32 {
    100
}

/// Everything the binary needs to run, resolved from file and environment.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub sync: SyncSettings,
    pub jira: JiraSettings,
    pub database_path: PathBuf,
}

/// Read, override from the process environment, and validate a config file.
///
/// # Errors
/// Returns an error when the file cannot be read or parsed, or a
/// [`SyncError::Configuration`] when its contents are invalid.
pub fn load(path: &Path) -> Result<AppConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    parse(&raw, |name| std::env::var(name).ok())
        .with_context(|| format!("invalid config file {}", path.display()))
}

/// Parse config text, consulting `env` for secret overrides.
///
/// # Errors
/// Returns an error when the YAML is malformed or the settings are invalid.
pub fn parse<F>(raw: &str, env: F) -> Result<AppConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let file: FileConfig = serde_yaml::from_str(raw).context("failed to parse YAML config")?;
    Ok(resolve(file, &env)?)
}

fn resolve<F>(file: FileConfig, env: &F) -> Result<AppConfig, SyncError>
where
    F: Fn(&str) -> Option<String>,
{
    let FileConfig { jira, queries, statuses, things, database } = file;

    let base_url = jira.base_url.trim().trim_end_matches('/').to_string();
    if !(base_url.starts_with("https://") || base_url.starts_with("http://")) {
        return Err(config_error(format!("jira.base_url must be an http(s) URL, got `{base_url}`")));
    }
    let user_email = jira.user_email.trim().to_string();
    if user_email.is_empty() {
        return Err(config_error("jira.user_email is required"));
    }
    let api_token = override_secret(env, JIRA_TOKEN_ENV, jira.api_token)
        .ok_or_else(|| config_error(format!("jira.api_token is required (or set {JIRA_TOKEN_ENV})")))?;
    if jira.page_size == 0 || jira.page_size > MAX_PAGE_SIZE {
        return Err(config_error(format!(
            "jira.page_size must be between 1 and {MAX_PAGE_SIZE}, got {}",
            jira.page_size
        )));
    }

    let defaults = JiraRequestConfig::default();
    let request = JiraRequestConfig {
        timeout_secs: jira.timeout_secs.unwrap_or(defaults.timeout_secs),
        max_retries: jira.max_retries.unwrap_or(defaults.max_retries),
        retry_delay_ms: jira.retry_delay_ms.unwrap_or(defaults.retry_delay_ms),
    };
    if request.timeout_secs == 0 {
        return Err(config_error("jira.timeout_secs must be positive"));
    }

    let query_groups = match (queries.is_empty(), jira.jql) {
        (false, Some(_)) => {
            return Err(config_error("use either `queries` or the legacy `jira.jql`, not both"));
        }
        (false, None) => queries
            .into_iter()
            .map(|query| QueryGroup {
                name: query.name,
                query: query.jql,
                group_label: query.project.filter(|project| !project.trim().is_empty()),
            })
            .collect(),
        (true, Some(jql)) => {
            vec![QueryGroup { name: "default".to_string(), query: jql, group_label: None }]
        }
        (true, None) => Vec::new(),
    };

    let sync = SyncSettings {
        statuses: StatusPartitions {
            completed: statuses.completed,
            today: statuses.today,
            anytime: statuses.anytime,
            someday: statuses.someday,
        },
        credential: override_secret(env, THINGS_TOKEN_ENV, things.auth_token),
        tags: things.tags,
        category_as_tag: things.type_as_tag,
        default_list: things.project.filter(|project| !project.trim().is_empty()),
        source_base_url: base_url.clone(),
        query_groups,
    };
    sync.validate()?;

    Ok(AppConfig {
        sync,
        jira: JiraSettings { base_url, user_email, api_token, page_size: jira.page_size, request },
        database_path: database.path.unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH)),
    })
}

/// Environment value when set and non-empty, else the file value when non-empty.
fn override_secret<F>(env: &F, name: &str, file_value: Option<String>) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    env(name)
        .filter(|value| !value.trim().is_empty())
        .or(file_value)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn config_error(message: impl Into<String>) -> SyncError {
    SyncError::Configuration(message.into())
}

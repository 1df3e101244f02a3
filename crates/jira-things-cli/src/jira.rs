//! Jira Cloud REST client used as the record source.

use std::thread;
use std::time::Duration;

use base64::{engine::general_purpose, Engine as _};
use jira_things_core::{QueryGroup, Record, RecordSource, ScheduleWindow, SyncError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

const SPRINT_SCHEMA: &str = "com.pyxis.greenhopper.jira:gh-sprint";
const BASE_FIELDS: [&str; 5] = ["summary", "description", "subtasks", "status", "issuetype"];

#[derive(Debug, Error)]
pub enum JiraError {
    #[error("request error: {0}")]
    Request(String),
    #[error("API error: {0}")]
    Api(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("authentication failed - check the user email and API token")]
    AuthFailed,
    #[error("rate limited - try again later")]
    RateLimited,
}

impl From<JiraError> for SyncError {
    fn from(err: JiraError) -> Self {
        SyncError::SourceFetch(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
pub struct JiraRequestConfig {
    /// Request timeout in seconds.
    pub timeout_secs: u64,
    /// Retries for transient errors.
    pub max_retries: u32,
    /// Base delay between retries; grows linearly with the attempt number.
    pub retry_delay_ms: u64,
}

impl Default for JiraRequestConfig {
    fn default() -> Self {
        Self { timeout_secs: 30, max_retries: 2, retry_delay_ms: 1000 }
    }
}

#[derive(Clone, Eq, PartialEq)]
pub struct JiraSettings {
    pub base_url: String,
    pub user_email: String,
    pub api_token: String,
    pub page_size: u32,
    pub request: JiraRequestConfig,
}

impl std::fmt::Debug for JiraSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JiraSettings")
            .field("base_url", &self.base_url)
            .field("user_email", &self.user_email)
            .field("api_token", &"<redacted>")
            .field("page_size", &self.page_size)
            .field("request", &self.request)
            .finish()
    }
}

/// How the retry loop should treat an HTTP status.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum StatusClass {
    Success,
    Auth,
    RateLimited,
    Retryable,
    Fatal,
}

fn classify_status(status: u16) -> StatusClass {
    match status {
        200..=299 => StatusClass::Success,
        401 | 403 => StatusClass::Auth,
        429 => StatusClass::RateLimited,
        500..=599 => StatusClass::Retryable,
        _ => StatusClass::Fatal,
    }
}

pub struct JiraClient {
    agent: ureq::Agent,
    settings: JiraSettings,
    auth_header: String,
    verified: bool,
    sprint_field: Option<Option<String>>,
}

impl JiraClient {
    #[must_use]
    pub fn new(settings: JiraSettings) -> Self {
        let auth = format!("{}:{}", settings.user_email, settings.api_token);
        let auth_header = format!("Basic {}", general_purpose::STANDARD.encode(auth));
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(settings.request.timeout_secs))
            .build();
        tracing::debug!(
            base_url = %settings.base_url,
            api_token_present = !settings.api_token.is_empty(),
            "initialized Jira client"
        );
        Self { agent, settings, auth_header, verified: false, sprint_field: None }
    }

    /// Check credentials once per client against the current-user endpoint.
    ///
    /// # Errors
    /// Returns [`JiraError::AuthFailed`] on rejected credentials, or a transport error.
    pub fn verify_connection(&mut self) -> Result<(), JiraError> {
        if self.verified {
            return Ok(());
        }
        let myself = self.get_json("/rest/api/3/myself", &[])?;
        tracing::info!(
            display_name = myself["displayName"].as_str().unwrap_or("unknown"),
            "connected to Jira"
        );
        self.verified = true;
        Ok(())
    }

    /// Id of the sprint custom field, looked up once per client.
    ///
    /// # Errors
    /// Returns an error when the field list cannot be fetched.
    pub fn sprint_field(&mut self) -> Result<Option<String>, JiraError> {
        if let Some(field) = &self.sprint_field {
            return Ok(field.clone());
        }
        let fields = self.get_json("/rest/api/3/field", &[])?;
        let field = find_sprint_field(&fields);
        tracing::debug!(sprint_field = ?field, "resolved sprint field");
        self.sprint_field = Some(field.clone());
        Ok(field)
    }

    /// Every issue matching `jql`, following `nextPageToken` until the last page.
    ///
    /// # Errors
    /// Returns an error when any page fails or an issue cannot be parsed.
    pub fn search(&mut self, jql: &str) -> Result<Vec<Record>, JiraError> {
        self.verify_connection()?;
        let sprint_field = self.sprint_field()?;
        let jql = expand_current_user(jql, &self.settings.user_email);
        tracing::debug!(jql = %jql, "searching Jira");

        let mut fields: Vec<&str> = BASE_FIELDS.to_vec();
        if let Some(field) = sprint_field.as_deref() {
            fields.push(field);
        }
        let fields = fields.join(",");
        let page_size = self.settings.page_size.to_string();

        let mut records = Vec::new();
        let mut next_page_token: Option<String> = None;
        loop {
            let mut query = vec![
                ("jql", jql.as_str()),
                ("fields", fields.as_str()),
                ("maxResults", page_size.as_str()),
            ];
            if let Some(token) = next_page_token.as_deref() {
                query.push(("nextPageToken", token));
            }
            let page = self.get_json("/rest/api/3/search/jql", &query)?;

            let issues = page["issues"]
                .as_array()
                .ok_or_else(|| JiraError::Parse("search response has no `issues` array".to_string()))?;
            for issue in issues {
                let record = parse_issue(issue, sprint_field.as_deref())?;
                tracing::debug!(id = %record.id, title = %record.title, "processing issue");
                records.push(record);
            }

            match next_page(&page, next_page_token.as_deref())? {
                Some(token) => next_page_token = Some(token),
                None => break,
            }
        }

        if records.is_empty() {
            tracing::warn!(jql = %jql, "no issues matched query");
        } else {
            tracing::info!(count = records.len(), "retrieved issues from Jira");
        }
        Ok(records)
    }

    fn get_json(&self, path: &str, query: &[(&str, &str)]) -> Result<Value, JiraError> {
        let url = format!("{}{path}", self.settings.base_url);
        let response = self.execute_with_retry(|| {
            let mut request = self
                .agent
                .get(&url)
                .set("Authorization", &self.auth_header)
                .set("Accept", "application/json");
            for (key, value) in query {
                request = request.query(key, value);
            }
            request.call()
        })?;
        let body = response
            .into_string()
            .map_err(|err| JiraError::Request(format!("failed to read response from {path}: {err}")))?;
        tracing::debug!(path, bytes = body.len(), "Jira response received");
        serde_json::from_str(&body)
            .map_err(|err| JiraError::Parse(format!("invalid JSON from {path}: {err}")))
    }

    /// Run a request, retrying transport failures and 5xx responses with linear backoff.
    /// Auth failures and rate limiting are never retried.
    fn execute_with_retry<F>(&self, request_fn: F) -> Result<ureq::Response, JiraError>
    where
        F: Fn() -> Result<ureq::Response, ureq::Error>,
    {
        let config = self.settings.request;
        let mut last_error = None;

        for attempt in 0..=config.max_retries {
            let error = match request_fn() {
                Ok(response) => return Ok(response),
                Err(ureq::Error::Status(code, response)) => match classify_status(code) {
                    StatusClass::Success => return Ok(response),
                    StatusClass::Auth => return Err(JiraError::AuthFailed),
                    StatusClass::RateLimited => return Err(JiraError::RateLimited),
                    StatusClass::Retryable => JiraError::Api(format!("server error: HTTP {code}")),
                    StatusClass::Fatal => {
                        // Size only; bodies can echo query contents.
                        let bytes = response.into_string().map(|body| body.len()).unwrap_or(0);
                        tracing::debug!(status = code, bytes, "Jira error response received");
                        return Err(JiraError::Api(format!("HTTP {code}")));
                    }
                },
                Err(ureq::Error::Transport(transport)) => match transport.kind() {
                    ureq::ErrorKind::Dns | ureq::ErrorKind::ConnectionFailed | ureq::ErrorKind::Io => {
                        JiraError::Request(transport.to_string())
                    }
                    _ => return Err(JiraError::Request(transport.to_string())),
                },
            };

            if attempt < config.max_retries {
                let delay = config.retry_delay_ms.saturating_mul(u64::from(attempt) + 1);
                tracing::warn!(attempt = attempt + 1, delay_ms = delay, error = %error, "retrying Jira request");
                thread::sleep(Duration::from_millis(delay));
            }
            last_error = Some(error);
        }

        Err(last_error.unwrap_or_else(|| JiraError::Api("unknown error".to_string())))
    }
}

impl RecordSource for JiraClient {
    fn fetch(&mut self, group: &QueryGroup) -> Result<Vec<Record>, SyncError> {
        tracing::info!(group = %group.name, "fetching query group");
        self.search(&group.query).map_err(SyncError::from)
    }
}

/// Token for the page after `page`, or `None` once Jira marks it as the last one.
///
/// A page that is not marked last must carry a fresh token; anything else would end
/// the search on a partial result set.
fn next_page(page: &Value, previous: Option<&str>) -> Result<Option<String>, JiraError> {
    if page["isLast"].as_bool() == Some(true) {
        return Ok(None);
    }
    let token = page["nextPageToken"]
        .as_str()
        .filter(|token| !token.is_empty())
        .ok_or_else(|| {
            JiraError::Parse("search page is not the last one but has no nextPageToken".to_string())
        })?;
    if previous == Some(token) {
        return Err(JiraError::Parse("search returned the same nextPageToken twice".to_string()));
    }
    Ok(Some(token.to_string()))
}

/// Replace `currentUser()` with the quoted configured email.
fn expand_current_user(jql: &str, user_email: &str) -> String {
    if user_email.is_empty() {
        return jql.to_string();
    }
    jql.replace("currentUser()", &format!("\"{user_email}\""))
}

fn find_sprint_field(fields: &Value) -> Option<String> {
    fields.as_array()?.iter().find_map(|field| {
        if field["schema"]["custom"].as_str() == Some(SPRINT_SCHEMA) {
            field["id"].as_str().map(str::to_string)
        } else {
            None
        }
    })
}

/// Map one search result issue into a source record.
fn parse_issue(issue: &Value, sprint_field: Option<&str>) -> Result<Record, JiraError> {
    let key = issue["key"]
        .as_str()
        .filter(|key| !key.is_empty())
        .ok_or_else(|| JiraError::Parse("issue without a key".to_string()))?;
    let fields = &issue["fields"];

    let mut record = Record::new(
        key,
        fields["summary"].as_str().unwrap_or("No Summary"),
        fields["status"]["name"].as_str().unwrap_or_default(),
    );
    record.body = parse_description(fields).unwrap_or_default();
    record.category = fields["issuetype"]["name"]
        .as_str()
        .filter(|name| !name.is_empty())
        .map(str::to_string);
    record.has_children = fields["subtasks"].as_array().is_some_and(|subtasks| !subtasks.is_empty());
    if let Some(field) = sprint_field {
        record.schedule_window = latest_sprint(&fields[field]);
    }
    Ok(record)
}

/// Sprint with the latest end date; sprints without one sort first.
fn latest_sprint(value: &Value) -> ScheduleWindow {
    let Some(sprints) = value.as_array() else {
        return ScheduleWindow::default();
    };
    let Some(latest) = sprints
        .iter()
        .filter(|sprint| sprint.is_object())
        .max_by(|lhs, rhs| {
            let lhs = lhs["endDate"].as_str().unwrap_or_default();
            let rhs = rhs["endDate"].as_str().unwrap_or_default();
            lhs.cmp(rhs)
        })
    else {
        return ScheduleWindow::default();
    };

    let text = |key: &str| latest[key].as_str().filter(|value| !value.is_empty()).map(str::to_string);
    ScheduleWindow {
        label: text("name"),
        state: text("state"),
        end_time: text("endDate").map(|end| match end.strip_suffix('Z') {
            Some(stripped) => format!("{stripped}+00:00"),
            None => end,
        }),
    }
}

/// Plain text of a description in either legacy string or Atlassian Document Format.
fn parse_description(fields: &Value) -> Option<String> {
    let desc = &fields["description"];

    if desc.is_null() {
        return None;
    }

    if let Some(text) = desc.as_str() {
        return Some(text.to_string());
    }

    if let Some(content) = desc["content"].as_array() {
        let mut text_parts: Vec<String> = Vec::new();
        for block in content {
            extract_text_from_block(block, &mut text_parts);
        }
        if !text_parts.is_empty() {
            return Some(text_parts.join("\n"));
        }
    }

    None
}

fn extract_text_from_block(block: &Value, parts: &mut Vec<String>) {
    if let Some(text) = block["text"].as_str() {
        parts.push(text.to_string());
        return;
    }

    if let Some(content) = block["content"].as_array() {
        for child in content {
            extract_text_from_block(child, parts);
        }
    }
}

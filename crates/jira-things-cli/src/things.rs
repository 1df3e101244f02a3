//! Things 3 client used as the task sink.
//!
//! Creation goes through AppleScript because it returns the new to-do id. Updates use
//! the `things:///update` URL scheme, which requires the user's auth token.

use std::process::Command;

use jira_things_core::{SyncError, TaskDraft, TaskSink};
use thiserror::Error;

const CREATE_SCRIPT: &str = r#"
on run argv
  set taskTitle to item 1 of argv
  set taskNotes to item 2 of argv
  set taskTags to item 3 of argv
  set taskList to item 4 of argv
  set taskWhen to item 5 of argv
  set taskDone to item 6 of argv
  tell application "Things3"
    set newToDo to make new to do with properties {name:taskTitle, notes:taskNotes, tag names:taskTags}
    if taskList is not "" then
      try
        set project of newToDo to project taskList
      on error
        try
          set area of newToDo to area taskList
        end try
      end try
    end if
    if taskWhen is "today" then
      move newToDo to list "Today"
    else if taskWhen is "someday" then
      move newToDo to list "Someday"
    else
      move newToDo to list "Anytime"
    end if
    if taskDone is "true" then set status of newToDo to completed
    return id of newToDo
  end tell
end run
"#;

const PROBE_SCRIPT: &str = r#"id of application "Things3""#;

#[derive(Debug, Error)]
pub enum ThingsError {
    #[error("failed to launch {program}: {message}")]
    Launch { program: String, message: String },
    #[error("{program} exited unsuccessfully: {stderr}")]
    Command { program: String, stderr: String },
    #[error("Things did not return an id for the new to-do")]
    MissingId,
}

impl From<ThingsError> for SyncError {
    fn from(err: ThingsError) -> Self {
        SyncError::SinkCall(err.to_string())
    }
}

/// Runs an external program and returns its trimmed stdout.
pub trait CommandRunner {
    /// # Errors
    /// Returns an error when the program cannot be launched or exits unsuccessfully.
    fn run(&mut self, program: &str, args: &[String]) -> Result<String, ThingsError>;
}

#[derive(Debug, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&mut self, program: &str, args: &[String]) -> Result<String, ThingsError> {
        let output = Command::new(program).args(args).output().map_err(|err| ThingsError::Launch {
            program: program.to_string(),
            message: err.to_string(),
        })?;

        if !output.status.success() {
            return Err(ThingsError::Command {
                program: program.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

pub struct ThingsClient<R: CommandRunner> {
    runner: R,
}

impl<R: CommandRunner> ThingsClient<R> {
    pub fn new(runner: R) -> Self {
        Self { runner }
    }

    fn open_url(&mut self, url: &str) -> Result<(), ThingsError> {
        self.runner.run("open", &["-g".to_string(), url.to_string()])?;
        Ok(())
    }
}

impl<R: CommandRunner> TaskSink for ThingsClient<R> {
    fn ensure_available(&mut self) -> Result<(), SyncError> {
        self.runner
            .run("osascript", &["-e".to_string(), PROBE_SCRIPT.to_string()])
            .map(|_| ())
            .map_err(|err| SyncError::SinkUnavailable(err.to_string()))
    }

    fn create_task(&mut self, task: &TaskDraft) -> Result<String, SyncError> {
        let mut args = vec!["-e".to_string(), CREATE_SCRIPT.to_string()];
        args.extend(create_args(task));
        let id = self.runner.run("osascript", &args)?;
        if id.is_empty() {
            return Err(ThingsError::MissingId.into());
        }
        tracing::debug!(sink_id = %id, "Things returned to-do id");
        Ok(id)
    }

    fn update_task(&mut self, sink_id: &str, credential: &str, task: &TaskDraft) -> Result<(), SyncError> {
        self.open_url(&update_url(sink_id, credential, task))?;
        Ok(())
    }

    fn complete_task(&mut self, sink_id: &str, credential: &str) -> Result<(), SyncError> {
        self.open_url(&complete_url(sink_id, credential))?;
        Ok(())
    }
}

/// Positional arguments for [`CREATE_SCRIPT`].
fn create_args(task: &TaskDraft) -> [String; 6] {
    [
        task.title.clone(),
        task.notes.clone(),
        task.tags.join(", "),
        task.list.clone().unwrap_or_default(),
        task.schedule.as_str().to_string(),
        task.completed.to_string(),
    ]
}

fn update_url(sink_id: &str, credential: &str, task: &TaskDraft) -> String {
    let mut params = vec![
        ("id", sink_id.to_string()),
        ("auth-token", credential.to_string()),
        ("title", task.title.clone()),
        ("notes", task.notes.clone()),
        ("tags", task.tags.join(",")),
        ("when", task.schedule.as_str().to_string()),
        ("completed", task.completed.to_string()),
    ];
    if let Some(list) = task.list.as_deref() {
        params.push(("list", list.to_string()));
    }
    things_url("update", &params)
}

fn complete_url(sink_id: &str, credential: &str) -> String {
    things_url(
        "update",
        &[
            ("id", sink_id.to_string()),
            ("auth-token", credential.to_string()),
            ("completed", "true".to_string()),
        ],
    )
}

fn things_url(command: &str, params: &[(&str, String)]) -> String {
    let query = params
        .iter()
        .map(|(key, value)| format!("{key}={}", urlencoding::encode(value)))
        .collect::<Vec<_>>()
        .join("&");
    format!("things:///{command}?{query}")
}

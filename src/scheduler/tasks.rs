//! Task configuration
//!
//! The task file is an ordered list (or a map keyed by task name) of records:
//!
//! ```json
//! [
//!   {"type": "AutoLogin", "status": "READY", "details": ["acct-1", "08:55", "1"]},
//!   {"type": "GridTrading", "status": "RUNNING", "details": "L1 / 09:00 / 15:30 / 60"}
//! ]
//! ```
//!
//! Details are either a list of fields or one `" / "`-joined string. Records
//! that fail to decode are reported and skipped; the rest still run.

use chrono::NaiveTime;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing::warn;

use super::window::{parse_time, TimeWindow};
use crate::error::{ConfigError, TaskParseError};

const DETAIL_SEPARATOR: &str = " / ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    Ready,
    Running,
    Paused,
    Executed,
}

impl FromStr for TaskStatus {
    type Err = TaskParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "READY" => Ok(TaskStatus::Ready),
            "RUNNING" => Ok(TaskStatus::Running),
            "PAUSED" => Ok(TaskStatus::Paused),
            "EXECUTED" => Ok(TaskStatus::Executed),
            _ => Err(TaskParseError::UnknownStatus(s.to_string())),
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Ready => "READY",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Paused => "PAUSED",
            TaskStatus::Executed => "EXECUTED",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginTask {
    pub account_id: String,
    pub start_time: NaiveTime,
    pub extra: Vec<String>,
    pub status: TaskStatus,
}

impl LoginTask {
    /// Running and Executed log in at once, Ready waits for the start time
    pub fn is_due(&self, now: NaiveTime) -> bool {
        match self.status {
            TaskStatus::Running | TaskStatus::Executed => true,
            TaskStatus::Ready => now >= self.start_time,
            TaskStatus::Paused => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridTask {
    pub ladder_id: String,
    pub window: TimeWindow,
    pub interval: Duration,
    pub status: TaskStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    AutoLogin(LoginTask),
    GridTrading(GridTask),
}

impl Task {
    pub fn status(&self) -> TaskStatus {
        match self {
            Task::AutoLogin(t) => t.status,
            Task::GridTrading(t) => t.status,
        }
    }
}

// =============================================================================
// Raw records
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Details {
    Fields(Vec<serde_json::Value>),
    Joined(String),
}

impl Default for Details {
    fn default() -> Self {
        Details::Fields(Vec::new())
    }
}

impl Details {
    fn fields(&self) -> Vec<String> {
        match self {
            Details::Fields(values) => values
                .iter()
                .map(|v| match v {
                    serde_json::Value::String(s) => s.trim().to_string(),
                    other => other.to_string(),
                })
                .collect(),
            Details::Joined(s) if s.trim().is_empty() => Vec::new(),
            Details::Joined(s) => s
                .split(DETAIL_SEPARATOR)
                .map(|f| f.trim().to_string())
                .collect(),
        }
    }
}

fn default_status() -> String {
    "READY".to_string()
}

#[derive(Debug, Clone, Deserialize)]
struct TaskRecord {
    #[serde(rename = "type", alias = "task_type")]
    kind: String,
    #[serde(default = "default_status")]
    status: String,
    #[serde(default)]
    details: Details,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TaskFile {
    List(Vec<TaskRecord>),
    Map(BTreeMap<String, TaskRecord>),
}

fn parse_interval(value: &str) -> Result<Duration, TaskParseError> {
    let trimmed = value.trim();
    if let Ok(secs) = trimmed.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    match trimmed.parse::<f64>() {
        Ok(secs) if secs.is_finite() && secs >= 0.0 => Ok(Duration::from_secs_f64(secs)),
        _ => Err(TaskParseError::InvalidInterval(value.to_string())),
    }
}

fn parse_record(record: &TaskRecord) -> Result<Task, TaskParseError> {
    let status: TaskStatus = record.status.parse()?;
    let fields = record.details.fields();
    let normalized: String = record
        .kind
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase();

    match normalized.as_str() {
        "autologin" | "login" => {
            if fields.len() < 2 {
                return Err(TaskParseError::MissingFields {
                    kind: "AutoLogin",
                    expected: 2,
                    found: fields.len(),
                });
            }
            Ok(Task::AutoLogin(LoginTask {
                account_id: fields[0].clone(),
                start_time: parse_time("start_time", &fields[1])?,
                extra: fields[2..].to_vec(),
                status,
            }))
        }
        "gridtrading" | "grid" => {
            if fields.len() < 4 {
                return Err(TaskParseError::MissingFields {
                    kind: "GridTrading",
                    expected: 4,
                    found: fields.len(),
                });
            }
            Ok(Task::GridTrading(GridTask {
                ladder_id: fields[0].clone(),
                window: TimeWindow::parse(&fields[1], &fields[2])?,
                interval: parse_interval(&fields[3])?,
                status,
            }))
        }
        _ => Err(TaskParseError::UnknownType(record.kind.clone())),
    }
}

/// A task record that could not be decoded
#[derive(Debug, Clone, PartialEq)]
pub struct TaskIssue {
    /// List position or map key of the record
    pub key: String,
    pub error: TaskParseError,
}

/// Decode a task file; bad records are returned as issues
pub fn parse_tasks(json: &str) -> Result<(Vec<Task>, Vec<TaskIssue>), ConfigError> {
    let file: TaskFile = serde_json::from_str(json)?;
    let records: Vec<(String, TaskRecord)> = match file {
        TaskFile::List(list) => list
            .into_iter()
            .enumerate()
            .map(|(i, r)| (i.to_string(), r))
            .collect(),
        TaskFile::Map(map) => map.into_iter().collect(),
    };

    let mut tasks = Vec::with_capacity(records.len());
    let mut issues = Vec::new();
    for (key, record) in records {
        match parse_record(&record) {
            Ok(task) => tasks.push(task),
            Err(error) => issues.push(TaskIssue { key, error }),
        }
    }
    Ok((tasks, issues))
}

// =============================================================================
// Task sources
// =============================================================================

/// Where the loop reads its task list from every pass
pub trait TaskSource: Send + Sync {
    fn load(&self) -> Result<Vec<Task>, ConfigError>;
}

/// Task file on disk, re-read on every pass
#[derive(Debug, Clone)]
pub struct FileTaskSource {
    path: PathBuf,
}

impl FileTaskSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TaskSource for FileTaskSource {
    fn load(&self) -> Result<Vec<Task>, ConfigError> {
        let contents = std::fs::read_to_string(&self.path).map_err(|source| ConfigError::Io {
            path: self.path.clone(),
            source,
        })?;
        let (tasks, issues) = parse_tasks(&contents)?;
        for issue in &issues {
            warn!(
                "Skipping task {} in {}: {}",
                issue.key,
                self.path.display(),
                issue.error
            );
        }
        Ok(tasks)
    }
}

/// Fixed task list that can be swapped at runtime
#[derive(Debug, Default)]
pub struct StaticTaskSource {
    tasks: Mutex<Vec<Task>>,
}

impl StaticTaskSource {
    pub fn new(tasks: Vec<Task>) -> Self {
        Self {
            tasks: Mutex::new(tasks),
        }
    }

    pub fn replace(&self, tasks: Vec<Task>) {
        *self.tasks.lock().unwrap_or_else(PoisonError::into_inner) = tasks;
    }
}

impl TaskSource for StaticTaskSource {
    fn load(&self) -> Result<Vec<Task>, ConfigError> {
        Ok(self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }
}

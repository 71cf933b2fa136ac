use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PRIORITY: u8 = 5;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_PAGE_SIZE: u32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
  Pending,
  Queued,
  Processing,
  Completed,
  Failed,
  Retrying,
}

impl TaskStatus {
  pub const ALL: [TaskStatus; 6] = [
    TaskStatus::Pending,
    TaskStatus::Queued,
    TaskStatus::Processing,
    TaskStatus::Completed,
    TaskStatus::Failed,
    TaskStatus::Retrying,
  ];

  pub fn as_str(self) -> &'static str {
    match self {
      TaskStatus::Pending => "PENDING",
      TaskStatus::Queued => "QUEUED",
      TaskStatus::Processing => "PROCESSING",
      TaskStatus::Completed => "COMPLETED",
      TaskStatus::Failed => "FAILED",
      TaskStatus::Retrying => "RETRYING",
    }
  }
}

impl fmt::Display for TaskStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for TaskStatus {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    TaskStatus::ALL
      .into_iter()
      .find(|status| status.as_str().eq_ignore_ascii_case(s))
      .ok_or_else(|| format!("Unknown task status '{}'", s))
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
  ImageProcessing,
  WebScraping,
  DataAnalysis,
  EmailSending,
  ReportGeneration,
}

impl TaskType {
  pub const ALL: [TaskType; 5] = [
    TaskType::ImageProcessing,
    TaskType::WebScraping,
    TaskType::DataAnalysis,
    TaskType::EmailSending,
    TaskType::ReportGeneration,
  ];

  pub fn as_str(self) -> &'static str {
    match self {
      TaskType::ImageProcessing => "IMAGE_PROCESSING",
      TaskType::WebScraping => "WEB_SCRAPING",
      TaskType::DataAnalysis => "DATA_ANALYSIS",
      TaskType::EmailSending => "EMAIL_SENDING",
      TaskType::ReportGeneration => "REPORT_GENERATION",
    }
  }
}

impl fmt::Display for TaskType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for TaskType {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    TaskType::ALL
      .into_iter()
      .find(|task_type| task_type.as_str().eq_ignore_ascii_case(s))
      .ok_or_else(|| format!("Unsupported task type '{}'", s))
  }
}

/// Snapshot of a backend task. Never edited locally; a newer fetch replaces it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
  pub id: String,
  #[serde(rename = "type")]
  pub task_type: TaskType,
  pub status: TaskStatus,
  pub payload: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub result: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error_message: Option<String>,
  #[serde(default)]
  pub retry_count: u32,
  #[serde(default = "default_max_retries")]
  pub max_retries: u32,
  #[serde(default = "default_priority")]
  pub priority: u8,
  #[serde(with = "timestamp")]
  pub created_at: DateTime<Utc>,
  #[serde(with = "timestamp")]
  pub updated_at: DateTime<Utc>,
  #[serde(default, with = "timestamp::option", skip_serializing_if = "Option::is_none")]
  pub started_at: Option<DateTime<Utc>>,
  #[serde(default, with = "timestamp::option", skip_serializing_if = "Option::is_none")]
  pub completed_at: Option<DateTime<Utc>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub worker_id: Option<String>,
}

fn default_max_retries() -> u32 {
  DEFAULT_MAX_RETRIES
}

fn default_priority() -> u8 {
  DEFAULT_PRIORITY
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerStatus {
  Online,
  Offline,
  Busy,
  Idle,
}

impl fmt::Display for WorkerStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      WorkerStatus::Online => "ONLINE",
      WorkerStatus::Offline => "OFFLINE",
      WorkerStatus::Busy => "BUSY",
      WorkerStatus::Idle => "IDLE",
    };
    f.write_str(name)
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Worker {
  #[serde(rename = "workerId")]
  pub id: String,
  pub status: WorkerStatus,
  #[serde(with = "timestamp")]
  pub last_heartbeat: DateTime<Utc>,
  #[serde(default)]
  pub active_tasks: u32,
  #[serde(default)]
  pub total_processed: u64,
  #[serde(default)]
  pub total_failed: u64,
  #[serde(default)]
  pub cpu_usage: f64,
  #[serde(default)]
  pub memory_usage: f64,
  #[serde(with = "timestamp")]
  pub registered_at: DateTime<Utc>,
}

/// Aggregate counters. The per-worker endpoint only fills a subset, so every
/// field falls back to zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Statistics {
  pub total_tasks: u64,
  pub completed_tasks: u64,
  pub failed_tasks: u64,
  pub processing_tasks: u64,
  pub pending_tasks: u64,
  pub retrying_tasks: u64,
  pub success_rate: f64,
  pub active_workers: u64,
  pub status_counts: HashMap<String, u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageResponse<T> {
  pub content: Vec<T>,
  pub total_elements: u64,
  pub total_pages: u32,
  pub size: u32,
  #[serde(rename = "number")]
  pub page: u32,
  pub first: bool,
  pub last: bool,
}

impl<T> PageResponse<T> {
  /// Builds page `page` of a listing that holds `total_elements` items overall.
  pub fn new(content: Vec<T>, page: u32, size: u32, total_elements: u64) -> Self {
    let total_pages = if size == 0 {
      0
    } else {
      total_elements.div_ceil(size as u64) as u32
    };
    Self {
      content,
      total_elements,
      total_pages,
      size,
      page,
      first: page == 0,
      last: page.saturating_add(1) >= total_pages,
    }
  }

  pub fn is_consistent(&self) -> bool {
    self.content.len() <= self.size as usize
      && (self.total_elements == 0 || self.page < self.total_pages)
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSubmission {
  #[serde(rename = "type")]
  pub task_type: TaskType,
  pub payload: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub priority: Option<u8>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub max_retries: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortDirection {
  Asc,
  #[default]
  Desc,
}

impl fmt::Display for SortDirection {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      SortDirection::Asc => f.write_str("ASC"),
      SortDirection::Desc => f.write_str("DESC"),
    }
  }
}

/// Structured error body returned by the backend on non-2xx responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
  pub message: String,
  pub status: u16,
  #[serde(default)]
  pub timestamp: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub details: Option<String>,
}

/// The backend emits `LocalDateTime` values without an offset; those are read
/// as UTC. RFC 3339 values are accepted as well.
pub mod timestamp {
  use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
  use serde::{Deserialize, Deserializer, Serializer};

  pub fn parse(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    match DateTime::parse_from_rfc3339(raw) {
      Ok(parsed) => Ok(parsed.with_timezone(&Utc)),
      Err(_) => NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f").map(|naive| naive.and_utc()),
    }
  }

  pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::Millis, true))
  }

  pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
    let raw = String::deserialize(deserializer)?;
    parse(&raw).map_err(serde::de::Error::custom)
  }

  pub mod option {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error> {
      match value {
        Some(value) => super::serialize(value, serializer),
        None => serializer.serialize_none(),
      }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error> {
      match Option::<String>::deserialize(deserializer)? {
        Some(raw) => super::parse(&raw).map(Some).map_err(serde::de::Error::custom),
        None => Ok(None),
      }
    }
  }
}

use std::fmt;
use std::slice;
use std::time::Duration;

use crate::config::RefreshIntervals;
use crate::error::Result;
use crate::gateway::Gateway;
use crate::models::{PageResponse, SortDirection, Statistics, Task, TaskStatus, Worker};

pub const DEFAULT_SORT_FIELD: &str = "createdAt";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryKind {
  Tasks,
  Task,
  TasksByStatus,
  Workers,
  Worker,
  Statistics,
  WorkerStatistics,
}

/// Identifier of a cacheable remote read. Two keys are the same query iff
/// kind and every parameter match.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueryKey {
  Tasks {
    page: u32,
    size: u32,
    sort_by: String,
    direction: SortDirection,
  },
  Task {
    id: String,
  },
  TasksByStatus {
    status: TaskStatus,
    page: u32,
    size: u32,
  },
  Workers,
  Worker {
    id: String,
  },
  Statistics,
  WorkerStatistics {
    worker_id: String,
  },
}

impl QueryKey {
  pub fn tasks(page: u32, size: u32) -> Self {
    QueryKey::Tasks {
      page,
      size,
      sort_by: DEFAULT_SORT_FIELD.to_string(),
      direction: SortDirection::Desc,
    }
  }

  pub fn task(id: impl Into<String>) -> Self {
    QueryKey::Task { id: id.into() }
  }

  pub fn tasks_by_status(status: TaskStatus, page: u32, size: u32) -> Self {
    QueryKey::TasksByStatus { status, page, size }
  }

  pub fn worker(id: impl Into<String>) -> Self {
    QueryKey::Worker { id: id.into() }
  }

  pub fn worker_statistics(worker_id: impl Into<String>) -> Self {
    QueryKey::WorkerStatistics { worker_id: worker_id.into() }
  }

  pub fn kind(&self) -> QueryKind {
    match self {
      QueryKey::Tasks { .. } => QueryKind::Tasks,
      QueryKey::Task { .. } => QueryKind::Task,
      QueryKey::TasksByStatus { .. } => QueryKind::TasksByStatus,
      QueryKey::Workers => QueryKind::Workers,
      QueryKey::Worker { .. } => QueryKind::Worker,
      QueryKey::Statistics => QueryKind::Statistics,
      QueryKey::WorkerStatistics { .. } => QueryKind::WorkerStatistics,
    }
  }

  /// `tasks` and `tasksByStatus` keys: every listing a task mutation can change.
  pub fn is_task_listing(&self) -> bool {
    matches!(self.kind(), QueryKind::Tasks | QueryKind::TasksByStatus)
  }

  pub fn refresh_interval(&self, intervals: &RefreshIntervals) -> Duration {
    match self.kind() {
      QueryKind::Task | QueryKind::Worker => intervals.detail,
      QueryKind::Tasks
      | QueryKind::TasksByStatus
      | QueryKind::Workers
      | QueryKind::Statistics
      | QueryKind::WorkerStatistics => intervals.listing,
    }
  }

  pub async fn fetch(&self, gateway: &dyn Gateway) -> Result<QueryData> {
    let data = match self {
      QueryKey::Tasks { page, size, sort_by, direction } => {
        QueryData::TaskPage(gateway.fetch_tasks(*page, *size, sort_by, *direction).await?)
      }
      QueryKey::Task { id } => QueryData::Task(gateway.fetch_task(id).await?),
      QueryKey::TasksByStatus { status, page, size } => {
        QueryData::TaskPage(gateway.fetch_tasks_by_status(*status, *page, *size).await?)
      }
      QueryKey::Workers => QueryData::Workers(gateway.fetch_workers().await?),
      QueryKey::Worker { id } => QueryData::Worker(gateway.fetch_worker(id).await?),
      QueryKey::Statistics => QueryData::Statistics(gateway.fetch_statistics().await?),
      QueryKey::WorkerStatistics { worker_id } => {
        QueryData::Statistics(gateway.fetch_worker_statistics(worker_id).await?)
      }
    };
    Ok(data)
  }
}

impl fmt::Display for QueryKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      QueryKey::Tasks { page, size, sort_by, direction } => {
        write!(f, "tasks:{}:{}:{}:{}", page, size, sort_by, direction)
      }
      QueryKey::Task { id } => write!(f, "task:{}", id),
      QueryKey::TasksByStatus { status, page, size } => write!(f, "tasksByStatus:{}:{}:{}", status, page, size),
      QueryKey::Workers => f.write_str("workers"),
      QueryKey::Worker { id } => write!(f, "worker:{}", id),
      QueryKey::Statistics => f.write_str("statistics"),
      QueryKey::WorkerStatistics { worker_id } => write!(f, "workerStatistics:{}", worker_id),
    }
  }
}

/// Result of a successful read, one variant per payload shape.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryData {
  TaskPage(PageResponse<Task>),
  Task(Task),
  Workers(Vec<Worker>),
  Worker(Worker),
  Statistics(Statistics),
}

impl QueryData {
  /// Tasks carried by this payload; empty for worker and statistics reads.
  pub fn tasks(&self) -> &[Task] {
    match self {
      QueryData::TaskPage(page) => &page.content,
      QueryData::Task(task) => slice::from_ref(task),
      _ => &[],
    }
  }

  pub fn workers(&self) -> &[Worker] {
    match self {
      QueryData::Workers(workers) => workers,
      QueryData::Worker(worker) => slice::from_ref(worker),
      _ => &[],
    }
  }

  pub fn statistics(&self) -> Option<&Statistics> {
    match self {
      QueryData::Statistics(stats) => Some(stats),
      _ => None,
    }
  }

  pub fn task_page(&self) -> Option<&PageResponse<Task>> {
    match self {
      QueryData::TaskPage(page) => Some(page),
      _ => None,
    }
  }
}

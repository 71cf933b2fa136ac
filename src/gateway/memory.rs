use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use tracing::{error, info};
use uuid::Uuid;

use crate::aggregate::statistics_from;
use crate::error::{ErrorKind, Result};
use crate::gateway::Gateway;
use crate::lifecycle::{TaskAction, is_legal};
use crate::models::{
  ApiError, DEFAULT_MAX_RETRIES, DEFAULT_PRIORITY, PageResponse, SortDirection, Statistics, Task, TaskStatus,
  TaskSubmission, Worker,
};

#[derive(Default)]
struct Backend {
  tasks: Vec<Task>,
  workers: Vec<Worker>,
  outage: Option<ErrorKind>,
}

/// In-process backend with the orchestration service's transition rules.
/// Backs the integration tests and offline demos of the dashboard.
#[derive(Default)]
pub struct MemoryGateway {
  backend: Mutex<Backend>,
  reads: AtomicUsize,
}

fn conflict(message: String) -> ErrorKind {
  ErrorKind::Application(ApiError {
    message,
    status: 409,
    timestamp: Utc::now().to_rfc3339(),
    details: None,
  })
}

fn bad_request(message: &str) -> ErrorKind {
  ErrorKind::Application(ApiError {
    message: message.to_string(),
    status: 400,
    timestamp: Utc::now().to_rfc3339(),
    details: None,
  })
}

fn paginate(mut tasks: Vec<Task>, page: u32, size: u32) -> PageResponse<Task> {
  let total = tasks.len() as u64;
  let start = (page as usize).saturating_mul(size as usize).min(tasks.len());
  let end = start.saturating_add(size as usize).min(tasks.len());
  let content = tasks.drain(start..end).collect();
  PageResponse::new(content, page, size, total)
}

impl MemoryGateway {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_workers(workers: Vec<Worker>) -> Self {
    let gateway = Self::default();
    gateway.lock().workers = workers;
    gateway
  }

  /// Number of read operations served so far.
  pub fn reads(&self) -> usize {
    self.reads.load(Ordering::SeqCst)
  }

  pub fn insert_task(&self, task: Task) {
    self.lock().tasks.push(task);
  }

  /// While set, every call fails with `error` before touching any state.
  pub fn set_outage(&self, error: Option<ErrorKind>) {
    self.lock().outage = error;
  }

  fn lock(&self) -> MutexGuard<'_, Backend> {
    self.backend.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  fn read(&self) -> Result<MutexGuard<'_, Backend>> {
    self.reads.fetch_add(1, Ordering::SeqCst);
    self.guard()
  }

  /// The backend lock, or the configured outage error.
  fn guard(&self) -> Result<MutexGuard<'_, Backend>> {
    let backend = self.lock();
    match &backend.outage {
      Some(error) => Err(error.clone()),
      None => Ok(backend),
    }
  }
}

impl Backend {
  fn task_mut(&mut self, id: &str) -> Result<&mut Task> {
    self
      .tasks
      .iter_mut()
      .find(|task| task.id == id)
      .ok_or_else(|| ErrorKind::not_found(format!("Task {} not found", id)))
  }

  fn worker_mut(&mut self, id: Option<&str>) -> Option<&mut Worker> {
    let id = id?;
    self.workers.iter_mut().find(|worker| worker.id == id)
  }

  fn check(task: &Task, action: TaskAction) -> Result<()> {
    if is_legal(task.status, action) {
      Ok(())
    } else {
      Err(conflict(format!("Cannot {} task {} in status {}", action, task.id, task.status)))
    }
  }
}

#[async_trait]
impl Gateway for MemoryGateway {
  async fn fetch_tasks(&self, page: u32, size: u32, sort_by: &str, direction: SortDirection) -> Result<PageResponse<Task>> {
    let backend = self.read()?;
    let mut tasks = backend.tasks.clone();
    match sort_by {
      "createdAt" => tasks.sort_by_key(|task| task.created_at),
      "updatedAt" => tasks.sort_by_key(|task| task.updated_at),
      "priority" => tasks.sort_by_key(|task| task.priority),
      other => return Err(bad_request(&format!("Unsupported sort field '{}'", other))),
    }
    if direction == SortDirection::Desc {
      tasks.reverse();
    }
    Ok(paginate(tasks, page, size))
  }

  async fn fetch_task(&self, id: &str) -> Result<Task> {
    let backend = self.read()?;
    backend
      .tasks
      .iter()
      .find(|task| task.id == id)
      .cloned()
      .ok_or_else(|| ErrorKind::not_found(format!("Task {} not found", id)))
  }

  async fn fetch_tasks_by_status(&self, status: TaskStatus, page: u32, size: u32) -> Result<PageResponse<Task>> {
    let backend = self.read()?;
    let mut tasks: Vec<Task> = backend.tasks.iter().filter(|task| task.status == status).cloned().collect();
    tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(paginate(tasks, page, size))
  }

  async fn fetch_workers(&self) -> Result<Vec<Worker>> {
    Ok(self.read()?.workers.clone())
  }

  async fn fetch_worker(&self, id: &str) -> Result<Worker> {
    let backend = self.read()?;
    backend
      .workers
      .iter()
      .find(|worker| worker.id == id)
      .cloned()
      .ok_or_else(|| ErrorKind::not_found(format!("Worker {} not found", id)))
  }

  async fn fetch_statistics(&self) -> Result<Statistics> {
    let backend = self.read()?;
    Ok(statistics_from(&backend.tasks, &backend.workers))
  }

  async fn fetch_worker_statistics(&self, id: &str) -> Result<Statistics> {
    let backend = self.read()?;
    let count = |status: TaskStatus| {
      backend
        .tasks
        .iter()
        .filter(|task| task.worker_id.as_deref() == Some(id) && task.status == status)
        .count() as u64
    };
    let completed = count(TaskStatus::Completed);
    Ok(Statistics {
      total_tasks: completed,
      completed_tasks: completed,
      failed_tasks: count(TaskStatus::Failed),
      ..Statistics::default()
    })
  }

  async fn submit_task(&self, submission: &TaskSubmission) -> Result<Task> {
    let priority = submission.priority.unwrap_or(DEFAULT_PRIORITY);
    let max_retries = submission.max_retries.unwrap_or(DEFAULT_MAX_RETRIES);
    if !(1..=10).contains(&priority) {
      return Err(bad_request("Priority must be between 1 and 10"));
    }
    if max_retries > 10 {
      return Err(bad_request("Max retries must be between 0 and 10"));
    }

    let mut backend = self.guard()?;
    let now = Utc::now();
    let task = Task {
      id: Uuid::new_v4().to_string(),
      task_type: submission.task_type,
      status: TaskStatus::Pending,
      payload: submission.payload.clone(),
      result: None,
      error_message: None,
      retry_count: 0,
      max_retries,
      priority,
      created_at: now,
      updated_at: now,
      started_at: None,
      completed_at: None,
      worker_id: None,
    };
    backend.tasks.push(task.clone());
    info!("Task {} submitted with priority {}", task.id, priority);
    Ok(task)
  }

  async fn delete_task(&self, id: &str) -> Result<()> {
    let mut backend = self.guard()?;
    let before = backend.tasks.len();
    backend.tasks.retain(|task| task.id != id);
    if backend.tasks.len() == before {
      return Err(ErrorKind::not_found(format!("Task {} not found", id)));
    }
    info!("Task {} deleted", id);
    Ok(())
  }

  async fn mark_processing(&self, id: &str, worker_id: &str) -> Result<()> {
    let mut backend = self.guard()?;
    let task = backend.task_mut(id)?;
    Backend::check(task, TaskAction::MarkProcessing)?;
    let now = Utc::now();
    task.status = TaskStatus::Processing;
    task.worker_id = Some(worker_id.to_string());
    task.started_at = Some(now);
    task.updated_at = now;
    if let Some(worker) = backend.worker_mut(Some(worker_id)) {
      worker.active_tasks += 1;
    }
    info!("Task {} marked as processing by worker {}", id, worker_id);
    Ok(())
  }

  async fn mark_completed(&self, id: &str, result: &str) -> Result<()> {
    let mut backend = self.guard()?;
    let task = backend.task_mut(id)?;
    Backend::check(task, TaskAction::MarkCompleted)?;
    let now = Utc::now();
    task.status = TaskStatus::Completed;
    task.result = Some(result.to_string());
    task.completed_at = Some(now);
    task.updated_at = now;
    let worker_id = task.worker_id.clone();
    if let Some(worker) = backend.worker_mut(worker_id.as_deref()) {
      worker.total_processed += 1;
      worker.active_tasks = worker.active_tasks.saturating_sub(1);
    }
    info!("Task {} completed successfully", id);
    Ok(())
  }

  async fn mark_failed(&self, id: &str, error_message: &str, should_retry: bool) -> Result<()> {
    let mut backend = self.guard()?;
    let task = backend.task_mut(id)?;
    Backend::check(task, TaskAction::MarkFailed)?;
    let now = Utc::now();
    task.retry_count += 1;
    task.error_message = Some(error_message.to_string());
    task.updated_at = now;

    if should_retry && task.retry_count < task.max_retries {
      task.status = TaskStatus::Retrying;
      info!("Task {} will retry (attempt {}/{})", id, task.retry_count, task.max_retries);
      return Ok(());
    }

    task.status = TaskStatus::Failed;
    task.completed_at = Some(now);
    let attempts = task.retry_count;
    let worker_id = task.worker_id.clone();
    if let Some(worker) = backend.worker_mut(worker_id.as_deref()) {
      worker.total_failed += 1;
      worker.active_tasks = worker.active_tasks.saturating_sub(1);
    }
    error!("Task {} permanently failed after {} attempts", id, attempts);
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::models::TaskType;

  fn submission() -> TaskSubmission {
    TaskSubmission {
      task_type: TaskType::WebScraping,
      payload: r#"{"url":"https://example.com"}"#.into(),
      priority: None,
      max_retries: Some(2),
    }
  }

  #[tokio::test]
  async fn submitted_task_starts_pending_with_defaults() {
    let gateway = MemoryGateway::new();
    let task = gateway.submit_task(&submission()).await.unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.priority, DEFAULT_PRIORITY);
    assert_eq!(task.max_retries, 2);
    assert_eq!(gateway.fetch_task(&task.id).await.unwrap(), task);
  }

  #[tokio::test]
  async fn invalid_priority_is_rejected() {
    let gateway = MemoryGateway::new();
    let mut request = submission();
    request.priority = Some(11);
    let err = gateway.submit_task(&request).await.unwrap_err();
    assert!(matches!(err, ErrorKind::Application(ApiError { status: 400, .. })));
  }

  #[tokio::test]
  async fn failure_retries_until_budget_is_spent() {
    let gateway = MemoryGateway::new();
    let task = gateway.submit_task(&submission()).await.unwrap();
    gateway.mark_processing(&task.id, "w-1").await.unwrap();

    gateway.mark_failed(&task.id, "timeout", true).await.unwrap();
    let current = gateway.fetch_task(&task.id).await.unwrap();
    assert_eq!(current.status, TaskStatus::Retrying);
    assert_eq!(current.retry_count, 1);

    gateway.mark_failed(&task.id, "timeout", true).await.unwrap();
    let current = gateway.fetch_task(&task.id).await.unwrap();
    assert_eq!(current.status, TaskStatus::Failed);
    assert!(current.completed_at.is_some());
  }

  #[tokio::test]
  async fn illegal_transition_is_a_conflict() {
    let gateway = MemoryGateway::new();
    let task = gateway.submit_task(&submission()).await.unwrap();
    let err = gateway.mark_completed(&task.id, "{}").await.unwrap_err();
    assert!(matches!(err, ErrorKind::Application(ApiError { status: 409, .. })));
  }

  #[tokio::test]
  async fn listing_is_paged_newest_first() {
    let gateway = MemoryGateway::new();
    let mut ids = Vec::new();
    for _ in 0..5 {
      ids.push(gateway.submit_task(&submission()).await.unwrap().id);
      tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    }
    let page = gateway.fetch_tasks(0, 2, "createdAt", SortDirection::Desc).await.unwrap();
    assert_eq!(page.content.len(), 2);
    assert_eq!(page.total_elements, 5);
    assert_eq!(page.total_pages, 3);
    assert_eq!(page.content[0].id, ids[4]);

    let last = gateway.fetch_tasks(2, 2, "createdAt", SortDirection::Desc).await.unwrap();
    assert_eq!(last.content.len(), 1);
    assert!(last.last);
    assert_eq!(gateway.reads(), 2);
  }

  #[tokio::test]
  async fn outage_surfaces_as_transport_error() {
    let gateway = MemoryGateway::new();
    gateway.set_outage(Some(ErrorKind::Transport("connection refused".into())));
    assert!(gateway.fetch_workers().await.unwrap_err().is_retryable());
    gateway.set_outage(None);
    assert!(gateway.fetch_workers().await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn page_beyond_the_end_is_empty_and_last() {
    let gateway = MemoryGateway::new();
    gateway.submit_task(&submission()).await.unwrap();
    let page = gateway.fetch_tasks(u32::MAX, 20, "createdAt", SortDirection::Desc).await.unwrap();
    assert!(page.content.is_empty());
    assert!(page.last);
    assert_eq!(page.total_elements, 1);
  }
}

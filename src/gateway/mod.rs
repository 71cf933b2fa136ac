//! Remote entity gateway: the asynchronous operations the engine consumes.

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{PageResponse, SortDirection, Statistics, Task, TaskStatus, TaskSubmission, Worker};

pub mod http;
pub mod memory;

pub use http::HttpGateway;
pub use memory::MemoryGateway;

#[async_trait]
pub trait Gateway: Send + Sync {
  async fn fetch_tasks(&self, page: u32, size: u32, sort_by: &str, direction: SortDirection) -> Result<PageResponse<Task>>;

  async fn fetch_task(&self, id: &str) -> Result<Task>;

  async fn fetch_tasks_by_status(&self, status: TaskStatus, page: u32, size: u32) -> Result<PageResponse<Task>>;

  async fn fetch_workers(&self) -> Result<Vec<Worker>>;

  async fn fetch_worker(&self, id: &str) -> Result<Worker>;

  async fn fetch_statistics(&self) -> Result<Statistics>;

  async fn fetch_worker_statistics(&self, id: &str) -> Result<Statistics>;

  async fn submit_task(&self, submission: &TaskSubmission) -> Result<Task>;

  async fn delete_task(&self, id: &str) -> Result<()>;

  async fn mark_processing(&self, id: &str, worker_id: &str) -> Result<()>;

  async fn mark_completed(&self, id: &str, result: &str) -> Result<()>;

  async fn mark_failed(&self, id: &str, error_message: &str, should_retry: bool) -> Result<()>;
}

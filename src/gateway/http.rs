use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde_json::json;
use tokio_retry::Retry;
use tokio_retry::strategy::ExponentialBackoff;
use tracing::{debug, info, warn};

use crate::error::{ErrorKind, Result};
use crate::gateway::Gateway;
use crate::models::{ApiError, PageResponse, SortDirection, Statistics, Task, TaskStatus, TaskSubmission, Worker};

static MAX_RETRIES: usize = 5;
static DELAY: u64 = 100;

/// REST binding of the gateway against the task orchestration API.
#[derive(Debug, Clone)]
pub struct HttpGateway {
  client: Client,
  base_url: String,
}

impl HttpGateway {
  pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
    let client = Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| ErrorKind::Transport(format!("Failed to build HTTP client: {}", e)))?;
    Ok(Self {
      client,
      base_url: base_url.trim_end_matches('/').to_string(),
    })
  }

  pub fn base_url(&self) -> &str {
    &self.base_url
  }

  /// Polls the statistics endpoint with exponential backoff until the API answers.
  pub async fn wait_until_reachable(&self) -> Result<()> {
    Retry::spawn(ExponentialBackoff::from_millis(DELAY).take(MAX_RETRIES), || async {
      self.fetch_statistics().await.map_err(|e| {
        warn!("API at {} not reachable yet: {}", self.base_url, e);
        e
      })
    })
      .await?;
    info!("API at {} is reachable", self.base_url);
    Ok(())
  }

  fn url(&self, path: &str) -> String {
    format!("{}{}", self.base_url, path)
  }

  /// Pages that contradict their own counters are still returned as sent.
  fn checked(&self, page: PageResponse<Task>) -> PageResponse<Task> {
    if !page.is_consistent() {
      warn!(
        "Inconsistent page from {}: page {} of {}, {} rows for size {}",
        self.base_url,
        page.page,
        page.total_pages,
        page.content.len(),
        page.size
      );
    }
    page
  }

  async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
    let url = self.url(path);
    debug!("HTTP GET: {}", url);
    let response = self.client.get(&url).query(query).send().await?;
    decode(check(response).await?).await
  }

  async fn post_empty(&self, path: &str, body: serde_json::Value) -> Result<()> {
    let url = self.url(path);
    debug!("HTTP POST: {}", url);
    let response = self.client.post(&url).json(&body).send().await?;
    check(response).await?;
    Ok(())
  }
}

async fn check(response: Response) -> Result<Response> {
  let status = response.status();
  if status.is_success() {
    return Ok(response);
  }
  let body = response.text().await.unwrap_or_default();
  let api_error = serde_json::from_str::<ApiError>(&body).unwrap_or_else(|_| ApiError {
    message: if body.trim().is_empty() {
      status.canonical_reason().unwrap_or("Request failed").to_string()
    } else {
      body
    },
    status: status.as_u16(),
    timestamp: Utc::now().to_rfc3339(),
    details: None,
  });
  Err(ErrorKind::Application(api_error))
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
  response
    .json::<T>()
    .await
    .map_err(|e| ErrorKind::Transport(format!("Malformed response body: {}", e)))
}

#[async_trait]
impl Gateway for HttpGateway {
  async fn fetch_tasks(&self, page: u32, size: u32, sort_by: &str, direction: SortDirection) -> Result<PageResponse<Task>> {
    let query = [
      ("page", page.to_string()),
      ("size", size.to_string()),
      ("sortBy", sort_by.to_string()),
      ("direction", direction.to_string()),
    ];
    let page = self.get("/tasks", &query).await?;
    Ok(self.checked(page))
  }

  async fn fetch_task(&self, id: &str) -> Result<Task> {
    self.get(&format!("/tasks/{}", id), &[]).await
  }

  async fn fetch_tasks_by_status(&self, status: TaskStatus, page: u32, size: u32) -> Result<PageResponse<Task>> {
    let query = [("page", page.to_string()), ("size", size.to_string())];
    let page = self.get(&format!("/tasks/status/{}", status), &query).await?;
    Ok(self.checked(page))
  }

  async fn fetch_workers(&self) -> Result<Vec<Worker>> {
    self.get("/workers", &[]).await
  }

  async fn fetch_worker(&self, id: &str) -> Result<Worker> {
    self.get(&format!("/workers/{}", id), &[]).await
  }

  async fn fetch_statistics(&self) -> Result<Statistics> {
    self.get("/statistics", &[]).await
  }

  async fn fetch_worker_statistics(&self, id: &str) -> Result<Statistics> {
    self.get(&format!("/statistics/worker/{}", id), &[]).await
  }

  async fn submit_task(&self, submission: &TaskSubmission) -> Result<Task> {
    let url = self.url("/tasks");
    debug!("HTTP POST: {}", url);
    let response = self.client.post(&url).json(submission).send().await?;
    decode(check(response).await?).await
  }

  async fn delete_task(&self, id: &str) -> Result<()> {
    let url = self.url(&format!("/tasks/{}", id));
    debug!("HTTP DELETE: {}", url);
    let response = self.client.delete(&url).send().await?;
    check(response).await?;
    Ok(())
  }

  async fn mark_processing(&self, id: &str, worker_id: &str) -> Result<()> {
    self
      .post_empty(&format!("/tasks/{}/processing", id), json!({ "workerId": worker_id }))
      .await
  }

  async fn mark_completed(&self, id: &str, result: &str) -> Result<()> {
    self
      .post_empty(&format!("/tasks/{}/completed", id), json!({ "result": result }))
      .await
  }

  async fn mark_failed(&self, id: &str, error_message: &str, should_retry: bool) -> Result<()> {
    self
      .post_empty(
        &format!("/tasks/{}/failed", id),
        json!({ "errorMessage": error_message, "shouldRetry": should_retry }),
      )
      .await
  }
}

//! Writes against the orchestration API.
//!
//! Every mutation goes straight to the gateway; nothing is applied to the
//! cache optimistically. A successful write invalidates the queries whose
//! payload it may have changed so the next read or poll fetches them again.

use tracing::{debug, error, info, warn};

use crate::error::{ErrorKind, Result};
use crate::lifecycle::{self, Transition};
use crate::models::{Task, TaskStatus, TaskSubmission};
use crate::query::QueryKey;
use crate::scheduler::Scheduler;
use crate::validators;

/// What a status change sent, and the status the snapshot predicted.
#[derive(Debug, Clone, PartialEq)]
pub struct Receipt {
  pub task_id: String,
  pub sent: Transition,
  /// `None` when no snapshot of the task was cached and the backend decided alone.
  pub expected: Option<TaskStatus>,
  pub downgraded: bool,
  pub invalidated: Vec<QueryKey>,
}

#[derive(Clone)]
pub struct MutationCoordinator {
  scheduler: Scheduler,
}

impl MutationCoordinator {
  pub fn new(scheduler: Scheduler) -> Self {
    Self { scheduler }
  }

  pub async fn submit_task(&self, submission: TaskSubmission) -> Result<Task> {
    validators::validate_submission(&submission).map_err(ErrorKind::Precondition)?;
    match self.scheduler.gateway().submit_task(&submission).await {
      Ok(task) => {
        let invalidated = self.scheduler.invalidate_where(QueryKey::is_task_listing);
        info!(
          "Submitted {} task {}; {} listings invalidated",
          task.task_type,
          task.id,
          invalidated.len()
        );
        Ok(task)
      }
      Err(err) => {
        error!("Failed to submit {} task: {}", submission.task_type, err);
        Err(err)
      }
    }
  }

  pub async fn delete_task(&self, task_id: &str) -> Result<Vec<QueryKey>> {
    validators::validate_identifier("taskId", task_id).map_err(ErrorKind::Precondition)?;
    match self.scheduler.gateway().delete_task(task_id).await {
      Ok(()) => {
        let invalidated = self.invalidate_task(task_id);
        info!("Deleted task {}", task_id);
        Ok(invalidated)
      }
      Err(err) => {
        error!("Failed to delete task {}: {}", task_id, err);
        Err(err)
      }
    }
  }

  pub async fn mark_processing(&self, task_id: &str, worker_id: &str) -> Result<Receipt> {
    self
      .transition(
        task_id,
        Transition::MarkProcessing {
          worker_id: worker_id.to_string(),
        },
      )
      .await
  }

  pub async fn mark_completed(&self, task_id: &str, result: &str) -> Result<Receipt> {
    self
      .transition(
        task_id,
        Transition::MarkCompleted {
          result: result.to_string(),
        },
      )
      .await
  }

  pub async fn mark_failed(&self, task_id: &str, error_message: &str, should_retry: bool) -> Result<Receipt> {
    self
      .transition(
        task_id,
        Transition::MarkFailed {
          error_message: error_message.to_string(),
          should_retry,
        },
      )
      .await
  }

  /// Checks `transition` against the freshest cached snapshot of the task,
  /// then sends it. Illegal transitions fail before any network call.
  pub async fn transition(&self, task_id: &str, transition: Transition) -> Result<Receipt> {
    validators::validate_identifier("taskId", task_id).map_err(ErrorKind::Precondition)?;
    transition.check_fields()?;

    let (sent, expected, downgraded) = match self.cached_task(task_id) {
      Some(task) => {
        let plan = lifecycle::plan(&task, transition)?;
        (plan.transition, Some(plan.to), plan.downgraded)
      }
      None => {
        debug!("No cached snapshot of task {}; sending {} unchecked", task_id, transition.action());
        (transition, None, false)
      }
    };

    let gateway = self.scheduler.gateway();
    let outcome = match &sent {
      Transition::MarkProcessing { worker_id } => gateway.mark_processing(task_id, worker_id).await,
      Transition::MarkCompleted { result } => gateway.mark_completed(task_id, result).await,
      Transition::MarkFailed {
        error_message,
        should_retry,
      } => gateway.mark_failed(task_id, error_message, *should_retry).await,
    };

    match outcome {
      Ok(()) => {
        let invalidated = self.invalidate_task(task_id);
        info!("Task {}: {} accepted", task_id, sent.action());
        Ok(Receipt {
          task_id: task_id.to_string(),
          sent,
          expected,
          downgraded,
          invalidated,
        })
      }
      Err(err @ ErrorKind::Application(_)) => {
        // The backend's view differs from ours; refresh it.
        warn!("Task {}: {} rejected: {}", task_id, sent.action(), err);
        self.invalidate_task(task_id);
        Err(err)
      }
      Err(err) => {
        error!("Task {}: {} failed: {}", task_id, sent.action(), err);
        Err(err)
      }
    }
  }

  fn invalidate_task(&self, task_id: &str) -> Vec<QueryKey> {
    let detail = QueryKey::task(task_id);
    self
      .scheduler
      .invalidate_where(|key| key.is_task_listing() || *key == detail)
  }

  /// Most recently fetched copy of the task across the detail key and every listing.
  fn cached_task(&self, task_id: &str) -> Option<Task> {
    self.scheduler.with_cache(|cache| {
      cache
        .iter()
        .filter_map(|(_, entry)| {
          let data = entry.data.as_ref()?;
          let task = data.tasks().iter().find(|task| task.id == task_id)?;
          Some((entry.last_fetched_at, task))
        })
        .max_by_key(|(fetched_at, _)| *fetched_at)
        .map(|(_, task)| task.clone())
    })
  }
}

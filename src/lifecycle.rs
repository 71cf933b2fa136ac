//! Task lifecycle state machine.
//!
//! ```text
//! PENDING | QUEUED | RETRYING --mark-processing--> PROCESSING
//! PROCESSING --mark-completed--> COMPLETED
//! PROCESSING | RETRYING --mark-failed(retry, budget left)--> RETRYING
//! PROCESSING | RETRYING --mark-failed--> FAILED
//! ```
//!
//! COMPLETED and FAILED are terminal. A failure counts against the budget
//! before the retry decision, so asking for a retry when the next attempt
//! would reach `maxRetries` is downgraded to a terminal failure.

use std::fmt;

use tracing::info;

use crate::error::{ErrorKind, Result};
use crate::models::{Task, TaskStatus};

impl TaskStatus {
  pub fn is_terminal(self) -> bool {
    matches!(self, TaskStatus::Completed | TaskStatus::Failed)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskAction {
  MarkProcessing,
  MarkCompleted,
  MarkFailed,
  Delete,
}

impl fmt::Display for TaskAction {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      TaskAction::MarkProcessing => "mark-processing",
      TaskAction::MarkCompleted => "mark-completed",
      TaskAction::MarkFailed => "mark-failed",
      TaskAction::Delete => "delete",
    };
    f.write_str(name)
  }
}

/// Whether `action` may be offered for a task currently in `status`.
pub fn is_legal(status: TaskStatus, action: TaskAction) -> bool {
  match action {
    TaskAction::Delete => true,
    TaskAction::MarkProcessing => matches!(status, TaskStatus::Pending | TaskStatus::Queued | TaskStatus::Retrying),
    TaskAction::MarkCompleted => status == TaskStatus::Processing,
    TaskAction::MarkFailed => matches!(status, TaskStatus::Processing | TaskStatus::Retrying),
  }
}

/// Whether one more failure would still leave the task `RETRYING`.
pub fn can_retry(task: &Task) -> bool {
  task.retry_count.saturating_add(1) < task.max_retries
}

/// Actions to present for `task`, in display order.
pub fn available_actions(task: &Task) -> Vec<TaskAction> {
  [
    TaskAction::MarkProcessing,
    TaskAction::MarkCompleted,
    TaskAction::MarkFailed,
    TaskAction::Delete,
  ]
  .into_iter()
  .filter(|action| is_legal(task.status, *action))
  .collect()
}

/// A requested status change with the fields it requires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
  MarkProcessing { worker_id: String },
  MarkCompleted { result: String },
  MarkFailed { error_message: String, should_retry: bool },
}

impl Transition {
  pub fn action(&self) -> TaskAction {
    match self {
      Transition::MarkProcessing { .. } => TaskAction::MarkProcessing,
      Transition::MarkCompleted { .. } => TaskAction::MarkCompleted,
      Transition::MarkFailed { .. } => TaskAction::MarkFailed,
    }
  }

  /// Required fields must be non-blank.
  pub fn check_fields(&self) -> Result<()> {
    let (field, value) = match self {
      Transition::MarkProcessing { worker_id } => ("workerId", worker_id),
      Transition::MarkCompleted { result } => ("result", result),
      Transition::MarkFailed { error_message, .. } => ("errorMessage", error_message),
    };
    if value.trim().is_empty() {
      return Err(ErrorKind::precondition(format!("{} requires a non-empty {}", self.action(), field)));
    }
    Ok(())
  }
}

/// Outcome of validating a transition against a task snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
  pub from: TaskStatus,
  pub to: TaskStatus,
  /// The transition to send; a retry past the budget is rewritten to a plain failure.
  pub transition: Transition,
  pub downgraded: bool,
}

pub fn plan(task: &Task, transition: Transition) -> Result<Plan> {
  transition.check_fields()?;
  let action = transition.action();
  if !is_legal(task.status, action) {
    return Err(ErrorKind::precondition(format!(
      "{} is not allowed for task {} in status {}",
      action, task.id, task.status
    )));
  }

  let (to, transition, downgraded) = match transition {
    Transition::MarkProcessing { worker_id } => (TaskStatus::Processing, Transition::MarkProcessing { worker_id }, false),
    Transition::MarkCompleted { result } => (TaskStatus::Completed, Transition::MarkCompleted { result }, false),
    Transition::MarkFailed { error_message, should_retry } => {
      if should_retry && !can_retry(task) {
        info!(
          "Retry budget of task {} exhausted ({}/{}); sending terminal failure",
          task.id, task.retry_count, task.max_retries
        );
        (TaskStatus::Failed, Transition::MarkFailed { error_message, should_retry: false }, true)
      } else if should_retry {
        (TaskStatus::Retrying, Transition::MarkFailed { error_message, should_retry }, false)
      } else {
        (TaskStatus::Failed, Transition::MarkFailed { error_message, should_retry }, false)
      }
    }
  };

  Ok(Plan {
    from: task.status,
    to,
    transition,
    downgraded,
  })
}

#[cfg(test)]
pub(crate) mod tests {
  use super::*;
  use crate::models::TaskType;
  use chrono::Utc;

  pub(crate) fn task(status: TaskStatus) -> Task {
    let now = Utc::now();
    Task {
      id: "t-1".into(),
      task_type: TaskType::DataAnalysis,
      status,
      payload: "{}".into(),
      result: None,
      error_message: None,
      retry_count: 0,
      max_retries: 3,
      priority: 5,
      created_at: now,
      updated_at: now,
      started_at: None,
      completed_at: None,
      worker_id: None,
    }
  }

  fn failed(should_retry: bool) -> Transition {
    Transition::MarkFailed {
      error_message: "boom".into(),
      should_retry,
    }
  }

  #[test]
  fn terminal_statuses_allow_nothing_but_delete() {
    for status in [TaskStatus::Completed, TaskStatus::Failed] {
      assert!(status.is_terminal());
      assert_eq!(available_actions(&task(status)), vec![TaskAction::Delete]);
    }
  }

  #[test]
  fn legality_table() {
    use TaskAction::*;
    use TaskStatus::*;

    let expected = [
      (Pending, vec![MarkProcessing, Delete]),
      (Queued, vec![MarkProcessing, Delete]),
      (Processing, vec![MarkCompleted, MarkFailed, Delete]),
      (Retrying, vec![MarkProcessing, MarkFailed, Delete]),
    ];
    for (status, actions) in expected {
      assert_eq!(available_actions(&task(status)), actions, "status {}", status);
    }
  }

  #[test]
  fn processing_task_completes() {
    let plan = plan(&task(TaskStatus::Processing), Transition::MarkCompleted { result: "{}".into() }).unwrap();
    assert_eq!(plan.from, TaskStatus::Processing);
    assert_eq!(plan.to, TaskStatus::Completed);
    assert!(!plan.downgraded);
  }

  #[test]
  fn completing_a_pending_task_is_rejected() {
    let err = plan(&task(TaskStatus::Pending), Transition::MarkCompleted { result: "{}".into() }).unwrap_err();
    assert!(matches!(err, ErrorKind::Precondition(_)));
  }

  #[test]
  fn missing_fields_are_precondition_errors() {
    let pending = task(TaskStatus::Pending);
    let err = plan(&pending, Transition::MarkProcessing { worker_id: "  ".into() }).unwrap_err();
    assert!(matches!(err, ErrorKind::Precondition(_)));

    assert!(Transition::MarkCompleted { result: String::new() }.check_fields().is_err());
    assert!(Transition::MarkFailed { error_message: String::new(), should_retry: true }.check_fields().is_err());
  }

  #[test]
  fn retry_within_budget_moves_to_retrying() {
    let mut current = task(TaskStatus::Processing);
    current.retry_count = 1;
    let plan = plan(&current, failed(true)).unwrap();
    assert_eq!(plan.to, TaskStatus::Retrying);
    assert_eq!(plan.transition, failed(true));
  }

  #[test]
  fn retry_past_budget_is_downgraded_to_failed() {
    let mut current = task(TaskStatus::Retrying);
    current.retry_count = 3;
    current.max_retries = 3;
    assert!(!can_retry(&current));
    current.retry_count = 2;
    assert!(!can_retry(&current));

    let plan = plan(&current, failed(true)).unwrap();
    assert_eq!(plan.to, TaskStatus::Failed);
    assert!(plan.downgraded);
    assert_eq!(plan.transition, failed(false));
  }

  #[test]
  fn zero_retry_budget_never_retries() {
    let mut current = task(TaskStatus::Processing);
    current.max_retries = 0;
    assert_eq!(plan(&current, failed(true)).unwrap().to, TaskStatus::Failed);
  }
}

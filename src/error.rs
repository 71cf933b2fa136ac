use thiserror::Error;

use crate::models::ApiError;

/// Uniform failure for every gateway call, fetch or mutation.
///
/// `Clone` because one fetch outcome is handed to every caller that joined it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ErrorKind {
  /// Network failure or timeout. The next scheduled poll retries it.
  #[error("transport error: {0}")]
  Transport(String),
  /// Structured error body from the remote side (validation, not found, ...).
  #[error("{} (status {})", .0.message, .0.status)]
  Application(ApiError),
  /// A mutation was called with missing or illegal arguments; nothing was sent.
  #[error("precondition failed: {0}")]
  Precondition(String),
}

impl ErrorKind {
  pub fn precondition(message: impl Into<String>) -> Self {
    ErrorKind::Precondition(message.into())
  }

  pub fn not_found(message: impl Into<String>) -> Self {
    ErrorKind::Application(ApiError {
      message: message.into(),
      status: 404,
      timestamp: chrono::Utc::now().to_rfc3339(),
      details: None,
    })
  }

  pub fn is_retryable(&self) -> bool {
    matches!(self, ErrorKind::Transport(_))
  }

  pub fn is_application(&self) -> bool {
    matches!(self, ErrorKind::Application(_))
  }
}

impl From<reqwest::Error> for ErrorKind {
  fn from(err: reqwest::Error) -> Self {
    ErrorKind::Transport(err.to_string())
  }
}

pub type Result<T> = std::result::Result<T, ErrorKind>;

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn only_transport_errors_are_retryable() {
    assert!(ErrorKind::Transport("connection refused".into()).is_retryable());
    assert!(!ErrorKind::not_found("Task not found").is_retryable());
    assert!(!ErrorKind::precondition("missing workerId").is_retryable());
  }

  #[test]
  fn application_error_displays_message_and_status() {
    let err = ErrorKind::not_found("Task not found");
    assert_eq!(err.to_string(), "Task not found (status 404)");
  }
}

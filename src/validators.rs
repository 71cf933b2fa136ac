use std::sync::LazyLock;

use regex::Regex;

use crate::models::{DEFAULT_MAX_RETRIES, DEFAULT_PRIORITY, TaskSubmission};

static IDENTIFIER: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"^[\w.:@\-]+$").expect("identifier pattern compiles"));

pub fn validate_payload(payload: &str) -> Result<(), String> {
  if payload.trim().is_empty() {
    return Err("Payload cannot be empty".into());
  }
  serde_json::from_str::<serde_json::Value>(payload)
    .map(|_| ())
    .map_err(|_| "Payload must be valid JSON".into())
}

pub fn validate_priority(priority: u8) -> Result<(), String> {
  if !(1..=10).contains(&priority) {
    return Err("Priority must be between 1 and 10".into());
  }
  Ok(())
}

pub fn validate_max_retries(retries: u32) -> Result<(), String> {
  if retries > 10 {
    return Err("Max retries must be between 0 and 10".into());
  }
  Ok(())
}

/// Task and worker ids end up in request paths; keep them to a safe alphabet.
pub fn validate_identifier(field: &str, value: &str) -> Result<(), String> {
  if value.trim().is_empty() {
    return Err(format!("Missing field '{}'", field));
  }
  if !IDENTIFIER.is_match(value) {
    return Err(format!("Invalid or unsafe value for field '{}'", field));
  }
  Ok(())
}

pub fn validate_submission(submission: &TaskSubmission) -> Result<(), String> {
  validate_payload(&submission.payload)?;
  validate_priority(submission.priority.unwrap_or(DEFAULT_PRIORITY))?;
  validate_max_retries(submission.max_retries.unwrap_or(DEFAULT_MAX_RETRIES))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::models::TaskType;

  #[test]
  fn payload_must_be_json() {
    assert!(validate_payload(r#"{"url": "https://example.com"}"#).is_ok());
    assert_eq!(validate_payload("   ").unwrap_err(), "Payload cannot be empty");
    assert_eq!(validate_payload("{url:").unwrap_err(), "Payload must be valid JSON");
  }

  #[test]
  fn ranges() {
    assert!(validate_priority(1).is_ok());
    assert!(validate_priority(10).is_ok());
    assert!(validate_priority(0).is_err());
    assert!(validate_priority(11).is_err());
    assert!(validate_max_retries(0).is_ok());
    assert!(validate_max_retries(11).is_err());
  }

  #[test]
  fn identifiers_reject_path_characters() {
    assert!(validate_identifier("workerId", "worker-1.local").is_ok());
    assert!(validate_identifier("taskId", "5f0c8e6a-1111-4d2b-9c7e-2a0d5e6f7a81").is_ok());
    assert!(validate_identifier("taskId", "../admin").is_err());
    assert!(validate_identifier("workerId", "").is_err());
  }

  #[test]
  fn submission_uses_defaults_for_missing_fields() {
    let submission = TaskSubmission {
      task_type: TaskType::ReportGeneration,
      payload: r#"{"format": "PDF"}"#.into(),
      priority: None,
      max_retries: None,
    };
    assert!(validate_submission(&submission).is_ok());
  }
}

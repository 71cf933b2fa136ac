//! Derived views over cached tasks and workers: status counts, success rate
//! and chart-ready series. Everything here is pure and deterministic.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Duration, NaiveDateTime, NaiveTime, TimeZone, Timelike};
use serde::Serialize;

use crate::models::{Statistics, Task, TaskStatus, Worker, WorkerStatus};

pub const TIMELINE_BUCKETS: usize = 24;

/// Occurrences of each of the six statuses; absent statuses count zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusCounts(BTreeMap<TaskStatus, u64>);

impl Default for StatusCounts {
  fn default() -> Self {
    Self(TaskStatus::ALL.into_iter().map(|status| (status, 0)).collect())
  }
}

impl StatusCounts {
  pub fn from_tasks<'a, I>(tasks: I) -> Self
  where
    I: IntoIterator<Item = &'a Task>,
  {
    let mut counts = Self::default();
    for task in tasks {
      *counts.0.entry(task.status).or_default() += 1;
    }
    counts
  }

  /// Reads the server-side `statusCounts` mapping. Unknown names are ignored.
  pub fn from_statistics(stats: &Statistics) -> Self {
    let mut counts = Self::default();
    for (name, count) in &stats.status_counts {
      if let Ok(status) = name.parse::<TaskStatus>() {
        *counts.0.entry(status).or_default() += count;
      }
    }
    counts
  }

  pub fn get(&self, status: TaskStatus) -> u64 {
    self.0.get(&status).copied().unwrap_or_default()
  }

  pub fn total(&self) -> u64 {
    self.0.values().sum()
  }

  pub fn iter(&self) -> impl Iterator<Item = (TaskStatus, u64)> + '_ {
    self.0.iter().map(|(status, count)| (*status, *count))
  }

  pub fn success_rate(&self) -> f64 {
    success_rate(self.get(TaskStatus::Completed), self.total())
  }
}

pub fn status_counts(tasks: &[Task]) -> StatusCounts {
  StatusCounts::from_tasks(tasks)
}

/// `100 * completed / total`, or `0` when there is nothing to divide by.
pub fn success_rate(completed: u64, total: u64) -> f64 {
  if total == 0 {
    return 0.0;
  }
  100.0 * completed as f64 / total as f64
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeriesPoint {
  pub name: String,
  pub value: u64,
}

/// One point per status with a non-zero count, in lifecycle order.
pub fn distribution(counts: &StatusCounts) -> Vec<SeriesPoint> {
  counts
    .iter()
    .filter(|(_, value)| *value > 0)
    .map(|(status, value)| SeriesPoint {
      name: status.as_str().to_string(),
      value,
    })
    .collect()
}

/// Summary bars with PENDING and QUEUED folded into "Pending"; zero bars are dropped.
pub fn status_summary(counts: &StatusCounts) -> Vec<SeriesPoint> {
  [
    ("Completed", counts.get(TaskStatus::Completed)),
    ("Processing", counts.get(TaskStatus::Processing)),
    ("Pending", counts.get(TaskStatus::Pending) + counts.get(TaskStatus::Queued)),
    ("Retrying", counts.get(TaskStatus::Retrying)),
    ("Failed", counts.get(TaskStatus::Failed)),
  ]
  .into_iter()
  .filter(|(_, value)| *value > 0)
  .map(|(name, value)| SeriesPoint {
    name: name.to_string(),
    value,
  })
  .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimelineBucket {
  /// Local hour of day, rendered `HH:00`.
  pub time: String,
  pub completed: u64,
  pub failed: u64,
  pub processing: u64,
}

fn floor_to_hour(local: NaiveDateTime) -> NaiveDateTime {
  local.date().and_time(NaiveTime::MIN) + Duration::hours(local.hour() as i64)
}

/// Buckets tasks by the local hour of `createdAt` over the 24 hours ending at
/// `now`'s hour, oldest first. Every bucket is present even when empty.
pub fn timeline<Tz: TimeZone>(tasks: &[Task], now: &DateTime<Tz>) -> Vec<TimelineBucket> {
  let tz = now.timezone();
  let current_hour = floor_to_hour(now.naive_local());
  let oldest_hour = current_hour - Duration::hours(TIMELINE_BUCKETS as i64 - 1);

  let mut buckets: Vec<TimelineBucket> = (0..TIMELINE_BUCKETS)
    .map(|offset| TimelineBucket {
      time: (oldest_hour + Duration::hours(offset as i64)).format("%H:00").to_string(),
      completed: 0,
      failed: 0,
      processing: 0,
    })
    .collect();

  for task in tasks {
    let created_hour = floor_to_hour(task.created_at.with_timezone(&tz).naive_local());
    if created_hour < oldest_hour || created_hour > current_hour {
      continue;
    }
    let index = (created_hour - oldest_hour).num_hours() as usize;
    let bucket = &mut buckets[index];
    match task.status {
      TaskStatus::Completed => bucket.completed += 1,
      TaskStatus::Failed => bucket.failed += 1,
      TaskStatus::Processing => bucket.processing += 1,
      TaskStatus::Pending | TaskStatus::Queued | TaskStatus::Retrying => {}
    }
  }
  buckets
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerLoadPoint {
  pub worker_id: String,
  pub active_tasks: u32,
  pub total_processed: u64,
  pub cpu_usage: f64,
}

pub fn worker_load(workers: &[Worker]) -> Vec<WorkerLoadPoint> {
  workers
    .iter()
    .map(|worker| WorkerLoadPoint {
      worker_id: worker.id.clone(),
      active_tasks: worker.active_tasks,
      total_processed: worker.total_processed,
      cpu_usage: worker.cpu_usage,
    })
    .collect()
}

pub fn active_workers(workers: &[Worker]) -> u64 {
  workers
    .iter()
    .filter(|worker| worker.status == WorkerStatus::Online)
    .count() as u64
}

/// Rebuilds a `Statistics` value from raw collections, for page-local charts
/// when the statistics endpoint is unavailable or behind the task list.
pub fn statistics_from(tasks: &[Task], workers: &[Worker]) -> Statistics {
  let counts = StatusCounts::from_tasks(tasks);
  let status_counts: HashMap<String, u64> = counts
    .iter()
    .filter(|(_, count)| *count > 0)
    .map(|(status, count)| (status.as_str().to_string(), count))
    .collect();

  Statistics {
    total_tasks: counts.total(),
    completed_tasks: counts.get(TaskStatus::Completed),
    failed_tasks: counts.get(TaskStatus::Failed),
    processing_tasks: counts.get(TaskStatus::Processing),
    pending_tasks: counts.get(TaskStatus::Pending) + counts.get(TaskStatus::Queued),
    retrying_tasks: counts.get(TaskStatus::Retrying),
    success_rate: counts.success_rate(),
    active_workers: active_workers(workers),
    status_counts,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::lifecycle::tests::task;
  use chrono::{FixedOffset, Utc};

  fn at(status: TaskStatus, created_at: DateTime<Utc>) -> Task {
    Task {
      created_at,
      ..task(status)
    }
  }

  fn worker(id: &str, status: WorkerStatus) -> Worker {
    let now = Utc::now();
    Worker {
      id: id.into(),
      status,
      last_heartbeat: now,
      active_tasks: 2,
      total_processed: 10,
      total_failed: 1,
      cpu_usage: 42.5,
      memory_usage: 512.0,
      registered_at: now,
    }
  }

  #[test]
  fn success_rate_never_divides_by_zero() {
    assert_eq!(success_rate(0, 0), 0.0);
    assert_eq!(success_rate(7, 10), 70.0);
    assert_eq!(StatusCounts::default().success_rate(), 0.0);
  }

  #[test]
  fn counts_sum_to_total_for_every_partition() {
    let statuses = TaskStatus::ALL;
    for mask in 0u32..(1 << statuses.len()) {
      let tasks: Vec<Task> = statuses
        .iter()
        .enumerate()
        .filter(|(bit, _)| mask & (1 << bit) != 0)
        .flat_map(|(bit, status)| (0..=bit).map(move |_| task(*status)))
        .collect();
      let counts = status_counts(&tasks);
      assert_eq!(counts.total(), tasks.len() as u64, "mask {:b}", mask);
      assert_eq!(counts.iter().count(), 6);
    }
  }

  #[test]
  fn distribution_skips_empty_statuses() {
    let tasks = vec![
      task(TaskStatus::Completed),
      task(TaskStatus::Completed),
      task(TaskStatus::Failed),
    ];
    let series = distribution(&status_counts(&tasks));
    assert_eq!(
      series,
      vec![
        SeriesPoint { name: "COMPLETED".into(), value: 2 },
        SeriesPoint { name: "FAILED".into(), value: 1 },
      ]
    );
  }

  #[test]
  fn summary_folds_queued_into_pending() {
    let tasks = vec![task(TaskStatus::Pending), task(TaskStatus::Queued), task(TaskStatus::Processing)];
    let summary = status_summary(&status_counts(&tasks));
    assert_eq!(
      summary,
      vec![
        SeriesPoint { name: "Processing".into(), value: 1 },
        SeriesPoint { name: "Pending".into(), value: 2 },
      ]
    );
  }

  #[test]
  fn timeline_buckets_by_creation_hour() {
    let now = Utc.with_ymd_and_hms(2024, 5, 10, 5, 30, 0).unwrap();
    let tasks = vec![
      at(TaskStatus::Completed, Utc.with_ymd_and_hms(2024, 5, 10, 1, 5, 0).unwrap()),
      at(TaskStatus::Failed, Utc.with_ymd_and_hms(2024, 5, 10, 1, 55, 0).unwrap()),
      at(TaskStatus::Processing, Utc.with_ymd_and_hms(2024, 5, 10, 3, 20, 0).unwrap()),
    ];
    let series = timeline(&tasks, &now);
    assert_eq!(series.len(), TIMELINE_BUCKETS);
    assert_eq!(series.last().unwrap().time, "05:00");
    assert_eq!(series.first().unwrap().time, "06:00");

    for bucket in &series {
      let expected = match bucket.time.as_str() {
        "01:00" => (1, 1, 0),
        "03:00" => (0, 0, 1),
        _ => (0, 0, 0),
      };
      assert_eq!((bucket.completed, bucket.failed, bucket.processing), expected, "bucket {}", bucket.time);
    }
  }

  #[test]
  fn timeline_ignores_tasks_outside_the_window() {
    let now = Utc.with_ymd_and_hms(2024, 5, 10, 5, 30, 0).unwrap();
    let tasks = vec![
      at(TaskStatus::Completed, now - Duration::hours(24)),
      at(TaskStatus::Completed, now + Duration::hours(2)),
      at(TaskStatus::Completed, now - Duration::hours(23)),
    ];
    let series = timeline(&tasks, &now);
    let total: u64 = series.iter().map(|bucket| bucket.completed).sum();
    assert_eq!(total, 1);
    assert_eq!(series[0].completed, 1);
  }

  #[test]
  fn timeline_uses_local_hours() {
    let offset = FixedOffset::east_opt(2 * 3600).unwrap();
    let now = offset.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap();
    let tasks = vec![at(TaskStatus::Completed, Utc.with_ymd_and_hms(2024, 5, 10, 8, 15, 0).unwrap())];
    let series = timeline(&tasks, &now);
    let bucket = series.iter().find(|bucket| bucket.time == "10:00").unwrap();
    assert_eq!(bucket.completed, 1);
  }

  #[test]
  fn statistics_recomputed_from_tasks() {
    let tasks = vec![
      task(TaskStatus::Completed),
      task(TaskStatus::Completed),
      task(TaskStatus::Failed),
      task(TaskStatus::Queued),
    ];
    let workers = vec![worker("w-1", WorkerStatus::Online), worker("w-2", WorkerStatus::Offline)];
    let stats = statistics_from(&tasks, &workers);
    assert_eq!(stats.total_tasks, 4);
    assert_eq!(stats.success_rate, 50.0);
    assert_eq!(stats.pending_tasks, 1);
    assert_eq!(stats.active_workers, 1);
    assert_eq!(stats.status_counts.get("COMPLETED"), Some(&2));
    assert!(!stats.status_counts.contains_key("PROCESSING"));

    assert_eq!(StatusCounts::from_statistics(&stats), status_counts(&tasks));
  }

  #[test]
  fn worker_load_mirrors_worker_fields() {
    let load = worker_load(&[worker("w-1", WorkerStatus::Busy)]);
    assert_eq!(load[0].worker_id, "w-1");
    assert_eq!(load[0].active_tasks, 2);
    assert_eq!(load[0].cpu_usage, 42.5);
  }
}

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use taskwatch::aggregate::{self, StatusCounts};
use taskwatch::config::Config;
use taskwatch::gateway::HttpGateway;
use taskwatch::models::{TaskStatus, TaskSubmission, TaskType};
use taskwatch::mutations::MutationCoordinator;
use taskwatch::query::{QueryData, QueryKey};
use taskwatch::scheduler::Scheduler;

#[derive(Parser)]
#[command(name = "taskwatch")]
#[command(about = "Client for the distributed task orchestration API", long_about = None)]
struct Cli {
  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Submit a new task
  Submit {
    #[arg(long = "type")]
    task_type: TaskType,
    #[arg(long)]
    payload: String,
    #[arg(long)]
    priority: Option<u8>,
    #[arg(long)]
    max_retries: Option<u32>,
  },
  /// Delete a task
  Delete { id: String },
  /// Mark a task as picked up by a worker
  Start {
    id: String,
    #[arg(long)]
    worker: String,
  },
  /// Mark a processing task as completed
  Complete {
    id: String,
    #[arg(long)]
    result: String,
  },
  /// Mark a task as failed, optionally asking for a retry
  Fail {
    id: String,
    #[arg(long)]
    error: String,
    #[arg(long)]
    retry: bool,
  },
  /// Show one task
  Show { id: String },
  /// List tasks, optionally filtered by status
  List {
    #[arg(long)]
    status: Option<TaskStatus>,
    #[arg(long, default_value_t = 0)]
    page: u32,
  },
  /// Print aggregate statistics
  Stats,
  /// List registered workers
  Workers,
}

fn init_logging() {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
  tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
  init_logging();
  let cli = Cli::parse();
  let config = Config::from_env();

  let gateway = HttpGateway::new(&config.api_url, config.http_timeout).context("Failed to build HTTP client")?;
  gateway
    .wait_until_reachable()
    .await
    .with_context(|| format!("API at {} is not reachable", gateway.base_url()))?;
  let scheduler = Scheduler::new(Arc::new(gateway), &config);
  let coordinator = MutationCoordinator::new(scheduler.clone());

  match cli.command {
    Commands::Submit {
      task_type,
      payload,
      priority,
      max_retries,
    } => {
      let task = coordinator
        .submit_task(TaskSubmission {
          task_type,
          payload,
          priority,
          max_retries,
        })
        .await?;
      println!("{} {} (priority {})", task.id, task.status, task.priority);
    }
    Commands::Delete { id } => {
      coordinator.delete_task(&id).await?;
      println!("Deleted {}", id);
    }
    Commands::Start { id, worker } => {
      prime(&scheduler, &id).await?;
      let receipt = coordinator.mark_processing(&id, &worker).await?;
      report(&scheduler, &id, receipt.downgraded).await?;
    }
    Commands::Complete { id, result } => {
      prime(&scheduler, &id).await?;
      let receipt = coordinator.mark_completed(&id, &result).await?;
      report(&scheduler, &id, receipt.downgraded).await?;
    }
    Commands::Fail { id, error, retry } => {
      prime(&scheduler, &id).await?;
      let receipt = coordinator.mark_failed(&id, &error, retry).await?;
      report(&scheduler, &id, receipt.downgraded).await?;
    }
    Commands::Show { id } => {
      let data = scheduler.query(&QueryKey::task(id)).await?;
      println!("{}", serde_json::to_string_pretty(&data.tasks())?);
    }
    Commands::List { status, page } => {
      let key = match status {
        Some(status) => QueryKey::tasks_by_status(status, page, config.page_size),
        None => QueryKey::tasks(page, config.page_size),
      };
      let data = scheduler.query(&key).await?;
      let Some(listing) = data.task_page() else {
        bail!("Unexpected payload for {}", key);
      };
      for task in &listing.content {
        println!(
          "{:<38} {:<18} {:<10} p{} retries {}/{}",
          task.id, task.task_type, task.status, task.priority, task.retry_count, task.max_retries
        );
      }
      println!(
        "page {}/{} ({} tasks)",
        listing.page + 1,
        listing.total_pages.max(1),
        listing.total_elements
      );
    }
    Commands::Stats => {
      let data = scheduler.query(&QueryKey::Statistics).await?;
      let QueryData::Statistics(stats) = data else {
        bail!("Unexpected payload for statistics");
      };
      let counts = StatusCounts::from_statistics(&stats);
      println!("total {} | success rate {:.1}%", stats.total_tasks, counts.success_rate());
      for point in aggregate::status_summary(&counts) {
        println!("  {:<12} {}", point.name, point.value);
      }
      println!("active workers {}", stats.active_workers);
    }
    Commands::Workers => {
      let data = scheduler.query(&QueryKey::Workers).await?;
      for worker in data.workers() {
        println!(
          "{:<20} {:<8} active {} processed {} failed {} cpu {:.0}%",
          worker.id, worker.status, worker.active_tasks, worker.total_processed, worker.total_failed, worker.cpu_usage
        );
      }
    }
  }

  Ok(())
}

/// Loads the task so the transition is checked against its current status.
async fn prime(scheduler: &Scheduler, id: &str) -> Result<()> {
  scheduler.query(&QueryKey::task(id)).await?;
  Ok(())
}

async fn report(scheduler: &Scheduler, id: &str, downgraded: bool) -> Result<()> {
  if downgraded {
    info!("Retry budget exhausted; task {} was failed permanently", id);
  }
  let data = scheduler.query(&QueryKey::task(id)).await?;
  if let Some(task) = data.tasks().first() {
    println!("{} {}", task.id, task.status);
  }
  Ok(())
}

//! Overview (headline statistics and worker nodes)
//! Tasks (newest tasks and the actions they allow)
//! Analytics (status distribution, hourly timeline, worker load)

use std::{
  env,
  fs::File,
  io,
  sync::{Arc, Mutex, mpsc},
  thread,
  time::{Duration, Instant},
};

use anyhow::{Context, Result};
use chrono::Local;
use crossterm::{
  event::{self, DisableMouseCapture, EnableMouseCapture, Event as CEvent, KeyCode},
  execute,
  terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use tokio::runtime::Runtime;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use tui::{
  Terminal,
  backend::{Backend, CrosstermBackend},
  layout::{Constraint, Direction, Layout, Rect},
  style::{Color, Modifier, Style},
  text::{Span, Spans},
  widgets::{BarChart, Block, Borders, List, ListItem, Paragraph, Tabs},
};

use taskwatch::aggregate::{self, SeriesPoint, StatusCounts, TimelineBucket, WorkerLoadPoint};
use taskwatch::cache::EntryStatus;
use taskwatch::config::Config;
use taskwatch::gateway::HttpGateway;
use taskwatch::lifecycle::{TaskAction, available_actions};
use taskwatch::models::{Statistics, Task, TaskStatus, Worker};
use taskwatch::query::QueryKey;
use taskwatch::scheduler::{Scheduler, Subscription};

#[derive(Clone, Copy)]
enum DashboardTab {
  Overview,
  Tasks,
  Analytics,
}

struct TaskRow {
  task: Task,
  actions: Vec<TaskAction>,
}

struct App {
  current_tab: DashboardTab,
  stats: Option<Statistics>,
  counts: StatusCounts,
  workers: Vec<Worker>,
  tasks: Vec<TaskRow>,
  summary: Vec<SeriesPoint>,
  timeline: Vec<TimelineBucket>,
  load: Vec<WorkerLoadPoint>,
  banner: Option<String>,
  refreshing: bool,
}

impl App {
  fn new() -> Self {
    Self {
      current_tab: DashboardTab::Overview,
      stats: None,
      counts: StatusCounts::default(),
      workers: vec![],
      tasks: vec![],
      summary: vec![],
      timeline: vec![],
      load: vec![],
      banner: None,
      refreshing: false,
    }
  }

  fn next_tab(&mut self) {
    self.current_tab = match self.current_tab {
      DashboardTab::Overview => DashboardTab::Tasks,
      DashboardTab::Tasks => DashboardTab::Analytics,
      DashboardTab::Analytics => DashboardTab::Overview,
    }
  }

  fn previous_tab(&mut self) {
    self.current_tab = match self.current_tab {
      DashboardTab::Overview => DashboardTab::Analytics,
      DashboardTab::Tasks => DashboardTab::Overview,
      DashboardTab::Analytics => DashboardTab::Tasks,
    }
  }

  /// Keeps the selected tab; everything else comes from the new state.
  fn replace(&mut self, mut state: App) {
    state.current_tab = self.current_tab;
    *self = state;
  }
}

struct Views {
  tasks: Subscription,
  stats: Subscription,
  workers: Subscription,
}

impl Views {
  fn open(scheduler: &Scheduler, page_size: u32) -> Self {
    Self {
      tasks: scheduler.subscribe(QueryKey::tasks(0, page_size)),
      stats: scheduler.subscribe(QueryKey::Statistics),
      workers: scheduler.subscribe(QueryKey::Workers),
    }
  }

  fn snapshot(&self) -> App {
    let mut app = App::new();
    let mut errors = Vec::new();
    for sub in [&self.tasks, &self.stats, &self.workers] {
      if let Some(entry) = sub.entry() {
        app.refreshing |= entry.status == EntryStatus::Fetching;
        if let Some(err) = &entry.error {
          errors.push(format!("{}: {}", sub.key(), err));
        }
      }
    }
    app.banner = (!errors.is_empty()).then(|| errors.join(" | "));

    let tasks: Vec<Task> = self.tasks.data().map(|data| data.tasks().to_vec()).unwrap_or_default();
    app.workers = self.workers.data().map(|data| data.workers().to_vec()).unwrap_or_default();
    app.stats = self.stats.data().and_then(|data| data.statistics().cloned());

    app.counts = match &app.stats {
      Some(stats) if !stats.status_counts.is_empty() => StatusCounts::from_statistics(stats),
      _ => aggregate::status_counts(&tasks),
    };
    app.summary = aggregate::status_summary(&app.counts);
    app.timeline = aggregate::timeline(&tasks, &Local::now());
    app.load = aggregate::worker_load(&app.workers);
    app.tasks = tasks
      .into_iter()
      .map(|task| TaskRow {
        actions: available_actions(&task),
        task,
      })
      .collect();
    app
  }
}

fn init_logging() -> Result<()> {
  let path = env::var("TASKWATCH_LOG_FILE").unwrap_or_else(|_| "taskwatch_dashboard.log".into());
  let file = File::create(&path).with_context(|| format!("Failed to open log file {}", path))?;
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_ansi(false)
    .with_writer(Mutex::new(file))
    .init();
  Ok(())
}

/// Runs the engine on its own runtime and pushes a fresh `App` after every
/// cache change, or every two seconds at the latest.
fn spawn_engine(config: Config, tx: mpsc::Sender<App>) -> Result<()> {
  let gateway = HttpGateway::new(&config.api_url, config.http_timeout)?;
  let api = gateway.base_url().to_string();
  thread::spawn(move || {
    let rt_bg = match Runtime::new() {
      Ok(rt) => rt,
      Err(e) => {
        error!("Failed to start engine runtime: {:?}", e);
        return;
      }
    };
    rt_bg.block_on(async move {
      let scheduler = Scheduler::new(Arc::new(gateway), &config);
      let views = Views::open(&scheduler, config.page_size);
      let mut events = scheduler.events();
      let driver = scheduler.clone();
      let tick = config.tick;
      tokio::spawn(async move { driver.run(tick).await });
      info!("Dashboard engine polling {}", api);

      loop {
        if tx.send(views.snapshot()).is_err() {
          break;
        }
        tokio::select! {
          _ = events.recv() => {}
          _ = tokio::time::sleep(Duration::from_secs(2)) => {}
        }
      }
    });
  });
  Ok(())
}

fn main() -> Result<()> {
  init_logging()?;
  let config = Config::from_env();
  let (tx, rx) = mpsc::channel::<App>();
  spawn_engine(config, tx)?;

  enable_raw_mode()?;
  let mut stdout = io::stdout();
  execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
  let backend = CrosstermBackend::new(stdout);
  let mut terminal = Terminal::new(backend)?;

  let mut app = App::new();
  let tick_rate = Duration::from_millis(500);
  let mut last_tick = Instant::now();

  loop {
    while let Ok(state) = rx.try_recv() {
      app.replace(state);
    }
    terminal.draw(|f| ui(f, &app))?;

    let timeout = tick_rate
      .checked_sub(last_tick.elapsed())
      .unwrap_or_else(|| Duration::from_secs(0));
    if event::poll(timeout)? {
      if let CEvent::Key(key) = event::read()? {
        match key.code {
          KeyCode::Char('q') => break,
          KeyCode::Right => app.next_tab(),
          KeyCode::Left => app.previous_tab(),
          _ => {}
        }
      }
    }
    if last_tick.elapsed() >= tick_rate {
      last_tick = Instant::now();
    }
  }

  disable_raw_mode()?;
  execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableMouseCapture)?;
  terminal.show_cursor()?;
  Ok(())
}

fn status_color(status: TaskStatus) -> Color {
  match status {
    TaskStatus::Completed => Color::Green,
    TaskStatus::Failed => Color::Red,
    TaskStatus::Processing => Color::Cyan,
    TaskStatus::Retrying => Color::Magenta,
    TaskStatus::Pending | TaskStatus::Queued => Color::Yellow,
  }
}

fn ui<B: Backend>(f: &mut tui::Frame<B>, app: &App) {
  let chunks = Layout::default()
    .direction(Direction::Vertical)
    .margin(1)
    .constraints([Constraint::Length(3), Constraint::Min(0), Constraint::Length(3)].as_ref())
    .split(f.size());

  let tab_titles = vec!["Overview", "Tasks", "Analytics"];
  let tabs = Tabs::new(
    tab_titles
      .iter()
      .map(|t| Spans::from(Span::styled(*t, Style::default().fg(Color::Yellow))))
      .collect(),
  )
  .block(Block::default().borders(Borders::ALL).title("Task Orchestration"))
  .highlight_style(Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD))
  .select(match app.current_tab {
    DashboardTab::Overview => 0,
    DashboardTab::Tasks => 1,
    DashboardTab::Analytics => 2,
  });
  f.render_widget(tabs, chunks[0]);

  match app.current_tab {
    DashboardTab::Overview => render_overview(f, app, chunks[1]),
    DashboardTab::Tasks => render_tasks(f, app, chunks[1]),
    DashboardTab::Analytics => render_analytics(f, app, chunks[1]),
  }

  let (text, color) = match (&app.banner, app.refreshing) {
    (Some(banner), _) => (banner.clone(), Color::Red),
    (None, true) => ("Refreshing... | ←/→: Switch Tabs | q: Quit".to_string(), Color::Gray),
    (None, false) => ("←/→: Switch Tabs | q: Quit".to_string(), Color::White),
  };
  let footer = Paragraph::new(text)
    .style(Style::default().fg(color))
    .block(Block::default().borders(Borders::ALL));
  f.render_widget(footer, chunks[2]);
}

fn render_overview<B: Backend>(f: &mut tui::Frame<B>, app: &App, area: Rect) {
  let chunks = Layout::default()
    .direction(Direction::Horizontal)
    .constraints([Constraint::Percentage(40), Constraint::Percentage(60)].as_ref())
    .split(area);

  let headline = match &app.stats {
    Some(stats) => vec![
      Spans::from(Span::styled(
        format!("Total tasks: {}", stats.total_tasks),
        Style::default().add_modifier(Modifier::BOLD),
      )),
      Spans::from(Span::raw(format!("Success rate: {:.1}%", app.counts.success_rate()))),
      Spans::from(Span::raw(format!("Active workers: {}", stats.active_workers))),
      Spans::from(Span::raw(format!("Processing: {}", stats.processing_tasks))),
      Spans::from(Span::raw(format!("Pending: {}", stats.pending_tasks))),
      Spans::from(Span::raw(format!("Retrying: {}", stats.retrying_tasks))),
      Spans::from(Span::raw(format!("Failed: {}", stats.failed_tasks))),
    ],
    None => vec![Spans::from(Span::raw("Loading statistics..."))],
  };
  let stats = Paragraph::new(headline).block(Block::default().borders(Borders::ALL).title("Statistics"));
  f.render_widget(stats, chunks[0]);

  let worker_items: Vec<ListItem> = app
    .workers
    .iter()
    .map(|w| {
      let lines = vec![
        Spans::from(Span::styled(format!("ID: {}", w.id), Style::default().add_modifier(Modifier::BOLD))),
        Spans::from(Span::raw(format!("Status: {} | Active: {}", w.status, w.active_tasks))),
        Spans::from(Span::raw(format!(
          "Processed: {} | Failed: {} | CPU: {:.0}%",
          w.total_processed, w.total_failed, w.cpu_usage
        ))),
        Spans::from(Span::raw(format!("Last heartbeat: {}", w.last_heartbeat.format("%Y-%m-%d %H:%M:%S")))),
      ];
      ListItem::new(lines)
    })
    .collect();
  let workers_list = List::new(if worker_items.is_empty() {
    vec![ListItem::new(Spans::from(Span::raw("No workers registered")))]
  } else {
    worker_items
  })
  .block(Block::default().borders(Borders::ALL).title("Worker Nodes"));
  f.render_widget(workers_list, chunks[1]);
}

fn render_tasks<B: Backend>(f: &mut tui::Frame<B>, app: &App, area: Rect) {
  let task_items: Vec<ListItem> = app
    .tasks
    .iter()
    .map(|row| {
      let t = &row.task;
      let actions: Vec<String> = row.actions.iter().map(|action| action.to_string()).collect();
      ListItem::new(Spans::from(vec![
        Span::styled(format!("{:<10} ", t.status), Style::default().fg(status_color(t.status))),
        Span::styled(format!("{} ", t.id), Style::default().add_modifier(Modifier::BOLD)),
        Span::raw(format!(
          "{} | p{} | retries {}/{} | {}",
          t.task_type,
          t.priority,
          t.retry_count,
          t.max_retries,
          actions.join(", ")
        )),
      ]))
    })
    .collect();
  let tasks_list = List::new(task_items).block(Block::default().borders(Borders::ALL).title("Latest Tasks"));
  f.render_widget(tasks_list, area);
}

fn render_analytics<B: Backend>(f: &mut tui::Frame<B>, app: &App, area: Rect) {
  let rows = Layout::default()
    .direction(Direction::Vertical)
    .constraints([Constraint::Percentage(50), Constraint::Percentage(50)].as_ref())
    .split(area);
  let top = Layout::default()
    .direction(Direction::Horizontal)
    .constraints([Constraint::Percentage(50), Constraint::Percentage(50)].as_ref())
    .split(rows[0]);

  let bars: Vec<(&str, u64)> = app.summary.iter().map(|point| (point.name.as_str(), point.value)).collect();
  let summary = BarChart::default()
    .block(Block::default().borders(Borders::ALL).title("Status Summary"))
    .data(&bars)
    .bar_width(9)
    .bar_style(Style::default().fg(Color::Cyan))
    .value_style(Style::default().fg(Color::Black).bg(Color::Cyan));
  f.render_widget(summary, top[0]);

  let load_items: Vec<ListItem> = app
    .load
    .iter()
    .map(|point| {
      ListItem::new(Spans::from(Span::raw(format!(
        "{}: active {} | processed {} | cpu {:.0}%",
        point.worker_id, point.active_tasks, point.total_processed, point.cpu_usage
      ))))
    })
    .collect();
  let load = List::new(load_items).block(Block::default().borders(Borders::ALL).title("Worker Load"));
  f.render_widget(load, top[1]);

  let timeline_items: Vec<ListItem> = app
    .timeline
    .iter()
    .filter(|bucket| bucket.completed + bucket.failed + bucket.processing > 0)
    .map(|bucket| {
      ListItem::new(Spans::from(vec![
        Span::styled(format!("{} ", bucket.time), Style::default().fg(Color::Green)),
        Span::raw(format!(
          "completed {} | failed {} | processing {}",
          bucket.completed, bucket.failed, bucket.processing
        )),
      ]))
    })
    .collect();
  let timeline = List::new(timeline_items).block(Block::default().borders(Borders::ALL).title("Last 24 Hours"));
  f.render_widget(timeline, rows[1]);
}

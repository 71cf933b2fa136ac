//! Fetch deduplication and polling.
//!
//! The scheduler owns the [`QueryCache`] and an in-flight map keyed by
//! [`QueryKey`]. Callers never talk to the gateway directly: a read either
//! hits a fresh entry, joins the fetch already running for its key, or issues
//! a new one. Every issued fetch also runs as its own tokio task, so it
//! settles into the cache even when all callers awaiting it are gone.
//! Polling is expressed as [`Scheduler::tick`], which issues the fetches that
//! are due; [`Scheduler::run`] is the tokio driver used by the binaries.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::runtime::Handle;
use tokio::sync::{Notify, broadcast};
use tokio::time::{Instant, interval};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::IntervalStream;
use tracing::{debug, info, warn};

use crate::cache::{CacheEntry, EntryStatus, QueryCache, WriteOutcome};
use crate::config::{Config, RefreshIntervals};
use crate::error::ErrorKind;
use crate::gateway::Gateway;
use crate::query::{QueryData, QueryKey};

pub type FetchOutcome = Result<QueryData, ErrorKind>;

/// A fetch that any number of callers can await; all of them observe the same outcome.
pub type Fetch = Shared<BoxFuture<'static, FetchOutcome>>;

/// Emitted after every committed write to the cache.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEvent {
  pub key: QueryKey,
  pub status: EntryStatus,
}

struct InFlight {
  seq: u64,
  fetch: Fetch,
}

#[derive(Debug, Default)]
struct Schedule {
  subscribers: usize,
  next_due: Option<Instant>,
  inactive_since: Option<Instant>,
}

#[derive(Default)]
struct Inner {
  cache: QueryCache,
  in_flight: HashMap<QueryKey, InFlight>,
  schedules: HashMap<QueryKey, Schedule>,
}

impl Inner {
  fn settle(&mut self, key: &QueryKey, seq: u64, outcome: &FetchOutcome, interval: Duration) -> Option<EntryStatus> {
    let now = Instant::now();
    let current = matches!(self.in_flight.get(key), Some(in_flight) if in_flight.seq == seq);
    if current {
      self.in_flight.remove(key);
    }

    let written = match outcome {
      Ok(data) => self.cache.put(key, seq, data.clone(), now),
      Err(err) => {
        warn!("Fetch #{} for {} failed: {}", seq, key, err);
        self.cache.set_error(key, seq, err.clone())
      }
    };

    if current {
      if let Some(schedule) = self.schedules.get_mut(key) {
        if schedule.subscribers > 0 {
          schedule.next_due = Some(now + interval);
        }
      }
    }

    match written {
      WriteOutcome::Committed => {
        let status = self.cache.get(key).map(|entry| entry.status);
        debug!("Settled fetch #{} for {} as {:?}", seq, key, status);
        status
      }
      WriteOutcome::Discarded => None,
    }
  }

  fn evict(&mut self, now: Instant, grace: Duration) {
    let expired: Vec<QueryKey> = self
      .schedules
      .iter()
      .filter(|(key, schedule)| {
        schedule.subscribers == 0
          && !self.in_flight.contains_key(*key)
          && schedule
            .inactive_since
            .is_some_and(|since| now.saturating_duration_since(since) >= grace)
      })
      .map(|(key, _)| key.clone())
      .collect();
    for key in expired {
      self.schedules.remove(&key);
      self.cache.remove(&key);
      debug!("Evicted {}", key);
    }
  }
}

enum Lookup {
  Hit(QueryData),
  Pending(Fetch),
}

#[derive(Clone)]
pub struct Scheduler {
  inner: Arc<Mutex<Inner>>,
  gateway: Arc<dyn Gateway>,
  intervals: RefreshIntervals,
  eviction_grace: Duration,
  events: broadcast::Sender<CacheEvent>,
  wake: Arc<Notify>,
}

impl Scheduler {
  pub fn new(gateway: Arc<dyn Gateway>, config: &Config) -> Self {
    Self::with_intervals(gateway, config.refresh, config.eviction_grace)
  }

  pub fn with_intervals(gateway: Arc<dyn Gateway>, intervals: RefreshIntervals, eviction_grace: Duration) -> Self {
    let (events, _) = broadcast::channel(256);
    Self {
      inner: Arc::new(Mutex::new(Inner::default())),
      gateway,
      intervals,
      eviction_grace,
      events,
      wake: Arc::new(Notify::new()),
    }
  }

  fn lock(&self) -> MutexGuard<'_, Inner> {
    self.inner.lock().unwrap_or_else(PoisonError::into_inner)
  }

  pub fn gateway(&self) -> &Arc<dyn Gateway> {
    &self.gateway
  }

  pub fn events(&self) -> broadcast::Receiver<CacheEvent> {
    self.events.subscribe()
  }

  /// Registers a consumer for `key`. The first consumer makes the key active:
  /// an absent, stale or failed entry is fetched on the next tick, a fresh one
  /// is served as is and polled again one interval after it was fetched.
  pub fn subscribe(&self, key: QueryKey) -> Subscription {
    let now = Instant::now();
    let interval = key.refresh_interval(&self.intervals);
    {
      let mut inner = self.lock();
      let entry = inner.cache.ensure(&key, interval);
      let due = match (entry.status, entry.last_fetched_at) {
        (EntryStatus::Fresh, Some(at)) if !entry.is_expired(now) => at + interval,
        _ => now,
      };
      let schedule = inner.schedules.entry(key.clone()).or_default();
      schedule.subscribers += 1;
      schedule.inactive_since = None;
      if schedule.subscribers == 1 {
        schedule.next_due = Some(due);
        debug!("Activated {}", key);
      }
    }
    self.wake.notify_one();
    Subscription {
      key,
      scheduler: self.clone(),
    }
  }

  fn release(&self, key: &QueryKey) {
    let mut inner = self.lock();
    if let Some(schedule) = inner.schedules.get_mut(key) {
      schedule.subscribers = schedule.subscribers.saturating_sub(1);
      if schedule.subscribers == 0 {
        schedule.next_due = None;
        schedule.inactive_since = Some(Instant::now());
        debug!("Deactivated {}", key);
      }
    }
  }

  /// Issues every fetch that is due now and returns them so callers can await
  /// the outcome. Keys with a fetch still in flight are skipped until it settles.
  pub fn tick(&self) -> Vec<Fetch> {
    let now = Instant::now();
    let mut inner = self.lock();
    inner.cache.expire(now);
    inner.evict(now, self.eviction_grace);

    let due: Vec<QueryKey> = inner
      .schedules
      .iter()
      .filter(|(key, schedule)| {
        schedule.subscribers > 0
          && schedule.next_due.is_some_and(|at| at <= now)
          && !inner.in_flight.contains_key(*key)
      })
      .map(|(key, _)| key.clone())
      .collect();

    due.into_iter().map(|key| self.issue(&mut inner, key)).collect()
  }

  fn issue(&self, inner: &mut Inner, key: QueryKey) -> Fetch {
    let interval = key.refresh_interval(&self.intervals);
    let seq = inner.cache.begin_fetch(&key, interval);
    if let Some(schedule) = inner.schedules.get_mut(&key) {
      schedule.next_due = None;
    }

    let gateway = self.gateway.clone();
    let state: Weak<Mutex<Inner>> = Arc::downgrade(&self.inner);
    let events = self.events.clone();
    let fetch_key = key.clone();
    let fetch = async move {
      let outcome = fetch_key.fetch(gateway.as_ref()).await;
      settle(&state, &events, &fetch_key, seq, &outcome, interval);
      outcome
    }
    .boxed()
    .shared();

    // Without a runtime the fetch only progresses while someone awaits it.
    if let Ok(runtime) = Handle::try_current() {
      runtime.spawn(fetch.clone());
    }

    debug!("Issued fetch #{} for {}", seq, key);
    inner.in_flight.insert(
      key,
      InFlight {
        seq,
        fetch: fetch.clone(),
      },
    );
    fetch
  }

  fn lookup(&self, key: &QueryKey) -> Lookup {
    let now = Instant::now();
    let mut inner = self.lock();
    if let Some(in_flight) = inner.in_flight.get(key) {
      debug!("Joining fetch #{} for {}", in_flight.seq, key);
      return Lookup::Pending(in_flight.fetch.clone());
    }
    if let Some(entry) = inner.cache.get(key) {
      if let (EntryStatus::Fresh, Some(data)) = (entry.status, &entry.data) {
        if !entry.is_expired(now) {
          return Lookup::Hit(data.clone());
        }
      }
    }
    inner
      .schedules
      .entry(key.clone())
      .or_insert_with(|| Schedule {
        inactive_since: Some(now),
        ..Schedule::default()
      });
    Lookup::Pending(self.issue(&mut inner, key.clone()))
  }

  /// Reads `key`: fresh cached data is returned without I/O, otherwise the
  /// caller joins the in-flight fetch or starts one.
  pub async fn query(&self, key: &QueryKey) -> FetchOutcome {
    match self.lookup(key) {
      Lookup::Hit(data) => Ok(data),
      Lookup::Pending(fetch) => fetch.await,
    }
  }

  /// Marks every cached key matching `predicate` stale. A fetch already in
  /// flight for such a key is detached: it may still land, but the next tick
  /// issues a newer one whose result wins.
  pub fn invalidate_where<F>(&self, predicate: F) -> Vec<QueryKey>
  where
    F: FnMut(&QueryKey) -> bool,
  {
    let mut inner = self.lock();
    let marked = inner.cache.mark_stale_where(predicate);
    self.detach(inner, marked)
  }

  /// Same as [`Scheduler::invalidate_where`] for an explicit list of keys.
  /// Keys that were never cached are ignored.
  pub fn invalidate(&self, keys: &[QueryKey]) -> Vec<QueryKey> {
    let mut inner = self.lock();
    let marked = inner.cache.mark_stale(keys);
    self.detach(inner, marked)
  }

  fn detach(&self, mut inner: MutexGuard<'_, Inner>, marked: Vec<QueryKey>) -> Vec<QueryKey> {
    let now = Instant::now();
    for key in &marked {
      inner.in_flight.remove(key);
      if let Some(schedule) = inner.schedules.get_mut(key) {
        if schedule.subscribers > 0 {
          schedule.next_due = Some(now);
        }
      }
    }
    drop(inner);
    if !marked.is_empty() {
      info!("Invalidated {} cached queries", marked.len());
      self.wake.notify_one();
    }
    marked
  }

  pub fn snapshot(&self, key: &QueryKey) -> Option<CacheEntry> {
    self.lock().cache.get(key).cloned()
  }

  /// Runs `f` against the cache under the lock. `f` must not block.
  pub fn with_cache<R>(&self, f: impl FnOnce(&QueryCache) -> R) -> R {
    f(&self.lock().cache)
  }

  pub fn is_in_flight(&self, key: &QueryKey) -> bool {
    self.lock().in_flight.contains_key(key)
  }

  pub fn subscriber_count(&self, key: &QueryKey) -> usize {
    self
      .lock()
      .schedules
      .get(key)
      .map(|schedule| schedule.subscribers)
      .unwrap_or_default()
  }

  /// Drives polling forever: ticks every `period`, or early when a
  /// subscription or invalidation asks for it.
  pub async fn run(&self, period: Duration) {
    let mut ticks = IntervalStream::new(interval(period));
    info!("Scheduler running with a {:?} tick", period);
    loop {
      tokio::select! {
        Some(_) = ticks.next() => {}
        _ = self.wake.notified() => {}
      }
      let issued = self.tick();
      if !issued.is_empty() {
        debug!("Tick issued {} fetches", issued.len());
      }
    }
  }
}

fn settle(
  state: &Weak<Mutex<Inner>>,
  events: &broadcast::Sender<CacheEvent>,
  key: &QueryKey,
  seq: u64,
  outcome: &FetchOutcome,
  interval: Duration,
) {
  let Some(state) = state.upgrade() else {
    return;
  };
  let status = state
    .lock()
    .unwrap_or_else(PoisonError::into_inner)
    .settle(key, seq, outcome, interval);
  if let Some(status) = status {
    let _ = events.send(CacheEvent {
      key: key.clone(),
      status,
    });
  }
}

/// A consumer's interest in one key. Dropping it cancels that consumer's
/// polling; an in-flight fetch still completes and fills the cache.
pub struct Subscription {
  key: QueryKey,
  scheduler: Scheduler,
}

impl Subscription {
  pub fn key(&self) -> &QueryKey {
    &self.key
  }

  pub fn entry(&self) -> Option<CacheEntry> {
    self.scheduler.snapshot(&self.key)
  }

  pub fn data(&self) -> Option<QueryData> {
    self.entry().and_then(|entry| entry.data)
  }

  pub fn cancel(self) {}
}

impl Drop for Subscription {
  fn drop(&mut self) {
    self.scheduler.release(&self.key);
  }
}

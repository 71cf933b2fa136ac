//! In-memory query cache.
//!
//! Every write carries the sequence number handed out by [`QueryCache::begin_fetch`].
//! A response is only committed when it belongs to a fetch issued after the one
//! that last settled the entry, so a slow early request can never overwrite the
//! result of a later one.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::error::ErrorKind;
use crate::query::{QueryData, QueryKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
  Idle,
  Fetching,
  Fresh,
  Stale,
  Error,
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
  pub data: Option<QueryData>,
  pub status: EntryStatus,
  pub last_fetched_at: Option<Instant>,
  pub error: Option<ErrorKind>,
  pub refetch_interval: Duration,
  issued_seq: u64,
  settled_seq: u64,
  stale_fence: u64,
}

impl CacheEntry {
  fn new(refetch_interval: Duration) -> Self {
    Self {
      data: None,
      status: EntryStatus::Idle,
      last_fetched_at: None,
      error: None,
      refetch_interval,
      issued_seq: 0,
      settled_seq: 0,
      stale_fence: 0,
    }
  }

  pub fn is_fetching(&self) -> bool {
    self.status == EntryStatus::Fetching
  }

  /// Sequence number of the most recently issued fetch.
  pub fn issued_seq(&self) -> u64 {
    self.issued_seq
  }

  /// True once the age of the data reaches the refetch interval.
  pub fn is_expired(&self, now: Instant) -> bool {
    match self.last_fetched_at {
      Some(at) => now.saturating_duration_since(at) >= self.refetch_interval,
      None => true,
    }
  }

  /// Error to show in place of data: only when nothing was ever fetched.
  pub fn blocking_error(&self) -> Option<&ErrorKind> {
    match (&self.data, &self.error) {
      (None, Some(err)) => Some(err),
      _ => None,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
  Committed,
  Discarded,
}

#[derive(Debug, Default)]
pub struct QueryCache {
  entries: HashMap<QueryKey, CacheEntry>,
}

impl QueryCache {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn get(&self, key: &QueryKey) -> Option<&CacheEntry> {
    self.entries.get(key)
  }

  /// Creates an `Idle` entry for `key` if none exists yet.
  pub fn ensure(&mut self, key: &QueryKey, refetch_interval: Duration) -> &CacheEntry {
    self
      .entries
      .entry(key.clone())
      .or_insert_with(|| CacheEntry::new(refetch_interval))
  }

  /// Marks `key` as fetching and returns the sequence number the response must carry.
  pub fn begin_fetch(&mut self, key: &QueryKey, refetch_interval: Duration) -> u64 {
    let entry = self
      .entries
      .entry(key.clone())
      .or_insert_with(|| CacheEntry::new(refetch_interval));
    entry.issued_seq += 1;
    entry.status = EntryStatus::Fetching;
    entry.issued_seq
  }

  pub fn put(&mut self, key: &QueryKey, seq: u64, data: QueryData, now: Instant) -> WriteOutcome {
    let Some(entry) = self.entries.get_mut(key) else {
      debug!("Dropping response for evicted key {}", key);
      return WriteOutcome::Discarded;
    };
    if seq <= entry.settled_seq {
      debug!("Discarding response #{} for {}: #{} already settled", seq, key, entry.settled_seq);
      return WriteOutcome::Discarded;
    }
    entry.settled_seq = seq;
    entry.data = Some(data);
    entry.error = None;
    entry.last_fetched_at = Some(now);
    entry.status = if seq < entry.issued_seq {
      EntryStatus::Fetching
    } else if seq <= entry.stale_fence {
      EntryStatus::Stale
    } else {
      EntryStatus::Fresh
    };
    WriteOutcome::Committed
  }

  /// Records a failed fetch. Previously cached data is kept.
  pub fn set_error(&mut self, key: &QueryKey, seq: u64, error: ErrorKind) -> WriteOutcome {
    let Some(entry) = self.entries.get_mut(key) else {
      return WriteOutcome::Discarded;
    };
    if seq <= entry.settled_seq || seq < entry.issued_seq {
      debug!("Discarding error #{} for {}: superseded", seq, key);
      return WriteOutcome::Discarded;
    }
    entry.settled_seq = seq;
    entry.error = Some(error);
    entry.status = EntryStatus::Error;
    WriteOutcome::Committed
  }

  /// Invalidates the given keys. Responses to fetches issued before this call
  /// may still land, but the entry stays `Stale` until a newer fetch settles.
  pub fn mark_stale<'a, I>(&mut self, keys: I) -> Vec<QueryKey>
  where
    I: IntoIterator<Item = &'a QueryKey>,
  {
    let mut marked = Vec::new();
    for key in keys {
      if let Some(entry) = self.entries.get_mut(key) {
        invalidate(entry);
        marked.push(key.clone());
      }
    }
    marked
  }

  pub fn mark_stale_where<F>(&mut self, mut predicate: F) -> Vec<QueryKey>
  where
    F: FnMut(&QueryKey) -> bool,
  {
    let mut marked = Vec::new();
    for (key, entry) in self.entries.iter_mut() {
      if predicate(key) {
        invalidate(entry);
        marked.push(key.clone());
      }
    }
    marked
  }

  /// Moves `Fresh` entries older than their refetch interval to `Stale`.
  pub fn expire(&mut self, now: Instant) -> Vec<QueryKey> {
    let mut expired = Vec::new();
    for (key, entry) in self.entries.iter_mut() {
      if entry.status == EntryStatus::Fresh && entry.is_expired(now) {
        entry.status = EntryStatus::Stale;
        expired.push(key.clone());
      }
    }
    expired
  }

  pub fn remove(&mut self, key: &QueryKey) -> Option<CacheEntry> {
    self.entries.remove(key)
  }

  /// All entries with their keys, for views that scan every cached payload.
  pub fn iter(&self) -> impl Iterator<Item = (&QueryKey, &CacheEntry)> {
    self.entries.iter()
  }
}

fn invalidate(entry: &mut CacheEntry) {
  entry.stale_fence = entry.issued_seq;
  if entry.status != EntryStatus::Idle {
    entry.status = EntryStatus::Stale;
  }
}

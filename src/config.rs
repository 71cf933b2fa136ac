use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::models::DEFAULT_PAGE_SIZE;

/// Refresh cadences per query family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshIntervals {
  pub listing: Duration,
  pub detail: Duration,
}

impl Default for RefreshIntervals {
  fn default() -> Self {
    Self {
      listing: Duration::from_millis(5000),
      detail: Duration::from_millis(3000),
    }
  }
}

#[derive(Debug, Clone)]
pub struct Config {
  pub api_url: String,
  pub http_timeout: Duration,
  pub refresh: RefreshIntervals,
  pub eviction_grace: Duration,
  pub page_size: u32,
  pub tick: Duration,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      api_url: "http://localhost:8080/api".into(),
      http_timeout: Duration::from_millis(10_000),
      refresh: RefreshIntervals::default(),
      eviction_grace: Duration::from_millis(300_000),
      page_size: DEFAULT_PAGE_SIZE,
      tick: Duration::from_millis(250),
    }
  }
}

impl Config {
  pub fn from_env() -> Self {
    let defaults = Config::default();
    Self {
      api_url: env::var("TASKWATCH_API_URL")
        .map(|url| url.trim_end_matches('/').to_string())
        .unwrap_or(defaults.api_url),
      http_timeout: millis_or("TASKWATCH_HTTP_TIMEOUT_MS", defaults.http_timeout),
      refresh: RefreshIntervals {
        listing: millis_or("TASKWATCH_LIST_REFRESH_MS", defaults.refresh.listing),
        detail: millis_or("TASKWATCH_DETAIL_REFRESH_MS", defaults.refresh.detail),
      },
      eviction_grace: millis_or("TASKWATCH_EVICTION_GRACE_MS", defaults.eviction_grace),
      page_size: parsed_or("TASKWATCH_PAGE_SIZE", defaults.page_size),
      tick: millis_or("TASKWATCH_TICK_MS", defaults.tick),
    }
  }
}

fn parsed_or<T: FromStr>(name: &str, fallback: T) -> T {
  env::var(name)
    .ok()
    .and_then(|raw| raw.parse().ok())
    .unwrap_or(fallback)
}

fn millis_or(name: &str, fallback: Duration) -> Duration {
  env::var(name)
    .ok()
    .and_then(|raw| raw.parse::<u64>().ok())
    .map(Duration::from_millis)
    .unwrap_or(fallback)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_match_dashboard_cadences() {
    let config = Config::default();
    assert_eq!(config.refresh.listing, Duration::from_secs(5));
    assert_eq!(config.refresh.detail, Duration::from_secs(3));
    assert_eq!(config.page_size, 20);
  }

  #[test]
  fn unparsable_values_fall_back() {
    assert_eq!(parsed_or("TASKWATCH_TEST_UNSET_VARIABLE", 7u32), 7);
    assert_eq!(millis_or("TASKWATCH_TEST_UNSET_VARIABLE", Duration::from_millis(9)), Duration::from_millis(9));
  }
}

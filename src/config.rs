use crate::error::PoolError;

use std::env;
use std::num::NonZeroUsize;
use std::thread;

/// Prefix used by [`PoolConfig::from_env`].
pub const DEFAULT_ENV_PREFIX: &str = "WORKER_POOL_";

const DEFAULT_POOL_NAME: &str = "worker_pool";

/// Sizing and naming for a [`WorkerPool`](crate::WorkerPool).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
  pub name: String,
  pub worker_count: usize,
  pub queue_capacity: usize,
}

impl Default for PoolConfig {
  fn default() -> Self {
    let workers = thread::available_parallelism().map_or(1, NonZeroUsize::get);
    Self {
      name: DEFAULT_POOL_NAME.to_string(),
      worker_count: workers,
      queue_capacity: workers,
    }
  }
}

impl PoolConfig {
  pub fn new(worker_count: usize, queue_capacity: usize) -> Self {
    Self {
      name: DEFAULT_POOL_NAME.to_string(),
      worker_count,
      queue_capacity,
    }
  }

  /// Builds a config from signed sizes, rejecting `worker_count <= 0` and
  /// `queue_capacity < 0`.
  pub fn from_signed(worker_count: i64, queue_capacity: i64) -> Result<Self, PoolError> {
    if worker_count <= 0 {
      return Err(PoolError::InvalidWorkerCount(worker_count));
    }
    if queue_capacity < 0 {
      return Err(PoolError::InvalidQueueCapacity(queue_capacity));
    }
    let workers = usize::try_from(worker_count).map_err(|_| PoolError::InvalidWorkerCount(worker_count))?;
    let capacity = usize::try_from(queue_capacity).map_err(|_| PoolError::InvalidQueueCapacity(queue_capacity))?;
    Ok(Self::new(workers, capacity))
  }

  pub fn with_name(mut self, name: impl Into<String>) -> Self {
    self.name = name.into();
    self
  }

  pub fn validate(&self) -> Result<(), PoolError> {
    if self.worker_count == 0 {
      return Err(PoolError::InvalidWorkerCount(0));
    }
    Ok(())
  }

  /// Reads `WORKER_POOL_WORKERS`, `WORKER_POOL_QUEUE_CAPACITY` and
  /// `WORKER_POOL_NAME`, falling back to [`PoolConfig::default`] for unset keys.
  pub fn from_env() -> Result<Self, PoolError> {
    Self::from_env_with_prefix(DEFAULT_ENV_PREFIX)
  }

  pub fn from_env_with_prefix(prefix: &str) -> Result<Self, PoolError> {
    Self::from_lookup(prefix, |key| env::var(key).ok())
  }

  pub(crate) fn from_lookup<F>(prefix: &str, lookup: F) -> Result<Self, PoolError>
  where
    F: Fn(&str) -> Option<String>,
  {
    let defaults = Self::default();

    let workers_key = format!("{prefix}WORKERS");
    let worker_count = match lookup(&workers_key) {
      Some(raw) => parse_signed(&workers_key, &raw)?,
      None => defaults.worker_count as i64,
    };

    let capacity_key = format!("{prefix}QUEUE_CAPACITY");
    let queue_capacity = match lookup(&capacity_key) {
      Some(raw) => parse_signed(&capacity_key, &raw)?,
      // Capacity follows the worker count unless set explicitly.
      None => worker_count.max(0),
    };

    let config = Self::from_signed(worker_count, queue_capacity)?;
    Ok(match lookup(&format!("{prefix}NAME")) {
      Some(name) if !name.trim().is_empty() => config.with_name(name.trim()),
      _ => config.with_name(defaults.name),
    })
  }
}

fn parse_signed(key: &str, raw: &str) -> Result<i64, PoolError> {
  raw.trim().parse::<i64>().map_err(|_| PoolError::InvalidConfig {
    key: key.to_string(),
    value: raw.to_string(),
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashMap;

  fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
    move |key: &str| map.get(key).cloned()
  }

  #[test]
  fn from_signed_rejects_non_positive_workers() {
    assert_eq!(PoolConfig::from_signed(0, 5), Err(PoolError::InvalidWorkerCount(0)));
    assert_eq!(PoolConfig::from_signed(-3, 5), Err(PoolError::InvalidWorkerCount(-3)));
  }

  #[test]
  fn from_signed_rejects_negative_capacity() {
    assert_eq!(PoolConfig::from_signed(2, -1), Err(PoolError::InvalidQueueCapacity(-1)));
  }

  #[test]
  fn from_signed_accepts_zero_capacity() {
    let config = PoolConfig::from_signed(1, 0).unwrap();
    assert_eq!(config.worker_count, 1);
    assert_eq!(config.queue_capacity, 0);
  }

  #[test]
  fn lookup_reads_prefixed_keys() {
    let config = PoolConfig::from_lookup(
      "TEST_",
      lookup_from(&[("TEST_WORKERS", "4"), ("TEST_QUEUE_CAPACITY", " 16 "), ("TEST_NAME", "fetchers")]),
    )
    .unwrap();
    assert_eq!(config, PoolConfig::new(4, 16).with_name("fetchers"));
  }

  #[test]
  fn lookup_capacity_defaults_to_worker_count() {
    let config = PoolConfig::from_lookup("TEST_", lookup_from(&[("TEST_WORKERS", "3")])).unwrap();
    assert_eq!(config.queue_capacity, 3);
    assert_eq!(config.name, DEFAULT_POOL_NAME);
  }

  #[test]
  fn lookup_reports_unparseable_values() {
    let err = PoolConfig::from_lookup("TEST_", lookup_from(&[("TEST_WORKERS", "many")])).unwrap_err();
    assert_eq!(
      err,
      PoolError::InvalidConfig {
        key: "TEST_WORKERS".to_string(),
        value: "many".to_string()
      }
    );
  }

  #[test]
  fn lookup_rejects_negative_values() {
    let err = PoolConfig::from_lookup("TEST_", lookup_from(&[("TEST_WORKERS", "2"), ("TEST_QUEUE_CAPACITY", "-5")]))
      .unwrap_err();
    assert_eq!(err, PoolError::InvalidQueueCapacity(-5));

    let err = PoolConfig::from_lookup("TEST_", lookup_from(&[("TEST_WORKERS", "0")])).unwrap_err();
    assert_eq!(err, PoolError::InvalidWorkerCount(0));
  }

  #[test]
  fn validate_rejects_zero_workers() {
    assert_eq!(PoolConfig::new(0, 1).validate(), Err(PoolError::InvalidWorkerCount(0)));
    assert!(PoolConfig::new(1, 0).validate().is_ok());
  }
}

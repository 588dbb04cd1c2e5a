//! Pool sizing, waiting and eviction settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Which idle instance the next borrow receives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolStrategy {
    /// Most recently returned first (keeps a warm working set).
    #[default]
    Lifo,
    /// Least recently returned first (rotates evenly through instances).
    Fifo,
}

/// Configuration for an [`EngineInstancePool`](super::EngineInstancePool).
///
/// Millisecond fields treat zero or negative values as "disabled" (for
/// eviction timings) or "unbounded" (for `max_wait_millis`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Idle offering order
    pub strategy: PoolStrategy,
    /// Queue newcomers behind callers that are already waiting
    pub fairness: bool,
    /// Idle instances the evictor keeps available
    pub min_idle: usize,
    /// Upper bound on idle instances; extra returns are destroyed
    pub max_idle: usize,
    /// Upper bound on live instances (idle + busy)
    pub max_total: usize,
    /// How long a borrow may wait when exhausted
    pub max_wait_millis: i64,
    /// Wait for an instance instead of failing immediately
    pub block_when_exhausted: bool,
    /// Validate freshly created instances
    pub test_on_create: bool,
    /// Validate idle instances before handing them out
    pub test_on_borrow: bool,
    /// Validate instances when they come back
    pub test_on_return: bool,
    /// Validate idle instances sampled by the evictor
    pub test_while_idle: bool,
    /// Period of the eviction task
    pub time_between_eviction_runs_millis: i64,
    /// Idle instances sampled per eviction run
    pub num_tests_per_eviction_run: usize,
    /// Idle time after which an instance is evicted regardless of `min_idle`
    pub min_evictable_idle_time_millis: i64,
    /// Idle time after which an instance is evicted if `min_idle` still holds
    pub soft_min_evictable_idle_time_millis: i64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            strategy: PoolStrategy::Lifo,
            fairness: false,
            min_idle: 0,
            max_idle: 8,
            max_total: 8,
            max_wait_millis: -1,
            block_when_exhausted: true,
            test_on_create: false,
            test_on_borrow: false,
            test_on_return: false,
            test_while_idle: false,
            time_between_eviction_runs_millis: -1,
            num_tests_per_eviction_run: 3,
            min_evictable_idle_time_millis: 1_800_000,
            soft_min_evictable_idle_time_millis: -1,
        }
    }
}

fn positive_millis(millis: i64) -> Option<Duration> {
    u64::try_from(millis)
        .ok()
        .filter(|m| *m > 0)
        .map(Duration::from_millis)
}

impl PoolConfig {
    /// Validate pool configuration, returning an error if invalid.
    pub fn validate(&self) -> Result<()> {
        if self.max_total == 0 {
            return Err(Error::configuration("max_total must be greater than 0"));
        }
        if self.max_idle > self.max_total {
            return Err(Error::configuration(format!(
                "max_idle ({}) must not exceed max_total ({})",
                self.max_idle, self.max_total
            )));
        }
        if self.min_idle > self.max_idle {
            return Err(Error::configuration(format!(
                "min_idle ({}) must not exceed max_idle ({})",
                self.min_idle, self.max_idle
            )));
        }
        Ok(())
    }

    /// Borrow wait budget, `None` meaning wait forever.
    #[must_use]
    pub fn max_wait(&self) -> Option<Duration> {
        positive_millis(self.max_wait_millis)
    }

    /// Evictor period, `None` when eviction is off.
    #[must_use]
    pub fn eviction_interval(&self) -> Option<Duration> {
        positive_millis(self.time_between_eviction_runs_millis)
    }

    /// Hard idle limit.
    #[must_use]
    pub fn min_evictable_idle(&self) -> Option<Duration> {
        positive_millis(self.min_evictable_idle_time_millis)
    }

    /// Soft idle limit (respects `min_idle`).
    #[must_use]
    pub fn soft_min_evictable_idle(&self) -> Option<Duration> {
        positive_millis(self.soft_min_evictable_idle_time_millis)
    }
}

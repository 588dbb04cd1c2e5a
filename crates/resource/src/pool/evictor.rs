//! Idle-instance eviction and the `min_idle` top-up.

use tokio::time::{Instant, MissedTickBehavior};

use super::{DestroyReason, EngineInstancePool, IdleEntry, PoolStrategy};
use crate::factory::ResourceFactory;

/// What a single eviction run did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvictionReport {
    /// Idle instances examined.
    pub sampled: usize,
    /// Destroyed because they exceeded an idle limit.
    pub evicted: usize,
    /// Destroyed because `test_while_idle` validation failed.
    pub failed_validation: usize,
    /// Instances created to restore `min_idle`.
    pub created: usize,
}

enum Verdict {
    Keep,
    Evict,
    Test,
}

impl<F: ResourceFactory> EngineInstancePool<F> {
    /// Start the periodic eviction task.
    ///
    /// Returns `false` when eviction is disabled in the config or the task is
    /// already running. Must be called from within a tokio runtime.
    pub fn start_evictor(&self) -> bool {
        let Some(period) = self.inner.config.eviction_interval() else {
            return false;
        };
        let mut slot = self.inner.evictor.lock();
        if slot.is_some() || self.inner.cancel.is_cancelled() {
            return false;
        }

        let pool = self.clone();
        let cancel = self.inner.cancel.clone();
        *slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let report = pool.run_eviction().await;
                        if report != EvictionReport::default() {
                            tracing::debug!(
                                pool = pool.id(),
                                sampled = report.sampled,
                                evicted = report.evicted,
                                failed_validation = report.failed_validation,
                                created = report.created,
                                "eviction run finished"
                            );
                        }
                    }
                }
            }
            tracing::debug!(pool = pool.id(), "evictor stopped");
        }));
        tracing::info!(pool = self.id(), period_ms = period.as_millis() as u64, "evictor started");
        true
    }

    /// One full eviction pass followed by the `min_idle` top-up.
    pub async fn run_eviction(&self) -> EvictionReport {
        let mut report = self.evict().await;
        report.created = self.ensure_min_idle().await;
        report
    }

    /// Examine up to `num_tests_per_eviction_run` idle instances, oldest
    /// idle first, and destroy the ones past their idle limits.
    ///
    /// The hard limit (`min_evictable_idle_time_millis`) ignores `min_idle`;
    /// the soft limit only applies while the idle count stays at or above
    /// `min_idle` after the destroy. With `test_while_idle`, surviving
    /// samples are validated and destroyed on failure.
    pub async fn evict(&self) -> EvictionReport {
        let config = &self.inner.config;
        let hard = config.min_evictable_idle();
        let soft = config.soft_min_evictable_idle();
        let now = Instant::now();

        let (victims, to_test, sampled) = {
            let mut state = self.inner.state.lock();
            if state.closed || state.idle.is_empty() {
                return EvictionReport::default();
            }

            let mut order: Vec<usize> = (0..state.idle.len()).collect();
            order.sort_by_key(|&i| state.idle[i].idle_since);
            order.truncate(config.num_tests_per_eviction_run);
            let sampled = order.len();

            let mut idle_count = state.idle.len();
            let mut marked = Vec::with_capacity(sampled);
            for index in order {
                let idle_for = now.saturating_duration_since(state.idle[index].idle_since);
                let past_hard = hard.is_some_and(|limit| idle_for > limit);
                let past_soft = soft.is_some_and(|limit| idle_for > limit) && idle_count > config.min_idle;
                let verdict = if past_hard || past_soft {
                    idle_count -= 1;
                    Verdict::Evict
                } else if config.test_while_idle {
                    Verdict::Test
                } else {
                    Verdict::Keep
                };
                if !matches!(verdict, Verdict::Keep) {
                    marked.push((index, verdict));
                }
            }

            // Remove from the back so earlier indices stay valid.
            marked.sort_by(|a, b| b.0.cmp(&a.0));
            let mut victims = Vec::new();
            let mut to_test = Vec::new();
            for (index, verdict) in marked {
                let Some(entry) = state.idle.remove(index) else {
                    continue;
                };
                match verdict {
                    Verdict::Evict => victims.push(entry),
                    Verdict::Test => to_test.push(entry),
                    Verdict::Keep => {}
                }
            }
            (victims, to_test, sampled)
        };

        let mut report = EvictionReport {
            sampled,
            evicted: victims.len(),
            ..EvictionReport::default()
        };
        for entry in victims {
            self.discard(entry.instance, entry.slot, DestroyReason::Evicted).await;
        }
        for entry in to_test {
            if self.inner.factory.validate(&entry.instance).await {
                self.put_back(entry).await;
            } else {
                report.failed_validation += 1;
                self.discard(entry.instance, entry.slot, DestroyReason::FailedValidation)
                    .await;
            }
        }
        report
    }

    /// Return a sampled entry to the least-preferred end of the idle queue,
    /// keeping its original idle timestamp.
    async fn put_back(&self, entry: IdleEntry<F::Instance>) {
        let rejected = {
            let mut state = self.inner.state.lock();
            if state.closed || entry.slot.generation != state.generation {
                Some(entry)
            } else {
                state.idle.push_back(entry);
                None
            }
        };
        match rejected {
            Some(entry) => {
                self.discard(entry.instance, entry.slot, DestroyReason::Stale).await;
            }
            None => self.inner.available.notify_one(),
        }
    }

    /// Create idle instances until `min_idle` is met, never exceeding
    /// `max_total`. Creation failures are logged and end the top-up.
    pub async fn ensure_min_idle(&self) -> usize {
        let config = &self.inner.config;
        let mut created = 0;
        loop {
            let generation = {
                let mut state = self.inner.state.lock();
                if state.closed
                    || state.idle.len() >= config.min_idle
                    || state.total >= config.max_total
                {
                    break;
                }
                state.total += 1;
                state.generation
            };

            let instance = match self.inner.factory.create().await {
                Ok(instance) => instance,
                Err(e) => {
                    tracing::warn!(pool = self.id(), error = %e, "failed to pre-create idle instance");
                    self.release_slot(false);
                    break;
                }
            };
            let slot = super::Slot {
                serial: self
                    .inner
                    .next_serial
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed),
                generation,
                created_at: Instant::now(),
            };
            let entry = IdleEntry {
                instance,
                slot,
                idle_since: Instant::now(),
            };
            let rejected = {
                let mut state = self.inner.state.lock();
                state.created += 1;
                if state.closed || generation != state.generation {
                    Some(entry)
                } else {
                    match config.strategy {
                        PoolStrategy::Lifo => state.idle.push_front(entry),
                        PoolStrategy::Fifo => state.idle.push_back(entry),
                    }
                    None
                }
            };
            match rejected {
                Some(entry) => {
                    self.discard(entry.instance, entry.slot, DestroyReason::Stale).await;
                    break;
                }
                None => {
                    created += 1;
                    self.inner.available.notify_one();
                }
            }
        }
        created
    }
}

//! Bounded pool of expensive runtime instances.
//!
//! `EngineInstancePool<F>` calls `F::create`, `F::validate` and `F::destroy`
//! directly. Borrowed instances come back through the [`PooledInstance`]
//! guard, either on drop or through [`PooledInstance::release`].
//!
//! Invalidation is generation based: [`EngineInstancePool::clear`] bumps the
//! pool generation and destroys everything idle. Instances still out on
//! loan keep working and are destroyed when they come back.

pub mod config;
mod evictor;

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::factory::ResourceFactory;

pub use config::{PoolConfig, PoolStrategy};
pub use evictor::EvictionReport;

/// Bookkeeping that travels with an instance for its whole life.
#[derive(Debug, Clone, Copy)]
struct Slot {
    serial: u64,
    generation: u64,
    created_at: Instant,
}

/// An instance sitting in the idle queue.
struct IdleEntry<T> {
    instance: T,
    slot: Slot,
    idle_since: Instant,
}

/// Why an instance was destroyed; used for logging only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DestroyReason {
    FailedValidation,
    Stale,
    Surplus,
    Cleared,
    Evicted,
    Closed,
    Invalidated,
}

impl DestroyReason {
    fn as_str(self) -> &'static str {
        match self {
            Self::FailedValidation => "failed_validation",
            Self::Stale => "stale_generation",
            Self::Surplus => "max_idle_reached",
            Self::Cleared => "cleared",
            Self::Evicted => "evicted",
            Self::Closed => "closed",
            Self::Invalidated => "invalidated",
        }
    }
}

/// Pool statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Instances ever created.
    pub created: u64,
    /// Instances ever destroyed.
    pub destroyed: u64,
    /// Successful borrows.
    pub borrowed: u64,
    /// Returns (including ones that ended in destruction).
    pub returned: u64,
    /// Instances currently out on loan.
    pub active: usize,
    /// Instances currently idle.
    pub idle: usize,
    /// Live instances: idle, busy, being created or being destroyed.
    pub total: usize,
    /// Callers currently waiting for an instance.
    pub waiters: usize,
    /// Current generation (bumped by `clear`).
    pub generation: u64,
}

struct State<T> {
    idle: VecDeque<IdleEntry<T>>,
    /// Counts every live instance, including reservations for in-flight creates.
    total: usize,
    active: usize,
    waiters: usize,
    generation: u64,
    closed: bool,
    created: u64,
    destroyed: u64,
    borrowed: u64,
    returned: u64,
}

impl<T> State<T> {
    fn new(capacity: usize) -> Self {
        Self {
            idle: VecDeque::with_capacity(capacity),
            total: 0,
            active: 0,
            waiters: 0,
            generation: 0,
            closed: false,
            created: 0,
            destroyed: 0,
            borrowed: 0,
            returned: 0,
        }
    }

    fn has_capacity(&self, max_total: usize) -> bool {
        !self.idle.is_empty() || self.total < max_total
    }
}

struct Inner<F: ResourceFactory> {
    factory: F,
    config: PoolConfig,
    state: Mutex<State<F::Instance>>,
    /// Signalled whenever an instance or a creation slot frees up.
    available: Notify,
    next_serial: AtomicU64,
    cancel: CancellationToken,
    evictor: Mutex<Option<JoinHandle<()>>>,
}

/// Generic bounded instance pool.
pub struct EngineInstancePool<F: ResourceFactory> {
    inner: Arc<Inner<F>>,
}

impl<F: ResourceFactory> Clone for EngineInstancePool<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F: ResourceFactory> std::fmt::Debug for EngineInstancePool<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineInstancePool")
            .field("factory", &self.inner.factory.id())
            .field("stats", &self.stats())
            .finish()
    }
}

/// Outcome of the reservation step at the top of each borrow attempt.
enum Step<T> {
    Reuse(IdleEntry<T>),
    Create(u64),
    Wait,
}

/// Holds one unit of `total` until defused; releases it on drop so a
/// cancelled borrow cannot leak capacity.
struct Reservation<'a, F: ResourceFactory> {
    pool: &'a EngineInstancePool<F>,
    armed: bool,
}

impl<F: ResourceFactory> Reservation<'_, F> {
    fn defuse(mut self) {
        self.armed = false;
    }
}

impl<F: ResourceFactory> Drop for Reservation<'_, F> {
    fn drop(&mut self) {
        if self.armed {
            self.pool.release_slot(false);
        }
    }
}

/// Counts the caller in `waiters` for as long as it is parked.
struct Waiting<'a, F: ResourceFactory> {
    pool: &'a EngineInstancePool<F>,
}

impl<F: ResourceFactory> Drop for Waiting<'_, F> {
    fn drop(&mut self) {
        let mut state = self.pool.inner.state.lock();
        state.waiters = state.waiters.saturating_sub(1);
    }
}

impl<F: ResourceFactory> EngineInstancePool<F> {
    /// Create a pool bound to `factory`. No instances are built up front.
    ///
    /// # Errors
    /// Returns a configuration error if `config` is invalid.
    pub fn new(factory: F, config: PoolConfig) -> Result<Self> {
        config.validate()?;
        let capacity = config.max_idle;
        Ok(Self {
            inner: Arc::new(Inner {
                factory,
                config,
                state: Mutex::new(State::new(capacity)),
                available: Notify::new(),
                next_serial: AtomicU64::new(1),
                cancel: CancellationToken::new(),
                evictor: Mutex::new(None),
            }),
        })
    }

    /// Identifier of the underlying factory.
    pub fn id(&self) -> &str {
        self.inner.factory.id()
    }

    /// The pool configuration.
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// The factory the pool was built with.
    pub fn factory(&self) -> &F {
        &self.inner.factory
    }

    /// Current generation; instances from older generations are never reused.
    pub fn generation(&self) -> u64 {
        self.inner.state.lock().generation
    }

    /// Get current pool statistics.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let state = self.inner.state.lock();
        PoolStats {
            created: state.created,
            destroyed: state.destroyed,
            borrowed: state.borrowed,
            returned: state.returned,
            active: state.active,
            idle: state.idle.len(),
            total: state.total,
            waiters: state.waiters,
            generation: state.generation,
        }
    }

    /// Borrow an instance, reusing an idle one when possible.
    ///
    /// # Errors
    /// - [`Error::PoolExhausted`] when `max_total` instances are busy and the
    ///   wait budget (or `block_when_exhausted = false`) rules out waiting
    /// - [`Error::PoolCreate`] when the factory fails to build an instance
    /// - [`Error::PoolClosed`] after [`close`](Self::close)
    pub async fn borrow(&self) -> Result<PooledInstance<F>> {
        let inner = &self.inner;
        let config = &inner.config;
        let started = Instant::now();
        let deadline = config.max_wait().map(|wait| started + wait);
        let mut has_waited = false;

        loop {
            let notified = inner.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let (step, pass_on) = {
                let mut state = inner.state.lock();
                if state.closed {
                    return Err(Error::PoolClosed {
                        pool_id: self.id().to_string(),
                    });
                }
                let queue_behind = config.fairness && !has_waited && state.waiters > 0;
                let step = if queue_behind {
                    Step::Wait
                } else if let Some(entry) = state.idle.pop_front() {
                    Step::Reuse(entry)
                } else if state.total < config.max_total {
                    state.total += 1;
                    Step::Create(state.generation)
                } else {
                    Step::Wait
                };
                let pass_on = !matches!(step, Step::Wait)
                    && state.waiters > 0
                    && state.has_capacity(config.max_total);
                if matches!(step, Step::Wait) && config.block_when_exhausted {
                    state.waiters += 1;
                }
                (step, pass_on)
            };
            if pass_on {
                inner.available.notify_one();
            }

            match step {
                Step::Reuse(entry) => {
                    let reservation = Reservation {
                        pool: self,
                        armed: true,
                    };
                    if config.test_on_borrow && !inner.factory.validate(&entry.instance).await {
                        tracing::debug!(
                            pool = self.id(),
                            serial = entry.slot.serial,
                            "idle instance failed validation on borrow"
                        );
                        reservation.defuse();
                        self.discard(entry.instance, entry.slot, DestroyReason::FailedValidation)
                            .await;
                        continue;
                    }
                    reservation.defuse();
                    return Ok(self.checkout(entry.instance, entry.slot));
                }
                Step::Create(generation) => {
                    let reservation = Reservation {
                        pool: self,
                        armed: true,
                    };
                    let instance = match inner.factory.create().await {
                        Ok(instance) => instance,
                        Err(source) => {
                            tracing::warn!(pool = self.id(), error = %source, "instance creation failed");
                            drop(reservation);
                            return Err(Error::pool_create(self.id(), source));
                        }
                    };
                    let slot = Slot {
                        serial: inner.next_serial.fetch_add(1, Ordering::Relaxed),
                        generation,
                        created_at: Instant::now(),
                    };
                    inner.state.lock().created += 1;
                    tracing::debug!(pool = self.id(), serial = slot.serial, generation, "created instance");

                    if config.test_on_create && !inner.factory.validate(&instance).await {
                        reservation.defuse();
                        self.discard(instance, slot, DestroyReason::FailedValidation).await;
                        return Err(Error::PoolCreate {
                            pool_id: self.id().to_string(),
                            reason: "new instance failed validation".to_string(),
                            source: None,
                        });
                    }
                    reservation.defuse();
                    return Ok(self.checkout(instance, slot));
                }
                Step::Wait => {
                    if !config.block_when_exhausted {
                        return Err(self.exhausted(started));
                    }
                    let waiting = Waiting { pool: self };
                    let woken = match deadline {
                        Some(deadline) => tokio::time::timeout_at(deadline, notified).await.is_ok(),
                        None => {
                            notified.await;
                            true
                        }
                    };
                    drop(waiting);
                    let pass_on = {
                        let state = inner.state.lock();
                        !woken && state.waiters > 0 && state.has_capacity(config.max_total)
                    };
                    if pass_on {
                        inner.available.notify_one();
                    }
                    if !woken {
                        return Err(self.exhausted(started));
                    }
                    has_waited = true;
                }
            }
        }
    }

    /// Destroy every idle instance and retire every busy one.
    ///
    /// Busy instances finish their current work and are destroyed when they
    /// come back. Borrows that start after this returns get fresh instances.
    pub async fn clear(&self) {
        let (drained, generation, busy) = {
            let mut state = self.inner.state.lock();
            state.generation += 1;
            let drained: Vec<_> = state.idle.drain(..).collect();
            (drained, state.generation, state.active)
        };
        tracing::info!(
            pool = self.id(),
            generation,
            idle_destroyed = drained.len(),
            busy_retired = busy,
            "pool cleared"
        );
        for entry in drained {
            self.discard(entry.instance, entry.slot, DestroyReason::Cleared).await;
        }
    }

    /// Stop the evictor, destroy idle instances and reject further borrows.
    ///
    /// Instances still on loan are destroyed when returned. Calling this
    /// more than once is harmless.
    pub async fn close(&self) {
        self.inner.cancel.cancel();
        let evictor = self.inner.evictor.lock().take();
        let drained: Vec<_> = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.idle.drain(..).collect()
        };
        self.inner.available.notify_waiters();
        if let Some(handle) = evictor
            && let Err(e) = handle.await
            && e.is_panic()
        {
            tracing::warn!(pool = self.id(), "evictor task panicked");
        }
        for entry in drained {
            self.discard(entry.instance, entry.slot, DestroyReason::Closed).await;
        }
        tracing::info!(pool = self.id(), "pool closed");
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    fn exhausted(&self, started: Instant) -> Error {
        let active = self.inner.state.lock().active;
        Error::PoolExhausted {
            pool_id: self.id().to_string(),
            active,
            max_total: self.inner.config.max_total,
            waited_ms: started.elapsed().as_millis() as u64,
        }
    }

    fn checkout(&self, instance: F::Instance, slot: Slot) -> PooledInstance<F> {
        {
            let mut state = self.inner.state.lock();
            state.borrowed += 1;
            state.active += 1;
        }
        PooledInstance {
            instance: Some(instance),
            slot,
            pool: self.clone(),
        }
    }

    /// Give up one unit of capacity and wake a waiter.
    fn release_slot(&self, destroyed: bool) {
        {
            let mut state = self.inner.state.lock();
            state.total = state.total.saturating_sub(1);
            if destroyed {
                state.destroyed += 1;
            }
        }
        self.inner.available.notify_one();
    }

    /// Destroy an instance through the factory and free its capacity.
    async fn discard(&self, instance: F::Instance, slot: Slot, reason: DestroyReason) {
        if let Err(e) = self.inner.factory.destroy(instance).await {
            tracing::warn!(
                pool = self.id(),
                serial = slot.serial,
                reason = reason.as_str(),
                error = %e,
                "failed to destroy instance"
            );
        } else {
            tracing::debug!(
                pool = self.id(),
                serial = slot.serial,
                reason = reason.as_str(),
                "destroyed instance"
            );
        }
        self.release_slot(true);
    }

    /// Synchronous part of a return. Hands back the instance when it still
    /// needs async work (validation or destruction).
    fn restore_now(&self, instance: F::Instance, slot: Slot) -> Restore<F::Instance> {
        let config = &self.inner.config;
        let mut state = self.inner.state.lock();
        state.active = state.active.saturating_sub(1);
        state.returned += 1;
        if state.closed {
            return Restore::Destroy(instance, DestroyReason::Closed);
        }
        if slot.generation != state.generation {
            return Restore::Destroy(instance, DestroyReason::Stale);
        }
        if config.test_on_return {
            return Restore::Validate(instance);
        }
        Self::admit_idle(&mut state, config, instance, slot)
    }

    fn admit_idle(
        state: &mut State<F::Instance>,
        config: &PoolConfig,
        instance: F::Instance,
        slot: Slot,
    ) -> Restore<F::Instance> {
        if state.closed {
            return Restore::Destroy(instance, DestroyReason::Closed);
        }
        if slot.generation != state.generation {
            return Restore::Destroy(instance, DestroyReason::Stale);
        }
        if state.idle.len() >= config.max_idle {
            return Restore::Destroy(instance, DestroyReason::Surplus);
        }
        let entry = IdleEntry {
            instance,
            slot,
            idle_since: Instant::now(),
        };
        match config.strategy {
            PoolStrategy::Lifo => state.idle.push_front(entry),
            PoolStrategy::Fifo => state.idle.push_back(entry),
        }
        Restore::Idle
    }

    /// Full async return path.
    async fn restore(&self, instance: F::Instance, slot: Slot) {
        match self.restore_now(instance, slot) {
            Restore::Idle => self.inner.available.notify_one(),
            Restore::Destroy(instance, reason) => self.discard(instance, slot, reason).await,
            Restore::Validate(instance) => self.finish_validated_return(instance, slot).await,
        }
    }

    async fn finish_validated_return(&self, instance: F::Instance, slot: Slot) {
        if !self.inner.factory.validate(&instance).await {
            self.discard(instance, slot, DestroyReason::FailedValidation).await;
            return;
        }
        let outcome = {
            let mut state = self.inner.state.lock();
            Self::admit_idle(&mut state, &self.inner.config, instance, slot)
        };
        match outcome {
            Restore::Idle => self.inner.available.notify_one(),
            Restore::Destroy(instance, reason) => self.discard(instance, slot, reason).await,
            Restore::Validate(instance) => {
                self.discard(instance, slot, DestroyReason::FailedValidation).await;
            }
        }
    }
}

/// What the synchronous return step decided.
enum Restore<T> {
    Idle,
    Validate(T),
    Destroy(T, DestroyReason),
}

/// A borrowed instance.
///
/// Dropping the guard returns the instance to its pool. Returns that need
/// async work (validation or destruction) run on the current tokio runtime;
/// use [`release`](Self::release) to await them instead.
pub struct PooledInstance<F: ResourceFactory> {
    instance: Option<F::Instance>,
    slot: Slot,
    pool: EngineInstancePool<F>,
}

impl<F: ResourceFactory> PooledInstance<F> {
    /// Process-unique serial of this instance within its pool.
    pub fn serial(&self) -> u64 {
        self.slot.serial
    }

    /// Pool generation the instance was created in.
    pub fn generation(&self) -> u64 {
        self.slot.generation
    }

    /// When the instance was created.
    pub fn created_at(&self) -> Instant {
        self.slot.created_at
    }

    /// Whether the pool was cleared after this instance was created.
    pub fn is_stale(&self) -> bool {
        self.slot.generation != self.pool.generation()
    }

    /// Return the instance and wait for any validation or destruction.
    pub async fn release(mut self) {
        if let Some(instance) = self.instance.take() {
            self.pool.restore(instance, self.slot).await;
        }
    }

    /// Destroy the instance instead of returning it.
    pub async fn invalidate(mut self) {
        if let Some(instance) = self.instance.take() {
            {
                let mut state = self.pool.inner.state.lock();
                state.active = state.active.saturating_sub(1);
                state.returned += 1;
            }
            self.pool
                .discard(instance, self.slot, DestroyReason::Invalidated)
                .await;
        }
    }
}

impl<F: ResourceFactory> std::ops::Deref for PooledInstance<F> {
    type Target = F::Instance;

    fn deref(&self) -> &F::Instance {
        self.instance
            .as_ref()
            .expect("pooled instance used after release")
    }
}

impl<F: ResourceFactory> std::ops::DerefMut for PooledInstance<F> {
    fn deref_mut(&mut self) -> &mut F::Instance {
        self.instance
            .as_mut()
            .expect("pooled instance used after release")
    }
}

impl<F: ResourceFactory> Drop for PooledInstance<F> {
    fn drop(&mut self) {
        let Some(instance) = self.instance.take() else {
            return;
        };
        let pending = match self.pool.restore_now(instance, self.slot) {
            Restore::Idle => {
                self.pool.inner.available.notify_one();
                return;
            }
            other => other,
        };
        let pool = self.pool.clone();
        let slot = self.slot;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                drop(handle.spawn(async move {
                    match pending {
                        Restore::Validate(instance) => {
                            pool.finish_validated_return(instance, slot).await;
                        }
                        Restore::Destroy(instance, reason) => {
                            pool.discard(instance, slot, reason).await;
                        }
                        Restore::Idle => {}
                    }
                }));
            }
            Err(_) => {
                // No runtime to run the factory on; drop the instance in place.
                tracing::warn!(
                    pool = pool.id(),
                    serial = slot.serial,
                    "returned outside a tokio runtime, dropping instance without destroy"
                );
                drop(pending);
                pool.release_slot(true);
            }
        }
    }
}

impl<F: ResourceFactory> std::fmt::Debug for PooledInstance<F>
where
    F::Instance: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledInstance")
            .field("serial", &self.slot.serial)
            .field("generation", &self.slot.generation)
            .field("instance", &self.instance)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BoxError;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    #[derive(Default)]
    struct CountingFactory {
        next: AtomicU64,
        destroyed: AtomicU64,
        fail_create: AtomicBool,
        reject: AtomicBool,
    }

    impl ResourceFactory for CountingFactory {
        type Instance = u64;

        fn id(&self) -> &str {
            "counting"
        }

        async fn create(&self) -> std::result::Result<u64, BoxError> {
            if self.fail_create.load(Ordering::SeqCst) {
                return Err("bootstrap failed".into());
            }
            Ok(self.next.fetch_add(1, Ordering::SeqCst))
        }

        async fn validate(&self, _instance: &u64) -> bool {
            !self.reject.load(Ordering::SeqCst)
        }

        async fn destroy(&self, _instance: u64) -> std::result::Result<(), BoxError> {
            self.destroyed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn pool(config: PoolConfig) -> EngineInstancePool<CountingFactory> {
        EngineInstancePool::new(CountingFactory::default(), config).unwrap()
    }

    #[tokio::test]
    async fn borrow_creates_lazily() {
        let pool = pool(PoolConfig::default());
        assert_eq!(pool.stats().total, 0);

        let first = pool.borrow().await.unwrap();
        assert_eq!(*first, 0);
        let stats = pool.stats();
        assert_eq!(stats.created, 1);
        assert_eq!(stats.active, 1);
        assert_eq!(stats.idle, 0);
    }

    #[tokio::test]
    async fn dropped_instance_is_reused() {
        let pool = pool(PoolConfig::default());
        let serial = {
            let guard = pool.borrow().await.unwrap();
            guard.serial()
        };
        assert_eq!(pool.stats().idle, 1);

        let again = pool.borrow().await.unwrap();
        assert_eq!(again.serial(), serial);
        assert_eq!(pool.stats().created, 1);
    }

    #[tokio::test]
    async fn lifo_offers_most_recent_return() {
        let pool = pool(PoolConfig::default());
        let a = pool.borrow().await.unwrap();
        let b = pool.borrow().await.unwrap();
        let (sa, sb) = (a.serial(), b.serial());
        a.release().await;
        b.release().await;

        assert_eq!(pool.borrow().await.unwrap().serial(), sb);
        assert_ne!(sa, sb);
    }

    #[tokio::test]
    async fn fifo_offers_oldest_return() {
        let pool = pool(PoolConfig {
            strategy: PoolStrategy::Fifo,
            ..Default::default()
        });
        let a = pool.borrow().await.unwrap();
        let b = pool.borrow().await.unwrap();
        let sa = a.serial();
        a.release().await;
        b.release().await;

        assert_eq!(pool.borrow().await.unwrap().serial(), sa);
    }

    #[tokio::test]
    async fn returns_beyond_max_idle_are_destroyed() {
        let pool = pool(PoolConfig {
            max_total: 4,
            max_idle: 1,
            ..Default::default()
        });
        let a = pool.borrow().await.unwrap();
        let b = pool.borrow().await.unwrap();
        a.release().await;
        b.release().await;

        let stats = pool.stats();
        assert_eq!(stats.idle, 1);
        assert_eq!(stats.destroyed, 1);
        assert_eq!(stats.total, 1);
    }

    #[tokio::test]
    async fn failed_borrow_validation_destroys_and_retries() {
        let pool = pool(PoolConfig {
            test_on_borrow: true,
            ..Default::default()
        });
        pool.borrow().await.unwrap().release().await;
        pool.factory().reject.store(true, Ordering::SeqCst);

        // The idle instance is rejected; a fresh one is created instead.
        let guard = pool.borrow().await.unwrap();
        assert_eq!(*guard, 1);
        assert_eq!(pool.factory().destroyed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_return_validation_destroys() {
        let pool = pool(PoolConfig {
            test_on_return: true,
            ..Default::default()
        });
        let guard = pool.borrow().await.unwrap();
        pool.factory().reject.store(true, Ordering::SeqCst);
        guard.release().await;

        let stats = pool.stats();
        assert_eq!(stats.idle, 0);
        assert_eq!(stats.destroyed, 1);
        assert_eq!(stats.total, 0);
    }

    #[tokio::test]
    async fn create_failure_surfaces_and_frees_capacity() {
        let pool = pool(PoolConfig {
            max_total: 1,
            max_idle: 1,
            ..Default::default()
        });
        pool.factory().fail_create.store(true, Ordering::SeqCst);
        let err = pool.borrow().await.unwrap_err();
        assert!(matches!(err, Error::PoolCreate { .. }), "got {err:?}");
        assert_eq!(pool.stats().total, 0);

        pool.factory().fail_create.store(false, Ordering::SeqCst);
        assert!(pool.borrow().await.is_ok());
    }

    #[tokio::test]
    async fn create_validation_failure_is_a_create_error() {
        let pool = pool(PoolConfig {
            test_on_create: true,
            ..Default::default()
        });
        pool.factory().reject.store(true, Ordering::SeqCst);
        let err = pool.borrow().await.unwrap_err();
        assert!(matches!(err, Error::PoolCreate { source: None, .. }));
        assert_eq!(pool.stats().total, 0);
    }

    #[tokio::test]
    async fn waiter_gets_returned_instance() {
        let pool = pool(PoolConfig {
            max_total: 1,
            max_idle: 1,
            max_wait_millis: 1_000,
            ..Default::default()
        });
        let held = pool.borrow().await.unwrap();
        let serial = held.serial();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.borrow().await.map(|g| g.serial()) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(pool.stats().waiters, 1);
        drop(held);

        assert_eq!(waiter.await.unwrap().unwrap(), serial);
        assert_eq!(pool.stats().waiters, 0);
    }

    #[tokio::test]
    async fn invalidate_destroys_instead_of_returning() {
        let pool = pool(PoolConfig::default());
        let guard = pool.borrow().await.unwrap();
        guard.invalidate().await;
        let stats = pool.stats();
        assert_eq!(stats.idle, 0);
        assert_eq!(stats.active, 0);
        assert_eq!(stats.destroyed, 1);
    }

    #[tokio::test]
    async fn close_rejects_new_borrows_and_destroys_late_returns() {
        let pool = pool(PoolConfig::default());
        let held = pool.borrow().await.unwrap();
        pool.borrow().await.unwrap().release().await;

        pool.close().await;
        assert!(pool.is_closed());
        assert_eq!(pool.stats().idle, 0);
        assert!(matches!(pool.borrow().await, Err(Error::PoolClosed { .. })));

        held.release().await;
        assert_eq!(pool.factory().destroyed.load(Ordering::SeqCst), 2);
        assert_eq!(pool.stats().total, 0);

        // Second close is a no-op.
        pool.close().await;
    }
}

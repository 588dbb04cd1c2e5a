//! Pool exhaustion, waiting and recovery

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use hinny_resource::{BoxError, EngineInstancePool, Error, PoolConfig, ResourceFactory};
use tokio::time::Instant;

/// Hands out numbered script contexts.
#[derive(Default)]
struct ContextFactory {
    created: AtomicUsize,
}

impl ResourceFactory for ContextFactory {
    type Instance = String;

    fn id(&self) -> &str {
        "script-context"
    }

    async fn create(&self) -> Result<String, BoxError> {
        let n = self.created.fetch_add(1, Ordering::SeqCst);
        Ok(format!("context-{n}"))
    }
}

fn sized_config() -> PoolConfig {
    PoolConfig {
        max_total: 10,
        max_idle: 5,
        min_idle: 1,
        block_when_exhausted: true,
        max_wait_millis: 100,
        ..Default::default()
    }
}

#[tokio::test(start_paused = true)]
async fn eleventh_borrow_times_out_after_max_wait() {
    let pool = EngineInstancePool::new(ContextFactory::default(), sized_config()).unwrap();

    let mut held = Vec::new();
    for _ in 0..10 {
        held.push(pool.borrow().await.expect("borrow within max_total should succeed"));
    }

    let started = Instant::now();
    let err = pool.borrow().await.unwrap_err();
    let waited = started.elapsed();

    assert!(
        matches!(err, Error::PoolExhausted { active: 10, max_total: 10, .. }),
        "expected PoolExhausted, got: {err:?}"
    );
    assert!(err.is_retryable());
    assert!(waited >= Duration::from_millis(100), "waited {waited:?}");
    assert!(waited < Duration::from_millis(150), "waited {waited:?}");
    assert_eq!(pool.stats().waiters, 0);
}

#[tokio::test(start_paused = true)]
async fn non_blocking_pool_fails_immediately() {
    let pool = EngineInstancePool::new(
        ContextFactory::default(),
        PoolConfig {
            max_total: 2,
            max_idle: 2,
            block_when_exhausted: false,
            max_wait_millis: 5_000,
            ..Default::default()
        },
    )
    .unwrap();

    let _a = pool.borrow().await.unwrap();
    let _b = pool.borrow().await.unwrap();

    let started = Instant::now();
    let err = pool.borrow().await.unwrap_err();
    assert!(matches!(err, Error::PoolExhausted { waited_ms: 0, .. }), "got: {err:?}");
    assert_eq!(started.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn waiting_borrow_succeeds_when_an_instance_returns() {
    let pool = EngineInstancePool::new(ContextFactory::default(), sized_config()).unwrap();
    let mut held = Vec::new();
    for _ in 0..10 {
        held.push(pool.borrow().await.unwrap());
    }

    let returner = {
        let first = held.pop().unwrap();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(40)).await;
            first.release().await;
        })
    };

    let guard = pool.borrow().await.expect("should get the returned instance");
    assert_eq!(pool.stats().created, 10);
    drop(guard);
    returner.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_borrowers_never_exceed_max_total() {
    let pool = EngineInstancePool::new(
        ContextFactory::default(),
        PoolConfig {
            max_total: 4,
            max_idle: 4,
            ..Default::default()
        },
    )
    .unwrap();
    let peak = Arc::new(AtomicUsize::new(0));

    let tasks: Vec<_> = (0..50)
        .map(|_| {
            let pool = pool.clone();
            let peak = peak.clone();
            tokio::spawn(async move {
                let guard = pool.borrow().await.unwrap();
                peak.fetch_max(pool.stats().active, Ordering::SeqCst);
                tokio::task::yield_now().await;
                guard.release().await;
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    let stats = pool.stats();
    assert!(peak.load(Ordering::SeqCst) <= 4);
    assert!(stats.created <= 4);
    assert_eq!(stats.borrowed, 50);
    assert_eq!(stats.active, 0);
    assert_eq!(stats.waiters, 0);
}

#[tokio::test(start_paused = true)]
async fn cancelled_waiter_does_not_leak() {
    let pool = EngineInstancePool::new(
        ContextFactory::default(),
        PoolConfig {
            max_total: 1,
            max_idle: 1,
            ..Default::default()
        },
    )
    .unwrap();
    let held = pool.borrow().await.unwrap();

    let attempt = tokio::time::timeout(Duration::from_millis(50), pool.borrow()).await;
    assert!(attempt.is_err(), "borrow should still be waiting");
    assert_eq!(pool.stats().waiters, 0);

    held.release().await;
    assert!(pool.borrow().await.is_ok());
}

fn single_slot(fairness: bool) -> PoolConfig {
    PoolConfig {
        max_total: 1,
        max_idle: 1,
        fairness,
        max_wait_millis: 2_000,
        ..Default::default()
    }
}

async fn until_waiters(pool: &EngineInstancePool<ContextFactory>, count: usize) {
    while pool.stats().waiters < count {
        tokio::task::yield_now().await;
    }
}

#[tokio::test(start_paused = true)]
async fn fair_pool_serves_the_earlier_waiter_first() {
    let pool = EngineInstancePool::new(ContextFactory::default(), single_slot(true)).unwrap();
    let a = pool.borrow().await.unwrap();
    let serial = a.serial();

    let b = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.borrow().await })
    };
    until_waiters(&pool, 1).await;

    // A newcomer arriving right after the return queues behind B.
    a.release().await;
    let c = tokio::time::timeout(Duration::from_millis(50), pool.borrow()).await;
    assert!(c.is_err(), "newcomer must not overtake the waiter");

    let b = b.await.unwrap().unwrap();
    assert_eq!(b.serial(), serial);
    assert_eq!(pool.stats().waiters, 0);
    assert_eq!(pool.stats().created, 1);
    b.release().await;
}

#[tokio::test(start_paused = true)]
async fn unfair_pool_lets_a_newcomer_overtake() {
    let pool = EngineInstancePool::new(ContextFactory::default(), single_slot(false)).unwrap();
    let a = pool.borrow().await.unwrap();
    let serial = a.serial();

    let b = {
        let pool = pool.clone();
        tokio::spawn(async move {
            let instance = pool.borrow().await?;
            let serial = instance.serial();
            instance.release().await;
            Ok::<_, Error>(serial)
        })
    };
    until_waiters(&pool, 1).await;

    a.release().await;
    let c = tokio::time::timeout(Duration::from_millis(50), pool.borrow())
        .await
        .expect("newcomer takes the idle instance")
        .unwrap();
    assert_eq!(c.serial(), serial);
    assert!(!b.is_finished());

    c.release().await;
    assert_eq!(b.await.unwrap().unwrap(), serial);
    assert_eq!(pool.stats().created, 1);
}

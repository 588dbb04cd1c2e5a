//! Generation-based invalidation through `clear`

use std::sync::atomic::{AtomicU64, Ordering};

use hinny_resource::{BoxError, EngineInstancePool, PoolConfig, ResourceFactory};

/// An instance that remembers the script revision it was built from.
#[derive(Debug)]
struct Compiled {
    revision: u64,
}

#[derive(Default)]
struct CompilingFactory {
    revision: AtomicU64,
    destroyed: AtomicU64,
}

impl ResourceFactory for CompilingFactory {
    type Instance = Compiled;

    fn id(&self) -> &str {
        "compiler"
    }

    async fn create(&self) -> Result<Compiled, BoxError> {
        Ok(Compiled {
            revision: self.revision.load(Ordering::SeqCst),
        })
    }

    async fn destroy(&self, _instance: Compiled) -> Result<(), BoxError> {
        self.destroyed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn borrows_after_clear_are_fresh() {
    let pool = EngineInstancePool::new(CompilingFactory::default(), PoolConfig::default()).unwrap();

    let in_flight = pool.borrow().await.unwrap();
    let idle = pool.borrow().await.unwrap();
    let old_serials = [in_flight.serial(), idle.serial()];
    idle.release().await;
    assert_eq!(pool.stats().idle, 1);

    // A script changed on disk.
    pool.factory().revision.store(1, Ordering::SeqCst);
    pool.clear().await;

    let stats = pool.stats();
    assert_eq!(stats.generation, 1);
    assert_eq!(stats.idle, 0);
    assert_eq!(pool.factory().destroyed.load(Ordering::SeqCst), 1);

    // The in-flight instance keeps working until returned.
    assert_eq!(in_flight.revision, 0);
    assert!(in_flight.is_stale());

    for _ in 0..3 {
        let fresh = pool.borrow().await.unwrap();
        assert!(!old_serials.contains(&fresh.serial()));
        assert_eq!(fresh.revision, 1);
        assert_eq!(fresh.generation(), 1);
        fresh.release().await;
    }

    in_flight.release().await;
    assert_eq!(pool.factory().destroyed.load(Ordering::SeqCst), 2);
    assert_eq!(pool.stats().idle, 1);
}

#[tokio::test]
async fn stale_instance_dropped_in_place_is_destroyed() {
    let pool = EngineInstancePool::new(CompilingFactory::default(), PoolConfig::default()).unwrap();
    let guard = pool.borrow().await.unwrap();
    pool.clear().await;
    drop(guard);

    // The destroy runs on a spawned task.
    for _ in 0..10 {
        if pool.factory().destroyed.load(Ordering::SeqCst) == 1 {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert_eq!(pool.factory().destroyed.load(Ordering::SeqCst), 1);
    assert_eq!(pool.stats().total, 0);
}

#[tokio::test]
async fn repeated_clears_keep_bumping_generation() {
    let pool = EngineInstancePool::new(CompilingFactory::default(), PoolConfig::default()).unwrap();
    pool.clear().await;
    pool.clear().await;
    assert_eq!(pool.generation(), 2);
    assert_eq!(pool.borrow().await.unwrap().generation(), 2);
}

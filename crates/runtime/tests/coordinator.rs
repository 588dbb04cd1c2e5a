//! Startup ordering, teardown and the watcher-driven pool invalidation.

use std::fs;
use std::path::Path;
use std::time::Duration;

use futures::FutureExt;
use hinny_config::WatcherConfig;
use hinny_resource::{Discovered, Error as ResourceError, PoolConfig};
use hinny_runtime::families::{DataSource, DataSourceConfig};
use hinny_runtime::{
    ContentMode, EmbeddedRoot, LifecycleCoordinator, RuntimeError, Settings,
};
use pretty_assertions::assert_eq;

fn quiet_watcher() -> WatcherConfig {
    WatcherConfig {
        enabled: false,
        ..WatcherConfig::default()
    }
}

fn fast_watcher(delay_ms: u64) -> WatcherConfig {
    WatcherConfig {
        enabled: true,
        interval_ms: 40,
        delay_ms,
        ..WatcherConfig::default()
    }
}

fn settings_for(root: &Path) -> Settings {
    let mut settings = Settings::default();
    settings.script.root = root.to_path_buf();
    settings.script.watcher = quiet_watcher();
    settings.pool = PoolConfig {
        max_total: 2,
        max_idle: 2,
        ..PoolConfig::default()
    };
    settings
}

async fn wait_for(mut done: impl FnMut() -> bool) -> bool {
    for _ in 0..150 {
        if done() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    done()
}

#[tokio::test]
async fn starts_serves_and_shuts_down_once() {
    let _log = hinny_log::init_test();
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir_all(dir.path().join("api")).unwrap();
    fs::write(dir.path().join("api/user.js"), "return 'user'").unwrap();

    let mut settings = settings_for(dir.path());
    settings.datasource.default_name = Some("main".into());
    settings.datasource.entries.insert(
        "main".into(),
        DataSourceConfig {
            url: Some("postgres://db.internal/app".into()),
            ..Default::default()
        },
    );

    let runtime = LifecycleCoordinator::new(settings).start().await.unwrap();
    assert!(!runtime.is_watching_scripts());
    assert_eq!(
        runtime.registries().datasource().get_default().unwrap().name(),
        "main"
    );

    let body = runtime
        .router()
        .dispatch("/!/api/user.json", |route, context| {
            async move {
                context
                    .source(&route.file(".js"))
                    .map(|source| source.to_string())
                    .ok_or_else(|| "script not found".into())
            }
            .boxed()
        })
        .await
        .unwrap();
    assert_eq!(body, "return 'user'");

    let report = runtime.shutdown().await;
    assert_eq!(report.registries.released, vec!["datasource/main"]);
    assert!(report.registries.is_clean());
    assert!(report.pool_closed);
    assert!(runtime.is_shut_down());
    assert!(runtime.registries().datasource().is_empty());

    let again = runtime.shutdown().await;
    assert_eq!(again, Default::default());

    let err = runtime.pool().borrow().await.unwrap_err();
    assert!(matches!(err, ResourceError::PoolClosed { .. }));
}

#[tokio::test(flavor = "multi_thread")]
async fn script_change_clears_the_pool() {
    let _log = hinny_log::init_test();
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("main.js"), "v1").unwrap();

    let mut settings = settings_for(dir.path());
    settings.script.watcher = fast_watcher(100);
    let runtime = LifecycleCoordinator::new(settings).start().await.unwrap();
    assert!(runtime.is_watching_scripts());

    let pool = runtime.pool();
    let first = pool.borrow().await.unwrap();
    let first_serial = first.serial();
    assert_eq!(first.source("main.js").as_deref(), Some("v1"));
    first.release().await;

    // Let the watcher take its baseline before editing.
    tokio::time::sleep(Duration::from_millis(150)).await;
    fs::write(dir.path().join("main.js"), "version two").unwrap();
    assert!(wait_for(|| pool.generation() >= 1).await, "pool was never cleared");

    let fresh = pool.borrow().await.unwrap();
    assert_ne!(fresh.serial(), first_serial);
    assert_eq!(fresh.source("main.js").as_deref(), Some("version two"));
    fresh.release().await;

    let report = runtime.shutdown().await;
    assert_eq!(report.watchers_stopped, 1);
    assert!(!runtime.is_watching_scripts());
}

#[tokio::test(flavor = "multi_thread")]
async fn busy_context_survives_a_clear_until_returned() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("main.js"), "v1").unwrap();
    let mut settings = settings_for(dir.path());
    settings.script.watcher = fast_watcher(50);
    let runtime = LifecycleCoordinator::new(settings).start().await.unwrap();
    let pool = runtime.pool();

    let held = pool.borrow().await.unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    fs::write(dir.path().join("main.js"), "v2 changed").unwrap();
    assert!(wait_for(|| pool.generation() >= 1).await);

    assert!(held.is_stale());
    assert_eq!(held.source("main.js").as_deref(), Some("v1"));
    held.release().await;
    assert_eq!(pool.stats().idle, 0, "stale context must not go back to idle");

    runtime.shutdown().await;
}

#[tokio::test]
async fn embedded_mode_needs_a_bundle_and_no_watcher() {
    let mut settings = Settings::default();
    settings.script.mode = ContentMode::Embedded;
    settings.script.watcher = quiet_watcher();

    let err = LifecycleCoordinator::new(settings.clone()).start().await.unwrap_err();
    assert!(matches!(err, RuntimeError::Content { .. }));

    let runtime = LifecycleCoordinator::new(settings.clone())
        .with_embedded(EmbeddedRoot::new().with_file("main.js", "embedded"))
        .start()
        .await
        .unwrap();
    let context = runtime.pool().borrow().await.unwrap();
    assert_eq!(context.source("main.js").as_deref(), Some("embedded"));
    context.release().await;
    runtime.shutdown().await;

    settings.script.watcher.enabled = true;
    let err = LifecycleCoordinator::new(settings)
        .with_embedded(EmbeddedRoot::new())
        .start()
        .await
        .unwrap_err();
    assert!(err.to_string().contains("unsupported content mode"));
}

#[tokio::test]
async fn discovered_datasource_becomes_default() {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings_for(dir.path());
    let url = url::Url::parse("postgres://db/app").unwrap();

    let runtime = LifecycleCoordinator::new(settings)
        .discover_datasource(Discovered::unnamed(DataSource::new("primary", url)))
        .start()
        .await
        .unwrap();
    let datasources = runtime.registries().datasource();
    assert_eq!(datasources.default_name().as_deref(), Some("datasource-1"));
    assert!(runtime.registries().cache().is_empty());
    runtime.shutdown().await;
}

#[tokio::test]
async fn failed_population_aborts_startup() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = settings_for(dir.path());
    settings.datasource.entries.insert("broken".into(), DataSourceConfig::default());

    let err = LifecycleCoordinator::new(settings).start().await.unwrap_err();
    match err {
        RuntimeError::Resource(ResourceError::Configuration { message }) => {
            assert!(message.contains("no url"), "{message}");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn disabled_family_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = settings_for(dir.path());
    settings.datasource.disable = true;
    settings.datasource.entries.insert("broken".into(), DataSourceConfig::default());

    let runtime = LifecycleCoordinator::new(settings).start().await.unwrap();
    assert!(runtime.registries().datasource().is_empty());
    runtime.shutdown().await;
}

#[tokio::test]
async fn missing_script_root_fails_fast() {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings_for(&dir.path().join("absent"));
    let err = LifecycleCoordinator::new(settings).start().await.unwrap_err();
    assert!(matches!(err, RuntimeError::Content { .. }));
}

#[tokio::test]
async fn named_default_without_resources_fails_startup() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = settings_for(dir.path());
    settings.datasource.default_name = Some("main".into());

    let err = LifecycleCoordinator::new(settings).start().await.unwrap_err();
    match err {
        RuntimeError::Resource(ResourceError::Configuration { message }) => {
            assert!(message.contains("'main' does not exist"), "{message}");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn unmentioned_family_stays_empty() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = LifecycleCoordinator::new(settings_for(dir.path()))
        .start()
        .await
        .unwrap();
    assert!(runtime.registries().datasource().is_empty());
    assert!(runtime.registries().datasource().default_name().is_none());
    runtime.shutdown().await;
}

#[tokio::test]
async fn files_outside_the_script_filter_are_not_loaded() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("main.js"), "return 1").unwrap();
    fs::write(dir.path().join("logo.png"), [0x89, 0x50, 0x4e, 0x47, 0xff, 0xfe]).unwrap();

    let mut settings = settings_for(dir.path());
    settings.script.watcher.include = vec!["*.js".into()];
    let runtime = LifecycleCoordinator::new(settings).start().await.unwrap();

    let context = runtime.pool().borrow().await.unwrap();
    assert_eq!(context.source("main.js").as_deref(), Some("return 1"));
    assert!(!context.contains("logo.png"));
    assert_eq!(context.len(), 1);
    context.release().await;
    runtime.shutdown().await;
}

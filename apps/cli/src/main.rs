//! `hinny`: load configuration, check it, resolve request paths, or run the
//! script runtime until interrupted.
#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use hinny_config::ConfigLoader;
use hinny_runtime::{ContentMode, LifecycleCoordinator, Settings, router};
use serde::{Deserialize, Serialize};

/// Hot-reloadable script runtime
#[derive(Parser, Debug)]
#[command(name = "hinny", author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML); missing files fall back to defaults
    #[arg(short = 'c', long = "config", value_name = "FILE", env = "HINNY_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Script root (overrides the configuration file)
    #[arg(long = "root", value_name = "DIR", global = true)]
    root: Option<PathBuf>,

    /// Log filter, e.g. "info" or "debug,hinny_resource=trace"
    #[arg(short = 'l', long = "log-level", value_name = "LEVEL", global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the runtime and run until Ctrl-C
    Serve,

    /// Validate the configuration and print what would start
    Check,

    /// Show which script a request path maps to
    Resolve {
        /// Request path, e.g. /!/api/user.json
        path: String,
    },
}

/// The `[log]` section of the configuration file.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct LogSection {
    log: hinny_log::Config,
}

impl Cli {
    fn loader(&self) -> ConfigLoader {
        let loader = ConfigLoader::new();
        match &self.config {
            Some(path) => loader.with_required_file(path),
            None => loader.with_file("hinny.toml"),
        }
    }

    fn settings(&self, loader: &ConfigLoader) -> anyhow::Result<Settings> {
        let mut settings: Settings = loader.load().context("failed to load configuration")?;
        if let Some(root) = &self.root {
            settings.script.root.clone_from(root);
        }
        settings.validate().context("invalid configuration")?;
        Ok(settings)
    }

    fn log_config(&self, loader: &ConfigLoader) -> anyhow::Result<hinny_log::Config> {
        let LogSection { mut log } = loader.load().context("failed to load [log] section")?;
        if let Some(level) = &self.log_level {
            log.level.clone_from(level);
        }
        Ok(log)
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let loader = cli.loader();
    match &cli.command {
        Commands::Check => check(&cli.settings(&loader)?),
        Commands::Resolve { path } => Ok(resolve(&cli.settings(&loader)?, path)),
        Commands::Serve => {
            let settings = cli.settings(&loader)?;
            let _guard = hinny_log::init_with(cli.log_config(&loader)?)
                .context("failed to initialize logging")?;
            tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("failed to build the tokio runtime")?
                .block_on(serve(settings))?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn serve(settings: Settings) -> anyhow::Result<()> {
    let runtime = LifecycleCoordinator::new(settings)
        .start()
        .await
        .context("startup failed")?;
    tracing::info!("hinny is running, press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;

    let report = runtime.shutdown().await;
    for (name, reason) in &report.registries.failed {
        tracing::warn!(resource = %name, reason = %reason, "release failed");
    }
    tracing::info!(
        released = report.registries.released.len(),
        failed = report.registries.failed.len(),
        "hinny stopped"
    );
    Ok(())
}

fn check(settings: &Settings) -> anyhow::Result<ExitCode> {
    let script = &settings.script;
    if script.mode == ContentMode::FileSystem && !script.root.is_dir() {
        anyhow::bail!("script root {} is not a directory", script.root.display());
    }
    if let Some(root) = &settings.mapper.root
        && script.mode == ContentMode::FileSystem
        && !root.is_dir()
    {
        anyhow::bail!("mapper root {} is not a directory", root.display());
    }

    println!("configuration ok");
    println!("script root:    {} ({:?})", script.root.display(), script.mode);
    println!("script watcher: {}", on_off(settings.watch_scripts()));
    println!(
        "pool:           max_total={} max_idle={} min_idle={} strategy={:?}",
        settings.pool.max_total, settings.pool.max_idle, settings.pool.min_idle, settings.pool.strategy
    );
    match &settings.mapper.root {
        Some(root) => println!(
            "mapper root:    {} (watcher {})",
            root.display(),
            on_off(settings.watch_mappers())
        ),
        None => println!("mapper root:    none"),
    }
    for mapping in &settings.router.prefix_mappings {
        println!(
            "route:          {} -> /{}",
            mapping.request_path, mapping.script_path
        );
    }
    println!(
        "datasources:    {} configured{}",
        settings.datasource.entries.len(),
        disabled(settings.datasource.disable)
    );
    println!(
        "caches:         {} configured{}",
        settings.cache.entries.len(),
        disabled(settings.cache.disable)
    );
    println!(
        "metadata:       {} configured{}",
        settings.metadata.entries.len(),
        disabled(settings.metadata.disable)
    );
    Ok(ExitCode::SUCCESS)
}

fn resolve(settings: &Settings, path: &str) -> ExitCode {
    match router::resolve(&settings.router, path) {
        Some(route) => {
            println!("{}", route.script_path);
            ExitCode::SUCCESS
        }
        None => {
            eprintln!("no script route for {path}");
            ExitCode::from(2)
        }
    }
}

fn on_off(on: bool) -> &'static str {
    if on { "on" } else { "off" }
}

fn disabled(disable: bool) -> &'static str {
    if disable { " (disabled)" } else { "" }
}

//! RiskGuard - content risk decision service.
//!
//! Loads configuration, wires the decision pipeline (detectors, rules, word
//! list, result cache) and serves it over HTTP until Ctrl-C.

mod config;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use riskguard_core::detector::remote;
use riskguard_core::{
    BackgroundTasks, CheckConfig, ContentChecker, DetectorRegistry, MemoryCacheBackend,
    ResultCache, RuleEngine, SensitiveWordStore,
};
use riskguard_server::{AppState, Server, ServerConfig};
use riskguard_storage::SqliteCacheBackend;
use tracing::{debug, info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{AppConfig, CacheBackendKind, CacheSection};

/// RiskGuard - content risk decision service
#[derive(Parser, Debug)]
#[command(name = "riskguard", version, about)]
struct Args {
    /// Path to the JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Host to bind to (overrides the config file)
    #[arg(long)]
    host: Option<String>,

    /// Port to bind to (overrides the config file)
    #[arg(short, long)]
    port: Option<u16>,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long)]
    log_level: Option<String>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

/// Initialize logging: console always, plus daily files when a directory is set.
fn init_logging(level: &str, log_dir: Option<&Path>) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("riskguard={},warn", level)));

    if let Some(log_dir) = log_dir {
        let file_appender = std::fs::create_dir_all(log_dir).ok().and_then(|_| {
            RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .max_log_files(7)
                .filename_prefix("riskguard")
                .filename_suffix("log")
                .build(log_dir)
                .ok()
        });

        if let Some(appender) = file_appender {
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stdout))
                .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
                .init();
            info!(dir = %log_dir.display(), "Logging to files");
            return Some(guard);
        }

        tracing_subscriber::fmt().with_env_filter(env_filter).init();
        warn!(dir = %log_dir.display(), "File logging unavailable, using console only");
        return None;
    }

    tracing_subscriber::fmt().with_env_filter(env_filter).init();
    None
}

/// Loads the rule file if configured. Failure here is fatal.
fn load_rules(check: &CheckConfig) -> Result<RuleEngine> {
    match &check.rule_file {
        Some(path) => RuleEngine::from_file(path)
            .with_context(|| format!("failed to load rules from {}", path.display())),
        None => {
            warn!("No rule file configured, running with detectors only");
            Ok(RuleEngine::empty())
        }
    }
}

/// Builds the result cache and its expired-entry purge task.
fn build_cache(section: &CacheSection, ttl: Duration, tasks: &BackgroundTasks) -> Result<ResultCache> {
    let purge_every = (section.purge_interval_secs > 0)
        .then(|| Duration::from_secs(section.purge_interval_secs));

    let cache = match section.backend {
        CacheBackendKind::None => ResultCache::disabled(),
        CacheBackendKind::Memory => {
            let backend = Arc::new(MemoryCacheBackend::new());
            if let Some(interval) = purge_every {
                let purger = backend.clone();
                tasks.spawn_periodic("cache_purge", interval, move || {
                    let removed = purger.purge_expired();
                    debug!(removed, "Purged expired cache entries");
                });
            }
            ResultCache::new(backend, ttl)
        }
        CacheBackendKind::Sqlite => {
            let backend = SqliteCacheBackend::with_path(&section.path)
                .with_context(|| format!("failed to open cache store {}", section.path.display()))?;

            if let Some(interval) = purge_every {
                let purger = backend.clone();
                tasks.spawn_periodic("cache_purge", interval, move || {
                    if let Err(e) = purger.purge_expired() {
                        warn!(error = %e, "Cache purge failed");
                    }
                });
            }

            ResultCache::new(Arc::new(backend), ttl)
        }
    };
    info!(backend = ?section.backend, "Result cache configured");
    Ok(cache)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = AppConfig::load(args.config.as_deref())?;

    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    let level = if args.debug {
        "debug".to_string()
    } else {
        args.log_level.unwrap_or_else(|| config.logging.level.clone())
    };

    let _log_guard = init_logging(&level, config.logging.dir.as_deref());
    info!(version = env!("CARGO_PKG_VERSION"), "Starting RiskGuard");

    let check = config.check.clone();
    let words = Arc::new(SensitiveWordStore::load(check.sensitive_word_paths.clone()));
    let rules = Arc::new(load_rules(&check)?);
    let tasks = BackgroundTasks::new();

    let mut detectors = DetectorRegistry::with_local_detectors(words.clone(), check.semantic_threshold);
    let remote_count = remote::connect_enabled(&config.remote, &mut detectors, &tasks).await;
    info!(
        detectors = ?detectors.names(),
        remote = remote_count,
        "Detectors registered"
    );

    let cache = build_cache(&config.cache, check.cache_ttl(), &tasks)?;

    if let Some(interval) = check.word_refresh_interval() {
        tasks.spawn_word_refresh(words.clone(), interval);
    }
    if let Some(interval) = check.rule_reload_interval() {
        if rules.source().is_some() {
            tasks.spawn_rule_reload(rules.clone(), interval);
        }
    }

    let checker = ContentChecker::new(check, words, rules)
        .with_detectors(detectors)
        .with_cache(cache);

    let server_config = ServerConfig::default()
        .with_host(config.server.host.clone())
        .with_port(config.server.port);
    let server = Server::new(server_config, AppState::new(Arc::new(checker)))?;

    server.run(shutdown_signal()).await?;

    tasks.shutdown().await;
    info!("RiskGuard stopped");
    Ok(())
}

//! loraloggerd — LoRa packet-forwarder collector daemon.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use loralogger_core::config::{LoraLoggerConfig, TtlBackend};
use loralogger_services::sink::ttl_store::purge_loop;
use loralogger_services::{
    DynamoDbTtlStore, RotatingLogSink, SinkChain, SqliteTtlStore, TtlStore, TtlStoreSink,
};
use loraloggerd::Collector;

#[derive(Parser, Debug)]
#[command(name = "loraloggerd")]
#[command(about = "Records LoRa packet-forwarder UDP traffic", long_about = None)]
struct Args {
    /// Path to configuration file (optional)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// tracing filter, e.g. "debug" or "loraloggerd=trace" (RUST_LOG wins)
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the version
    Version,
    /// Print the effective configuration file
    Configfile,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let (mut config, source) =
        LoraLoggerConfig::load(args.config.as_deref()).context("error loading config file")?;
    if let Some(level) = args.log_level {
        config.general.log_level = level;
    }

    match args.command {
        Some(Commands::Version) => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        Some(Commands::Configfile) => {
            print!("{}", config.to_toml_pretty()?);
            return Ok(());
        }
        None => {}
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.general.log_level)),
        )
        .init();

    match &source {
        Some(path) => tracing::info!(path = %path.display(), "configuration loaded"),
        None => tracing::warn!("no configuration file found, using defaults"),
    }
    config.validate()?;

    run(config).await
}

async fn run(config: LoraLoggerConfig) -> Result<()> {
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "loraloggerd starting");

    // ── Sinks, in write order ────────────────────────────────────────────────

    let mut sinks = SinkChain::new(config.collector.sink_policy);
    let mut purge_task = None;

    if config.ttl_store.enabled {
        let ttl = &config.ttl_store;
        let store: Arc<dyn TtlStore> = match ttl.backend {
            TtlBackend::Sqlite => {
                let store = SqliteTtlStore::open(&ttl.path, &ttl.table).with_context(|| {
                    format!("failed to open ttl store {}", ttl.path.display())
                })?;
                tracing::info!(path = %ttl.path.display(), table = %ttl.table, "sqlite ttl store ready");
                purge_task = Some(tokio::spawn(purge_loop(
                    store.clone(),
                    Duration::from_secs(ttl.purge_interval_secs),
                )));
                Arc::new(store)
            }
            TtlBackend::DynamoDb => {
                let store = DynamoDbTtlStore::connect(ttl).await;
                tracing::info!(
                    region = %ttl.region,
                    table = %ttl.table,
                    profile = ttl.credentials_profile.as_deref().unwrap_or("default"),
                    "dynamodb ttl store ready"
                );
                Arc::new(store)
            }
        };
        sinks.push(Arc::new(TtlStoreSink::new(store)));
    }

    if config.log_sink.enabled {
        tracing::info!(root = %config.log_sink.root.display(), "rotating log ready");
        sinks.push(Arc::new(RotatingLogSink::new(
            config.log_sink.root.clone(),
            config.log_sink.file_name.clone(),
        )));
    }

    tracing::info!(sinks = ?sinks.names(), policy = ?sinks.policy(), "persistence sinks configured");

    // ── Collector ────────────────────────────────────────────────────────────

    let collector = Collector::new(&config.collector, sinks)
        .await
        .context("new loralogger error")?;

    // ── Wait for exit ────────────────────────────────────────────────────────

    let signal = wait_for_signal().await;
    tracing::info!(signal, "signal received");
    tracing::warn!("stopping loralogger");

    tokio::select! {
        r = collector.close() => r.context("close udp listener error")?,
        signal = wait_for_signal() => {
            tracing::info!(signal, "signal received, stopping immediately");
        }
    }

    if let Some(task) = purge_task {
        task.abort();
    }
    Ok(())
}

/// Resolve on SIGINT or SIGTERM, naming the one that arrived.
async fn wait_for_signal() -> &'static str {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => tokio::select! {
                _ = tokio::signal::ctrl_c() => "SIGINT",
                _ = term.recv() => "SIGTERM",
            },
            Err(e) => {
                tracing::warn!(error = %e, "cannot listen for SIGTERM");
                let _ = tokio::signal::ctrl_c().await;
                "SIGINT"
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        "SIGINT"
    }
}

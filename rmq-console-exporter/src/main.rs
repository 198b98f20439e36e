//! Prometheus exporter for RabbitMQ queue statistics.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::watch;
use tracing::{Level, error, info, warn};
use tracing_subscriber::EnvFilter;

use rmq_console_collector::{
    CancellationToken, Collector, FilterHandle, MetricsSource, ParserKind, SingleFlightGuard,
};
use rmq_console_exporter::config::{ConfigError, LogFormat};
use rmq_console_exporter::{ConfigWatcher, ExporterConfig, HttpServer, QueueExporter, wizard};

/// Prometheus exporter for RabbitMQ queue statistics.
#[derive(Parser, Debug)]
#[command(name = "rmq-console-exporter")]
#[command(about = "Export rabbitmqctl queue statistics as Prometheus metrics")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format).
    #[arg(short, long, default_value = "config.json5")]
    config: PathBuf,

    /// HTTP listen address (overrides config).
    #[arg(long)]
    listen: Option<String>,

    /// Metric name prefix (overrides config).
    #[arg(long)]
    prefix: Option<String>,

    /// Collection timeout in milliseconds (overrides config).
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Output buffer size in lines (overrides config).
    #[arg(long)]
    output_buffer: Option<usize>,

    /// Queue output format: json or tabular (overrides config).
    #[arg(long)]
    queue_parser: Option<ParserKind>,

    /// Log level (trace, debug, info, warn, error; overrides config).
    #[arg(long)]
    log_level: Option<String>,

    /// Interactively create a config file and exit.
    #[arg(long)]
    create_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.create_config {
        wizard::create_config()?;
        return Ok(());
    }

    // Load configuration; a missing file falls back to defaults
    let (mut config, load_warning) = match ExporterConfig::load_from_file(&args.config) {
        Ok(config) => (config, None),
        Err(ConfigError::Io(e)) => (ExporterConfig::default(), Some(e)),
        Err(e) => return Err(e.into()),
    };
    let config_found = load_warning.is_none();

    // Override from CLI
    if let Some(listen) = args.listen {
        config.prometheus.listen = listen;
    }
    if let Some(prefix) = args.prefix {
        config.prometheus.prefix = prefix;
    }
    if let Some(timeout_ms) = args.timeout_ms {
        config.collection.timeout_ms = timeout_ms;
    }
    if let Some(output_buffer) = args.output_buffer {
        config.collection.output_buffer = output_buffer;
    }
    if let Some(parser) = args.queue_parser {
        config.collection.parser = parser;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    config.validate()?;

    // Initialize logging
    let log_level: Level = config.logging.level.parse().unwrap_or(Level::INFO);
    let filter = EnvFilter::try_from_default_env().or_else(|_| {
        EnvFilter::try_new(format!(
            "rmq_console_exporter={level},rmq_console_collector={level}",
            level = log_level
        ))
    })?;

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .json()
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }

    info!("Starting RabbitMQ console exporter");
    if let Some(e) = load_warning {
        warn!(
            path = %args.config.display(),
            error = %e,
            "Config file not loaded, using defaults"
        );
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    // kills an in-flight rabbitmqctl when the exporter stops
    let collection_shutdown = CancellationToken::new();

    // Build the collection pipeline
    let filter = FilterHandle::new(config.filters.compile()?);
    let collector = Collector::new(
        config.collection.parser.build(config.collection.command.clone()),
        filter.clone(),
        config.collection.timeout(),
        config.collection.output_buffer,
    )
    .with_shutdown(collection_shutdown.clone());
    info!(
        command = %config.collection.command,
        parser = %config.collection.parser,
        rules = config.filters.queues.len(),
        timeout_ms = config.collection.timeout_ms,
        "Collector configured"
    );

    let sources: Vec<Arc<dyn MetricsSource>> = vec![Arc::new(collector)];
    let exporter = Arc::new(QueueExporter::new(
        sources,
        config.prometheus.prefix.clone(),
        Arc::new(SingleFlightGuard::new()),
    ));

    let listen_addr = config
        .prometheus
        .listen
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid listen address: {}", e))?;
    let http_server = HttpServer::new(
        exporter.clone(),
        listen_addr,
        config.prometheus.path.clone(),
    );

    // Start config watcher
    let watcher_task = if config_found && config.reload.enabled {
        let watcher = ConfigWatcher::new(
            args.config.clone(),
            filter,
            Duration::from_secs(config.reload.interval_secs),
        );
        Some(tokio::spawn(watcher.run(shutdown_rx.clone())))
    } else {
        None
    };

    // Start HTTP server
    let http_shutdown = shutdown_rx.clone();
    let http_task = tokio::spawn(async move {
        if let Err(e) = http_server.run(http_shutdown).await {
            error!("HTTP server error: {}", e);
        }
    });

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate() => {
            info!("Received SIGTERM, shutting down...");
        }
    }

    collection_shutdown.cancel();
    shutdown_tx.send(true)?;

    let _ = tokio::time::timeout(Duration::from_secs(5), async {
        let _ = http_task.await;
        if let Some(task) = watcher_task {
            let _ = task.await;
        }
    })
    .await;

    let stats = exporter.stats();
    info!(
        scrapes = stats.scrapes,
        skipped_scrapes = stats.skipped_scrapes,
        collections_failed = stats.collections_failed,
        "Final statistics"
    );

    info!("Exporter stopped");
    Ok(())
}

#[cfg(unix)]
async fn terminate() {
    match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            warn!(error = %e, "Failed to install SIGTERM handler");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}

//! ICMP reachability exporter.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, anyhow};
use clap::Parser;
use tracing::{error, info};

use pingsight_exporter::{
    ExporterConfig, HttpServer, IcmpTransport, PingMetrics, ProberSupervisor, Registry,
};

/// How long probers and the HTTP server get to stop after a signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Continuous ICMP reachability monitor.
#[derive(Parser, Debug)]
#[command(name = "pingsight-exporter")]
#[command(about = "Ping hosts continuously and export round-trip metrics for Prometheus")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Host to probe; repeat for several (replaces configured targets).
    #[arg(short, long = "target")]
    targets: Vec<String>,

    /// HTTP listen address (overrides config).
    #[arg(long)]
    listen: Option<String>,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = match &args.config {
        Some(path) => ExporterConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config from {:?}", path))?,
        None => ExporterConfig::default(),
    };

    if !args.targets.is_empty() {
        config.targets = args.targets.clone();
    }
    if let Some(listen) = args.listen {
        config.http.listen = listen;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    config.validate()?;

    pingsight_common::init_tracing(&config.logging)?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting pingsight exporter");

    let registry = Arc::new(Registry::new());
    let metrics = PingMetrics::register(&registry).context("Failed to register metrics")?;

    // Bind before starting probers: a busy port is fatal.
    let listen_addr = config.listen_addr()?;
    let http_server = HttpServer::bind(registry.clone(), listen_addr, config.http.path.clone())
        .await
        .context("Failed to start HTTP server")?;

    let transport = Arc::new(IcmpTransport::new(
        config.probe.timeout(),
        config.probe.payload_size,
    ));
    let mut supervisor = ProberSupervisor::new(transport, metrics, config.probe.interval());
    supervisor.launch_all(&config.targets);

    let http_shutdown = supervisor.shutdown_signal();
    let mut http_task = tokio::spawn(http_server.run(http_shutdown));

    // Wait for shutdown signal, or for the endpoint to die on its own
    let outcome = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
            Ok(())
        }
        _ = terminate() => {
            info!("Received SIGTERM, shutting down...");
            Ok(())
        }
        result = &mut http_task => {
            let err = match result {
                Ok(Ok(())) => anyhow!("HTTP server stopped unexpectedly"),
                Ok(Err(e)) => anyhow::Error::new(e),
                Err(e) => anyhow!("HTTP server task failed: {}", e),
            };
            error!(error = %err, "Metrics endpoint is down, shutting down...");
            Err(err)
        }
    };

    supervisor.shutdown(SHUTDOWN_GRACE).await;

    if outcome.is_ok() {
        match tokio::time::timeout(SHUTDOWN_GRACE, http_task).await {
            Ok(Ok(Err(e))) => error!(error = %e, "HTTP server error"),
            Ok(Err(e)) => error!(error = %e, "HTTP server task failed"),
            Err(_) => error!("HTTP server did not stop in time"),
            Ok(Ok(Ok(()))) => {}
        }
    }
    outcome?;

    info!(
        series_count = registry.series_count(),
        "Exporter stopped"
    );
    Ok(())
}

#[cfg(unix)]
async fn terminate() {
    match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            error!(error = %e, "Failed to install SIGTERM handler");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}

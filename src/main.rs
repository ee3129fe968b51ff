use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use goal_pilot::reasoning::HttpReasoningClient;
use goal_pilot::worker::HttpWorker;
use goal_pilot::{Config, MemoryStore, Orchestrator};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let config = Config::load().context("Failed to load configuration")?;
    let (worker_url, reasoning_url) = config.endpoints().context("Missing collaborator endpoint")?;
    tracing::info!(worker = %worker_url, reasoning = %reasoning_url, "Collaborator endpoints");

    let store = match &config.state_path {
        Some(path) => MemoryStore::open(path.clone()).await,
        None => MemoryStore::in_memory(),
    };
    let worker = Arc::new(HttpWorker::new(worker_url));
    let reasoning = Arc::new(HttpReasoningClient::new(reasoning_url));
    let status_interval = Duration::from_secs(config.status_log_interval_secs.max(1));

    let orchestrator = Orchestrator::new(
        config,
        Arc::new(store),
        worker,
        reasoning.clone(),
        reasoning,
    );

    let cancel = CancellationToken::new();
    let running = orchestrator.start(cancel.clone());

    let reporter = tokio::spawn(log_status(Arc::clone(&orchestrator), status_interval, cancel));

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, stopping loops...");

    running.shutdown().await;
    if let Err(e) = reporter.await {
        tracing::error!("Status reporter ended abnormally: {}", e);
    }
    tracing::info!("Goal pilot stopped");
    Ok(())
}

fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("goal_pilot=info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();
}

async fn log_status(orchestrator: Arc<Orchestrator>, every: Duration, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(every) => {}
        }

        let status = orchestrator.status().await;
        let healthy = status.workspaces.iter().filter(|w| w.healthy).count();
        tracing::info!(
            load = %status.executor.load_level,
            in_flight = status.executor.in_flight,
            completed = status.executor.completed_total,
            failed = status.executor.failed_total,
            generated = status.monitor.tasks_inserted,
            deliverables = status.deliverables.created,
            escalated = status.recovery.escalated,
            workspaces = status.workspaces.len(),
            healthy,
            "Status"
        );
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

use std::process;
use std::sync::Arc;

use clap::Parser;
use dotenvy::dotenv;
use tokio::sync::mpsc;

use evm_gas_monitor::{
    alerts::{spawn_dispatcher, AlertNotifier, LogNotifier, WebhookNotifier},
    api,
    cli::Cli,
    clock::SystemClock,
    config::Config,
    error::AppError,
    logging::init_logging,
    metrics::AppMetrics,
    persistence::SnapshotWriter,
    scheduler::{Collaborators, Orchestrator},
    services::HttpRpcClient,
    shutdown::ShutdownSignal,
};

#[tokio::main]
async fn main() {
    dotenv().ok();
    let cli = Cli::parse();

    let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    init_logging(&log_level);

    let config = Config::from_env()
        .and_then(|mut config| cli.apply(&mut config).map(|_| config))
        .map_err(AppError::Config)
        .unwrap_or_else(|err| {
            tracing::error!("{}", err);
            process::exit(1);
        });

    if cli.check_config {
        print!("{}", config.summary());
        return;
    }

    if let Err(err) = run(config).await {
        tracing::error!("{}", err);
        process::exit(1);
    }
}

async fn run(config: Config) -> Result<(), AppError> {
    tracing::info!(
        networks = ?config.networks.keys().collect::<Vec<_>>(),
        "Starting gas monitor"
    );

    let metrics = Arc::new(AppMetrics::new()?);
    let snapshot_writer = Arc::new(SnapshotWriter::new(config.persistence.path.clone()));
    let (alert_tx, alert_rx) = mpsc::unbounded_channel();

    let mut orchestrator = Orchestrator::new(
        &config,
        Collaborators {
            transport: Arc::new(HttpRpcClient::new()),
            clock: Arc::new(SystemClock),
            metrics,
            alerts: alert_tx,
            snapshot_writer: Some(snapshot_writer.clone()),
        },
    )?;

    match snapshot_writer.load().await {
        Ok(Some(snapshot)) => {
            let restored = orchestrator.store().restore(snapshot);
            tracing::info!(
                "Restored {} samples from {}",
                restored,
                snapshot_writer.path().display()
            );
        }
        Ok(None) => tracing::info!("No history snapshot found; starting empty"),
        Err(err) => tracing::warn!("Ignoring unreadable history snapshot: {}", err),
    }

    let mut notifiers: Vec<Arc<dyn AlertNotifier>> = vec![Arc::new(LogNotifier)];
    if let Some(url) = &config.alerts.webhook_url {
        notifiers.push(Arc::new(WebhookNotifier::new(url.clone())));
    }
    let dispatcher = spawn_dispatcher(alert_rx, Arc::new(config.networks.clone()), notifiers);

    let shutdown = ShutdownSignal::new();
    tokio::spawn(shutdown.clone().trigger_on_ctrl_c());

    let api_task = config.api_bind.map(|addr| {
        let view = orchestrator.view();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(err) = api::serve(addr, view, shutdown.clone()).await {
                tracing::error!("Read API failed: {}", err);
                shutdown.shutdown();
            }
        })
    });

    orchestrator.run(shutdown.clone()).await;

    // dropping the orchestrator closes the alert channel
    drop(orchestrator);
    let _ = dispatcher.await;
    if let Some(task) = api_task {
        let _ = task.await;
    }

    tracing::info!("Gas monitor shutdown complete");
    Ok(())
}
